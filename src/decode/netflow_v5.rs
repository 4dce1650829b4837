//! NetFlow v5 decoder (spec §4.1).
//!
//! Wire layout is fixed: a 24-byte header followed by `count` 48-byte
//! records, all big-endian. Grounded on the teacher's
//! `parse_v5_header`/`parse_v5_record`/`parse_v5_packet` (`netflow.rs`),
//! generalized to emit typed errors, apply sampling-rate scaling, and
//! populate the full `FlowRecord` the teacher's aggregation-only path
//! never needed.

use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::decode::DecodeError;
use crate::model::FlowRecord;
use crate::stats::ParserStats;

pub const HEADER_LEN: usize = 24;
pub const RECORD_LEN: usize = 48;

/// Decode one UDP payload into zero or more `FlowRecord`s.
///
/// Returns `Ok(records)` — possibly empty — on success, or `Err(kind)` with
/// no records on any decode failure. Updates `stats` as it goes: a
/// `packets_received` increment happens only once the header itself parses,
/// mirroring the teacher's "one UDP datagram == one packets_received" count.
pub fn decode(
    payload: &[u8],
    exporter_address: IpAddr,
    stats: &ParserStats,
) -> Result<Vec<FlowRecord>, DecodeError> {
    if payload.len() < 2 {
        return Err(DecodeError::ShortPacket);
    }
    let version = u16::from_be_bytes([payload[0], payload[1]]);
    if version != 5 {
        // Versions 9/10 (IPFIX) use a different, variable-length template
        // scheme and are not implemented by this decoder.
        return Err(DecodeError::UnsupportedVersion);
    }
    if payload.len() < HEADER_LEN {
        return Err(DecodeError::ShortPacket);
    }

    let header = parse_header(payload);
    let expected_len = HEADER_LEN + header.count as usize * RECORD_LEN;
    if payload.len() < expected_len {
        return Err(DecodeError::SizeMismatch);
    }

    stats
        .packets_received
        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

    let sampling_rate = (header.sampling_interval & 0x3FFF).max(1) as u32;
    let observed_at = UNIX_EPOCH
        + Duration::new(header.unix_secs as u64, header.unix_nsecs)
        + Duration::from_secs(0);

    let mut records = Vec::with_capacity(header.count as usize);
    for i in 0..header.count as usize {
        let offset = HEADER_LEN + i * RECORD_LEN;
        // Invariant: since payload.len() >= expected_len, every record slot
        // in [0, count) is fully within bounds.
        debug_assert!(offset + RECORD_LEN <= payload.len());
        records.push(parse_record(
            &payload[offset..offset + RECORD_LEN],
            exporter_address,
            observed_at,
            sampling_rate,
        ));
    }

    stats
        .records_emitted
        .fetch_add(records.len() as u64, std::sync::atomic::Ordering::Relaxed);

    Ok(records)
}

struct Header {
    count: u16,
    unix_secs: u32,
    unix_nsecs: u32,
    sampling_interval: u16,
}

fn parse_header(buf: &[u8]) -> Header {
    Header {
        count: u16::from_be_bytes([buf[2], buf[3]]),
        unix_secs: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        unix_nsecs: u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]),
        sampling_interval: u16::from_be_bytes([buf[22], buf[23]]),
    }
}

fn parse_record(
    buf: &[u8],
    exporter_address: IpAddr,
    observed_at: SystemTime,
    sampling_rate: u32,
) -> FlowRecord {
    let src_addr = Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]);
    let dst_addr = Ipv4Addr::new(buf[4], buf[5], buf[6], buf[7]);
    let next_hop = Ipv4Addr::new(buf[8], buf[9], buf[10], buf[11]);
    let input_if = u16::from_be_bytes([buf[12], buf[13]]) as u32;
    let output_if = u16::from_be_bytes([buf[14], buf[15]]) as u32;
    let pkts = u32::from_be_bytes([buf[16], buf[17], buf[18], buf[19]]);
    let octets = u32::from_be_bytes([buf[20], buf[21], buf[22], buf[23]]);
    let first = u32::from_be_bytes([buf[24], buf[25], buf[26], buf[27]]);
    let last = u32::from_be_bytes([buf[28], buf[29], buf[30], buf[31]]);
    let src_port = u16::from_be_bytes([buf[32], buf[33]]);
    let dst_port = u16::from_be_bytes([buf[34], buf[35]]);
    // buf[36] is padding; the TCP flags byte follows it at offset 37.
    let tcp_flags = buf[37];
    let protocol = buf[38];
    let tos = buf[39];
    let src_as = u16::from_be_bytes([buf[40], buf[41]]) as u32;
    let dst_as = u16::from_be_bytes([buf[42], buf[43]]) as u32;

    FlowRecord {
        observed_at,
        exporter_address,
        source_address: IpAddr::V4(src_addr),
        destination_address: IpAddr::V4(dst_addr),
        source_port: src_port,
        destination_port: dst_port,
        ip_protocol: protocol,
        bytes: octets as u64 * sampling_rate as u64,
        packets: pkts as u64 * sampling_rate as u64,
        tcp_flags,
        tos,
        input_interface: input_if,
        output_interface: output_if,
        next_hop_address: IpAddr::V4(next_hop),
        source_as: src_as,
        destination_as: dst_as,
        flow_duration_ms: if last >= first { last - first } else { 0 },
        sampling_rate,
    }
}
