//! sFlow v5 decoder.
//!
//! Unlike NetFlow, the wire format is a nested TLV walk: datagram header,
//! then `num_samples` samples, each containing `num_records` flow records,
//! each wrapping a captured link-layer header. Only the raw-packet-header /
//! flow-sample path is implemented — counter samples and the extended
//! record types (`ExtendedSwitch`, `ExtendedRouter`, ...) never produce a
//! `FlowRecord` and are skipped by length, not parsed.
//!
//! The source this was grounded on reads the wall clock at parse time; here
//! the caller supplies `observed_at` instead, so tests can assert against a
//! fixed instant rather than mocking a clock.

use std::net::{IpAddr, Ipv4Addr};
use std::time::SystemTime;

use crate::decode::DecodeError;
use crate::model::FlowRecord;
use crate::stats::ParserStats;

const DATAGRAM_HEADER_MIN: usize = 7 * 4; // version, address_type, v4 agent addr, sub_agent, seq, uptime, num_samples
const FLOW_SAMPLE_FORMAT: u32 = 1;
const EXPANDED_FLOW_SAMPLE_FORMAT: u32 = 3;
const RAW_PACKET_HEADER_FORMAT: u32 = 1;
const ETHERTYPE_VLAN: u16 = 0x8100;
const ETHERTYPE_IPV4: u16 = 0x0800;

/// Decode one sFlow v5 UDP payload into zero or more `FlowRecord`s.
///
/// A malformed sample or flow record is skipped (counted in
/// `decode_errors`) without failing the rest of the datagram. Only a
/// truncated datagram-level header fails the whole call.
pub fn decode(
    payload: &[u8],
    exporter_address: IpAddr,
    observed_at: SystemTime,
    stats: &ParserStats,
) -> Result<Vec<FlowRecord>, DecodeError> {
    if payload.len() < 8 {
        return Err(DecodeError::ShortPacket);
    }
    let version = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
    if version != 5 {
        return Err(DecodeError::UnsupportedVersion);
    }
    let address_type = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
    let agent_len = match address_type {
        1 => 4,
        2 => 16,
        _ => return Err(DecodeError::ShortPacket),
    };
    let header_len = 8 + agent_len + 4 * 4; // sub_agent_id, sequence_number, uptime_ms, num_samples
    if payload.len() < header_len {
        return Err(DecodeError::ShortPacket);
    }
    let num_samples_off = 8 + agent_len + 12;
    let num_samples = be_u32(payload, num_samples_off);

    stats
        .packets_received
        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

    let mut records = Vec::new();
    let mut offset = header_len;

    for _ in 0..num_samples {
        if payload.len() < offset + 8 {
            // Can't even read the next sample's format/length — no way to
            // skip forward reliably, so stop walking this datagram.
            stats
                .decode_errors
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            break;
        }
        let sample_format = be_u32(payload, offset);
        let sample_length = be_u32(payload, offset + 4) as usize;
        let body_start = offset + 8;
        let body_end = body_start.saturating_add(sample_length);
        if body_end > payload.len() {
            stats
                .decode_errors
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            break;
        }
        let body = &payload[body_start..body_end];
        let enterprise = sample_format >> 12;
        let format = sample_format & 0xFFF;

        if enterprise == 0 && (format == FLOW_SAMPLE_FORMAT || format == EXPANDED_FLOW_SAMPLE_FORMAT)
        {
            match decode_flow_sample(body, exporter_address, observed_at) {
                Ok(sample) => {
                    stats.unsupported_link_type.fetch_add(
                        sample.unsupported_link_type as u64,
                        std::sync::atomic::Ordering::Relaxed,
                    );
                    records.extend(sample.records);
                }
                Err(_) => {
                    stats
                        .decode_errors
                        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                }
            }
        }
        // Counter samples and anything else are skipped entirely: we still
        // know their total length, so we can jump past them.

        offset = body_end;
    }

    stats
        .records_emitted
        .fetch_add(records.len() as u64, std::sync::atomic::Ordering::Relaxed);

    Ok(records)
}

struct FlowSampleOutcome {
    records: Vec<FlowRecord>,
    unsupported_link_type: usize,
}

fn decode_flow_sample(
    body: &[u8],
    exporter_address: IpAddr,
    observed_at: SystemTime,
) -> Result<FlowSampleOutcome, DecodeError> {
    const FLOW_SAMPLE_HEADER_LEN: usize = 8 * 4;
    if body.len() < FLOW_SAMPLE_HEADER_LEN {
        return Err(DecodeError::MalformedSample);
    }
    let sampling_rate = be_u32(body, 8).max(1);
    let num_records = be_u32(body, 28);

    let mut records = Vec::new();
    let mut unsupported_link_type = 0usize;
    let mut offset = FLOW_SAMPLE_HEADER_LEN;

    for _ in 0..num_records {
        if body.len() < offset + 8 {
            break;
        }
        let record_format = be_u32(body, offset);
        let record_length = be_u32(body, offset + 4) as usize;
        let rec_body_start = offset + 8;
        let rec_body_end = rec_body_start.saturating_add(record_length);
        if rec_body_end > body.len() {
            break;
        }
        let rec_body = &body[rec_body_start..rec_body_end];
        let enterprise = record_format >> 12;
        let format = record_format & 0xFFF;

        if enterprise == 0 && format == RAW_PACKET_HEADER_FORMAT {
            match decode_raw_packet_header(rec_body, exporter_address, observed_at, sampling_rate) {
                RawHeaderOutcome::Record(record) => records.push(record),
                RawHeaderOutcome::UnsupportedLinkType => unsupported_link_type += 1,
                RawHeaderOutcome::Incomplete => {}
            }
        }

        offset = rec_body_end;
    }

    Ok(FlowSampleOutcome {
        records,
        unsupported_link_type,
    })
}

enum RawHeaderOutcome {
    Record(FlowRecord),
    /// Header parsed fully but its ethertype was not IPv4 (or VLAN-wrapped
    /// IPv4) — not an error, just nothing to emit.
    UnsupportedLinkType,
    /// Header was too short to read the field that would have decided the
    /// above.
    Incomplete,
}

fn decode_raw_packet_header(
    body: &[u8],
    exporter_address: IpAddr,
    observed_at: SystemTime,
    sampling_rate: u32,
) -> RawHeaderOutcome {
    const RAW_HEADER_PREFIX_LEN: usize = 4 * 4; // header_protocol, frame_length, stripped, header_length
    if body.len() < RAW_HEADER_PREFIX_LEN {
        return RawHeaderOutcome::Incomplete;
    }
    let frame_length = be_u32(body, 4);
    let header_length = be_u32(body, 12) as usize;
    let captured = &body[RAW_HEADER_PREFIX_LEN..];
    let header_length = header_length.min(captured.len());
    let header = &captured[..header_length];

    if header.len() < 14 {
        return RawHeaderOutcome::Incomplete;
    }
    let mut eth_offset = 12;
    let mut ethertype = match be_u16_slice(header, eth_offset) {
        Some(v) => v,
        None => return RawHeaderOutcome::Incomplete,
    };

    if ethertype == ETHERTYPE_VLAN {
        // Skip the 2-byte VLAN id/priority field, then re-read ethertype.
        eth_offset += 4;
        ethertype = match be_u16_slice(header, eth_offset) {
            Some(v) => v,
            None => return RawHeaderOutcome::Incomplete,
        };
    }

    if ethertype != ETHERTYPE_IPV4 {
        return RawHeaderOutcome::UnsupportedLinkType;
    }

    let ip_offset = eth_offset + 2;
    if header.len() < ip_offset + 20 {
        return RawHeaderOutcome::Incomplete;
    }
    let version_ihl = header[ip_offset];
    let ihl_bytes = (version_ihl & 0x0F) as usize * 4;
    if header.len() < ip_offset + ihl_bytes {
        return RawHeaderOutcome::Incomplete;
    }
    let protocol = header[ip_offset + 9];
    let src = Ipv4Addr::new(
        header[ip_offset + 12],
        header[ip_offset + 13],
        header[ip_offset + 14],
        header[ip_offset + 15],
    );
    let dst = Ipv4Addr::new(
        header[ip_offset + 16],
        header[ip_offset + 17],
        header[ip_offset + 18],
        header[ip_offset + 19],
    );

    let transport_offset = ip_offset + ihl_bytes;
    let (src_port, dst_port) = if header.len() >= transport_offset + 4 {
        (
            be_u16_slice(header, transport_offset).unwrap_or(0),
            be_u16_slice(header, transport_offset + 2).unwrap_or(0),
        )
    } else {
        (0, 0)
    };

    RawHeaderOutcome::Record(FlowRecord {
        observed_at,
        exporter_address,
        source_address: IpAddr::V4(src),
        destination_address: IpAddr::V4(dst),
        source_port: src_port,
        destination_port: dst_port,
        ip_protocol: protocol,
        bytes: frame_length as u64 * sampling_rate as u64,
        packets: sampling_rate as u64,
        tcp_flags: 0,
        tos: 0,
        input_interface: 0,
        output_interface: 0,
        next_hop_address: FlowRecord::unspecified_v4(),
        source_as: 0,
        destination_as: 0,
        flow_duration_ms: 0,
        sampling_rate,
    })
}

fn be_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

fn be_u16_slice(buf: &[u8], offset: usize) -> Option<u16> {
    if buf.len() < offset + 2 {
        return None;
    }
    Some(u16::from_be_bytes([buf[offset], buf[offset + 1]]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    fn exporter() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(198, 51, 100, 1))
    }

    fn fixed_clock() -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    fn ipv4_tcp_header(src: Ipv4Addr, dst: Ipv4Addr, sport: u16, dport: u16, protocol: u8) -> Vec<u8> {
        let mut eth = vec![0u8; 14];
        eth[12] = 0x08;
        eth[13] = 0x00;
        let mut ip = vec![0u8; 20];
        ip[0] = 0x45; // version 4, IHL 5
        ip[9] = protocol;
        ip[12..16].copy_from_slice(&src.octets());
        ip[16..20].copy_from_slice(&dst.octets());
        let mut tcp = vec![0u8; 20];
        tcp[0..2].copy_from_slice(&sport.to_be_bytes());
        tcp[2..4].copy_from_slice(&dport.to_be_bytes());
        let mut out = eth;
        out.extend(ip);
        out.extend(tcp);
        out
    }

    fn raw_header_record_body(header_bytes: &[u8], frame_length: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1u32.to_be_bytes()); // header_protocol = ethernet
        buf.extend_from_slice(&frame_length.to_be_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes()); // stripped
        buf.extend_from_slice(&(header_bytes.len() as u32).to_be_bytes());
        buf.extend_from_slice(header_bytes);
        buf
    }

    fn flow_sample_body(sampling_rate: u32, records: &[Vec<u8>]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0u32.to_be_bytes()); // sequence
        buf.extend_from_slice(&0u32.to_be_bytes()); // source_id
        buf.extend_from_slice(&sampling_rate.to_be_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes()); // sample_pool
        buf.extend_from_slice(&0u32.to_be_bytes()); // drops
        buf.extend_from_slice(&0u32.to_be_bytes()); // input_if
        buf.extend_from_slice(&0u32.to_be_bytes()); // output_if
        buf.extend_from_slice(&(records.len() as u32).to_be_bytes());
        for rec in records {
            buf.extend_from_slice(&1u32.to_be_bytes()); // record_format: raw header
            buf.extend_from_slice(&(rec.len() as u32).to_be_bytes());
            buf.extend_from_slice(rec);
        }
        buf
    }

    fn datagram(samples: &[(u32, Vec<u8>)]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&5u32.to_be_bytes()); // version
        buf.extend_from_slice(&1u32.to_be_bytes()); // address_type = IPv4
        buf.extend_from_slice(&Ipv4Addr::new(10, 0, 0, 1).octets());
        buf.extend_from_slice(&0u32.to_be_bytes()); // sub_agent_id
        buf.extend_from_slice(&0u32.to_be_bytes()); // sequence_number
        buf.extend_from_slice(&0u32.to_be_bytes()); // uptime_ms
        buf.extend_from_slice(&(samples.len() as u32).to_be_bytes());
        for (format, body) in samples {
            buf.extend_from_slice(&format.to_be_bytes());
            buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
            buf.extend_from_slice(body);
        }
        buf
    }

    #[test]
    fn scenario_4_raw_header_ipv4_tcp_sample() {
        let header = ipv4_tcp_header(
            Ipv4Addr::new(1, 2, 3, 4),
            Ipv4Addr::new(5, 6, 7, 8),
            80,
            12345,
            6,
        );
        let record = raw_header_record_body(&header, 1000);
        let sample = flow_sample_body(512, &[record]);
        let pkt = datagram(&[(1u32, sample)]); // enterprise 0, format 1 = flow sample

        let stats = ParserStats::default();
        let records = decode(&pkt, exporter(), fixed_clock(), &stats).expect("should decode");

        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.source_address, IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)));
        assert_eq!(r.destination_address, IpAddr::V4(Ipv4Addr::new(5, 6, 7, 8)));
        assert_eq!(r.source_port, 80);
        assert_eq!(r.destination_port, 12345);
        assert_eq!(r.ip_protocol, 6);
        assert_eq!(r.packets, 512);
        assert_eq!(r.bytes, 512_000);
        assert_eq!(r.sampling_rate, 512);
        assert_eq!(r.observed_at, fixed_clock());
    }

    #[test]
    fn non_ipv4_ethertype_yields_no_record_and_no_error() {
        let mut header = vec![0u8; 14];
        header[12] = 0x86;
        header[13] = 0xDD; // IPv6 ethertype
        let record = raw_header_record_body(&header, 100);
        let sample = flow_sample_body(1, &[record]);
        let pkt = datagram(&[(1u32, sample)]);

        let stats = ParserStats::default();
        let records = decode(&pkt, exporter(), fixed_clock(), &stats).expect("should decode");
        assert!(records.is_empty());
        assert_eq!(stats.snapshot().decode_errors, 0);
        assert_eq!(stats.snapshot().unsupported_link_type, 1);
    }

    #[test]
    fn vlan_tagged_ipv4_is_unwrapped() {
        let mut header = vec![0u8; 18];
        header[12] = 0x81;
        header[13] = 0x00; // VLAN tag
        header[14] = 0x00;
        header[15] = 0x64; // vlan id 100
        header[16] = 0x08;
        header[17] = 0x00; // inner ethertype IPv4
        let mut ip = vec![0u8; 20];
        ip[0] = 0x45;
        ip[9] = 17;
        ip[12..16].copy_from_slice(&Ipv4Addr::new(9, 9, 9, 9).octets());
        ip[16..20].copy_from_slice(&Ipv4Addr::new(8, 8, 8, 8).octets());
        header.extend(ip);

        let record = raw_header_record_body(&header, 64);
        let sample = flow_sample_body(1, &[record]);
        let pkt = datagram(&[(1u32, sample)]);

        let stats = ParserStats::default();
        let records = decode(&pkt, exporter(), fixed_clock(), &stats).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].ip_protocol, 17);
        assert_eq!(records[0].source_address, IpAddr::V4(Ipv4Addr::new(9, 9, 9, 9)));
    }

    #[test]
    fn truncated_sample_is_skipped_others_still_decoded() {
        let header = ipv4_tcp_header(
            Ipv4Addr::new(1, 1, 1, 1),
            Ipv4Addr::new(2, 2, 2, 2),
            1,
            2,
            6,
        );
        let good_record = raw_header_record_body(&header, 100);
        let good_sample = flow_sample_body(1, &[good_record]);

        let mut pkt = datagram(&[(1u32, good_sample.clone())]);
        // Append a second sample whose declared length runs past the buffer.
        pkt.extend_from_slice(&1u32.to_be_bytes());
        pkt.extend_from_slice(&9999u32.to_be_bytes());
        pkt.extend_from_slice(&[0u8; 4]);

        let stats = ParserStats::default();
        let records = decode(&pkt, exporter(), fixed_clock(), &stats).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(stats.snapshot().decode_errors, 1);
    }

    #[test]
    fn malformed_flow_sample_body_counts_as_decode_error() {
        // sample_length too short to contain the flow sample's own fixed header.
        let sample = vec![0u8; 4];
        let pkt = datagram(&[(1u32, sample)]);
        let stats = ParserStats::default();
        let records = decode(&pkt, exporter(), fixed_clock(), &stats).unwrap();
        assert!(records.is_empty());
        assert_eq!(stats.snapshot().decode_errors, 1);
    }

    #[test]
    fn expanded_flow_sample_format_is_also_decoded() {
        let header = ipv4_tcp_header(
            Ipv4Addr::new(4, 4, 4, 4),
            Ipv4Addr::new(3, 3, 3, 3),
            53,
            5353,
            17,
        );
        let record = raw_header_record_body(&header, 200);
        let sample = flow_sample_body(10, &[record]);
        let pkt = datagram(&[(3u32, sample)]); // format 3 = expanded flow sample

        let stats = ParserStats::default();
        let records = decode(&pkt, exporter(), fixed_clock(), &stats).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sampling_rate, 10);
    }

    #[test]
    fn unsupported_version_fails_whole_datagram() {
        let mut pkt = datagram(&[]);
        pkt[3] = 9; // version = 9
        let stats = ParserStats::default();
        let err = decode(&pkt, exporter(), fixed_clock(), &stats).unwrap_err();
        assert_eq!(err, DecodeError::UnsupportedVersion);
    }

    #[test]
    fn truncated_datagram_header_is_short_packet() {
        let pkt = vec![0u8, 0, 0, 5, 0, 0, 0, 1];
        let stats = ParserStats::default();
        let err = decode(&pkt, exporter(), fixed_clock(), &stats).unwrap_err();
        assert_eq!(err, DecodeError::ShortPacket);
    }

    #[test]
    fn zero_samples_yields_empty_list() {
        let pkt = datagram(&[]);
        let stats = ParserStats::default();
        let records = decode(&pkt, exporter(), fixed_clock(), &stats).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn counter_sample_is_skipped_by_length_without_error() {
        let counter_body = vec![0u8; 16];
        let pkt = datagram(&[(2u32, counter_body)]); // format 2 = counters sample
        let stats = ParserStats::default();
        let records = decode(&pkt, exporter(), fixed_clock(), &stats).unwrap();
        assert!(records.is_empty());
        assert_eq!(stats.snapshot().decode_errors, 0);
    }
}
