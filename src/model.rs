//! The normalized flow record produced by every decoder and consumed by the
//! batch writer. See `decode::netflow_v5` and `decode::sflow_v5` for the
//! producers; `writer` for the consumer.

use std::net::{IpAddr, Ipv4Addr};
use std::time::SystemTime;

/// Which wire protocol produced a `FlowRecord`, used for per-protocol stats
/// and log tagging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    NetflowV5,
    SflowV5,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::NetflowV5 => "netflow_v5",
            Protocol::SflowV5 => "sflow_v5",
        }
    }
}

/// A single decoded, normalized flow observation.
///
/// Immutable once constructed. `bytes`/`packets` are already scaled by
/// `sampling_rate` (see each decoder's scaling rule); `sampling_rate` itself
/// is retained so the writer can record the multiplier that was applied.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowRecord {
    pub observed_at: SystemTime,
    pub exporter_address: IpAddr,
    pub source_address: IpAddr,
    pub destination_address: IpAddr,
    pub source_port: u16,
    pub destination_port: u16,
    pub ip_protocol: u8,
    pub bytes: u64,
    pub packets: u64,
    pub tcp_flags: u8,
    pub tos: u8,
    pub input_interface: u32,
    pub output_interface: u32,
    pub next_hop_address: IpAddr,
    pub source_as: u32,
    pub destination_as: u32,
    pub flow_duration_ms: u32,
    pub sampling_rate: u32,
}

impl FlowRecord {
    /// `next_hop_address`/AS numbers are meaningless outside NetFlow; this is
    /// the shared zero value decoders fall back to.
    pub fn unspecified_v4() -> IpAddr {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    }
}
