//! Binary wire-protocol decoders. Each decoder is a pure function of
//! `(payload, exporter_address)` — no shared state, no I/O, safe to call
//! concurrently from any number of receiver workers.

pub mod netflow_v5;
pub mod sflow_v5;

use std::fmt;

/// Non-fatal decode failure. The offending datagram (NetFlow) or sub-sample
/// (sFlow) is dropped; the caller counts it in `ParserStats::decode_errors`
/// and moves on. Never panics, never aborts the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Payload too short to contain a complete header (or, for sFlow, a
    /// complete sample/record TLV header).
    ShortPacket,
    /// The version field identified a protocol version this decoder does
    /// not implement (NetFlow v9/IPFIX are explicitly out of scope).
    UnsupportedVersion,
    /// The header declared a record count whose implied length exceeds the
    /// payload actually received.
    SizeMismatch,
    /// An sFlow sample or flow record was internally inconsistent (a
    /// declared length ran past the enclosing buffer). Only ever returned
    /// for sFlow; the enclosing datagram's other samples are unaffected.
    MalformedSample,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            DecodeError::ShortPacket => "payload shorter than the minimum required header",
            DecodeError::UnsupportedVersion => "unsupported protocol version",
            DecodeError::SizeMismatch => "declared record count exceeds payload length",
            DecodeError::MalformedSample => "sample or flow record length ran past its buffer",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for DecodeError {}
