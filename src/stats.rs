//! Process-wide monotonic counters: per-protocol decode counters and a
//! shared pipeline-wide set.
//!
//! Generalizes the teacher's single `static FLOWS_RECEIVED: AtomicU64`
//! (`netflow.rs`) into a struct of named atomics, one pair per decoder plus
//! one shared pipeline-wide set. All fields use `Ordering::Relaxed` — these
//! are independent counters, not synchronization points.

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-protocol decoder counters. One instance per protocol (NetFlow v5,
/// sFlow v5), never reset except at process restart.
#[derive(Debug, Default)]
pub struct ParserStats {
    pub packets_received: AtomicU64,
    pub records_emitted: AtomicU64,
    pub decode_errors: AtomicU64,
    /// Non-error, non-fatal: a raw-header sample whose ethertype wasn't
    /// IPv4 or VLAN-tagged IPv4.
    pub unsupported_link_type: AtomicU64,
}

impl ParserStats {
    pub fn snapshot(&self) -> ParserStatsSnapshot {
        ParserStatsSnapshot {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            records_emitted: self.records_emitted.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            unsupported_link_type: self.unsupported_link_type.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ParserStatsSnapshot {
    pub packets_received: u64,
    pub records_emitted: u64,
    pub decode_errors: u64,
    pub unsupported_link_type: u64,
}

/// Process-wide pipeline counters spanning all protocols.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub datagrams_received: AtomicU64,
    pub records_buffered: AtomicU64,
    pub records_dropped_overflow: AtomicU64,
    pub batches_written_ok: AtomicU64,
    pub batches_written_failed: AtomicU64,
    pub records_written_ok: AtomicU64,
}

impl PipelineStats {
    pub fn snapshot(&self, queue_depth: usize) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            records_buffered: self.records_buffered.load(Ordering::Relaxed),
            records_dropped_overflow: self.records_dropped_overflow.load(Ordering::Relaxed),
            batches_written_ok: self.batches_written_ok.load(Ordering::Relaxed),
            batches_written_failed: self.batches_written_failed.load(Ordering::Relaxed),
            records_written_ok: self.records_written_ok.load(Ordering::Relaxed),
            queue_depth,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineStatsSnapshot {
    pub datagrams_received: u64,
    pub records_buffered: u64,
    pub records_dropped_overflow: u64,
    pub batches_written_ok: u64,
    pub batches_written_failed: u64,
    pub records_written_ok: u64,
    pub queue_depth: usize,
}
