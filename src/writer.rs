//! Batch writer: drains the bounded buffer, coalesces records into
//! batches, and bulk-inserts them with a single `COPY FROM STDIN` per
//! flush. Flushes are triggered by batch size, a time ticker, or shutdown.
//!
//! The teacher flushes per-device aggregates on its own 60s ticker inside
//! the same task that reads the socket (`start_collector`); here the
//! writer is split into its own task reading from the shared buffer, since
//! the buffer — not the writer — is the synchronization point between
//! receivers and persistence.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::buffer::{BoundedBuffer, DequeueOutcome};
use crate::model::FlowRecord;
use crate::stats::PipelineStats;

const COPY_SQL: &str = "COPY flow_records \
    (time, exporter_ip, source_ip, destination_ip, source_port, destination_port, \
     protocol, bytes, packets, tcp_flags, tos, input_interface, output_interface, \
     next_hop_ip, source_as, destination_as, flow_duration_ms, sampling_rate) \
    FROM STDIN WITH (FORMAT csv)";

#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub shutdown_flush_timeout: Duration,
}

impl WriterConfig {
    pub fn new(batch_size: usize, flush_interval: Duration) -> Self {
        WriterConfig {
            batch_size,
            flush_interval,
            shutdown_flush_timeout: Duration::from_secs(10),
        }
    }
}

/// Destination a batch is flushed to. `PgPool` is the only production
/// implementation (bulk-COPY below); tests implement this directly so the
/// flush/drain control flow can be exercised without a live Postgres
/// connection.
pub trait BatchSink: Send + Sync {
    fn write_batch<'a>(
        &'a self,
        csv: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), sqlx::Error>> + Send + 'a>>;
}

impl BatchSink for PgPool {
    fn write_batch<'a>(
        &'a self,
        csv: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), sqlx::Error>> + Send + 'a>> {
        Box::pin(async move {
            let mut conn = self.acquire().await?;
            let mut copy_in = conn.copy_in_raw(COPY_SQL).await?;
            copy_in.send(csv.as_bytes()).await?;
            copy_in.finish().await?;
            Ok(())
        })
    }
}

/// Runs until `cancel` fires, then performs a time-bounded final drain and
/// flush before returning.
pub async fn run(
    pool: PgPool,
    buffer: Arc<BoundedBuffer>,
    config: WriterConfig,
    pipeline_stats: Arc<PipelineStats>,
    cancel: CancellationToken,
) {
    let mut batch: Vec<FlowRecord> = Vec::with_capacity(config.batch_size);
    let mut ticker = tokio::time::interval(config.flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // First tick fires immediately; skip it so we don't flush an empty batch.
    ticker.tick().await;

    loop {
        tokio::select! {
            outcome = buffer.dequeue(Duration::from_secs(3600)) => {
                match outcome {
                    DequeueOutcome::Record(record) => {
                        batch.push(record);
                        if batch.len() >= config.batch_size {
                            flush(&pool, &mut batch, &pipeline_stats).await;
                        }
                    }
                    DequeueOutcome::Empty | DequeueOutcome::Cancelled => {}
                }
            }
            _ = ticker.tick() => {
                flush(&pool, &mut batch, &pipeline_stats).await;
            }
            _ = cancel.cancelled() => {
                break;
            }
        }
    }

    drain_and_flush(&pool, &buffer, &mut batch, &config, &pipeline_stats).await;
    info!(component = "writer", "stopped after final flush");
}

async fn drain_and_flush(
    sink: &dyn BatchSink,
    buffer: &BoundedBuffer,
    batch: &mut Vec<FlowRecord>,
    config: &WriterConfig,
    pipeline_stats: &PipelineStats,
) {
    let deadline = Instant::now() + config.shutdown_flush_timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match buffer.dequeue(remaining.min(Duration::from_millis(200))).await {
            DequeueOutcome::Record(record) => {
                batch.push(record);
                if batch.len() >= config.batch_size {
                    flush(sink, batch, pipeline_stats).await;
                }
            }
            DequeueOutcome::Empty | DequeueOutcome::Cancelled => break,
        }
    }
    flush(sink, batch, pipeline_stats).await;
}

async fn flush(sink: &dyn BatchSink, batch: &mut Vec<FlowRecord>, pipeline_stats: &PipelineStats) {
    if batch.is_empty() {
        return;
    }
    let count = batch.len();
    let csv = encode_batch_csv(batch);

    match sink.write_batch(&csv).await {
        Ok(()) => {
            pipeline_stats.batches_written_ok.fetch_add(1, Relaxed);
            pipeline_stats.records_written_ok.fetch_add(count as u64, Relaxed);
        }
        Err(e) => {
            pipeline_stats.batches_written_failed.fetch_add(1, Relaxed);
            error!(component = "writer", error = %e, count, "batch insert failed, dropping batch");
        }
    }
    batch.clear();
}

/// Encode the exact column contract, in order, as CSV. Addresses use their
/// `Display` text form, which Postgres's `inet` input accepts directly.
pub fn encode_batch_csv(batch: &[FlowRecord]) -> String {
    let mut out = String::new();
    for record in batch {
        let time: DateTime<Utc> = record.observed_at.into();
        out.push_str(&format!(
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}\n",
            time.to_rfc3339(),
            record.exporter_address,
            record.source_address,
            record.destination_address,
            record.source_port,
            record.destination_port,
            record.ip_protocol,
            record.bytes,
            record.packets,
            record.tcp_flags,
            record.tos,
            record.input_interface,
            record.output_interface,
            record.next_hop_address,
            record.source_as,
            record.destination_as,
            record.flow_duration_ms,
            record.sampling_rate,
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::SystemTime;

    fn sample_record() -> FlowRecord {
        FlowRecord {
            observed_at: SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000),
            exporter_address: IpAddr::V4(Ipv4Addr::new(203, 0, 113, 1)),
            source_address: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)),
            destination_address: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 50)),
            source_port: 443,
            destination_port: 54321,
            ip_protocol: 6,
            bytes: 150_000,
            packets: 100,
            tcp_flags: 0,
            tos: 0,
            input_interface: 0,
            output_interface: 0,
            next_hop_address: FlowRecord::unspecified_v4(),
            source_as: 0,
            destination_as: 0,
            flow_duration_ms: 0,
            sampling_rate: 1,
        }
    }

    #[test]
    fn csv_encoding_has_expected_column_count_and_order() {
        let csv = encode_batch_csv(&[sample_record()]);
        let line = csv.trim_end();
        let fields: Vec<&str> = line.split(',').collect();
        assert_eq!(fields.len(), 18);
        assert_eq!(fields[1], "203.0.113.1");
        assert_eq!(fields[2], "192.168.1.10");
        assert_eq!(fields[3], "10.0.0.50");
        assert_eq!(fields[4], "443");
        assert_eq!(fields[5], "54321");
        assert_eq!(fields[6], "6");
        assert_eq!(fields[7], "150000");
        assert_eq!(fields[8], "100");
    }

    #[test]
    fn empty_batch_encodes_to_empty_string() {
        let csv = encode_batch_csv(&[]);
        assert!(csv.is_empty());
    }

    /// Captures every batch it's handed instead of talking to a database,
    /// so `drain_and_flush`'s control flow can be exercised on its own.
    #[derive(Default)]
    struct FakeSink {
        writes: std::sync::Mutex<Vec<String>>,
    }

    impl BatchSink for FakeSink {
        fn write_batch<'a>(
            &'a self,
            csv: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<(), sqlx::Error>> + Send + 'a>> {
            Box::pin(async move {
                self.writes.lock().unwrap().push(csv.to_string());
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn scenario_6_shutdown_flushes_exactly_the_remaining_records() {
        use crate::buffer::EnqueueOutcome;

        let buffer = BoundedBuffer::new(1000);
        for _ in 0..500 {
            assert_eq!(buffer.try_enqueue(sample_record()), EnqueueOutcome::Enqueued);
        }
        buffer.close();

        let sink = FakeSink::default();
        let pipeline_stats = PipelineStats::default();
        let config = WriterConfig::new(1000, Duration::from_secs(5));
        let mut batch = Vec::new();

        drain_and_flush(&sink, &buffer, &mut batch, &config, &pipeline_stats).await;

        let writes = sink.writes.lock().unwrap();
        assert_eq!(writes.len(), 1, "expected exactly one flush for the final batch");
        assert_eq!(writes[0].lines().count(), 500);
        drop(writes);

        assert_eq!(pipeline_stats.records_written_ok.load(Relaxed), 500);
        assert_eq!(pipeline_stats.batches_written_ok.load(Relaxed), 1);
        assert_eq!(pipeline_stats.records_dropped_overflow.load(Relaxed), 0);
        assert!(batch.is_empty());
    }
}
