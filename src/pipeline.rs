//! Lifecycle coordinator: `created -> running -> draining -> stopped`.
//!
//! Spawns the writer first, then every enabled receiver pool, then the
//! stats ticker — mirroring the order the teacher's `main.rs` spawns its
//! background tasks (each gated by a config flag, each logging when
//! skipped). `CancellationToken` fans shutdown out to every task; the
//! teacher never needed this because its tasks ran for the process
//! lifetime, so it is grounded on the `tokio-util` dependency carried by
//! the pack's vector-derived example instead.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::buffer::BoundedBuffer;
use crate::config::AppConfig;
use crate::db;
use crate::model::Protocol;
use crate::receiver::{self, ReceiverConfig};
use crate::stats::{ParserStats, PipelineStats};
use crate::writer::{self, WriterConfig};

/// Runs the full ingest pipeline until a shutdown signal arrives, then
/// drains and exits. Returns once every task has stopped.
pub async fn run(config: AppConfig) -> Result<()> {
    let pool = db::init(&config.database)
        .await
        .context("failed to connect to database")?;

    let buffer = Arc::new(BoundedBuffer::new(config.buffer_size));
    let pipeline_stats = Arc::new(PipelineStats::default());
    let netflow_stats = Arc::new(ParserStats::default());
    let sflow_stats = Arc::new(ParserStats::default());
    let cancel = CancellationToken::new();

    let writer_config = WriterConfig::new(
        config.buffer_size,
        Duration::from_secs(config.flush_interval_seconds),
    );
    let writer_handle: JoinHandle<()> = tokio::spawn(writer::run(
        pool.clone(),
        buffer.clone(),
        writer_config,
        pipeline_stats.clone(),
        cancel.clone(),
    ));
    info!(component = "pipeline", "writer started");

    let mut receiver_handles = Vec::new();

    if config.netflow.enabled {
        let addr: SocketAddr = config
            .netflow
            .listen
            .parse()
            .context("invalid netflow.listen address")?;
        let receiver_config = ReceiverConfig {
            listen_endpoint: addr,
            worker_count: config.netflow.workers,
            os_receive_buffer_bytes: config.os_receive_buffer_bytes,
            receive_poll_interval: Duration::from_secs(1),
        };
        let (bound_addr, handles) = receiver::spawn(
            Protocol::NetflowV5,
            receiver_config,
            buffer.clone(),
            netflow_stats.clone(),
            pipeline_stats.clone(),
            cancel.clone(),
        )?;
        receiver_handles.extend(handles);
        info!(component = "pipeline", listen = %bound_addr, workers = config.netflow.workers, "netflow receiver started");
    } else {
        info!(component = "pipeline", "netflow receiver disabled");
    }

    if config.sflow.enabled {
        let addr: SocketAddr = config
            .sflow
            .listen
            .parse()
            .context("invalid sflow.listen address")?;
        let receiver_config = ReceiverConfig {
            listen_endpoint: addr,
            worker_count: config.sflow.workers,
            os_receive_buffer_bytes: config.os_receive_buffer_bytes,
            receive_poll_interval: Duration::from_secs(1),
        };
        let (bound_addr, handles) = receiver::spawn(
            Protocol::SflowV5,
            receiver_config,
            buffer.clone(),
            sflow_stats.clone(),
            pipeline_stats.clone(),
            cancel.clone(),
        )?;
        receiver_handles.extend(handles);
        info!(component = "pipeline", listen = %bound_addr, workers = config.sflow.workers, "sflow receiver started");
    } else {
        info!(component = "pipeline", "sflow receiver disabled");
    }

    let stats_handle = tokio::spawn(run_stats_ticker(
        Duration::from_secs(config.stats_interval_seconds),
        buffer.clone(),
        pipeline_stats.clone(),
        netflow_stats.clone(),
        sflow_stats.clone(),
        cancel.clone(),
    ));

    wait_for_shutdown_signal().await;
    info!(component = "pipeline", "shutdown signal received, draining");
    cancel.cancel();

    for handle in receiver_handles {
        let _ = handle.await;
    }
    buffer.close();
    let _ = writer_handle.await;
    let _ = stats_handle.await;

    pool.close().await;
    info!(component = "pipeline", "stopped");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_stats_ticker(
    interval: Duration,
    buffer: Arc<BoundedBuffer>,
    pipeline_stats: Arc<PipelineStats>,
    netflow_stats: Arc<ParserStats>,
    sflow_stats: Arc<ParserStats>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let pipeline = pipeline_stats.snapshot(buffer.len());
                let netflow = netflow_stats.snapshot();
                let sflow = sflow_stats.snapshot();
                info!(
                    component = "stats",
                    datagrams_received = pipeline.datagrams_received,
                    records_buffered = pipeline.records_buffered,
                    records_dropped_overflow = pipeline.records_dropped_overflow,
                    batches_written_ok = pipeline.batches_written_ok,
                    batches_written_failed = pipeline.batches_written_failed,
                    records_written_ok = pipeline.records_written_ok,
                    queue_depth = pipeline.queue_depth,
                    netflow_packets_received = netflow.packets_received,
                    netflow_decode_errors = netflow.decode_errors,
                    sflow_packets_received = sflow.packets_received,
                    sflow_decode_errors = sflow.decode_errors,
                    sflow_unsupported_link_type = sflow.unsupported_link_type,
                    "pipeline statistics"
                );
            }
            _ = cancel.cancelled() => {
                return;
            }
        }
    }
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl_c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
