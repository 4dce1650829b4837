//! UDP receiver worker pool: one bound socket per protocol, shared by
//! `worker_count` tokio tasks that all call `recv_from` concurrently.
//!
//! The bind-then-fan-out shape and the `tokio::time::timeout`-driven poll
//! loop come from the teacher's `start_collector`. OS receive-buffer sizing
//! via `socket2` is grounded on the shred-ingest receiver in the example
//! pack, scaled down from its privileged `SO_RCVBUFFORCE` to the portable
//! `SO_RCVBUF` since this process does not run as root.

use std::net::SocketAddr;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use socket2::{Domain, Socket, Type};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::buffer::{BoundedBuffer, EnqueueOutcome};
use crate::decode::{netflow_v5, sflow_v5};
use crate::model::Protocol;
use crate::stats::{ParserStats, PipelineStats};

/// Datagrams up to this size are read in a single `recv_from`; larger ones
/// are truncated by the kernel, matching the external contract.
const READ_BUFFER_LEN: usize = 9000;

#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    pub listen_endpoint: SocketAddr,
    pub worker_count: usize,
    pub os_receive_buffer_bytes: usize,
    pub receive_poll_interval: Duration,
}

impl ReceiverConfig {
    pub fn new(listen_endpoint: SocketAddr) -> Self {
        ReceiverConfig {
            listen_endpoint,
            worker_count: 1,
            os_receive_buffer_bytes: 25 * 1024 * 1024,
            receive_poll_interval: Duration::from_secs(1),
        }
    }
}

/// Binds `config.listen_endpoint` once and spawns `config.worker_count`
/// tasks sharing the socket. Returns their join handles so the lifecycle
/// coordinator can await clean shutdown.
pub fn spawn(
    protocol: Protocol,
    config: ReceiverConfig,
    buffer: Arc<BoundedBuffer>,
    parser_stats: Arc<ParserStats>,
    pipeline_stats: Arc<PipelineStats>,
    cancel: CancellationToken,
) -> anyhow::Result<(SocketAddr, Vec<JoinHandle<()>>)> {
    let socket = Arc::new(bind_socket(config.listen_endpoint, config.os_receive_buffer_bytes)?);
    let bound_addr = socket.local_addr()?;

    let mut handles = Vec::with_capacity(config.worker_count);
    for worker_id in 0..config.worker_count {
        let socket = socket.clone();
        let buffer = buffer.clone();
        let parser_stats = parser_stats.clone();
        let pipeline_stats = pipeline_stats.clone();
        let cancel = cancel.clone();
        let poll_interval = config.receive_poll_interval;
        handles.push(tokio::spawn(async move {
            run_worker(
                protocol,
                worker_id,
                socket,
                poll_interval,
                buffer,
                parser_stats,
                pipeline_stats,
                cancel,
            )
            .await;
        }));
    }
    Ok((bound_addr, handles))
}

fn bind_socket(addr: SocketAddr, recv_buffer_bytes: usize) -> anyhow::Result<UdpSocket> {
    let domain = Domain::for_address(addr);
    let socket = Socket::new(domain, Type::DGRAM, Some(socket2::Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    if let Err(e) = socket.set_recv_buffer_size(recv_buffer_bytes) {
        warn!(component = "receiver", error = %e, "failed to set OS receive buffer size, continuing with default");
    }
    socket.bind(&addr.into())?;
    socket.set_nonblocking(true)?;
    Ok(UdpSocket::from_std(socket.into())?)
}

#[allow(clippy::too_many_arguments)]
async fn run_worker(
    protocol: Protocol,
    worker_id: usize,
    socket: Arc<UdpSocket>,
    poll_interval: Duration,
    buffer: Arc<BoundedBuffer>,
    parser_stats: Arc<ParserStats>,
    pipeline_stats: Arc<PipelineStats>,
    cancel: CancellationToken,
) {
    let mut read_buf = vec![0u8; READ_BUFFER_LEN];

    loop {
        if cancel.is_cancelled() {
            debug!(component = protocol.as_str(), worker_id, "receiver worker stopping");
            return;
        }

        match tokio::time::timeout(poll_interval, socket.recv_from(&mut read_buf)).await {
            Ok(Ok((len, peer))) => {
                pipeline_stats.datagrams_received.fetch_add(1, Relaxed);
                handle_datagram(
                    protocol,
                    &read_buf[..len],
                    peer.ip(),
                    &buffer,
                    &parser_stats,
                    &pipeline_stats,
                );
            }
            Ok(Err(e)) => {
                warn!(component = protocol.as_str(), worker_id, error = %e, "UDP receive error");
            }
            Err(_) => {
                // Timed out with no datagram — expected, loop back around to
                // re-check cancellation.
            }
        }
    }
}

fn handle_datagram(
    protocol: Protocol,
    payload: &[u8],
    exporter_address: std::net::IpAddr,
    buffer: &BoundedBuffer,
    parser_stats: &ParserStats,
    pipeline_stats: &PipelineStats,
) {
    let decoded = match protocol {
        Protocol::NetflowV5 => netflow_v5::decode(payload, exporter_address, parser_stats),
        Protocol::SflowV5 => {
            sflow_v5::decode(payload, exporter_address, SystemTime::now(), parser_stats)
        }
    };

    match decoded {
        Ok(records) => {
            for record in records {
                match buffer.try_enqueue(record) {
                    EnqueueOutcome::Enqueued => {
                        pipeline_stats.records_buffered.fetch_add(1, Relaxed);
                    }
                    EnqueueOutcome::Full => {
                        pipeline_stats.records_dropped_overflow.fetch_add(1, Relaxed);
                    }
                }
            }
        }
        Err(e) => {
            parser_stats.decode_errors.fetch_add(1, Relaxed);
            debug!(
                component = protocol.as_str(),
                error = %e,
                exporter = %exporter_address,
                "dropping malformed datagram"
            );
        }
    }
}
