//! Bounded, multi-producer/single-consumer queue between receiver workers
//! and the batch writer. Backed by `tokio::sync::mpsc`'s bounded channel;
//! `try_enqueue` never blocks and reports `Full` instead of waiting, which
//! is the receiver's sole back-pressure signal.
//!
//! The drop-on-full contract is grounded on the teacher pack's
//! `crossbeam_channel`-based shred receiver, which treats
//! `tx.try_send(..).is_err()` as "increment the drop counter and move on"
//! rather than retrying or blocking. Here that idiom is carried over to
//! tokio's async mpsc.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};

use crate::model::FlowRecord;

#[derive(Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    Full,
}

#[derive(PartialEq)]
pub enum DequeueOutcome {
    Record(FlowRecord),
    Empty,
    Cancelled,
}

pub struct BoundedBuffer {
    tx: mpsc::Sender<FlowRecord>,
    rx: Mutex<mpsc::Receiver<FlowRecord>>,
    len: AtomicUsize,
    closed: AtomicBool,
}

impl BoundedBuffer {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        BoundedBuffer {
            tx,
            rx: Mutex::new(rx),
            len: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Never blocks. Returns `Full` once the channel is at capacity or the
    /// buffer has been closed.
    pub fn try_enqueue(&self, record: FlowRecord) -> EnqueueOutcome {
        if self.closed.load(Ordering::Relaxed) {
            return EnqueueOutcome::Full;
        }
        match self.tx.try_send(record) {
            Ok(()) => {
                self.len.fetch_add(1, Ordering::Relaxed);
                EnqueueOutcome::Enqueued
            }
            Err(_) => EnqueueOutcome::Full,
        }
    }

    /// Waits up to `timeout` for a record. Once closed, drains whatever
    /// remains before reporting `Cancelled` on every subsequent call.
    pub async fn dequeue(&self, timeout: Duration) -> DequeueOutcome {
        let mut rx = self.rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(record)) => {
                self.len.fetch_sub(1, Ordering::Relaxed);
                DequeueOutcome::Record(record)
            }
            Ok(None) => DequeueOutcome::Cancelled,
            Err(_) => {
                if self.closed.load(Ordering::Relaxed) {
                    DequeueOutcome::Cancelled
                } else {
                    DequeueOutcome::Empty
                }
            }
        }
    }

    /// After this call, `try_enqueue` always returns `Full`. Items already
    /// queued remain dequeueable until drained.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}


impl std::fmt::Debug for DequeueOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DequeueOutcome::Record(_) => write!(f, "Record(..)"),
            DequeueOutcome::Empty => write!(f, "Empty"),
            DequeueOutcome::Cancelled => write!(f, "Cancelled"),
        }
    }
}
