// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded in-memory batching between listeners and the forwarder.
//!
//! The buffer lives behind a plain mutex that is only held while messages are
//! appended, evicted or taken as a batch. Batches are dispatched outside the
//! lock on one of [`MAX_CONCURRENT_FLUSHES`] slots. The slot is claimed
//! while the batch is taken, so batches are handed off in the order they
//! were formed. When every slot is busy the flushing caller forwards the
//! batch itself and is held up until the forward returns.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::constants::MAX_CONCURRENT_FLUSHES;
use crate::errors::ForwardError;
use crate::forwarder::BatchForwarder;
use crate::message::{Batch, NormalizedMessage};

/// Destination of normalized messages produced by the listeners.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn push(&self, message: NormalizedMessage);
}

#[derive(Debug, Clone, Copy)]
pub struct BatchQueueConfig {
    /// Buffer capacity. Reaching it evicts the oldest tenth of the buffer.
    pub max_size: usize,
    /// Buffer length that triggers a flush from `push`.
    pub flush_size: usize,
    pub flush_interval: Duration,
}

/// Point-in-time copy of the queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub evicted_messages: u64,
    pub dispatched_batches: u64,
    pub inline_batches: u64,
    pub dropped_batches: u64,
}

#[derive(Debug, Default)]
struct Counters {
    evicted_messages: AtomicU64,
    dispatched_batches: AtomicU64,
    inline_batches: AtomicU64,
    dropped_batches: AtomicU64,
}

/// A batch taken from the buffer together with the flush slot, if any, that
/// was free at that moment.
struct PendingBatch {
    batch: Batch,
    slot: Option<OwnedSemaphorePermit>,
}

pub struct BatchQueue {
    config: BatchQueueConfig,
    buffer: Mutex<VecDeque<NormalizedMessage>>,
    forwarder: Arc<dyn BatchForwarder>,
    flush_slots: Arc<Semaphore>,
    counters: Arc<Counters>,
    cancel_token: CancellationToken,
    stop_token: CancellationToken,
}

impl BatchQueue {
    /// Creates a queue that hands its batches to `forwarder`.
    ///
    /// `cancel_token` is the process-wide shutdown signal. It ends [`run`]
    /// and is passed down to every forward so retry waits can be abandoned.
    ///
    /// [`run`]: BatchQueue::run
    #[must_use]
    pub fn new(
        config: BatchQueueConfig,
        forwarder: Arc<dyn BatchForwarder>,
        cancel_token: CancellationToken,
    ) -> Self {
        BatchQueue {
            buffer: Mutex::new(VecDeque::with_capacity(
                config.flush_size.min(config.max_size),
            )),
            config,
            forwarder,
            flush_slots: Arc::new(Semaphore::new(MAX_CONCURRENT_FLUSHES)),
            counters: Arc::new(Counters::default()),
            cancel_token,
            stop_token: CancellationToken::new(),
        }
    }

    /// Number of buffered messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_buffer().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock_buffer().is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            evicted_messages: self.counters.evicted_messages.load(Ordering::Relaxed),
            dispatched_batches: self.counters.dispatched_batches.load(Ordering::Relaxed),
            inline_batches: self.counters.inline_batches.load(Ordering::Relaxed),
            dropped_batches: self.counters.dropped_batches.load(Ordering::Relaxed),
        }
    }

    /// Appends a message, evicting the oldest ones if the buffer is full and
    /// flushing if it reached the flush size.
    pub async fn push(&self, message: NormalizedMessage) {
        let batch = {
            let mut buffer = self.lock_buffer();
            if buffer.len() >= self.config.max_size {
                let evict = (self.config.max_size / 10).max(1).min(buffer.len());
                buffer.drain(..evict);
                self.counters
                    .evicted_messages
                    .fetch_add(evict as u64, Ordering::Relaxed);
                warn!("Queue full, evicted {evict} oldest messages");
            }
            buffer.push_back(message);

            if buffer.len() >= self.config.flush_size {
                Some(self.take_batch(&mut buffer))
            } else {
                None
            }
        };

        if let Some(pending) = batch {
            self.dispatch(pending).await;
        }
    }

    /// Takes everything buffered as one batch and forwards it. No-op when
    /// the buffer is empty.
    pub async fn flush(&self) {
        let pending = {
            let mut buffer = self.lock_buffer();
            if buffer.is_empty() {
                return;
            }
            self.take_batch(&mut buffer)
        };
        self.dispatch(pending).await;
    }

    /// Flushes every `flush_interval` until cancelled or stopped, then flushes
    /// once more and waits for in-flight batches to finish.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.config.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                () = self.cancel_token.cancelled() => {
                    debug!("Batch queue cancelled");
                    break;
                }
                () = self.stop_token.cancelled() => {
                    debug!("Batch queue stopped");
                    break;
                }
                _ = ticker.tick() => {
                    self.flush().await;
                }
            }
        }

        self.flush().await;
        self.wait_for_in_flight().await;
    }

    /// Asks [`run`](BatchQueue::run) to perform its final flush and return.
    pub fn stop(&self) {
        self.stop_token.cancel();
    }

    async fn wait_for_in_flight(&self) {
        // Every slot is free again once all spawned forwards have completed.
        #[allow(clippy::cast_possible_truncation)]
        let all_slots = MAX_CONCURRENT_FLUSHES as u32;
        match self.flush_slots.acquire_many(all_slots).await {
            Ok(permits) => drop(permits),
            Err(e) => warn!("Failed to wait for in-flight batches: {e}"),
        }
    }

    /// Must be called with the buffer lock held.
    fn take_batch(&self, buffer: &mut VecDeque<NormalizedMessage>) -> PendingBatch {
        PendingBatch {
            batch: buffer.drain(..).collect(),
            slot: Arc::clone(&self.flush_slots).try_acquire_owned().ok(),
        }
    }

    async fn dispatch(&self, PendingBatch { batch, slot }: PendingBatch) {
        match slot {
            Some(permit) => {
                self.counters
                    .dispatched_batches
                    .fetch_add(1, Ordering::Relaxed);
                let forwarder = Arc::clone(&self.forwarder);
                let counters = Arc::clone(&self.counters);
                let cancel_token = self.cancel_token.clone();
                tokio::spawn(async move {
                    forward_batch(forwarder.as_ref(), batch, &cancel_token, &counters).await;
                    drop(permit);
                });
            }
            None => {
                debug!(
                    "All {MAX_CONCURRENT_FLUSHES} flush slots busy, forwarding {} messages inline",
                    batch.len()
                );
                self.counters.inline_batches.fetch_add(1, Ordering::Relaxed);
                forward_batch(
                    self.forwarder.as_ref(),
                    batch,
                    &self.cancel_token,
                    &self.counters,
                )
                .await;
            }
        }
    }

    fn lock_buffer(&self) -> MutexGuard<'_, VecDeque<NormalizedMessage>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl MessageSink for BatchQueue {
    async fn push(&self, message: NormalizedMessage) {
        BatchQueue::push(self, message).await;
    }
}

async fn forward_batch(
    forwarder: &dyn BatchForwarder,
    batch: Batch,
    cancel_token: &CancellationToken,
    counters: &Counters,
) {
    let len = batch.len();
    match forwarder.forward(batch, cancel_token).await {
        Ok(()) => {}
        Err(ForwardError::Cancelled) => {
            counters.dropped_batches.fetch_add(1, Ordering::Relaxed);
            warn!("Shutdown interrupted forwarding, dropped {len} messages");
        }
        Err(e) => {
            counters.dropped_batches.fetch_add(1, Ordering::Relaxed);
            error!("Dropped batch of {len} messages: {e}");
        }
    }
}
