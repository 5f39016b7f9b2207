//! Live (streaming) aggregation
//!
//! Each pushed batch is the full current record set for the live scope.
//! Batches land in a single-slot mailbox that the next push overwrites, so
//! a slow consumer only ever sees the most recent batch. The consumer
//! drains the mailbox at most once per `live_min_interval`, recomputes
//! summaries from scratch over that batch and publishes them.

use crate::aggregator::StreamingAggregator;
use crate::config::AggregatorConfig;
use crate::record::Record;
use crate::session::slot::SummarySlot;
use crate::summary::DaySummary;
use chrono::NaiveDate;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

type Mailbox = Option<Arc<Vec<Record>>>;

/// Producer side of a live session
#[derive(Clone)]
pub struct LiveFeed {
    tx: Arc<watch::Sender<Mailbox>>,
    received: Arc<AtomicU64>,
}

impl LiveFeed {
    /// Replace the pending batch with `batch`. Returns false once the live
    /// session has ended.
    pub fn push(&self, batch: Vec<Record>) -> bool {
        if self.tx.send(Some(Arc::new(batch))).is_err() {
            return false;
        }
        self.received.fetch_add(1, Ordering::Relaxed);
        true
    }
}

/// Counters reported when a live session ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveStats {
    /// Batches pushed into the feed
    pub received: u64,
    /// Batches folded and published
    pub processed: u64,
}

impl LiveStats {
    /// Batches overwritten before they were processed
    pub fn coalesced(&self) -> u64 {
        self.received.saturating_sub(self.processed)
    }
}

/// Handle owning the live consumer task
pub struct LiveHandle {
    token: CancellationToken,
    handle: Option<JoinHandle<u64>>,
    received: Arc<AtomicU64>,
}

impl LiveHandle {
    /// Stop the session and wait for the consumer. Nothing is published
    /// after this returns.
    pub async fn shutdown(mut self) -> LiveStats {
        self.token.cancel();
        let processed = match self.handle.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => 0,
        };
        LiveStats {
            received: self.received.load(Ordering::Relaxed),
            processed,
        }
    }

    /// Wait until every feed has been dropped and the final batch has been
    /// handled
    pub async fn join(mut self) -> LiveStats {
        let processed = match self.handle.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => 0,
        };
        LiveStats {
            received: self.received.load(Ordering::Relaxed),
            processed,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for LiveHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Entry point for live sessions
pub struct LiveAggregation;

impl LiveAggregation {
    /// Spawn a live consumer publishing into `slot`.
    ///
    /// Must be called within a Tokio runtime.
    pub fn spawn(
        config: Arc<AggregatorConfig>,
        day: Option<NaiveDate>,
        slot: SummarySlot,
    ) -> (LiveFeed, LiveHandle) {
        let (tx, rx) = watch::channel::<Mailbox>(None);
        let received = Arc::new(AtomicU64::new(0));
        let token = CancellationToken::new();

        let consumer = Consumer {
            config,
            day,
            slot,
            rx,
            token: token.clone(),
        };
        let span = tracing::info_span!("live_session", day = ?day);
        let handle = tokio::spawn(consumer.run().instrument(span));

        let feed = LiveFeed {
            tx: Arc::new(tx),
            received: Arc::clone(&received),
        };
        let handle = LiveHandle {
            token,
            handle: Some(handle),
            received,
        };
        (feed, handle)
    }
}

struct Consumer {
    config: Arc<AggregatorConfig>,
    day: Option<NaiveDate>,
    slot: SummarySlot,
    rx: watch::Receiver<Mailbox>,
    token: CancellationToken,
}

impl Consumer {
    async fn run(mut self) -> u64 {
        let interval = self.config.live_min_interval();
        let mut next_allowed = Instant::now();
        let mut processed = 0u64;

        tracing::debug!(interval_ms = interval.as_millis() as u64, "live session started");

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                changed = self.rx.changed() => {
                    if changed.is_err() {
                        // Every feed dropped and the last batch was consumed
                        break;
                    }
                }
            }

            // Batches pushed while waiting overwrite the mailbox
            tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                _ = tokio::time::sleep_until(next_allowed) => {}
            }

            let batch = self.rx.borrow_and_update().clone();
            let Some(batch) = batch else {
                continue;
            };

            let summary = self.fold_batch(&batch);
            if self.token.is_cancelled() {
                break;
            }
            self.slot.publish(summary);
            processed += 1;
            next_allowed = Instant::now() + interval;

            tracing::trace!(records = batch.len(), processed, "live batch published");
        }

        tracing::debug!(processed, "live session ended");
        processed
    }

    fn fold_batch(&self, batch: &[Record]) -> DaySummary {
        let config = self.config.as_ref();
        let mut aggregator = StreamingAggregator::from_config(config);
        for record in batch {
            aggregator.offer(record, |r| config.accepts(r));
        }
        aggregator.summary(self.day)
    }
}
