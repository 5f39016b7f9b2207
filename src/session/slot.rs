//! Published summary slot

use crate::config::AggregatorConfig;
use crate::summary::DaySummary;
use std::sync::Arc;
use tokio::sync::watch;

/// Observable holding the last published day summary.
///
/// Publication replaces the stored value; readers only ever see complete
/// summaries. The slot starts out holding a zero-sample summary.
#[derive(Clone)]
pub struct SummarySlot {
    tx: Arc<watch::Sender<Arc<DaySummary>>>,
}

impl SummarySlot {
    pub fn new(initial: DaySummary) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self { tx: Arc::new(tx) }
    }

    /// Slot holding the zero-sample summary for `config`'s metrics
    pub fn empty(config: &AggregatorConfig) -> Self {
        Self::new(DaySummary::empty(None, config.metric_names()))
    }

    /// Last published summary
    pub fn latest(&self) -> Arc<DaySummary> {
        self.tx.borrow().clone()
    }

    /// Receiver notified on every publication
    pub fn subscribe(&self) -> watch::Receiver<Arc<DaySummary>> {
        self.tx.subscribe()
    }

    pub(crate) fn publish(&self, summary: DaySummary) {
        tracing::debug!(
            day = ?summary.day,
            samples = summary.sample_count,
            "publishing day summary"
        );
        self.tx.send_replace(Arc::new(summary));
    }
}
