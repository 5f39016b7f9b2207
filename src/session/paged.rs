//! Paged (exact) aggregation
//!
//! A pass walks every page of the source for one owner and day, folds the
//! records into fresh running summaries and publishes a single final
//! summary. Only the pass that is still current when it finishes may
//! publish; the generation check happens under the same lock that
//! cancellation takes, so a cancelled pass can never publish.

use crate::aggregator::StreamingAggregator;
use crate::config::AggregatorConfig;
use crate::error::AggregateError;
use crate::session::slot::SummarySlot;
use crate::source::{PageRequest, PagedRecordSource};
use crate::summary::{DaySummary, FoldResult};
use chrono::NaiveDate;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

/// Owner and day a pass aggregates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub owner: String,
    pub day: NaiveDate,
}

impl Scope {
    pub fn new(owner: impl Into<String>, day: NaiveDate) -> Self {
        Self {
            owner: owner.into(),
            day,
        }
    }
}

/// How a pass ended
#[derive(Debug, Clone, PartialEq)]
pub enum PassOutcome {
    /// The pass completed and its summary was published
    Published { pass_id: Uuid, accepted: u64 },
    /// The source failed or the pass panicked; a zero-sample summary was
    /// published
    Failed { pass_id: Uuid, error: String },
    /// The pass was cancelled or superseded and published nothing
    Cancelled { pass_id: Uuid },
}

impl PassOutcome {
    pub fn pass_id(&self) -> Uuid {
        match self {
            PassOutcome::Published { pass_id, .. }
            | PassOutcome::Failed { pass_id, .. }
            | PassOutcome::Cancelled { pass_id } => *pass_id,
        }
    }
}

/// Handle to a running pass
pub struct PassHandle {
    pass_id: Uuid,
    handle: JoinHandle<PassOutcome>,
}

impl PassHandle {
    pub fn id(&self) -> Uuid {
        self.pass_id
    }

    /// Wait for the pass to end
    pub async fn wait(self) -> PassOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => PassOutcome::Cancelled {
                pass_id: self.pass_id,
            },
            Err(e) => PassOutcome::Failed {
                pass_id: self.pass_id,
                error: e.to_string(),
            },
        }
    }
}

struct InFlight {
    generation: u64,
    scope: Scope,
    token: CancellationToken,
}

#[derive(Default)]
struct PassState {
    generation: u64,
    in_flight: Option<InFlight>,
    closed: bool,
}

impl PassState {
    fn cancel_in_flight(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            tracing::debug!(generation = in_flight.generation, "cancelling in-flight pass");
            in_flight.token.cancel();
        }
    }
}

/// Owner of paged passes for one aggregation scope.
///
/// Dropping it cancels the in-flight pass.
pub struct PagedAggregation {
    config: Arc<AggregatorConfig>,
    source: Arc<dyn PagedRecordSource>,
    slot: SummarySlot,
    state: Arc<Mutex<PassState>>,
}

impl PagedAggregation {
    pub fn new(
        config: Arc<AggregatorConfig>,
        source: Arc<dyn PagedRecordSource>,
        slot: SummarySlot,
    ) -> Self {
        Self {
            config,
            source,
            slot,
            state: Arc::new(Mutex::new(PassState::default())),
        }
    }

    /// Slot this aggregation publishes into
    pub fn slot(&self) -> &SummarySlot {
        &self.slot
    }

    /// Whether a pass is currently running
    pub fn in_flight(&self) -> bool {
        self.state.lock().in_flight.is_some()
    }

    /// Start a pass for `owner` and `day`.
    ///
    /// If a pass for the same scope is already running this is a no-op
    /// unless `force` is set. A forced refresh, or a request for a
    /// different scope, cancels the running pass first. Returns `None` when
    /// no pass was started. Must be called within a Tokio runtime.
    pub fn refresh(&self, owner: &str, day: NaiveDate, force: bool) -> Option<PassHandle> {
        let scope = Scope::new(owner, day);
        let mut state = self.state.lock();

        if state.closed {
            return None;
        }

        if let Some(in_flight) = &state.in_flight {
            if !force && in_flight.scope == scope {
                tracing::debug!(owner, %day, "pass already in flight");
                return None;
            }
        }
        state.cancel_in_flight();

        state.generation += 1;
        let generation = state.generation;
        let token = CancellationToken::new();
        state.in_flight = Some(InFlight {
            generation,
            scope: scope.clone(),
            token: token.clone(),
        });
        drop(state);

        let pass_id = Uuid::new_v4();
        let pass = Pass {
            pass_id,
            generation,
            scope,
            token,
            config: Arc::clone(&self.config),
            source: Arc::clone(&self.source),
            slot: self.slot.clone(),
            state: Arc::clone(&self.state),
        };
        let span = tracing::info_span!("paged_pass", pass = %pass_id, owner, %day);
        let handle = tokio::spawn(pass.run().instrument(span));

        Some(PassHandle { pass_id, handle })
    }

    /// Switch to another day, cancelling whatever is running
    pub fn switch_day(&self, owner: &str, day: NaiveDate) -> Option<PassHandle> {
        self.refresh(owner, day, true)
    }

    /// Cancel the in-flight pass, if any. The last published summary stays
    /// in the slot.
    pub fn cancel(&self) {
        self.state.lock().cancel_in_flight();
    }

    /// End the scope: cancel the running pass and refuse new ones
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.cancel_in_flight();
        state.closed = true;
    }
}

impl Drop for PagedAggregation {
    fn drop(&mut self) {
        self.state.lock().cancel_in_flight();
    }
}

/// Frees the scope when a pass is dropped before its own cleanup ran.
///
/// A pass that panics is treated as a failed pass and publishes the
/// zero-sample summary if it is still current.
struct ScopeRelease {
    generation: u64,
    day: NaiveDate,
    config: Arc<AggregatorConfig>,
    slot: SummarySlot,
    state: Arc<Mutex<PassState>>,
}

impl Drop for ScopeRelease {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        let current = state
            .in_flight
            .as_ref()
            .is_some_and(|f| f.generation == self.generation);
        if !current {
            return;
        }
        state.in_flight = None;

        if std::thread::panicking() {
            tracing::error!(generation = self.generation, "paged pass panicked");
            self.slot.publish(DaySummary::empty(Some(self.day), self.config.metric_names()));
        } else {
            tracing::debug!(generation = self.generation, "paged pass dropped");
        }
    }
}

struct Pass {
    pass_id: Uuid,
    generation: u64,
    scope: Scope,
    token: CancellationToken,
    config: Arc<AggregatorConfig>,
    source: Arc<dyn PagedRecordSource>,
    slot: SummarySlot,
    state: Arc<Mutex<PassState>>,
}

impl Pass {
    async fn run(self) -> PassOutcome {
        tracing::info!("starting paged pass");
        let _release = ScopeRelease {
            generation: self.generation,
            day: self.scope.day,
            config: Arc::clone(&self.config),
            slot: self.slot.clone(),
            state: Arc::clone(&self.state),
        };
        let result = self.fold_pages().await;

        let mut state = self.state.lock();
        let current = state
            .in_flight
            .as_ref()
            .is_some_and(|f| f.generation == self.generation);
        if !current || self.token.is_cancelled() {
            tracing::info!("paged pass cancelled");
            return PassOutcome::Cancelled {
                pass_id: self.pass_id,
            };
        }
        state.in_flight = None;

        match result {
            Ok(fold) => {
                tracing::info!(accepted = fold.accepted, "paged pass complete");
                let accepted = fold.accepted;
                self.slot.publish(fold.summary);
                PassOutcome::Published {
                    pass_id: self.pass_id,
                    accepted,
                }
            }
            Err(AggregateError::Cancelled) => PassOutcome::Cancelled {
                pass_id: self.pass_id,
            },
            Err(e) => {
                tracing::warn!(error = %e, "paged pass failed");
                self.slot.publish(DaySummary::empty(
                    Some(self.scope.day),
                    self.config.metric_names(),
                ));
                PassOutcome::Failed {
                    pass_id: self.pass_id,
                    error: e.to_string(),
                }
            }
        }
    }

    async fn fold_pages(&self) -> Result<FoldResult, AggregateError> {
        let config = self.config.as_ref();
        let mut aggregator = StreamingAggregator::from_config(config);
        let mut cursor = None;
        let mut pages = 0usize;

        loop {
            if self.token.is_cancelled() {
                return Err(AggregateError::Cancelled);
            }

            let request = PageRequest {
                owner: self.scope.owner.clone(),
                day: self.scope.day,
                page_size: config.page_size,
                allowed_events: config.allowed_events.clone(),
                cursor: cursor.take(),
            };

            let page = tokio::select! {
                biased;
                _ = self.token.cancelled() => return Err(AggregateError::Cancelled),
                page = self.source.fetch_page(&request) => page?,
            };
            pages += 1;

            for record in &page.records {
                if self.token.is_cancelled() {
                    return Err(AggregateError::Cancelled);
                }
                aggregator.offer(record, |r| config.accepts(r));
            }
            tracing::debug!(
                page = pages,
                records = page.records.len(),
                accepted = aggregator.accepted(),
                "folded page"
            );

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(aggregator.finish(Some(self.scope.day)))
    }
}
