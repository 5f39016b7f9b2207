//! Aggregation sessions
//!
//! Two ways of driving the aggregator for one scope:
//!
//! - **Paged**: an on-demand exact pass over a paginated source, at most one
//!   in flight per scope, cancellable.
//! - **Live**: a feed of full record batches, coalesced so that only the
//!   latest batch is processed and publications are rate-limited.
//!
//! Both publish immutable [`DaySummary`](crate::summary::DaySummary) values
//! into a [`SummarySlot`].

pub mod live;
pub mod paged;
pub mod slot;

pub use live::{LiveAggregation, LiveFeed, LiveHandle, LiveStats};
pub use paged::{PagedAggregation, PassHandle, PassOutcome, Scope};
pub use slot::SummarySlot;
