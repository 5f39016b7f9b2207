//! HeartSync Core - Day summaries of heartbeat timing metrics
//!
//! HeartSync folds heterogeneous heartbeat-timing records into per-day
//! summaries (count, mean, min, max) for a configurable set of metrics:
//! field resolution → event filtering → streaming aggregation → day summary.
//!
//! ## Modes
//!
//! - **Paged**: exact summaries over every stored record for one owner and
//!   day, pulled page by page from a [`source::PagedRecordSource`]
//! - **Live**: summaries recomputed over the latest pushed record set, with
//!   superseded batches coalesced and publications rate-limited

pub mod aggregator;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod record;
pub mod resolver;
pub mod session;
pub mod source;
pub mod stats;
pub mod summary;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use aggregator::StreamingAggregator;
pub use config::{AggregatorConfig, MetricSpec};
pub use error::AggregateError;
pub use pipeline::{summarize_json, summarize_ndjson, SummaryProcessor};
pub use record::{FieldValue, Record};
pub use resolver::FieldResolver;
pub use stats::{RunningSummary, Stat};
pub use summary::{DaySummary, FoldResult};

// Session exports
pub use session::{LiveAggregation, LiveFeed, LiveHandle, PagedAggregation, SummarySlot};
pub use source::{MemoryPageSource, PagedRecordSource};

/// HeartSync Core version
pub const HEARTSYNC_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported by the CLI
pub const PRODUCER_NAME: &str = "heartsync-core";
