//! Record sources
//!
//! The document-database client lives outside this crate. Paged mode talks
//! to it through [`PagedRecordSource`]; [`MemoryPageSource`] serves an
//! in-memory record set with the same paging contract.

use crate::config::DEFAULT_EVENT_KEY;
use crate::error::AggregateError;
use crate::record::Record;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// One page request against the record store
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    /// Opaque owner key (account or device)
    pub owner: String,
    /// Day whose records are requested
    pub day: NaiveDate,
    /// Maximum records per page
    pub page_size: usize,
    /// Event tags to return; empty requests every event type
    pub allowed_events: Vec<String>,
    /// Continuation token from the previous page, `None` for the first
    pub cursor: Option<String>,
}

/// A page of records plus the continuation token
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub records: Vec<Record>,
    /// `None` once the source is exhausted
    pub next_cursor: Option<String>,
}

impl Page {
    pub fn is_last(&self) -> bool {
        self.next_cursor.is_none()
    }
}

/// Paginated access to stored records.
///
/// A pass may stop calling `fetch_page` at any point; implementations must
/// not rely on being driven to exhaustion.
#[async_trait]
pub trait PagedRecordSource: Send + Sync {
    /// Fetch one page
    async fn fetch_page(&self, request: &PageRequest) -> Result<Page, AggregateError>;
}

/// In-memory paged source.
///
/// Records carrying an `owner` string or a `day` string (`YYYY-MM-DD`) are
/// filtered against the request; records without them always match.
#[derive(Debug, Clone, Default)]
pub struct MemoryPageSource {
    records: Vec<Record>,
    event_key: String,
}

impl MemoryPageSource {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records,
            event_key: DEFAULT_EVENT_KEY.to_string(),
        }
    }

    /// Use a different key for the event-type tag
    pub fn with_event_key(mut self, key: impl Into<String>) -> Self {
        self.event_key = key.into();
        self
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records per `day` tag; untagged records are not counted
    pub fn day_counts(&self) -> BTreeMap<NaiveDate, usize> {
        let mut counts = BTreeMap::new();
        for day in self.records.iter().filter_map(record_day) {
            *counts.entry(day).or_insert(0) += 1;
        }
        counts
    }

    fn matches(&self, record: &Record, request: &PageRequest) -> bool {
        if let Some(owner) = record.tag("owner") {
            if owner != request.owner {
                return false;
            }
        }

        if record.tag("day").is_some() && record_day(record) != Some(request.day) {
            return false;
        }

        request.allowed_events.is_empty()
            || record
                .tag(&self.event_key)
                .is_some_and(|tag| request.allowed_events.iter().any(|a| a == tag))
    }
}

fn record_day(record: &Record) -> Option<NaiveDate> {
    record
        .tag("day")
        .and_then(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d").ok())
}

#[async_trait]
impl PagedRecordSource for MemoryPageSource {
    async fn fetch_page(&self, request: &PageRequest) -> Result<Page, AggregateError> {
        let start = match &request.cursor {
            Some(cursor) => cursor
                .parse::<usize>()
                .map_err(|_| AggregateError::Source(format!("invalid cursor: {}", cursor)))?,
            None => 0,
        };
        let page_size = request.page_size.max(1);

        let mut records = Vec::with_capacity(page_size.min(self.records.len()));
        let mut position = start;
        while position < self.records.len() && records.len() < page_size {
            let record = &self.records[position];
            if self.matches(record, request) {
                records.push(record.clone());
            }
            position += 1;
        }

        let next_cursor = (position < self.records.len()).then(|| position.to_string());
        Ok(Page {
            records,
            next_cursor,
        })
    }
}
