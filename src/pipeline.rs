//! Pipeline entry points
//!
//! Synchronous API for folding records held in JSON text, plus a stateful
//! processor that ingests records one at a time (the surface the mobile
//! bindings wrap).

use crate::aggregator::StreamingAggregator;
use crate::config::AggregatorConfig;
use crate::error::AggregateError;
use crate::record::{ndjson_records, parse_array, Record};
use crate::resolver::FieldResolver;
use crate::summary::{DaySummary, FoldResult};
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Fold a JSON array of records into a day summary.
///
/// # Arguments
/// * `records_json` - JSON array of record objects
/// * `config` - Tracked metrics and event filter
///
/// # Example
/// ```ignore
/// let result = summarize_json(records_json, &AggregatorConfig::default())?;
/// println!("{} samples", result.accepted);
/// ```
pub fn summarize_json(
    records_json: &str,
    config: &AggregatorConfig,
) -> Result<FoldResult, AggregateError> {
    let records = parse_array(records_json)?;
    Ok(StreamingAggregator::fold(&config.metrics, &records, |r| {
        config.accepts(r)
    }))
}

/// Fold an NDJSON document line by line.
///
/// Records are parsed and folded one at a time, so the document's records
/// are never all held in memory. The first malformed line aborts the fold.
pub fn summarize_ndjson(
    ndjson: &str,
    config: &AggregatorConfig,
) -> Result<FoldResult, AggregateError> {
    let mut aggregator = StreamingAggregator::from_config(config);
    for record in ndjson_records(ndjson) {
        aggregator.offer(&record?, |r| config.accepts(r));
    }
    Ok(aggregator.finish(None))
}

/// Resolve every configured metric in one record.
///
/// Metrics that do not resolve map to `None`.
pub fn resolve_all(record: &Record, config: &AggregatorConfig) -> BTreeMap<String, Option<f64>> {
    config
        .metrics
        .iter()
        .map(|m| (m.name.clone(), FieldResolver::resolve_metric(record, m)))
        .collect()
}

/// Stateful processor for incremental ingestion.
///
/// Holds one aggregation pass; `reset` starts a new one.
pub struct SummaryProcessor {
    config: AggregatorConfig,
    aggregator: StreamingAggregator,
    day: Option<NaiveDate>,
}

impl Default for SummaryProcessor {
    fn default() -> Self {
        Self::new(AggregatorConfig::default())
    }
}

impl SummaryProcessor {
    pub fn new(config: AggregatorConfig) -> Self {
        let aggregator = StreamingAggregator::from_config(&config);
        Self {
            config,
            aggregator,
            day: None,
        }
    }

    /// Create a processor from configuration JSON
    pub fn from_config_json(json: &str) -> Result<Self, AggregateError> {
        Ok(Self::new(AggregatorConfig::from_json(json)?))
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Tag subsequent snapshots with `day`
    pub fn set_day(&mut self, day: Option<NaiveDate>) {
        self.day = day;
    }

    /// Ingest one record; returns whether it passed the event filter
    pub fn ingest(&mut self, record: &Record) -> bool {
        let config = &self.config;
        self.aggregator.offer(record, |r| config.accepts(r))
    }

    /// Ingest one record given as JSON
    pub fn ingest_json(&mut self, record_json: &str) -> Result<bool, AggregateError> {
        let record = Record::from_json(record_json)?;
        Ok(self.ingest(&record))
    }

    /// Ingest a JSON array of records; returns how many were accepted
    pub fn ingest_batch_json(&mut self, records_json: &str) -> Result<u64, AggregateError> {
        let records = parse_array(records_json)?;
        Ok(records.iter().filter(|r| self.ingest(r)).count() as u64)
    }

    /// Current summary
    pub fn snapshot(&self) -> DaySummary {
        self.aggregator.summary(self.day)
    }

    /// Current summary as JSON
    pub fn snapshot_json(&self) -> Result<String, AggregateError> {
        self.snapshot().to_json()
    }

    /// Start a new pass
    pub fn reset(&mut self) {
        self.aggregator.reset();
    }
}
