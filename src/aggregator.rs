//! Streaming aggregation
//!
//! Reduces a record stream into one [`RunningSummary`] per tracked metric
//! in a single forward pass. Records are never retained; memory use is
//! fixed by the number of tracked metrics.
//!
//! An aggregator belongs to exactly one pass. Callers start a new pass by
//! building a new aggregator, which keeps passes for different days or
//! scopes from sharing state.

use crate::config::{AggregatorConfig, MetricSpec};
use crate::error::AggregateError;
use crate::record::Record;
use crate::resolver::FieldResolver;
use crate::stats::{RunningSummary, Stat};
use crate::summary::{DaySummary, FoldResult};
use chrono::NaiveDate;
use std::borrow::Borrow;
use tokio_util::sync::CancellationToken;

struct TrackedMetric {
    spec: MetricSpec,
    summary: RunningSummary,
}

/// Per-metric running summaries for one aggregation pass
pub struct StreamingAggregator {
    tracked: Vec<TrackedMetric>,
    accepted: u64,
}

impl StreamingAggregator {
    /// Create an empty aggregator tracking `metrics`
    pub fn new(metrics: &[MetricSpec]) -> Self {
        Self {
            tracked: metrics
                .iter()
                .map(|spec| TrackedMetric {
                    spec: spec.clone(),
                    summary: RunningSummary::new(),
                })
                .collect(),
            accepted: 0,
        }
    }

    pub fn from_config(config: &AggregatorConfig) -> Self {
        Self::new(&config.metrics)
    }

    /// Add a sample to `metric`. Returns false for unknown metrics and
    /// rejected (non-finite) values.
    pub fn add(&mut self, metric: &str, value: f64) -> bool {
        match self.tracked.iter_mut().find(|t| t.spec.name == metric) {
            Some(tracked) => tracked.summary.add(value),
            None => false,
        }
    }

    /// Current stat for `metric`; unknown or empty metrics report
    /// [`Stat::EMPTY`]
    pub fn snapshot(&self, metric: &str) -> Stat {
        self.tracked
            .iter()
            .find(|t| t.spec.name == metric)
            .map(|t| t.summary.snapshot())
            .unwrap_or(Stat::EMPTY)
    }

    /// Resolve every tracked metric in `record` and add what resolves.
    ///
    /// Does not apply an event filter and does not count the record as
    /// accepted. Returns the number of metrics updated.
    pub fn ingest(&mut self, record: &Record) -> usize {
        let mut updated = 0;
        for tracked in &mut self.tracked {
            let Some(value) = FieldResolver::resolve_metric(record, &tracked.spec) else {
                continue;
            };
            if tracked.summary.add(value) {
                updated += 1;
            } else {
                tracing::trace!(metric = %tracked.spec.name, value, "rejected non-finite sample");
            }
        }
        updated
    }

    /// Apply `accept` to `record`; accepted records are counted and
    /// ingested. Returns whether the record was accepted.
    pub fn offer<P>(&mut self, record: &Record, accept: P) -> bool
    where
        P: FnOnce(&Record) -> bool,
    {
        if !accept(record) {
            return false;
        }
        self.accepted += 1;
        self.ingest(record);
        true
    }

    /// Records accepted so far
    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    /// Project the current state into a day summary
    pub fn summary(&self, day: Option<NaiveDate>) -> DaySummary {
        DaySummary {
            day,
            sample_count: self.accepted,
            metrics: self
                .tracked
                .iter()
                .map(|t| (t.spec.name.clone(), t.summary.snapshot()))
                .collect(),
        }
    }

    /// Complete the pass
    pub fn finish(self, day: Option<NaiveDate>) -> FoldResult {
        FoldResult {
            accepted: self.accepted,
            summary: self.summary(day),
        }
    }

    /// Discard every sample and the accepted count
    pub fn reset(&mut self) {
        for tracked in &mut self.tracked {
            tracked.summary.reset();
        }
        self.accepted = 0;
    }

    /// Fold `records` in one pass with fresh running summaries
    pub fn fold<I, P>(metrics: &[MetricSpec], records: I, mut accept: P) -> FoldResult
    where
        I: IntoIterator,
        I::Item: Borrow<Record>,
        P: FnMut(&Record) -> bool,
    {
        let mut aggregator = Self::new(metrics);
        for record in records {
            aggregator.offer(record.borrow(), &mut accept);
        }
        aggregator.finish(None)
    }

    /// Like [`fold`](Self::fold) but checks `cancel` before every record.
    ///
    /// A cancelled fold returns [`AggregateError::Cancelled`] and its partial
    /// summaries are dropped.
    pub fn fold_cancellable<I, P>(
        metrics: &[MetricSpec],
        records: I,
        mut accept: P,
        cancel: &CancellationToken,
    ) -> Result<FoldResult, AggregateError>
    where
        I: IntoIterator,
        I::Item: Borrow<Record>,
        P: FnMut(&Record) -> bool,
    {
        let mut aggregator = Self::new(metrics);
        for record in records {
            if cancel.is_cancelled() {
                return Err(AggregateError::Cancelled);
            }
            aggregator.offer(record.borrow(), &mut accept);
        }
        if cancel.is_cancelled() {
            return Err(AggregateError::Cancelled);
        }
        Ok(aggregator.finish(None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_records() -> Vec<Record> {
        vec![
            Record::new()
                .with("event", "ALERT")
                .with("AmpRatio", 0.82)
                .with("PAD_ms", 232.0)
                .with("dSUT_ms", 20.0),
            Record::new()
                .with("event", "ALERT")
                .with("AmpRatio", 0.95)
                .with("PAD_ms", 180.0)
                .with("dSUT_ms", -15.0),
            Record::new()
                .with("event", "STAT")
                .with("AmpRatio", 0.75)
                .with("PAD_ms", 250.0)
                .with("dSUT_ms", 30.0),
        ]
    }

    fn alerts_only(record: &Record) -> bool {
        record.tag("event") == Some("ALERT")
    }

    #[test]
    fn test_fold_end_to_end() {
        let config = AggregatorConfig::default();
        let result = StreamingAggregator::fold(&config.metrics, &sample_records(), alerts_only);

        assert_eq!(result.accepted, 2);
        assert_eq!(result.summary.sample_count, 2);

        let amp = result.summary.stat("amp_ratio");
        assert_eq!(amp.count, 2);
        assert!((amp.avg - 0.885).abs() < 1e-12);
        assert_eq!(amp.min, 0.82);
        assert_eq!(amp.max, 0.95);

        let pad = result.summary.stat("pad_ms");
        assert_eq!(
            pad,
            Stat {
                count: 2,
                avg: 206.0,
                min: 180.0,
                max: 232.0
            }
        );

        let dsut = result.summary.stat("dsut_ms");
        assert_eq!(
            dsut,
            Stat {
                count: 2,
                avg: 2.5,
                min: -15.0,
                max: 20.0
            }
        );
    }

    #[test]
    fn test_fold_with_config_filter() {
        let config = AggregatorConfig::default();
        let result = StreamingAggregator::fold(&config.metrics, sample_records(), |r| {
            config.accepts(r)
        });
        assert_eq!(result.accepted, 2);
    }

    #[test]
    fn test_accepted_record_without_metrics() {
        let metrics = [MetricSpec::amp_ratio()];
        let records = [
            Record::new().with("event", "ALERT"),
            Record::new().with("event", "ALERT").with("AmpRatio", "bad"),
        ];
        let result = StreamingAggregator::fold(&metrics, &records, alerts_only);

        assert_eq!(result.accepted, 2);
        assert_eq!(result.summary.stat("amp_ratio"), Stat::EMPTY);
    }

    #[test]
    fn test_nan_string_is_skipped() {
        let mut aggregator = StreamingAggregator::new(&[MetricSpec::pad_ms()]);
        assert_eq!(aggregator.ingest(&Record::new().with("PAD_ms", "NaN")), 0);
        assert_eq!(aggregator.ingest(&Record::new().with("PAD_ms", "inf")), 0);
        assert_eq!(aggregator.ingest(&Record::new().with("PAD_ms", "12")), 1);
        assert_eq!(aggregator.snapshot("pad_ms").count, 1);
    }

    #[test]
    fn test_add_and_snapshot() {
        let mut aggregator = StreamingAggregator::new(&[MetricSpec::amp_ratio()]);
        assert_eq!(aggregator.snapshot("amp_ratio"), Stat::EMPTY);

        assert!(aggregator.add("amp_ratio", 1.0));
        assert!(aggregator.add("amp_ratio", 3.0));
        assert!(!aggregator.add("amp_ratio", f64::NAN));
        assert!(!aggregator.add("unknown", 1.0));

        assert_eq!(
            aggregator.snapshot("amp_ratio"),
            Stat {
                count: 2,
                avg: 2.0,
                min: 1.0,
                max: 3.0
            }
        );
        assert_eq!(aggregator.snapshot("unknown"), Stat::EMPTY);
    }

    #[test]
    fn test_reset() {
        let mut aggregator = StreamingAggregator::from_config(&AggregatorConfig::default());
        for record in sample_records() {
            aggregator.offer(&record, |_| true);
        }
        assert_eq!(aggregator.accepted(), 3);

        aggregator.reset();
        assert_eq!(aggregator.accepted(), 0);
        assert!(aggregator.summary(None).is_empty());
    }

    #[test]
    fn test_empty_fold_reports_every_metric() {
        let config = AggregatorConfig::default();
        let result = StreamingAggregator::fold(&config.metrics, Vec::<Record>::new(), |_| true);

        assert_eq!(result.accepted, 0);
        assert_eq!(result.summary.metrics.len(), 3);
        assert!(result.summary.is_empty());
    }

    #[test]
    fn test_long_stream_from_iterator() {
        let metrics = [MetricSpec::pad_ms()];
        let records = (0..100_000).map(|i| {
            Record::new()
                .with("event", "ALERT")
                .with("PAD_ms", f64::from(i % 100))
        });
        let result = StreamingAggregator::fold(&metrics, records, alerts_only);

        let pad = result.summary.stat("pad_ms");
        assert_eq!(pad.count, 100_000);
        assert!((pad.avg - 49.5).abs() < 1e-9);
        assert_eq!(pad.min, 0.0);
        assert_eq!(pad.max, 99.0);
    }

    #[test]
    fn test_fold_cancellable_completes() {
        let config = AggregatorConfig::default();
        let token = CancellationToken::new();
        let result = StreamingAggregator::fold_cancellable(
            &config.metrics,
            &sample_records(),
            alerts_only,
            &token,
        )
        .unwrap();
        assert_eq!(result.accepted, 2);
    }

    #[test]
    fn test_fold_cancelled_mid_pass() {
        let config = AggregatorConfig::default();
        let token = CancellationToken::new();
        let mut seen = 0;

        let records = sample_records();
        let result = StreamingAggregator::fold_cancellable(
            &config.metrics,
            &records,
            |r| {
                seen += 1;
                if seen == 2 {
                    token.cancel();
                }
                alerts_only(r)
            },
            &token,
        );

        assert!(matches!(result, Err(AggregateError::Cancelled)));
        assert_eq!(seen, 2);
    }
}
