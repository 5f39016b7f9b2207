//! End-to-end behaviour through the public API

use async_trait::async_trait;
use chrono::NaiveDate;
use heartsync_core::source::{Page, PageRequest};
use heartsync_core::{
    AggregateError, AggregatorConfig, DaySummary, LiveAggregation, MemoryPageSource,
    PagedAggregation, PagedRecordSource, Record, Stat, SummaryProcessor, SummarySlot,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()
}

fn alert(amp: f64, pad: f64, dsut: f64) -> Record {
    Record::new()
        .with("event", "ALERT")
        .with("AmpRatio", amp)
        .with("PAD_ms", pad)
        .with("dSUT_ms", dsut)
}

fn mixed_records() -> Vec<Record> {
    vec![
        alert(0.82, 232.0, 20.0),
        alert(0.95, 180.0, -15.0),
        Record::new()
            .with("event", "STAT")
            .with("AmpRatio", 0.75)
            .with("PAD_ms", 250.0)
            .with("dSUT_ms", 30.0),
    ]
}

fn assert_close(stat: Stat, count: u64, avg: f64, min: f64, max: f64) {
    assert_eq!(stat.count, count);
    assert!((stat.avg - avg).abs() < 1e-9, "avg {} != {}", stat.avg, avg);
    assert_eq!(stat.min, min);
    assert_eq!(stat.max, max);
}

#[tokio::test]
async fn paged_pass_publishes_exact_day_summary() {
    let config = Arc::new(AggregatorConfig {
        page_size: 1,
        ..AggregatorConfig::default()
    });
    let slot = SummarySlot::empty(&config);
    let source = Arc::new(MemoryPageSource::new(mixed_records()));
    let aggregation = PagedAggregation::new(Arc::clone(&config), source, slot.clone());

    let pass = aggregation.refresh("user-1", day(), false).unwrap();
    pass.wait().await;

    let summary = slot.latest();
    assert_eq!(summary.day, Some(day()));
    assert_eq!(summary.sample_count, 2);
    assert_close(summary.stat("amp_ratio"), 2, 0.885, 0.82, 0.95);
    assert_close(summary.stat("pad_ms"), 2, 206.0, 180.0, 232.0);
    assert_close(summary.stat("dsut_ms"), 2, 2.5, -15.0, 20.0);
}

#[test]
fn mixed_spellings_fold_into_one_metric() {
    let mut processor = SummaryProcessor::default();
    for json in [
        r#"{"event": "ALERT", "AmpRatio": 0.8}"#,
        r#"{"event": "ALERT", "ampratio": "0.8"}"#,
        r#"{"event": "ALERT", "Amp_Ratio": 0.8}"#,
        r#"{"event": "ALERT", "ARatio": 0.8}"#,
        r#"{"event": "ALERT", "metrics": {"ARatio": 0.8}}"#,
        r#"{"event": "ALERT", "AmpRatio": "not-a-number"}"#,
    ] {
        assert!(processor.ingest_json(json).unwrap());
    }

    let summary = processor.snapshot();
    assert_eq!(summary.sample_count, 6);
    assert_close(summary.stat("amp_ratio"), 5, 0.8, 0.8, 0.8);
    assert_eq!(summary.stat("pad_ms"), Stat::EMPTY);
}

/// Serves one page, then blocks until released
struct StallingSource {
    stalled: Notify,
    release: Notify,
}

#[async_trait]
impl PagedRecordSource for StallingSource {
    async fn fetch_page(&self, request: &PageRequest) -> Result<Page, AggregateError> {
        if request.cursor.is_none() {
            return Ok(Page {
                records: vec![alert(0.1, 100.0, 1.0)],
                next_cursor: Some("1".to_string()),
            });
        }
        self.stalled.notify_one();
        self.release.notified().await;
        Ok(Page {
            records: vec![alert(0.2, 200.0, 2.0)],
            next_cursor: None,
        })
    }
}

#[tokio::test]
async fn cancelled_pass_keeps_previous_summary() {
    let config = Arc::new(AggregatorConfig::default());
    let previous = {
        let mut summary = DaySummary::empty(Some(day()), config.metric_names());
        summary.sample_count = 7;
        summary
    };
    let slot = SummarySlot::new(previous.clone());
    let source = Arc::new(StallingSource {
        stalled: Notify::new(),
        release: Notify::new(),
    });
    let dyn_source: Arc<dyn PagedRecordSource> = Arc::clone(&source) as Arc<dyn PagedRecordSource>;
    let aggregation = PagedAggregation::new(Arc::clone(&config), dyn_source, slot.clone());

    let pass = aggregation.refresh("user-1", day(), false).unwrap();
    source.stalled.notified().await;
    aggregation.cancel();
    source.release.notify_one();
    pass.wait().await;

    assert_eq!(*slot.latest(), previous);
}

#[tokio::test(start_paused = true)]
async fn live_batches_replace_rather_than_merge() {
    let config = Arc::new(AggregatorConfig::default());
    let slot = SummarySlot::empty(&config);
    let mut updates = slot.subscribe();
    let (feed, handle) = LiveAggregation::spawn(config, Some(day()), slot.clone());

    feed.push(mixed_records());
    updates.changed().await.unwrap();
    assert_eq!(updates.borrow_and_update().sample_count, 2);

    tokio::time::sleep(Duration::from_millis(300)).await;
    feed.push(vec![alert(0.5, 300.0, 5.0)]);
    updates.changed().await.unwrap();

    let summary = updates.borrow_and_update().clone();
    assert_eq!(summary.day, Some(day()));
    assert_eq!(summary.sample_count, 1);
    assert_close(summary.stat("amp_ratio"), 1, 0.5, 0.5, 0.5);
    assert_close(summary.stat("pad_ms"), 1, 300.0, 300.0, 300.0);

    handle.shutdown().await;
}
