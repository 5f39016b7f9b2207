//! Day summaries
//!
//! The immutable value handed to presentation once a fold completes or a
//! live batch has been processed. Each new summary supersedes the previous
//! one wholesale.

use crate::error::AggregateError;
use crate::stats::Stat;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-metric statistics for one logical day or scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaySummary {
    /// Day the records belong to, if the pass was day-scoped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day: Option<NaiveDate>,
    /// Records that passed the event filter
    pub sample_count: u64,
    /// One entry per tracked metric, keyed by metric name
    pub metrics: BTreeMap<String, Stat>,
}

impl DaySummary {
    /// Zero-sample summary listing every metric as [`Stat::EMPTY`]
    pub fn empty<'a, I>(day: Option<NaiveDate>, metric_names: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        DaySummary {
            day,
            sample_count: 0,
            metrics: metric_names
                .into_iter()
                .map(|name| (name.to_string(), Stat::EMPTY))
                .collect(),
        }
    }

    /// Stat for `metric`; unknown metrics read as empty
    pub fn stat(&self, metric: &str) -> Stat {
        self.metrics.get(metric).copied().unwrap_or(Stat::EMPTY)
    }

    /// True when no record contributed to this summary
    pub fn is_empty(&self) -> bool {
        self.sample_count == 0 && self.metrics.values().all(Stat::is_empty)
    }

    pub fn to_json(&self) -> Result<String, AggregateError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, AggregateError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Result of a completed fold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldResult {
    /// Records that passed the accept predicate
    pub accepted: u64,
    /// Final projection of the running summaries
    pub summary: DaySummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_summary() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 9);
        let summary = DaySummary::empty(day, ["amp_ratio", "pad_ms"]);

        assert!(summary.is_empty());
        assert_eq!(summary.metrics.len(), 2);
        assert_eq!(summary.stat("amp_ratio"), Stat::EMPTY);
        assert_eq!(summary.stat("unknown"), Stat::EMPTY);
    }

    #[test]
    fn test_json_shape() {
        let mut summary = DaySummary::empty(NaiveDate::from_ymd_opt(2024, 3, 9), ["pad_ms"]);
        summary.sample_count = 1;
        summary.metrics.insert(
            "pad_ms".to_string(),
            Stat {
                count: 1,
                avg: 232.0,
                min: 232.0,
                max: 232.0,
            },
        );

        let value: serde_json::Value = serde_json::from_str(&summary.to_json().unwrap()).unwrap();
        assert_eq!(value["day"], "2024-03-09");
        assert_eq!(value["sample_count"], 1);
        assert_eq!(value["metrics"]["pad_ms"]["avg"], 232.0);
        assert_eq!(value["metrics"]["pad_ms"]["count"], 1);

        let loaded = DaySummary::from_json(&summary.to_json().unwrap()).unwrap();
        assert_eq!(loaded, summary);
    }

    #[test]
    fn test_day_omitted_when_unscoped() {
        let summary = DaySummary::empty(None, ["pad_ms"]);
        let value: serde_json::Value = serde_json::from_str(&summary.to_json().unwrap()).unwrap();
        assert!(value.get("day").is_none());
    }
}
