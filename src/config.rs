//! Aggregation configuration
//!
//! Tracked metrics, the event filter applied before folding, and the
//! paging/live cadence. Loaded from JSON with environment overrides.

use crate::error::AggregateError;
use crate::record::Record;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Default page size for paged record sources
pub const DEFAULT_PAGE_SIZE: usize = 500;

/// Default minimum spacing between live publications (4 updates per second)
pub const DEFAULT_LIVE_MIN_INTERVAL_MS: u64 = 250;

/// Default key carrying the record's event-type tag
pub const DEFAULT_EVENT_KEY: &str = "event";

/// A tracked metric and every spelling it may appear under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricSpec {
    /// Logical metric name, used as the key in day summaries
    pub name: String,
    /// Canonical record key
    pub primary_key: String,
    /// Alternative spellings, checked in order; `outer.inner` descends one
    /// nested map
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl MetricSpec {
    pub fn new(name: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: primary_key.into(),
            aliases: Vec::new(),
        }
    }

    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases = aliases.into_iter().map(Into::into).collect();
        self
    }

    /// Amplitude ratio between the two PPG channels
    pub fn amp_ratio() -> Self {
        Self::new("amp_ratio", "AmpRatio").with_aliases([
            "ampratio",
            "Amp_Ratio",
            "amp_ratio",
            "ARatio",
            "metrics.AmpRatio",
            "metrics.amp_ratio",
        ])
    }

    /// Pulse-arrival delay in milliseconds
    pub fn pad_ms() -> Self {
        Self::new("pad_ms", "PAD_ms").with_aliases([
            "pad_ms",
            "PAD",
            "padMs",
            "pulse_arrival_delay_ms",
            "metrics.PAD_ms",
            "metrics.pad_ms",
        ])
    }

    /// Rise-time delta in milliseconds
    pub fn dsut_ms() -> Self {
        Self::new("dsut_ms", "dSUT_ms").with_aliases([
            "dsut_ms",
            "dSUT",
            "dSut_ms",
            "rise_time_delta_ms",
            "metrics.dSUT_ms",
            "metrics.dsut_ms",
        ])
    }
}

/// Configuration shared by paged and live aggregation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Metrics to summarize
    pub metrics: Vec<MetricSpec>,
    /// Record key holding the event-type tag
    pub event_key: String,
    /// Event tags accepted by the fold; empty accepts every record
    pub allowed_events: Vec<String>,
    /// Records requested per page
    pub page_size: usize,
    /// Minimum time between two live publications (milliseconds)
    pub live_min_interval_ms: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            metrics: vec![
                MetricSpec::amp_ratio(),
                MetricSpec::pad_ms(),
                MetricSpec::dsut_ms(),
            ],
            event_key: DEFAULT_EVENT_KEY.to_string(),
            allowed_events: vec!["ALERT".to_string()],
            page_size: DEFAULT_PAGE_SIZE,
            live_min_interval_ms: DEFAULT_LIVE_MIN_INTERVAL_MS,
        }
    }
}

impl AggregatorConfig {
    /// Load configuration from JSON; omitted fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, AggregateError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to pretty JSON
    pub fn to_json(&self) -> Result<String, AggregateError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check structural invariants
    pub fn validate(&self) -> Result<(), AggregateError> {
        if self.metrics.is_empty() {
            return Err(AggregateError::InvalidConfig(
                "at least one metric must be tracked".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for metric in &self.metrics {
            if metric.name.trim().is_empty() {
                return Err(AggregateError::InvalidConfig(
                    "metric name must not be empty".to_string(),
                ));
            }
            if metric.primary_key.trim().is_empty() {
                return Err(AggregateError::InvalidConfig(format!(
                    "metric {} has an empty primary key",
                    metric.name
                )));
            }
            if !names.insert(metric.name.as_str()) {
                return Err(AggregateError::InvalidConfig(format!(
                    "duplicate metric name: {}",
                    metric.name
                )));
            }
        }

        if self.page_size == 0 {
            return Err(AggregateError::InvalidConfig(
                "page_size must be positive".to_string(),
            ));
        }
        if self.live_min_interval_ms == 0 {
            return Err(AggregateError::InvalidConfig(
                "live_min_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply `HEARTSYNC_*` environment overrides, ignoring unparseable values
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("HEARTSYNC_PAGE_SIZE").and_then(|v| v.parse().ok()) {
            self.page_size = v;
        }

        if let Some(v) = lookup("HEARTSYNC_LIVE_MIN_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            self.live_min_interval_ms = v;
        }

        if let Some(v) = lookup("HEARTSYNC_EVENT_KEY") {
            if !v.trim().is_empty() {
                self.event_key = v.trim().to_string();
            }
        }

        if let Some(v) = lookup("HEARTSYNC_ALLOWED_EVENTS") {
            self.allowed_events = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
    }

    pub fn live_min_interval(&self) -> Duration {
        Duration::from_millis(self.live_min_interval_ms)
    }

    /// Whether a record's event tag passes the configured filter
    pub fn accepts_event(&self, tag: Option<&str>) -> bool {
        if self.allowed_events.is_empty() {
            return true;
        }
        tag.is_some_and(|t| self.allowed_events.iter().any(|a| a == t))
    }

    /// Whether `record` passes the event filter
    pub fn accepts(&self, record: &Record) -> bool {
        self.accepts_event(record.tag(&self.event_key))
    }

    pub fn metric_names(&self) -> impl Iterator<Item = &str> {
        self.metrics.iter().map(|m| m.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_tracks_three_metrics() {
        let config = AggregatorConfig::default();
        let names: Vec<&str> = config.metric_names().collect();
        assert_eq!(names, vec!["amp_ratio", "pad_ms", "dsut_ms"]);
        assert!(config.validate().is_ok());
        assert_eq!(config.live_min_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = AggregatorConfig::from_json(r#"{"page_size": 50}"#).unwrap();
        assert_eq!(config.page_size, 50);
        assert_eq!(config.metrics.len(), 3);
        assert_eq!(config.event_key, "event");
    }

    #[test]
    fn test_json_roundtrip_keeps_aliases() {
        let config = AggregatorConfig::default();
        let loaded = AggregatorConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_validation_errors() {
        let config = AggregatorConfig {
            metrics: vec![],
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = AggregatorConfig {
            metrics: vec![MetricSpec::amp_ratio(), MetricSpec::amp_ratio()],
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate"));

        let config = AggregatorConfig {
            metrics: vec![MetricSpec::new("x", "")],
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = AggregatorConfig {
            page_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("HEARTSYNC_PAGE_SIZE", "100"),
            ("HEARTSYNC_LIVE_MIN_INTERVAL_MS", "oops"),
            ("HEARTSYNC_ALLOWED_EVENTS", "ALERT, STAT,,"),
        ]
        .into_iter()
        .collect();

        let mut config = AggregatorConfig::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.page_size, 100);
        assert_eq!(config.live_min_interval_ms, DEFAULT_LIVE_MIN_INTERVAL_MS);
        assert_eq!(config.allowed_events, vec!["ALERT", "STAT"]);
    }

    #[test]
    fn test_accepts_event() {
        let mut config = AggregatorConfig::default();
        assert!(config.accepts_event(Some("ALERT")));
        assert!(!config.accepts_event(Some("STAT")));
        assert!(!config.accepts_event(None));

        config.allowed_events.clear();
        assert!(config.accepts_event(None));
    }
}
