//! Field resolution
//!
//! Locates a metric's numeric value in a record regardless of which
//! spelling the producer used. Lookup runs in three stages and the first
//! hit wins:
//!
//! 1. the primary key, exactly as configured
//! 2. each alias in declaration order (`outer.inner` descends one map)
//! 3. a normalized match: lower-cased, non-alphanumerics stripped, over the
//!    record's keys and the keys one level inside nested maps
//!
//! A key whose value does not coerce to a number is treated as absent and
//! lookup moves on to the next candidate.

use crate::config::MetricSpec;
use crate::record::{FieldValue, Record};
use std::collections::{BTreeMap, HashSet};

/// Resolver for metric values in semi-structured records
pub struct FieldResolver;

impl FieldResolver {
    /// Resolve a metric by its configured keys
    pub fn resolve_metric(record: &Record, metric: &MetricSpec) -> Option<f64> {
        Self::resolve(record, &metric.primary_key, &metric.aliases)
    }

    /// Resolve `primary` (or any alias) in `record`
    pub fn resolve<S: AsRef<str>>(record: &Record, primary: &str, aliases: &[S]) -> Option<f64> {
        if let Some(v) = lookup_exact(record, primary) {
            return Some(v);
        }

        for alias in aliases {
            if let Some(v) = lookup_exact(record, alias.as_ref()) {
                return Some(v);
            }
        }

        let targets: HashSet<String> = std::iter::once(primary)
            .chain(aliases.iter().map(AsRef::as_ref))
            .map(normalize_key)
            .filter(|k| !k.is_empty())
            .collect();

        lookup_normalized(record, &targets)
    }
}

/// Coerce a field to a number: numbers pass through, strings must parse
/// completely as a float literal, anything else is a miss.
///
/// String parsing accepts `NaN` and `inf`; the aggregator rejects those.
pub fn coerce(value: &FieldValue) -> Option<f64> {
    match value {
        FieldValue::Number(n) => Some(*n),
        FieldValue::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

/// Lower-case and drop every non-alphanumeric character
pub fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn lookup_exact(record: &Record, key: &str) -> Option<f64> {
    if let Some(v) = record.get(key).and_then(coerce) {
        return Some(v);
    }

    let (outer, inner) = key.split_once('.')?;
    record
        .get(outer)
        .and_then(FieldValue::as_map)
        .and_then(|nested| nested.get(inner))
        .and_then(coerce)
}

fn lookup_normalized(record: &Record, targets: &HashSet<String>) -> Option<f64> {
    if targets.is_empty() {
        return None;
    }

    // Top-level keys take precedence over nested ones
    for (key, value) in record.iter() {
        if let Some(v) = match_normalized(key, value, targets) {
            return Some(v);
        }
    }

    record
        .iter()
        .filter_map(|(_, value)| value.as_map())
        .find_map(|nested| lookup_nested(nested, targets))
}

fn lookup_nested(nested: &BTreeMap<String, FieldValue>, targets: &HashSet<String>) -> Option<f64> {
    nested
        .iter()
        .find_map(|(key, value)| match_normalized(key, value, targets))
}

fn match_normalized(key: &str, value: &FieldValue, targets: &HashSet<String>) -> Option<f64> {
    if targets.contains(&normalize_key(key)) {
        coerce(value)
    } else {
        None
    }
}
