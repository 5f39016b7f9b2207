//! Reading records from JSON text
//!
//! NDJSON input is read lazily, one line at a time, so arbitrarily long
//! exports can be folded without holding every record in memory.

use crate::error::AggregateError;
use crate::record::value::Record;

/// Parse a JSON array of record objects
pub fn parse_array(json: &str) -> Result<Vec<Record>, AggregateError> {
    let values: Vec<serde_json::Value> = serde_json::from_str(json)?;
    values
        .into_iter()
        .enumerate()
        .map(|(idx, value)| {
            Record::from_value(value).map_err(|e| {
                AggregateError::Parse(format!("Failed to parse record {}: {}", idx, e))
            })
        })
        .collect()
}

/// Parse one live-feed line: either a JSON array (a full batch) or a
/// single object (a batch of one)
pub fn parse_batch(line: &str) -> Result<Vec<Record>, AggregateError> {
    let trimmed = line.trim();
    if trimmed.starts_with('[') {
        parse_array(trimmed)
    } else {
        Ok(vec![Record::from_json(trimmed)?])
    }
}

/// Lazily iterate the records of an NDJSON document.
///
/// Blank lines are skipped. A malformed line yields an error carrying its
/// 1-based line number; iteration may continue past it.
pub fn ndjson_records(ndjson: &str) -> NdjsonRecords<'_> {
    NdjsonRecords {
        lines: ndjson.lines().enumerate(),
    }
}

/// Iterator returned by [`ndjson_records`]
pub struct NdjsonRecords<'a> {
    lines: std::iter::Enumerate<std::str::Lines<'a>>,
}

impl Iterator for NdjsonRecords<'_> {
    type Item = Result<Record, AggregateError>;

    fn next(&mut self) -> Option<Self::Item> {
        for (line_num, line) in self.lines.by_ref() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            return Some(Record::from_json(trimmed).map_err(|e| {
                AggregateError::Parse(format!("Failed to parse line {}: {}", line_num + 1, e))
            }));
        }
        None
    }
}

/// Parse a whole NDJSON document, failing on the first bad line
pub fn parse_ndjson(ndjson: &str) -> Result<Vec<Record>, AggregateError> {
    ndjson_records(ndjson).collect()
}
