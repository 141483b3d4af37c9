//! Text-to-metric parsing for remote command output.
//!
//! The remote tool prints free text with embedded `label: number` tokens.
//! This module extracts those tokens into a typed, ordered map. Parsing is a
//! pure function so it can be tested without any remote host.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;

use crate::selector::MonitorTarget;

/// Matches a word label, a colon, optional whitespace and a signed integer
/// or decimal numeral. Not anchored to line starts.
static METRIC_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\w+):\s*([+-]?(?:[0-9]+(?:\.[0-9]*)?|\.[0-9]+))")
        .expect("metric token pattern is valid")
});

/// A numeric value extracted from text, keeping its integer/float kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Int(i64),
    /// An integer numeral outside the `i64` range, kept at `f64` precision.
    WideInt(f64),
    Float(f64),
}

impl MetricValue {
    /// Value as a gauge sample.
    pub fn as_f64(&self) -> f64 {
        match *self {
            MetricValue::Int(v) => v as f64,
            MetricValue::WideInt(v) | MetricValue::Float(v) => v,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, MetricValue::Float(_))
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Int(v) => write!(f, "{v}"),
            MetricValue::WideInt(v) => write!(f, "{v:.0}"),
            MetricValue::Float(v) => write!(f, "{v}"),
        }
    }
}

/// Normalized key to value. Ordered by key so iteration is deterministic.
///
/// When the same normalized key appears more than once in the source text,
/// the value of the last occurrence (by text position) is kept.
pub type ParsedMetrics = BTreeMap<String, MetricValue>;

/// Lowercases a label and replaces interior whitespace with underscores.
pub fn normalize_key(label: &str) -> String {
    label
        .trim()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}

/// Classifies and converts a matched numeral.
///
/// Integers that do not fit `i64` stay integer-kind as [`MetricValue::WideInt`].
/// Returns `None` only for a numeral that is not finite as `f64`.
pub fn parse_numeral(numeral: &str) -> Option<MetricValue> {
    let as_float = || numeral.parse::<f64>().ok().filter(|v| v.is_finite());
    if numeral.contains(['.', 'e', 'E']) {
        as_float().map(MetricValue::Float)
    } else {
        match numeral.parse::<i64>() {
            Ok(v) => Some(MetricValue::Int(v)),
            Err(_) => as_float().map(MetricValue::WideInt),
        }
    }
}

/// Extracts every `label: number` token from `text`.
///
/// Returns an empty map when nothing matches; callers treat that as a
/// distinct condition from a populated result.
pub fn parse_metrics(text: &str) -> ParsedMetrics {
    let mut metrics = ParsedMetrics::new();

    for caps in METRIC_TOKEN.captures_iter(text) {
        let (Some(label), Some(numeral)) = (caps.get(1), caps.get(2)) else {
            continue;
        };

        match parse_numeral(numeral.as_str()) {
            Some(value) => {
                metrics.insert(normalize_key(label.as_str()), value);
            }
            None => {
                tracing::trace!(
                    "Dropping unrepresentable value for {}: {}",
                    label.as_str(),
                    numeral.as_str()
                );
            }
        }
    }

    metrics
}

/// Marker that opens a section of a batched report.
const BLOCK_MARKER: &str = "->";

/// One `-> type:revision` section of a batched report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportBlock<'a> {
    pub target: MonitorTarget,
    /// Text following the header, up to the next marker.
    pub body: &'a str,
}

/// Splits a batched report into per-target sections.
///
/// Each section starts with `->` followed by a `type:revision` word; the
/// rest of the section is its body. Text before the first marker and
/// sections whose header is not a single `type:revision` pair are skipped.
pub fn split_report_blocks(text: &str) -> Vec<ReportBlock<'_>> {
    text.split(BLOCK_MARKER)
        .skip(1)
        .filter_map(|section| {
            let section = section.trim_start();
            let header_end = section
                .find(char::is_whitespace)
                .unwrap_or(section.len());
            let (header, body) = section.split_at(header_end);

            match header.split_once(':') {
                Some((type_name, revision))
                    if !type_name.is_empty()
                        && !revision.is_empty()
                        && !revision.contains(':') =>
                {
                    Some(ReportBlock {
                        target: MonitorTarget::new(type_name, revision),
                        body,
                    })
                }
                _ => {
                    tracing::debug!("Skipping report section with header {:?}", header);
                    None
                }
            }
        })
        .collect()
}
