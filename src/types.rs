//! Core data types shared by the parser, engine and storage collaborators
//!
//! # Key Types
//!
//! - **`TimeValue`**: A single one-second measurement (timestamp + integer value)
//! - **`Resolution`**: Time-bucket granularity used to pick a time-series table
//! - **`MetricsScanQuery`**: The key range handed to a table scan
//! - **`MetricsScanResult`**: One stored row returned by a scan
//! - **`AggregateRow`**: One row of the aggregates table
//!
//! # Example
//!
//! ```rust
//! use kuba_metrics_query::types::MetricsScanQuery;
//!
//! let query = MetricsScanQuery::builder()
//!     .context("myapp.f.flow1")
//!     .metric("tuples.read")
//!     .build(1000, 1059);
//! assert_eq!(query.start_time, 1000);
//! assert!(query.tag.is_none());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Time-bucket granularity, in seconds, of a time-series table
pub type Resolution = u32;

/// Resolution of the per-second table used by all time-series queries
pub const SECOND_RESOLUTION: Resolution = 1;

/// A single value at a one-second timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeValue {
    /// Unix timestamp in seconds
    pub time: i64,
    /// Counter value for that second
    pub value: i64,
}

impl TimeValue {
    /// Create a new time value
    pub fn new(time: i64, value: i64) -> Self {
        Self { time, value }
    }
}

impl fmt::Display for TimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.value, self.time)
    }
}

/// Key range passed to a time-series table scan
///
/// `context`, `metric` and `tag` are dotted prefixes. Time bounds are inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricsScanQuery {
    /// Context prefix (`None` scans every context)
    pub context: Option<String>,
    /// Metric prefix
    pub metric: String,
    /// Tag prefix (`None` scans untagged rows only)
    pub tag: Option<String>,
    /// Run id filter (`None` scans every run)
    pub run_id: Option<String>,
    /// Inclusive start, seconds
    pub start_time: i64,
    /// Inclusive end, seconds
    pub end_time: i64,
}

impl MetricsScanQuery {
    /// Start building a scan query
    pub fn builder() -> MetricsScanQueryBuilder {
        MetricsScanQueryBuilder::default()
    }

    /// Whether a timestamp falls inside the scanned window
    pub fn covers(&self, time: i64) -> bool {
        time >= self.start_time && time <= self.end_time
    }
}

/// Builder for [`MetricsScanQuery`]
#[derive(Debug, Default, Clone)]
pub struct MetricsScanQueryBuilder {
    context: Option<String>,
    metric: String,
    tag: Option<String>,
    run_id: Option<String>,
}

impl MetricsScanQueryBuilder {
    /// Set the context prefix
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Set the context prefix from an optional value
    pub fn maybe_context(mut self, context: Option<&str>) -> Self {
        self.context = context.map(str::to_string);
        self
    }

    /// Set the metric prefix
    pub fn metric(mut self, metric: impl Into<String>) -> Self {
        self.metric = metric.into();
        self
    }

    /// Set the tag prefix from an optional value
    pub fn maybe_tag(mut self, tag: Option<&str>) -> Self {
        self.tag = tag.map(str::to_string);
        self
    }

    /// Set the run id filter from an optional value
    pub fn maybe_run_id(mut self, run_id: Option<&str>) -> Self {
        self.run_id = run_id.map(str::to_string);
        self
    }

    /// Finish with an inclusive time window
    pub fn build(self, start_time: i64, end_time: i64) -> MetricsScanQuery {
        MetricsScanQuery {
            context: self.context,
            metric: self.metric,
            tag: self.tag,
            run_id: self.run_id,
            start_time,
            end_time,
        }
    }
}

/// One stored row matched by a scan, with its points sorted by time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsScanResult {
    /// Full context of the row
    pub context: String,
    /// Full metric name of the row
    pub metric: String,
    /// Tag of the row, if any
    #[serde(default)]
    pub tag: Option<String>,
    /// Run id of the row, if any
    #[serde(default)]
    pub run_id: Option<String>,
    /// Points, strictly increasing in time
    pub points: Vec<TimeValue>,
}

/// One row of the aggregates table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateRow {
    /// Full context of the row
    pub context: String,
    /// Full metric name of the row
    pub metric: String,
    /// Tag of the row, if any
    #[serde(default)]
    pub tag: Option<String>,
    /// Run id of the row, if any
    #[serde(default)]
    pub run_id: Option<String>,
    /// Accumulated value
    pub value: i64,
}

/// Whether a dotted name lies under a dotted prefix
///
/// `a.b.c` is under `a.b` and `a.b.c`, but not under `a.bc` or `a.b.cd`.
/// Every name is under the empty prefix.
pub fn is_under_prefix(name: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    match name.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('.'),
        None => false,
    }
}
