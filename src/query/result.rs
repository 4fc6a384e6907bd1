//! Query result types
//!
//! These serialize to the JSON bodies returned to clients:
//!
//! ```text
//! time series: { "start": 100, "end": 105, "data": [{ "time": 100, "value": 3 }, ...] }
//! aggregate:   { "data": 42 }
//! ```

use crate::types::TimeValue;
use serde::{Deserialize, Serialize};

// ============================================================================
// Result Types
// ============================================================================

/// Dense per-second answer to a time-series query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSeriesResponse {
    /// Requested start, seconds
    pub start: i64,

    /// Requested end, seconds
    pub end: i64,

    /// Exactly `count` points at `start, start + 1, ...`
    pub data: Vec<TimeValue>,
}

impl TimeSeriesResponse {
    /// Number of points
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the series has no points
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Single summed value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateResponse {
    /// Sum of every matching aggregate row
    pub data: i64,
}

/// Answer to one query, shaped by its kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryOutput {
    /// Dense per-second series
    TimeSeries(TimeSeriesResponse),
    /// Single summed value
    Aggregate(AggregateResponse),
}

impl QueryOutput {
    /// The time series, if this is one
    pub fn as_time_series(&self) -> Option<&TimeSeriesResponse> {
        match self {
            QueryOutput::TimeSeries(series) => Some(series),
            QueryOutput::Aggregate(_) => None,
        }
    }

    /// The aggregate value, if this is one
    pub fn as_aggregate(&self) -> Option<i64> {
        match self {
            QueryOutput::Aggregate(aggregate) => Some(aggregate.data),
            QueryOutput::TimeSeries(_) => None,
        }
    }
}

impl From<TimeSeriesResponse> for QueryOutput {
    fn from(series: TimeSeriesResponse) -> Self {
        QueryOutput::TimeSeries(series)
    }
}

impl From<AggregateResponse> for QueryOutput {
    fn from(aggregate: AggregateResponse) -> Self {
        QueryOutput::Aggregate(aggregate)
    }
}
