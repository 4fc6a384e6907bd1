//! Core trait definitions for the pluggable metrics store
//!
//! The query engine never touches a storage format directly. It asks a
//! [`MetricsTableFactory`] for tables and scans them through these traits.

use crate::error::StorageError;
use crate::types::{AggregateRow, MetricsScanQuery, MetricsScanResult, Resolution};
use async_trait::async_trait;
use std::sync::Arc;

// =============================================================================
// TimeSeriesTable Trait
// =============================================================================

/// A table of per-bucket values at one resolution
#[async_trait]
pub trait TimeSeriesTable: Send + Sync + 'static {
    /// Resolution this table stores
    fn resolution(&self) -> Resolution;

    /// Scan every row matching the query prefixes within its time window
    ///
    /// Each returned row carries points strictly increasing in time. Rows are
    /// returned in no particular order.
    async fn scan(&self, query: &MetricsScanQuery) -> Result<Vec<MetricsScanResult>, StorageError>;
}

// =============================================================================
// AggregatesTable Trait
// =============================================================================

/// A table of running totals with no time dimension
#[async_trait]
pub trait AggregatesTable: Send + Sync + 'static {
    /// Scan every aggregate row matching the given prefixes
    async fn scan(
        &self,
        context: Option<&str>,
        metric: &str,
        run_id: Option<&str>,
        tag: Option<&str>,
    ) -> Result<Vec<AggregateRow>, StorageError>;
}

// =============================================================================
// MetricsTableFactory Trait
// =============================================================================

/// Constructs table handles for the query engine
#[async_trait]
pub trait MetricsTableFactory: Send + Sync + 'static {
    /// Create the time-series table for a resolution
    ///
    /// The table cache calls this at most once per resolution.
    async fn create_time_series(
        &self,
        resolution: Resolution,
    ) -> Result<Arc<dyn TimeSeriesTable>, StorageError>;

    /// Create the aggregates table, called once at engine startup
    fn create_aggregates(&self) -> Result<Arc<dyn AggregatesTable>, StorageError>;
}
