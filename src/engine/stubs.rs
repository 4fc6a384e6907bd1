//! In-memory implementations of the metrics store traits.
//!
//! These implementations are intended for:
//! - **Unit testing** without a real metrics backend
//! - **Integration testing** of the parser, engine and batch handler end to end
//! - **Local development**, seeded from a JSON fixture file
//!
//! # Matching rules
//!
//! A stored dotted name matches a prefix when it equals the prefix or continues
//! it with a `.`. An absent context prefix matches every context, an absent tag
//! prefix matches only untagged rows, and an absent run id matches every run.
//!
//! # Warning
//!
//! [`InMemoryMetricsStore`] loses all data on restart.
//!
//! # Example
//!
//! ```rust
//! use kuba_metrics_query::engine::stubs::{InMemoryMetricsStore, InMemoryTableFactory};
//! use std::sync::Arc;
//!
//! let store = Arc::new(InMemoryMetricsStore::new());
//! store.record("myapp.f.flow1", "tuples.read", None, None, 1000, 5);
//! store.increment_aggregate("myapp.f.flow1", "tuples.read", None, None, 5);
//!
//! let factory = InMemoryTableFactory::new(store);
//! assert_eq!(factory.time_series_loads(), 0);
//! ```

use crate::engine::traits::{AggregatesTable, MetricsTableFactory, TimeSeriesTable};
use crate::error::{Error, Result, StorageError};
use crate::types::{
    is_under_prefix, AggregateRow, MetricsScanQuery, MetricsScanResult, Resolution, TimeValue,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Identity of a stored row
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct RowKey {
    context: String,
    metric: String,
    tag: Option<String>,
    run_id: Option<String>,
}

impl RowKey {
    fn new(context: &str, metric: &str, tag: Option<&str>, run_id: Option<&str>) -> Self {
        Self {
            context: context.to_string(),
            metric: metric.to_string(),
            tag: tag.map(str::to_string),
            run_id: run_id.map(str::to_string),
        }
    }

    fn matches(
        &self,
        context: Option<&str>,
        metric: &str,
        tag: Option<&str>,
        run_id: Option<&str>,
    ) -> bool {
        let context_ok = context.map_or(true, |c| is_under_prefix(&self.context, c));
        let tag_ok = match (tag, self.tag.as_deref()) {
            (None, None) => true,
            (Some(prefix), Some(stored)) => is_under_prefix(stored, prefix),
            _ => false,
        };
        let run_ok = run_id.map_or(true, |r| self.run_id.as_deref() == Some(r));
        context_ok && tag_ok && run_ok && is_under_prefix(&self.metric, metric)
    }
}

/// Contents of a JSON fixture file
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MetricsFixture {
    /// Per-second rows
    #[serde(default)]
    pub time_series: Vec<MetricsScanResult>,
    /// Aggregate rows
    #[serde(default)]
    pub aggregates: Vec<AggregateRow>,
}

// =============================================================================
// In-Memory Metrics Store
// =============================================================================

/// Shared in-memory backing data for the stub tables
#[derive(Default)]
pub struct InMemoryMetricsStore {
    /// Per-second values: row -> (second -> value)
    time_series: RwLock<HashMap<RowKey, BTreeMap<i64, i64>>>,
    /// Running totals: row -> value
    aggregates: RwLock<HashMap<RowKey, i64>>,
}

impl InMemoryMetricsStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a fixture
    pub fn from_fixture(fixture: MetricsFixture) -> Self {
        let store = Self::new();
        for row in fixture.time_series {
            for point in row.points {
                store.record(
                    &row.context,
                    &row.metric,
                    row.tag.as_deref(),
                    row.run_id.as_deref(),
                    point.time,
                    point.value,
                );
            }
        }
        for row in fixture.aggregates {
            store.increment_aggregate(
                &row.context,
                &row.metric,
                row.tag.as_deref(),
                row.run_id.as_deref(),
                row.value,
            );
        }
        store
    }

    /// Load a JSON fixture file
    pub fn load_fixture(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let fixture: MetricsFixture = serde_json::from_str(&contents).map_err(|e| {
            Error::Configuration(format!(
                "invalid fixture {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Ok(Self::from_fixture(fixture))
    }

    /// Add `value` to the given second of a row
    pub fn record(
        &self,
        context: &str,
        metric: &str,
        tag: Option<&str>,
        run_id: Option<&str>,
        time: i64,
        value: i64,
    ) {
        let key = RowKey::new(context, metric, tag, run_id);
        let mut series = self.time_series.write();
        let slot = series.entry(key).or_default().entry(time).or_insert(0);
        *slot = slot.wrapping_add(value);
    }

    /// Add `delta` to an aggregate row
    pub fn increment_aggregate(
        &self,
        context: &str,
        metric: &str,
        tag: Option<&str>,
        run_id: Option<&str>,
        delta: i64,
    ) {
        let key = RowKey::new(context, metric, tag, run_id);
        let mut aggregates = self.aggregates.write();
        let slot = aggregates.entry(key).or_insert(0);
        *slot = slot.wrapping_add(delta);
    }

    /// Number of distinct per-second rows
    pub fn row_count(&self) -> usize {
        self.time_series.read().len()
    }

    fn scan_time_series(
        &self,
        query: &MetricsScanQuery,
        resolution: Resolution,
    ) -> Vec<MetricsScanResult> {
        if query.start_time > query.end_time {
            return Vec::new();
        }
        let width = i64::from(resolution.max(1));
        let series = self.time_series.read();
        let mut rows: Vec<MetricsScanResult> = series
            .iter()
            .filter(|(key, _)| {
                key.matches(
                    query.context.as_deref(),
                    &query.metric,
                    query.tag.as_deref(),
                    query.run_id.as_deref(),
                )
            })
            .filter_map(|(key, values)| {
                let mut buckets: BTreeMap<i64, i64> = BTreeMap::new();
                for (&time, &value) in values.range(query.start_time..=query.end_time) {
                    let slot = buckets
                        .entry(time.wrapping_sub(time.rem_euclid(width)))
                        .or_insert(0);
                    *slot = slot.wrapping_add(value);
                }
                if buckets.is_empty() {
                    return None;
                }
                Some(MetricsScanResult {
                    context: key.context.clone(),
                    metric: key.metric.clone(),
                    tag: key.tag.clone(),
                    run_id: key.run_id.clone(),
                    points: buckets
                        .into_iter()
                        .map(|(time, value)| TimeValue::new(time, value))
                        .collect(),
                })
            })
            .collect();
        // HashMap order is arbitrary; keep scans deterministic.
        rows.sort_by(|a, b| (&a.context, &a.metric, &a.tag).cmp(&(&b.context, &b.metric, &b.tag)));
        rows
    }

    fn scan_aggregates(
        &self,
        context: Option<&str>,
        metric: &str,
        run_id: Option<&str>,
        tag: Option<&str>,
    ) -> Vec<AggregateRow> {
        let aggregates = self.aggregates.read();
        let mut rows: Vec<AggregateRow> = aggregates
            .iter()
            .filter(|(key, _)| key.matches(context, metric, tag, run_id))
            .map(|(key, &value)| AggregateRow {
                context: key.context.clone(),
                metric: key.metric.clone(),
                tag: key.tag.clone(),
                run_id: key.run_id.clone(),
                value,
            })
            .collect();
        rows.sort_by(|a, b| (&a.context, &a.metric, &a.tag).cmp(&(&b.context, &b.metric, &b.tag)));
        rows
    }
}

// =============================================================================
// Stub Tables
// =============================================================================

/// Time-series table view over an [`InMemoryMetricsStore`]
pub struct InMemoryTimeSeriesTable {
    store: Arc<InMemoryMetricsStore>,
    resolution: Resolution,
}

impl InMemoryTimeSeriesTable {
    /// Create a table view at the given resolution
    pub fn new(store: Arc<InMemoryMetricsStore>, resolution: Resolution) -> Self {
        Self { store, resolution }
    }
}

#[async_trait]
impl TimeSeriesTable for InMemoryTimeSeriesTable {
    fn resolution(&self) -> Resolution {
        self.resolution
    }

    async fn scan(&self, query: &MetricsScanQuery) -> std::result::Result<Vec<MetricsScanResult>, StorageError> {
        Ok(self.store.scan_time_series(query, self.resolution))
    }
}

/// Aggregates table view over an [`InMemoryMetricsStore`]
pub struct InMemoryAggregatesTable {
    store: Arc<InMemoryMetricsStore>,
}

impl InMemoryAggregatesTable {
    /// Create an aggregates table view
    pub fn new(store: Arc<InMemoryMetricsStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AggregatesTable for InMemoryAggregatesTable {
    async fn scan(
        &self,
        context: Option<&str>,
        metric: &str,
        run_id: Option<&str>,
        tag: Option<&str>,
    ) -> std::result::Result<Vec<AggregateRow>, StorageError> {
        Ok(self.store.scan_aggregates(context, metric, run_id, tag))
    }
}

// =============================================================================
// Stub Factory
// =============================================================================

/// Table factory over an [`InMemoryMetricsStore`]
///
/// Counts how many time-series tables it has built, and can be told to
/// stall or fail table construction so cache behaviour can be observed.
pub struct InMemoryTableFactory {
    store: Arc<InMemoryMetricsStore>,
    time_series_loads: AtomicU64,
    load_delay: Option<Duration>,
    failing_resolutions: RwLock<HashSet<Resolution>>,
}

impl InMemoryTableFactory {
    /// Create a factory over a store
    pub fn new(store: Arc<InMemoryMetricsStore>) -> Self {
        Self {
            store,
            time_series_loads: AtomicU64::new(0),
            load_delay: None,
            failing_resolutions: RwLock::new(HashSet::new()),
        }
    }

    /// Sleep for `delay` inside every table construction
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = Some(delay);
        self
    }

    /// Make construction fail for a resolution until [`Self::heal`] is called
    pub fn fail_resolution(&self, resolution: Resolution) {
        self.failing_resolutions.write().insert(resolution);
    }

    /// Stop failing construction for a resolution
    pub fn heal(&self, resolution: Resolution) {
        self.failing_resolutions.write().remove(&resolution);
    }

    /// Number of time-series tables constructed so far
    pub fn time_series_loads(&self) -> u64 {
        self.time_series_loads.load(Ordering::SeqCst)
    }

    /// The backing store
    pub fn store(&self) -> &Arc<InMemoryMetricsStore> {
        &self.store
    }
}

#[async_trait]
impl MetricsTableFactory for InMemoryTableFactory {
    async fn create_time_series(
        &self,
        resolution: Resolution,
    ) -> std::result::Result<Arc<dyn TimeSeriesTable>, StorageError> {
        self.time_series_loads.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.load_delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_resolutions.read().contains(&resolution) {
            return Err(StorageError::TableLoad {
                resolution,
                message: "injected failure".to_string(),
            });
        }
        debug!(resolution, "Created in-memory time-series table");
        Ok(Arc::new(InMemoryTimeSeriesTable::new(
            self.store.clone(),
            resolution,
        )))
    }

    fn create_aggregates(&self) -> std::result::Result<Arc<dyn AggregatesTable>, StorageError> {
        Ok(Arc::new(InMemoryAggregatesTable::new(self.store.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn populated_store() -> Arc<InMemoryMetricsStore> {
        let store = Arc::new(InMemoryMetricsStore::new());
        store.record("app.f.flow1.a", "tuples.read", None, None, 100, 1);
        store.record("app.f.flow1.a", "tuples.read", None, None, 102, 3);
        store.record("app.f.flow1.b", "tuples.read", None, None, 101, 2);
        store.record("app.f.flow10.a", "tuples.read", None, None, 101, 50);
        store.record("app.f.flow1.a", "tuples.read", Some("s1"), None, 101, 7);
        store
    }

    #[tokio::test]
    async fn test_scan_matches_context_prefix_on_segment_boundary() {
        let table = InMemoryTimeSeriesTable::new(populated_store(), 1);
        let query = MetricsScanQuery::builder()
            .context("app.f.flow1")
            .metric("tuples.read")
            .build(0, 1000);

        let rows = table.scan(&query).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].context, "app.f.flow1.a");
        assert_eq!(rows[0].points, vec![TimeValue::new(100, 1), TimeValue::new(102, 3)]);
        assert_eq!(rows[1].points, vec![TimeValue::new(101, 2)]);
    }

    #[tokio::test]
    async fn test_scan_tag_filter() {
        let table = InMemoryTimeSeriesTable::new(populated_store(), 1);
        let query = MetricsScanQuery::builder()
            .metric("tuples.read")
            .maybe_tag(Some("s1"))
            .build(0, 1000);

        let rows = table.scan(&query).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].points, vec![TimeValue::new(101, 7)]);
    }

    #[tokio::test]
    async fn test_scan_respects_time_window_and_resolution() {
        let store = populated_store();
        let query = MetricsScanQuery::builder()
            .context("app.f.flow1.a")
            .metric("tuples.read")
            .build(101, 200);
        let rows = InMemoryTimeSeriesTable::new(store.clone(), 1)
            .scan(&query)
            .await
            .unwrap();
        assert_eq!(rows[0].points, vec![TimeValue::new(102, 3)]);

        let query = MetricsScanQuery::builder()
            .context("app.f.flow1")
            .metric("tuples.read")
            .build(0, 200);
        let rows = InMemoryTimeSeriesTable::new(store, 60).scan(&query).await.unwrap();
        assert_eq!(rows[0].points, vec![TimeValue::new(60, 4)]);
    }

    #[tokio::test]
    async fn test_aggregate_scan_run_filter() {
        let store = Arc::new(InMemoryMetricsStore::new());
        store.increment_aggregate("app.b.job1", "records", None, Some("run1"), 10);
        store.increment_aggregate("app.b.job1", "records", None, Some("run2"), 5);
        let table = InMemoryAggregatesTable::new(store);

        let all = table.scan(Some("app"), "records", None, None).await.unwrap();
        assert_eq!(all.len(), 2);
        let one = table
            .scan(Some("app"), "records", Some("run2"), None)
            .await
            .unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].value, 5);
    }

    #[tokio::test]
    async fn test_factory_failure_injection() {
        let factory = InMemoryTableFactory::new(Arc::new(InMemoryMetricsStore::new()));
        factory.fail_resolution(1);
        assert!(factory.create_time_series(1).await.is_err());
        factory.heal(1);
        assert!(factory.create_time_series(1).await.is_ok());
        assert_eq!(factory.time_series_loads(), 2);
    }

    #[test]
    fn test_fixture_round_trip() {
        let fixture: MetricsFixture = serde_json::from_str(
            r#"{
                "time_series": [
                    {"context": "app", "metric": "bytes", "points": [{"time": 1, "value": 2}]}
                ],
                "aggregates": [
                    {"context": "app", "metric": "bytes", "value": 9}
                ]
            }"#,
        )
        .unwrap();
        let store = InMemoryMetricsStore::from_fixture(fixture);
        assert_eq!(store.row_count(), 1);
        assert_eq!(store.scan_aggregates(Some("app"), "bytes", None, None)[0].value, 9);
    }
}
