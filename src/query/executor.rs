//! Scan & Aggregation Engine
//!
//! Turns a [`QueryDescriptor`] into table scans and shapes the rows into a
//! [`QueryOutput`].
//!
//! # Execution
//!
//! ```text
//! QueryDescriptor
//!      │
//!      ├── Aggregate ──► aggregates table scan ──► sum
//!      │
//!      └── TimeSeries ─► TableCache::get(resolution)
//!                             │
//!                             ├── Named ────► scan ──► merge rows ──► dense fill
//!                             │
//!                             └── Busyness ─► scan tuples.read ─┐
//!                                             scan events.processed ─┴► lock-step ratio
//! ```
//!
//! Every scan honours the descriptor's run id. The busyness inputs are read
//! with no tag.

use super::request::{MetricSelector, QueryDescriptor, QueryKind};
use super::result::{AggregateResponse, QueryOutput, TimeSeriesResponse};
use crate::aggregation::merge::{fill_dense, ratio_series, TimeValueAggregator};
use crate::cache::TableCache;
use crate::config::QueryConfig;
use crate::engine::traits::{AggregatesTable, MetricsTableFactory, TimeSeriesTable};
use crate::error::Result;
use crate::metrics;
use crate::types::{MetricsScanQuery, Resolution, TimeValue};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Busyness numerator metric
pub const BUSYNESS_NUMERATOR: &str = "tuples.read";

/// Busyness denominator metric
pub const BUSYNESS_DENOMINATOR: &str = "events.processed";

/// Executes parsed metrics queries against the injected tables
pub struct MetricsQueryEngine {
    tables: TableCache,
    aggregates: Arc<dyn AggregatesTable>,
    resolution: Resolution,
}

impl MetricsQueryEngine {
    /// Create an engine reading time series at `resolution`
    ///
    /// The aggregates table is created here, once, and shared by every query.
    /// Time-series tables are created lazily by the table cache.
    pub fn new(factory: Arc<dyn MetricsTableFactory>, resolution: Resolution) -> Result<Self> {
        let aggregates = factory.create_aggregates()?;
        Ok(Self {
            tables: TableCache::new(factory),
            aggregates,
            resolution,
        })
    }

    /// Create an engine from the `[query]` configuration section
    pub fn from_config(factory: Arc<dyn MetricsTableFactory>, config: &QueryConfig) -> Result<Self> {
        Self::new(factory, config.resolution)
    }

    /// Resolution of the time-series table this engine reads
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// The table cache backing time-series queries
    pub fn table_cache(&self) -> &TableCache {
        &self.tables
    }

    /// Execute one query
    pub async fn execute(&self, query: &QueryDescriptor) -> Result<QueryOutput> {
        let started = Instant::now();
        let result = match query.kind {
            QueryKind::Aggregate => self.execute_aggregate(query).await,
            QueryKind::TimeSeries => self.execute_time_series(query).await,
        };
        metrics::record_query(
            query.kind.flag(),
            result.is_ok(),
            started.elapsed().as_secs_f64(),
        );
        result
    }

    async fn execute_aggregate(&self, query: &QueryDescriptor) -> Result<QueryOutput> {
        let rows = self
            .aggregates
            .scan(
                query.context(),
                query.metric_prefix(),
                query.run_id.as_deref(),
                query.tag(),
            )
            .await?;
        // Totals wrap on overflow like the stored counters.
        let data = rows.iter().fold(0i64, |sum, row| sum.wrapping_add(row.value));

        debug!(
            uri = %query.source_uri,
            rows = rows.len(),
            "Executed aggregate query"
        );
        Ok(AggregateResponse { data }.into())
    }

    async fn execute_time_series(&self, query: &QueryDescriptor) -> Result<QueryOutput> {
        let table = self.tables.get(self.resolution).await?;

        let data = match &query.metric {
            MetricSelector::Named(metric) => {
                let points = scan_merged(table.as_ref(), query, metric, query.tag()).await?;
                fill_dense(&points, query.start_time, query.count)
            },
            MetricSelector::Busyness => {
                let numerator =
                    scan_merged(table.as_ref(), query, BUSYNESS_NUMERATOR, None).await?;
                let denominator =
                    scan_merged(table.as_ref(), query, BUSYNESS_DENOMINATOR, None).await?;
                ratio_series(&numerator, &denominator, query.start_time, query.count)
            },
        };

        debug!(
            uri = %query.source_uri,
            count = query.count,
            busyness = query.metric.is_busyness(),
            "Executed time-series query"
        );
        Ok(TimeSeriesResponse {
            start: query.start_time,
            end: query.end_time,
            data,
        }
        .into())
    }
}

/// Scan one metric over the query window and merge the matching rows
async fn scan_merged(
    table: &dyn TimeSeriesTable,
    query: &QueryDescriptor,
    metric: &str,
    tag: Option<&str>,
) -> Result<Vec<TimeValue>> {
    let scan = MetricsScanQuery::builder()
        .maybe_context(query.context())
        .metric(metric)
        .maybe_tag(tag)
        .maybe_run_id(query.run_id.as_deref())
        .build(query.start_time, query.end_time);

    let rows = table.scan(&scan).await?;
    Ok(TimeValueAggregator::new(rows.into_iter().map(|row| row.points).collect()).merge())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::stubs::{InMemoryMetricsStore, InMemoryTableFactory};
    use crate::error::{Error, StorageError};
    use crate::query::parser::RequestParser;
    use crate::types::SECOND_RESOLUTION;

    const NOW: i64 = 10_002;

    fn engine_over(store: Arc<InMemoryMetricsStore>) -> (Arc<InMemoryTableFactory>, MetricsQueryEngine) {
        let factory = Arc::new(InMemoryTableFactory::new(store));
        let engine = MetricsQueryEngine::new(factory.clone(), SECOND_RESOLUTION).unwrap();
        (factory, engine)
    }

    fn query(uri: &str) -> QueryDescriptor {
        RequestParser::new(2).parse_at(uri, NOW).unwrap()
    }

    fn values(output: &QueryOutput) -> Vec<i64> {
        output
            .as_time_series()
            .unwrap()
            .data
            .iter()
            .map(|tv| tv.value)
            .collect()
    }

    #[tokio::test]
    async fn test_aggregate_sums_matching_rows() {
        let store = Arc::new(InMemoryMetricsStore::new());
        store.increment_aggregate("myapp.f.flow1.a", "tuples.read", None, None, 10);
        store.increment_aggregate("myapp.f.flow1.b", "tuples.read", None, None, 32);
        store.increment_aggregate("myapp.f.flow2.a", "tuples.read", None, None, 1000);
        let (_, engine) = engine_over(store);

        let output = engine
            .execute(&query("process/tuples.read/myapp/flows/flow1?aggregate=true"))
            .await
            .unwrap();
        assert_eq!(output.as_aggregate(), Some(42));
    }

    #[tokio::test]
    async fn test_aggregate_empty_is_zero() {
        let (_, engine) = engine_over(Arc::new(InMemoryMetricsStore::new()));
        let output = engine
            .execute(&query("collect/bytes/apps/nothing?aggregate=true"))
            .await
            .unwrap();
        assert_eq!(output.as_aggregate(), Some(0));
    }

    #[tokio::test]
    async fn test_aggregate_filters_by_run_id() {
        let store = Arc::new(InMemoryMetricsStore::new());
        store.increment_aggregate("myapp.b.job1", "records", None, Some("run1"), 5);
        store.increment_aggregate("myapp.b.job1", "records", None, Some("run2"), 7);
        let (_, engine) = engine_over(store);

        let all = engine
            .execute(&query("process/records/myapp/batch/job1?aggregate=true"))
            .await
            .unwrap();
        assert_eq!(all.as_aggregate(), Some(12));

        let one = engine
            .execute(&query("process/records/myapp/batch/job1?aggregate=true&run_id=run2"))
            .await
            .unwrap();
        assert_eq!(one.as_aggregate(), Some(7));
    }

    #[tokio::test]
    async fn test_aggregate_sum_wraps_on_overflow() {
        let store = Arc::new(InMemoryMetricsStore::new());
        store.increment_aggregate("myapp.a", "bytes", None, None, i64::MAX);
        store.increment_aggregate("myapp.b", "bytes", None, None, 1);
        let (_, engine) = engine_over(store);

        let output = engine
            .execute(&query("collect/bytes/apps/myapp?aggregate=true"))
            .await
            .unwrap();
        assert_eq!(output.as_aggregate(), Some(i64::MIN));
    }

    #[tokio::test]
    async fn test_time_series_at_extreme_times() {
        let store = Arc::new(InMemoryMetricsStore::new());
        store.record("myapp", "bytes", None, None, i64::MAX, 6);
        store.record("myapp", "tuples.read", None, None, i64::MAX, 1);
        store.record("myapp", "events.processed", None, None, i64::MAX, 2);
        let (_, engine) = engine_over(store);

        let output = engine
            .execute(&query(
                "collect/bytes/apps/myapp?count=3&start=9223372036854775807&end=9223372036854775807",
            ))
            .await
            .unwrap();
        assert_eq!(values(&output), vec![6, 0, 0]);

        let output = engine
            .execute(&query(
                "process/busyness/myapp?count=2&start=9223372036854775807&end=9223372036854775807",
            ))
            .await
            .unwrap();
        assert_eq!(values(&output), vec![50, 0]);

        let output = engine
            .execute(&query("collect/bytes/apps/myapp?count=5&end=-9223372036854775807"))
            .await
            .unwrap();
        assert_eq!(values(&output), vec![0; 5]);
    }

    #[tokio::test]
    async fn test_time_series_is_dense() {
        let store = Arc::new(InMemoryMetricsStore::new());
        store.record("myapp", "bytes", None, None, 9_996, 4);
        store.record("myapp", "bytes", None, None, 9_998, 8);
        let (factory, engine) = engine_over(store);

        // end = 10_000, start = 9_995
        let output = engine
            .execute(&query("collect/bytes/apps/myapp?count=5"))
            .await
            .unwrap();
        let series = output.as_time_series().unwrap();
        assert_eq!(series.start, 9_995);
        assert_eq!(series.end, 10_000);
        let times: Vec<i64> = series.data.iter().map(|tv| tv.time).collect();
        assert_eq!(times, vec![9_995, 9_996, 9_997, 9_998, 9_999]);
        assert_eq!(values(&output), vec![0, 4, 0, 8, 0]);
        assert_eq!(factory.time_series_loads(), 1);
    }

    #[tokio::test]
    async fn test_time_series_merges_rows_under_prefix() {
        let store = Arc::new(InMemoryMetricsStore::new());
        store.record("myapp.f.flow1.reader", "tuples.read", None, None, 100, 1);
        store.record("myapp.f.flow1.writer", "tuples.read", None, None, 100, 2);
        store.record("myapp.f.flow1.writer", "tuples.read", None, None, 101, 5);
        let (_, engine) = engine_over(store);

        let output = engine
            .execute(&query(
                "process/tuples.read/myapp/flows/flow1?count=3&start=100&end=102",
            ))
            .await
            .unwrap();
        assert_eq!(values(&output), vec![3, 5, 0]);
    }

    #[tokio::test]
    async fn test_time_series_tag_selects_tagged_rows() {
        let store = Arc::new(InMemoryMetricsStore::new());
        store.record("myapp", "events", Some("clicks"), None, 50, 3);
        store.record("myapp", "events", None, None, 50, 100);
        let (_, engine) = engine_over(store);

        let tagged = engine
            .execute(&query("collect/events/streams/clicks?count=1&start=50&end=50"))
            .await
            .unwrap();
        assert_eq!(values(&tagged), vec![3]);

        let totals = engine
            .execute(&query("collect/events/apps/myapp?count=1&start=50&end=50"))
            .await
            .unwrap();
        assert_eq!(values(&totals), vec![100]);
    }

    #[tokio::test]
    async fn test_busyness_ratio() {
        let store = Arc::new(InMemoryMetricsStore::new());
        let ctx = "myapp.f.flow1";
        store.record(ctx, BUSYNESS_NUMERATOR, None, None, 200, 25);
        store.record(ctx, BUSYNESS_DENOMINATOR, None, None, 200, 50);
        store.record(ctx, BUSYNESS_NUMERATOR, None, None, 201, 50);
        store.record(ctx, BUSYNESS_NUMERATOR, None, None, 202, 1);
        store.record(ctx, BUSYNESS_DENOMINATOR, None, None, 202, 3);
        let (_, engine) = engine_over(store);

        let output = engine
            .execute(&query("process/busyness/myapp/flows/flow1?count=4&start=200&end=203"))
            .await
            .unwrap();
        assert_eq!(values(&output), vec![50, 0, 33, 0]);
    }

    #[tokio::test]
    async fn test_storage_failure_surfaces() {
        let (factory, engine) = engine_over(Arc::new(InMemoryMetricsStore::new()));
        factory.fail_resolution(SECOND_RESOLUTION);

        let err = engine
            .execute(&query("collect/bytes/apps/myapp?count=5"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::StorageUnavailable(StorageError::TableLoad { .. })
        ));
        assert_eq!(err.status_hint(), 503);
    }

    #[tokio::test]
    async fn test_repeat_execution_is_identical() {
        let store = Arc::new(InMemoryMetricsStore::new());
        store.record("myapp", "bytes", None, None, 9_997, 11);
        let (_, engine) = engine_over(store);

        let descriptor = query("collect/bytes/apps/myapp?count=5");
        let first = serde_json::to_vec(&engine.execute(&descriptor).await.unwrap()).unwrap();
        let second = serde_json::to_vec(&engine.execute(&descriptor).await.unwrap()).unwrap();
        assert_eq!(first, second);
        assert!(engine.table_cache().is_loaded(SECOND_RESOLUTION));
    }
}
