//! Time-Series Table Cache
//!
//! Maps a resolution to a live [`TimeSeriesTable`] handle, building it through
//! the injected [`MetricsTableFactory`] on first use.
//!
//! # Guarantees
//!
//! - At most one construction is in flight per resolution. Concurrent callers
//!   for a missing key wait for that construction and share its handle.
//! - A failed construction is not cached; the next caller retries it.
//! - Entries are never evicted. The key space is a handful of resolutions.
//!
//! # Example
//!
//! ```rust,ignore
//! use kuba_metrics_query::cache::TableCache;
//!
//! let cache = TableCache::new(factory);
//! let table = cache.get(1).await?;     // builds the per-second table
//! let again = cache.get(1).await?;     // same handle, no factory call
//! ```

use crate::engine::traits::{MetricsTableFactory, TimeSeriesTable};
use crate::error::StorageError;
use crate::metrics;
use crate::types::Resolution;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, warn};

type TableSlot = Arc<OnceCell<Arc<dyn TimeSeriesTable>>>;

/// Table cache statistics
#[derive(Debug, Default)]
pub struct TableCacheStats {
    /// Lookups answered by an already-built table
    pub hits: AtomicU64,

    /// Lookups that had to wait for or perform a construction
    pub misses: AtomicU64,

    /// Failed constructions
    pub load_failures: AtomicU64,
}

/// Unbounded, load-once cache of time-series tables keyed by resolution
pub struct TableCache {
    factory: Arc<dyn MetricsTableFactory>,
    slots: DashMap<Resolution, TableSlot>,
    stats: TableCacheStats,
}

impl TableCache {
    /// Create an empty cache over a factory
    pub fn new(factory: Arc<dyn MetricsTableFactory>) -> Self {
        Self {
            factory,
            slots: DashMap::new(),
            stats: TableCacheStats::default(),
        }
    }

    /// Get the table for a resolution, constructing it on first use
    pub async fn get(
        &self,
        resolution: Resolution,
    ) -> Result<Arc<dyn TimeSeriesTable>, StorageError> {
        // Clone the slot out so no map guard is held across the await below.
        let slot: TableSlot = self
            .slots
            .entry(resolution)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        if let Some(table) = slot.get() {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(table.clone());
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        let table = slot
            .get_or_try_init(|| async {
                let result = self.factory.create_time_series(resolution).await;
                metrics::record_table_load(result.is_ok());
                match &result {
                    Ok(_) => info!(resolution, "Loaded time-series table"),
                    Err(e) => {
                        self.stats.load_failures.fetch_add(1, Ordering::Relaxed);
                        warn!(resolution, error = %e, "Failed to load time-series table");
                    },
                }
                result
            })
            .await?;
        Ok(table.clone())
    }

    /// Whether a table for the resolution has been built
    pub fn is_loaded(&self, resolution: Resolution) -> bool {
        self.slots
            .get(&resolution)
            .map(|slot| slot.initialized())
            .unwrap_or(false)
    }

    /// Number of built tables
    pub fn loaded_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.initialized()).count()
    }

    /// Cache statistics
    pub fn stats(&self) -> &TableCacheStats {
        &self.stats
    }
}
