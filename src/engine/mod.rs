//! Pluggable metrics store: collaborator traits and in-memory stubs

pub mod stubs;
pub mod traits;

pub use stubs::{InMemoryMetricsStore, InMemoryTableFactory, MetricsFixture};
pub use traits::{AggregatesTable, MetricsTableFactory, TimeSeriesTable};
