//! Kuba Metrics Query - REST-style query layer over a pluggable metrics store
//!
//! This library answers metrics URIs such as
//! `process/tuples.read/myapp/flows/flow1?count=60` with:
//! - A path grammar that maps URIs onto scan prefixes (context, metric, tag)
//! - Dense per-second time series and summed aggregates
//! - A derived busyness ratio (tuples read over events processed)
//! - A load-once cache of time-series tables keyed by resolution
//! - Batch execution with order-preserving, per-item error envelopes

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod engine;
pub mod error;
pub mod types;

/// Prometheus metrics and telemetry
pub mod metrics;

/// Configuration management with TOML support
pub mod config;

/// Load-once cache of time-series tables
pub mod cache;

/// Row merging, dense alignment and ratio computation
pub mod aggregation;

/// Path grammar, query descriptors, execution and results
pub mod query;

/// Batch endpoint: envelope decoding and ordered per-item execution
pub mod batch;

/// axum router exposing the batch and single-query endpoints
pub mod http;

// Re-export main types
pub use batch::{BatchFailurePolicy, BatchItemResult, BatchMetricsHandler};
pub use config::Config;
pub use engine::{InMemoryMetricsStore, InMemoryTableFactory, MetricsTableFactory};
pub use error::{Error, Result, StorageError};
pub use query::{MetricsQueryEngine, QueryDescriptor, QueryKind, QueryOutput, RequestParser};
pub use types::{Resolution, TimeValue};
