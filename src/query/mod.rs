//! Metrics query path: URI grammar, descriptors, execution and results
//!
//! # Architecture
//!
//! ```text
//! Request URI
//!      │
//!      ▼
//! ┌─────────────┐
//! │   Parse     │  Path grammar + query string → QueryDescriptor
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Execute    │  Table scans, row merge, dense fill / busyness ratio
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │   Format    │  QueryOutput → JSON
//! └─────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use kuba_metrics_query::engine::stubs::{InMemoryMetricsStore, InMemoryTableFactory};
//! use kuba_metrics_query::query::{MetricsQueryEngine, RequestParser};
//! use std::sync::Arc;
//!
//! # tokio_test_block(async {
//! let store = Arc::new(InMemoryMetricsStore::new());
//! store.increment_aggregate("myapp", "bytes", None, None, 42);
//!
//! let factory = Arc::new(InMemoryTableFactory::new(store));
//! let engine = MetricsQueryEngine::new(factory, 1).unwrap();
//!
//! let query = RequestParser::default()
//!     .parse("collect/bytes/apps/myapp?aggregate=true")
//!     .unwrap();
//! let output = engine.execute(&query).await.unwrap();
//! assert_eq!(output.as_aggregate(), Some(42));
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Runtime::new().unwrap().block_on(f)
//! # }
//! ```

pub mod executor;
pub mod parser;
pub mod request;
pub mod result;

// Re-export main types
pub use executor::{MetricsQueryEngine, BUSYNESS_DENOMINATOR, BUSYNESS_NUMERATOR};
pub use parser::{parse, BatchSubtype, ContextType, ProgramType, RequestParser};
pub use request::{MetricSelector, QueryDescriptor, QueryKind, BUSYNESS};
pub use result::{AggregateResponse, QueryOutput, TimeSeriesResponse};
