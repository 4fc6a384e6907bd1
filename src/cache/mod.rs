//! Caches shared across query requests

pub mod table;

pub use table::{TableCache, TableCacheStats};
