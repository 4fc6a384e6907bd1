//! Alignment and aggregation of scanned metric streams
//!
//! ```text
//! row streams ──► TimeValueAggregator ──► merged stream ──► AlignedCursor ──► dense series
//!                     (sum by time)                          (zero fill)
//! ```

pub mod merge;

pub use merge::{fill_dense, ratio_percent, ratio_series, AlignedCursor, TimeValueAggregator};
