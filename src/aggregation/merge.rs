//! Stream alignment for time-series answers
//!
//! Scans hand back one sorted stream per matching row. Answering a query takes
//! two passes, both single forward walks:
//!
//! 1. [`TimeValueAggregator`] merges the row streams into one sorted stream,
//!    summing values that share a timestamp.
//! 2. [`AlignedCursor`] walks that stream against the dense target timestamps
//!    `start..start + count`, emitting `0` wherever the stream has no point.
//!
//! The busyness ratio runs two cursors in lock-step over the same targets.

use crate::types::TimeValue;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Merges several time-sorted streams into one, summing equal timestamps
#[derive(Debug, Default)]
pub struct TimeValueAggregator {
    rows: Vec<Vec<TimeValue>>,
}

impl TimeValueAggregator {
    /// Create an aggregator over the given row streams
    pub fn new(rows: Vec<Vec<TimeValue>>) -> Self {
        Self { rows }
    }

    /// Add one more row stream
    pub fn push(&mut self, row: Vec<TimeValue>) {
        self.rows.push(row);
    }

    /// Produce the merged stream, strictly increasing in time
    pub fn merge(self) -> Vec<TimeValue> {
        let mut rows: Vec<Vec<TimeValue>> =
            self.rows.into_iter().filter(|r| !r.is_empty()).collect();
        match rows.len() {
            0 => return Vec::new(),
            1 => return rows.pop().unwrap_or_default(),
            _ => {},
        }

        let total: usize = rows.iter().map(Vec::len).sum();
        let mut merged: Vec<TimeValue> = Vec::with_capacity(total);

        // Min-heap of (time, row index, position within row).
        let mut heap: BinaryHeap<Reverse<(i64, usize, usize)>> = rows
            .iter()
            .enumerate()
            .map(|(row, points)| Reverse((points[0].time, row, 0)))
            .collect();

        while let Some(Reverse((time, row, pos))) = heap.pop() {
            let value = rows[row][pos].value;
            match merged.last_mut() {
                Some(last) if last.time == time => last.value = last.value.wrapping_add(value),
                _ => merged.push(TimeValue::new(time, value)),
            }
            if let Some(next) = rows[row].get(pos + 1) {
                heap.push(Reverse((next.time, row, pos + 1)));
            }
        }

        merged
    }
}

/// Forward-only cursor that aligns a sorted stream to target timestamps
#[derive(Debug)]
pub struct AlignedCursor<'a> {
    points: &'a [TimeValue],
    pos: usize,
}

impl<'a> AlignedCursor<'a> {
    /// Create a cursor at the start of a sorted stream
    pub fn new(points: &'a [TimeValue]) -> Self {
        Self { points, pos: 0 }
    }

    /// Value at `target`, or `0` if the stream has no point there
    ///
    /// Targets must be requested in increasing order. A point is consumed only
    /// when its timestamp equals the target. A point newer than the target is
    /// left for a later target. A point older than the target can match no
    /// later target, so it is passed over instead of stalling the cursor. Scans
    /// bounded to `[start, end]` never hold such points, so for them this is
    /// exactly "emit 0 without consuming".
    pub fn value_at(&mut self, target: i64) -> i64 {
        while let Some(point) = self.points.get(self.pos) {
            if point.time < target {
                self.pos += 1;
                continue;
            }
            if point.time == target {
                self.pos += 1;
                return point.value;
            }
            break;
        }
        0
    }

    /// Number of points not yet consumed or passed over
    pub fn remaining(&self) -> usize {
        self.points.len() - self.pos
    }
}

/// Target timestamps `start, start + 1, ..`, wrapping at the ends of `i64`
fn targets(start: i64, count: usize) -> impl Iterator<Item = i64> {
    (0..count).map(move |offset| start.wrapping_add(offset as i64))
}

/// Dense series of `count` one-second buckets starting at `start`
///
/// Always exactly `count` points long; timestamps wrap at the ends of `i64`.
pub fn fill_dense(points: &[TimeValue], start: i64, count: usize) -> Vec<TimeValue> {
    let mut cursor = AlignedCursor::new(points);
    targets(start, count)
        .map(|time| {
            TimeValue::new(time, cursor.value_at(time))
        })
        .collect()
}

/// `round(numerator / denominator * 100)`, or `0` when the denominator is zero
pub fn ratio_percent(numerator: i64, denominator: i64) -> i64 {
    if denominator == 0 {
        return 0;
    }
    (numerator as f64 / denominator as f64 * 100.0).round() as i64
}

/// Dense percentage series of `numerator` over `denominator`
///
/// Both streams are aligned to the same targets independently, never to each
/// other's timestamps.
pub fn ratio_series(
    numerator: &[TimeValue],
    denominator: &[TimeValue],
    start: i64,
    count: usize,
) -> Vec<TimeValue> {
    let mut num = AlignedCursor::new(numerator);
    let mut den = AlignedCursor::new(denominator);
    targets(start, count)
        .map(|time| {
            let n = num.value_at(time);
            let d = den.value_at(time);
            TimeValue::new(time, ratio_percent(n, d))
        })
        .collect()
}
