use std::collections::BTreeMap;

use serde::Serialize;

/// Sparse, fixed-width time histogram.
///
/// Only buckets that received traffic are stored; a missing bucket means zero.
#[derive(Debug, Clone)]
pub struct TimeWindow {
    width: i64,
    first: i64,
    buckets: BTreeMap<i64, u64>,
}

/// Point-in-time copy of a `TimeWindow`, gaps are left for the caller to fill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowSnapshot {
    pub first: i64,
    pub width: i64,
    pub buckets: BTreeMap<i64, u64>,
}

impl TimeWindow {
    pub const SECOND: i64 = 1;
    pub const MINUTE: i64 = 60;

    pub fn new(start: f64, width: i64) -> Self {
        let width = width.max(1);
        TimeWindow {
            width,
            first: bucket_start(start, width),
            buckets: BTreeMap::new(),
        }
    }

    pub fn per_second(start: f64) -> Self {
        Self::new(start, Self::SECOND)
    }

    pub fn per_minute(start: f64) -> Self {
        Self::new(start, Self::MINUTE)
    }

    pub fn width(&self) -> i64 {
        self.width
    }

    pub fn first(&self) -> i64 {
        self.first
    }

    /// Add `value` to the bucket `t` falls in.
    pub fn update(&mut self, t: f64, value: u64) {
        if value == 0 {
            return;
        }
        *self.buckets.entry(bucket_start(t, self.width)).or_insert(0) += value;
    }

    pub fn snapshot(&self) -> WindowSnapshot {
        WindowSnapshot {
            first: self.first,
            width: self.width,
            buckets: self.buckets.clone(),
        }
    }
}

pub fn bucket_start(t: f64, width: i64) -> i64 {
    (t / width as f64).floor() as i64 * width
}
