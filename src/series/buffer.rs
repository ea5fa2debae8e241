use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CAPACITY: usize = 50;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl SeriesPoint {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        SeriesPoint { timestamp, value }
    }
}

/// Fixed-capacity FIFO history for one series, oldest point first.
#[derive(Clone, Debug)]
pub struct RollingBuffer {
    capacity: usize,
    points: VecDeque<SeriesPoint>,
}

impl RollingBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        RollingBuffer {
            capacity,
            points: VecDeque::with_capacity(capacity),
        }
    }

    /// A full buffer of zero-valued placeholders stamped `at`, so readers
    /// never see an empty history.
    pub fn prefilled(capacity: usize, at: DateTime<Utc>) -> Self {
        let mut buffer = Self::new(capacity);
        buffer
            .points
            .extend(std::iter::repeat(SeriesPoint::new(at, 0.0)).take(buffer.capacity));
        buffer
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn push(&mut self, point: SeriesPoint) {
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(point);
    }

    pub fn latest(&self) -> Option<&SeriesPoint> {
        self.points.back()
    }

    pub fn get(&self, index: usize) -> Option<&SeriesPoint> {
        self.points.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SeriesPoint> {
        self.points.iter()
    }

    pub fn to_vec(&self) -> Vec<SeriesPoint> {
        self.points.iter().copied().collect()
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.value).collect()
    }

    pub fn nearest(&self, query_x: f64) -> Option<usize> {
        nearest_index(self.points.len(), query_x)
    }

    /// Smallest and largest stored value.
    pub fn observed_bounds(&self) -> Option<(f64, f64)> {
        let mut iter = self.points.iter().map(|p| p.value);
        let first = iter.next()?;
        Some(iter.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v))))
    }
}

/// Index in `0..len` closest to `query_x`. A query exactly halfway between
/// two indices resolves to the lower one; queries past either end clamp.
pub fn nearest_index(len: usize, query_x: f64) -> Option<usize> {
    if len == 0 || query_x.is_nan() {
        return None;
    }
    let last = (len - 1) as f64;
    if query_x <= 0.0 {
        return Some(0);
    }
    if query_x >= last {
        return Some(len - 1);
    }
    let floor = query_x.floor();
    let index = if query_x - floor > 0.5 { floor + 1.0 } else { floor };
    Some(index as usize)
}
