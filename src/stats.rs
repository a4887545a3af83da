//! Small numeric helpers shared by the aggregation stages.

use serde::Serialize;
use std::collections::HashMap;
use std::hash::Hash;

/// Per-file outcome counts for a batch stage.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FileCounts {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl FileCounts {
    /// Files that ended in a usable output, whether produced now or earlier.
    pub fn completed(&self) -> usize {
        self.processed + self.skipped
    }

    pub fn add(&mut self, other: FileCounts) {
        self.processed += other.processed;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// `part / total` as a percentage. Returns 0.0 for a zero total.
pub fn pct(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (part as f64 / total as f64) * 100.0
    }
}

/// Relative change from `before` to `after` in percent; 0.0 unless `before` is positive.
pub fn pct_change(before: f64, after: f64) -> f64 {
    if before > 0.0 {
        (after - before) / before * 100.0
    } else {
        0.0
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Running average over nullable values; nulls are skipped like SQL `AVG`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Mean {
    sum: f64,
    count: u64,
}

impl Mean {
    pub fn push(&mut self, value: Option<f64>) {
        if let Some(v) = value {
            self.sum += v;
            self.count += 1;
        }
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// `None` when no non-null value was seen.
    pub fn value(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum / self.count as f64)
        }
    }
}

/// Frequency counter returning the most common value.
#[derive(Debug, Clone)]
pub struct Mode<K> {
    counts: HashMap<K, u64>,
}

impl<K> Default for Mode<K> {
    fn default() -> Self {
        Self {
            counts: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Ord + Copy> Mode<K> {
    pub fn push(&mut self, key: K) {
        *self.counts.entry(key).or_default() += 1;
    }

    /// Most frequent key; ties go to the smallest key.
    pub fn value(&self) -> Option<K> {
        self.counts
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(k, _)| *k)
    }
}
