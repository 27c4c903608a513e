//! Ring Statistics
//!
//! Fixed-capacity circular buffer with windowed aggregates. Iteration is
//! most-recently-pushed first; `average(offset)` depends on that order.

use serde::{Deserialize, Serialize};

use crate::weights::NamedWeights;

/// Values that can be averaged inside a ring buffer
pub trait Sample: Clone + Default {
    /// `self += other`
    fn accumulate(&mut self, other: &Self);
    /// `self *= factor`
    fn scale(&mut self, factor: f64);
}

impl Sample for f64 {
    fn accumulate(&mut self, other: &Self) {
        *self += *other;
    }

    fn scale(&mut self, factor: f64) {
        *self *= factor;
    }
}

impl Sample for NamedWeights {
    fn accumulate(&mut self, other: &Self) {
        self.add_assign(other);
    }

    fn scale(&mut self, factor: f64) {
        NamedWeights::scale(self, factor);
    }
}

/// Circular buffer keeping the `capacity` most recent samples
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RingStatistics<T> {
    /// Physical storage, at most `capacity` long
    slots: Vec<T>,
    /// Slot that the next push writes to
    next: usize,
    /// Maximum number of samples kept
    capacity: usize,
}

impl<T> RingStatistics<T> {
    /// Create an empty buffer. A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity),
            next: 0,
            capacity,
        }
    }

    /// Add a sample, overwriting the oldest once full
    pub fn push(&mut self, sample: T) {
        if self.slots.len() < self.capacity {
            self.slots.push(sample);
        } else {
            self.slots[self.next] = sample;
        }
        self.next = (self.next + 1) % self.capacity;
    }

    /// Iterate newest to oldest
    pub fn iter(&self) -> RingIter<'_, T> {
        RingIter {
            ring: self,
            position: 0,
        }
    }

    /// Most recent sample
    pub fn latest(&self) -> Option<&T> {
        self.iter().next()
    }

    /// Drop all samples, keep capacity
    pub fn reset(&mut self) {
        self.slots.clear();
        self.next = 0;
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() == self.capacity
    }

    /// Physical slot of the `k`-th most recent sample
    fn physical(&self, k: usize) -> usize {
        let len = self.slots.len();
        // `next` equals `len` until the buffer wraps
        (self.next + len - 1 - k) % len
    }
}

impl<T: Sample> RingStatistics<T> {
    /// Mean of the samples from logical position `offset` (0 = newest) to the
    /// oldest. Returns `T::default()` when fewer than `offset + 1` samples exist.
    pub fn average(&self, offset: usize) -> T {
        let mut window = self.iter().skip(offset);
        let Some(first) = window.next() else {
            return T::default();
        };
        let mut sum = first.clone();
        let mut count = 1usize;
        for sample in window {
            sum.accumulate(sample);
            count += 1;
        }
        sum.scale(1.0 / count as f64);
        sum
    }
}

impl RingStatistics<f64> {
    /// Mean over every stored sample, 0.0 when empty
    pub fn mean(&self) -> f64 {
        self.average(0)
    }

    /// Sample standard deviation (n - 1), 0.0 for fewer than two samples
    pub fn std_dev(&self) -> f64 {
        let n = self.slots.len();
        if n < 2 {
            return 0.0;
        }
        let mean = self.mean();
        let var = self
            .slots
            .iter()
            .map(|x| (x - mean).powi(2))
            .sum::<f64>()
            / (n - 1) as f64;
        var.sqrt()
    }

    pub fn min(&self) -> Option<f64> {
        self.slots.iter().copied().reduce(f64::min)
    }

    pub fn max(&self) -> Option<f64> {
        self.slots.iter().copied().reduce(f64::max)
    }
}

/// Newest-first iterator over a [`RingStatistics`]
pub struct RingIter<'a, T> {
    ring: &'a RingStatistics<T>,
    position: usize,
}

impl<'a, T> Iterator for RingIter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.ring.slots.len() {
            return None;
        }
        let slot = self.ring.physical(self.position);
        self.position += 1;
        Some(&self.ring.slots[slot])
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.ring.slots.len().saturating_sub(self.position);
        (remaining, Some(remaining))
    }
}

impl<'a, T> ExactSizeIterator for RingIter<'a, T> {}
