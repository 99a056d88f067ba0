//! # Moving Average Filter
//!
//! Fixed-window, first-in-first-out smoothing for raw distance readings.
//! The ultrasonic sensor jitters by a few millimetres between frames and
//! the liquid surface sloshes; averaging the last N readings gives a stable
//! level without any floating point.
//!
//! The running sum is maintained incrementally: one addition and at most one
//! subtraction per insert. Samples are `u32` and the sum is `u64`, so even a
//! window of millions of maximum-size samples cannot overflow.

use std::collections::VecDeque;

/// Default window length used by the device (10 readings).
pub const DEFAULT_WINDOW: usize = 10;

/// Fixed-size moving average over integer samples.
///
/// Invariants:
/// - `sum` always equals the sum of `window`
/// - `window.len() <= capacity`
///
/// # Example
/// ```
/// use tank_level_lib::filter::MovingAverage;
///
/// let mut avg = MovingAverage::new(3);
/// assert_eq!(avg.insert(30), 30);
/// assert_eq!(avg.insert(60), 45);
/// assert_eq!(avg.insert(90), 60);
/// assert_eq!(avg.insert(120), 90); // 30 evicted
/// ```
#[derive(Clone, Debug)]
pub struct MovingAverage {
    window: VecDeque<u32>,
    capacity: usize,
    sum: u64,
}

impl MovingAverage {
    /// Create an empty filter holding up to `window_size` samples.
    ///
    /// A window size of zero is treated as one.
    pub fn new(window_size: usize) -> Self {
        let capacity = window_size.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            sum: 0,
        }
    }

    /// Clear all samples and switch to a new window size.
    pub fn reset(&mut self, window_size: usize) {
        self.capacity = window_size.max(1);
        self.window.clear();
        self.window.reserve(self.capacity);
        self.sum = 0;
    }

    /// Append a sample, evicting the oldest one when full, and return the
    /// updated average.
    pub fn insert(&mut self, sample: u32) -> u32 {
        if self.window.len() == self.capacity {
            if let Some(oldest) = self.window.pop_front() {
                self.sum -= u64::from(oldest);
            }
        }
        self.window.push_back(sample);
        self.sum += u64::from(sample);
        self.average()
    }

    /// Integer mean of the current window; 0 when empty.
    pub fn average(&self) -> u32 {
        if self.window.is_empty() {
            return 0;
        }
        // Mean of u32 values always fits in u32
        (self.sum / self.window.len() as u64) as u32
    }

    /// Running sum of the window.
    pub fn sum(&self) -> u64 {
        self.sum
    }

    /// Number of samples currently held.
    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Maximum number of samples held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples in insertion order, oldest first.
    pub fn samples(&self) -> impl Iterator<Item = u32> + '_ {
        self.window.iter().copied()
    }
}

impl Default for MovingAverage {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}
