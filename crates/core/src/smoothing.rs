//! Moving-average filter for noisy scalar streams.
//!
//! Single GPS or sensor samples jitter enough to flip a threshold back and
//! forth. Comparing the mean of the last `N` samples instead trades `N`
//! samples of latency for stable transitions.

use std::collections::VecDeque;

/// Default number of samples averaged per scalar stream.
pub const DEFAULT_WINDOW: usize = 10;

/// Fixed-capacity arithmetic mean over the most recent samples.
#[derive(Debug, Clone, PartialEq)]
pub struct MovingAverage {
    window: usize,
    samples: VecDeque<f64>,
}

impl MovingAverage {
    /// Create a filter averaging the last `window` samples.
    ///
    /// A window of zero is treated as one (no smoothing).
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            samples: VecDeque::with_capacity(window),
        }
    }

    /// Push a sample, evicting the oldest one once the window is full.
    pub fn push(&mut self, value: f64) {
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    /// Mean of the buffered samples, or `None` when empty.
    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    /// Mean only once the window has filled up.
    pub fn settled_mean(&self) -> Option<f64> {
        if self.is_full() {
            self.mean()
        } else {
            None
        }
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() == self.window
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

impl Default for MovingAverage {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}
