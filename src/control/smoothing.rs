//! Moving-average smoothing for instantaneous trainer power.

use std::collections::VecDeque;

/// Number of trainer data-page samples kept for the moving average.
const POWER_WINDOW: usize = 3;

/// Smooths raw instantaneous-power reports into a single display value.
///
/// Trainer data pages arrive faster than the control loop consumes them and
/// are noisy frame-to-frame; a short moving average is enough for display
/// without adding more than a few update periods of latency.
#[derive(Debug, Default)]
pub struct PowerSmoother {
    samples: VecDeque<i16>,
}

impl PowerSmoother {
    /// Create an empty smoother.
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(POWER_WINDOW),
        }
    }

    /// Record one instantaneous-power sample in watts.
    ///
    /// The oldest sample is evicted once the window is full. Values are not
    /// validated; the trainer is trusted to report what it reports.
    pub fn record(&mut self, watts: i16) {
        if self.samples.len() == POWER_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(watts);
    }

    /// Arithmetic mean of the buffered samples, or 0.0 when empty.
    pub fn current(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: i64 = self.samples.iter().map(|&w| i64::from(w)).sum();
        sum as f64 / self.samples.len() as f64
    }

    /// Number of samples currently buffered.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no samples have been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_smoother_reads_zero() {
        let smoother = PowerSmoother::new();
        assert_eq!(smoother.current(), 0.0);
        assert!(smoother.is_empty());
    }

    #[test]
    fn averages_fewer_than_window_samples() {
        let mut smoother = PowerSmoother::new();
        smoother.record(100);
        assert_eq!(smoother.current(), 100.0);
        smoother.record(200);
        assert_eq!(smoother.current(), 150.0);
    }

    #[test]
    fn keeps_only_last_three_samples() {
        let mut smoother = PowerSmoother::new();
        smoother.record(10);
        smoother.record(20);
        smoother.record(30);
        smoother.record(40);
        // 10 evicted, mean of 20/30/40
        assert_eq!(smoother.len(), 3);
        assert_eq!(smoother.current(), 30.0);
    }

    #[test]
    fn accepts_negative_samples() {
        let mut smoother = PowerSmoother::new();
        smoother.record(-50);
        smoother.record(50);
        assert_eq!(smoother.current(), 0.0);
    }
}
