//! Sliding-window hysteresis filter.
//!
//! Handover decisions are gated on the moving average of the most recent
//! quality samples rather than on instantaneous readings, so a single noisy
//! sample near a threshold cannot flap the connectivity state.

use std::collections::VecDeque;

/// Rebuild the running sum from scratch every this many pushes. Keeps
/// floating-point drift from the add/subtract updates bounded on long runs
/// while preserving O(1) amortized cost per push.
const REBUILD_INTERVAL: usize = 4096;

/// Bounded FIFO of the `capacity` most recent samples with an O(1) moving
/// average. Owned exclusively by one filter consumer; never shared.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    samples: VecDeque<f64>,
    capacity: usize,
    sum: f64,
    pushes_since_rebuild: usize,
}

impl SlidingWindow {
    /// Creates a window holding up to `capacity` samples. A capacity of zero
    /// is clamped to one, so the window always admits at least one sample.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        SlidingWindow {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            sum: 0.0,
            pushes_since_rebuild: 0,
        }
    }

    /// Pushes a sample, evicting the oldest one beyond capacity.
    pub fn push(&mut self, sample: f64) {
        if self.samples.len() == self.capacity {
            if let Some(oldest) = self.samples.pop_front() {
                self.sum -= oldest;
            }
        }
        self.samples.push_back(sample);
        self.sum += sample;

        self.pushes_since_rebuild += 1;
        if self.pushes_since_rebuild >= REBUILD_INTERVAL {
            self.sum = self.samples.iter().sum();
            self.pushes_since_rebuild = 0;
        }
    }

    /// Arithmetic mean of the stored samples, `None` while empty. Callers
    /// must handle the empty case; an empty window carries no opinion.
    pub fn average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            None
        } else {
            Some(self.sum / self.samples.len() as f64)
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drops all samples. Used when a handover completes so the next episode
    /// starts from fresh readings instead of averaging across the transition.
    pub fn clear(&mut self) {
        self.samples.clear();
        self.sum = 0.0;
        self.pushes_since_rebuild = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_window_has_no_average() {
        let w = SlidingWindow::new(3);
        assert!(w.average().is_none());
        assert!(w.is_empty());
    }

    #[test]
    fn average_of_partial_fill() {
        let mut w = SlidingWindow::new(4);
        w.push(-70.0);
        w.push(-80.0);
        assert_eq!(w.len(), 2);
        assert!((w.average().unwrap() - (-75.0)).abs() < 1e-9);
    }

    #[test]
    fn oldest_sample_evicted_at_capacity() {
        let mut w = SlidingWindow::new(3);
        for s in [-90.0, -60.0, -60.0, -60.0] {
            w.push(s);
        }
        assert_eq!(w.len(), 3);
        // -90 fell out of the window
        assert!((w.average().unwrap() - (-60.0)).abs() < 1e-9);
    }

    #[test]
    fn window_of_one_tracks_last_sample() {
        let mut w = SlidingWindow::new(1);
        w.push(-70.0);
        w.push(-90.0);
        assert!((w.average().unwrap() - (-90.0)).abs() < 1e-9);
    }

    #[test]
    fn zero_capacity_clamps_to_one() {
        let mut w = SlidingWindow::new(0);
        w.push(-42.0);
        assert_eq!(w.capacity(), 1);
        assert!((w.average().unwrap() - (-42.0)).abs() < 1e-9);
    }

    #[test]
    fn clear_resets_state() {
        let mut w = SlidingWindow::new(3);
        w.push(-70.0);
        w.clear();
        assert!(w.average().is_none());
        w.push(-80.0);
        assert!((w.average().unwrap() - (-80.0)).abs() < 1e-9);
    }

    #[test]
    fn average_matches_mean_of_last_n() {
        let mut w = SlidingWindow::new(5);
        let samples: Vec<f64> = (0..40).map(|i| -60.0 - (i % 7) as f64).collect();
        for (i, &s) in samples.iter().enumerate() {
            w.push(s);
            let lo = i.saturating_sub(4);
            let tail = &samples[lo..=i];
            let mean = tail.iter().sum::<f64>() / tail.len() as f64;
            assert!(
                (w.average().unwrap() - mean).abs() < 1e-9,
                "window average diverged at push {i}"
            );
        }
    }

    #[test]
    fn long_run_stays_numerically_stable() {
        let mut w = SlidingWindow::new(10);
        for i in 0..1_000_000u64 {
            // alternate large-magnitude samples to provoke cancellation drift
            let s = if i % 2 == 0 { -1e9 } else { 1e9 };
            w.push(s);
        }
        // window holds five of each sign
        assert!(w.average().unwrap().abs() < 1e-3);
    }
}
