//! Windowed Averager
//!
//! Keeps the most recent samples of one metric, bounded both by count and by
//! age, and reports their arithmetic mean once enough samples are present.

use std::collections::VecDeque;
use std::time::Duration;

use super::Sample;

#[derive(Debug, Clone)]
pub struct WindowedAverager {
    samples: VecDeque<Sample>,
    capacity: usize,
    span: Duration,
    minimum_samples: usize,
}

impl WindowedAverager {
    /// Create an averager
    ///
    /// # Arguments
    /// * `span` - samples older than this (relative to the newest) are evicted
    /// * `capacity` - hard bound on retained samples
    /// * `minimum_samples` - fewest samples for which `average` answers
    pub fn new(span: Duration, capacity: usize, minimum_samples: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            span,
            minimum_samples: minimum_samples.clamp(1, capacity),
        }
    }

    /// Append a sample, evicting by capacity then by age
    pub fn push(&mut self, sample: Sample) {
        self.samples.push_back(sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
        while let Some(oldest) = self.samples.front() {
            if sample.at.saturating_duration_since(oldest.at) > self.span {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Mean of the window, or `None` while fewer than `minimum_samples` are held
    pub fn average(&self) -> Option<f64> {
        if self.samples.len() < self.minimum_samples {
            return None;
        }
        let sum: f64 = self.samples.iter().map(|s| s.value).sum();
        Some(sum / self.samples.len() as f64)
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn minimum_samples(&self) -> usize {
        self.minimum_samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn sample(base: Instant, millis: u64, value: f64) -> Sample {
        Sample::new(base + Duration::from_millis(millis), value)
    }

    #[test]
    fn test_not_decidable_below_minimum() {
        let base = Instant::now();
        let mut window = WindowedAverager::new(Duration::from_secs(3), 12, 3);
        window.push(sample(base, 0, 100.0));
        window.push(sample(base, 250, 200.0));
        assert_eq!(window.average(), None);
        window.push(sample(base, 500, 300.0));
        assert_eq!(window.average(), Some(200.0));
    }

    #[test]
    fn test_capacity_eviction() {
        let base = Instant::now();
        let mut window = WindowedAverager::new(Duration::from_secs(60), 4, 1);
        for (i, value) in [10.0, 20.0, 30.0, 40.0, 50.0].into_iter().enumerate() {
            window.push(sample(base, i as u64 * 100, value));
        }
        assert_eq!(window.len(), 4);
        assert_eq!(window.average(), Some(35.0));
    }

    #[test]
    fn test_age_eviction() {
        let base = Instant::now();
        let mut window = WindowedAverager::new(Duration::from_secs(3), 12, 1);
        window.push(sample(base, 0, 500.0));
        window.push(sample(base, 3_000, 100.0));
        assert_eq!(window.len(), 2);
        window.push(sample(base, 3_500, 100.0));
        assert_eq!(window.len(), 2);
        assert_eq!(window.average(), Some(100.0));
    }

    #[test]
    fn test_unweighted_mean() {
        let base = Instant::now();
        let mut window = WindowedAverager::new(Duration::from_secs(3), 12, 2);
        window.push(sample(base, 0, 100.0));
        window.push(sample(base, 2_900, 300.0));
        assert_eq!(window.average(), Some(200.0));
    }

    #[test]
    fn test_clear() {
        let base = Instant::now();
        let mut window = WindowedAverager::new(Duration::from_secs(3), 12, 1);
        window.push(sample(base, 0, 100.0));
        window.clear();
        assert!(window.is_empty());
        assert_eq!(window.average(), None);
    }
}
