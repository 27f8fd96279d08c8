//! Rolling-window statistics over numeric update streams.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

pub const DEFAULT_WINDOW: usize = 100;

struct Window {
    count: u64,
    s: f64,
    s2: f64,
    values: Vec<f64>,
}

/// Mean and variance over the last `capacity` samples, maintained in O(1)
/// per update by subtracting the overwritten sample from the running sums.
///
/// Reads take a shared lock and are snapshot-consistent; updates take the
/// exclusive lock.
pub struct RollingWindowStatistics {
    window: RwLock<Window>,
}

impl Default for RollingWindowStatistics {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl RollingWindowStatistics {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 2, "a rolling window needs at least two slots");
        RollingWindowStatistics {
            window: RwLock::new(Window {
                count: 0,
                s: 0.0,
                s2: 0.0,
                values: vec![0.0; capacity],
            }),
        }
    }

    pub fn update(&self, value: f64) {
        let mut w = self.window.write().expect("statistics window poisoned");
        let index = (w.count as usize) % w.values.len();
        let evicted = w.values[index];
        w.values[index] = value;
        w.s += value - evicted;
        w.s2 += value * value - evicted * evicted;
        w.count += 1;
    }

    /// Samples currently contributing: `min(capacity, count)`.
    pub fn filled(&self) -> usize {
        let w = self.window.read().expect("statistics window poisoned");
        (w.count as usize).min(w.values.len())
    }

    pub fn mean(&self) -> Option<f64> {
        let w = self.window.read().expect("statistics window poisoned");
        let n = (w.count as usize).min(w.values.len());
        if n == 0 {
            return None;
        }
        Some(w.s / n as f64)
    }

    /// Unbiased sample variance of the window; needs two samples.
    pub fn variance(&self) -> Option<f64> {
        let w = self.window.read().expect("statistics window poisoned");
        let n = (w.count as usize).min(w.values.len()) as f64;
        if n < 2.0 {
            return None;
        }
        Some((n * w.s2 - w.s * w.s) / (n * (n - 1.0)))
    }
}

/// Per-path accumulators, one window per numeric property.
#[derive(Default)]
pub struct StatisticsRegistry {
    windows: Mutex<HashMap<String, Arc<RollingWindowStatistics>>>,
    capacity: usize,
}

impl StatisticsRegistry {
    pub fn new(capacity: usize) -> Self {
        StatisticsRegistry {
            windows: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    pub fn update(&self, path: &str, value: f64) {
        self.window(path).update(value);
    }

    pub fn window(&self, path: &str) -> Arc<RollingWindowStatistics> {
        let mut windows = self.windows.lock().expect("statistics registry poisoned");
        windows
            .entry(path.to_string())
            .or_insert_with(|| {
                Arc::new(RollingWindowStatistics::new(if self.capacity >= 2 {
                    self.capacity
                } else {
                    DEFAULT_WINDOW
                }))
            })
            .clone()
    }

    pub fn get(&self, path: &str) -> Option<Arc<RollingWindowStatistics>> {
        self.windows
            .lock()
            .expect("statistics registry poisoned")
            .get(path)
            .cloned()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn small_sample_mean_and_variance() {
        let stats = RollingWindowStatistics::new(100);
        assert_eq!(stats.mean(), None);
        stats.update(1.0);
        assert_eq!(stats.variance(), None);
        stats.update(2.0);
        stats.update(3.0);
        assert_eq!(stats.mean(), Some(2.0));
        assert_eq!(stats.variance(), Some(1.0));
        assert_eq!(stats.filled(), 3);
    }

    #[test]
    fn window_wraps_and_forgets_old_samples() {
        let stats = RollingWindowStatistics::new(100);
        for i in 1..=200 {
            stats.update(i as f64);
        }
        assert_eq!(stats.filled(), 100);

        // The window now holds 101..=200.
        let expected_mean = (101..=200).sum::<i64>() as f64 / 100.0;
        let mean = stats.mean().unwrap();
        assert!((mean - expected_mean).abs() < 1e-9, "mean {mean}");

        let expected_var = (101..=200)
            .map(|x| {
                let d = x as f64 - expected_mean;
                d * d
            })
            .sum::<f64>()
            / 99.0;
        let var = stats.variance().unwrap();
        assert!((var - expected_var).abs() < 1e-6, "variance {var}");
    }

    #[test]
    fn registry_keys_windows_by_path() {
        let registry = StatisticsRegistry::new(10);
        registry.update("a.b", 1.0);
        registry.update("a.b", 3.0);
        registry.update("c", 5.0);
        assert_eq!(registry.get("a.b").unwrap().mean(), Some(2.0));
        assert_eq!(registry.get("c").unwrap().mean(), Some(5.0));
        assert!(registry.get("missing").is_none());
    }
}
