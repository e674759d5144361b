//! Execution-time sampling for lifecycle calls.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::Duration;

use crate::error::Phase;
use crate::registry::ModuleName;

/// Fixed-capacity ring of the most recent call durations; the oldest is evicted first.
#[derive(Clone, Debug)]
pub struct SampleWindow {
    samples: VecDeque<Duration>,
    capacity: usize,
}

impl SampleWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, elapsed: Duration) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(elapsed);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Arithmetic mean of whatever is currently held.
    pub fn average(&self) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }
        let total: Duration = self.samples.iter().sum();
        Some(total / self.samples.len() as u32)
    }

    pub fn samples(&self) -> Vec<Duration> {
        self.samples.iter().copied().collect()
    }
}

/// Per-module sample windows.
///
/// Appends and reads are not serialized against each other beyond the map's
/// shard locks; a monitoring pass may see a window one sample behind.
#[derive(Debug)]
pub struct ExecutionSampler {
    windows: DashMap<ModuleName, SampleWindow>,
    capacity: usize,
}

impl ExecutionSampler {
    pub fn new(capacity: usize) -> Self {
        Self {
            windows: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&self, module: ModuleName, phase: Phase, elapsed: Duration) {
        self.windows
            .entry(module)
            .or_insert_with(|| SampleWindow::new(self.capacity))
            .record(elapsed);
        tracing::debug!(
            module,
            phase = %phase,
            elapsed_ms = elapsed.as_millis() as u64,
            "Recorded execution time"
        );
    }

    /// Mean of the current window, however many samples it holds.
    pub fn rolling_average(&self, module: &str) -> Option<Duration> {
        self.windows.get(module).and_then(|w| w.average())
    }

    /// Mean of the window, only once it holds `capacity` samples.
    pub fn full_average(&self, module: &str) -> Option<Duration> {
        self.windows
            .get(module)
            .filter(|w| w.is_full())
            .and_then(|w| w.average())
    }

    pub fn samples(&self, module: &str) -> Vec<Duration> {
        self.windows
            .get(module)
            .map(|w| w.samples())
            .unwrap_or_default()
    }

    pub fn forget(&self, module: &str) {
        self.windows.remove(module);
    }

    pub fn clear(&self) {
        self.windows.clear();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn window_holds_min_of_capacity_and_calls() {
        let mut w = SampleWindow::new(3);
        assert!(w.is_empty());
        assert_eq!(w.average(), None);

        for (i, v) in [10, 20, 30, 40, 50].into_iter().enumerate() {
            w.record(ms(v));
            assert_eq!(w.len(), (i + 1).min(3));
        }
        assert!(w.is_full());
        // 10 and 20 evicted, oldest first.
        assert_eq!(w.samples(), vec![ms(30), ms(40), ms(50)]);
        assert_eq!(w.average(), Some(ms(40)));
    }

    #[test]
    fn partial_window_averages_what_it_has() {
        let mut w = SampleWindow::new(3);
        w.record(ms(100));
        w.record(ms(300));
        assert!(!w.is_full());
        assert_eq!(w.average(), Some(ms(200)));
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut w = SampleWindow::new(0);
        w.record(ms(1));
        w.record(ms(2));
        assert_eq!(w.capacity(), 1);
        assert_eq!(w.samples(), vec![ms(2)]);
    }

    #[test]
    fn full_average_requires_a_full_window() {
        let sampler = ExecutionSampler::new(3);
        sampler.record("pets", Phase::Initialize, ms(6000));
        sampler.record("pets", Phase::Start, ms(6000));

        assert_eq!(sampler.rolling_average("pets"), Some(ms(6000)));
        assert_eq!(sampler.full_average("pets"), None);

        sampler.record("pets", Phase::Start, ms(3000));
        assert_eq!(sampler.full_average("pets"), Some(ms(5000)));
    }

    #[test]
    fn windows_are_per_module_and_forgettable() {
        let sampler = ExecutionSampler::new(3);
        sampler.record("a", Phase::Start, ms(1));
        sampler.record("b", Phase::Start, ms(2));

        assert_eq!(sampler.samples("a"), vec![ms(1)]);
        assert_eq!(sampler.samples("b"), vec![ms(2)]);

        sampler.forget("a");
        assert!(sampler.samples("a").is_empty());
        assert_eq!(sampler.rolling_average("a"), None);

        sampler.clear();
        assert!(sampler.samples("b").is_empty());
    }
}
