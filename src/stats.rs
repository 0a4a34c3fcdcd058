//! Call and cost counters.
//!
//! [`GlobalStats`] is shared by every backend in a process (pass it around
//! in an `Arc`); [`ModelStats`] belongs to one backend instance.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::warn;

/// Process-wide totals, safe to update from any thread or task.
///
/// The cost is an `f64` stored as bits in an `AtomicU64` and updated with a
/// compare-and-swap loop, so concurrent additions are never lost.
#[derive(Debug, Default)]
pub struct GlobalStats {
    cost_bits: AtomicU64,
    n_calls: AtomicU64,
}

impl GlobalStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one successful call and its cost.
    ///
    /// Negative or NaN amounts are not added to the cost (the call is
    /// still counted).
    pub fn add(&self, cost: f64) {
        self.n_calls.fetch_add(1, Ordering::Relaxed);

        if cost.is_nan() || cost < 0.0 {
            warn!("Ignoring invalid call cost {} in global stats", cost);
            return;
        }

        // fetch_update only fails when the closure returns None
        let _ = self
            .cost_bits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                Some((f64::from_bits(bits) + cost).to_bits())
            });
    }

    /// Total dollars spent.
    pub fn cost(&self) -> f64 {
        f64::from_bits(self.cost_bits.load(Ordering::Acquire))
    }

    /// Number of successful calls.
    pub fn n_calls(&self) -> u64 {
        self.n_calls.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> ModelStats {
        ModelStats {
            n_calls: self.n_calls(),
            cost: self.cost(),
        }
    }
}

/// Counters of a single backend instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ModelStats {
    pub n_calls: u64,
    pub cost: f64,
}

impl ModelStats {
    pub fn record(&mut self, cost: f64) {
        self.n_calls += 1;
        self.cost += cost;
    }

    /// Format as a short summary string.
    pub fn summary(&self) -> String {
        format!("calls: {}, cost: ${:.4}", self.n_calls, self.cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_add_accumulates() {
        let stats = GlobalStats::new();
        stats.add(0.5);
        stats.add(0.25);
        assert_eq!(stats.cost(), 0.75);
        assert_eq!(stats.n_calls(), 2);
    }

    #[test]
    fn test_invalid_cost_is_counted_but_not_added() {
        let stats = GlobalStats::new();
        stats.add(1.0);
        stats.add(-3.0);
        stats.add(f64::NAN);
        assert_eq!(stats.cost(), 1.0);
        assert_eq!(stats.n_calls(), 3);
    }

    #[test]
    fn test_concurrent_threads_lose_no_updates() {
        let stats = Arc::new(GlobalStats::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = stats.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.add(0.125);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(stats.n_calls(), 8000);
        assert_eq!(stats.cost(), 1000.0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_tasks_lose_no_updates() {
        let stats = Arc::new(GlobalStats::new());
        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let stats = stats.clone();
                tokio::spawn(async move {
                    for _ in 0..100 {
                        stats.add(0.5);
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(stats.n_calls(), 1600);
        assert_eq!(stats.cost(), 800.0);
    }

    #[test]
    fn test_model_stats_summary() {
        let mut stats = ModelStats::default();
        stats.record(0.5);
        stats.record(0.25);
        assert_eq!(stats.n_calls, 2);
        assert_eq!(stats.summary(), "calls: 2, cost: $0.7500");
    }
}
