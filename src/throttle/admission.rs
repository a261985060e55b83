//! Batch admission control
//!
//! Bounds how many page batches may be in flight at once and enforces a
//! minimum spacing between batch starts. This is coarse-grained and
//! independent of the per-request delay.

use crate::config::BatchingConfig;
use crate::state::lock_unpoisoned;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct AdmissionState {
    active_batch_count: u32,
    last_batch_start: Option<Instant>,
}

/// Gatekeeper for concurrent batches
#[derive(Debug)]
pub struct BatchAdmissionController {
    max_concurrent_batches: u32,
    batch_delay: Duration,
    poll_interval: Duration,
    state: Mutex<AdmissionState>,
}

impl BatchAdmissionController {
    /// Creates a controller
    ///
    /// # Arguments
    ///
    /// * `max_concurrent_batches` - Upper bound on active batches
    /// * `batch_delay` - Minimum time between two successful batch starts
    /// * `poll_interval` - Sleep between two attempts in [`wait_for_slot`](Self::wait_for_slot)
    pub fn new(max_concurrent_batches: u32, batch_delay: Duration, poll_interval: Duration) -> Self {
        Self {
            max_concurrent_batches,
            batch_delay,
            poll_interval,
            state: Mutex::new(AdmissionState {
                active_batch_count: 0,
                last_batch_start: None,
            }),
        }
    }

    pub fn from_config(config: &BatchingConfig) -> Self {
        Self::new(
            config.max_concurrent_batches,
            config.batch_delay(),
            config.poll_interval(),
        )
    }

    /// Tries to claim a batch slot without waiting
    ///
    /// # Returns
    ///
    /// * `true` - A slot was claimed; the caller must call [`finish_batch`](Self::finish_batch)
    /// * `false` - Too many active batches, or the previous batch started too recently
    pub fn try_start_batch(&self) -> bool {
        let mut state = lock_unpoisoned(&self.state);

        if state.active_batch_count >= self.max_concurrent_batches {
            return false;
        }

        let now = Instant::now();
        if let Some(last) = state.last_batch_start {
            if now.duration_since(last) < self.batch_delay {
                return false;
            }
        }

        state.active_batch_count += 1;
        state.last_batch_start = Some(now);
        true
    }

    /// Releases a batch slot
    ///
    /// Saturates at zero, so an extra call is harmless.
    pub fn finish_batch(&self) {
        let mut state = lock_unpoisoned(&self.state);
        state.active_batch_count = state.active_batch_count.saturating_sub(1);
    }

    /// Polls [`try_start_batch`](Self::try_start_batch) until it succeeds
    pub async fn wait_for_slot(&self) {
        while !self.try_start_batch() {
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Waits for a slot and returns a guard that releases it when dropped
    ///
    /// The guard releases the slot on every exit path of the batch, including
    /// early returns and panics.
    pub async fn acquire(&self) -> BatchSlot<'_> {
        self.wait_for_slot().await;
        BatchSlot { controller: self }
    }

    pub fn active_batches(&self) -> u32 {
        lock_unpoisoned(&self.state).active_batch_count
    }

    pub fn max_concurrent_batches(&self) -> u32 {
        self.max_concurrent_batches
    }
}

/// A claimed admission slot; dropping it calls `finish_batch`
#[derive(Debug)]
pub struct BatchSlot<'a> {
    controller: &'a BatchAdmissionController,
}

impl Drop for BatchSlot<'_> {
    fn drop(&mut self) {
        self.controller.finish_batch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_respects_max_concurrent_batches() {
        let controller = BatchAdmissionController::new(2, Duration::ZERO, Duration::from_millis(1));

        assert!(controller.try_start_batch());
        assert!(controller.try_start_batch());
        assert!(!controller.try_start_batch());
        assert_eq!(controller.active_batches(), 2);

        controller.finish_batch();
        assert!(controller.try_start_batch());
    }

    #[test]
    fn test_enforces_batch_spacing() {
        let controller =
            BatchAdmissionController::new(10, Duration::from_secs(60), Duration::from_millis(1));

        assert!(controller.try_start_batch());
        // Capacity is free but the previous start was too recent
        assert!(!controller.try_start_batch());
        assert_eq!(controller.active_batches(), 1);
    }

    #[test]
    fn test_finish_batch_floors_at_zero() {
        let controller = BatchAdmissionController::new(1, Duration::ZERO, Duration::from_millis(1));
        controller.finish_batch();
        controller.finish_batch();
        assert_eq!(controller.active_batches(), 0);

        assert!(controller.try_start_batch());
        assert!(!controller.try_start_batch());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_slot_polls_until_free() {
        let controller = Arc::new(BatchAdmissionController::new(
            1,
            Duration::ZERO,
            Duration::from_secs(1),
        ));
        assert!(controller.try_start_batch());

        let releaser = controller.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            releaser.finish_batch();
        });

        let start = tokio::time::Instant::now();
        controller.wait_for_slot().await;
        assert!(start.elapsed() >= Duration::from_millis(2500));
        assert_eq!(controller.active_batches(), 1);
    }

    #[tokio::test]
    async fn test_slot_guard_releases_on_drop() {
        let controller = BatchAdmissionController::new(1, Duration::ZERO, Duration::from_millis(1));
        {
            let _slot = controller.acquire().await;
            assert_eq!(controller.active_batches(), 1);
        }
        assert_eq!(controller.active_batches(), 0);
    }

    #[test]
    fn test_slot_guard_releases_on_panic() {
        let controller = Arc::new(BatchAdmissionController::new(
            1,
            Duration::ZERO,
            Duration::from_millis(1),
        ));

        let inner = controller.clone();
        let result = std::thread::spawn(move || {
            assert!(inner.try_start_batch());
            let _slot = BatchSlot { controller: &inner };
            panic!("batch blew up");
        })
        .join();

        assert!(result.is_err());
        assert_eq!(controller.active_batches(), 0);
    }

    #[test]
    fn test_never_exceeds_capacity_under_concurrency() {
        let mut rng = rand::thread_rng();

        for _ in 0..20 {
            let max = rng.gen_range(1..=4);
            let controller = Arc::new(BatchAdmissionController::new(
                max,
                Duration::ZERO,
                Duration::from_millis(1),
            ));
            let in_flight = Arc::new(AtomicU32::new(0));
            let peak = Arc::new(AtomicU32::new(0));

            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let controller = controller.clone();
                    let in_flight = in_flight.clone();
                    let peak = peak.clone();
                    std::thread::spawn(move || {
                        let mut rng = rand::thread_rng();
                        for _ in 0..200 {
                            if controller.try_start_batch() {
                                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                                peak.fetch_max(now, Ordering::SeqCst);
                                assert!(controller.active_batches() <= max);
                                if rng.gen_bool(0.5) {
                                    std::thread::yield_now();
                                }
                                in_flight.fetch_sub(1, Ordering::SeqCst);
                                controller.finish_batch();
                            } else if rng.gen_bool(0.1) {
                                // stray finish with nothing held
                                controller.finish_batch();
                            }
                        }
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }

            assert!(peak.load(Ordering::SeqCst) <= max);
            assert!(controller.active_batches() <= max);
        }
    }
}
