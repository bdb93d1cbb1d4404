//! Dynamic in-flight limiter between the per-queue semaphore and the
//! forwarder.
//!
//! A background refresher reads the schedule's throttle factor and derives
//! the in-flight cap: `max_concurrency` when the factor is effectively 1,
//! otherwise `max(min_inflight, round(max_concurrency * factor^exponent))`.
//! Waiters are re-woken on every limit change and re-check the cap before
//! admitting themselves, so the limit is never over-admitted.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::info;

use crate::metrics;
use crate::schedule::ScheduleManager;

#[derive(Clone, Copy, Debug)]
pub struct ThrottleSettings {
    pub per_queue_concurrency: usize,
    pub refresh_seconds: f64,
    pub exponent: f64,
    pub min_inflight: usize,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self {
            per_queue_concurrency: 32,
            refresh_seconds: 1.5,
            exponent: 3.0,
            min_inflight: 1,
        }
    }
}

struct ThrottleState {
    limit: usize,
    inflight: usize,
    factor: f64,
}

pub struct ProcessingThrottle {
    schedule: Arc<ScheduleManager>,
    per_queue_concurrency: usize,
    refresh: Duration,
    exponent: f64,
    min_inflight: usize,
    state: Mutex<ThrottleState>,
    changed: Notify,
}

impl ProcessingThrottle {
    pub fn new(schedule: Arc<ScheduleManager>, settings: ThrottleSettings) -> Arc<Self> {
        let per_queue_concurrency = settings.per_queue_concurrency.max(1);
        let min_inflight = settings.min_inflight.max(1);

        let throttle = Arc::new(Self {
            schedule,
            per_queue_concurrency,
            refresh: Duration::from_secs_f64(settings.refresh_seconds.max(0.5)),
            exponent: settings.exponent.max(1.0),
            min_inflight,
            state: Mutex::new(ThrottleState {
                limit: per_queue_concurrency,
                inflight: 0,
                factor: 1.0,
            }),
            changed: Notify::new(),
        });

        metrics::THROTTLE_FACTOR.with_label_values(&["global"]).set(1.0);
        metrics::THROTTLE_LIMIT
            .with_label_values(&["global"])
            .set(per_queue_concurrency as f64);
        metrics::THROTTLE_INFLIGHT.with_label_values(&["global"]).set(0.0);

        throttle
    }

    /// Spawns the background refresher.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.refresh);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                self.recompute_limit();
            }
        })
    }

    /// Holds one slot for the lifetime of the returned guard.
    pub async fn slot(self: Arc<Self>) -> ThrottleSlot {
        self.acquire().await;
        ThrottleSlot { throttle: self }
    }

    fn recompute_limit(&self) {
        let schedule = self.schedule.snapshot();
        let factor = schedule.throttle_factor();
        let flavour_count = schedule.flavour_names().len().max(1);
        self.apply_factor(factor, flavour_count);
    }

    /// Applies a throttle factor for a given flavour count. The refresher
    /// calls this with values read from the schedule.
    pub fn apply_factor(&self, factor: f64, flavour_count: usize) {
        let factor = factor.clamp(0.0, 1.0);
        let max_concurrency = self.per_queue_concurrency * flavour_count.max(1);

        let new_limit = if factor >= 0.999 {
            max_concurrency
        } else {
            let scaled = (max_concurrency as f64 * factor.powf(self.exponent)).round() as usize;
            scaled.max(self.min_inflight)
        };

        let changed = {
            let mut state = self.state.lock();
            let changed = new_limit != state.limit || (factor - state.factor).abs() > 1e-3;
            state.factor = factor;
            state.limit = new_limit;
            metrics::THROTTLE_FACTOR
                .with_label_values(&["global"])
                .set(factor);
            metrics::THROTTLE_LIMIT
                .with_label_values(&["global"])
                .set(new_limit as f64);
            changed
        };

        if changed {
            // wake every parked waiter so it re-evaluates against the new cap
            self.changed.notify_waiters();
            info!(
                factor,
                limit = new_limit,
                max = max_concurrency,
                "consumer throttle updated"
            );
        }
    }

    pub fn limit(&self) -> usize {
        self.state.lock().limit
    }

    pub fn inflight(&self) -> usize {
        self.state.lock().inflight
    }

    async fn acquire(&self) {
        loop {
            // Arm the wakeup before checking so a broadcast between the
            // check and the await is not lost.
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.inflight < state.limit {
                    state.inflight += 1;
                    metrics::THROTTLE_INFLIGHT
                        .with_label_values(&["global"])
                        .set(state.inflight as f64);
                    return;
                }
            }

            notified.await;
        }
    }

    fn release(&self) {
        {
            let mut state = self.state.lock();
            state.inflight = state.inflight.saturating_sub(1);
            metrics::THROTTLE_INFLIGHT
                .with_label_values(&["global"])
                .set(state.inflight as f64);
        }
        self.changed.notify_one();
    }
}

pub struct ThrottleSlot {
    throttle: Arc<ProcessingThrottle>,
}

impl Drop for ThrottleSlot {
    fn drop(&mut self) {
        self.throttle.release();
    }
}

impl std::fmt::Debug for ProcessingThrottle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ProcessingThrottle")
            .field("limit", &state.limit)
            .field("inflight", &state.inflight)
            .field("factor", &state.factor)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::TrafficSchedule;
    use serde_json::json;

    fn throttle(per_queue: usize) -> Arc<ProcessingThrottle> {
        let manager = Arc::new(ScheduleManager::with_static(TrafficSchedule::fallback()));
        ProcessingThrottle::new(
            manager,
            ThrottleSettings {
                per_queue_concurrency: per_queue,
                ..ThrottleSettings::default()
            },
        )
    }

    #[test]
    fn limit_arithmetic_matches_the_contract() {
        let t = throttle(10);

        // inert at factor 1
        t.apply_factor(1.0, 1);
        assert_eq!(t.limit(), 10);

        // factor 0.2, exponent 3: 10 * 0.008 = 0.08 -> rounds to 0 -> floor 1
        t.apply_factor(0.2, 1);
        assert_eq!(t.limit(), 1);

        // factor 0 preserves liveness through min_inflight
        t.apply_factor(0.0, 1);
        assert_eq!(t.limit(), 1);

        // flavour count scales the base
        t.apply_factor(1.0, 3);
        assert_eq!(t.limit(), 30);

        // near-1 factors are treated as no throttling
        t.apply_factor(0.9995, 2);
        assert_eq!(t.limit(), 20);
    }

    #[test]
    fn limit_is_monotone_in_factor() {
        let t = throttle(16);
        let mut last = 0;
        for step in 0..=10 {
            let factor = step as f64 / 10.0;
            t.apply_factor(factor, 2);
            let limit = t.limit();
            assert!(limit >= last, "limit regressed at factor {factor}");
            last = limit;
        }
    }

    #[tokio::test]
    async fn slots_block_at_the_cap_and_release_on_drop() {
        let t = throttle(2);
        t.apply_factor(1.0, 1);

        let a = t.clone().slot().await;
        let _b = t.clone().slot().await;
        assert_eq!(t.inflight(), 2);

        // third slot must park
        let waiter = {
            let t = t.clone();
            tokio::spawn(async move {
                let _c = t.clone().slot().await;
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(a);
        waiter.await.unwrap();
        assert_eq!(t.inflight(), 2);
    }

    #[tokio::test]
    async fn limit_increase_wakes_parked_waiters() {
        let t = throttle(10);
        t.apply_factor(0.2, 1); // limit 1

        let _held = t.clone().slot().await;

        let waiter = {
            let t = t.clone();
            tokio::spawn(async move {
                let _slot = t.clone().slot().await;
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        // step back to full speed; the parked waiter must proceed
        t.apply_factor(1.0, 1);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter did not wake after limit increase")
            .unwrap();
    }
}
