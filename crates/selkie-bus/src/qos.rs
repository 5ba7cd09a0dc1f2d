//! Consumer flow control
//!
//! Additive-increase concurrency control: a consumer that stays healthy for
//! a full period earns one more unit of prefetch, up to the configured
//! ceiling; any failure resets it to the floor. Deliberately not exponential
//! backoff: recovery after an incident should re-earn capacity gradually,
//! not oscillate.

use selkie_core::BusOptions;

/// Additive-increase / reset-on-failure prefetch controller
#[derive(Debug)]
pub struct QosController {
    current: usize,
    min: usize,
    max: usize,
    healthy_period_ms: u64,
    healthy_since_ms: u64,
}

impl QosController {
    pub fn new(options: &BusOptions, now_ms: u64) -> Self {
        debug_assert!(options.consumer_concurrency_min >= 1);
        debug_assert!(options.consumer_concurrency_max >= options.consumer_concurrency_min);

        Self {
            current: options.consumer_concurrency_min,
            min: options.consumer_concurrency_min,
            max: options.consumer_concurrency_max,
            healthy_period_ms: options.consumer_healthy_period_ms,
            healthy_since_ms: now_ms,
        }
    }

    /// Current prefetch allowance
    pub fn current(&self) -> usize {
        self.current
    }

    /// Record a successful delivery round
    pub fn record_success(&mut self, now_ms: u64) {
        if self.current < self.max
            && now_ms.saturating_sub(self.healthy_since_ms) >= self.healthy_period_ms
        {
            self.current += 1;
            self.healthy_since_ms = now_ms;
        }
    }

    /// Record a delivery failure: collapse back to the floor
    pub fn record_failure(&mut self, now_ms: u64) {
        self.current = self.min;
        self.healthy_since_ms = now_ms;
    }
}
