//! Time abstraction
//!
//! All code that needs current time or sleep goes through [`TimeProvider`]
//! rather than `SystemTime::now()` directly, so tests can drive a manual
//! clock through cadence and timeout logic.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Time provider abstraction
#[async_trait]
pub trait TimeProvider: Send + Sync + std::fmt::Debug {
    /// Current time in milliseconds since epoch
    fn now_ms(&self) -> u64;

    /// Sleep for the specified number of milliseconds
    async fn sleep_ms(&self, ms: u64);
}

/// Production time provider using the system clock
#[derive(Debug, Clone, Default)]
pub struct WallClockTime;

impl WallClockTime {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TimeProvider for WallClockTime {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    async fn sleep_ms(&self, ms: u64) {
        tokio::time::sleep(tokio::time::Duration::from_millis(ms)).await;
    }
}

/// Manually advanced clock for tests
///
/// `sleep_ms` advances the clock instead of waiting, so cadence and timeout
/// logic can be exercised without real delays.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
        }
    }

    /// Advance the clock by `ms` milliseconds
    pub fn advance_ms(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }
}

#[async_trait]
impl TimeProvider for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }

    async fn sleep_ms(&self, ms: u64) {
        self.advance_ms(ms);
    }
}
