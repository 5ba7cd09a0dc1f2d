//! Event producer side of the bus
//!
//! Publishing happens after the event is already durable in the event store,
//! so a failed publish never loses a fact. The retry wrapper absorbs
//! transient broker trouble; exhaustion is logged for a re-publish sweep to
//! remediate, it is never surfaced back to the actor that raised the event.

use async_trait::async_trait;
use bytes::Bytes;
use selkie_core::{Error, Result, TimeProvider};
use std::sync::Arc;
use tracing::{error, warn};

/// Transport seam for publishing committed events
///
/// `hash_key` routes all events of one actor to the same partition so
/// per-actor order survives the broker.
#[async_trait]
pub trait EventProducer: Send + Sync {
    async fn publish(&self, hash_key: &str, payload: Bytes) -> Result<()>;
}

/// Producer wrapper with bounded linear-backoff retries
pub struct RetryingProducer {
    inner: Arc<dyn EventProducer>,
    retry_count_max: u32,
    retry_backoff_ms: u64,
    time: Arc<dyn TimeProvider>,
}

impl RetryingProducer {
    pub fn new(
        inner: Arc<dyn EventProducer>,
        retry_count_max: u32,
        retry_backoff_ms: u64,
        time: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            inner,
            retry_count_max,
            retry_backoff_ms,
            time,
        }
    }
}

#[async_trait]
impl EventProducer for RetryingProducer {
    async fn publish(&self, hash_key: &str, payload: Bytes) -> Result<()> {
        let mut attempts = 0u32;
        loop {
            match self.inner.publish(hash_key, payload.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retriable() && attempts + 1 < self.retry_count_max => {
                    attempts += 1;
                    warn!(
                        hash_key,
                        attempt = attempts,
                        error = %e,
                        "publish failed, retrying"
                    );
                    // Linear backoff: attempt N waits N * base
                    self.time
                        .sleep_ms(self.retry_backoff_ms * u64::from(attempts))
                        .await;
                }
                Err(e) => {
                    let attempts = attempts + 1;
                    error!(
                        hash_key,
                        attempts,
                        error = %e,
                        "publish exhausted retries; event remains durable, needs re-publish sweep"
                    );
                    return Err(Error::PublishFailed {
                        hash_key: hash_key.to_string(),
                        attempts,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use selkie_core::ManualClock;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyTransport {
        fail_remaining: AtomicU32,
        published: AtomicU32,
    }

    #[async_trait]
    impl EventProducer for FlakyTransport {
        async fn publish(&self, _hash_key: &str, _payload: Bytes) -> Result<()> {
            if self.fail_remaining.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                n.checked_sub(1)
            }).is_ok()
            {
                return Err(Error::storage_failed("publish", "broker down"));
            }
            self.published.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let transport = Arc::new(FlakyTransport {
            fail_remaining: AtomicU32::new(2),
            published: AtomicU32::new(0),
        });
        let producer = RetryingProducer::new(
            transport.clone(),
            5,
            1,
            Arc::new(ManualClock::new(0)),
        );

        producer
            .publish("account:a-1", Bytes::from_static(b"e"))
            .await
            .unwrap();
        assert_eq!(transport.published.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_attempts() {
        let transport = Arc::new(FlakyTransport {
            fail_remaining: AtomicU32::new(100),
            published: AtomicU32::new(0),
        });
        let producer = RetryingProducer::new(
            transport.clone(),
            3,
            1,
            Arc::new(ManualClock::new(0)),
        );

        let err = producer
            .publish("account:a-1", Bytes::from_static(b"e"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PublishFailed { attempts: 3, .. }));
        assert_eq!(transport.published.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_nonretriable_fails_fast() {
        struct Rejecting;

        #[async_trait]
        impl EventProducer for Rejecting {
            async fn publish(&self, _hash_key: &str, _payload: Bytes) -> Result<()> {
                Err(Error::internal("bad payload"))
            }
        }

        let producer = RetryingProducer::new(
            Arc::new(Rejecting),
            5,
            1,
            Arc::new(ManualClock::new(0)),
        );
        let err = producer
            .publish("account:a-1", Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PublishFailed { attempts: 1, .. }));
    }
}
