//! Request pacing gate for market-data fetches
//!
//! Provider calls are externally rate-limited, so all fetches go through
//! a shared gate that bounds in-flight requests and enforces a minimum
//! spacing between dispatches. Acquiring is a suspension point, not a
//! CPU one.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct RequestGateConfig {
    /// Maximum concurrent in-flight requests
    pub max_in_flight: usize,
    /// Minimum spacing between request dispatches
    pub min_interval: Duration,
}

impl Default for RequestGateConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 4,
            min_interval: Duration::from_millis(100),
        }
    }
}

/// Bounded-concurrency limiter shared by all concurrent fetchers.
/// Cloning shares the underlying gate.
#[derive(Debug, Clone)]
pub struct RequestGate {
    permits: Arc<Semaphore>,
    min_interval: Duration,
    last_dispatch: Arc<Mutex<Option<Instant>>>,
}

/// Held for the duration of one request; dropping releases the slot
pub struct RequestPermit {
    _permit: OwnedSemaphorePermit,
}

impl RequestGate {
    pub fn new(config: RequestGateConfig) -> Self {
        RequestGate {
            permits: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
            min_interval: config.min_interval,
            last_dispatch: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RequestGateConfig::default())
    }

    /// Wait for a request slot and for the pacing interval to elapse
    pub async fn acquire(&self) -> RequestPermit {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .expect("request gate semaphore closed");

        let mut last = self.last_dispatch.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());

        RequestPermit { _permit: permit }
    }

    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn permit_release_returns_slot() {
        let gate = RequestGate::new(RequestGateConfig {
            max_in_flight: 2,
            min_interval: Duration::ZERO,
        });

        let p1 = gate.acquire().await;
        let p2 = gate.acquire().await;
        assert_eq!(gate.available_slots(), 0);

        drop(p1);
        drop(p2);
        assert_eq!(gate.available_slots(), 2);
    }

    #[tokio::test]
    async fn dispatches_are_spaced() {
        let gate = RequestGate::new(RequestGateConfig {
            max_in_flight: 8,
            min_interval: Duration::from_millis(20),
        });

        let start = Instant::now();
        for _ in 0..3 {
            let _permit = gate.acquire().await;
        }
        // Two enforced gaps after the first dispatch
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn clones_share_capacity() {
        let gate = RequestGate::new(RequestGateConfig {
            max_in_flight: 1,
            min_interval: Duration::ZERO,
        });
        let other = gate.clone();

        let _held = gate.acquire().await;
        assert_eq!(other.available_slots(), 0);
    }
}
