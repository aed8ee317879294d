// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-key rate limiting.
//!
//! Each job carries a `rate_key`; jobs sharing a key share a max-in-flight
//! budget and queue on it without blocking other keys. Keys without a
//! configured limit run unthrottled.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Budget for one rate key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    /// Maximum concurrent in-flight jobs for the key.
    pub max_in_flight: usize,
    /// Optional per-job deadline; expiry surfaces as a retriable failure.
    pub deadline: Option<Duration>,
}

impl RateLimit {
    /// A budget with the given in-flight cap and no deadline.
    #[must_use]
    pub fn in_flight(max_in_flight: usize) -> Self {
        Self {
            max_in_flight,
            deadline: None,
        }
    }
}

/// Per-key semaphore pool enforcing [`RateLimit`]s.
pub struct RateLimiter {
    limits: BTreeMap<String, RateLimit>,
    semaphores: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl RateLimiter {
    /// Create a limiter from per-key budgets.
    #[must_use]
    pub fn new(limits: BTreeMap<String, RateLimit>) -> Self {
        Self {
            limits,
            semaphores: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire a slot for the key, waiting when its budget is exhausted.
    /// Returns `None` immediately for unlimited keys.
    pub async fn acquire(&self, key: &str) -> Option<OwnedSemaphorePermit> {
        let limit = self.limits.get(key)?;
        let semaphore = {
            let mut map = self.semaphores.lock().expect("rate limiter lock poisoned");
            Arc::clone(
                map.entry(key.to_string())
                    .or_insert_with(|| Arc::new(Semaphore::new(limit.max_in_flight.max(1)))),
            )
        };
        // The semaphore is never closed, so acquisition cannot fail.
        semaphore.acquire_owned().await.ok()
    }

    /// The configured deadline for a key, if any.
    #[must_use]
    pub fn deadline(&self, key: &str) -> Option<Duration> {
        self.limits.get(key).and_then(|l| l.deadline)
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn unlimited_keys_need_no_permit() {
        let limiter = RateLimiter::new(BTreeMap::new());
        assert!(limiter.acquire("anything").await.is_none());
    }

    #[tokio::test]
    async fn limited_keys_bound_in_flight_work() {
        let limits = BTreeMap::from([("tts".to_string(), RateLimit::in_flight(2))]);
        let limiter = Arc::new(RateLimiter::new(limits));

        let peak = Arc::new(AtomicUsize::new(0));
        let current = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = Arc::clone(&limiter);
            let peak = Arc::clone(&peak);
            let current = Arc::clone(&current);
            handles.push(tokio::spawn(async move {
                let _permit = limiter.acquire("tts").await;
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                current.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2, "peak {peak:?} exceeded cap");
    }

    #[test]
    fn deadline_comes_from_the_limit() {
        let limits = BTreeMap::from([(
            "video".to_string(),
            RateLimit {
                max_in_flight: 1,
                deadline: Some(Duration::from_secs(30)),
            },
        )]);
        let limiter = RateLimiter::new(limits);
        assert_eq!(limiter.deadline("video"), Some(Duration::from_secs(30)));
        assert_eq!(limiter.deadline("other"), None);
    }
}
