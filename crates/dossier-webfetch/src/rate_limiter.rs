//! Per-domain rate limiting.
//!
//! Every fetch acquires a per-domain permit: a counting semaphore bounds
//! concurrency and a token-bucket minimum interval bounds request rate. The
//! per-domain entry is created once under the map's shard lock; afterwards
//! the hot path only touches that entry.

use dossier::config::DomainPolicies;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

struct DomainEntry {
    semaphore: Arc<Semaphore>,
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

/// Per-domain limiter configured from the domain-policies overlay.
pub struct DomainRateLimiter {
    policies: DomainPolicies,
    entries: dashmap::DashMap<String, Arc<DomainEntry>>,
}

/// Held for the duration of one fetch; releases the concurrency slot on drop.
pub struct RateLimitPermit {
    _permit: OwnedSemaphorePermit,
}

impl DomainRateLimiter {
    pub fn new(policies: DomainPolicies) -> Self {
        Self {
            policies,
            entries: dashmap::DashMap::new(),
        }
    }

    fn entry_for(&self, domain: &str) -> Arc<DomainEntry> {
        if let Some(entry) = self.entries.get(domain) {
            return entry.clone();
        }
        let policy = self.policies.policy_for(domain);
        let min_interval = if policy.requests_per_second > 0.0 {
            Duration::from_secs_f64(1.0 / policy.requests_per_second)
        } else {
            Duration::ZERO
        };
        self.entries
            .entry(domain.to_string())
            .or_insert_with(|| {
                Arc::new(DomainEntry {
                    semaphore: Arc::new(Semaphore::new(policy.concurrent_limit.max(1) as usize)),
                    last_request: Mutex::new(None),
                    min_interval,
                })
            })
            .clone()
    }

    /// Acquire a permit for a URL's domain, waiting out both the concurrency
    /// limit and the minimum inter-request interval.
    pub async fn acquire(&self, url: &str) -> RateLimitPermit {
        let domain = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_lowercase))
            .unwrap_or_else(|| "unknown".to_string());
        let entry = self.entry_for(&domain);

        // The semaphore is never closed.
        #[allow(clippy::expect_used)]
        let permit = entry
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("domain semaphore is never closed");

        loop {
            let wait = {
                let mut last = entry.last_request.lock();
                let now = Instant::now();
                match *last {
                    Some(prev) => {
                        let elapsed = now.duration_since(prev);
                        if elapsed >= entry.min_interval {
                            *last = Some(now);
                            None
                        } else {
                            Some(entry.min_interval - elapsed)
                        }
                    }
                    None => {
                        *last = Some(now);
                        None
                    }
                }
            };
            match wait {
                Some(duration) => tokio::time::sleep(duration).await,
                None => break,
            }
        }

        RateLimitPermit { _permit: permit }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use dossier::config::DomainPolicy;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn policies(rps: f64, concurrent: u32) -> DomainPolicies {
        DomainPolicies {
            defaults: DomainPolicy {
                requests_per_second: rps,
                concurrent_limit: concurrent,
            },
            domains: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_concurrency_bounded_per_domain() {
        let limiter = Arc::new(DomainRateLimiter::new(policies(10_000.0, 2)));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = limiter.clone();
            let active = active.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let _permit = limiter.acquire("https://example.com/a").await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_interval_between_requests() {
        let limiter = DomainRateLimiter::new(policies(2.0, 5));
        let start = tokio::time::Instant::now();
        {
            let _p = limiter.acquire("https://example.com/1").await;
        }
        {
            let _p = limiter.acquire("https://example.com/2").await;
        }
        // 2 rps → at least 500ms between the two acquisitions.
        assert!(start.elapsed() >= Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_domains_are_independent() {
        let limiter = Arc::new(DomainRateLimiter::new(policies(10_000.0, 1)));
        let _a = limiter.acquire("https://one.example/x").await;
        // A held permit on one.example must not block two.example.
        let acquired = tokio::time::timeout(
            Duration::from_secs(1),
            limiter.acquire("https://two.example/y"),
        )
        .await;
        assert!(acquired.is_ok());
    }
}
