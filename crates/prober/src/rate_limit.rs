use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

/// Spaces requests to the same host at least `interval` apart.
///
/// Each caller reserves the next free slot for its host and sleeps until
/// then, so concurrent workers never burst a single host.
#[derive(Debug)]
pub struct HostRateLimiter {
    interval: Duration,
    next_slot: DashMap<String, Instant>,
}

impl HostRateLimiter {
    /// `requests_per_second == 0` disables limiting.
    pub fn new(requests_per_second: u32) -> Self {
        let interval = if requests_per_second == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(1) / requests_per_second
        };
        Self {
            interval,
            next_slot: DashMap::new(),
        }
    }

    pub async fn acquire(&self, host: &str) {
        if self.interval.is_zero() {
            return;
        }
        let now = Instant::now();
        let slot = {
            let mut next = self.next_slot.entry(host.to_string()).or_insert(now);
            let slot = (*next).max(now);
            *next = slot + self.interval;
            slot
        };
        tokio::time::sleep_until(slot).await;
    }

    #[cfg(test)]
    fn tracked_hosts(&self) -> usize {
        self.next_slot.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_same_host_is_spaced() {
        let limiter = HostRateLimiter::new(2);
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire("example.com").await;
        }
        assert!(start.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hosts_are_independent() {
        let limiter = HostRateLimiter::new(1);
        let start = Instant::now();
        limiter.acquire("a.example.com").await;
        limiter.acquire("b.example.com").await;
        assert!(start.elapsed() < Duration::from_millis(10));
        assert_eq!(limiter.tracked_hosts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_rate_disables_limiting() {
        let limiter = HostRateLimiter::new(0);
        let start = Instant::now();
        for _ in 0..10 {
            limiter.acquire("example.com").await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.tracked_hosts(), 0);
    }
}
