use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Clients whose windows have emptied are dropped once the map grows past this.
const PRUNE_THRESHOLD: usize = 10_000;

/// Sliding-window admission gate keyed by client address.
///
/// Each check discards timestamps older than `window`, then admits only if
/// fewer than `max_requests` remain. Rejected requests are not recorded.
#[derive(Debug)]
pub struct RateLimiter {
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            max_requests,
            window,
        }
    }

    pub fn admit(&self, client_id: &str) -> bool {
        self.admit_at(client_id, Instant::now())
    }

    fn admit_at(&self, client_id: &str, now: Instant) -> bool {
        let mut windows = self.windows.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if windows.len() > PRUNE_THRESHOLD {
            let window = self.window;
            windows.retain(|_, stamps| {
                stamps.back().is_some_and(|last| now.duration_since(*last) < window)
            });
        }

        let stamps = windows.entry(client_id.to_string()).or_default();
        while let Some(oldest) = stamps.front() {
            if now.duration_since(*oldest) >= self.window {
                stamps.pop_front();
            } else {
                break;
            }
        }

        if stamps.len() >= self.max_requests {
            return false;
        }
        stamps.push_back(now);
        true
    }

    pub fn tracked_clients(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_eleventh_request_in_window_is_rejected() {
        let limiter = RateLimiter::new(10, Duration::from_secs(60));
        for _ in 0..10 {
            assert!(limiter.admit("10.0.0.1"));
            tokio::time::advance(Duration::from_secs(1)).await;
        }
        assert!(!limiter.admit("10.0.0.1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_admits_again_after_window_elapses() {
        let limiter = RateLimiter::new(10, Duration::from_secs(60));
        for _ in 0..10 {
            assert!(limiter.admit("10.0.0.1"));
        }
        assert!(!limiter.admit("10.0.0.1"));
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(limiter.admit("10.0.0.1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_slides_rather_than_resets() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.admit("c"));
        tokio::time::advance(Duration::from_secs(40)).await;
        assert!(limiter.admit("c"));
        tokio::time::advance(Duration::from_secs(30)).await;
        // first stamp is 70s old, second only 30s
        assert!(limiter.admit("c"));
        assert!(!limiter.admit("c"));
    }

    #[test]
    fn test_clients_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.admit("a"));
        assert!(!limiter.admit("a"));
        assert!(limiter.admit("b"));
        assert_eq!(limiter.tracked_clients(), 2);
    }

    #[test]
    fn test_rejections_do_not_extend_the_window() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let start = Instant::now();
        assert!(limiter.admit_at("a", start));
        assert!(!limiter.admit_at("a", start + Duration::from_secs(59)));
        assert!(limiter.admit_at("a", start + Duration::from_secs(60)));
    }
}
