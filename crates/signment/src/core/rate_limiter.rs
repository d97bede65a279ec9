use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

/// Fixed-window rate limiter for in-process request throttling.
///
/// One instance serves one surface: the bot limiter is keyed by chat ID,
/// the web limiter by client address. Keys are plain strings so both fit
/// the same structure.
#[derive(Clone)]
pub struct RateLimiter {
    windows: Arc<Mutex<HashMap<String, WindowState>>>,
    window: Duration,
    max_per_window: u32,
}

#[derive(Debug, Clone, Copy)]
struct WindowState {
    started: Instant,
    count: u32,
}

impl RateLimiter {
    /// Creates a limiter allowing `max_per_window` hits per `window`.
    pub fn new(window: Duration, max_per_window: u32) -> Self {
        Self {
            windows: Arc::new(Mutex::new(HashMap::new())),
            window,
            max_per_window,
        }
    }

    /// Records a hit for `key` and returns whether it is allowed.
    ///
    /// The first hit in a window always passes; once `max_per_window`
    /// hits have been recorded the remainder of the window is rejected.
    pub async fn check(&self, key: &str) -> bool {
        let mut windows = self.windows.lock().await;
        let now = Instant::now();

        let state = windows.entry(key.to_string()).or_insert(WindowState {
            started: now,
            count: 0,
        });

        if now.duration_since(state.started) >= self.window {
            state.started = now;
            state.count = 0;
        }

        state.count += 1;
        state.count <= self.max_per_window
    }

    /// Remaining time until the window for `key` resets, if it is
    /// currently exhausted.
    pub async fn retry_after(&self, key: &str) -> Option<Duration> {
        let windows = self.windows.lock().await;
        let state = windows.get(key)?;
        if state.count <= self.max_per_window {
            return None;
        }
        let elapsed = state.started.elapsed();
        if elapsed >= self.window {
            None
        } else {
            Some(self.window - elapsed)
        }
    }

    /// Drops the window for `key`, lifting any active limit.
    pub async fn reset(&self, key: &str) {
        let mut windows = self.windows.lock().await;
        windows.remove(key);
    }

    /// Starts a periodic cleanup of expired windows so the map does not
    /// grow with one entry per client forever.
    pub fn spawn_cleanup_task(self: Arc<Self>, interval: Duration) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let mut windows = self.windows.lock().await;
                let before = windows.len();
                let window = self.window;
                windows.retain(|_, state| state.started.elapsed() < window);
                let removed = before - windows.len();
                if removed > 0 {
                    log::debug!("Rate limiter cleanup removed {} expired window(s)", removed);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_allows_up_to_max() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 3);
        assert!(limiter.check("42").await);
        assert!(limiter.check("42").await);
        assert!(limiter.check("42").await);
        assert!(!limiter.check("42").await);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 1);
        assert!(limiter.check("a").await);
        assert!(!limiter.check("a").await);
        assert!(limiter.check("b").await);
    }

    #[tokio::test]
    async fn test_window_resets() {
        let limiter = RateLimiter::new(Duration::from_millis(20), 1);
        assert!(limiter.check("42").await);
        assert!(!limiter.check("42").await);
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(limiter.check("42").await);
    }

    #[tokio::test]
    async fn test_reset_lifts_limit() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 1);
        assert!(limiter.check("42").await);
        assert!(!limiter.check("42").await);
        limiter.reset("42").await;
        assert!(limiter.check("42").await);
    }

    #[tokio::test]
    async fn test_retry_after_reported_when_exhausted() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 1);
        assert!(limiter.check("42").await);
        assert!(limiter.retry_after("42").await.is_none());
        assert!(!limiter.check("42").await);
        let remaining = limiter.retry_after("42").await;
        assert!(remaining.is_some());
        assert!(remaining.unwrap() <= Duration::from_secs(60));
    }
}
