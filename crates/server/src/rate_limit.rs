// crates/server/src/rate_limit.rs
//! Per-project sliding-window admission control.
//!
//! Each project gets a timestamp ring behind its own async mutex: callers on
//! the same project serialize (FIFO through the mutex), different projects
//! never block each other. This limits *rate*; the worker pool and the
//! entry-processing semaphore limit *parallelism*.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Default)]
pub struct RateLimiter {
    windows: std::sync::Mutex<HashMap<String, Arc<Mutex<VecDeque<Instant>>>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn window_for(&self, project_id: &str) -> Arc<Mutex<VecDeque<Instant>>> {
        let mut map = self.windows.lock().expect("rate limiter map lock");
        Arc::clone(map.entry(project_id.to_string()).or_default())
    }

    /// Block until the project may issue one more request, then record it.
    /// With `limit_per_minute` requests already in the window this sleeps
    /// until the oldest timestamp ages out.
    pub async fn wait_for_slot(&self, project_id: &str, limit_per_minute: i64) {
        let limit = limit_per_minute.max(1) as usize;
        let window = self.window_for(project_id);
        let mut timestamps = window.lock().await;

        while timestamps.front().is_some_and(|ts| ts.elapsed() >= WINDOW) {
            timestamps.pop_front();
        }

        if timestamps.len() >= limit {
            let oldest = *timestamps.front().expect("non-empty window");
            let wake_at = oldest + WINDOW;
            let wait = wake_at.saturating_duration_since(Instant::now());
            if !wait.is_zero() {
                tracing::info!(
                    project_id,
                    wait_secs = wait.as_secs_f64(),
                    "rate limit reached, sleeping"
                );
                tokio::time::sleep_until(wake_at).await;
            }
            while timestamps.front().is_some_and(|ts| ts.elapsed() >= WINDOW) {
                timestamps.pop_front();
            }
        }

        timestamps.push_back(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn calls_beyond_the_limit_wait_a_full_window() {
        let limiter = RateLimiter::new();

        limiter.wait_for_slot("p", 1).await;
        let before = Instant::now();
        limiter.wait_for_slot("p", 1).await;
        let waited = Instant::now() - before;

        assert!(waited >= WINDOW, "second call should wait ~60s, got {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn calls_under_the_limit_do_not_wait() {
        let limiter = RateLimiter::new();
        let before = Instant::now();
        for _ in 0..5 {
            limiter.wait_for_slot("p", 10).await;
        }
        assert_eq!(Instant::now(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn projects_do_not_block_each_other() {
        let limiter = Arc::new(RateLimiter::new());

        // Saturate project A.
        limiter.wait_for_slot("a", 1).await;

        // Project B proceeds immediately even while A is saturated.
        let before = Instant::now();
        limiter.wait_for_slot("b", 1).await;
        assert_eq!(Instant::now(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn window_slides_rather_than_resets() {
        let limiter = RateLimiter::new();
        limiter.wait_for_slot("p", 2).await;
        tokio::time::advance(Duration::from_secs(30)).await;
        limiter.wait_for_slot("p", 2).await;

        // Third call must wait until the first timestamp ages out (~30s more),
        // not a full fresh window.
        let before = Instant::now();
        limiter.wait_for_slot("p", 2).await;
        let waited = Instant::now() - before;
        assert!(waited >= Duration::from_secs(29) && waited <= Duration::from_secs(31));
    }
}
