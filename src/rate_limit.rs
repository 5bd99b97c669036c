//! Token-bucket rate limiter for outbound API calls.
//!
//! Capacity and refill rate both equal the configured requests-per-second;
//! tokens refill continuously in proportion to elapsed time, capped at
//! capacity. An optional per-minute cap applies a hard wait when a rolling
//! 60-second window is exhausted.
//!
//! `acquire` blocks cooperatively (tokio sleep, never a thread block) and
//! the check-and-consume step runs under a single mutex so concurrent
//! callers can never over-issue tokens.

use std::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, trace};

const MINUTE: Duration = Duration::from_secs(60);

struct Bucket {
    tokens: f64,
    last_refill: Instant,
    window_started: Instant,
    window_count: u32,
}

/// Concurrency-safe token bucket with an optional per-minute hard cap.
pub struct TokenBucketRateLimiter {
    rate: f64,
    capacity: f64,
    per_minute_cap: Option<u32>,
    inner: Mutex<Bucket>,
}

enum Acquire {
    Ready,
    Wait(Duration),
}

impl TokenBucketRateLimiter {
    /// Create a limiter allowing `requests_per_sec` sustained calls, with
    /// burst capacity equal to one second's worth of tokens.
    pub fn new(requests_per_sec: f64, per_minute_cap: Option<u32>) -> Self {
        let rate = requests_per_sec.max(0.1);
        let now = Instant::now();
        Self {
            rate,
            capacity: rate,
            per_minute_cap,
            inner: Mutex::new(Bucket {
                tokens: rate,
                last_refill: now,
                window_started: now,
                window_count: 0,
            }),
        }
    }

    /// Block (cooperatively) until a token is available, then consume it.
    pub async fn acquire(&self) {
        loop {
            match self.try_acquire(Instant::now()) {
                Acquire::Ready => return,
                Acquire::Wait(wait) => {
                    trace!(wait_ms = wait.as_millis() as u64, "Rate limiter waiting");
                    sleep(wait).await;
                }
            }
        }
    }

    /// Single locked check-and-consume step. Returns how long to sleep
    /// before retrying when no token (or minute budget) is available.
    fn try_acquire(&self, now: Instant) -> Acquire {
        let mut bucket = self.inner.lock().unwrap();

        // Continuous refill proportional to elapsed time, capped at capacity.
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * self.rate).min(self.capacity);
        bucket.last_refill = now;

        // Rolling per-minute window: reset once it elapses.
        let in_window = now.saturating_duration_since(bucket.window_started);
        if in_window >= MINUTE {
            bucket.window_started = now;
            bucket.window_count = 0;
        }

        if let Some(cap) = self.per_minute_cap {
            if bucket.window_count >= cap {
                let wait = MINUTE - now.saturating_duration_since(bucket.window_started);
                debug!(
                    cap,
                    wait_ms = wait.as_millis() as u64,
                    "Per-minute cap reached — hard wait"
                );
                return Acquire::Wait(wait);
            }
        }

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            bucket.window_count += 1;
            return Acquire::Ready;
        }

        let deficit = 1.0 - bucket.tokens;
        Acquire::Wait(Duration::from_secs_f64(deficit / self.rate))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
