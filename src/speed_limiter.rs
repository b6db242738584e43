//! Global bandwidth limiting shared by every transfer of a manager.
//!
//! A token bucket holding at most one second worth of bytes. Chunk workers call
//! [`SpeedLimiter::acquire`] with the size of the chunk before its transport call;
//! chunks larger than the bucket drain it repeatedly and wait for refills, so a
//! single worker can never exceed the configured rate.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Bucket {
    /// Bytes per second, 0 = unlimited
    limit_bps: u64,
    tokens: u64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant) {
        if self.limit_bps == 0 {
            return;
        }
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        let added = (self.limit_bps as f64 * elapsed) as u64;
        if added > 0 {
            self.tokens = self.tokens.saturating_add(added).min(self.limit_bps);
            self.last_refill = now;
        }
    }
}

/// Token-bucket bandwidth limiter
///
/// Cloning shares the same bucket, so one limiter caps the combined rate of
/// every task it is handed to.
#[derive(Clone, Debug)]
pub struct SpeedLimiter {
    bucket: Arc<Mutex<Bucket>>,
}

impl SpeedLimiter {
    /// Create a limiter; `None` means unlimited
    #[must_use]
    pub fn new(limit_bps: Option<u64>) -> Self {
        let limit = limit_bps.unwrap_or(0);
        Self {
            bucket: Arc::new(Mutex::new(Bucket {
                limit_bps: limit,
                tokens: limit,
                last_refill: Instant::now(),
            })),
        }
    }

    /// Change the rate at runtime. Raising the limit makes the difference
    /// available immediately; lowering it caps the stored tokens.
    pub fn set_limit(&self, limit_bps: Option<u64>) {
        let new_limit = limit_bps.unwrap_or(0);
        let mut bucket = self.lock();
        let old_limit = std::mem::replace(&mut bucket.limit_bps, new_limit);

        if new_limit > old_limit {
            bucket.tokens = bucket.tokens.saturating_add(new_limit - old_limit);
        }
        bucket.tokens = bucket.tokens.min(new_limit);
        bucket.last_refill = Instant::now();

        tracing::info!(limit_bps = ?limit_bps, "speed limit changed");
    }

    /// Current rate, `None` when unlimited
    pub fn get_limit(&self) -> Option<u64> {
        match self.lock().limit_bps {
            0 => None,
            limit => Some(limit),
        }
    }

    /// Wait until `bytes` may be sent
    pub async fn acquire(&self, bytes: u64) {
        let mut remaining = bytes;

        while remaining > 0 {
            let wait = {
                let mut bucket = self.lock();
                if bucket.limit_bps == 0 {
                    return;
                }
                bucket.refill(Instant::now());

                let taken = remaining.min(bucket.tokens);
                bucket.tokens -= taken;
                remaining -= taken;
                if remaining == 0 {
                    return;
                }

                let needed = remaining.min(bucket.limit_bps);
                Duration::from_secs_f64(needed as f64 / bucket.limit_bps as f64)
            };

            tokio::time::sleep(wait.clamp(Duration::from_millis(10), Duration::from_millis(100)))
                .await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Bucket> {
        // Bucket state stays consistent even if a holder panicked
        self.bucket.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    fn available(&self) -> u64 {
        self.lock().tokens
    }
}
