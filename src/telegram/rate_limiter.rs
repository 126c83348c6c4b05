//! Pacing for bursts of moderation calls.
//!
//! An expiry sweep may kick many members back to back; spacing the calls
//! keeps the bot clear of Telegram's flood limits.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Enforces a minimum interval between permits.
#[derive(Debug)]
pub struct RateLimiter {
    /// Minimum duration between two permits.
    min_interval: Duration,

    /// When the last permit was handed out.
    last_permit: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Creates a limiter with the given minimum interval.
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_permit: Mutex::new(None),
        }
    }

    /// Waits until the next permit is due and takes it.
    ///
    /// Returns how long the caller waited.
    pub async fn acquire(&self) -> Duration {
        let mut last = self.last_permit.lock().await;

        let wait = last.map_or(Duration::ZERO, |at| {
            self.min_interval.saturating_sub(at.elapsed())
        });

        if !wait.is_zero() {
            debug!("Rate limiter: waiting {:?}", wait);
            tokio::time::sleep(wait).await;
        }

        *last = Some(Instant::now());
        wait
    }

    /// Honors a flood wait reported by Telegram before any further permit.
    pub async fn handle_flood_wait(&self, wait_seconds: u32) {
        warn!("Received flood wait from Telegram: {} seconds", wait_seconds);

        let mut last = self.last_permit.lock().await;
        tokio::time::sleep(Duration::from_secs(u64::from(wait_seconds))).await;
        *last = Some(Instant::now());
    }
}
