//! Fixed-window rate limiting for unauthenticated resource creation.
//!
//! Two backends behind [`RateLimiter`]: an in-process map that resets on
//! restart, and a Postgres table shared by every instance.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;
use thiserror::Error;

/// Counter scope for guest trip/group creation.
pub const GUEST_CREATE_SCOPE: &str = "guest_create";

/// Past this many tracked keys, expired windows are dropped on the next hit.
const PRUNE_THRESHOLD: usize = 10_000;

/// Outcome of counting one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("rate limit store failed: {0}")]
    Store(#[from] sqlx::Error),
}

/// Counts requests per key.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Record one request for `key` and decide whether it may proceed.
    async fn hit(&self, key: &str) -> Result<RateDecision, RateLimitError>;
}

// =============================================================================
// In-memory
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Per-key fixed window kept in process memory.
pub struct FixedWindowLimiter {
    limit: u32,
    window: Duration,
    windows: Mutex<HashMap<String, Window>>,
}

impl FixedWindowLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// [`RateLimiter::hit`] with an explicit clock.
    pub fn hit_at(&self, key: &str, now: Instant) -> RateDecision {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);

        if windows.len() > PRUNE_THRESHOLD {
            let window = self.window;
            windows.retain(|_, w| now.saturating_duration_since(w.started) < window);
        }

        let entry = windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });

        let elapsed = now.saturating_duration_since(entry.started);
        if elapsed >= self.window {
            *entry = Window {
                started: now,
                count: 0,
            };
        }

        if entry.count >= self.limit {
            let retry_after = self
                .window
                .saturating_sub(now.saturating_duration_since(entry.started));
            return RateDecision::Limited { retry_after };
        }

        entry.count += 1;
        RateDecision::Allowed {
            remaining: self.limit - entry.count,
        }
    }
}

#[async_trait]
impl RateLimiter for FixedWindowLimiter {
    async fn hit(&self, key: &str) -> Result<RateDecision, RateLimitError> {
        Ok(self.hit_at(key, Instant::now()))
    }
}

// =============================================================================
// Postgres
// =============================================================================

/// Fixed window stored in `rate_limit_windows`, shared across instances.
pub struct PgRateLimiter {
    pool: PgPool,
    scope: &'static str,
    limit: u32,
    window: Duration,
}

impl PgRateLimiter {
    pub fn new(pool: PgPool, scope: &'static str, limit: u32, window: Duration) -> Self {
        Self {
            pool,
            scope,
            limit,
            window,
        }
    }
}

#[async_trait]
impl RateLimiter for PgRateLimiter {
    async fn hit(&self, key: &str) -> Result<RateDecision, RateLimitError> {
        let row = sqlx::query(
            r#"
            INSERT INTO rate_limit_windows (scope, key, window_start, count)
            VALUES ($1, $2, now(), 1)
            ON CONFLICT (scope, key) DO UPDATE SET
                window_start = CASE
                    WHEN rate_limit_windows.window_start <= now() - make_interval(secs => $3)
                    THEN now() ELSE rate_limit_windows.window_start END,
                count = CASE
                    WHEN rate_limit_windows.window_start <= now() - make_interval(secs => $3)
                    THEN 1 ELSE rate_limit_windows.count + 1 END
            RETURNING count, window_start
            "#,
        )
        .bind(self.scope)
        .bind(key)
        .bind(self.window.as_secs_f64())
        .fetch_one(&self.pool)
        .await?;

        let count: i32 = row.try_get("count")?;
        let window_start: DateTime<Utc> = row.try_get("window_start")?;
        let count = u32::try_from(count).unwrap_or(0);

        if count > self.limit {
            let resets_at = window_start
                + chrono::Duration::from_std(self.window).unwrap_or(chrono::Duration::zero());
            let retry_after = (resets_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            return Ok(RateDecision::Limited { retry_after });
        }

        Ok(RateDecision::Allowed {
            remaining: self.limit - count,
        })
    }
}
