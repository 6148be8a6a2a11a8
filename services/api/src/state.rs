//! Application state shared across request handlers.

use std::sync::Arc;

use crate::db::Store;
use crate::oracle::Oracle;
use crate::rate_limit::RateLimiter;

/// Knobs handlers need at request time.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    /// Mark the guest cookie `Secure`.
    pub cookie_secure: bool,
    /// Key rate limits on `x-forwarded-for`/`x-real-ip` instead of the peer.
    pub trust_proxy_headers: bool,
}

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    store: Arc<dyn Store>,
    guest_limiter: Arc<dyn RateLimiter>,
    settings: Settings,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        guest_limiter: Arc<dyn RateLimiter>,
        settings: Settings,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                store,
                guest_limiter,
                settings,
            }),
        }
    }

    pub fn store(&self) -> &dyn Store {
        self.inner.store.as_ref()
    }

    pub fn oracle(&self) -> Oracle<'_> {
        Oracle::new(self.store())
    }

    /// Limiter for unauthenticated trip/group creation, keyed by client IP.
    pub fn guest_limiter(&self) -> &dyn RateLimiter {
        self.inner.guest_limiter.as_ref()
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }
}
