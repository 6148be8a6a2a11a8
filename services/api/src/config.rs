use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Result};

use crate::db::DbConfig;

/// Where memberships and resources live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

/// Where guest-creation counters live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    pub dev_mode: bool,
    pub store: StoreBackend,
    pub rate_limit_backend: RateLimitBackend,
    pub guest_create_limit: u32,
    pub guest_create_window: Duration,
    pub cookie_secure: bool,
    pub trust_proxy_headers: bool,
    pub database: DbConfig,
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("WITHME_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()?;

        let log_level = std::env::var("WITHME_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let dev_mode = env_flag("WITHME_DEV");

        let store = match std::env::var("WITHME_STORE").as_deref() {
            Err(_) | Ok("postgres") => StoreBackend::Postgres,
            Ok("memory") => StoreBackend::Memory,
            Ok(other) => bail!("WITHME_STORE must be 'postgres' or 'memory', got {other:?}"),
        };

        let rate_limit_backend = match std::env::var("WITHME_RATE_LIMIT_BACKEND").as_deref() {
            Err(_) | Ok("memory") => RateLimitBackend::Memory,
            Ok("postgres") => RateLimitBackend::Postgres,
            Ok(other) => {
                bail!("WITHME_RATE_LIMIT_BACKEND must be 'memory' or 'postgres', got {other:?}")
            }
        };
        if rate_limit_backend == RateLimitBackend::Postgres && store == StoreBackend::Memory {
            bail!("WITHME_RATE_LIMIT_BACKEND=postgres requires WITHME_STORE=postgres");
        }

        let guest_create_limit = match std::env::var("WITHME_GUEST_CREATE_LIMIT") {
            Ok(v) => v.parse()?,
            Err(_) => 5,
        };

        let guest_create_window = match std::env::var("WITHME_GUEST_CREATE_WINDOW_SECS") {
            Ok(v) => Duration::from_secs(v.parse()?),
            Err(_) => Duration::from_secs(3600),
        };

        let cookie_secure = env_flag("WITHME_COOKIE_SECURE");
        let trust_proxy_headers = env_flag("WITHME_TRUST_PROXY_HEADERS");

        let database = DbConfig::from_env();

        Ok(Self {
            listen_addr,
            log_level,
            dev_mode,
            store,
            rate_limit_backend,
            guest_create_limit,
            guest_create_window,
            cookie_secure,
            trust_proxy_headers,
            database,
        })
    }
}
