//! withme.travel membership API library.
//!
//! This crate primarily ships a `withme-api` binary, but we expose a small
//! library surface to enable integration testing against the router.

pub mod api;
pub mod config;
pub mod db;
pub mod guest;
pub mod oracle;
pub mod policy;
pub mod rate_limit;
pub mod state;
