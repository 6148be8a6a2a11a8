//! Guest tokens: the bearer identity of an unauthenticated visitor.
//!
//! A guest token is a random UUID kept in an HTTP-only cookie. The server
//! only ever stores its SHA-256 digest, so a leaked table cannot be replayed
//! as cookies.

use std::fmt;

use axum_extra::extract::cookie::{Cookie, SameSite};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Cookie carrying the guest token.
pub const GUEST_COOKIE: &str = "guest_token";

/// Guest cookie lifetime.
pub const GUEST_COOKIE_MAX_AGE_DAYS: i64 = 30;

/// An opaque guest bearer token.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct GuestToken(Uuid);

impl GuestToken {
    pub fn mint() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses a cookie value. Anything that is not a UUID is ignored.
    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value.trim()).ok().map(Self)
    }

    pub fn hash(&self) -> GuestTokenHash {
        let digest = Sha256::digest(self.0.as_hyphenated().to_string().as_bytes());
        GuestTokenHash(hex::encode(digest))
    }

    /// Cookie that stores this token on the client.
    pub fn cookie(&self, secure: bool) -> Cookie<'static> {
        Cookie::build((GUEST_COOKIE, self.0.as_hyphenated().to_string()))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(secure)
            .max_age(time::Duration::days(GUEST_COOKIE_MAX_AGE_DAYS))
            .build()
    }
}

// Never print the token itself.
impl fmt::Debug for GuestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("GuestToken(<redacted>)")
    }
}

/// Hex SHA-256 digest of a guest token; the only form the store sees.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GuestTokenHash(String);

impl GuestTokenHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Cookie handed to `CookieJar::remove` once the token has been claimed.
pub fn removal_cookie() -> Cookie<'static> {
    Cookie::build((GUEST_COOKIE, "")).path("/").build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_attributes() {
        let token = GuestToken::mint();
        let cookie = token.cookie(false);
        assert_eq!(cookie.name(), GUEST_COOKIE);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.max_age(), Some(time::Duration::days(30)));
        assert_eq!(GuestToken::parse(cookie.value()), Some(token));
    }

    #[test]
    fn test_hash_is_stable_and_hides_token() {
        let token = GuestToken::mint();
        let a = token.hash();
        let b = token.hash();
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert!(!a.as_str().contains(&token.cookie(false).value().to_string()));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(GuestToken::parse("not-a-token").is_none());
        assert!(GuestToken::parse("").is_none());
    }

    #[test]
    fn test_debug_is_redacted() {
        let token = GuestToken::mint();
        let value = token.cookie(false).value().to_string();
        assert!(!format!("{token:?}").contains(&value));
    }
}
