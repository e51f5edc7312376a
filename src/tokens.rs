//! Opaque bearer and refresh tokens.
//!
//! Tokens are random hex strings stored with an absolute expiry. Access and
//! refresh tokens live in separate collections. Expiry is enforced lazily: a
//! lookup that finds an expired token deletes it and reports it invalid, and
//! nothing sweeps tokens that are never presented again.

use std::sync::Arc;

use fakebooks_core::StoreError;
use fakebooks_sqlite::Store;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::collections::{ACCESS_TOKENS, REFRESH_TOKENS};

pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    fn collection(&self) -> &'static str {
        match self {
            TokenKind::Access => ACCESS_TOKENS,
            TokenKind::Refresh => REFRESH_TOKENS,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenRecord {
    #[serde(with = "time::serde::rfc3339")]
    issued_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    expires_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub created_at: OffsetDateTime,
}

pub struct TokenManager {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

fn random_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

impl TokenManager {
    pub fn new(store: Arc<Store>, clock: Arc<dyn Clock>, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            store,
            clock,
            access_ttl,
            refresh_ttl,
        }
    }

    fn issue(&self, kind: TokenKind) -> Result<String, StoreError> {
        let token = random_token();
        let now = self.clock.now();
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        let record = TokenRecord {
            issued_at: now,
            expires_at: now + ttl,
        };

        self.store.put_string(kind.collection(), &token, &record)?;
        metrics::increment_counter!("fakebooks_tokens_issued_total", "kind" => kind.label());
        Ok(token)
    }

    pub fn issue_access_token(&self) -> Result<String, StoreError> {
        self.issue(TokenKind::Access)
    }

    pub fn issue_refresh_token(&self) -> Result<String, StoreError> {
        self.issue(TokenKind::Refresh)
    }

    pub fn issue_pair(&self) -> Result<TokenPair, StoreError> {
        Ok(TokenPair {
            access_token: self.issue_access_token()?,
            refresh_token: self.issue_refresh_token()?,
            expires_in: self.access_ttl.whole_seconds(),
            created_at: self.clock.now(),
        })
    }

    fn check(&self, kind: TokenKind, token: &str) -> Result<bool, StoreError> {
        let record: TokenRecord = match self.store.get_string(kind.collection(), token) {
            Ok(record) => record,
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e),
        };

        if record.expires_at <= self.clock.now() {
            match self.store.delete_string(kind.collection(), token) {
                Ok(()) => {}
                // A concurrent lookup got there first.
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
            tracing::debug!(kind = kind.label(), "Expired token removed on lookup");
            return Ok(false);
        }

        Ok(true)
    }

    /// True when `token` is a live access token.
    pub fn validate(&self, token: &str) -> Result<bool, StoreError> {
        self.check(TokenKind::Access, token)
    }

    pub fn validate_refresh(&self, token: &str) -> Result<bool, StoreError> {
        self.check(TokenKind::Refresh, token)
    }

    /// Removes `token` whichever kind it is. Revoking an unknown token is a
    /// no-op.
    pub fn revoke(&self, token: &str) -> Result<(), StoreError> {
        self.store.update(|txn| {
            for kind in [TokenKind::Access, TokenKind::Refresh] {
                match txn.delete_string(kind.collection(), token) {
                    Ok(()) => tracing::debug!(kind = kind.label(), "Token revoked"),
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
            }
            Ok(())
        })
    }
}
