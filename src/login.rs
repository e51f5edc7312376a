//! Simulated interactive authorization.
//!
//! A session walks `AwaitingCredentials -> AwaitingSecondFactor ->
//! AwaitingConsent -> CodeIssued`, one POST per step. A wrong credential or
//! code fails the step inside its transaction, so the session stays where it
//! was; there is no attempt counter. Redeeming the issued code removes both
//! the code and its session. Codes expire lazily, like tokens.

use std::sync::Arc;

use fakebooks_core::StoreError;
use fakebooks_sqlite::Store;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{
    collections::{AUTHORIZATION_CODES, LOGIN_SESSIONS},
    tokens::Clock,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginStep {
    AwaitingCredentials,
    AwaitingSecondFactor,
    AwaitingConsent,
    CodeIssued,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginSession {
    pub id: String,
    pub step: LoginStep,
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub state: Option<String>,
    pub code: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AuthorizationCode {
    session_id: String,
    client_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    issued_at: OffsetDateTime,
}

#[derive(Debug, Error)]
pub enum LoginError {
    #[error("unknown login session")]
    UnknownSession,
    #[error("login session is {actual:?}, not {expected:?}")]
    OutOfOrder { expected: LoginStep, actual: LoginStep },
    #[error("invalid email or password")]
    BadCredentials,
    #[error("invalid one-time code")]
    BadCode,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The single identity the simulated login accepts.
#[derive(Debug, Clone)]
pub struct LoginCredentials {
    pub email: String,
    pub password: String,
    pub otp_code: String,
}

pub enum ConsentOutcome {
    Approved { session: LoginSession, code: String },
    Denied { session: LoginSession },
}

fn same(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

pub struct LoginFlow {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
    credentials: LoginCredentials,
    code_ttl: Duration,
}

impl LoginFlow {
    pub fn new(store: Arc<Store>, clock: Arc<dyn Clock>, credentials: LoginCredentials, code_ttl: Duration) -> Self {
        Self {
            store,
            clock,
            credentials,
            code_ttl,
        }
    }

    pub fn start(
        &self,
        client_id: Option<String>,
        redirect_uri: Option<String>,
        state: Option<String>,
    ) -> Result<LoginSession, LoginError> {
        let session = LoginSession {
            id: Uuid::new_v4().simple().to_string(),
            step: LoginStep::AwaitingCredentials,
            client_id,
            redirect_uri,
            state,
            code: None,
            created_at: self.clock.now(),
        };
        self.store.put_string(LOGIN_SESSIONS, &session.id, &session)?;
        tracing::debug!(session = %session.id, client_id = ?session.client_id, "Login session started");
        Ok(session)
    }

    pub fn session(&self, session_id: &str) -> Result<LoginSession, LoginError> {
        match self.store.get_string(LOGIN_SESSIONS, session_id) {
            Ok(session) => Ok(session),
            Err(e) if e.is_not_found() => Err(LoginError::UnknownSession),
            Err(e) => Err(e.into()),
        }
    }

    /// Loads the session, checks it is at `expected`, lets `step` mutate it
    /// and writes it back, all in one transaction.
    fn advance<F>(&self, session_id: &str, expected: LoginStep, step: F) -> Result<LoginSession, LoginError>
    where
        F: FnOnce(&fakebooks_sqlite::Txn<'_>, &mut LoginSession) -> Result<(), LoginError>,
    {
        self.store.update(|txn| {
            let mut session: LoginSession = match txn.get_string(LOGIN_SESSIONS, session_id) {
                Ok(session) => session,
                Err(e) if e.is_not_found() => return Err(LoginError::UnknownSession),
                Err(e) => return Err(e.into()),
            };
            if session.step != expected {
                return Err(LoginError::OutOfOrder { expected, actual: session.step });
            }

            step(txn, &mut session)?;
            txn.put_string(LOGIN_SESSIONS, &session.id, &session)?;
            tracing::debug!(session = %session.id, step = ?session.step, "Login session advanced");
            Ok(session)
        })
    }

    pub fn submit_credentials(&self, session_id: &str, email: &str, password: &str) -> Result<LoginSession, LoginError> {
        self.advance(session_id, LoginStep::AwaitingCredentials, |_, session| {
            // Evaluate both so a wrong email costs the same as a wrong password.
            let email_ok = same(email.trim(), &self.credentials.email);
            let password_ok = same(password, &self.credentials.password);
            if !(email_ok && password_ok) {
                tracing::info!(session = %session.id, "Rejected login credentials");
                return Err(LoginError::BadCredentials);
            }
            session.step = LoginStep::AwaitingSecondFactor;
            Ok(())
        })
    }

    pub fn submit_code(&self, session_id: &str, code: &str) -> Result<LoginSession, LoginError> {
        self.advance(session_id, LoginStep::AwaitingSecondFactor, |_, session| {
            if !same(code.trim(), &self.credentials.otp_code) {
                tracing::info!(session = %session.id, "Rejected one-time code");
                return Err(LoginError::BadCode);
            }
            session.step = LoginStep::AwaitingConsent;
            Ok(())
        })
    }

    /// Final step. Approval mints a one-time authorization code; denial
    /// discards the session.
    pub fn consent(&self, session_id: &str, approve: bool) -> Result<ConsentOutcome, LoginError> {
        if !approve {
            let session = self.store.update(|txn| {
                let session: LoginSession = match txn.get_string(LOGIN_SESSIONS, session_id) {
                    Ok(session) => session,
                    Err(e) if e.is_not_found() => return Err(LoginError::UnknownSession),
                    Err(e) => return Err(e.into()),
                };
                if session.step != LoginStep::AwaitingConsent {
                    return Err(LoginError::OutOfOrder { expected: LoginStep::AwaitingConsent, actual: session.step });
                }
                txn.delete_string(LOGIN_SESSIONS, session_id)?;
                Ok(session)
            })?;
            tracing::info!(session = %session.id, "Authorization denied");
            return Ok(ConsentOutcome::Denied { session });
        }

        let now = self.clock.now();
        let session = self.advance(session_id, LoginStep::AwaitingConsent, |txn, session| {
            let code = Uuid::new_v4().simple().to_string();
            let grant = AuthorizationCode {
                session_id: session.id.clone(),
                client_id: session.client_id.clone(),
                issued_at: now,
            };
            txn.put_string(AUTHORIZATION_CODES, &code, &grant)?;
            session.code = Some(code);
            session.step = LoginStep::CodeIssued;
            Ok(())
        })?;

        let code = session.code.clone().unwrap_or_default();
        tracing::info!(session = %session.id, "Authorization code issued");
        Ok(ConsentOutcome::Approved { session, code })
    }

    /// Consumes an authorization code and the session that issued it.
    /// Returns whether it was a live code this flow issued; the token
    /// endpoint does not insist on it. An expired code is removed all the
    /// same.
    pub fn redeem_code(&self, code: &str) -> Result<bool, StoreError> {
        let now = self.clock.now();
        self.store.update(|txn| {
            let grant: AuthorizationCode = match txn.get_string(AUTHORIZATION_CODES, code) {
                Ok(grant) => grant,
                Err(e) if e.is_not_found() => return Ok(false),
                Err(e) => return Err(e),
            };
            txn.delete_string(AUTHORIZATION_CODES, code)?;
            match txn.delete_string(LOGIN_SESSIONS, &grant.session_id) {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }

            if grant.issued_at + self.code_ttl <= now {
                tracing::debug!(session = %grant.session_id, "Expired authorization code removed on redemption");
                return Ok(false);
            }
            Ok(true)
        })
    }
}
