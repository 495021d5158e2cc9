//! Session/principal adapter.
//!
//! Resolution order for a request:
//! 1. a session reference whose record exists, has not expired and whose
//!    principal still resolves in the directory;
//! 2. submitted credentials, which open a new session on success;
//! 3. otherwise the anonymous principal.
//!
//! Only the SHA-256 digest of a session reference is used as the store key.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::{
    gateway::IdentityGateway,
    principal::{CurrentPrincipal, Principal},
    utils::{generate_session_token, hash_session_token},
};
use crate::directory::AuthenticationResult;
use crate::error::{Error, Result};
use crate::store::{DocumentStore, Table};

/// Identifier and secret submitted with a request.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub identifier: String,
    pub secret: SecretString,
}

impl Credentials {
    pub fn new(identifier: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            secret: SecretString::from(secret.into()),
        }
    }
}

/// Value persisted in the `session` table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub principal: String,
    pub authentication: AuthenticationResult,
    pub created_at: i64,
    pub expires_at: i64,
}

impl SessionRecord {
    #[must_use]
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }
}

fn now_unix_seconds() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

#[derive(Clone)]
pub struct SessionAdapter {
    gateway: IdentityGateway,
    store: Arc<dyn DocumentStore>,
    session_ttl_seconds: i64,
}

impl SessionAdapter {
    #[must_use]
    pub fn new(
        gateway: IdentityGateway,
        store: Arc<dyn DocumentStore>,
        session_ttl_seconds: i64,
    ) -> Self {
        Self {
            gateway,
            store,
            session_ttl_seconds,
        }
    }

    #[must_use]
    pub fn gateway(&self) -> &IdentityGateway {
        &self.gateway
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    /// Resolve the caller of a request.
    ///
    /// # Errors
    /// Returns `Error::Store` when the session table cannot be read or written.
    /// Rejected credentials resolve to [`CurrentPrincipal::Anonymous`].
    pub async fn resolve(
        &self,
        session: Option<&str>,
        credentials: Option<&Credentials>,
    ) -> Result<CurrentPrincipal> {
        if let Some(token) = session {
            if let Some(principal) = self.principal_for_session(token).await? {
                return Ok(CurrentPrincipal::Authenticated(principal));
            }
        }

        if let Some(credentials) = credentials {
            match self.login(credentials).await {
                Ok(principal) => return Ok(CurrentPrincipal::Authenticated(principal)),
                Err(Error::Rejected) => {}
                Err(err) => return Err(err),
            }
        }

        Ok(CurrentPrincipal::Anonymous)
    }

    /// Authenticate credentials and open a session.
    ///
    /// The returned principal carries the raw session reference.
    ///
    /// # Errors
    /// Returns `Error::Rejected` when the directory refuses the credentials,
    /// `Error::Store` when the session cannot be persisted.
    #[instrument(skip(self, credentials), fields(identifier = %credentials.identifier))]
    pub async fn login(&self, credentials: &Credentials) -> Result<Principal> {
        let (principal, authentication) = self
            .gateway
            .authenticate(&credentials.identifier, &credentials.secret)
            .await?;

        let token = generate_session_token().map_err(|err| Error::Token(err.to_string()))?;
        let now = now_unix_seconds();
        let record = SessionRecord {
            principal: principal.email.clone(),
            authentication,
            created_at: now,
            expires_at: now.saturating_add(self.session_ttl_seconds),
        };
        let value = serde_json::to_string(&record).map_err(|err| Error::Token(err.to_string()))?;
        self.store
            .put(Table::Sessions, &hash_session_token(&token), &value)
            .await?;

        info!("Session opened");
        Ok(principal.with_session(token))
    }

    /// Load a live session record. Expired or unreadable records are deleted
    /// and reported as absent.
    ///
    /// # Errors
    /// Returns `Error::Store` on store failures.
    pub async fn load(&self, token: &str) -> Result<Option<SessionRecord>> {
        self.load_at(token, now_unix_seconds()).await
    }

    /// [`Self::load`] with an explicit clock.
    ///
    /// # Errors
    /// Returns `Error::Store` on store failures.
    pub async fn load_at(&self, token: &str, now: i64) -> Result<Option<SessionRecord>> {
        let key = hash_session_token(token);
        let Some(value) = self.store.get(Table::Sessions, &key).await? else {
            return Ok(None);
        };

        let record = match serde_json::from_str::<SessionRecord>(&value) {
            Ok(record) => record,
            Err(err) => {
                warn!("Discarding unreadable session record: {err}");
                self.store.delete(Table::Sessions, &key).await?;
                return Ok(None);
            }
        };

        if record.is_expired(now) {
            debug!(principal = %record.principal, "Session expired");
            self.store.delete(Table::Sessions, &key).await?;
            return Ok(None);
        }

        Ok(Some(record))
    }

    /// Delete a session. Returns `true` when a record existed.
    ///
    /// # Errors
    /// Returns `Error::Store` on store failures.
    pub async fn invalidate(&self, token: &str) -> Result<bool> {
        let removed = self
            .store
            .delete(Table::Sessions, &hash_session_token(token))
            .await?;
        if removed {
            info!("Session invalidated");
        }
        Ok(removed)
    }

    async fn principal_for_session(&self, token: &str) -> Result<Option<Principal>> {
        let Some(record) = self.load(token).await? else {
            return Ok(None);
        };
        match self.gateway.find_principal(&record.principal).await {
            Ok(principal) => Ok(Some(principal.with_session(token.to_string()))),
            Err(Error::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }
}
