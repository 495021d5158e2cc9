//! Authentication and authorization adapter.
//!
//! - [`IdentityGateway`] wraps the directory and folds its failures into
//!   `NotFound`/`Rejected`.
//! - [`TokenService`] issues and redeems signed workflow tokens.
//! - [`SessionAdapter`] resolves the caller of a request from a session
//!   reference or credentials.
//! - [`AccountWorkflows`] drives invitations, confirmations, password resets
//!   and email changes.
//!
//! ## Group resolution
//!
//! A principal carries exactly one group. When the directory reports several
//! memberships the lowest precedence value wins, unranked groups come last and
//! the group name breaks remaining ties, so `{general, administrator}` without
//! precedence resolves to `administrator`.
//!
//! ## Sessions
//!
//! Session references expire after `session_ttl` (12 hours by default). An
//! expired record is deleted the first time it is read; logout deletes it
//! immediately.

mod config;
mod gateway;
mod principal;
mod session;
mod token;
pub(crate) mod utils;
mod workflows;

pub use config::{AuthConfig, DEFAULT_ADMIN_EMAIL, Profile};
pub use gateway::{IdentityGateway, NewPrincipal};
pub use principal::{
    ADMINISTRATOR_GROUP, CurrentPrincipal, GENERAL_GROUP, Principal, resolve_group,
};
pub use session::{Credentials, SessionAdapter, SessionRecord};
pub use token::{TOKEN_VERSION, TokenClaims, TokenKind, TokenService};
pub use workflows::AccountWorkflows;

/// Everything request handlers need to authenticate and authorize.
#[derive(Clone)]
pub struct AuthState {
    config: AuthConfig,
    sessions: SessionAdapter,
    workflows: AccountWorkflows,
}

impl AuthState {
    #[must_use]
    pub fn new(config: AuthConfig, sessions: SessionAdapter, workflows: AccountWorkflows) -> Self {
        Self {
            config,
            sessions,
            workflows,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionAdapter {
        &self.sessions
    }

    #[must_use]
    pub fn gateway(&self) -> &IdentityGateway {
        self.sessions.gateway()
    }

    #[must_use]
    pub fn workflows(&self) -> &AccountWorkflows {
        &self.workflows
    }
}
