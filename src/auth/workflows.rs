//! Account workflows that need out-of-band confirmation.
//!
//! Each workflow issues a token, embeds it in a frontend link and hands an
//! email to the [`Mailer`]. Redemption goes back through the token service;
//! any failure there is a plain `false`.

use secrecy::SecretString;
use serde_json::json;
use tracing::{debug, info, instrument};

use super::{
    gateway::{IdentityGateway, NewPrincipal},
    principal::Principal,
    token::{TokenKind, TokenService},
    utils::{build_link, normalize_email, valid_email},
};
use crate::error::{Error, Result};
use crate::notify::{
    EmailMessage, Mailer, TEMPLATE_CHANGE_EMAIL, TEMPLATE_CONFIRM, TEMPLATE_INVITE,
    TEMPLATE_RESET_PASSWORD,
};

#[derive(Clone)]
pub struct AccountWorkflows {
    gateway: IdentityGateway,
    tokens: TokenService,
    mailer: Mailer,
    frontend_base_url: String,
}

impl AccountWorkflows {
    #[must_use]
    pub fn new(
        gateway: IdentityGateway,
        tokens: TokenService,
        mailer: Mailer,
        frontend_base_url: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            tokens,
            mailer,
            frontend_base_url: frontend_base_url.into(),
        }
    }

    /// Create a principal and email them an invitation carrying a confirm token.
    ///
    /// # Errors
    /// Returns `Error::Rejected` for invalid or duplicate emails and directory
    /// failures, `Error::Token` if the token cannot be issued.
    #[instrument(skip(self, new), fields(email = %new.email))]
    pub async fn invite(&self, new: &NewPrincipal) -> Result<Principal> {
        let email = normalize_email(&new.email);
        if !valid_email(&email) {
            debug!("Invalid invite email");
            return Err(Error::Rejected);
        }
        let request = NewPrincipal {
            email,
            ..new.clone()
        };
        let principal = self.gateway.create_principal(&request).await?;
        let token = self
            .tokens
            .issue(TokenKind::Confirm, &principal.email, None, None)?;
        let link = build_link(&self.frontend_base_url, "account/join-from-invite", &token);
        self.mailer.enqueue(EmailMessage::new(
            principal.email.clone(),
            "You Are Invited To Join",
            TEMPLATE_INVITE,
            json!({ "user": principal.full_name(), "invite_link": link }),
        ));
        info!(group = %principal.group, "Principal invited");
        Ok(principal)
    }

    /// Email a fresh confirmation link to an existing principal.
    ///
    /// # Errors
    /// Returns `Error::Token` if the token cannot be issued.
    pub fn send_confirmation(&self, principal: &Principal) -> Result<()> {
        let token = self
            .tokens
            .issue(TokenKind::Confirm, &principal.email, None, None)?;
        let link = build_link(&self.frontend_base_url, "account/confirm-account", &token);
        self.mailer.enqueue(EmailMessage::new(
            principal.email.clone(),
            "Confirm Your Account",
            TEMPLATE_CONFIRM,
            json!({ "user": principal.full_name(), "confirm_link": link }),
        ));
        Ok(())
    }

    /// Redeem a confirm token and confirm the sign-up in the directory.
    #[instrument(skip(self, principal, token), fields(email = %principal.email))]
    pub async fn confirm_account(&self, principal: &Principal, token: &str) -> bool {
        if self
            .tokens
            .redeem(token, TokenKind::Confirm, &principal.email)
            .is_err()
        {
            return false;
        }
        self.gateway
            .confirm_principal(&principal.email)
            .await
            .is_ok()
    }

    /// Email a reset link when the identifier resolves. Silent otherwise so
    /// callers cannot probe for accounts.
    ///
    /// # Errors
    /// Returns `Error::Token` if the token cannot be issued.
    #[instrument(skip(self))]
    pub async fn request_password_reset(&self, identifier: &str) -> Result<()> {
        let identifier = normalize_email(identifier);
        let Ok(principal) = self.gateway.find_principal(&identifier).await else {
            debug!("Password reset requested for unknown principal");
            return Ok(());
        };
        let token = self
            .tokens
            .issue(TokenKind::Reset, &principal.email, None, None)?;
        let link = build_link(&self.frontend_base_url, "account/reset-password", &token);
        self.mailer.enqueue(EmailMessage::new(
            principal.email.clone(),
            "Reset Your Password",
            TEMPLATE_RESET_PASSWORD,
            json!({ "user": principal.full_name(), "reset_link": link }),
        ));
        Ok(())
    }

    /// Redeem a reset token and rotate the password.
    #[instrument(skip_all, fields(email = %principal.email))]
    pub async fn reset_password(
        &self,
        principal: &Principal,
        token: &str,
        previous: &SecretString,
        proposed: &SecretString,
        access_token: &SecretString,
    ) -> bool {
        if self
            .tokens
            .redeem(token, TokenKind::Reset, &principal.email)
            .is_err()
        {
            return false;
        }
        self.gateway
            .change_secret(&principal.email, previous, proposed, access_token)
            .await
    }

    /// Email a change-email link to the new address.
    ///
    /// # Errors
    /// Returns `Error::Rejected` when the new email is invalid or already
    /// taken, `Error::Token` if the token cannot be issued.
    #[instrument(skip(self, principal), fields(email = %principal.email))]
    pub async fn request_email_change(&self, principal: &Principal, new_email: &str) -> Result<()> {
        let new_email = normalize_email(new_email);
        if !valid_email(&new_email) || self.gateway.principal_exists(&new_email).await? {
            return Err(Error::Rejected);
        }
        let token = self.tokens.issue(
            TokenKind::ChangeEmail,
            &principal.email,
            Some(&new_email),
            None,
        )?;
        let link = build_link(&self.frontend_base_url, "account/change-email", &token);
        self.mailer.enqueue(EmailMessage::new(
            new_email,
            "Confirm Your New Email",
            TEMPLATE_CHANGE_EMAIL,
            json!({ "user": principal.full_name(), "change_email_link": link }),
        ));
        Ok(())
    }

    /// Redeem a change-email token for the principal's current address.
    ///
    /// On success the directory and `principal` both carry the new address.
    #[instrument(skip(self, principal, token), fields(email = %principal.email))]
    pub async fn change_email(&self, principal: &mut Principal, token: &str) -> bool {
        let Ok(claims) = self
            .tokens
            .redeem(token, TokenKind::ChangeEmail, &principal.email)
        else {
            return false;
        };
        let Some(new_email) = claims.new_email else {
            debug!("Change-email token without a new address");
            return false;
        };
        match self.gateway.principal_exists(&new_email).await {
            Ok(false) => {}
            Ok(true) => {
                debug!("Change-email target already taken");
                return false;
            }
            Err(_) => return false,
        }
        if self
            .gateway
            .update_email(&principal.email, &new_email)
            .await
            .is_err()
        {
            return false;
        }
        info!(new_email = %new_email, "Email changed");
        principal.email = new_email;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::config::AuthConfig;
    use crate::auth::principal::{ADMINISTRATOR_GROUP, GENERAL_GROUP};
    use crate::directory::{DirectoryGroup, MemoryDirectory};
    use crate::notify::{MailerConfig, MemoryEmailSender};
    use std::sync::Arc;
    use std::time::Duration;

    struct Harness {
        directory: Arc<MemoryDirectory>,
        gateway: IdentityGateway,
        tokens: TokenService,
        sent: MemoryEmailSender,
        workflows: AccountWorkflows,
    }

    async fn harness() -> Harness {
        let directory = Arc::new(MemoryDirectory::new());
        directory
            .insert_group(DirectoryGroup::new(ADMINISTRATOR_GROUP))
            .await;
        directory.insert_group(DirectoryGroup::new(GENERAL_GROUP)).await;
        directory.insert_user("a@x.com", "secret", &[]).await;
        directory.insert_user("taken@x.com", "secret", &[]).await;

        let gateway = IdentityGateway::new(directory.clone(), "admin@x.com");
        let tokens = TokenService::new(
            SecretString::from("workflow-test-signing-key-123456"),
            &AuthConfig::default(),
        );
        let sent = MemoryEmailSender::new();
        let (mailer, _handle) = Mailer::spawn(Arc::new(sent.clone()), MailerConfig::new());
        let workflows = AccountWorkflows::new(
            gateway.clone(),
            tokens.clone(),
            mailer,
            "https://admin.x.com",
        );
        Harness {
            directory,
            gateway,
            tokens,
            sent,
            workflows,
        }
    }

    async fn wait_for_mail(sent: &MemoryEmailSender, count: usize) -> Vec<EmailMessage> {
        for _ in 0..200 {
            let delivered = sent.delivered();
            if delivered.len() >= count {
                return delivered;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        sent.delivered()
    }

    fn token_from(message: &EmailMessage, field: &str) -> Option<String> {
        message.context[field]
            .as_str()
            .and_then(|link| link.split_once("#token="))
            .map(|(_, token)| token.to_string())
    }

    #[tokio::test]
    async fn change_email_redeemed_by_other_principal_is_rejected() -> Result<()> {
        let h = harness().await;
        let token = h
            .tokens
            .issue(TokenKind::ChangeEmail, "a@x.com", Some("b@x.com"), None)?;
        h.directory.insert_user("c@x.com", "secret", &[]).await;
        let mut other = h.gateway.find_principal("c@x.com").await?;
        assert!(!h.workflows.change_email(&mut other, &token).await);
        assert_eq!(other.email, "c@x.com");
        let original = h.gateway.find_principal("a@x.com").await?;
        assert_eq!(original.email, "a@x.com");
        Ok(())
    }

    #[tokio::test]
    async fn change_email_round_trip() -> Result<()> {
        let h = harness().await;
        let mut principal = h.gateway.find_principal("a@x.com").await?;
        h.workflows
            .request_email_change(&principal, "B@X.com")
            .await?;
        let mail = wait_for_mail(&h.sent, 1).await;
        assert_eq!(mail[0].recipient, "b@x.com");
        assert_eq!(mail[0].template, TEMPLATE_CHANGE_EMAIL);
        let token = token_from(&mail[0], "change_email_link").ok_or(Error::NotFound)?;

        assert!(h.workflows.change_email(&mut principal, &token).await);
        assert_eq!(principal.email, "b@x.com");
        assert_eq!(h.gateway.find_principal("b@x.com").await?.email, "b@x.com");
        Ok(())
    }

    #[tokio::test]
    async fn change_email_to_taken_address_is_refused() -> Result<()> {
        let h = harness().await;
        let principal = h.gateway.find_principal("a@x.com").await?;
        assert!(matches!(
            h.workflows
                .request_email_change(&principal, "taken@x.com")
                .await,
            Err(Error::Rejected)
        ));

        let token = h
            .tokens
            .issue(TokenKind::ChangeEmail, "a@x.com", Some("taken@x.com"), None)?;
        let mut principal = principal;
        assert!(!h.workflows.change_email(&mut principal, &token).await);
        assert_eq!(principal.email, "a@x.com");
        Ok(())
    }

    #[tokio::test]
    async fn invite_then_confirm() -> Result<()> {
        let h = harness().await;
        let principal = h
            .workflows
            .invite(&NewPrincipal::new("New@X.com").with_names("New", "Person"))
            .await?;
        assert_eq!(principal.email, "new@x.com");
        assert_eq!(principal.group, GENERAL_GROUP);
        assert_eq!(h.directory.is_confirmed("new@x.com").await, Some(false));

        let mail = wait_for_mail(&h.sent, 1).await;
        assert_eq!(mail[0].template, TEMPLATE_INVITE);
        assert_eq!(mail[0].subject, "[Backstage] You Are Invited To Join");
        let token = token_from(&mail[0], "invite_link").ok_or(Error::NotFound)?;

        assert!(!h.workflows.confirm_account(&principal, "garbage").await);
        assert!(h.workflows.confirm_account(&principal, &token).await);
        assert_eq!(h.directory.is_confirmed("new@x.com").await, Some(true));
        Ok(())
    }

    #[tokio::test]
    async fn invite_of_bootstrap_admin_gets_administrator() -> Result<()> {
        let h = harness().await;
        let principal = h.workflows.invite(&NewPrincipal::new("admin@x.com")).await?;
        assert_eq!(principal.group, ADMINISTRATOR_GROUP);
        Ok(())
    }

    #[tokio::test]
    async fn invite_rejects_invalid_email() {
        let h = harness().await;
        assert!(matches!(
            h.workflows.invite(&NewPrincipal::new("not-an-email")).await,
            Err(Error::Rejected)
        ));
    }

    #[tokio::test]
    async fn password_reset_for_unknown_principal_is_silent() -> Result<()> {
        let h = harness().await;
        h.workflows.request_password_reset("ghost@x.com").await?;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(h.sent.delivered().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn password_reset_round_trip() -> Result<()> {
        let h = harness().await;
        h.workflows.request_password_reset("A@x.com").await?;
        let mail = wait_for_mail(&h.sent, 1).await;
        assert_eq!(mail[0].template, TEMPLATE_RESET_PASSWORD);
        let token = token_from(&mail[0], "reset_link").ok_or(Error::NotFound)?;

        let (principal, auth) = h
            .gateway
            .authenticate("a@x.com", &SecretString::from("secret"))
            .await?;
        let access_token = SecretString::from(auth.access_token);
        let confirm_token = h.tokens.issue(TokenKind::Confirm, "a@x.com", None, None)?;
        assert!(
            !h.workflows
                .reset_password(
                    &principal,
                    &confirm_token,
                    &SecretString::from("secret"),
                    &SecretString::from("rotated"),
                    &access_token,
                )
                .await
        );
        assert!(
            h.workflows
                .reset_password(
                    &principal,
                    &token,
                    &SecretString::from("secret"),
                    &SecretString::from("rotated"),
                    &access_token,
                )
                .await
        );
        assert!(
            h.gateway
                .authenticate("a@x.com", &SecretString::from("rotated"))
                .await
                .is_ok()
        );
        Ok(())
    }
}
