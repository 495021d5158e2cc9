//! Signed workflow tokens.
//!
//! Tokens are compact JWS strings (`header.claims.signature`, unpadded
//! base64url) signed with HMAC-SHA256 over the process-wide secret key. They
//! are self-contained and never stored, so a token stays redeemable until it
//! expires.
//!
//! Redemption checks, in order: structure, algorithm, signature, version,
//! expiry, kind and subject. Every failure is reported to the caller as the
//! same [`Error::Rejected`]; the precise reason is only logged.

use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use thiserror::Error;
use tracing::debug;

use super::config::AuthConfig;
use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

pub const TOKEN_VERSION: u8 = 1;
const ALGORITHM: &str = "HS256";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Confirm,
    Reset,
    ChangeEmail,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Confirm => "confirm",
            Self::Reset => "reset",
            Self::ChangeEmail => "change_email",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct TokenHeader {
    alg: String,
    typ: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenClaims {
    pub v: u8,
    pub kind: TokenKind,
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_email: Option<String>,
    pub iat: i64,
    pub exp: i64,
}

/// Internal redemption failure reasons. Never leaves this module.
#[derive(Debug, Error)]
enum TokenError {
    #[error("invalid token format")]
    Format,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("invalid signing key")]
    Key,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid token version")]
    InvalidVersion,
    #[error("token expired")]
    Expired,
    #[error("token kind mismatch: expected {expected}, found {found}")]
    KindMismatch { expected: TokenKind, found: TokenKind },
    #[error("token subject mismatch")]
    SubjectMismatch,
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, TokenError> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, TokenError> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| TokenError::Base64)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn now_unix_seconds() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

/// Issues and redeems workflow tokens.
#[derive(Clone)]
pub struct TokenService {
    key: SecretString,
    confirm_ttl_seconds: i64,
    reset_ttl_seconds: i64,
    email_change_ttl_seconds: i64,
}

impl TokenService {
    #[must_use]
    pub fn new(key: SecretString, config: &AuthConfig) -> Self {
        Self {
            key,
            confirm_ttl_seconds: config.confirm_token_ttl_seconds(),
            reset_ttl_seconds: config.reset_token_ttl_seconds(),
            email_change_ttl_seconds: config.email_change_token_ttl_seconds(),
        }
    }

    /// Configured lifetime for a kind of token.
    #[must_use]
    pub fn default_ttl_seconds(&self, kind: TokenKind) -> i64 {
        match kind {
            TokenKind::Confirm => self.confirm_ttl_seconds,
            TokenKind::Reset => self.reset_ttl_seconds,
            TokenKind::ChangeEmail => self.email_change_ttl_seconds,
        }
    }

    /// Issue a token for `subject`. `ttl_seconds` overrides the configured lifetime.
    ///
    /// # Errors
    /// Returns `Error::Token` if the claims cannot be encoded.
    pub fn issue(
        &self,
        kind: TokenKind,
        subject: &str,
        new_email: Option<&str>,
        ttl_seconds: Option<i64>,
    ) -> Result<String> {
        self.issue_at(kind, subject, new_email, ttl_seconds, now_unix_seconds())
    }

    /// Issue a token as if the current time were `now`.
    ///
    /// # Errors
    /// Returns `Error::Token` if the claims cannot be encoded.
    pub fn issue_at(
        &self,
        kind: TokenKind,
        subject: &str,
        new_email: Option<&str>,
        ttl_seconds: Option<i64>,
        now: i64,
    ) -> Result<String> {
        let ttl = ttl_seconds.unwrap_or_else(|| self.default_ttl_seconds(kind));
        let claims = TokenClaims {
            v: TOKEN_VERSION,
            kind,
            sub: subject.to_string(),
            new_email: new_email.map(str::to_string),
            iat: now,
            exp: now.saturating_add(ttl),
        };
        self.sign(&claims)
            .map_err(|err| Error::Token(err.to_string()))
    }

    /// Redeem a token for `subject`.
    ///
    /// # Errors
    /// Returns `Error::Rejected` for any invalid, expired, mismatched or tampered token.
    pub fn redeem(&self, token: &str, expected: TokenKind, subject: &str) -> Result<TokenClaims> {
        self.redeem_at(token, expected, subject, now_unix_seconds())
    }

    /// Redeem a token as if the current time were `now`.
    ///
    /// # Errors
    /// Returns `Error::Rejected` for any invalid, expired, mismatched or tampered token.
    pub fn redeem_at(
        &self,
        token: &str,
        expected: TokenKind,
        subject: &str,
        now: i64,
    ) -> Result<TokenClaims> {
        self.verify(token, expected, subject, now).map_err(|err| {
            debug!(kind = %expected, reason = %err, "Token rejected");
            Error::Rejected
        })
    }

    fn mac(&self) -> Result<HmacSha256, TokenError> {
        HmacSha256::new_from_slice(self.key.expose_secret().as_bytes()).map_err(|_| TokenError::Key)
    }

    fn sign(&self, claims: &TokenClaims) -> Result<String, TokenError> {
        let header = TokenHeader {
            alg: ALGORITHM.to_string(),
            typ: "JWT".to_string(),
        };
        let signing_input = format!("{}.{}", b64e_json(&header)?, b64e_json(claims)?);
        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        Ok(format!(
            "{signing_input}.{}",
            Base64UrlUnpadded::encode_string(&signature)
        ))
    }

    fn verify(
        &self,
        token: &str,
        expected: TokenKind,
        subject: &str,
        now: i64,
    ) -> Result<TokenClaims, TokenError> {
        let mut parts = token.trim().split('.');
        let header_b64 = parts.next().ok_or(TokenError::Format)?;
        let claims_b64 = parts.next().ok_or(TokenError::Format)?;
        let sig_b64 = parts.next().ok_or(TokenError::Format)?;
        if parts.next().is_some() {
            return Err(TokenError::Format);
        }

        let header: TokenHeader = b64d_json(header_b64)?;
        if header.alg != ALGORITHM {
            return Err(TokenError::UnsupportedAlg(header.alg));
        }

        let signature = Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| TokenError::Base64)?;
        let mut mac = self.mac()?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(claims_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::InvalidSignature)?;

        let claims: TokenClaims = b64d_json(claims_b64)?;
        if claims.v != TOKEN_VERSION {
            return Err(TokenError::InvalidVersion);
        }
        if now >= claims.exp {
            return Err(TokenError::Expired);
        }
        if claims.kind != expected {
            return Err(TokenError::KindMismatch {
                expected,
                found: claims.kind,
            });
        }
        if claims.sub != subject {
            return Err(TokenError::SubjectMismatch);
        }

        Ok(claims)
    }
}

impl fmt::Debug for TokenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenService")
            .field("key", &"***")
            .field("confirm_ttl_seconds", &self.confirm_ttl_seconds)
            .field("reset_ttl_seconds", &self.reset_ttl_seconds)
            .field("email_change_ttl_seconds", &self.email_change_ttl_seconds)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const NOW: i64 = 1_700_000_000;

    fn service() -> TokenService {
        TokenService::new(
            SecretString::from("unit-test-signing-key-0123456789"),
            &AuthConfig::default(),
        )
    }

    #[test]
    fn redeem_within_window() -> Result<()> {
        let tokens = service();
        let token = tokens.issue_at(TokenKind::Confirm, "a@example.com", None, Some(60), NOW)?;
        let claims = tokens.redeem_at(&token, TokenKind::Confirm, "a@example.com", NOW)?;
        assert_eq!(claims.sub, "a@example.com");
        assert_eq!(claims.kind, TokenKind::Confirm);
        assert_eq!(claims.exp, NOW + 60);
        Ok(())
    }

    #[test]
    fn expiry_boundary() -> Result<()> {
        let tokens = service();
        let token = tokens.issue_at(TokenKind::Reset, "a@example.com", None, Some(60), NOW)?;
        assert!(
            tokens
                .redeem_at(&token, TokenKind::Reset, "a@example.com", NOW + 59)
                .is_ok()
        );
        assert!(matches!(
            tokens.redeem_at(&token, TokenKind::Reset, "a@example.com", NOW + 60),
            Err(Error::Rejected)
        ));
        assert!(matches!(
            tokens.redeem_at(&token, TokenKind::Reset, "a@example.com", NOW + 61),
            Err(Error::Rejected)
        ));
        Ok(())
    }

    #[test]
    fn wrong_kind_is_rejected_before_expiry() -> Result<()> {
        let tokens = service();
        let token = tokens.issue_at(TokenKind::Confirm, "a@example.com", None, None, NOW)?;
        for kind in [TokenKind::Reset, TokenKind::ChangeEmail] {
            assert!(matches!(
                tokens.redeem_at(&token, kind, "a@example.com", NOW),
                Err(Error::Rejected)
            ));
        }
        Ok(())
    }

    #[test]
    fn wrong_subject_is_rejected() -> Result<()> {
        let tokens = service();
        let token = tokens.issue_at(
            TokenKind::ChangeEmail,
            "a@x.com",
            Some("b@x.com"),
            None,
            NOW,
        )?;
        assert!(matches!(
            tokens.redeem_at(&token, TokenKind::ChangeEmail, "c@x.com", NOW),
            Err(Error::Rejected)
        ));
        let claims = tokens.redeem_at(&token, TokenKind::ChangeEmail, "a@x.com", NOW)?;
        assert_eq!(claims.new_email.as_deref(), Some("b@x.com"));
        Ok(())
    }

    #[test]
    fn tampered_claims_are_rejected() -> Result<()> {
        let tokens = service();
        let token = tokens.issue_at(TokenKind::Confirm, "a@example.com", None, None, NOW)?;
        let parts: Vec<&str> = token.split('.').collect();
        assert_eq!(parts.len(), 3);

        let forged_claims = TokenClaims {
            v: TOKEN_VERSION,
            kind: TokenKind::Confirm,
            sub: "mallory@example.com".to_string(),
            new_email: None,
            iat: NOW,
            exp: NOW + 3600,
        };
        let forged_b64 = b64e_json(&forged_claims).map_err(|err| Error::Token(err.to_string()))?;
        let forged = format!("{}.{forged_b64}.{}", parts[0], parts[2]);
        assert!(matches!(
            tokens.redeem_at(&forged, TokenKind::Confirm, "mallory@example.com", NOW),
            Err(Error::Rejected)
        ));
        Ok(())
    }

    #[test]
    fn other_key_is_rejected() -> Result<()> {
        let token = service().issue_at(TokenKind::Confirm, "a@example.com", None, None, NOW)?;
        let other = TokenService::new(
            SecretString::from("a-different-signing-key-abcdefgh"),
            &AuthConfig::default(),
        );
        assert!(matches!(
            other.redeem_at(&token, TokenKind::Confirm, "a@example.com", NOW),
            Err(Error::Rejected)
        ));
        Ok(())
    }

    #[test]
    fn garbage_is_rejected() {
        let tokens = service();
        for token in ["", "abc", "a.b", "a.b.c", "a.b.c.d"] {
            assert!(matches!(
                tokens.redeem_at(token, TokenKind::Confirm, "a@example.com", NOW),
                Err(Error::Rejected)
            ));
        }
    }

    #[test]
    fn default_lifetimes_follow_config() -> Result<()> {
        let tokens = service();
        let confirm = tokens.issue_at(TokenKind::Confirm, "a@example.com", None, None, NOW)?;
        let reset = tokens.issue_at(TokenKind::Reset, "a@example.com", None, None, NOW)?;
        let confirm = tokens.redeem_at(&confirm, TokenKind::Confirm, "a@example.com", NOW)?;
        let reset = tokens.redeem_at(&reset, TokenKind::Reset, "a@example.com", NOW)?;
        assert_eq!(confirm.exp - confirm.iat, 604_800);
        assert_eq!(reset.exp - reset.iat, 3600);
        Ok(())
    }

    #[tokio::test]
    async fn confirm_token_expires_in_real_time() -> Result<()> {
        let tokens = service();
        let token = tokens.issue(TokenKind::Confirm, "a@example.com", None, Some(1))?;
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(matches!(
            tokens.redeem(&token, TokenKind::Confirm, "a@example.com"),
            Err(Error::Rejected)
        ));
        Ok(())
    }
}
