//! Opaque bearer tokens (C6), replacing the teacher's JWT handler.
//!
//! A token is `base64(token_id).base64(payload).base64(signature)` where
//! `payload` is `username:role:expires_at_unix` and `signature` is
//! HMAC-SHA256(payload, server secret) — signing approach grounded on
//! `edwardtay-kraken-ws-sdk/src/auth.rs::Credentials::sign`, adapted from
//! request-signing to session-token signing. `token_id` is a random UUID
//! embedded in the token so a revocation only needs to record that id, not
//! the whole token string.

use crate::auth::models::{Identity, UserRole};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub struct TokenIssuer {
    secret: Vec<u8>,
    ttl: chrono::Duration,
}

pub struct VerifiedToken {
    pub token_id: Uuid,
    pub identity: Identity,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum TokenError {
    Malformed,
    BadSignature,
    Expired,
}

impl TokenIssuer {
    pub fn new(secret: impl Into<Vec<u8>>, ttl_seconds: i64) -> Self {
        Self {
            secret: secret.into(),
            ttl: chrono::Duration::seconds(ttl_seconds),
        }
    }

    /// Issues a fresh signed token for `username`/`role`, returning the
    /// wire string plus its `token_id` (used for revocation bookkeeping).
    pub fn issue(&self, username: &str, role: UserRole) -> (String, Uuid, DateTime<Utc>) {
        let token_id = Uuid::new_v4();
        let expires_at = Utc::now() + self.ttl;
        let payload = format!(
            "{}:{}:{}",
            username,
            role.as_str(),
            expires_at.timestamp()
        );

        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("hmac accepts any key length");
        mac.update(payload.as_bytes());
        let signature = mac.finalize().into_bytes();

        let token = format!(
            "{}.{}.{}",
            BASE64.encode(token_id.as_bytes()),
            BASE64.encode(payload.as_bytes()),
            BASE64.encode(signature)
        );

        (token, token_id, expires_at)
    }

    /// Verifies signature and expiry. Revocation is checked separately by
    /// the caller against the persisted `token_revocations` table, keyed by
    /// `token_id`.
    pub fn verify(&self, token: &str) -> Result<VerifiedToken, TokenError> {
        let mut parts = token.split('.');
        let (id_part, payload_part, sig_part) = match (parts.next(), parts.next(), parts.next()) {
            (Some(a), Some(b), Some(c)) if parts.next().is_none() => (a, b, c),
            _ => return Err(TokenError::Malformed),
        };

        let token_id_bytes = BASE64.decode(id_part).map_err(|_| TokenError::Malformed)?;
        let token_id = Uuid::from_slice(&token_id_bytes).map_err(|_| TokenError::Malformed)?;

        let payload_bytes = BASE64
            .decode(payload_part)
            .map_err(|_| TokenError::Malformed)?;
        let payload = String::from_utf8(payload_bytes).map_err(|_| TokenError::Malformed)?;

        let signature = BASE64.decode(sig_part).map_err(|_| TokenError::Malformed)?;

        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("hmac accepts any key length");
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        let mut fields = payload.splitn(3, ':');
        let (username, role_str, exp_str) = match (fields.next(), fields.next(), fields.next()) {
            (Some(u), Some(r), Some(e)) => (u, r, e),
            _ => return Err(TokenError::Malformed),
        };

        let role = UserRole::from_str(role_str).ok_or(TokenError::Malformed)?;
        let exp_unix: i64 = exp_str.parse().map_err(|_| TokenError::Malformed)?;
        let expires_at = DateTime::<Utc>::from_timestamp(exp_unix, 0).ok_or(TokenError::Malformed)?;

        if expires_at < Utc::now() {
            return Err(TokenError::Expired);
        }

        Ok(VerifiedToken {
            token_id,
            identity: Identity {
                username: username.to_string(),
                role,
            },
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_verifies_with_matching_identity() {
        let issuer = TokenIssuer::new("secret-key", 1800);
        let (token, token_id, _) = issuer.issue("alice", UserRole::User);

        let verified = issuer.verify(&token).unwrap();
        assert_eq!(verified.token_id, token_id);
        assert_eq!(verified.identity.username, "alice");
        assert_eq!(verified.identity.role, UserRole::User);
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let issuer = TokenIssuer::new("secret-key", 1800);
        let (token, _, _) = issuer.issue("alice", UserRole::User);

        let mut parts: Vec<&str> = token.split('.').collect();
        let forged_payload = BASE64.encode(b"mallory:admin:9999999999");
        parts[1] = &forged_payload;
        let forged = parts.join(".");

        assert_eq!(issuer.verify(&forged), Err(TokenError::BadSignature));
    }

    #[test]
    fn different_secret_rejects() {
        let issuer_a = TokenIssuer::new("secret-a", 1800);
        let issuer_b = TokenIssuer::new("secret-b", 1800);
        let (token, _, _) = issuer_a.issue("alice", UserRole::User);

        assert_eq!(issuer_b.verify(&token), Err(TokenError::BadSignature));
    }

    #[test]
    fn expired_token_is_rejected() {
        let issuer = TokenIssuer::new("secret-key", -1);
        let (token, _, _) = issuer.issue("alice", UserRole::User);

        assert_eq!(issuer.verify(&token), Err(TokenError::Expired));
    }

    #[test]
    fn malformed_token_is_rejected() {
        let issuer = TokenIssuer::new("secret-key", 1800);
        assert_eq!(issuer.verify("not-a-token"), Err(TokenError::Malformed));
    }
}
