use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use ts_rs::TS;
use zeroize::Zeroizing;

use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

// ============================================================================
// Principals
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum Role {
    Requester,
    Responder,
    Admin,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Requester => write!(f, "requester"),
            Role::Responder => write!(f, "responder"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

/// Authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Identity {
    pub principal_id: String,
    pub role: Role,
}

impl Identity {
    pub fn new(principal_id: impl Into<String>, role: Role) -> Self {
        Self {
            principal_id: principal_id.into(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Validates an opaque bearer credential. Called once per HTTP request and
/// once per socket connection.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn validate(&self, credential: &str) -> Result<Identity, AppError>;
}

// ============================================================================
// HMAC-signed tokens
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    role: Role,
    /// Unix seconds. Tokens without `exp` never expire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exp: Option<i64>,
}

/// Token format: `base64url(claims_json) "." hex(hmac_sha256(secret, payload))`.
pub struct HmacIdentityProvider {
    secret: Zeroizing<Vec<u8>>,
}

impl HmacIdentityProvider {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: Zeroizing::new(secret.as_bytes().to_vec()),
        }
    }

    fn mac(&self) -> Result<HmacSha256, AppError> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| AppError::Internal(format!("HMAC key rejected: {e}")))
    }

    /// Mint a token for `identity`, valid for `ttl` when given.
    pub fn issue(&self, identity: &Identity, ttl: Option<chrono::Duration>) -> Result<String, AppError> {
        let claims = Claims {
            sub: identity.principal_id.clone(),
            role: identity.role,
            exp: ttl.map(|d| (chrono::Utc::now() + d).timestamp()),
        };
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?);
        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());
        Ok(format!("{payload}.{signature}"))
    }

    fn verify(&self, credential: &str) -> Result<Claims, AppError> {
        let (payload, signature) = credential
            .trim()
            .split_once('.')
            .ok_or_else(|| AppError::AuthFailed("malformed token".into()))?;

        let expected = hex::decode(signature)
            .map_err(|_| AppError::AuthFailed("malformed token signature".into()))?;
        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&expected)
            .map_err(|_| AppError::AuthFailed("invalid token signature".into()))?;

        let raw = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| AppError::AuthFailed("malformed token payload".into()))?;
        let claims: Claims = serde_json::from_slice(&raw)
            .map_err(|_| AppError::AuthFailed("malformed token claims".into()))?;

        if claims.sub.trim().is_empty() {
            return Err(AppError::AuthFailed("token has no subject".into()));
        }
        if let Some(exp) = claims.exp {
            if exp <= chrono::Utc::now().timestamp() {
                return Err(AppError::AuthFailed("token expired".into()));
            }
        }
        Ok(claims)
    }
}

#[async_trait]
impl IdentityProvider for HmacIdentityProvider {
    async fn validate(&self, credential: &str) -> Result<Identity, AppError> {
        let claims = self.verify(credential)?;
        Ok(Identity {
            principal_id: claims.sub,
            role: claims.role,
        })
    }
}

/// Pull the credential out of an `Authorization: Bearer ...` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "unit-test-secret-0123456789";

    #[tokio::test]
    async fn test_issue_then_validate() {
        let provider = HmacIdentityProvider::new(SECRET);
        let identity = Identity::new("u-1", Role::Responder);
        let token = provider.issue(&identity, Some(chrono::Duration::hours(1))).unwrap();
        assert_eq!(provider.validate(&token).await.unwrap(), identity);
    }

    #[tokio::test]
    async fn test_wrong_secret_fails() {
        let token = HmacIdentityProvider::new(SECRET)
            .issue(&Identity::new("u-1", Role::Admin), None)
            .unwrap();
        let other = HmacIdentityProvider::new("a-different-secret-value");
        assert!(matches!(other.validate(&token).await, Err(AppError::AuthFailed(_))));
    }

    #[tokio::test]
    async fn test_tampered_payload_fails() {
        let provider = HmacIdentityProvider::new(SECRET);
        let token = provider.issue(&Identity::new("u-1", Role::Responder), None).unwrap();
        let (_, sig) = token.split_once('.').unwrap();
        let forged_claims = URL_SAFE_NO_PAD.encode(br#"{"sub":"u-1","role":"admin"}"#);
        let forged = format!("{forged_claims}.{sig}");
        assert!(matches!(provider.validate(&forged).await, Err(AppError::AuthFailed(_))));
    }

    #[tokio::test]
    async fn test_expired_token_fails() {
        let provider = HmacIdentityProvider::new(SECRET);
        let token = provider
            .issue(&Identity::new("u-1", Role::Requester), Some(chrono::Duration::seconds(-5)))
            .unwrap();
        assert!(matches!(provider.validate(&token).await, Err(AppError::AuthFailed(_))));
    }

    #[tokio::test]
    async fn test_garbage_fails() {
        let provider = HmacIdentityProvider::new(SECRET);
        for bad in ["", "nodot", "abc.not-hex", "abc.deadbeef"] {
            assert!(matches!(provider.validate(bad).await, Err(AppError::AuthFailed(_))));
        }
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token("Bearer abc.def"), Some("abc.def"));
        assert_eq!(bearer_token("bearer   abc"), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
    }
}
