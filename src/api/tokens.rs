//! Signed access and refresh tokens: `base64url(claims).base64url(hmac_sha256)`

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde_json::{Map, Value};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("invalid token signature")]
    BadSignature,
    #[error("token has expired")]
    Expired,
    #[error("wrong token type")]
    WrongKind,
    #[error("invalid signing key")]
    InvalidKey,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Claims {
    pub user_id: Uuid,
    pub kind: TokenKind,
    pub jti: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Freshly issued access + refresh pair
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub access: Claims,
    pub refresh_token: String,
    pub refresh: Claims,
}

pub struct TokenSigner {
    mac: HmacSha256,
    user_id_claim: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenSigner {
    pub fn new(
        key: impl AsRef<[u8]>,
        user_id_claim: impl Into<String>,
        access_ttl: std::time::Duration,
        refresh_ttl: std::time::Duration,
    ) -> Result<Self, TokenError> {
        let mac = <HmacSha256 as Mac>::new_from_slice(key.as_ref()).map_err(|_| TokenError::InvalidKey)?;
        Ok(Self {
            mac,
            user_id_claim: user_id_claim.into(),
            access_ttl: Duration::from_std(access_ttl).unwrap_or_else(|_| Duration::hours(1)),
            refresh_ttl: Duration::from_std(refresh_ttl).unwrap_or_else(|_| Duration::days(7)),
        })
    }

    pub fn issue_pair(&self, user_id: Uuid, now: DateTime<Utc>) -> TokenPair {
        let (access_token, access) = self.sign(TokenKind::Access, user_id, now);
        let (refresh_token, refresh) = self.sign(TokenKind::Refresh, user_id, now);
        TokenPair {
            access_token,
            access,
            refresh_token,
            refresh,
        }
    }

    pub fn sign(&self, kind: TokenKind, user_id: Uuid, now: DateTime<Utc>) -> (String, Claims) {
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        let claims = Claims {
            user_id,
            kind,
            jti: Uuid::new_v4(),
            expires_at: now + ttl,
        };

        let mut payload = Map::new();
        payload.insert(self.user_id_claim.clone(), Value::String(user_id.to_string()));
        payload.insert("token_type".to_string(), Value::String(kind.as_str().to_string()));
        payload.insert("jti".to_string(), Value::String(claims.jti.to_string()));
        payload.insert("iat".to_string(), Value::from(now.timestamp()));
        payload.insert("exp".to_string(), Value::from(claims.expires_at.timestamp()));

        let payload_part = URL_SAFE_NO_PAD.encode(Value::Object(payload).to_string());
        let mut mac = self.mac.clone();
        mac.update(payload_part.as_bytes());
        let sig_part = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        (format!("{payload_part}.{sig_part}"), claims)
    }

    pub fn verify(
        &self,
        token: &str,
        expected: TokenKind,
        now: DateTime<Utc>,
    ) -> Result<Claims, TokenError> {
        let (payload_part, sig_part) = token.trim().split_once('.').ok_or(TokenError::Malformed)?;

        let signature = URL_SAFE_NO_PAD
            .decode(sig_part)
            .map_err(|_| TokenError::Malformed)?;
        let mut mac = self.mac.clone();
        mac.update(payload_part.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        let payload_bytes = URL_SAFE_NO_PAD
            .decode(payload_part)
            .map_err(|_| TokenError::Malformed)?;
        let payload: Map<String, Value> =
            serde_json::from_slice(&payload_bytes).map_err(|_| TokenError::Malformed)?;

        let text = |name: &str| payload.get(name).and_then(Value::as_str);
        let user_id = text(&self.user_id_claim)
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or(TokenError::Malformed)?;
        let jti = text("jti")
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or(TokenError::Malformed)?;
        let kind = match text("token_type") {
            Some("access") => TokenKind::Access,
            Some("refresh") => TokenKind::Refresh,
            _ => return Err(TokenError::Malformed),
        };
        let expires_at = payload
            .get("exp")
            .and_then(Value::as_i64)
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .ok_or(TokenError::Malformed)?;

        if kind != expected {
            return Err(TokenError::WrongKind);
        }
        if expires_at <= now {
            return Err(TokenError::Expired);
        }

        Ok(Claims {
            user_id,
            kind,
            jti,
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> TokenSigner {
        TokenSigner::new(
            "test-signing-key",
            "user_id",
            std::time::Duration::from_secs(3600),
            std::time::Duration::from_secs(7 * 86_400),
        )
        .unwrap()
    }

    #[test]
    fn test_sign_and_verify() {
        let now = Utc::now();
        let user = Uuid::new_v4();
        let (token, claims) = signer().sign(TokenKind::Access, user, now);

        let verified = signer().verify(&token, TokenKind::Access, now).unwrap();
        assert_eq!(verified.user_id, user);
        assert_eq!(verified.jti, claims.jti);
    }

    #[test]
    fn test_custom_user_id_claim() {
        let custom = TokenSigner::new(
            "k",
            "sub",
            std::time::Duration::from_secs(60),
            std::time::Duration::from_secs(60),
        )
        .unwrap();
        let (token, _) = custom.sign(TokenKind::Access, Uuid::new_v4(), Utc::now());
        let (payload, _) = token.split_once('.').unwrap();
        let json: Value = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).unwrap()).unwrap();
        assert!(json.get("sub").is_some());
        assert!(json.get("user_id").is_none());
    }

    #[test]
    fn test_tampered_token_rejected() {
        let now = Utc::now();
        let (token, _) = signer().sign(TokenKind::Access, Uuid::new_v4(), now);
        let other = TokenSigner::new(
            "another-key",
            "user_id",
            std::time::Duration::from_secs(3600),
            std::time::Duration::from_secs(3600),
        )
        .unwrap();
        assert_eq!(
            other.verify(&token, TokenKind::Access, now),
            Err(TokenError::BadSignature)
        );
        assert_eq!(
            signer().verify("garbage", TokenKind::Access, now),
            Err(TokenError::Malformed)
        );
    }

    #[test]
    fn test_expired_and_wrong_kind() {
        let now = Utc::now();
        let (refresh, _) = signer().sign(TokenKind::Refresh, Uuid::new_v4(), now);
        assert_eq!(
            signer().verify(&refresh, TokenKind::Access, now),
            Err(TokenError::WrongKind)
        );
        assert_eq!(
            signer().verify(&refresh, TokenKind::Refresh, now + Duration::days(8)),
            Err(TokenError::Expired)
        );
    }
}
