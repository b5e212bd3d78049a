//! Login, token refresh, logout and the bearer-token extractor

use crate::api::credentials::{hash_token, verify_password};
use crate::api::error::ApiError;
use crate::api::tokens::{TokenError, TokenKind, TokenPair};
use crate::api::AppState;
use crate::store::{RefreshTokenRecord, User, UserRole};
use axum::extract::{FromRequestParts, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

/// The authenticated caller
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

impl AuthUser {
    pub fn id(&self) -> Uuid {
        self.0.id
    }

    pub fn role(&self) -> UserRole {
        self.0.role
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or_else(|| ApiError::Unauthorized("missing authorization header".into()))?
            .to_str()
            .map_err(|_| ApiError::Unauthorized("invalid authorization header".into()))?;

        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .ok_or_else(|| ApiError::Unauthorized("unsupported authorization scheme".into()))?
            .trim();

        let claims = state
            .tokens
            .verify(token, TokenKind::Access, Utc::now())
            .map_err(|e| ApiError::Unauthorized(e.to_string()))?;

        let user = state
            .store
            .get_user(claims.user_id)
            .await
            .map_err(|_| ApiError::Unauthorized("unknown user".into()))?;
        if !user.is_active {
            return Err(ApiError::Unauthorized("account is deactivated".into()));
        }

        Ok(AuthUser(user))
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

/// Response of both login and refresh
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub access_token_expiry: DateTime<Utc>,
    pub user_id: Uuid,
    pub user_role: UserRole,
}

impl TokenResponse {
    fn new(pair: TokenPair, user: &User) -> Self {
        Self {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            access_token_expiry: pair.access.expires_at,
            user_id: user.id,
            user_role: user.role,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogoutResponse {
    pub success: String,
}

fn required(field: Option<String>, name: &str) -> Result<String, ApiError> {
    field
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("{} is required", name)))
}

/// Issue a token pair and remember the refresh half
async fn issue_tokens(state: &AppState, user: &User) -> Result<TokenResponse, ApiError> {
    let pair = state.tokens.issue_pair(user.id, Utc::now());
    state
        .store
        .insert_refresh_token(RefreshTokenRecord {
            jti: pair.refresh.jti,
            user_id: user.id,
            token_hash: hash_token(&pair.refresh_token),
            expires_at: pair.refresh.expires_at,
            blacklisted_at: None,
        })
        .await?;
    Ok(TokenResponse::new(pair, user))
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let username = required(payload.username, "username")?;
    let password = required(payload.password, "password")?;

    let user = state
        .store
        .find_user_by_username(&username)
        .await?
        .filter(|u| verify_password(&password, &u.password_salt, &u.password_hash))
        .ok_or_else(|| ApiError::BadRequest("Invalid credentials".into()))?;
    if !user.is_active {
        return Err(ApiError::BadRequest("Account is deactivated".into()));
    }

    info!(user_id = %user.id, "User logged in");
    Ok(Json(issue_tokens(&state, &user).await?))
}

/// Rotate a refresh token: the old one is blacklisted, a new pair is issued
pub async fn refresh_token(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let token = required(payload.refresh_token, "refresh_token")?;
    let now = Utc::now();

    let claims = state
        .tokens
        .verify(&token, TokenKind::Refresh, now)
        .map_err(|e| match e {
            TokenError::Expired => ApiError::Unauthorized("Refresh token has expired".into()),
            _ => ApiError::BadRequest("Invalid token payload".into()),
        })?;

    let record = state
        .store
        .find_refresh_token(claims.jti)
        .await?
        .filter(|r| r.token_hash == hash_token(&token) && r.user_id == claims.user_id)
        .ok_or_else(|| ApiError::Unauthorized("Refresh token is not recognised".into()))?;
    if !record.is_usable(now) {
        warn!(user_id = %claims.user_id, "Blacklisted refresh token presented");
        return Err(ApiError::Unauthorized("Refresh token has been revoked".into()));
    }

    let user = state.store.get_user(claims.user_id).await?;
    if !user.is_active {
        return Err(ApiError::Unauthorized("Account is deactivated".into()));
    }

    state.store.blacklist_refresh_token(record.jti, now).await?;
    Ok(Json(issue_tokens(&state, &user).await?))
}

pub async fn logout(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<LogoutResponse>, ApiError> {
    let token = required(payload.refresh_token, "refresh_token")?;
    let now = Utc::now();

    let claims = match state.tokens.verify(&token, TokenKind::Refresh, now) {
        Ok(claims) => claims,
        // Expired tokens are already unusable
        Err(TokenError::Expired) => {
            return Ok(Json(LogoutResponse {
                success: "Logged out".to_string(),
            }))
        }
        Err(_) => return Err(ApiError::BadRequest("Invalid token payload".into())),
    };
    if claims.user_id != auth.id() {
        return Err(ApiError::BadRequest("Invalid token payload".into()));
    }

    state.store.blacklist_refresh_token(claims.jti, now).await?;
    info!(user_id = %auth.id(), "User logged out");

    Ok(Json(LogoutResponse {
        success: "Logged out".to_string(),
    }))
}
