//! HTTP surface: auth, report requests and chat follow-ups

pub mod auth;
pub mod chat;
pub mod credentials;
pub mod error;
pub mod reports;
pub mod tokens;

use crate::pipeline::JobQueue;
use crate::store::StateStore;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokens::TokenSigner;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn StateStore>,
    pub queue: JobQueue,
    pub tokens: Arc<TokenSigner>,
}

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub message: String,
    pub status: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/login", post(auth::login))
        .route("/refresh-token", post(auth::refresh_token))
        .route("/logout", post(auth::logout))
        .route("/reports", post(reports::create_report))
        .route("/reports/:id", get(reports::get_report))
        .route("/chat/session/:report_id", get(chat::get_session))
        .route("/chat/message", post(chat::post_message))
        .route("/chat/message/:id", get(chat::get_message))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        message: "Realtor insights API is running!".to_string(),
        status: "ok".to_string(),
    })
}
