//! State store - the only shared mutable state between API handlers and workers

pub mod memory;
pub mod models;
pub mod postgres;

pub use memory::MemoryStore;
pub use models::*;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("an active report already exists: {existing_id}")]
    DuplicateReport { existing_id: Uuid },

    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get_property(&self, id: Uuid) -> StoreResult<Property>;

    /// Insert a PENDING report. Fails with `DuplicateReport` while a
    /// non-failed report exists for the same user and property.
    async fn create_report(&self, new: NewReport) -> StoreResult<Report>;
    async fn get_report(&self, id: Uuid) -> StoreResult<Report>;
    /// Most recent report for the pair, whatever its status
    async fn find_report(&self, user_id: Uuid, property_id: Uuid) -> StoreResult<Option<Report>>;
    async fn delete_report(&self, id: Uuid) -> StoreResult<()>;
    /// Move to `status`. Repeating the current status is a no-op.
    async fn transition_report(&self, id: Uuid, status: ReportStatus) -> StoreResult<Report>;
    async fn update_report(&self, id: Uuid, update: ReportUpdate) -> StoreResult<Report>;
    /// Ids of PENDING or PROCESSING reports, oldest first
    async fn unfinished_reports(&self) -> StoreResult<Vec<Uuid>>;

    /// Returns the session and whether it was created by this call.
    /// The report must be COMPLETED.
    async fn get_or_create_session(
        &self,
        user_id: Uuid,
        report_id: Uuid,
    ) -> StoreResult<(ChatSession, bool)>;
    async fn get_session(&self, id: Uuid) -> StoreResult<ChatSession>;
    async fn increment_user_messages(&self, session_id: Uuid) -> StoreResult<ChatSession>;

    async fn create_message(&self, new: NewMessage) -> StoreResult<ChatMessage>;
    async fn get_message(&self, id: Uuid) -> StoreResult<ChatMessage>;
    async fn update_message(&self, id: Uuid, update: MessageUpdate) -> StoreResult<ChatMessage>;
    /// Timestamp ascending, nulls last
    async fn list_messages(&self, session_id: Uuid) -> StoreResult<Vec<ChatMessage>>;
    /// AI messages still PENDING or PROCESSING
    async fn unfinished_replies(&self) -> StoreResult<Vec<PendingReply>>;

    async fn get_user(&self, id: Uuid) -> StoreResult<User>;
    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>>;

    async fn insert_refresh_token(&self, record: RefreshTokenRecord) -> StoreResult<()>;
    async fn find_refresh_token(&self, jti: Uuid) -> StoreResult<Option<RefreshTokenRecord>>;
    async fn blacklist_refresh_token(&self, jti: Uuid, at: DateTime<Utc>) -> StoreResult<()>;
    /// Returns the number of rows removed
    async fn delete_expired_refresh_tokens(&self, now: DateTime<Utc>) -> StoreResult<u64>;
}
