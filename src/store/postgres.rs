//! PostgreSQL state store

use super::{
    ChatMessage, ChatSession, MessageUpdate, NewMessage, NewReport, PendingReply, Property,
    RefreshTokenRecord, Report, ReportStatus, ReportUpdate, StateStore, StoreError, StoreResult,
    User,
};
use crate::analysis::Comparable;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

const MESSAGE_COLUMNS: &str = "id, session_id, role, status, content, timestamp, reply_to";

const REPORT_COLUMNS: &str = "id, property_id, user_id, status, extracted_area, extracted_city, \
     comparable_data, avg_beds, avg_baths, avg_market_price, avg_price_per_sqft, \
     investment_rating, ai_insight_summary, error_message, created_at";

#[derive(sqlx::FromRow)]
struct ReportRow {
    id: Uuid,
    property_id: Uuid,
    user_id: Uuid,
    status: ReportStatus,
    extracted_area: String,
    extracted_city: String,
    comparable_data: Json<Vec<Comparable>>,
    avg_beds: Option<i32>,
    avg_baths: Option<i32>,
    avg_market_price: Option<Decimal>,
    avg_price_per_sqft: Option<Decimal>,
    investment_rating: Option<Decimal>,
    ai_insight_summary: Option<String>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<ReportRow> for Report {
    fn from(row: ReportRow) -> Self {
        Report {
            id: row.id,
            property_id: row.property_id,
            user_id: row.user_id,
            status: row.status,
            extracted_area: row.extracted_area,
            extracted_city: row.extracted_city,
            comparable_data: row.comparable_data.0,
            avg_beds: row.avg_beds,
            avg_baths: row.avg_baths,
            avg_market_price: row.avg_market_price,
            avg_price_per_sqft: row.avg_price_per_sqft,
            investment_rating: row.investment_rating,
            ai_insight_summary: row.ai_insight_summary,
            error_message: row.error_message,
            created_at: row.created_at,
        }
    }
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations complete");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn active_report_id(
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
        property_id: Uuid,
    ) -> StoreResult<Option<Uuid>> {
        let id = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM ai_report WHERE user_id = $1 AND property_id = $2 AND status <> 'FAILED' LIMIT 1",
        )
        .bind(user_id)
        .bind(property_id)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(id)
    }

    async fn lock_report(tx: &mut Transaction<'_, Postgres>, id: Uuid) -> StoreResult<Report> {
        let row = sqlx::query_as::<_, ReportRow>(&format!(
            "SELECT {REPORT_COLUMNS} FROM ai_report WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(StoreError::NotFound("report"))?;
        Ok(row.into())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl StateStore for PgStore {
    async fn get_property(&self, id: Uuid) -> StoreResult<Property> {
        sqlx::query_as::<_, Property>(
            "SELECT id, title, beds, baths, area_sqft, price, address FROM property WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound("property"))
    }

    async fn create_report(&self, new: NewReport) -> StoreResult<Report> {
        let mut tx = self.pool.begin().await?;
        if let Some(existing_id) =
            Self::active_report_id(&mut tx, new.user_id, new.property_id).await?
        {
            return Err(StoreError::DuplicateReport { existing_id });
        }

        let report = new.into_report(Utc::now());
        let inserted = sqlx::query(
            r#"
            INSERT INTO ai_report (
                id, property_id, user_id, status, extracted_area, extracted_city,
                comparable_data, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(report.id)
        .bind(report.property_id)
        .bind(report.user_id)
        .bind(report.status)
        .bind(&report.extracted_area)
        .bind(&report.extracted_city)
        .bind(Json(&report.comparable_data))
        .bind(report.created_at)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {
                tx.commit().await?;
                debug!("Created report {}", report.id);
                Ok(report)
            }
            Err(err) if is_unique_violation(&err) => {
                // Lost a race with a concurrent insert for the same pair
                tx.rollback().await?;
                let mut tx = self.pool.begin().await?;
                let existing = Self::active_report_id(&mut tx, report.user_id, report.property_id).await?;
                tx.commit().await?;
                match existing {
                    Some(existing_id) => Err(StoreError::DuplicateReport { existing_id }),
                    None => Err(StoreError::Database(err)),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn get_report(&self, id: Uuid) -> StoreResult<Report> {
        let row = sqlx::query_as::<_, ReportRow>(&format!(
            "SELECT {REPORT_COLUMNS} FROM ai_report WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound("report"))?;
        Ok(row.into())
    }

    async fn find_report(&self, user_id: Uuid, property_id: Uuid) -> StoreResult<Option<Report>> {
        let row = sqlx::query_as::<_, ReportRow>(&format!(
            "SELECT {REPORT_COLUMNS} FROM ai_report WHERE user_id = $1 AND property_id = $2 \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(user_id)
        .bind(property_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn delete_report(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM ai_report WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("report"));
        }
        Ok(())
    }

    async fn transition_report(&self, id: Uuid, status: ReportStatus) -> StoreResult<Report> {
        self.update_report(id, ReportUpdate::status(status)).await
    }

    async fn update_report(&self, id: Uuid, update: ReportUpdate) -> StoreResult<Report> {
        let mut tx = self.pool.begin().await?;
        let current = Self::lock_report(&mut tx, id).await?;
        let next = update.apply(&current)?;

        if next != current {
            sqlx::query(
                r#"
                UPDATE ai_report SET
                    status = $2,
                    comparable_data = $3,
                    avg_beds = $4,
                    avg_baths = $5,
                    avg_market_price = $6,
                    avg_price_per_sqft = $7,
                    investment_rating = $8,
                    ai_insight_summary = $9,
                    error_message = $10
                WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(next.status)
            .bind(Json(&next.comparable_data))
            .bind(next.avg_beds)
            .bind(next.avg_baths)
            .bind(next.avg_market_price)
            .bind(next.avg_price_per_sqft)
            .bind(next.investment_rating)
            .bind(&next.ai_insight_summary)
            .bind(&next.error_message)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(next)
    }

    async fn unfinished_reports(&self) -> StoreResult<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM ai_report WHERE status IN ('PENDING', 'PROCESSING') ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        debug!("{} unfinished reports", ids.len());
        Ok(ids)
    }

    async fn get_or_create_session(
        &self,
        user_id: Uuid,
        report_id: Uuid,
    ) -> StoreResult<(ChatSession, bool)> {
        let mut tx = self.pool.begin().await?;
        let status = sqlx::query_scalar::<_, ReportStatus>(
            "SELECT status FROM ai_report WHERE id = $1 FOR SHARE",
        )
        .bind(report_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound("report"))?;
        if status != ReportStatus::Completed {
            return Err(StoreError::Invalid("report is not completed".to_string()));
        }

        let created = sqlx::query_as::<_, ChatSession>(
            r#"
            INSERT INTO chat_session (id, user_id, report_id, user_message_count, created_at)
            VALUES ($1, $2, $3, 0, now())
            ON CONFLICT (user_id, report_id) DO NOTHING
            RETURNING id, user_id, report_id, user_message_count, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(report_id)
        .fetch_optional(&mut *tx)
        .await?;

        let result = match created {
            Some(session) => (session, true),
            None => {
                let session = sqlx::query_as::<_, ChatSession>(
                    "SELECT id, user_id, report_id, user_message_count, created_at \
                     FROM chat_session WHERE user_id = $1 AND report_id = $2",
                )
                .bind(user_id)
                .bind(report_id)
                .fetch_one(&mut *tx)
                .await?;
                (session, false)
            }
        };

        tx.commit().await?;
        Ok(result)
    }

    async fn get_session(&self, id: Uuid) -> StoreResult<ChatSession> {
        sqlx::query_as::<_, ChatSession>(
            "SELECT id, user_id, report_id, user_message_count, created_at FROM chat_session WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound("chat session"))
    }

    async fn increment_user_messages(&self, session_id: Uuid) -> StoreResult<ChatSession> {
        sqlx::query_as::<_, ChatSession>(
            r#"
            UPDATE chat_session SET user_message_count = user_message_count + 1
            WHERE id = $1
            RETURNING id, user_id, report_id, user_message_count, created_at
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound("chat session"))
    }

    async fn create_message(&self, new: NewMessage) -> StoreResult<ChatMessage> {
        let message = new.into_message();
        sqlx::query(
            "INSERT INTO chat_message (id, session_id, role, status, content, timestamp, reply_to) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(message.id)
        .bind(message.session_id)
        .bind(message.role)
        .bind(message.status)
        .bind(&message.content)
        .bind(message.timestamp)
        .bind(message.reply_to)
        .execute(&self.pool)
        .await
        .map_err(|err| match &err {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                StoreError::NotFound("chat session")
            }
            _ => StoreError::Database(err),
        })?;
        Ok(message)
    }

    async fn get_message(&self, id: Uuid) -> StoreResult<ChatMessage> {
        sqlx::query_as::<_, ChatMessage>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM chat_message WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound("chat message"))
    }

    async fn update_message(&self, id: Uuid, update: MessageUpdate) -> StoreResult<ChatMessage> {
        let mut tx = self.pool.begin().await?;
        let current = sqlx::query_as::<_, ChatMessage>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM chat_message WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound("chat message"))?;

        let next = update.apply(&current)?;
        sqlx::query("UPDATE chat_message SET status = $2, content = $3, timestamp = $4 WHERE id = $1")
            .bind(id)
            .bind(next.status)
            .bind(&next.content)
            .bind(next.timestamp)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(next)
    }

    async fn list_messages(&self, session_id: Uuid) -> StoreResult<Vec<ChatMessage>> {
        let messages = sqlx::query_as::<_, ChatMessage>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM chat_message \
             WHERE session_id = $1 ORDER BY timestamp ASC NULLS LAST"
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(messages)
    }

    async fn unfinished_replies(&self) -> StoreResult<Vec<PendingReply>> {
        let replies = sqlx::query_as::<_, PendingReply>(
            r#"
            SELECT m.id AS ai_message_id, s.report_id, q.content AS user_query
            FROM chat_message m
            JOIN chat_session s ON s.id = m.session_id
            LEFT JOIN chat_message q ON q.id = m.reply_to
            WHERE m.role = 'ai' AND m.status IN ('PENDING', 'PROCESSING')
            ORDER BY s.created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        debug!("{} unfinished chat replies", replies.len());
        Ok(replies)
    }

    async fn get_user(&self, id: Uuid) -> StoreResult<User> {
        sqlx::query_as::<_, User>(
            "SELECT id, username, password_hash, password_salt, role, is_active FROM app_user WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound("user"))
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, password_hash, password_salt, role, is_active FROM app_user \
             WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn insert_refresh_token(&self, record: RefreshTokenRecord) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO refresh_token (jti, user_id, token_hash, expires_at, blacklisted_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(record.jti)
        .bind(record.user_id)
        .bind(&record.token_hash)
        .bind(record.expires_at)
        .bind(record.blacklisted_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_refresh_token(&self, jti: Uuid) -> StoreResult<Option<RefreshTokenRecord>> {
        let record = sqlx::query_as::<_, RefreshTokenRecord>(
            "SELECT jti, user_id, token_hash, expires_at, blacklisted_at FROM refresh_token WHERE jti = $1",
        )
        .bind(jti)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn blacklist_refresh_token(&self, jti: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE refresh_token SET blacklisted_at = COALESCE(blacklisted_at, $2) WHERE jti = $1",
        )
        .bind(jti)
        .bind(at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("refresh token"));
        }
        Ok(())
    }

    async fn delete_expired_refresh_tokens(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM refresh_token WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
