//! In-memory state store used by the test suites

use super::{
    message_order, ChatMessage, ChatSession, MessageStatus, MessageUpdate, NewMessage, NewReport,
    PendingReply, Property, RefreshTokenRecord, Report, ReportStatus, ReportUpdate, Role,
    StateStore, StoreError, StoreResult, User,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Tables {
    properties: HashMap<Uuid, Property>,
    reports: HashMap<Uuid, Report>,
    sessions: HashMap<Uuid, ChatSession>,
    messages: HashMap<Uuid, ChatMessage>,
    users: HashMap<Uuid, User>,
    refresh_tokens: HashMap<Uuid, RefreshTokenRecord>,
}

/// All tables behind one lock so multi-table writes stay atomic
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_property(&self, property: Property) {
        self.tables
            .write()
            .await
            .properties
            .insert(property.id, property);
    }

    pub async fn insert_user(&self, user: User) {
        self.tables.write().await.users.insert(user.id, user);
    }

    pub async fn refresh_token_count(&self) -> usize {
        self.tables.read().await.refresh_tokens.len()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get_property(&self, id: Uuid) -> StoreResult<Property> {
        self.tables
            .read()
            .await
            .properties
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound("property"))
    }

    async fn create_report(&self, new: NewReport) -> StoreResult<Report> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables.reports.values().find(|r| {
            r.user_id == new.user_id
                && r.property_id == new.property_id
                && r.status != ReportStatus::Failed
        }) {
            return Err(StoreError::DuplicateReport {
                existing_id: existing.id,
            });
        }

        let report = new.into_report(Utc::now());
        tables.reports.insert(report.id, report.clone());
        Ok(report)
    }

    async fn get_report(&self, id: Uuid) -> StoreResult<Report> {
        self.tables
            .read()
            .await
            .reports
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound("report"))
    }

    async fn find_report(&self, user_id: Uuid, property_id: Uuid) -> StoreResult<Option<Report>> {
        Ok(self
            .tables
            .read()
            .await
            .reports
            .values()
            .filter(|r| r.user_id == user_id && r.property_id == property_id)
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn delete_report(&self, id: Uuid) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables.reports.remove(&id).is_none() {
            return Err(StoreError::NotFound("report"));
        }

        let sessions: Vec<Uuid> = tables
            .sessions
            .values()
            .filter(|s| s.report_id == id)
            .map(|s| s.id)
            .collect();
        for session_id in &sessions {
            tables.sessions.remove(session_id);
        }
        tables
            .messages
            .retain(|_, m| !sessions.contains(&m.session_id));
        Ok(())
    }

    async fn transition_report(&self, id: Uuid, status: ReportStatus) -> StoreResult<Report> {
        self.update_report(id, ReportUpdate::status(status)).await
    }

    async fn update_report(&self, id: Uuid, update: ReportUpdate) -> StoreResult<Report> {
        let mut tables = self.tables.write().await;
        let current = tables
            .reports
            .get(&id)
            .ok_or(StoreError::NotFound("report"))?;
        let next = update.apply(current)?;
        tables.reports.insert(id, next.clone());
        Ok(next)
    }

    async fn unfinished_reports(&self) -> StoreResult<Vec<Uuid>> {
        let tables = self.tables.read().await;
        let mut open: Vec<&Report> = tables
            .reports
            .values()
            .filter(|r| matches!(r.status, ReportStatus::Pending | ReportStatus::Processing))
            .collect();
        open.sort_by_key(|r| r.created_at);
        Ok(open.into_iter().map(|r| r.id).collect())
    }

    async fn get_or_create_session(
        &self,
        user_id: Uuid,
        report_id: Uuid,
    ) -> StoreResult<(ChatSession, bool)> {
        let mut tables = self.tables.write().await;
        let report = tables
            .reports
            .get(&report_id)
            .ok_or(StoreError::NotFound("report"))?;
        if report.status != ReportStatus::Completed {
            return Err(StoreError::Invalid("report is not completed".to_string()));
        }

        if let Some(session) = tables
            .sessions
            .values()
            .find(|s| s.user_id == user_id && s.report_id == report_id)
        {
            return Ok((session.clone(), false));
        }

        let session = ChatSession {
            id: Uuid::new_v4(),
            user_id,
            report_id,
            user_message_count: 0,
            created_at: Utc::now(),
        };
        tables.sessions.insert(session.id, session.clone());
        Ok((session, true))
    }

    async fn get_session(&self, id: Uuid) -> StoreResult<ChatSession> {
        self.tables
            .read()
            .await
            .sessions
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound("chat session"))
    }

    async fn increment_user_messages(&self, session_id: Uuid) -> StoreResult<ChatSession> {
        let mut tables = self.tables.write().await;
        let session = tables
            .sessions
            .get_mut(&session_id)
            .ok_or(StoreError::NotFound("chat session"))?;
        session.user_message_count += 1;
        Ok(session.clone())
    }

    async fn create_message(&self, new: NewMessage) -> StoreResult<ChatMessage> {
        let mut tables = self.tables.write().await;
        if !tables.sessions.contains_key(&new.session_id) {
            return Err(StoreError::NotFound("chat session"));
        }
        let message = new.into_message();
        tables.messages.insert(message.id, message.clone());
        Ok(message)
    }

    async fn get_message(&self, id: Uuid) -> StoreResult<ChatMessage> {
        self.tables
            .read()
            .await
            .messages
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound("chat message"))
    }

    async fn update_message(&self, id: Uuid, update: MessageUpdate) -> StoreResult<ChatMessage> {
        let mut tables = self.tables.write().await;
        let current = tables
            .messages
            .get(&id)
            .ok_or(StoreError::NotFound("chat message"))?;
        let next = update.apply(current)?;
        tables.messages.insert(id, next.clone());
        Ok(next)
    }

    async fn list_messages(&self, session_id: Uuid) -> StoreResult<Vec<ChatMessage>> {
        let mut messages: Vec<ChatMessage> = self
            .tables
            .read()
            .await
            .messages
            .values()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect();
        messages.sort_by(message_order);
        Ok(messages)
    }

    async fn unfinished_replies(&self) -> StoreResult<Vec<PendingReply>> {
        let tables = self.tables.read().await;
        Ok(tables
            .messages
            .values()
            .filter(|m| {
                m.role == Role::Ai
                    && matches!(m.status, MessageStatus::Pending | MessageStatus::Processing)
            })
            .filter_map(|m| {
                let session = tables.sessions.get(&m.session_id)?;
                let user_query = m
                    .reply_to
                    .and_then(|id| tables.messages.get(&id))
                    .and_then(|q| q.content.clone());
                Some(PendingReply {
                    ai_message_id: m.id,
                    report_id: session.report_id,
                    user_query,
                })
            })
            .collect())
    }

    async fn get_user(&self, id: Uuid) -> StoreResult<User> {
        self.tables
            .read()
            .await
            .users
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound("user"))
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        Ok(self
            .tables
            .read()
            .await
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn insert_refresh_token(&self, record: RefreshTokenRecord) -> StoreResult<()> {
        self.tables
            .write()
            .await
            .refresh_tokens
            .insert(record.jti, record);
        Ok(())
    }

    async fn find_refresh_token(&self, jti: Uuid) -> StoreResult<Option<RefreshTokenRecord>> {
        Ok(self.tables.read().await.refresh_tokens.get(&jti).cloned())
    }

    async fn blacklist_refresh_token(&self, jti: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let record = tables
            .refresh_tokens
            .get_mut(&jti)
            .ok_or(StoreError::NotFound("refresh token"))?;
        record.blacklisted_at.get_or_insert(at);
        Ok(())
    }

    async fn delete_expired_refresh_tokens(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut tables = self.tables.write().await;
        let before = tables.refresh_tokens.len();
        tables.refresh_tokens.retain(|_, r| r.expires_at > now);
        Ok((before - tables.refresh_tokens.len()) as u64)
    }
}
