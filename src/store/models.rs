//! Persisted entities and their validation rules

use crate::analysis::{Comparable, Subject};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "report_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum ReportStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ReportStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Legal forward moves. Staying in the same status is always allowed.
    pub fn can_transition_to(self, next: Self) -> bool {
        use ReportStatus::*;
        self == next
            || matches!(
                (self, next),
                (Pending, Processing) | (Pending, Failed) | (Processing, Completed) | (Processing, Failed)
            )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chat message lifecycle: PENDING -> PROCESSING -> COMPLETED | FAILED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "message_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl MessageStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        use MessageStatus::*;
        self == next
            || matches!(
                (self, next),
                (Pending, Processing) | (Pending, Failed) | (Processing, Completed) | (Processing, Failed)
            )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "message_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Ai,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role")]
pub enum UserRole {
    #[default]
    Default,
    Agent,
    Admin,
    Superuser,
    UnAuthorized,
}

impl UserRole {
    pub fn is_staff(self) -> bool {
        matches!(self, Self::Admin | Self::Superuser)
    }
}

/// A listed property. Address is a comma separated `key=value` string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Property {
    pub id: Uuid,
    pub title: String,
    pub beds: Option<i32>,
    pub baths: Option<i32>,
    pub area_sqft: Option<i32>,
    pub price: Option<Decimal>,
    pub address: String,
}

impl Property {
    fn address_field(&self, key: &str) -> Option<String> {
        self.address.split(',').find_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            (k.trim().eq_ignore_ascii_case(key)).then(|| v.trim().to_string())
        })
    }

    /// `(area, city)` parsed from the address; missing keys become empty strings
    pub fn location(&self) -> (String, String) {
        (
            self.address_field("area").unwrap_or_default(),
            self.address_field("city").unwrap_or_default(),
        )
    }

    /// Attributes of record, as the scoring engine sees them
    pub fn subject(&self) -> Subject {
        Subject {
            price: self.price.and_then(|p| p.to_f64()),
            area_sqft: self.area_sqft.map(f64::from),
            beds: self.beds.map(f64::from),
            baths: self.baths.map(f64::from),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub id: Uuid,
    pub property_id: Uuid,
    pub user_id: Uuid,
    pub status: ReportStatus,
    pub extracted_area: String,
    pub extracted_city: String,
    pub comparable_data: Vec<Comparable>,
    pub avg_beds: Option<i32>,
    pub avg_baths: Option<i32>,
    pub avg_market_price: Option<Decimal>,
    pub avg_price_per_sqft: Option<Decimal>,
    pub investment_rating: Option<Decimal>,
    pub ai_insight_summary: Option<String>,
    #[serde(skip)]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Validated input for a new report
#[derive(Debug, Clone, PartialEq)]
pub struct NewReport {
    pub user_id: Uuid,
    pub property_id: Uuid,
    pub extracted_area: String,
    pub extracted_city: String,
}

impl NewReport {
    pub fn for_property(user_id: Uuid, property: &Property) -> Self {
        let (extracted_area, extracted_city) = property.location();
        Self {
            user_id,
            property_id: property.id,
            extracted_area,
            extracted_city,
        }
    }

    pub fn into_report(self, now: DateTime<Utc>) -> Report {
        Report {
            id: Uuid::new_v4(),
            property_id: self.property_id,
            user_id: self.user_id,
            status: ReportStatus::Pending,
            extracted_area: self.extracted_area,
            extracted_city: self.extracted_city,
            comparable_data: Vec::new(),
            avg_beds: None,
            avg_baths: None,
            avg_market_price: None,
            avg_price_per_sqft: None,
            investment_rating: None,
            ai_insight_summary: None,
            error_message: None,
            created_at: now,
        }
    }
}

/// Rating as stored: one decimal place
pub fn rating_to_decimal(rating: f64) -> Option<Decimal> {
    Decimal::from_f64_retain(rating).map(|d| d.round_dp(1))
}

fn is_valid_rating(rating: Decimal) -> bool {
    rating >= Decimal::ZERO && rating <= Decimal::from(5) && (rating * Decimal::from(2)).fract().is_zero()
}

/// Partial update of a report. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportUpdate {
    pub status: Option<ReportStatus>,
    pub comparable_data: Option<Vec<Comparable>>,
    pub avg_beds: Option<i32>,
    pub avg_baths: Option<i32>,
    pub avg_market_price: Option<Decimal>,
    pub avg_price_per_sqft: Option<Decimal>,
    pub investment_rating: Option<Decimal>,
    pub ai_insight_summary: Option<String>,
    pub error_message: Option<String>,
}

impl ReportUpdate {
    pub fn status(status: ReportStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Terminal failure with the user-facing summary and an internal diagnostic
    pub fn failed(summary: &str, diagnostic: impl Into<String>) -> Self {
        Self {
            status: Some(ReportStatus::Failed),
            ai_insight_summary: Some(summary.to_string()),
            error_message: Some(diagnostic.into()),
            ..Self::default()
        }
    }

    /// Apply onto `report`, enforcing the report invariants.
    /// A completed report is frozen; reapplying identical values is a no-op.
    pub fn apply(&self, report: &Report) -> Result<Report, StoreError> {
        let mut next = report.clone();

        if let Some(status) = self.status {
            if !report.status.can_transition_to(status) {
                return Err(StoreError::InvalidTransition {
                    from: report.status.to_string(),
                    to: status.to_string(),
                });
            }
            next.status = status;
        }
        if let Some(comps) = &self.comparable_data {
            if comps
                .iter()
                .any(|c| c.price <= 0 || c.area_sqft <= 0 || c.beds <= 0 || c.baths <= 0)
            {
                return Err(StoreError::Invalid(
                    "comparable values must be positive".to_string(),
                ));
            }
            next.comparable_data = comps.clone();
        }
        if let Some(v) = self.avg_beds {
            next.avg_beds = Some(v);
        }
        if let Some(v) = self.avg_baths {
            next.avg_baths = Some(v);
        }
        if let Some(v) = self.avg_market_price {
            next.avg_market_price = Some(v);
        }
        if let Some(v) = self.avg_price_per_sqft {
            next.avg_price_per_sqft = Some(v);
        }
        if let Some(rating) = self.investment_rating {
            if !is_valid_rating(rating) {
                return Err(StoreError::Invalid(format!(
                    "rating {} is not a half step in [0, 5]",
                    rating
                )));
            }
            next.investment_rating = Some(rating);
        }
        if let Some(v) = &self.ai_insight_summary {
            next.ai_insight_summary = Some(v.clone());
        }
        if let Some(v) = &self.error_message {
            next.error_message = Some(v.clone());
        }

        if next.investment_rating.is_some() && next.status != ReportStatus::Completed {
            return Err(StoreError::Invalid(
                "rating can only be set on a completed report".to_string(),
            ));
        }
        if report.status == ReportStatus::Completed && next != *report {
            return Err(StoreError::Invalid("completed report is frozen".to_string()));
        }

        Ok(next)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChatSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub report_id: Uuid,
    pub user_message_count: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChatMessage {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: Role,
    pub status: MessageStatus,
    pub content: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    /// User message an AI reply answers
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reply_to: Option<Uuid>,
}

/// Sort key for timestamp ascending with nulls last
pub fn message_order(a: &ChatMessage, b: &ChatMessage) -> std::cmp::Ordering {
    match (a.timestamp, b.timestamp) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub session_id: Uuid,
    pub role: Role,
    pub status: MessageStatus,
    pub content: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub reply_to: Option<Uuid>,
}

impl NewMessage {
    /// A user turn is complete as soon as it is stored
    pub fn user(session_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            session_id,
            role: Role::User,
            status: MessageStatus::Completed,
            content: Some(content.into()),
            timestamp: Some(Utc::now()),
            reply_to: None,
        }
    }

    /// Empty AI message the chat pipeline fills in later
    pub fn ai_placeholder(session_id: Uuid, reply_to: Uuid) -> Self {
        Self {
            session_id,
            role: Role::Ai,
            status: MessageStatus::Pending,
            content: Some(String::new()),
            timestamp: None,
            reply_to: Some(reply_to),
        }
    }

    pub fn into_message(self) -> ChatMessage {
        ChatMessage {
            id: Uuid::new_v4(),
            session_id: self.session_id,
            role: self.role,
            status: self.status,
            content: self.content,
            timestamp: self.timestamp,
            reply_to: self.reply_to,
        }
    }
}

/// AI reply left PENDING or PROCESSING, with the question it answers when known
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct PendingReply {
    pub ai_message_id: Uuid,
    pub report_id: Uuid,
    pub user_query: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageUpdate {
    pub status: Option<MessageStatus>,
    pub content: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl MessageUpdate {
    pub fn status(status: MessageStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn completed(content: String, at: DateTime<Utc>) -> Self {
        Self {
            status: Some(MessageStatus::Completed),
            content: Some(content),
            timestamp: Some(at),
        }
    }

    pub fn failed(content: impl Into<String>) -> Self {
        Self {
            status: Some(MessageStatus::Failed),
            content: Some(content.into()),
            timestamp: None,
        }
    }

    pub fn apply(&self, message: &ChatMessage) -> Result<ChatMessage, StoreError> {
        let mut next = message.clone();
        if let Some(status) = self.status {
            if !message.status.can_transition_to(status) {
                return Err(StoreError::InvalidTransition {
                    from: message.status.to_string(),
                    to: status.to_string(),
                });
            }
            next.status = status;
        }
        if let Some(content) = &self.content {
            next.content = Some(content.clone());
        }
        if let Some(ts) = self.timestamp {
            next.timestamp = Some(ts);
        }
        Ok(next)
    }
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub password_salt: String,
    pub role: UserRole,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct RefreshTokenRecord {
    pub jti: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub blacklisted_at: Option<DateTime<Utc>>,
}

impl RefreshTokenRecord {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.blacklisted_at.is_none() && self.expires_at > now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn property() -> Property {
        Property {
            id: Uuid::new_v4(),
            title: "Corner flat".to_string(),
            beds: Some(2),
            baths: Some(2),
            area_sqft: Some(1_200),
            price: Some(Decimal::from(500_000)),
            address: "street=12 Elm St, area=Mission, city=San Francisco, zip=94110".to_string(),
        }
    }

    fn report() -> Report {
        NewReport::for_property(Uuid::new_v4(), &property()).into_report(Utc::now())
    }

    #[test]
    fn test_location_parsing() {
        assert_eq!(
            property().location(),
            ("Mission".to_string(), "San Francisco".to_string())
        );

        let bare = Property {
            address: "12 Elm St".to_string(),
            ..property()
        };
        assert_eq!(bare.location(), (String::new(), String::new()));
    }

    #[test]
    fn test_property_subject() {
        let subject = property().subject();
        assert_eq!(subject.price, Some(500_000.0));
        assert_eq!(subject.beds, Some(2.0));
    }

    #[test]
    fn test_status_transitions() {
        use ReportStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Processing));
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Failed.can_transition_to(Completed));
    }

    #[test]
    fn test_completed_report_is_frozen() {
        let mut r = report();
        r.status = ReportStatus::Processing;

        let finalize = ReportUpdate {
            status: Some(ReportStatus::Completed),
            investment_rating: Some(Decimal::from_str("3.5").unwrap()),
            ai_insight_summary: Some("ok".to_string()),
            ..ReportUpdate::default()
        };
        let done = finalize.apply(&r).unwrap();
        assert_eq!(done.status, ReportStatus::Completed);

        // Same inputs again: no-op
        assert_eq!(finalize.apply(&done).unwrap(), done);

        let change = ReportUpdate {
            ai_insight_summary: Some("changed".to_string()),
            ..ReportUpdate::default()
        };
        assert!(matches!(change.apply(&done), Err(StoreError::Invalid(_))));
        assert!(matches!(
            ReportUpdate::status(ReportStatus::Processing).apply(&done),
            Err(StoreError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_rating_requires_completion_and_half_steps() {
        let mut r = report();
        r.status = ReportStatus::Processing;

        let early = ReportUpdate {
            investment_rating: Some(Decimal::from(3)),
            ..ReportUpdate::default()
        };
        assert!(early.apply(&r).is_err());

        let off_grid = ReportUpdate {
            status: Some(ReportStatus::Completed),
            investment_rating: Some(Decimal::from_str("3.3").unwrap()),
            ..ReportUpdate::default()
        };
        assert!(off_grid.apply(&r).is_err());
    }

    #[test]
    fn test_rating_to_decimal() {
        assert_eq!(rating_to_decimal(2.5), Some(Decimal::from_str("2.5").unwrap()));
        assert_eq!(rating_to_decimal(4.0), Some(Decimal::from(4)));
    }

    #[test]
    fn test_ai_placeholder_is_pending_and_empty() {
        let question = Uuid::new_v4();
        let msg = NewMessage::ai_placeholder(Uuid::new_v4(), question).into_message();
        assert_eq!(msg.role, Role::Ai);
        assert_eq!(msg.reply_to, Some(question));
        assert_eq!(msg.status, MessageStatus::Pending);
        assert_eq!(msg.content.as_deref(), Some(""));
        assert!(msg.timestamp.is_none());
    }

    #[test]
    fn test_message_order_nulls_last() {
        let session = Uuid::new_v4();
        let user = NewMessage::user(session, "hi").into_message();
        let pending = NewMessage::ai_placeholder(session, user.id).into_message();
        let mut msgs = vec![pending.clone(), user.clone()];
        msgs.sort_by(message_order);
        assert_eq!(msgs[0].id, user.id);
        assert_eq!(msgs[1].id, pending.id);
    }

    #[test]
    fn test_user_role_staff() {
        assert!(UserRole::Admin.is_staff());
        assert!(UserRole::Superuser.is_staff());
        assert!(!UserRole::Agent.is_staff());
    }
}
