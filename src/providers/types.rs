//! Provider result types shared by the search and LLM adapters

use crate::analysis::normalize::coerce_number;
use crate::analysis::{Breakdown, Comparable, Subject};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

/// How a provider call failed. The retry policy branches on the variant.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// HTTP 429 or an equivalent quota signal
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Network failure, timeout or 5xx; worth retrying
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Bad request, auth failure or a response that cannot be parsed
    #[error("provider error: {0}")]
    Fatal(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Fatal(_))
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Classify a non-success HTTP status
    pub fn from_status(status: u16, body: &str, retry_after: Option<Duration>) -> Self {
        let message = format!("HTTP {}: {}", status, truncate(body, 200));
        match status {
            429 => Self::RateLimited {
                message,
                retry_after,
            },
            408 | 500..=599 => Self::Transient(message),
            _ => Self::Fatal(message),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            Self::Transient(err.to_string())
        } else if err.is_decode() {
            Self::Fatal(format!("unparseable response: {}", err))
        } else {
            Self::Transient(err.to_string())
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// One web search call: the sanitized text and the credits it consumed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOutput {
    pub raw_text: String,
    pub credits_used: f64,
}

/// Parameters of a comparables search
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub area: String,
    pub city: String,
    pub area_sqft: f64,
    pub beds: f64,
    pub baths: f64,
    pub count: usize,
}

/// Payload handed to the insight model
#[derive(Debug, Clone, Serialize)]
pub struct InsightRequest<'a> {
    pub comparables: &'a [Comparable],
    pub subject: &'a Subject,
    pub rating: f64,
    pub breakdown: Option<&'a Breakdown>,
}

/// What-if attributes extracted from a chat message.
///
/// Set `error` means the request was not a property what-if at all.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Counterfactual {
    pub area_sqft: Option<f64>,
    pub beds: Option<f64>,
    pub baths: Option<f64>,
    pub price: Option<f64>,
    pub error: Option<String>,
}

impl Counterfactual {
    /// Build from a model response, tolerating string-typed numbers
    pub fn from_json(value: &Value) -> Self {
        let number = |name: &str| value.get(name).and_then(coerce_number).map(|n| n as f64);
        let error = value
            .get("error")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string);

        Self {
            area_sqft: number("area_sqft"),
            beds: number("beds"),
            baths: number("baths"),
            price: number("price"),
            error,
        }
    }

    pub fn as_subject(&self) -> Subject {
        Subject {
            price: self.price,
            area_sqft: self.area_sqft,
            beds: self.beds,
            baths: self.baths,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_classification() {
        let limited = ProviderError::from_status(429, "slow down", Some(Duration::from_secs(5)));
        assert!(matches!(limited, ProviderError::RateLimited { .. }));
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(5)));

        assert!(matches!(ProviderError::from_status(503, "", None), ProviderError::Transient(_)));
        assert!(matches!(ProviderError::from_status(401, "", None), ProviderError::Fatal(_)));
        assert!(!ProviderError::from_status(400, "", None).is_retryable());
    }

    #[test]
    fn test_counterfactual_from_json() {
        let cf = Counterfactual::from_json(&json!({
            "area_sqft": "1,200",
            "beds": 5,
            "baths": 2.0,
            "price": "$500,000",
            "error": null
        }));
        assert_eq!(cf.beds, Some(5.0));
        assert_eq!(cf.area_sqft, Some(1_200.0));
        assert_eq!(cf.price, Some(500_000.0));
        assert!(cf.error.is_none());
    }

    #[test]
    fn test_counterfactual_error() {
        let cf = Counterfactual::from_json(&json!({"error": "Invalid request. Please try again."}));
        assert_eq!(cf.error.as_deref(), Some("Invalid request. Please try again."));
        assert_eq!(cf.as_subject(), Subject::default());
    }
}
