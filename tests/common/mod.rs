//! Shared fixtures: stub providers and a seeded in-memory store

#![allow(dead_code)]

use async_trait::async_trait;
use realtor_insights::analysis::summary::Insight;
use realtor_insights::analysis::{Comparable, Subject};
use realtor_insights::api::credentials::{generate_salt, hash_password};
use realtor_insights::providers::{
    Counterfactual, InsightRequest, LlmAdapter, ProviderError, ProviderResult, SearchOutput,
    SearchQuery, WebSearch,
};
use realtor_insights::store::{
    rating_to_decimal, MemoryStore, NewReport, Property, Report, ReportStatus, ReportUpdate,
    StateStore, User, UserRole,
};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

pub const PASSWORD: &str = "correct horse battery";

/// Search stub: every query returns its seed index as the page text
pub struct StubSearch;

#[async_trait]
impl WebSearch for StubSearch {
    async fn query(&self, _query: &SearchQuery, seed_index: usize) -> ProviderResult<SearchOutput> {
        Ok(SearchOutput {
            raw_text: seed_index.to_string(),
            credits_used: 1.0,
        })
    }
}

/// Records handed back for one search seed
pub type RecordFn = Box<dyn Fn(usize) -> Vec<Value> + Send + Sync>;

/// One insight call as the stub saw it
#[derive(Debug, Clone, PartialEq)]
pub struct InsightCall {
    pub comparables: usize,
    pub rating: f64,
    pub had_breakdown: bool,
}

pub struct StubLlm {
    records: RecordFn,
    insight_failures: AtomicUsize,
    counterfactual: Mutex<Value>,
    pub insight_calls: Mutex<Vec<InsightCall>>,
    pub extract_calls: AtomicUsize,
}

impl StubLlm {
    pub fn new(records: RecordFn) -> Self {
        Self {
            records,
            insight_failures: AtomicUsize::new(0),
            counterfactual: Mutex::new(json!({"error": "Invalid request. Please try again."})),
            insight_calls: Mutex::new(Vec::new()),
            extract_calls: AtomicUsize::new(0),
        }
    }

    /// Fail the next `n` insight calls with a rate-limit response
    pub fn failing_insight(self, n: usize) -> Self {
        self.insight_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn with_counterfactual(self, value: Value) -> Self {
        *self.counterfactual.lock().unwrap() = value;
        self
    }

    pub fn insight_calls(&self) -> Vec<InsightCall> {
        self.insight_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmAdapter for StubLlm {
    async fn format_comps(&self, raw_text: &str, _area: &str, _city: &str) -> ProviderResult<Vec<Value>> {
        let seed: usize = raw_text
            .trim()
            .parse()
            .map_err(|_| ProviderError::Fatal(format!("unexpected page: {raw_text}")))?;
        Ok((self.records)(seed))
    }

    async fn insight(&self, request: &InsightRequest<'_>) -> ProviderResult<Insight> {
        self.insight_calls.lock().unwrap().push(InsightCall {
            comparables: request.comparables.len(),
            rating: request.rating,
            had_breakdown: request.breakdown.is_some(),
        });

        let remaining = self.insight_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.insight_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ProviderError::RateLimited {
                message: "rate limit reached".to_string(),
                retry_after: None,
            });
        }

        Ok(Insight {
            investment_summary: Some(format!("Rated {:.1} against {} listings.", request.rating, request.comparables.len())),
            pros: vec!["Quiet street".to_string()],
            cons: vec!["Dated kitchen".to_string()],
            weighted_analysis: Some("Adjustments move the price model.".to_string()),
        })
    }

    async fn extract_counterfactual(&self, _current: &Subject, _user_query: &str) -> ProviderResult<Counterfactual> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Counterfactual::from_json(&self.counterfactual.lock().unwrap()))
    }
}

pub fn record(price: i64, area_sqft: i64, beds: i64, baths: i64) -> Value {
    json!({"price": price, "area_sqft": area_sqft, "beds": beds, "baths": baths})
}

/// Eighty distinct listings. The first forty fit a 1200 sqft 2/2 subject,
/// the rest are far too large.
pub fn listing(i: i64) -> Value {
    if i < 40 {
        record(400_000 + 5_000 * i, 900 + 15 * i, 1 + i % 3, 1 + (i / 3) % 3)
    } else {
        record(600_000 + 5_000 * i, 2_000 + 10 * i, 3, 2)
    }
}

/// Seed k returns listings [20k, 20k + 20) plus five repeats of its first rows
pub fn happy_path_records() -> RecordFn {
    Box::new(|seed| {
        let start = 20 * seed as i64;
        let mut out: Vec<Value> = (start..start + 20).map(listing).collect();
        out.extend((start..start + 5).map(listing));
        out
    })
}

/// Two listings per seed, all inside the band
pub fn sparse_records() -> RecordFn {
    Box::new(|seed| {
        let base = 2 * seed as i64;
        (base..base + 2)
            .map(|i| record(480_000 + 1_000 * i, 1_150 + 5 * i, 2, 2))
            .collect()
    })
}

pub fn property() -> Property {
    Property {
        id: Uuid::new_v4(),
        title: "Two bed flat".to_string(),
        beds: Some(2),
        baths: Some(2),
        area_sqft: Some(1_200),
        price: Some(Decimal::from(500_000)),
        address: "area=Riverside, city=Springfield".to_string(),
    }
}

pub fn user(username: &str, role: UserRole) -> User {
    let salt = generate_salt();
    User {
        id: Uuid::new_v4(),
        username: username.to_string(),
        password_hash: hash_password(PASSWORD, &salt),
        password_salt: salt,
        role,
        is_active: true,
    }
}

pub async fn seeded_store() -> (MemoryStore, Property, User) {
    let store = MemoryStore::new();
    let property = property();
    let owner = user("alice", UserRole::Default);
    store.insert_property(property.clone()).await;
    store.insert_user(owner.clone()).await;
    (store, property, owner)
}

/// Forty comparables taken through the normal path
pub fn frozen_comparables() -> Vec<Comparable> {
    (0..40)
        .map(|i| Comparable {
            price: 400_000 + 5_000 * i,
            area_sqft: 900 + 15 * i,
            beds: (1 + i % 3) as i32,
            baths: (1 + (i / 3) % 3) as i32,
        })
        .collect()
}

/// A finished report with frozen comparables and the given rating
pub async fn completed_report(
    store: &MemoryStore,
    user_id: Uuid,
    property: &Property,
    comps: Vec<Comparable>,
    rating: f64,
) -> Report {
    let report = store
        .create_report(NewReport::for_property(user_id, property))
        .await
        .unwrap();
    store
        .transition_report(report.id, ReportStatus::Processing)
        .await
        .unwrap();
    store
        .update_report(
            report.id,
            ReportUpdate {
                status: Some(ReportStatus::Completed),
                comparable_data: Some(comps),
                investment_rating: rating_to_decimal(rating),
                ai_insight_summary: Some("Baseline summary".to_string()),
                ..ReportUpdate::default()
            },
        )
        .await
        .unwrap()
}
