//! Report pipeline - search x4 -> merge/normalize -> analysis x4 -> finalize

use crate::analysis::market::{analyze_beds_baths, analyze_prices};
use crate::analysis::normalize::{normalize_comparables, NormalizeStats};
use crate::analysis::scoring::rate_or_reuse;
use crate::analysis::summary::{comparable_sample, compose_report_summary, generate_mock_summary, Insight};
use crate::analysis::{Comparable, PriceAnalysis, RatingOutcome, RoomAnalysis, Subject};
use crate::error::{AppError, AppResult};
use crate::providers::search::SEARCH_TEMPLATE_COUNT;
use crate::providers::{InsightRequest, LlmAdapter, ProviderError, RetryPolicy, SearchQuery, WebSearch};
use crate::store::{rating_to_decimal, Report, ReportStatus, ReportUpdate, StateStore};
use futures_util::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// User-facing summary of a failed report
pub const ANALYSIS_FAILED: &str = "Analysis failed";

/// Results requested from each search query
pub const SEARCH_MAX_RESULTS: usize = 20;

/// Everything the four analysis nodes produce
#[derive(Debug, Clone)]
pub struct AnalysisResults {
    pub prices: Option<PriceAnalysis>,
    pub rooms: Option<RoomAnalysis>,
    pub rating: RatingOutcome,
    pub insight: Insight,
}

impl AnalysisResults {
    /// Merge every node's output into one terminal update
    pub fn into_update(self) -> ReportUpdate {
        ReportUpdate {
            status: Some(ReportStatus::Completed),
            avg_beds: self.rooms.map(|r| r.avg_beds),
            avg_baths: self.rooms.map(|r| r.avg_baths),
            avg_market_price: self.prices.map(|p| p.avg_market_price),
            avg_price_per_sqft: self.prices.map(|p| p.avg_price_per_sqft),
            investment_rating: rating_to_decimal(self.rating.rating),
            ai_insight_summary: compose_report_summary(&self.insight),
            ..ReportUpdate::default()
        }
    }
}

pub struct ReportPipeline {
    store: Arc<dyn StateStore>,
    search: Arc<dyn WebSearch>,
    llm: Arc<dyn LlmAdapter>,
    retry: RetryPolicy,
}

impl ReportPipeline {
    pub fn new(
        store: Arc<dyn StateStore>,
        search: Arc<dyn WebSearch>,
        llm: Arc<dyn LlmAdapter>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            search,
            llm,
            retry,
        }
    }

    /// Run the whole graph for one report. Failures end with the report FAILED.
    pub async fn run(&self, report_id: Uuid) {
        match self.execute(report_id).await {
            Ok(report) => info!(
                report_id = %report_id,
                status = %report.status,
                "Report pipeline finished"
            ),
            Err(err) => {
                error!(report_id = %report_id, error = %err, "Report pipeline failed");
                let update = ReportUpdate::failed(ANALYSIS_FAILED, err.to_string());
                if let Err(store_err) = self.store.update_report(report_id, update).await {
                    error!(
                        report_id = %report_id,
                        error = %store_err,
                        "Could not mark report as failed"
                    );
                }
            }
        }
    }

    pub async fn execute(&self, report_id: Uuid) -> AppResult<Report> {
        let report = self.store.get_report(report_id).await?;
        if report.status.is_terminal() {
            info!(report_id = %report_id, status = %report.status, "Report already finished, skipping");
            return Ok(report);
        }

        info!("=== Report {} ===", report_id);

        // Step 1: Claim the report
        info!("Step 1/5: Marking report as processing...");
        let report = self
            .store
            .transition_report(report_id, ReportStatus::Processing)
            .await?;
        let property = self.store.get_property(report.property_id).await?;
        let subject = property.subject();

        // Step 2: Fan out the four searches
        info!("Step 2/5: Searching for comparables...");
        let raw = self.search_all(&report, &subject).await;
        if raw.is_empty() {
            return Err(AppError::NoComparables);
        }
        info!("✓ Collected {} raw records", raw.len());

        // Step 3: Merge, normalize and persist before any analysis runs
        info!("Step 3/5: Normalizing comparables...");
        let (comps, stats) = merge_and_normalize(&raw, &subject);
        info!("✓ Normalized: {}", stats);
        self.store
            .update_report(
                report_id,
                ReportUpdate {
                    comparable_data: Some(comps.clone()),
                    ..ReportUpdate::default()
                },
            )
            .await?;

        // Step 4: The four analysis nodes
        info!("Step 4/5: Analyzing...");
        let results = self.analyze(&comps, &subject).await?;
        info!("✓ Rated {:.1} / 5", results.rating.rating);

        // Step 5: Finalize
        info!("Step 5/5: Finalizing report...");
        let report = self
            .store
            .update_report(report_id, results.into_update())
            .await?;
        info!("✓ Report {} complete", report_id);

        Ok(report)
    }

    async fn search_all(&self, report: &Report, subject: &Subject) -> Vec<Value> {
        let query = SearchQuery {
            area: report.extracted_area.clone(),
            city: report.extracted_city.clone(),
            area_sqft: subject.area_sqft.unwrap_or_default(),
            beds: subject.beds.unwrap_or_default(),
            baths: subject.baths.unwrap_or_default(),
            count: SEARCH_MAX_RESULTS,
        };

        let batches = join_all((0..SEARCH_TEMPLATE_COUNT).map(|seed| self.search_one(&query, seed))).await;
        batches.into_iter().flatten().collect()
    }

    /// One search node: web search then LLM extraction.
    /// A node that exhausts its retries contributes nothing.
    async fn search_one(&self, query: &SearchQuery, seed_index: usize) -> Vec<Value> {
        let output = match self
            .retry
            .run("search", || self.search.query(query, seed_index))
            .await
        {
            Ok(output) => output,
            Err(err) => {
                warn!(seed_index, error = %err, "Search failed, continuing without it");
                return Vec::new();
            }
        };
        if output.raw_text.trim().is_empty() {
            return Vec::new();
        }

        match self
            .retry
            .run("format_comps", || {
                self.llm
                    .format_comps(&output.raw_text, &query.area, &query.city)
            })
            .await
        {
            Ok(records) => records,
            Err(err) => {
                warn!(seed_index, error = %err, "Formatting failed, continuing without it");
                Vec::new()
            }
        }
    }

    /// Run the price, room, rating and insight nodes concurrently
    pub async fn analyze(&self, comps: &[Comparable], subject: &Subject) -> AppResult<AnalysisResults> {
        let (prices, rooms, rating, insight) = tokio::join!(
            async { analyze_prices(comps) },
            async { analyze_beds_baths(comps) },
            async { rate_or_reuse(None, comps, subject) },
            self.analyze_insight(comps, subject),
        );

        Ok(AnalysisResults {
            prices,
            rooms,
            rating,
            insight: insight?,
        })
    }

    /// Narrative node. Retry exhaustion fails the report; a fatal provider
    /// response falls back to the deterministic summary.
    async fn analyze_insight(
        &self,
        comps: &[Comparable],
        subject: &Subject,
    ) -> AppResult<Insight> {
        // Scoring is deterministic, so this matches the rating node
        let outcome = rate_or_reuse(None, comps, subject);
        let sample = if outcome.is_neutral_fallback() {
            &[][..]
        } else {
            comparable_sample(comps)
        };
        let request = InsightRequest {
            comparables: sample,
            subject,
            rating: outcome.rating,
            breakdown: outcome.breakdown.as_ref(),
        };

        match self.retry.run("insight", || self.llm.insight(&request)).await {
            Ok(insight) => Ok(insight),
            Err(ProviderError::Fatal(reason)) => {
                warn!(error = %reason, "Insight model unusable, using generated summary");
                Ok(generate_mock_summary(subject, &outcome))
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Union of every search batch run through the normalizer.
/// An incomplete subject has no size band, so nothing survives the gates.
pub fn merge_and_normalize(raw: &[Value], subject: &Subject) -> (Vec<Comparable>, NormalizeStats) {
    match subject.profile() {
        Some(profile) => normalize_comparables(raw, &profile),
        None => (
            Vec::new(),
            NormalizeStats {
                received: raw.len(),
                out_of_band: raw.len(),
                ..NormalizeStats::default()
            },
        ),
    }
}
