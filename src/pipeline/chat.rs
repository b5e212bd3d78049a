//! Chat pipeline - extract counterfactual -> rescore on frozen comps -> re-summarize

use crate::analysis::scoring::rate_or_reuse;
use crate::analysis::summary::{comparable_sample, compose_chat_reply, Insight};
use crate::analysis::{Comparable, RatingOutcome, Subject};
use crate::error::AppResult;
use crate::providers::{InsightRequest, LlmAdapter, ProviderResult, RetryPolicy};
use crate::store::{ChatMessage, MessageStatus, MessageUpdate, NewMessage, StateStore, StoreResult};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// Shown when the chain cannot finish
pub const AGENT_FAILED: &str = "Agent failed to respond. Please try again.";

/// One queued what-if question
#[derive(Debug, Clone, PartialEq)]
pub struct ChatJob {
    pub ai_message_id: Uuid,
    pub report_id: Uuid,
    pub user_query: String,
}

/// How a chat chain ended
#[derive(Debug, Clone, PartialEq)]
pub enum ChatOutcome {
    Answered { rating: f64 },
    /// The extractor refused the question; its reason is the message content
    Rejected { reason: String },
    /// Message was already terminal
    Skipped,
}

/// Store the user's turn and the empty AI reply it will receive.
/// Returns `(user_message, ai_placeholder)`.
pub async fn open_turn(
    store: &dyn StateStore,
    session_id: Uuid,
    content: &str,
) -> StoreResult<(ChatMessage, ChatMessage)> {
    let user = store
        .create_message(NewMessage::user(session_id, content))
        .await?;
    store.increment_user_messages(session_id).await?;
    let ai = store
        .create_message(NewMessage::ai_placeholder(session_id, user.id))
        .await?;
    Ok((user, ai))
}

pub struct ChatPipeline {
    store: Arc<dyn StateStore>,
    llm: Arc<dyn LlmAdapter>,
    retry: RetryPolicy,
}

impl ChatPipeline {
    pub fn new(store: Arc<dyn StateStore>, llm: Arc<dyn LlmAdapter>, retry: RetryPolicy) -> Self {
        Self { store, llm, retry }
    }

    /// Run the chain for one AI message. Failures end with the message FAILED.
    pub async fn run(&self, job: &ChatJob) {
        match self.execute(job).await {
            Ok(outcome) => info!(
                message_id = %job.ai_message_id,
                outcome = ?outcome,
                "Chat pipeline finished"
            ),
            Err(err) => {
                error!(message_id = %job.ai_message_id, error = %err, "Chat pipeline failed");
                if let Err(store_err) = self
                    .store
                    .update_message(job.ai_message_id, MessageUpdate::failed(AGENT_FAILED))
                    .await
                {
                    error!(
                        message_id = %job.ai_message_id,
                        error = %store_err,
                        "Could not mark message as failed"
                    );
                }
            }
        }
    }

    pub async fn execute(&self, job: &ChatJob) -> AppResult<ChatOutcome> {
        let message = self.store.get_message(job.ai_message_id).await?;
        if message.status.is_terminal() {
            return Ok(ChatOutcome::Skipped);
        }

        // Step 1: Claim the message
        info!("Step 1/4: Processing message {}...", job.ai_message_id);
        self.store
            .update_message(job.ai_message_id, MessageUpdate::status(MessageStatus::Processing))
            .await?;

        let report = self.store.get_report(job.report_id).await?;
        let property = self.store.get_property(report.property_id).await?;
        // Every turn starts from the attributes of record, not earlier what-ifs
        let base = property.subject();

        // Step 2: Extract the counterfactual
        info!("Step 2/4: Extracting counterfactual...");
        let counterfactual = self
            .retry
            .run("extract_counterfactual", || {
                self.llm.extract_counterfactual(&base, &job.user_query)
            })
            .await?;
        if let Some(reason) = counterfactual.error {
            info!("✗ Extractor rejected the question: {}", reason);
            self.store
                .update_message(job.ai_message_id, MessageUpdate::failed(reason.clone()))
                .await?;
            return Ok(ChatOutcome::Rejected { reason });
        }

        // Step 3: Rescore on the frozen comparables
        info!("Step 3/4: Rescoring...");
        let subject = base.with_overrides(&counterfactual.as_subject());
        let outcome = rate_or_reuse(None, &report.comparable_data, &subject);
        info!("✓ Projected rating {:.1} / 5", outcome.rating);

        // Step 4: Narrate and finalize
        info!("Step 4/4: Summarizing...");
        let insight = self
            .resummarize(&outcome, &report.comparable_data, &subject)
            .await?;
        let content = compose_chat_reply(&insight, outcome.rating);
        self.store
            .update_message(job.ai_message_id, MessageUpdate::completed(content, Utc::now()))
            .await?;

        Ok(ChatOutcome::Answered {
            rating: outcome.rating,
        })
    }

    /// Ask for a narrative of an already scored projection. Every retry
    /// reuses `scored` instead of running the engine again.
    pub async fn resummarize(
        &self,
        scored: &RatingOutcome,
        comps: &[Comparable],
        subject: &Subject,
    ) -> ProviderResult<Insight> {
        self.retry
            .run("insight", move || async move {
                let outcome = rate_or_reuse(Some(scored.clone()), comps, subject);
                let request = InsightRequest {
                    comparables: comparable_sample(comps),
                    subject,
                    rating: outcome.rating,
                    breakdown: outcome.breakdown.as_ref(),
                };
                self.llm.insight(&request).await
            })
            .await
    }
}
