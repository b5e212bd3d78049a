mod common;

use common::*;
use realtor_insights::analysis::scoring::rate_or_reuse;
use realtor_insights::analysis::summary::format_rating;
use realtor_insights::analysis::Subject;
use realtor_insights::pipeline::{open_turn, ChatJob, ChatOutcome, ChatPipeline, AGENT_FAILED};
use realtor_insights::providers::RetryPolicy;
use realtor_insights::store::{MemoryStore, MessageStatus, Role, StateStore};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;

fn pipeline(store: &MemoryStore, llm: Arc<StubLlm>) -> ChatPipeline {
    ChatPipeline::new(Arc::new(store.clone()), llm, RetryPolicy::no_delay(3))
}

/// Completed report, a session on it and one queued question
async fn queued_turn(store: &MemoryStore, question: &str) -> ChatJob {
    let property = property();
    store.insert_property(property.clone()).await;
    let owner = user("bob", realtor_insights::store::UserRole::Default);
    store.insert_user(owner.clone()).await;

    let report = completed_report(store, owner.id, &property, frozen_comparables(), 3.0).await;
    let (session, created) = store.get_or_create_session(owner.id, report.id).await.unwrap();
    assert!(created);

    let (user_msg, ai) = open_turn(store, session.id, question).await.unwrap();
    assert_eq!(user_msg.role, Role::User);
    assert_eq!(user_msg.status, MessageStatus::Completed);
    assert_eq!(ai.status, MessageStatus::Pending);
    assert_eq!(ai.content.as_deref(), Some(""));

    ChatJob {
        ai_message_id: ai.id,
        report_id: report.id,
        user_query: question.to_string(),
    }
}

#[tokio::test]
async fn test_extractor_rejection_fails_message() {
    let store = MemoryStore::new();
    let job = queued_turn(&store, "what's the weather?").await;
    let llm = Arc::new(StubLlm::new(happy_path_records()));

    let outcome = pipeline(&store, llm.clone()).execute(&job).await.unwrap();

    assert_eq!(
        outcome,
        ChatOutcome::Rejected {
            reason: "Invalid request. Please try again.".to_string()
        }
    );
    let message = store.get_message(job.ai_message_id).await.unwrap();
    assert_eq!(message.status, MessageStatus::Failed);
    assert_eq!(
        message.content.as_deref(),
        Some("Invalid request. Please try again.")
    );
    assert_eq!(llm.extract_calls.load(Ordering::SeqCst), 1);
    assert!(llm.insight_calls().is_empty());
}

#[tokio::test]
async fn test_what_if_reruns_on_frozen_comparables() {
    let store = MemoryStore::new();
    let job = queued_turn(&store, "what if it had 5 beds?").await;
    let llm = Arc::new(StubLlm::new(happy_path_records()).with_counterfactual(json!({
        "beds": 5,
        "area_sqft": 1200,
        "baths": 2,
        "price": 500000,
        "error": null
    })));

    let outcome = pipeline(&store, llm.clone()).execute(&job).await.unwrap();

    let projected = Subject {
        price: Some(500_000.0),
        area_sqft: Some(1_200.0),
        beds: Some(5.0),
        baths: Some(2.0),
    };
    let expected = rate_or_reuse(None, &frozen_comparables(), &projected).rating;
    assert_eq!(outcome, ChatOutcome::Answered { rating: expected });

    let message = store.get_message(job.ai_message_id).await.unwrap();
    assert_eq!(message.status, MessageStatus::Completed);
    assert!(message.timestamp.is_some());
    let content = message.content.unwrap();
    assert!(content.contains(&format!(
        "**New Projected Rating: {} / 5**",
        format_rating(expected)
    )));
    assert!(content.contains("**Key Strengths:**\n- Quiet street"));
    assert!(content.contains("**Potential Risks:**\n- Dated kitchen"));

    // The report itself is untouched
    let report = store.get_report(job.report_id).await.unwrap();
    assert_eq!(report.comparable_data, frozen_comparables());
}

#[tokio::test]
async fn test_resummarize_retries_reuse_the_scored_rating() {
    let store = MemoryStore::new();
    let job = queued_turn(&store, "what if it were 1300 sqft?").await;
    let llm = Arc::new(
        StubLlm::new(happy_path_records())
            .with_counterfactual(json!({"area_sqft": 1300, "error": null}))
            .failing_insight(2),
    );

    let outcome = pipeline(&store, llm.clone()).execute(&job).await.unwrap();

    let calls = llm.insight_calls();
    assert_eq!(calls.len(), 3);
    assert!(calls.iter().all(|c| c.rating == calls[0].rating));
    assert_eq!(outcome, ChatOutcome::Answered { rating: calls[0].rating });
}

#[tokio::test]
async fn test_insight_exhaustion_fails_message_with_generic_reply() {
    let store = MemoryStore::new();
    let job = queued_turn(&store, "what if it had 3 baths?").await;
    let llm = Arc::new(
        StubLlm::new(happy_path_records())
            .with_counterfactual(json!({"baths": 3, "error": null}))
            .failing_insight(4),
    );

    pipeline(&store, llm).run(&job).await;

    let message = store.get_message(job.ai_message_id).await.unwrap();
    assert_eq!(message.status, MessageStatus::Failed);
    assert_eq!(message.content.as_deref(), Some(AGENT_FAILED));
}

#[tokio::test]
async fn test_answered_message_is_skipped() {
    let store = MemoryStore::new();
    let job = queued_turn(&store, "what if it had 3 beds?").await;
    let llm = Arc::new(
        StubLlm::new(happy_path_records()).with_counterfactual(json!({"beds": 3, "error": null})),
    );
    let pipeline = pipeline(&store, llm.clone());

    pipeline.run(&job).await;
    let outcome = pipeline.execute(&job).await.unwrap();

    assert_eq!(outcome, ChatOutcome::Skipped);
    assert_eq!(llm.extract_calls.load(Ordering::SeqCst), 1);
}
