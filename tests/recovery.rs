mod common;

use common::*;
use realtor_insights::pipeline::{
    open_turn, requeue_unfinished, ChatJob, ChatPipeline, Job, JobQueue, ReportPipeline,
    RequeueStats, WorkerPool, AGENT_FAILED,
};
use realtor_insights::providers::RetryPolicy;
use realtor_insights::store::{
    ChatMessage, MemoryStore, MessageStatus, MessageUpdate, NewMessage, NewReport, Report,
    ReportStatus, Role, StateStore,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Store contents as a crashed process would leave them
struct Leftovers {
    store: MemoryStore,
    pending: Report,
    processing: Report,
    answered_report: Report,
    question: ChatMessage,
    reply: ChatMessage,
    orphan: ChatMessage,
    finished_reply: ChatMessage,
}

async fn leftovers() -> Leftovers {
    let (store, first, owner) = seeded_store().await;

    let pending = store
        .create_report(NewReport::for_property(owner.id, &first))
        .await
        .unwrap();

    let second = property();
    store.insert_property(second.clone()).await;
    let processing = store
        .create_report(NewReport::for_property(owner.id, &second))
        .await
        .unwrap();
    let processing = store
        .transition_report(processing.id, ReportStatus::Processing)
        .await
        .unwrap();

    let third = property();
    store.insert_property(third.clone()).await;
    let answered_report =
        completed_report(&store, owner.id, &third, frozen_comparables(), 3.0).await;
    let (session, _) = store
        .get_or_create_session(owner.id, answered_report.id)
        .await
        .unwrap();

    let (question, reply) = open_turn(&store, session.id, "what if it had 3 beds?")
        .await
        .unwrap();

    // AI row with no link back to its question
    let orphan = store
        .create_message(NewMessage {
            session_id: session.id,
            role: Role::Ai,
            status: MessageStatus::Pending,
            content: Some(String::new()),
            timestamp: None,
            reply_to: None,
        })
        .await
        .unwrap();
    store
        .update_message(orphan.id, MessageUpdate::status(MessageStatus::Processing))
        .await
        .unwrap();

    let (_, finished_reply) = open_turn(&store, session.id, "and with 2 baths?")
        .await
        .unwrap();
    store
        .update_message(finished_reply.id, MessageUpdate::status(MessageStatus::Processing))
        .await
        .unwrap();
    store
        .update_message(
            finished_reply.id,
            MessageUpdate::completed("done".to_string(), chrono::Utc::now()),
        )
        .await
        .unwrap();

    Leftovers {
        store,
        pending,
        processing,
        answered_report,
        question,
        reply,
        orphan,
        finished_reply,
    }
}

#[tokio::test]
async fn test_requeue_unfinished_reports_and_replies() {
    let l = leftovers().await;
    let (queue, mut jobs) = JobQueue::channel(16);

    let stats = requeue_unfinished(&l.store, &queue).await.unwrap();

    assert_eq!(
        stats,
        RequeueStats {
            reports: 2,
            replies: 1,
            abandoned: 1,
        }
    );

    let mut queued = Vec::new();
    while let Ok(job) = jobs.try_recv() {
        queued.push(job);
    }
    assert_eq!(
        queued,
        vec![
            Job::Report {
                report_id: l.pending.id
            },
            Job::Report {
                report_id: l.processing.id
            },
            Job::Chat(ChatJob {
                ai_message_id: l.reply.id,
                report_id: l.answered_report.id,
                user_query: l.question.content.clone().unwrap(),
            }),
        ]
    );

    let orphan = l.store.get_message(l.orphan.id).await.unwrap();
    assert_eq!(orphan.status, MessageStatus::Failed);
    assert_eq!(orphan.content.as_deref(), Some(AGENT_FAILED));

    let finished = l.store.get_message(l.finished_reply.id).await.unwrap();
    assert_eq!(finished.content.as_deref(), Some("done"));
}

#[tokio::test]
async fn test_requeue_fails_when_queue_is_closed() {
    let l = leftovers().await;
    let (queue, jobs) = JobQueue::channel(16);
    drop(jobs);

    assert!(requeue_unfinished(&l.store, &queue).await.is_err());
    // Nothing was claimed, so the next start picks the same work up
    assert_eq!(l.store.unfinished_reports().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_workers_finish_requeued_work() {
    let l = leftovers().await;
    let llm = Arc::new(
        StubLlm::new(happy_path_records()).with_counterfactual(json!({"beds": 3, "error": null})),
    );
    let store: Arc<dyn StateStore> = Arc::new(l.store.clone());
    let reports = Arc::new(ReportPipeline::new(
        Arc::clone(&store),
        Arc::new(StubSearch),
        llm.clone(),
        RetryPolicy::no_delay(3),
    ));
    let chats = Arc::new(ChatPipeline::new(
        Arc::clone(&store),
        llm,
        RetryPolicy::no_delay(3),
    ));

    let (queue, receiver) = JobQueue::channel(16);
    let pool = WorkerPool::start(receiver, 2, reports, chats);
    requeue_unfinished(store.as_ref(), &queue).await.unwrap();

    let ids = [l.pending.id, l.processing.id];
    let finished = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if settled(&l.store, &ids, l.reply.id).await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(finished.is_ok(), "requeued work did not finish");

    for id in ids {
        let report = l.store.get_report(id).await.unwrap();
        assert_eq!(report.status, ReportStatus::Completed);
        assert_eq!(report.comparable_data.len(), 40);
    }
    let reply = l.store.get_message(l.reply.id).await.unwrap();
    assert_eq!(reply.status, MessageStatus::Completed);
    assert!(l.store.unfinished_replies().await.unwrap().is_empty());

    pool.shutdown().await;
}

async fn settled(store: &MemoryStore, reports: &[Uuid], reply: Uuid) -> bool {
    for id in reports {
        if !store.get_report(*id).await.unwrap().status.is_terminal() {
            return false;
        }
    }
    store.get_message(reply).await.unwrap().status.is_terminal()
}
