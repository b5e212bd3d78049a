//! In-process job broker and the worker pool that drains it

use crate::error::{AppError, AppResult};
use crate::pipeline::chat::{ChatJob, ChatPipeline, AGENT_FAILED};
use crate::pipeline::report::ReportPipeline;
use crate::store::{MessageUpdate, StateStore};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Jobs buffered before `enqueue` starts waiting
pub const QUEUE_CAPACITY: usize = 256;

/// Work carries ids only; workers reload state from the store
#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    Report { report_id: Uuid },
    Chat(ChatJob),
}

#[derive(Debug, Clone)]
pub struct JobQueue {
    sender: mpsc::Sender<Job>,
}

impl JobQueue {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Job>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }

    pub async fn enqueue(&self, job: Job) -> AppResult<()> {
        self.sender
            .send(job)
            .await
            .map_err(|_| AppError::Internal("job queue is closed".to_string()))
    }
}

/// Fixed pool of workers sharing one receiver
pub struct WorkerPool {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(
        receiver: mpsc::Receiver<Job>,
        concurrency: usize,
        reports: Arc<ReportPipeline>,
        chats: Arc<ChatPipeline>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let receiver = Arc::new(Mutex::new(receiver));

        let handles = (0..concurrency.max(1))
            .map(|worker| {
                let cancel = cancel.clone();
                let receiver = Arc::clone(&receiver);
                let reports = Arc::clone(&reports);
                let chats = Arc::clone(&chats);
                tokio::spawn(async move {
                    debug!(worker, "Worker started");
                    loop {
                        let next = tokio::select! {
                            _ = cancel.cancelled() => break,
                            job = async { receiver.lock().await.recv().await } => job,
                        };
                        match next {
                            Some(Job::Report { report_id }) => reports.run(report_id).await,
                            Some(Job::Chat(job)) => chats.run(&job).await,
                            None => break,
                        }
                    }
                    debug!(worker, "Worker stopped");
                })
            })
            .collect();

        info!("Started {} pipeline workers", concurrency.max(1));
        Self { cancel, handles }
    }

    /// Stop taking jobs and wait for in-flight ones to finish
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            let _ = handle.await;
        }
        info!("Pipeline workers stopped");
    }
}

/// Counts from one `requeue_unfinished` pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RequeueStats {
    pub reports: usize,
    pub replies: usize,
    /// Replies whose question was lost; marked FAILED instead
    pub abandoned: usize,
}

impl std::fmt::Display for RequeueStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "reports: {}, replies: {}, abandoned: {}",
            self.reports, self.replies, self.abandoned
        )
    }
}

/// Put PENDING and PROCESSING work left by a previous process back on the queue.
/// Call after the workers are running so a full channel drains.
pub async fn requeue_unfinished(
    store: &dyn StateStore,
    queue: &JobQueue,
) -> AppResult<RequeueStats> {
    let mut stats = RequeueStats::default();

    for report_id in store.unfinished_reports().await? {
        queue.enqueue(Job::Report { report_id }).await?;
        stats.reports += 1;
    }

    for reply in store.unfinished_replies().await? {
        match reply.user_query {
            Some(user_query) => {
                queue
                    .enqueue(Job::Chat(ChatJob {
                        ai_message_id: reply.ai_message_id,
                        report_id: reply.report_id,
                        user_query,
                    }))
                    .await?;
                stats.replies += 1;
            }
            None => {
                warn!(message_id = %reply.ai_message_id, "AI reply has no question, failing it");
                store
                    .update_message(reply.ai_message_id, MessageUpdate::failed(AGENT_FAILED))
                    .await?;
                stats.abandoned += 1;
            }
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_enqueue_fails_once_receiver_is_gone() {
        let (queue, receiver) = JobQueue::channel(1);
        drop(receiver);
        let err = queue
            .enqueue(Job::Report {
                report_id: Uuid::new_v4(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
    }

    #[test]
    fn test_requeue_stats_display() {
        let stats = RequeueStats {
            reports: 2,
            replies: 1,
            abandoned: 0,
        };
        assert_eq!(stats.to_string(), "reports: 2, replies: 1, abandoned: 0");
    }
}
