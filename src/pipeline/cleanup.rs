//! Periodic removal of expired refresh tokens

use crate::store::{StateStore, StoreResult};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(6 * 3600);

pub struct TokenCleanup {
    store: Arc<dyn StateStore>,
    interval: Duration,
}

impl TokenCleanup {
    pub fn new(store: Arc<dyn StateStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// One sweep. Safe to repeat.
    pub async fn run_once(&self) -> StoreResult<u64> {
        let removed = self.store.delete_expired_refresh_tokens(Utc::now()).await?;
        info!("Token cleanup removed {} expired refresh tokens", removed);
        Ok(removed)
    }

    /// Sweep now and then on every interval until stopped
    pub fn start(self) -> CleanupHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_once().await {
                            error!("Token cleanup failed: {}", e);
                        }
                    }
                }
            }
        });

        CleanupHandle { cancel, handle }
    }
}

pub struct CleanupHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl CleanupHandle {
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
        info!("Token cleanup stopped");
    }
}
