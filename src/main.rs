use anyhow::{Context, Result};
use realtor_insights::api::tokens::TokenSigner;
use realtor_insights::api::{self, AppState};
use realtor_insights::config::Config;
use realtor_insights::pipeline::{
    requeue_unfinished, ChatPipeline, JobQueue, ReportPipeline, TokenCleanup, WorkerPool,
    QUEUE_CAPACITY,
};
use realtor_insights::providers::rate_limit::{
    ANALYSIS_REQUESTS_PER_MINUTE, SEARCH_REQUESTS_PER_MINUTE,
};
use realtor_insights::providers::{
    ChatCompletionsClient, HttpWebSearch, LlmAdapter, RateLimiter, RetryPolicy, WebSearch,
};
use realtor_insights::store::{PgStore, StateStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("🏠 Starting realtor insights API server...");

    let config = Config::from_env().context("Failed to load configuration")?;

    info!("📦 Connecting to database...");
    let pg = PgStore::connect(&config.database_url, 5)
        .await
        .context("Failed to connect to database")?;
    pg.migrate().await.context("Failed to run migrations")?;
    info!("✅ Database connected successfully");
    let store: Arc<dyn StateStore> = Arc::new(pg);

    // Process-wide limiters shared by every adapter call
    let search_limiter = Arc::new(RateLimiter::per_minute("search", SEARCH_REQUESTS_PER_MINUTE));
    let analysis_limiter = Arc::new(RateLimiter::per_minute(
        "analysis",
        ANALYSIS_REQUESTS_PER_MINUTE,
    ));

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(120))
        .build()
        .context("Failed to build HTTP client")?;

    let search: Arc<dyn WebSearch> = Arc::new(HttpWebSearch::new(
        http.clone(),
        config.search_api_key.clone(),
        config.search_api_url.clone(),
        Arc::clone(&search_limiter),
    ));
    let llm: Arc<dyn LlmAdapter> = Arc::new(ChatCompletionsClient::new(
        http,
        config.llm_api_key.clone(),
        config.llm_api_url.clone(),
        config.llm_model.clone(),
        search_limiter,
        analysis_limiter,
    ));
    let retry = RetryPolicy::default().with_rate_limit_delay(config.provider_retry_delay);

    let reports = Arc::new(ReportPipeline::new(
        Arc::clone(&store),
        search,
        Arc::clone(&llm),
        retry,
    ));
    let chats = Arc::new(ChatPipeline::new(Arc::clone(&store), llm, retry));

    let (queue, receiver) = JobQueue::channel(QUEUE_CAPACITY);
    let workers = WorkerPool::start(receiver, config.worker_concurrency, reports, chats);

    let requeued = requeue_unfinished(store.as_ref(), &queue)
        .await
        .context("Failed to requeue unfinished work")?;
    info!("✓ Requeued unfinished work ({})", requeued);
    let cleanup = TokenCleanup::new(Arc::clone(&store), config.cleanup_interval).start();

    let tokens = TokenSigner::new(
        config.token_signing_key.as_bytes(),
        config.user_id_claim.clone(),
        config.access_token_ttl,
        config.refresh_token_ttl,
    )
    .context("Invalid token signing key")?;

    let app = api::router(AppState {
        store,
        queue,
        tokens: Arc::new(tokens),
    });

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("🚀 Server running on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutting down background workers...");
    workers.shutdown().await;
    cleanup.stop().await;
    info!("✓ Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
