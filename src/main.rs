//! reviewd worker - main entry point.
//!
//! Connects to Redis, wires the queue, resilience layer, and review
//! service together, then processes jobs until a shutdown signal arrives.

use std::sync::Arc;

use reviewd::config::Config;
use reviewd::jobs::{JobQueue, Worker};
use reviewd::resilience::RateLimiter;
use reviewd::review::{
    GithubClient, HttpCompletionModel, ReviewConfig, ReviewParams, ReviewService,
};
use reviewd::store::{KvStore, RedisStore};
use reviewd::{cache::Cache, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: Could not load config: {}. Using defaults.", e);
        Config::default()
    });

    telemetry::init(
        &config.observability.log_level,
        config.observability.json_logging,
    );

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting reviewd worker"
    );

    // Connect to the store
    let store: Arc<dyn KvStore> = Arc::new(RedisStore::connect(&config.redis.url).await?);

    // Wire the pipeline
    let queue = Arc::new(JobQueue::<ReviewParams>::new(
        store.clone(),
        config.queue.to_queue_config(),
    ));
    let cache = Cache::new(store.clone());
    let limiter = RateLimiter::new(store.clone(), config.rate_limiter.to_limiter_config());

    let github = Arc::new(GithubClient::new(config.github.to_github_config())?);
    let model = Arc::new(HttpCompletionModel::new(config.model.to_model_config())?);

    let review = Arc::new(ReviewService::new(
        github,
        model,
        cache,
        limiter,
        ReviewConfig {
            prompt: None,
            github_breaker: config.github_breaker.to_breaker_config(),
            model_breaker: config.model_breaker.to_breaker_config(),
        },
    ));

    let worker_config = config
        .worker
        .to_worker_config(config.retry.to_retry_policy());
    let handle = Worker::new(queue, review, worker_config).start();

    shutdown_signal().await;

    handle.shutdown().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
