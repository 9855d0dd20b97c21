use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use neural_review::analysis::{CachedScorer, HeuristicScorer, InMemoryKnowledgeStore};
use neural_review::config::Config;
use neural_review::dedupe::DedupeWindow;
use neural_review::github::{AppTokenSource, OctocrabHost, TokenCache};
use neural_review::orchestrator::{JobQueue, Orchestrator, ResultStore};
use neural_review::server::{AppState, build_router};
use neural_review::webhooks::SignatureVerifier;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "neural_review=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("loading configuration")?;
    tracing::debug!(?config, "configuration loaded");

    let pem = config.private_key.pem()?;
    let tokens = AppTokenSource::new(config.app_id, &pem, &config.api_base)
        .context("creating GitHub App client")?;
    let identity = tokens
        .identity()
        .await
        .context("resolving GitHub App identity")?;
    tracing::info!(app_id = identity.app_id, login = %identity.bot_login(), "running as GitHub App");
    let host = Arc::new(OctocrabHost::new(TokenCache::new(tokens), config.api_base.clone()));

    let scorer = Arc::new(CachedScorer::new(
        HeuristicScorer::new().context("compiling heuristic rules")?,
    ));
    let knowledge = Arc::new(InMemoryKnowledgeStore::default());
    let deliveries = Arc::new(DedupeWindow::new(
        config.dedupe_retention(),
        config.dedupe_capacity,
    ));
    let results = Arc::new(ResultStore::default());
    let shutdown = CancellationToken::new();

    let orchestrator = Arc::new(Orchestrator::new(
        host,
        identity,
        scorer.clone(),
        knowledge,
        deliveries.clone(),
        results.clone(),
        shutdown.clone(),
        config.orchestrator(),
    ));
    let monitor = orchestrator.monitor().clone();
    let (queue, jobs) = JobQueue::bounded(config.queue_capacity);
    let workers = tokio::spawn(orchestrator.run(jobs));

    let app = build_router(AppState::new(
        SignatureVerifier::new(config.webhook_secret.as_bytes()),
        deliveries,
        queue,
        results,
        monitor,
        Some(scorer),
    ));

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    tracing::info!("listening on {}", config.listen_addr);

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "could not listen for shutdown signal");
            }
            tracing::info!("shutting down");
            signal.cancel();
        })
        .await
        .context("serving HTTP")?;

    shutdown.cancel();
    workers.await.context("joining workers")?;
    Ok(())
}
