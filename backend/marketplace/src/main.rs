//! Marketplace backend: entry point.
//!
//! Owners post funded projects, contributors submit work against them, and a
//! submission is merged and paid exactly once, either when the owner approves
//! it or when the code host reports its pull request as merged. Every
//! mutating request may carry a typed-data wallet signature that proves who
//! sent it.

mod api;
mod approval;
mod auth;
mod award;
mod config;
mod db;
mod engine;
mod errors;
mod models;
mod projects;
mod signature;
mod submissions;
mod webhook;

#[cfg(test)]
mod test_approval;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use auth::ProofVerifier;
use award::{AwardDispatcher, HttpAwardDispatcher, LogAwardDispatcher};
use config::Config;
use engine::Engine;
use webhook::WebhookIngestion;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    // Set up the SQLite connection pool and run migrations.
    let pool = db::init_pool(&config.database_url).await?;

    let dispatcher: Arc<dyn AwardDispatcher> = match &config.award_url {
        Some(url) => {
            info!("Awards dispatched to {url}");
            Arc::new(HttpAwardDispatcher::new(
                url.clone(),
                Duration::from_secs(config.award_timeout_secs),
            )?)
        }
        None => {
            info!("AWARD_DISPATCHER_URL not set; awards are only logged");
            Arc::new(LogAwardDispatcher::default())
        }
    };

    let engine = Arc::new(Engine::new(
        pool,
        ProofVerifier::new(config.domain.clone()),
        config.proof_policy,
        dispatcher,
    ));
    let webhook = Arc::new(WebhookIngestion::new(config.webhook.clone(), engine.clone()));
    info!(
        "Webhook auto-award {}",
        if webhook.is_enabled() { "enabled" } else { "disabled" }
    );

    let app = api::router(Arc::new(api::ApiState { engine, webhook }));

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
