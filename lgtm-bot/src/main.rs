use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lgtm_bot::config::Config;
use lgtm_bot::webhook::webhook_router;
use lgtm_bot::{backfill, AppState, Forge, ForgeClient, Reconciler};

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting lgtm bot");

    let config = Config::from_env()?;
    info!("Loaded configuration: {:?}", config);

    let forge = Arc::new(ForgeClient::new(
        &config.forge_api_url,
        config.forge_token.clone(),
        config.dialect,
    )?);

    let login = forge
        .authenticated_user()
        .await
        .with_context(|| format!("Failed to authenticate against {}", config.forge_api_url))?;
    info!("Hello, {}", login);

    if config.repos.is_empty() {
        warn!("LGTM_REPOS is empty: every webhook delivery will be ignored");
    }

    let reconciler = Reconciler::new(forge);

    if config.backfill {
        let reconciler = reconciler.clone();
        let repos = config.repos.clone();
        tokio::spawn(async move {
            backfill(&reconciler, &repos).await;
        });
    } else {
        info!("Backfill disabled");
    }

    let app_state = Arc::new(AppState {
        reconciler,
        webhook_secret: config.webhook_secret.clone(),
        repos: config.repos.clone(),
    });

    let app = webhook_router(app_state.clone())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(app_state);

    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", config.host, config.port))?;
    info!("Listening on {}:{}", config.host, config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
