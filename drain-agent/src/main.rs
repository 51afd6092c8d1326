//! Coordinate graceful drains of load-balanced proxies and answer HAProxy agent-checks.
use std::sync::Arc;

use axum::Router;
use envconfig::Envconfig;
use eyre::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use drain_agent::config::Config;
use drain_agent::handlers::{add_routes, AppState};
use drain_agent::shutdown::graceful_shutdown;
use proxy_drain::agent_check;
use proxy_drain::interceptor::LifecycleInterceptor;
use proxy_drain::metrics::setup_metrics_routes;
use proxy_drain::orchestrator::HttpOrchestrator;
use proxy_drain::registry::ProxyRegistry;
use proxy_drain::watcher::CapacityWatcher;

async fn listen(app: Router, bind: String, cancel: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(address = bind.as_str(), "serving drain agent API");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::init_from_env()?;

    let registry = ProxyRegistry::new(config.default_max_players);
    let orchestrator = HttpOrchestrator::new(
        &config.orchestrator_url,
        config.request_timeout.0,
        config.retry_policy.provide(),
    )?;

    let state = AppState {
        registry: registry.clone(),
        interceptor: LifecycleInterceptor::new(registry.clone(), config.proxy_group.as_str()),
        watcher: CapacityWatcher::new(registry.clone(), Arc::new(orchestrator)),
    };

    let cancel = CancellationToken::new();
    let agent_check = agent_check::spawn(
        config.agent_check_bind(),
        registry,
        config.agent_check_timeout.0,
        cancel.child_token(),
    );

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        graceful_shutdown().await;
        shutdown.cancel();
    });

    let app = add_routes(Router::new(), state);
    let app = if config.export_prometheus {
        setup_metrics_routes(app)?
    } else {
        app
    };

    let served = listen(app, config.bind(), cancel.clone()).await;
    if let Err(e) = &served {
        error!("failed to serve drain agent API, {}", e);
    }

    cancel.cancel();
    agent_check.await?;
    info!("drain agent stopped");

    served
}
