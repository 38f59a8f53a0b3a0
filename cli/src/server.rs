// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP server wiring for `concord serve`

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use concord_core::{
    application::{analysis::StandardAnalysisService, orchestrator::Orchestrator},
    domain::config::{OrchestratorConfigManifest, OrchestratorConfigSpec},
    domain::rate_limiter::RateLimiter,
    infrastructure::llm::ProviderRegistry,
    presentation::api::{app, AppState},
};

use crate::commands::analyze::configured_requests;

/// Overrides for the configured listen address
#[derive(Debug, Clone, Default)]
pub struct ListenOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
}

pub async fn start_server(config_path: Option<PathBuf>, overrides: ListenOverrides) -> Result<()> {
    let config = OrchestratorConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    info!("Configuration loaded: name={}", config.metadata.name);
    let spec = &config.spec;

    if spec.observability.metrics.enabled {
        install_metrics_exporter(spec)?;
    }

    let shutdown = CancellationToken::new();
    let state = build_state(spec, &shutdown);

    let host = overrides
        .host
        .unwrap_or_else(|| spec.network.bind_address.clone());
    let port = overrides.port.unwrap_or(spec.network.port);
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Concord API listening on {}", addr);

    let served = axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    // stop background sweepers whatever the exit path
    shutdown.cancel();

    if let Err(e) = &served {
        error!("HTTP server failed: {}", e);
    }
    served.context("HTTP server failed")?;

    info!("Concord API shut down");
    Ok(())
}

/// Assemble the shared state and start the rate-limit sweepers
pub fn build_state(spec: &OrchestratorConfigSpec, shutdown: &CancellationToken) -> AppState {
    let registry = Arc::new(ProviderRegistry::from_config(spec));
    let orchestrator = Arc::new(Orchestrator::from_config(spec, registry));
    let breakers = Arc::clone(orchestrator.breakers());

    let limiter = Arc::new(RateLimiter::new(spec.rate_limit.primary));
    let strict_limiter = Arc::new(RateLimiter::new(spec.rate_limit.strict));

    let sweep = Duration::from_secs(spec.rate_limit.idle_sweep_interval_secs);
    for l in [orchestrator.limiter(), &limiter, &strict_limiter] {
        Arc::clone(l).spawn_sweeper(sweep, shutdown.clone());
    }

    let default_providers = configured_requests(spec);
    let keyed = default_providers
        .iter()
        .filter(|r| !r.provider.requires_api_key() || r.api_key().is_some())
        .count();
    if keyed == 0 {
        warn!("No configured provider has an API key; callers must supply their own");
    } else {
        info!(
            "{} of {} enabled providers have server-side credentials",
            keyed,
            default_providers.len()
        );
    }

    AppState {
        analysis: Arc::new(StandardAnalysisService::new(orchestrator)),
        breakers,
        limiter,
        strict_limiter,
        default_providers,
        default_timeout: spec.per_call_timeout(),
        start_time: Instant::now(),
    }
}

fn install_metrics_exporter(spec: &OrchestratorConfigSpec) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", spec.network.bind_address, spec.observability.metrics.port)
        .parse()
        .context("Invalid metrics listen address")?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!("Prometheus metrics exposed on {}", addr);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
