//! Scatter-Gather Router
//!
//! Reads one message from stdin, forks it to every configured HTTP route and
//! prints the aggregate as JSON on stdout.
//!
//! ## Configuration
//!
//! - Config file path: first argument, else `SG_CONFIG_PATH`, else `scatter-gather.toml`
//! - `SG_*` environment variables override file values (a `.env` file is honoured)
//! - `SG_MESSAGE_ID` sets the id of the inbound message
//!
//! Ctrl+C cancels an invocation that is still in flight.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use sg_common::{Message, Payload};
use sg_config::{AppConfig, LoggingConfig, RouteConfig};
use sg_router::{from_kind, HttpRoute, HttpRouteConfig, Route, ScatterGatherRouter};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "scatter-gather.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Environment and configuration
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Failed to load .env file: {}", e);
        }
    }

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("SG_CONFIG_PATH").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = AppConfig::load(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path))?;

    // 2. Logging
    init_logging(&config.logging);
    info!(path = %config_path, "Starting Scatter-Gather Router");

    // 3. Metrics exporter
    if config.metrics.enabled {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], config.metrics.port))
            .install()
            .context("installing Prometheus exporter")?;
        sg_router::metrics::describe_metrics();
        info!(port = config.metrics.port, "Prometheus metrics exporter listening");
    }

    // 4. Router
    let router = build_router(&config)?;
    log_startup_summary(&router, &config);

    // 5. Inbound message
    let message = read_message()?;
    info!(message_id = %message.id, "Routing inbound message");

    let cancel = CancellationToken::new();
    let signal_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling invocation");
                cancel.cancel();
            }
        })
    };

    let result = router.route_with_cancellation(&message, &cancel).await;
    signal_task.abort();

    match result {
        Ok(aggregate) => {
            println!("{}", serde_json::to_string_pretty(&aggregate)?);
            Ok(())
        }
        Err(e) => {
            error!(error = %e, retryable = e.is_retryable(), "Scatter-gather failed");
            Err(e.into())
        }
    }
}

fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    // Logs go to stderr; stdout carries the aggregate
    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn build_router(config: &AppConfig) -> Result<ScatterGatherRouter> {
    let routes = config
        .routes
        .iter()
        .map(http_route)
        .collect::<Result<Vec<_>>>()?;

    let section = &config.router;
    let mut builder = ScatterGatherRouter::builder(section.name.clone())
        .routes(routes)
        .strategy(from_kind(section.strategy, section.failure_policy));

    if let Some(max_concurrency) = section.max_concurrency {
        builder = builder.max_concurrency(max_concurrency);
    }
    if let Some(timeout_ms) = section.timeout_ms {
        builder = builder.timeout(Duration::from_millis(timeout_ms));
    }
    if let Some(target) = &section.target {
        builder = builder.target(target.clone());
    }

    Ok(builder.build()?)
}

fn http_route(route: &RouteConfig) -> Result<Arc<dyn Route>> {
    let mut config = HttpRouteConfig::new(route.name.clone(), route.url.clone())
        .with_request_timeout(Duration::from_millis(route.timeout_ms));
    config.connect_timeout = Duration::from_millis(route.connect_timeout_ms);
    config.auth_token = route.auth_token.clone();

    let http = HttpRoute::new(config).with_context(|| format!("building route {}", route.name))?;
    Ok(Arc::new(http))
}

/// Stdin is parsed as JSON when possible, otherwise taken as text
fn read_message() -> Result<Message> {
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("reading message from stdin")?;

    let payload = if input.trim().is_empty() {
        Payload::Empty
    } else {
        match serde_json::from_str::<serde_json::Value>(&input) {
            Ok(value) => Payload::Json(value),
            Err(_) => Payload::Text(input),
        }
    };

    let mut message = Message::new(payload);
    if let Ok(id) = std::env::var("SG_MESSAGE_ID") {
        message = message.with_id(id);
    }
    Ok(message)
}

fn log_startup_summary(router: &ScatterGatherRouter, config: &AppConfig) {
    info!("=== Scatter-Gather Router Startup Summary ===");
    info!("  Router: {}", router.name());
    info!("  Routes: {}", router.route_names().join(", "));
    info!("  Strategy: {}", router.strategy().name());
    info!("  Max concurrency: {}", router.max_concurrency());

    match router.timeout() {
        Some(timeout) => info!("  Timeout: {:?}", timeout),
        None => info!("  Timeout: none"),
    }

    if let Some(target) = &config.router.target {
        info!("  Target variable: {}", target);
    }

    if config.metrics.enabled {
        info!("  Metrics: Enabled (port {})", config.metrics.port);
    } else {
        info!("  Metrics: Disabled");
    }

    info!("=============================================");
}
