//! Media Cache Daemon
//!
//! Runs the multi-layer cache for the image-delivery service: builds the
//! memory, remote and file layers behind the coordinator, warms the memory
//! layer on start and on a cron schedule, and serves health and Prometheus
//! metrics endpoints.
//!
//! ```text
//!   /healthz  per-layer liveness (503 when the memory layer is down)
//!   /stats    per-layer + aggregate stats, warmup stats
//!   /metrics  Prometheus text exposition
//! ```

use clap::Parser;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use media_cache::cache::{CacheLayerRef, FileLayer, MemoryLayer, RemoteLayer};
use media_cache::{
    AppConfig, CacheWarmingService, Error, MetricsSinkRef, MultiLayerCache,
    PrometheusCacheMetrics, Result, WarmupScheduler,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Media Cache - multi-layer cache daemon for image delivery
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(long, env = "MEDIA_CACHE_CONFIG", default_value = "config/media-cache.yaml")]
    config: PathBuf,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Disable the remote (Redis) layer regardless of configuration
    #[arg(long, env = "NO_REMOTE")]
    no_remote: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

/// Components shared with the HTTP handlers
#[derive(Clone)]
struct AppState {
    cache: Arc<MultiLayerCache>,
    warming: Arc<CacheWarmingService>,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    info!("Starting Media Cache");
    info!("  Version: {}", media_cache::VERSION);
    info!("  Config: {}", args.config.display());
    info!("  Health: {}", args.health_addr);
    info!("  Metrics: {}", args.metrics_addr);

    let mut config = AppConfig::load(&args.config)?;
    if args.no_remote {
        config.cache.redis = None;
    }
    let cache_config = config.cache;

    let prometheus = Arc::new(PrometheusCacheMetrics::new()?);
    let metrics: MetricsSinkRef = prometheus.clone();

    // Build layers
    let mut layers: Vec<CacheLayerRef> = Vec::with_capacity(3);
    layers.push(Arc::new(MemoryLayer::new(
        cache_config.memory.clone(),
        metrics.clone(),
    )));
    match cache_config.redis.clone() {
        Some(redis) => layers.push(Arc::new(RemoteLayer::connect(redis, metrics.clone())?)),
        None => info!("Remote cache layer not configured"),
    }
    layers.push(Arc::new(
        FileLayer::new(cache_config.file.clone(), metrics.clone()).await?,
    ));

    let cache = Arc::new(MultiLayerCache::new(layers, cache_config.promotion.clone()));
    let warming = Arc::new(CacheWarmingService::new(
        cache_config.warming.clone(),
        cache.primary_layer()?,
        metrics.clone(),
    ));

    let shutdown = CancellationToken::new();

    // Warm on start without delaying the endpoints
    {
        let warming = warming.clone();
        tokio::spawn(async move {
            if let Err(e) = warming.warm_on_start().await {
                warn!(error = %e, "Startup warmup failed");
            }
        });
    }

    let scheduler = if cache_config.warming.enabled {
        Some(WarmupScheduler::new(warming.clone(), shutdown.clone())?.spawn())
    } else {
        info!("Cache warming disabled; scheduler not started");
        None
    };

    let state = AppState {
        cache: cache.clone(),
        warming: warming.clone(),
    };

    // Start health server
    let health_addr = parse_addr(&args.health_addr, "health")?;
    let health = tokio::spawn(run_health_server(health_addr, state, shutdown.clone()));

    // Start metrics server
    let metrics_addr = parse_addr(&args.metrics_addr, "metrics")?;
    let metrics_server = tokio::spawn(run_metrics_server(
        metrics_addr,
        prometheus.clone(),
        shutdown.clone(),
    ));

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| Error::Internal(format!("failed to listen for shutdown signal: {}", e)))?;
    info!("Shutdown signal received");
    shutdown.cancel();

    for (name, handle) in [("health", health), ("metrics", metrics_server)] {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(server = name, error = %e, "Server error"),
            Err(e) => error!(server = name, error = %e, "Server task failed"),
        }
    }
    if let Some(scheduler) = scheduler {
        let _ = scheduler.await;
    }

    info!("Media cache shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "redis=info", "deadpool=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

fn parse_addr(addr: &str, server: &str) -> Result<SocketAddr> {
    addr.parse()
        .map_err(|e| Error::Configuration(format!("Invalid {} server address: {}", server, e)))
}

// =============================================================================
// Health Server
// =============================================================================

fn json_response<T: serde::Serialize>(
    status: hyper::StatusCode,
    body: &T,
) -> hyper::Response<hyper::Body> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};

    let (status, payload) = match serde_json::to_vec(body) {
        Ok(payload) => (status, payload),
        Err(e) => (
            hyper::StatusCode::INTERNAL_SERVER_ERROR,
            format!("{{\"error\":\"{}\"}}", e).into_bytes(),
        ),
    };
    let mut response = hyper::Response::new(hyper::Body::from(payload));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

async fn handle_health(
    req: hyper::Request<hyper::Body>,
    state: AppState,
) -> std::result::Result<hyper::Response<hyper::Body>, Infallible> {
    use hyper::StatusCode;

    let response = match req.uri().path() {
        "/healthz" | "/livez" | "/readyz" => {
            let layers = state.cache.health_check().await;
            let status = if state.cache.is_healthy().await {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            json_response(status, &serde_json::json!({ "layers": layers }))
        }
        "/stats" => {
            let cache = state.cache.stats().await;
            let warmup = state.warming.get_warmup_stats().await;
            json_response(
                StatusCode::OK,
                &serde_json::json!({ "cache": cache, "warmup": warmup }),
            )
        }
        _ => json_response(StatusCode::NOT_FOUND, &serde_json::json!({ "error": "not found" })),
    };
    Ok(response)
}

async fn run_health_server(
    addr: SocketAddr,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::Server;

    let make_svc = make_service_fn(move |_conn| {
        let state = state.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| handle_health(req, state.clone())))
        }
    });

    info!("Health server listening on {}", addr);
    Server::try_bind(&addr)
        .map_err(|e| Error::Internal(format!("Health server bind error: {}", e)))?
        .serve(make_svc)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(
    addr: SocketAddr,
    metrics: Arc<PrometheusCacheMetrics>,
    shutdown: CancellationToken,
) -> Result<()> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    let make_svc = make_service_fn(move |_conn| {
        let metrics = metrics.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let metrics = metrics.clone();
                async move {
                    let mut response = Response::new(Body::empty());
                    match req.uri().path() {
                        "/metrics" => {
                            let encoder = TextEncoder::new();
                            let mut buffer = Vec::new();
                            match encoder.encode(&metrics.registry().gather(), &mut buffer) {
                                Ok(()) => {
                                    *response.body_mut() = Body::from(buffer);
                                    response.headers_mut().insert(
                                        CONTENT_TYPE,
                                        HeaderValue::from_static(prometheus::TEXT_FORMAT),
                                    );
                                }
                                Err(e) => {
                                    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                                    *response.body_mut() = Body::from(e.to_string());
                                }
                            }
                        }
                        _ => {
                            *response.status_mut() = StatusCode::NOT_FOUND;
                            *response.body_mut() = Body::from("not found");
                        }
                    }
                    Ok::<_, Infallible>(response)
                }
            }))
        }
    });

    info!("Metrics server listening on {}", addr);
    Server::try_bind(&addr)
        .map_err(|e| Error::Internal(format!("Metrics server bind error: {}", e)))?
        .serve(make_svc)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
