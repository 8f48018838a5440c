use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod access;
mod aggregate;
mod api;
mod cache;
mod cli;
mod config;
mod errors;
mod jobs;
mod models;
mod refresh;
mod store;

use access::AccessFilter;
use aggregate::AggregateBuilder;
use cache::TrendCache;
use models::trend::{Metric, Timeframe, TrendKey};
use refresh::{RefreshConfig, RefreshCoordinator};
use store::postgres::PgStore;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub db: PgStore,
    pub access: AccessFilter,
    pub coordinator: RefreshCoordinator<PgStore, AggregateBuilder>,
    pub config: config::Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Export traces over OTLP when an endpoint is configured; plain stdout
    // logging otherwise.
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "trendline"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .expect("failed to install OpenTelemetry tracer");
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "trendline=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => run_server(cfg, port).await,
        Some(cli::Commands::Sweep) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            let cache = TrendCache::new(db);
            let removed = cache.delete_expired(chrono::Utc::now()).await?;
            println!("Removed {} expired trend entries.", removed);
            Ok(())
        }
        Some(cli::Commands::Invalidate {
            workspace_id,
            metric,
            timeframe,
        }) => {
            // Removes the durable row only; a running server's local mirror
            // serves the entry until its TTL passes. The admin endpoint
            // clears both tiers.
            let metric: Metric = metric.parse()?;
            let timeframe: Timeframe = timeframe.parse()?;
            let db = PgStore::connect(&cfg.database_url).await?;
            let cache = TrendCache::new(db);
            let key = TrendKey::new(workspace_id, metric, timeframe);
            if cache.invalidate(&key).await? {
                println!("Invalidated trend {}.", key);
            } else {
                println!("No cached trend for {}.", key);
            }
            Ok(())
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn run_server(cfg: config::Config, port: u16) -> anyhow::Result<()> {
    tracing::info!("Connecting to database...");
    let db = PgStore::connect(&cfg.database_url).await?;

    tracing::info!("Running migrations...");
    db.migrate().await?;

    let cache = TrendCache::new(db.clone());
    let builder = Arc::new(AggregateBuilder::new(db.clone()));
    let coordinator = RefreshCoordinator::new(
        cache.clone(),
        builder,
        RefreshConfig {
            wait_timeout: Duration::from_millis(cfg.refresh_wait_ms),
            retries: cfg.refresh_retries,
            retry_backoff: Duration::from_millis(cfg.refresh_backoff_ms),
            ttls: cfg.ttls(),
        },
    );

    let sweep_interval = cfg.sweep_interval_secs;
    let state = Arc::new(AppState {
        db,
        access: AccessFilter,
        coordinator,
        config: cfg,
    });

    let app = axum::Router::new()
        // Health endpoints (no auth)
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readiness_check))
        // Read + maintenance API — nested under /api/v1
        .nest("/api/v1", api::api_router(state.clone()))
        .with_state(state.clone())
        // Request bodies are tiny JSON documents.
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        // Restrict CORS origins (reads DASHBOARD_ORIGIN env var, defaults to localhost for dev)
        .layer({
            use axum::http::{HeaderName, Method};
            use tower_http::cors::AllowOrigin;
            let dashboard_origin = std::env::var("DASHBOARD_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string());
            CorsLayer::new()
                .allow_origin(AllowOrigin::predicate(move |origin, _| {
                    let origin_str = origin.to_str().unwrap_or("");
                    origin_str == dashboard_origin
                        || origin_str.starts_with("http://localhost:")
                        || origin_str.starts_with("http://127.0.0.1:")
                }))
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([
                    HeaderName::from_static("content-type"),
                    HeaderName::from_static("x-admin-key"),
                    HeaderName::from_static("x-caller-id"),
                    HeaderName::from_static("x-request-id"),
                ])
                .allow_credentials(true)
        })
        .layer(axum::middleware::from_fn(request_id_middleware));

    // Periodic expiry sweep, independent of request traffic.
    jobs::sweep::spawn(state.coordinator.cache().clone(), sweep_interval);
    tracing::info!(
        interval_secs = sweep_interval,
        "Background expiry sweep started"
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Trendline listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Middleware: injects a unique X-Request-Id into every response.
/// This allows clients to correlate errors with server logs.
async fn request_id_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = axum::http::HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

/// Readiness: the service is ready when the database answers.
async fn readiness_check(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
) -> Result<&'static str, axum::http::StatusCode> {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(state.db.pool())
        .await
        .map_err(|e| {
            tracing::error!("readiness check failed: {}", e);
            axum::http::StatusCode::SERVICE_UNAVAILABLE
        })?;
    Ok("ok")
}
