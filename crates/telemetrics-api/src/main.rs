// Telemetrics API server
// Decision: rate limiting is the outermost guard — over-limit requests are
// rejected before body parsing, authentication, or storage work

mod config;
mod error;
mod events;
mod rate_limit;

use anyhow::{Context, Result};
use axum::{routing::get, Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use telemetrics_storage::Database;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use config::Settings;
use rate_limit::RateLimiter;

const API_VERSION: &str = "v1.0.0";

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    api_version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        api_version: API_VERSION,
    })
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(events::log_event, events::log_events),
    components(schemas(events::EventCreate, error::HttpError)),
    tags(
        (name = "events", description = "Telemetry event ingestion endpoints")
    ),
    info(
        title = "Telemetrics Event API",
        version = "1.0.0",
        description = "Minimal telemetry ingestion: submit application usage events, singly or in batches",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
struct ApiDoc;

/// Build the full application router (extracted for testing)
fn app(settings: Arc<Settings>, db: Arc<Database>) -> Router {
    let limiter = Arc::new(RateLimiter::new(settings.rate_limit.clone()));
    let state = events::AppState { settings, db };

    Router::new()
        .merge(events::routes(state, limiter))
        .route("/health", get(health))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "telemetrics_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("telemetrics-api starting...");

    dotenvy::dotenv().ok();
    let settings = Settings::from_env().context("Failed to load settings")?;
    tracing::info!(
        rate_limit = %settings.rate_limit,
        api_keys = settings.api_keys.len(),
        "Settings loaded"
    );

    // Initialize database before accepting traffic; an unreachable store is fatal
    let db = Database::connect(&settings.sqlite_file_path)
        .await
        .context("Failed to connect to database")?;
    db.initialize().await.context("Failed to create tables")?;
    tracing::info!(path = %settings.sqlite_file_path, "Connected to database");

    let addr: SocketAddr = settings
        .bind_addr
        .parse()
        .context("Invalid BIND_ADDR")?;
    let app = app(Arc::new(settings), Arc::new(db));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    tracing::info!("Listening on {}", addr);

    // ConnectInfo carries the remote address the rate limiter keys on
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Server error")?;

    Ok(())
}
