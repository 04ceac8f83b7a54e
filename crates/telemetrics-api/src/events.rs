// Event ingestion HTTP routes

use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use telemetrics_storage::{Database, NewEvent};
use utoipa::ToSchema;

use crate::config::Settings;
use crate::error::{ApiError, HttpError};
use crate::rate_limit::{rate_limit_guard, RateLimiter};

/// App state for event routes
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub db: Arc<Database>,
}

/// Create event routes. Both endpoints sit behind the same limiter
/// instance and share its quota.
pub fn routes(state: AppState, limiter: Arc<RateLimiter>) -> Router {
    Router::new()
        .route("/v1.0/event", post(log_event))
        .route("/v1.0/events", post(log_events))
        .layer(middleware::from_fn_with_state(limiter, rate_limit_guard))
        .with_state(state)
}

/// An inbound event submission. Carries the client's API key, which is
/// checked before anything touches storage and is never persisted.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct EventCreate {
    #[schema(example = "app_started")]
    pub event_type: String,
    pub application: String,
    pub version: String,
    pub platform: String,
    pub user_id: String,
    pub session_id: String,
    /// Arbitrary structured payload, stored verbatim.
    #[serde(default = "empty_object")]
    #[schema(value_type = Object)]
    pub value: serde_json::Value,
    pub api_key: String,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl EventCreate {
    /// Fallible step from wire DTO to storable event: checks the API key
    /// against the configured set, then drops it and stamps the insertion
    /// time.
    fn validate(self, settings: &Settings) -> Result<NewEvent, ApiError> {
        if !settings.is_valid_key(&self.api_key) {
            return Err(ApiError::InvalidApiKey);
        }

        Ok(NewEvent {
            event_type: self.event_type,
            application: self.application,
            version: self.version,
            platform: self.platform,
            user_id: self.user_id,
            session_id: self.session_id,
            value: self.value,
            time: Utc::now(),
        })
    }
}

/// POST /v1.0/event - Persist a single telemetry event
#[utoipa::path(
    post,
    path = "/v1.0/event",
    request_body = EventCreate,
    responses(
        (status = 204, description = "Event persisted"),
        (status = 401, description = "Invalid or missing API key", body = HttpError),
        (status = 422, description = "Malformed payload"),
        (status = 429, description = "Rate limit exceeded", body = HttpError),
        (status = 500, description = "Internal server error", body = HttpError)
    ),
    tag = "events"
)]
pub async fn log_event(
    State(state): State<AppState>,
    Json(event): Json<EventCreate>,
) -> Result<StatusCode, ApiError> {
    let event = event.validate(&state.settings)?;
    state.db.insert_event(event).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1.0/events - Persist a batch of telemetry events atomically
#[utoipa::path(
    post,
    path = "/v1.0/events",
    request_body = Vec<EventCreate>,
    responses(
        (status = 204, description = "All events persisted"),
        (status = 401, description = "Invalid or missing API key", body = HttpError),
        (status = 422, description = "Malformed payload"),
        (status = 429, description = "Rate limit exceeded", body = HttpError),
        (status = 500, description = "Internal server error", body = HttpError)
    ),
    tag = "events"
)]
pub async fn log_events(
    State(state): State<AppState>,
    Json(events): Json<Vec<EventCreate>>,
) -> Result<StatusCode, ApiError> {
    // Validate every element before writing anything: one bad key fails
    // the whole batch with zero rows written.
    let events = events
        .into_iter()
        .map(|event| event.validate(&state.settings))
        .collect::<Result<Vec<_>, _>>()?;
    state.db.insert_events(events).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::connect_info::ConnectInfo;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::json;
    use std::net::SocketAddr;
    use tower::ServiceExt;

    const TEST_KEY: &str = "test-key";

    fn test_settings() -> Settings {
        Settings {
            sqlite_file_path: ":memory:".to_string(),
            api_keys: vec![TEST_KEY.to_string()],
            rate_limit: "60/minute".parse().unwrap(),
            bind_addr: "127.0.0.1:0".to_string(),
        }
    }

    async fn test_app(rate_limit: &str) -> (Router, Arc<Database>) {
        let db = Arc::new(Database::connect_in_memory().await.unwrap());
        db.initialize().await.unwrap();

        let limiter = Arc::new(RateLimiter::new(rate_limit.parse().unwrap()));
        let state = AppState {
            settings: Arc::new(test_settings()),
            db: db.clone(),
        };
        (routes(state, limiter), db)
    }

    fn event_payload(key: &str) -> serde_json::Value {
        json!({
            "event_type": "app_started",
            "application": "demo",
            "version": "1.0.0",
            "platform": "linux",
            "user_id": "user-1",
            "session_id": "session-1",
            "value": {"launch_ms": 120},
            "api_key": key,
        })
    }

    fn post_json_from(uri: &str, body: &serde_json::Value, peer: &str) -> Request<Body> {
        let mut request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let addr: SocketAddr = peer.parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        request
    }

    fn post_json(uri: &str, body: &serde_json::Value) -> Request<Body> {
        post_json_from(uri, body, "10.0.0.1:40000")
    }

    #[tokio::test]
    async fn test_single_event_persisted() {
        let (app, db) = test_app("60/minute").await;

        let response = app
            .oneshot(post_json("/v1.0/event", &event_payload(TEST_KEY)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(body.is_empty());

        assert_eq!(db.count_events().await.unwrap(), 1);
        let row = db.get_event(1).await.unwrap().unwrap();
        assert_eq!(row.event_type, "app_started");
        assert_eq!(row.session_id, "session-1");
        assert_eq!(row.value.0, json!({"launch_ms": 120}));
    }

    #[tokio::test]
    async fn test_value_defaults_to_empty_object() {
        let (app, db) = test_app("60/minute").await;

        let mut payload = event_payload(TEST_KEY);
        payload.as_object_mut().unwrap().remove("value");

        let response = app.oneshot(post_json("/v1.0/event", &payload)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let row = db.get_event(1).await.unwrap().unwrap();
        assert_eq!(row.value.0, json!({}));
    }

    #[tokio::test]
    async fn test_invalid_key_rejected_without_write() {
        let (app, db) = test_app("60/minute").await;

        let response = app
            .oneshot(post_json("/v1.0/event", &event_payload("wrong-key")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let error: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(error["detail"], "Invalid or missing API Key");

        assert_eq!(db.count_events().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_field_rejected_without_write() {
        let (app, db) = test_app("60/minute").await;

        let mut payload = event_payload(TEST_KEY);
        payload.as_object_mut().unwrap().remove("session_id");

        let response = app.oneshot(post_json("/v1.0/event", &payload)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(db.count_events().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_batch_persists_every_event() {
        let (app, db) = test_app("60/minute").await;

        let batch = json!([
            event_payload(TEST_KEY),
            event_payload(TEST_KEY),
            event_payload(TEST_KEY),
        ]);
        let response = app.oneshot(post_json("/v1.0/events", &batch)).await.unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(db.count_events().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_batch_with_one_bad_key_writes_nothing() {
        let (app, db) = test_app("60/minute").await;

        let batch = json!([
            event_payload(TEST_KEY),
            event_payload("wrong-key"),
            event_payload(TEST_KEY),
        ]);
        let response = app.oneshot(post_json("/v1.0/events", &batch)).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(db.count_events().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_quota_shared_across_endpoints() {
        let (app, db) = test_app("2/minute").await;

        let single = post_json("/v1.0/event", &event_payload(TEST_KEY));
        assert_eq!(
            app.clone().oneshot(single).await.unwrap().status(),
            StatusCode::NO_CONTENT
        );

        let batch = post_json("/v1.0/events", &json!([event_payload(TEST_KEY)]));
        assert_eq!(
            app.clone().oneshot(batch).await.unwrap().status(),
            StatusCode::NO_CONTENT
        );

        let over = app
            .oneshot(post_json("/v1.0/event", &event_payload(TEST_KEY)))
            .await
            .unwrap();
        assert_eq!(over.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(over.headers().contains_key("retry-after"));

        // Two accepted requests made it to storage, the third never did
        assert_eq!(db.count_events().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_rate_limit_rejects_before_authentication() {
        let (app, _db) = test_app("1/minute").await;

        let first = post_json("/v1.0/event", &event_payload(TEST_KEY));
        assert_eq!(
            app.clone().oneshot(first).await.unwrap().status(),
            StatusCode::NO_CONTENT
        );

        // Over-limit request with a bad key still reports 429, not 401
        let over = post_json("/v1.0/event", &event_payload("wrong-key"));
        assert_eq!(
            app.oneshot(over).await.unwrap().status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[tokio::test]
    async fn test_distinct_clients_do_not_share_quota() {
        let (app, _db) = test_app("1/minute").await;

        let from_a = post_json_from("/v1.0/event", &event_payload(TEST_KEY), "10.0.0.1:40000");
        let from_b = post_json_from("/v1.0/event", &event_payload(TEST_KEY), "10.0.0.2:40000");
        let again_a = post_json_from("/v1.0/event", &event_payload(TEST_KEY), "10.0.0.1:40001");

        assert_eq!(
            app.clone().oneshot(from_a).await.unwrap().status(),
            StatusCode::NO_CONTENT
        );
        assert_eq!(
            app.clone().oneshot(from_b).await.unwrap().status(),
            StatusCode::NO_CONTENT
        );
        assert_eq!(
            app.oneshot(again_a).await.unwrap().status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }
}
