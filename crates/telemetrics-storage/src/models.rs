// Database models (internal, may differ from public DTOs)

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::FromRow;

/// A persisted telemetry event. `id` and `time` are assigned at insert time
/// and never change afterwards.
#[derive(Debug, Clone, FromRow)]
pub struct EventRow {
    pub id: i64,
    pub event_type: String,
    pub application: String,
    pub version: String,
    pub platform: String,
    pub user_id: String,
    pub session_id: String,
    pub value: Json<serde_json::Value>,
    pub time: DateTime<Utc>,
}

/// Input for inserting an event. The API key has already been validated and
/// dropped by the time one of these is constructed.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_type: String,
    pub application: String,
    pub version: String,
    pub platform: String,
    pub user_id: String,
    pub session_id: String,
    pub value: serde_json::Value,
    pub time: DateTime<Utc>,
}
