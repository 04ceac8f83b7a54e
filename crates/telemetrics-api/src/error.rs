// API error taxonomy mapped onto HTTP responses.
//
// Every failure body has the same `{detail: ...}` shape. Storage failures
// are logged server-side and never leak engine details to the client.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use utoipa::ToSchema;

/// Error body returned by every failing endpoint.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HttpError {
    pub detail: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid or missing API Key")]
    InvalidApiKey,
    #[error("Rate limit exceeded")]
    RateLimited { retry_after: Duration },
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::InvalidApiKey => (
                StatusCode::UNAUTHORIZED,
                Json(HttpError {
                    detail: "Invalid or missing API Key".to_string(),
                }),
            )
                .into_response(),
            ApiError::RateLimited { retry_after } => {
                let secs = retry_after.as_secs().max(1);
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    [(header::RETRY_AFTER, secs.to_string())],
                    Json(HttpError {
                        detail: format!("Rate limit exceeded, retry in {secs}s"),
                    }),
                )
                    .into_response()
            }
            ApiError::Storage(e) => {
                tracing::error!("Failed to persist events: {e:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(HttpError {
                        detail: "Internal server error".to_string(),
                    }),
                )
                    .into_response()
            }
        }
    }
}
