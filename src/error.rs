//! Caller-visible error taxonomy and the `{success, message, data}` response envelope.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use log::{error, warn};
use serde::Serialize;

#[derive(Debug)]
pub enum AppError {
    Validation(String),
    Unauthenticated,
    NotFound,
    Conflict(String),
    RateLimited { reset_at: chrono::DateTime<chrono::Utc> },
    UpstreamUnavailable(String),
    Internal(String),
}

impl AppError {
    pub fn internal(context: &str, err: impl std::fmt::Display) -> Self {
        error!("{}: {}", context, err);
        AppError::Internal(context.to_string())
    }

    pub fn ownership_mismatch(subject: &str, target_user_id: &str) -> Self {
        warn!(
            "[identity] ownership mismatch: subject={} target_user_id={}",
            subject, target_user_id
        );
        AppError::NotFound
    }
}

#[derive(Serialize)]
pub struct Envelope<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Unauthenticated => {
                (StatusCode::UNAUTHORIZED, "unauthenticated".to_string())
            }
            AppError::NotFound => (StatusCode::NOT_FOUND, "not found".to_string()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::RateLimited { .. } => {
                (StatusCode::TOO_MANY_REQUESTS, "rate limited".to_string())
            }
            AppError::UpstreamUnavailable(msg) => {
                (StatusCode::BAD_GATEWAY, msg.clone())
            }
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
            ),
        };

        let body = Envelope::<()> {
            success: false,
            message: Some(message),
            data: None,
        };

        let mut response = (status, Json(body)).into_response();
        if let AppError::RateLimited { reset_at } = &self {
            let retry_after = (*reset_at - chrono::Utc::now()).num_seconds().max(0);
            if let Ok(value) = retry_after.to_string().parse() {
                response.headers_mut().insert("retry-after", value);
            }
        }
        response
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::internal("database error", e)
    }
}

/// Wraps a successful payload in the standard envelope.
pub fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        success: true,
        message: None,
        data: Some(data),
    })
}

pub type AppResult<T> = Result<T, AppError>;
