use std::fmt::Display;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use lockout::{GuardError, LockoutStatus};
use lockout_core::{Error, LockoutError};
use serde::Serialize;
use thiserror::Error;

/// Why a request was refused before reaching the handler.
#[derive(Debug, Error)]
pub enum LockoutRejection {
    #[error("Too many failed attempts for {}", .0.key)]
    RateLimited(LockoutStatus),

    #[error("Lockout state unavailable: {0}")]
    Unavailable(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<Error> for LockoutRejection {
    fn from(err: Error) -> Self {
        match err {
            Error::RateLimited(LockoutError::RateLimitExceeded {
                key,
                locked_until,
                remaining_seconds,
            }) => LockoutRejection::RateLimited(LockoutStatus {
                key,
                allowed: false,
                remaining_attempts: 0,
                locked_until: Some(locked_until),
                remaining_seconds: Some(remaining_seconds),
            }),
            Error::Storage(e) => LockoutRejection::Unavailable(e.to_string()),
            other => LockoutRejection::Internal(other.to_string()),
        }
    }
}

impl<E: Display> From<GuardError<E>> for LockoutRejection {
    fn from(err: GuardError<E>) -> Self {
        match err {
            GuardError::RateLimited(status) => LockoutRejection::RateLimited(status),
            GuardError::Lockout(e) => e.into(),
            GuardError::Verification(e) => LockoutRejection::Internal(e.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
struct RateLimitedBody<'a> {
    error: &'a str,
    allowed: bool,
    remaining_attempts: u32,
    remaining_seconds: Option<i64>,
    remaining_minutes: Option<i64>,
    locked_until: Option<DateTime<Utc>>,
}

impl IntoResponse for LockoutRejection {
    fn into_response(self) -> Response {
        match self {
            LockoutRejection::RateLimited(status) => {
                let body = Json(RateLimitedBody {
                    error: "Too many failed attempts",
                    allowed: status.allowed,
                    remaining_attempts: status.remaining_attempts,
                    remaining_seconds: status.remaining_seconds,
                    remaining_minutes: status.remaining_minutes(),
                    locked_until: status.locked_until,
                });
                let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
                if let Some(seconds) = status.retry_after_seconds() {
                    response
                        .headers_mut()
                        .insert(header::RETRY_AFTER, HeaderValue::from(seconds));
                }
                response
            }
            // Details stay in the logs
            LockoutRejection::Unavailable(_) => {
                status_body(StatusCode::SERVICE_UNAVAILABLE, "Service temporarily unavailable")
            }
            LockoutRejection::Internal(_) => {
                status_body(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    code: u16,
}

fn status_body(status: StatusCode, message: &str) -> Response {
    let body = Json(ErrorBody {
        error: message,
        code: status.as_u16(),
    });
    (status, body).into_response()
}

pub type Result<T> = std::result::Result<T, LockoutRejection>;
