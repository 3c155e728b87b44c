//! HTTP error mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::services::matching::EngineError;
use crate::services::order_service::OrderError;
use crate::services::settlement::SettlementError;
use crate::store::StoreError;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

/// Application error type
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, code: &str, message: &str) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.to_string(),
        }
    }

    pub fn bad_request(message: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn forbidden(message: &str) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message)
    }

    pub fn not_found(message: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn internal(message: &str) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
            code: self.code,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Timeout => {
                Self::new(StatusCode::GATEWAY_TIMEOUT, "STORE_TIMEOUT", "store operation timed out")
            }
            StoreError::Rejected(reason) => Self::bad_request(reason),
            StoreError::Database(err) => {
                tracing::error!(error = %err, "database failure");
                Self::internal("database failure")
            }
        }
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Store(err) => err.into(),
            EngineError::Settlement(SettlementError::InsufficientBalance(account_id)) => Self::new(
                StatusCode::CONFLICT,
                "INSUFFICIENT_BALANCE",
                &format!("account {account_id} cannot cover the fill"),
            ),
            EngineError::Settlement(SettlementError::Database(err)) => {
                tracing::error!(error = %err, "settlement failure");
                Self::internal("settlement failure")
            }
        }
    }
}

impl From<OrderError> for AppError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::Validation(message) => {
                Self::new(StatusCode::BAD_REQUEST, "VALIDATION", &message)
            }
            OrderError::Precondition(message) => {
                Self::new(StatusCode::CONFLICT, "PRECONDITION", &message)
            }
            OrderError::Store(err) => err.into(),
            OrderError::Engine(err) => err.into(),
        }
    }
}
