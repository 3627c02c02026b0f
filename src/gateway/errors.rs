//! Gateway-level error types and their HTTP mapping.
//!
//! Mirrors the teacher's `CommandError` → reply mapping (`commands/mod.rs`):
//! a small typed enum whose `IntoResponse` impl is the single place that
//! decides status codes, so handlers never format HTTP errors by hand.
//! Protocol/transport failures from the Protocol Engine are deliberately
//! *not* modeled here — per spec.md §7 they surface as `200` with
//! `ok:false`, not as an HTTP error.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::amount::AmountError;

/// Errors the Gateway can return before ever reaching the Protocol Engine.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// A required field was missing or malformed.
    #[error("{0}")]
    BadRequest(String),
    /// An unexpected internal failure.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<AmountError> for GatewayError {
    fn from(err: AmountError) -> Self { Self::BadRequest(err.to_string()) }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    message: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::Internal(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        };
        (status, Json(ErrorBody { success: false, message })).into_response()
    }
}
