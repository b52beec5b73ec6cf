use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// A rule that cannot be evaluated as configured. The rule is skipped for
/// the pass; the batch carries on.
#[derive(Debug, Error, PartialEq)]
pub enum EvalError {
    #[error("unsupported alert type `{0}`")]
    UnknownKind(String),

    #[error("malformed conditions for {kind}: {reason}")]
    MalformedConditions { kind: String, reason: String },

    #[error("{kind} needs a reference {field} but the quote for {symbol} has none")]
    MissingReference {
        kind: &'static str,
        field: &'static str,
        symbol: String,
    },
}

/// One asset class's upstream batch call failed. Only rules for that class
/// are skipped.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("market data provider is not configured")]
    NotConfigured,

    #[error("market data request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("market data request returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("market data request for {asset_class} timed out after {elapsed:?}")]
    Timeout {
        asset_class: &'static str,
        elapsed: Duration,
    },

    #[error("quote task for {asset_class} did not finish: {reason}")]
    Task {
        asset_class: &'static str,
        reason: String,
    },
}

/// Storage is unreachable or returned something unusable. Fatal for the
/// current pass.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("mongodb: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[error("bson encode: {0}")]
    Encode(#[from] mongodb::bson::ser::Error),

    #[error("bson decode: {0}")]
    Decode(#[from] mongodb::bson::de::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Email could not be delivered. Recorded on the dispatch result, never
/// reverses a trigger.
#[derive(Debug, Error)]
pub enum EmailError {
    #[error("email transport is not configured")]
    NotConfigured,

    #[error("no email address on file for user {0}")]
    NoRecipient(String),

    #[error("recipient lookup failed: {0}")]
    Lookup(#[from] StoreError),

    #[error("email send timed out after {0:?}")]
    Timeout(Duration),

    #[error("email request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("email provider returned {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Aborts the pass; the next scheduled invocation retries from scratch.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("persistence failure during alert pass: {0}")]
    Persistence(#[from] StoreError),
}

/// Errors surfaced by the REST layer.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("{0}")]
    LimitReached(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::LimitReached(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Store(e) => {
                tracing::error!(error = %e, "store error while serving request");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let message = match &self {
            ApiError::Store(_) => "internal error".to_string(),
            other => other.to_string(),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
