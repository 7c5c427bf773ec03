/// This module defines a custom error type `ApiError` for the pixel-grid marketplace
/// node. It integrates with Actix-web for HTTP error responses and provides
/// conversions from other error types (e.g., RocksDB errors). The module ensures
/// every terminal purchase outcome maps to a distinct, recoverable-or-not error
/// variant with an appropriate HTTP status code.
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use rocksdb::Error as RocksDBError;
use thiserror::Error;

/// Custom error type for the API, encapsulating various error conditions.
///
/// `ApiError` covers the full purchase taxonomy: input rejection before any payment
/// (`InvalidGeometry`, `Overlap`), terminal payment failures (`InsufficientFunds`,
/// `UserRejected`, `Rejected`, `ExhaustedRetries`), transient network conditions
/// (`Network`, `Protocol`) that are retried internally and only surface once the
/// retry budget is spent, and the post-payment inconsistency (`PaidButUnreserved`).
/// It implements `thiserror::Error` for structured error handling and
/// `ResponseError` for Actix-web integration.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Error from RocksDB database operations.
    #[error("Database error: {0}")]
    Database(#[from] RocksDBError),

    /// Record not found in the database.
    #[error("Not found")]
    NotFound,

    /// Request payload failed field validation.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Rectangle is outside the grid bounds or has zero area.
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    /// Payer balance is below the purchase price. Terminal, never retried.
    #[error("Insufficient funds: required {required} lamports, available {available}")]
    InsufficientFunds { required: u64, available: u64 },

    /// The wallet signer declined to sign the transaction. Terminal, never retried.
    #[error("Signing rejected by wallet")]
    UserRejected,

    /// Transport-level failure reaching the active RPC endpoint.
    #[error("Network error: {0}")]
    Network(#[source] anyhow::Error),

    /// The endpoint answered, but with a malformed or unexpected response.
    #[error("Protocol error: {0}")]
    Protocol(#[source] anyhow::Error),

    /// The ledger explicitly refused the submitted payload.
    #[error("Transaction rejected by ledger: {0}")]
    Rejected(String),

    /// The retry budget was spent without a confirmed transaction.
    #[error("Retries exhausted after {attempts} attempts")]
    ExhaustedRetries {
        attempts: u32,
        #[source]
        last: Box<ApiError>,
    },

    /// The requested rectangle overlaps an existing reservation. No payment
    /// was attempted.
    #[error("Requested region overlaps an existing reservation")]
    Overlap,

    /// Payment confirmed on-chain but the reservation lost a concurrent race.
    /// This is the known inconsistency window: the funds moved, the grid did
    /// not change. Must be remediated out of band.
    #[error("Payment {signature} confirmed but region was claimed concurrently; contact support")]
    PaidButUnreserved { signature: String },

    /// Caller is not the owner of the reservation being updated.
    #[error("Not the reservation owner")]
    NotOwner,

    /// Internal error for miscellaneous issues (e.g., serialization, timestamp).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Short machine-readable tag persisted into history records.
    pub fn reason_tag(&self) -> &'static str {
        match self {
            ApiError::Database(_) => "database",
            ApiError::NotFound => "not_found",
            ApiError::Validation(_) => "validation",
            ApiError::InvalidGeometry(_) => "invalid_geometry",
            ApiError::InsufficientFunds { .. } => "insufficient_funds",
            ApiError::UserRejected => "user_rejected",
            ApiError::Network(_) => "network",
            ApiError::Protocol(_) => "protocol",
            ApiError::Rejected(_) => "rejected",
            ApiError::ExhaustedRetries { .. } => "exhausted_retries",
            ApiError::Overlap => "overlap",
            ApiError::PaidButUnreserved { .. } => "paid_but_unreserved",
            ApiError::NotOwner => "not_owner",
            ApiError::Internal(_) => "internal",
        }
    }
}

/// Implements Actix-web's `ResponseError` trait for `ApiError`.
///
/// Defines how `ApiError` variants are mapped to HTTP status codes and response
/// bodies. Pre-payment rejections are 4xx; upstream ledger trouble is 502/504;
/// the paid-but-unreserved window is deliberately 500 so it is never mistaken
/// for an ordinary conflict the caller can retry.
impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidGeometry(_) => StatusCode::BAD_REQUEST,
            ApiError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
            ApiError::UserRejected => StatusCode::BAD_REQUEST,
            ApiError::Network(_) => StatusCode::BAD_GATEWAY,
            ApiError::Protocol(_) => StatusCode::BAD_GATEWAY,
            ApiError::Rejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::ExhaustedRetries { .. } => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Overlap => StatusCode::CONFLICT,
            ApiError::PaidButUnreserved { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::NotOwner => StatusCode::FORBIDDEN,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).body(self.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}
