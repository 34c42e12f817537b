// src/error.rs
use std::fmt;
use thiserror::Error;
use warp::http::StatusCode;
use warp::reject::Reject;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    InvalidInput(String),

    #[error("No shares found for {0}")]
    NotFound(String),

    #[error("Not enough shares to sell. Only {available} shares of {symbol} available.")]
    InsufficientShares {
        symbol: String,
        requested: f64,
        available: f64,
    },

    #[error("No data for {0}")]
    NoData(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(#[from] MarketDataError),

    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Storage failure: {0}")]
    Storage(#[from] StorageError),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Caller mistakes map to 400, everything else is ours.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidInput(_) | Error::NotFound(_) | Error::InsufficientShares { .. } => {
                StatusCode::BAD_REQUEST
            }
            Error::NoData(_) => StatusCode::NOT_FOUND,
            Error::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            Error::InvariantViolation(_) | Error::Storage(_) | Error::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Errors raised by the quote source.
#[derive(Error, Debug)]
pub enum MarketDataError {
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("Rate limited by provider")]
    RateLimited,

    #[error("Request timed out")]
    Timeout,

    #[error("Provider error: {0}")]
    Provider(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<scylla::transport::errors::QueryError> for StorageError {
    fn from(e: scylla::transport::errors::QueryError) -> Self {
        StorageError::Database(e.to_string())
    }
}

impl From<scylla::transport::errors::NewSessionError> for StorageError {
    fn from(e: scylla::transport::errors::NewSessionError) -> Self {
        StorageError::Database(e.to_string())
    }
}

/// Rejection carried through warp until the recover filter renders it.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError {
            status: e.status_code(),
            message: e.to_string(),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ApiError {}

impl Reject for ApiError {}
