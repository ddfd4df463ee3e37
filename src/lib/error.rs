use std::io;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BucketError>;

#[derive(Debug, Error)]
pub enum BucketError {
    #[error("{0}")]
    Parse(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    InvalidBucket(String),
    #[error("{0}")]
    Grouping(String),
    #[error("{0}")]
    InvalidSort(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Failures reported by a [`crate::storage::DocumentStore`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Connectivity hiccup; the write may be retried.
    #[error("transient store failure: {0}")]
    Transient(String),
    #[error("{0}")]
    Fatal(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

impl BucketError {
    /// Errors caused by the caller's input rather than the service.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Parse(_)
                | Self::Validation(_)
                | Self::InvalidBucket(_)
                | Self::Grouping(_)
                | Self::InvalidSort(_)
        )
    }
}

impl From<toml::de::Error> for BucketError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for BucketError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for BucketError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<csv::Error> for BucketError {
    fn from(err: csv::Error) -> Self {
        Self::Parse(format!("invalid csv: {err}"))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked) => {
                StoreError::Transient(err.to_string())
            }
            _ => StoreError::Fatal(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for BucketError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(err.into())
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    status: &'a str,
    message: &'a str,
}

impl IntoResponse for BucketError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::Parse(_)
            | Self::Validation(_)
            | Self::InvalidBucket(_)
            | Self::Grouping(_)
            | Self::InvalidSort(_) => StatusCode::BAD_REQUEST,
            Self::Config(_) | Self::Store(_) | Self::Io(_) | Self::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let message = self.to_string();
        (
            status,
            Json(ErrorBody {
                status: "error",
                message: &message,
            }),
        )
            .into_response()
    }
}
