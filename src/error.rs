use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub const GENERIC_DETAIL: &str = "Internal Server Error";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    ConfigSource(#[from] config::ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    TomlSer(#[from] toml::ser::Error),

    #[error("{operation} request failed: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{operation} request timed out")]
    Timeout { operation: &'static str },

    #[error("{operation} returned HTTP status {status}")]
    UpstreamStatus {
        operation: &'static str,
        status: reqwest::StatusCode,
    },

    #[error("invalid {operation} response: {reason}")]
    Format {
        operation: &'static str,
        reason: String,
    },

    #[error("server error: {0}")]
    Server(String),
}

impl AppError {
    /// Classifies a reqwest failure, keeping timeouts distinct from other
    /// transport problems.
    pub fn transport(operation: &'static str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return AppError::Timeout { operation };
        }
        if let Some(status) = err.status() {
            return AppError::UpstreamStatus { operation, status };
        }
        AppError::Transport {
            operation,
            source: err,
        }
    }

    /// Builds the 500 response for this error. The upstream-facing text is
    /// only included when `expose_details` is set.
    pub fn to_response(&self, expose_details: bool) -> Response {
        let detail = if expose_details {
            self.to_string()
        } else {
            GENERIC_DETAIL.to_string()
        };
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "detail": detail })),
        )
            .into_response()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.to_response(false)
    }
}

/// Reasons an individual upstream message cannot be turned into a usage entry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("message is not a JSON object")]
    NotAnObject,

    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' is not {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },
}
