//! Error types for the PlugHub server

use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use plughub_core::BridgeError;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

#[derive(Error, Debug)]
pub enum ServerError {
    /// Bad request: the caller can fix it
    #[error("{0}")]
    Client(String),

    #[error("{0}")]
    Processing(String),

    #[error("{0}")]
    Timeout(String),
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::Client(_) => StatusCode::BAD_REQUEST,
            ServerError::Processing(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "Request failed");
        } else {
            debug!(status = status.as_u16(), error = %self, "Request rejected");
        }

        let body = ErrorResponse {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<BridgeError> for ServerError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Client(msg) => ServerError::Client(msg),
            BridgeError::Processing(msg) => ServerError::Processing(msg),
            BridgeError::Timeout(msg) => ServerError::Timeout(msg),
        }
    }
}

impl From<MultipartError> for ServerError {
    fn from(err: MultipartError) -> Self {
        ServerError::Client(format!("Invalid upload: {}", err.body_text()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_errors_map_to_status() {
        let cases = [
            (BridgeError::client("bad"), StatusCode::BAD_REQUEST),
            (BridgeError::processing("boom"), StatusCode::INTERNAL_SERVER_ERROR),
            (BridgeError::Timeout("slow".into()), StatusCode::GATEWAY_TIMEOUT),
        ];
        for (err, status) in cases {
            assert_eq!(ServerError::from(err).status(), status);
        }
    }
}
