use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Broker error: {message}{}", status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    Broker {
        status: Option<u16>,
        message: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate subscription identifier: {0}")]
    Duplicate(String),

    #[error("No free port found after {0} attempts")]
    PortExhaustion(usize),

    #[error("Invalid payload: {0}")]
    Payload(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Broker rejection carrying the HTTP status it answered with.
    pub fn broker(status: u16, message: impl Into<String>) -> Self {
        BridgeError::Broker {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Broker unreachable or the connection failed mid-flight.
    pub fn broker_transport(message: impl Into<String>) -> Self {
        BridgeError::Broker {
            status: None,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        BridgeError::Broker {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            BridgeError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
            BridgeError::Template(_) => (StatusCode::UNPROCESSABLE_ENTITY, "TEMPLATE_ERROR"),
            BridgeError::Broker { .. } => (StatusCode::BAD_GATEWAY, "BROKER_ERROR"),
            BridgeError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            BridgeError::Duplicate(_) => (StatusCode::CONFLICT, "DUPLICATE_SUBSCRIPTION"),
            BridgeError::PortExhaustion(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "PORT_EXHAUSTION")
            }
            BridgeError::Payload(_) => (StatusCode::BAD_REQUEST, "INVALID_PAYLOAD"),
            BridgeError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
        };

        let message = self.to_string();

        // Always log the detailed error server-side
        tracing::error!(
            code = %code,
            status = %status.as_u16(),
            message = %message,
            "bridge error"
        );

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_error_renders_status() {
        let err = BridgeError::broker(422, "entity rejected");
        assert_eq!(err.to_string(), "Broker error: entity rejected (status 422)");
    }

    #[test]
    fn transport_error_has_no_status() {
        let err = BridgeError::broker_transport("connection refused");
        assert_eq!(err.to_string(), "Broker error: connection refused");
    }

    #[test]
    fn port_exhaustion_names_attempt_count() {
        let err = BridgeError::PortExhaustion(256);
        assert_eq!(err.to_string(), "No free port found after 256 attempts");
    }
}
