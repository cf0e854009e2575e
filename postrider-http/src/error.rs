use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use postrider_common::AddressError;
use postrider_queue::QueueError;
use serde_json::json;
use thiserror::Error;

/// Errors a request handler can answer with.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The caller sent an address that does not split; their fault.
    #[error(transparent)]
    Address(#[from] AddressError),

    /// The queue would not take the payload; our (or the broker's) fault.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// A validated payload failed to serialize.
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ApiError {
    const fn status(&self) -> StatusCode {
        match self {
            Self::Address(_) => StatusCode::BAD_REQUEST,
            Self::Queue(_) => StatusCode::BAD_GATEWAY,
            Self::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Errors from running the server itself.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_errors_are_client_errors() {
        let err = ApiError::from(AddressError::MissingSeparator("nodomain".to_string()));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn queue_errors_are_gateway_errors() {
        let err = ApiError::from(QueueError::Closed("singleQueue".to_string()));
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }
}
