use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::warn;

use crate::store::StoreError;

/// Failures that reach the subscription client.
#[derive(Debug, Error)]
pub enum GatewayError {
  #[error("Invalid token")]
  InvalidToken,

  #[error("Profile not found")]
  ProfileNotFound,

  #[error("Converter returned {status}: {body}")]
  ConverterStatus { status: u16, body: String },

  #[error("Failed to reach converter: {0}")]
  ConverterTransport(#[from] reqwest::Error),

  #[error("Invalid converter address {address:?}: {source}")]
  ConverterAddress {
    address: String,
    source: url::ParseError,
  },

  #[error("No converter configured for target {0}")]
  ConverterUnavailable(String),

  #[error("Storage error: {0}")]
  Store(#[from] StoreError),
}

impl GatewayError {
  pub fn status_code(&self) -> StatusCode {
    match self {
      GatewayError::InvalidToken => StatusCode::FORBIDDEN,
      GatewayError::ProfileNotFound => StatusCode::NOT_FOUND,
      GatewayError::ConverterStatus { .. }
      | GatewayError::ConverterTransport(_)
      | GatewayError::ConverterAddress { .. }
      | GatewayError::ConverterUnavailable(_) => StatusCode::BAD_GATEWAY,
      GatewayError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

impl IntoResponse for GatewayError {
  fn into_response(self) -> Response {
    let status = self.status_code();
    if status.is_server_error() {
      warn!(err = %self, "request failed");
    }
    (
      status,
      [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
      self.to_string(),
    )
      .into_response()
  }
}
