//! HTTP mapping for library errors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use keyseal_protocol::seal::KeyManagementError;
use keyseal_protocol::secrets::SecretsError;

/// Error body returned by every endpoint on failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Keys(#[from] KeyManagementError),
    #[error(transparent)]
    Secrets(#[from] SecretsError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Keys(e) => match e {
                KeyManagementError::InvalidParameters(_)
                | KeyManagementError::InvalidShareEncoding(_) => StatusCode::BAD_REQUEST,
                KeyManagementError::NoKeySet => StatusCode::NOT_FOUND,
                KeyManagementError::KeyAlreadyExists
                | KeyManagementError::KeyAlreadyUnlocked
                | KeyManagementError::TooManyShares => StatusCode::CONFLICT,
                KeyManagementError::CouldNotRecombine(_)
                | KeyManagementError::WrongShares
                | KeyManagementError::WrongIndex => StatusCode::UNPROCESSABLE_ENTITY,
                KeyManagementError::CorruptSettings(_)
                | KeyManagementError::Storage(_)
                | KeyManagementError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Secrets(e) => match e {
                SecretsError::InvalidPath(_) => StatusCode::BAD_REQUEST,
                SecretsError::NotFound(_) => StatusCode::NOT_FOUND,
                SecretsError::AlreadyExists(_) => StatusCode::CONFLICT,
                SecretsError::KeyLocked => StatusCode::LOCKED,
                SecretsError::Encryption
                | SecretsError::Decryption
                | SecretsError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorResponse {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_management_statuses() {
        let cases = [
            (KeyManagementError::NoKeySet, StatusCode::NOT_FOUND),
            (KeyManagementError::KeyAlreadyExists, StatusCode::CONFLICT),
            (KeyManagementError::KeyAlreadyUnlocked, StatusCode::CONFLICT),
            (KeyManagementError::WrongShares, StatusCode::UNPROCESSABLE_ENTITY),
            (KeyManagementError::WrongIndex, StatusCode::UNPROCESSABLE_ENTITY),
            (
                KeyManagementError::InvalidParameters("x".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                KeyManagementError::Internal("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
    }

    #[test]
    fn secrets_statuses() {
        assert_eq!(
            ApiError::from(SecretsError::KeyLocked).status(),
            StatusCode::LOCKED
        );
        assert_eq!(
            ApiError::from(SecretsError::NotFound("/x".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(SecretsError::Decryption).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
