use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use agentdesk_core::error::{self, ApiError};

use crate::registry::RegistryError;
use crate::relay::RelayError;

/// Internal error type that converts to structured API responses
#[derive(Debug)]
pub enum AppError {
    /// Validation error (400)
    Validation {
        message: String,
        field: Option<String>,
        received: Option<serde_json::Value>,
        docs_hint: Option<String>,
    },
    /// Referenced resource is not pending anymore (404)
    NotFound { resource: String },
    /// Request conflicts with pending state (409)
    Conflict {
        message: String,
        field: Option<String>,
        docs_hint: Option<String>,
    },
    /// Upstream workflow API exceeded its time bound (504)
    UpstreamTimeout(String),
    /// Upstream workflow API failed (502)
    Upstream(String),
    /// Internal error (500)
    Internal(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>, field: &str) -> Self {
        AppError::Validation {
            message: message.into(),
            field: Some(field.to_string()),
            received: None,
            docs_hint: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::now_v7().to_string();

        let (status, api_error) = match self {
            AppError::Validation {
                message,
                field,
                received,
                docs_hint,
            } => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    field,
                    received,
                    docs_hint,
                    ..ApiError::new(error::codes::VALIDATION_FAILED, message, request_id)
                },
            ),
            AppError::NotFound { resource } => (
                StatusCode::NOT_FOUND,
                ApiError {
                    docs_hint: Some(
                        "The form was already submitted, cleared or expired. \
                         Fetch GET /api/forms for the current list."
                            .to_string(),
                    ),
                    ..ApiError::new(
                        error::codes::NOT_FOUND,
                        format!("{resource} is not pending"),
                        request_id,
                    )
                },
            ),
            AppError::Conflict {
                message,
                field,
                docs_hint,
            } => (
                StatusCode::CONFLICT,
                ApiError {
                    field,
                    docs_hint,
                    ..ApiError::new(error::codes::CONFLICT, message, request_id)
                },
            ),
            AppError::UpstreamTimeout(detail) => {
                tracing::warn!(detail = %detail, "Upstream timeout");
                (
                    StatusCode::GATEWAY_TIMEOUT,
                    ApiError {
                        docs_hint: Some("The message was not delivered; send it again.".to_string()),
                        ..ApiError::new(error::codes::UPSTREAM_TIMEOUT, detail, request_id)
                    },
                )
            }
            AppError::Upstream(detail) => {
                tracing::warn!(detail = %detail, "Upstream error");
                (
                    StatusCode::BAD_GATEWAY,
                    ApiError::new(error::codes::UPSTREAM_ERROR, detail, request_id),
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError::new(
                        error::codes::INTERNAL_ERROR,
                        "An internal error occurred",
                        request_id,
                    ),
                )
            }
        };

        (status, Json(api_error)).into_response()
    }
}

impl From<RegistryError> for AppError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound { form_id } => AppError::NotFound {
                resource: format!("form '{form_id}'"),
            },
        }
    }
}

impl From<RelayError> for AppError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::Timeout(_) => AppError::UpstreamTimeout(err.to_string()),
            RelayError::Upstream(_) | RelayError::Incomplete => AppError::Upstream(err.to_string()),
        }
    }
}
