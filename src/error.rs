use std::collections::BTreeMap;
use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::auth::CredentialError;
use crate::store::StoreError;

/// Field name used when an error is not tied to a request field.
pub const GENERAL_FIELD: &str = "body";

/// `{field: [message]}` map rendered inside the error envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::default();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    /// `Ok(())` when nothing was recorded, otherwise a validation error.
    pub fn into_result(self) -> AppResult<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(self))
        }
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.0 {
            for message in messages {
                if !first {
                    write!(f, "; ")?;
                }
                write!(f, "{} {}", field, message)?;
                first = false;
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict on {field}: {message}")]
    Conflict { field: String, message: String },

    #[error("Validation failed: {0}")]
    Validation(FieldErrors),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Request timed out")]
    Timeout,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { field, message } => AppError::Conflict { field, message },
            StoreError::NotFound(what) => AppError::NotFound(format!("{} not found", what)),
            other => AppError::Store(other),
        }
    }
}

impl From<CredentialError> for AppError {
    fn from(err: CredentialError) -> Self {
        AppError::Internal(err.to_string())
    }
}

#[derive(Serialize)]
struct Envelope {
    errors: FieldErrors,
}

impl AppError {
    pub fn unauthenticated() -> Self {
        AppError::Unauthenticated("there is no jwt token".to_string())
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation(FieldErrors::single(field, message))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthenticated(_) | AppError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Store(StoreError::DeadlineExceeded) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Timeout => StatusCode::REQUEST_TIMEOUT,
            AppError::Store(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The `{field: [message]}` body the client sees.
    pub fn field_errors(&self) -> FieldErrors {
        match self {
            AppError::Unauthenticated(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg) => FieldErrors::single(GENERAL_FIELD, msg.clone()),
            AppError::InvalidCredentials => FieldErrors::single(GENERAL_FIELD, "Password error"),
            AppError::Conflict { field, message } => FieldErrors::single(field.clone(), message.clone()),
            AppError::Validation(errors) => errors.clone(),
            AppError::Store(StoreError::DeadlineExceeded) => {
                FieldErrors::single(GENERAL_FIELD, "request deadline exceeded")
            }
            AppError::Timeout => FieldErrors::single(GENERAL_FIELD, "request timed out"),
            AppError::Store(_) | AppError::Internal(_) => {
                FieldErrors::single(GENERAL_FIELD, "Internal server error")
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::Store(e) => tracing::error!("Store error: {}", e),
            AppError::Internal(msg) => tracing::error!("Internal error: {}", msg),
            other => tracing::debug!("Request failed: {}", other),
        }

        let status = self.status();
        let body = Envelope {
            errors: self.field_errors(),
        };
        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
