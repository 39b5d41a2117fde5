use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use serde_json::json;
use thiserror::Error;

use crate::authz::errors::AuthzError;

#[derive(Debug, Error, Diagnostic)]
pub enum AppError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Authz(#[from] AuthzError),

    #[error("I/O error: {0}")]
    #[diagnostic(code(stockroom::io))]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    #[diagnostic(code(stockroom::config))]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(stockroom::serde))]
    Serde(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    #[diagnostic(code(stockroom::db))]
    Db(#[from] sea_orm::DbErr),

    #[error("JOSE error: {0}")]
    #[diagnostic(code(stockroom::jose))]
    Jose(String),

    #[error("{0}")]
    #[diagnostic(code(stockroom::bad_request))]
    BadRequest(String),

    #[error("{0}")]
    #[diagnostic(code(stockroom::unauthorized))]
    Unauthorized(String),

    #[error("{0}")]
    #[diagnostic(code(stockroom::forbidden))]
    Forbidden(String),

    #[error("{0}")]
    #[diagnostic(code(stockroom::not_found))]
    NotFound(String),

    #[error("{0}")]
    #[diagnostic(code(stockroom::conflict))]
    Conflict(String),

    #[error("{0}")]
    #[diagnostic(code(stockroom::other))]
    Other(String),
}

impl From<josekit::JoseError> for AppError {
    fn from(value: josekit::JoseError) -> Self {
        AppError::Jose(value.to_string())
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Authz(e) => e.status(),
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        // internal details stay in the log
        let message = match status {
            StatusCode::INTERNAL_SERVER_ERROR => "Internal server error".to_string(),
            _ => self.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
