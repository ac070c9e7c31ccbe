//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sqlx::error::ErrorKind;
use sqlx::postgres::PgDatabaseError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
    #[error("config load: {0}")]
    Load(String),
}

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("schema not found: {0}")]
    SchemaNotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("unknown property '{property}' on {identity}")]
    UnknownProperty { identity: String, property: String },
    #[error("validation failed for '{property}': {message}")]
    ValidationFailed { property: String, message: String },
    #[error("id is required")]
    IdRequired,
    #[error("{identity} #{id} not found")]
    IdNotFound { identity: String, id: String },
    #[error("invalid connection on {identity}.{property}")]
    InvalidConnection { identity: String, property: String },
    #[error("unsupported column type '{column_type}' for {identity}.{field}")]
    UnsupportedColumnType {
        identity: String,
        field: String,
        column_type: String,
    },
    #[error("constraint violation: {0}")]
    BackendConstraintViolation(String),
    #[error("operation not allowed: {0}")]
    UnauthorizedOperation(String),
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    #[error("invalid event name: {0}")]
    InvalidEvent(String),
    #[error("invalid schema {identity}: {message}")]
    InvalidSchema { identity: String, message: String },
    #[error("database: {0}")]
    Db(#[source] sqlx::Error),
}

/// Constraint breaches reported by PostgreSQL carry the backend's detail line
/// (e.g. `Key (name)=(Lobby) already exists.`); everything else stays a database error.
impl From<sqlx::Error> for AdapterError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            if !matches!(db.kind(), ErrorKind::Other) {
                let detail = db
                    .try_downcast_ref::<PgDatabaseError>()
                    .and_then(|pg| pg.detail())
                    .map(str::to_string)
                    .unwrap_or_else(|| db.message().to_string());
                return AdapterError::BackendConstraintViolation(detail);
            }
        }
        AdapterError::Db(e)
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl AdapterError {
    /// HTTP status and stable error code for the service boundary.
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AdapterError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            AdapterError::SchemaNotFound(_) => (StatusCode::NOT_FOUND, "schema_not_found"),
            AdapterError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
            AdapterError::UnknownProperty { .. } => (StatusCode::BAD_REQUEST, "unknown_property"),
            AdapterError::ValidationFailed { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "validation_error")
            }
            AdapterError::IdRequired => (StatusCode::BAD_REQUEST, "id_required"),
            AdapterError::IdNotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            AdapterError::InvalidConnection { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "invalid_connection")
            }
            AdapterError::UnsupportedColumnType { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "unsupported_column_type")
            }
            AdapterError::BackendConstraintViolation(_) => (StatusCode::CONFLICT, "conflict"),
            AdapterError::UnauthorizedOperation(_) => (StatusCode::FORBIDDEN, "forbidden"),
            AdapterError::InvalidFilter(_) => (StatusCode::BAD_REQUEST, "invalid_filter"),
            AdapterError::InvalidEvent(_) => (StatusCode::INTERNAL_SERVER_ERROR, "invalid_event"),
            AdapterError::InvalidSchema { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "invalid_schema")
            }
            AdapterError::Db(e) => {
                if let sqlx::Error::RowNotFound = e {
                    (StatusCode::NOT_FOUND, "not_found")
                } else {
                    (StatusCode::INTERNAL_SERVER_ERROR, "database_error")
                }
            }
        }
    }
}

impl IntoResponse for AdapterError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let details = match &self {
            AdapterError::ValidationFailed { property, .. } => {
                Some(serde_json::json!({ "property": property }))
            }
            _ => None,
        };
        if status.is_server_error() {
            tracing::warn!(error = %self, code, "request failed");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.to_string(),
                details,
            },
        };
        (status, Json(body)).into_response()
    }
}
