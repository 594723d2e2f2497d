//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config load: {0}")]
    Load(String),
    #[error("config parse: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid primary key: entity {entity} field {field}")]
    InvalidPrimaryKey { entity: String, field: String },
    #[error("invalid identifier for {kind}: '{name}'")]
    InvalidIdentifier { kind: &'static str, name: String },
    #[error("unknown field type '{type_name}' for {entity}.{field}")]
    UnknownFieldType {
        entity: String,
        field: String,
        type_name: String,
    },
    #[error("missing reference: {kind} '{name}' in entity {entity}")]
    MissingReference {
        entity: String,
        kind: &'static str,
        name: String,
    },
    #[error("invalid pattern for {entity}.{field}: {source}")]
    InvalidPattern {
        entity: String,
        field: String,
        #[source]
        source: regex::Error,
    },
    #[error("validation: {0}")]
    Validation(String),
}

/// Statement construction failures. Nothing has reached a backend when one of these is returned.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SqlBuildError {
    #[error("no fields to insert")]
    NoFieldsToInsert,
    #[error("no fields to update")]
    NoFieldsToUpdate,
    #[error("unknown field '{field}' on entity {entity}")]
    UnknownField { entity: String, field: String },
    #[error("field '{field}' on entity {entity} is not searchable")]
    NotSearchable { entity: String, field: String },
    #[error("unknown filter preset '{preset}' on entity {entity}")]
    UnknownPreset { entity: String, preset: String },
    #[error("statement references unbound parameter :{0}")]
    UnboundParameter(String),
}

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("unknown connection '{0}'")]
    Unknown(String),
    #[error("connection '{0}' is inactive")]
    Inactive(String),
    #[error("connection '{0}' is already registered")]
    AlreadyRegistered(String),
    #[error("connection '{connection}' is not allowed for entity {entity}")]
    NotAllowed { entity: String, connection: String },
    #[error("no default connection configured")]
    NoDefault,
    #[error("timed out acquiring a connection from '{name}' after {waited:?}")]
    AcquireTimeout { name: String, waited: Duration },
    #[error("statement on '{name}' did not finish within {waited:?}")]
    StatementTimeout { name: String, waited: Duration },
    #[error("cannot reach '{name}': {message}")]
    Connect { name: String, message: String },
    #[error("unsupported backend scheme '{scheme}' for connection '{name}'")]
    UnsupportedBackend { name: String, scheme: String },
    #[error("invalid connection config '{name}': {reason}")]
    InvalidConfig { name: String, reason: String },
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Query(#[from] SqlBuildError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("backend error on '{connection}': {message}")]
    Backend {
        connection: String,
        code: Option<String>,
        message: String,
    },
    #[error("unknown entity: {0}")]
    UnknownEntity(String),
    #[error("operation '{operation}' is not enabled for entity {entity}")]
    OperationNotAllowed {
        entity: String,
        operation: &'static str,
    },
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl EngineError {
    /// Classify a driver error raised while running a statement on `connection`.
    /// Only the database message is kept; connect strings never leave this function.
    pub fn from_sqlx(connection: &str, waited: Duration, err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => ConnectionError::AcquireTimeout {
                name: connection.to_string(),
                waited,
            }
            .into(),
            sqlx::Error::PoolClosed => ConnectionError::Inactive(connection.to_string()).into(),
            sqlx::Error::Io(e) => ConnectionError::Connect {
                name: connection.to_string(),
                message: e.to_string(),
            }
            .into(),
            sqlx::Error::Tls(e) => ConnectionError::Connect {
                name: connection.to_string(),
                message: e.to_string(),
            }
            .into(),
            sqlx::Error::Database(db) => EngineError::Backend {
                connection: connection.to_string(),
                code: db.code().map(|c| c.into_owned()),
                message: db.message().to_string(),
            },
            other => EngineError::Backend {
                connection: connection.to_string(),
                code: None,
                message: other.to_string(),
            },
        }
    }

    /// True when the backend rejected the statement for an integrity constraint (SQLSTATE class 23).
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, EngineError::Backend { code: Some(c), .. } if c.starts_with("23"))
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

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            EngineError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            EngineError::Query(_) => (StatusCode::BAD_REQUEST, "bad_query"),
            EngineError::Connection(e) => match e {
                ConnectionError::Unknown(_) | ConnectionError::NotAllowed { .. } => {
                    (StatusCode::BAD_REQUEST, "bad_connection")
                }
                ConnectionError::AcquireTimeout { .. } | ConnectionError::StatementTimeout { .. } => {
                    (StatusCode::SERVICE_UNAVAILABLE, "timeout")
                }
                _ => (StatusCode::SERVICE_UNAVAILABLE, "connection_unavailable"),
            },
            EngineError::Backend { .. } => {
                if self.is_constraint_violation() {
                    (StatusCode::CONFLICT, "conflict")
                } else {
                    (StatusCode::INTERNAL_SERVER_ERROR, "database_error")
                }
            }
            EngineError::UnknownEntity(_) => (StatusCode::NOT_FOUND, "not_found"),
            EngineError::OperationNotAllowed { .. } => {
                (StatusCode::METHOD_NOT_ALLOWED, "operation_not_allowed")
            }
            EngineError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
        };
        let details = match &self {
            EngineError::Backend { code: Some(c), .. } => Some(serde_json::json!({ "sqlstate": c })),
            _ => None,
        };
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_timeout_is_not_a_backend_error() {
        let err = EngineError::from_sqlx("reporting", Duration::from_secs(4), sqlx::Error::PoolTimedOut);
        assert!(matches!(
            err,
            EngineError::Connection(ConnectionError::AcquireTimeout { ref name, .. }) if name == "reporting"
        ));
    }

    #[test]
    fn closed_pool_reads_as_inactive() {
        let err = EngineError::from_sqlx("main", Duration::ZERO, sqlx::Error::PoolClosed);
        assert!(matches!(err, EngineError::Connection(ConnectionError::Inactive(_))));
    }

    #[test]
    fn integrity_class_detected_from_sqlstate() {
        let err = EngineError::Backend {
            connection: "main".into(),
            code: Some("23505".into()),
            message: "duplicate key".into(),
        };
        assert!(err.is_constraint_violation());
        let err = EngineError::Backend {
            connection: "main".into(),
            code: Some("42P01".into()),
            message: "relation does not exist".into(),
        };
        assert!(!err.is_constraint_violation());
    }

    #[test]
    fn status_mapping() {
        let resp = EngineError::UnknownEntity("widgets".into()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let resp = EngineError::Connection(ConnectionError::Inactive("x".into())).into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let resp = EngineError::Query(SqlBuildError::NoFieldsToUpdate).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
