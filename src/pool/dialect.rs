//! Per-backend statement rendering and large-field materialization.

use crate::config::{FieldDefinition, FieldKind};
use crate::pool::rows::Cell;
use crate::sql::BindType;
use base64::Engine as _;
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Sqlite,
    /// Plain `$n` placeholders and bare column names.
    Generic,
}

impl Dialect {
    /// Backend for a connect URL, by scheme.
    pub fn from_url(url: &str) -> Option<Self> {
        let scheme = url.split(':').next()?.to_ascii_lowercase();
        match scheme.as_str() {
            "postgres" | "postgresql" => Some(Dialect::Postgres),
            "sqlite" => Some(Dialect::Sqlite),
            _ => None,
        }
    }

    pub fn adapter(&self) -> &'static dyn BackendAdapter {
        match self {
            Dialect::Postgres => &PostgresAdapter,
            Dialect::Sqlite => &SqliteAdapter,
            Dialect::Generic => &GenericAdapter,
        }
    }
}

/// What differs between backends once a statement is built.
pub trait BackendAdapter: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Positional placeholder for the 1-based `index`.
    fn placeholder(&self, index: usize, _bind_type: Option<BindType>) -> String {
        format!("${}", index)
    }

    /// Select-list expression for a field, labelled with the field name.
    fn project(&self, field: &FieldDefinition) -> String {
        field.name.clone()
    }

    fn returning_clause(&self, column: &str) -> String {
        format!(" RETURNING {}", column)
    }

    /// Turn a large-text or binary cell into its JSON form.
    fn materialize_large_field(&self, kind: &FieldKind, cell: Cell) -> Value {
        match (kind.scalar(), cell) {
            (_, Cell::Null) => Value::Null,
            (FieldKind::Binary, Cell::Bytes(b)) => Value::String(base64::engine::general_purpose::STANDARD.encode(b)),
            (FieldKind::Binary, Cell::Text(s)) => Value::String(s),
            (_, Cell::Bytes(b)) => Value::String(String::from_utf8_lossy(&b).into_owned()),
            (_, Cell::Text(s)) => Value::String(s),
            (_, other) => other.into_json(),
        }
    }
}

pub struct PostgresAdapter;

impl BackendAdapter for PostgresAdapter {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn placeholder(&self, index: usize, bind_type: Option<BindType>) -> String {
        match bind_type {
            Some(t) => format!("${}::{}", index, pg_cast(t)),
            None => format!("${}", index),
        }
    }

    // The Any driver has no NUMERIC or DATE decoding, so those come back as bigint, float8 or text.
    fn project(&self, field: &FieldDefinition) -> String {
        match field.kind.scalar() {
            FieldKind::Numeric { integer: true, .. } => format!("CAST({0} AS BIGINT) AS {0}", field.name),
            FieldKind::Numeric { .. } => format!("CAST({0} AS DOUBLE PRECISION) AS {0}", field.name),
            FieldKind::Date { .. } => format!("CAST({0} AS TEXT) AS {0}", field.name),
            _ => field.name.clone(),
        }
    }
}

fn pg_cast(t: BindType) -> &'static str {
    match t {
        BindType::Integer => "bigint",
        BindType::Decimal => "numeric",
        BindType::Text => "text",
        BindType::Date => "date",
        BindType::Timestamp => "timestamp",
        BindType::Binary => "bytea",
    }
}

pub struct SqliteAdapter;

impl BackendAdapter for SqliteAdapter {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }
}

pub struct GenericAdapter;

impl BackendAdapter for GenericAdapter {
    fn dialect(&self) -> Dialect {
        Dialect::Generic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialect_from_scheme() {
        assert_eq!(Dialect::from_url("postgres://u@h/db"), Some(Dialect::Postgres));
        assert_eq!(Dialect::from_url("PostgreSQL://h/db"), Some(Dialect::Postgres));
        assert_eq!(Dialect::from_url("sqlite://data.db?mode=rwc"), Some(Dialect::Sqlite));
        assert_eq!(Dialect::from_url("oracle://h/db"), None);
    }

    #[test]
    fn binary_materializes_as_base64() {
        let v = SqliteAdapter.materialize_large_field(&FieldKind::Binary, Cell::Bytes(b"hi".to_vec()));
        assert_eq!(v, Value::String("aGk=".into()));
        let v = SqliteAdapter.materialize_large_field(&FieldKind::LargeText, Cell::Bytes(b"long".to_vec()));
        assert_eq!(v, Value::String("long".into()));
        let v = PostgresAdapter.materialize_large_field(&FieldKind::LargeText, Cell::Null);
        assert_eq!(v, Value::Null);
    }
}
