//! Statements with named parameters, and conversion of JSON values to driver binds.

use crate::config::FieldKind;
use crate::error::SqlBuildError;
use crate::pool::BackendAdapter;
use base64::Engine as _;
use serde_json::Value;
use sqlx::any::{Any, AnyArguments};
use sqlx::query::Query;
use std::collections::HashMap;

/// Backend type a parameter is meant for. Drivers that need explicit casts use it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindType {
    Integer,
    Decimal,
    Text,
    Date,
    Timestamp,
    Binary,
}

impl BindType {
    pub fn for_kind(kind: &FieldKind) -> Self {
        match kind.scalar() {
            FieldKind::Numeric { integer: true, .. } => BindType::Integer,
            FieldKind::Numeric { .. } => BindType::Decimal,
            FieldKind::Date { with_time: false } => BindType::Date,
            FieldKind::Date { with_time: true } => BindType::Timestamp,
            FieldKind::Binary => BindType::Binary,
            _ => BindType::Text,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SqlParam {
    pub name: String,
    pub value: Value,
    pub bind_type: Option<BindType>,
}

/// SQL text with `:name` placeholders and the values bound to them.
/// `returning` names the column whose generated value the statement should hand back.
#[derive(Clone, Debug, PartialEq)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<SqlParam>,
    pub returning: Option<String>,
}

impl SqlStatement {
    pub fn new(sql: impl Into<String>) -> Self {
        SqlStatement {
            sql: sql.into(),
            params: Vec::new(),
            returning: None,
        }
    }

    pub fn bind(mut self, name: impl Into<String>, value: Value) -> Self {
        self.push_param(name, value, None);
        self
    }

    pub fn bind_typed(mut self, name: impl Into<String>, value: Value, bind_type: BindType) -> Self {
        self.push_param(name, value, Some(bind_type));
        self
    }

    pub(crate) fn push_param(&mut self, name: impl Into<String>, value: Value, bind_type: Option<BindType>) {
        self.params.push(SqlParam {
            name: name.into(),
            value,
            bind_type,
        });
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.iter().find(|p| p.name == name).map(|p| &p.value)
    }

    /// Rewrite named placeholders into the backend's positional form, in order of first
    /// appearance. A name used twice binds once. Quoted literals are left alone.
    pub fn render(&self, adapter: &dyn BackendAdapter) -> Result<RenderedStatement, SqlBuildError> {
        let by_name: HashMap<&str, &SqlParam> = self.params.iter().map(|p| (p.name.as_str(), p)).collect();
        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut values = Vec::new();
        let mut out = String::with_capacity(self.sql.len() + 16);
        let chars: Vec<char> = self.sql.chars().collect();
        let mut in_literal = false;
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            if c == '\'' {
                in_literal = !in_literal;
                out.push(c);
                i += 1;
                continue;
            }
            let starts_name = !in_literal
                && c == ':'
                && (i == 0 || chars[i - 1] != ':')
                && chars.get(i + 1).map(|n| n.is_ascii_alphabetic() || *n == '_').unwrap_or(false);
            if !starts_name {
                out.push(c);
                i += 1;
                continue;
            }
            let start = i + 1;
            let mut end = start;
            while end < chars.len() && (chars[end].is_ascii_alphanumeric() || matches!(chars[end], '_' | '$' | '#')) {
                end += 1;
            }
            let name: String = chars[start..end].iter().collect();
            let param = by_name
                .get(name.as_str())
                .ok_or_else(|| SqlBuildError::UnboundParameter(name.clone()))?;
            let index = match positions.get(&name) {
                Some(n) => *n,
                None => {
                    values.push(BindValue::from_param(param));
                    let n = values.len();
                    positions.insert(name, n);
                    n
                }
            };
            out.push_str(&adapter.placeholder(index, param.bind_type));
            i = end;
        }
        if let Some(col) = &self.returning {
            out.push_str(&adapter.returning_clause(col));
        }
        Ok(RenderedStatement { sql: out, values })
    }
}

/// Statement in positional form, ready to hand to the driver.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderedStatement {
    pub sql: String,
    pub values: Vec<BindValue>,
}

/// A value the Any driver can bind. Converts from serde_json::Value.
#[derive(Clone, Debug, PartialEq)]
pub enum BindValue {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl BindValue {
    pub fn from_param(p: &SqlParam) -> Self {
        match (&p.value, p.bind_type) {
            (Value::String(s), Some(BindType::Binary)) => base64::engine::general_purpose::STANDARD
                .decode(s)
                .map(BindValue::Bytes)
                .unwrap_or_else(|_| BindValue::Bytes(s.as_bytes().to_vec())),
            (v, _) => BindValue::from_json(v),
        }
    }

    pub fn from_json(v: &Value) -> Self {
        match v {
            Value::Null => BindValue::Null,
            Value::Bool(b) => BindValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    BindValue::I64(i)
                } else {
                    BindValue::F64(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => BindValue::Text(s.clone()),
            Value::Array(_) | Value::Object(_) => BindValue::Text(v.to_string()),
        }
    }
}

/// Attach values to a query in order.
pub fn bind_all<'q>(
    mut query: Query<'q, Any, AnyArguments<'q>>,
    values: Vec<BindValue>,
) -> Query<'q, Any, AnyArguments<'q>> {
    for v in values {
        query = match v {
            BindValue::Null => query.bind(Option::<String>::None),
            BindValue::Bool(b) => query.bind(b),
            BindValue::I64(n) => query.bind(n),
            BindValue::F64(n) => query.bind(n),
            BindValue::Text(s) => query.bind(s),
            BindValue::Bytes(b) => query.bind(b),
        };
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{GenericAdapter, PostgresAdapter};
    use serde_json::json;

    #[test]
    fn named_to_positional() {
        let stmt = SqlStatement::new("SELECT A FROM t WHERE A = :a OR B = :b OR C = :a")
            .bind("b", json!(2))
            .bind("a", json!("x"));
        let r = stmt.render(&GenericAdapter).unwrap();
        assert_eq!(r.sql, "SELECT A FROM t WHERE A = $1 OR B = $2 OR C = $1");
        assert_eq!(r.values, vec![BindValue::Text("x".into()), BindValue::I64(2)]);
    }

    #[test]
    fn literals_and_casts_untouched() {
        let stmt = SqlStatement::new("SELECT ':skip', x::text FROM t WHERE y = :y").bind("y", json!(1));
        let r = stmt.render(&GenericAdapter).unwrap();
        assert_eq!(r.sql, "SELECT ':skip', x::text FROM t WHERE y = $1");
    }

    #[test]
    fn postgres_casts_and_returning() {
        let mut stmt = SqlStatement::new("INSERT INTO t (D, P) VALUES (:D, :P)")
            .bind_typed("D", json!("2024-01-02"), BindType::Date)
            .bind_typed("P", json!(1.5), BindType::Decimal);
        stmt.returning = Some("ID".into());
        let r = stmt.render(&PostgresAdapter).unwrap();
        assert_eq!(r.sql, "INSERT INTO t (D, P) VALUES ($1::date, $2::numeric) RETURNING ID");
    }

    #[test]
    fn unbound_name_is_an_error() {
        let stmt = SqlStatement::new("SELECT 1 FROM t WHERE a = :missing");
        assert_eq!(
            stmt.render(&GenericAdapter),
            Err(SqlBuildError::UnboundParameter("missing".into()))
        );
    }

    #[test]
    fn binary_params_decode_base64() {
        let p = SqlParam {
            name: "B".into(),
            value: json!("aGk="),
            bind_type: Some(BindType::Binary),
        };
        assert_eq!(BindValue::from_param(&p), BindValue::Bytes(b"hi".to_vec()));
    }
}
