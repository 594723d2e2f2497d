//! Driver rows decoded into typed cells.

use serde_json::Value;
use sqlx::any::AnyRow;
use sqlx::{Column, Row, ValueRef};

/// One decoded column value.
#[derive(Clone, Debug, PartialEq)]
pub enum Cell {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
    Bytes(Vec<u8>),
}

impl Cell {
    /// Plain JSON form. Bytes become a lossy UTF-8 string; callers wanting base64
    /// go through the backend adapter.
    pub fn into_json(self) -> Value {
        match self {
            Cell::Null => Value::Null,
            Cell::Int(n) => Value::from(n),
            Cell::Float(f) => serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
            Cell::Text(s) => Value::String(s),
            Cell::Bool(b) => Value::Bool(b),
            Cell::Bytes(b) => Value::String(String::from_utf8_lossy(&b).into_owned()),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Cell::Int(n) => Some(*n),
            Cell::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Cell::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Column label and cell, in result order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record(pub Vec<(String, Cell)>);

impl Record {
    pub fn get(&self, column: &str) -> Option<&Cell> {
        self.0
            .iter()
            .find(|(c, _)| c.eq_ignore_ascii_case(column))
            .map(|(_, v)| v)
    }

    pub fn first(&self) -> Option<&Cell> {
        self.0.first().map(|(_, v)| v)
    }
}

/// Decode each column by trying types in order until one fits.
pub fn decode_row(row: &AnyRow) -> Record {
    let mut out = Vec::with_capacity(row.columns().len());
    for (i, col) in row.columns().iter().enumerate() {
        out.push((col.name().to_string(), decode_cell(row, i)));
    }
    Record(out)
}

fn decode_cell(row: &AnyRow, i: usize) -> Cell {
    match row.try_get_raw(i) {
        Ok(raw) if raw.is_null() => return Cell::Null,
        Err(_) => return Cell::Null,
        _ => {}
    }
    if let Ok(n) = row.try_get::<i64, _>(i) {
        return Cell::Int(n);
    }
    if let Ok(n) = row.try_get::<i32, _>(i) {
        return Cell::Int(i64::from(n));
    }
    if let Ok(f) = row.try_get::<f64, _>(i) {
        return Cell::Float(f);
    }
    if let Ok(b) = row.try_get::<bool, _>(i) {
        return Cell::Bool(b);
    }
    if let Ok(s) = row.try_get::<String, _>(i) {
        return Cell::Text(s);
    }
    if let Ok(b) = row.try_get::<Vec<u8>, _>(i) {
        return Cell::Bytes(b);
    }
    Cell::Null
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_lookup_ignores_case() {
        let r = Record(vec![("id".into(), Cell::Int(3)), ("name".into(), Cell::Text("x".into()))]);
        assert_eq!(r.get("ID"), Some(&Cell::Int(3)));
        assert_eq!(r.get("NAME").cloned().map(Cell::into_json), Some(Value::String("x".into())));
        assert_eq!(r.get("PRICE"), None);
    }

    #[test]
    fn counts_from_any_numeric_cell() {
        assert_eq!(Cell::Int(7).as_i64(), Some(7));
        assert_eq!(Cell::Float(7.0).as_i64(), Some(7));
        assert_eq!(Cell::Text("12".into()).as_i64(), Some(12));
        assert_eq!(Cell::Null.as_i64(), None);
    }
}
