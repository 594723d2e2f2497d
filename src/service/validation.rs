//! Payload validation and sanitization from entity definitions.

use crate::config::{AllowedValue, EntityDefinition, FieldDefinition, FieldKind, Format, ValidationRule};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl FieldError {
    fn new(field: &str, message: impl Into<String>, value: Option<&Value>) -> Self {
        FieldError {
            field: field.to_string(),
            message: message.into(),
            value: value.cloned(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ValidationOutcome {
    pub is_valid: bool,
    pub errors: Vec<FieldError>,
    /// Payload reduced to writable fields and normalized; what statements are built from.
    pub sanitized: Map<String, Value>,
}

pub struct DataValidator;

impl DataValidator {
    /// Check `payload` for create (`is_update == false`) or update. Never touches a backend.
    pub fn validate(entity: &EntityDefinition, payload: &Map<String, Value>, is_update: bool) -> ValidationOutcome {
        let mut errors = Vec::new();

        for field in entity.required_fields() {
            if is_update && !payload.contains_key(&field.name) {
                continue;
            }
            let value = payload.get(&field.name);
            if value.map(is_empty).unwrap_or(true) {
                let message = entity
                    .rule(&field.name)
                    .and_then(|r| r.message.clone())
                    .unwrap_or_else(|| format!("{} is required", field.name));
                errors.push(FieldError::new(&field.name, message, value));
            }
        }

        for (key, value) in payload {
            let Some(field) = entity.field(key) else {
                errors.push(FieldError::new(key, format!("unknown field '{}'", key), Some(value)));
                continue;
            };
            if !field.is_writable() {
                errors.push(FieldError::new(key, format!("{} is read-only", key), Some(value)));
                continue;
            }
            if is_empty(value) {
                continue;
            }
            if let Err(message) = check_kind(field, &field.kind, value) {
                errors.push(FieldError::new(key, message, Some(value)));
                continue;
            }
            if let Some(rule) = entity.rule(key) {
                if let Err(message) = check_rule(key, value, rule) {
                    errors.push(FieldError::new(key, rule.message.clone().unwrap_or(message), Some(value)));
                }
            }
        }

        ValidationOutcome {
            is_valid: errors.is_empty(),
            errors,
            sanitized: Self::sanitize(entity, payload, is_update),
        }
    }

    /// Keep writable fields only, coerce values to their kind, and on create fill missing
    /// optional fields from defaults. Applying it to its own output changes nothing.
    pub fn sanitize(entity: &EntityDefinition, payload: &Map<String, Value>, is_update: bool) -> Map<String, Value> {
        let mut out = Map::new();
        for field in entity.writable_fields() {
            let required = entity.required_fields().any(|f| f.name == field.name);
            match payload.get(&field.name) {
                Some(v) if !is_empty(v) => {
                    out.insert(field.name.clone(), Self::coerce_value(field, v));
                }
                Some(_) => {
                    if let Some(d) = &field.default_value {
                        out.insert(field.name.clone(), Self::coerce_value(field, d));
                    } else if !required {
                        out.insert(field.name.clone(), Value::Null);
                    }
                }
                None => {
                    if !is_update && !required {
                        if let Some(d) = &field.default_value {
                            out.insert(field.name.clone(), Self::coerce_value(field, d));
                        }
                    }
                }
            }
        }
        out
    }

    /// Best-effort conversion to the field's canonical JSON form; values that do not
    /// convert come back unchanged.
    pub fn coerce_value(field: &FieldDefinition, value: &Value) -> Value {
        coerce(field.kind.scalar(), value)
    }
}

/// Null, or a string with nothing but whitespace.
fn is_empty(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn coerce(kind: &FieldKind, value: &Value) -> Value {
    match kind {
        FieldKind::Numeric { integer, scale, .. } => {
            if let Some(exact) = exact_integer(value) {
                return exact;
            }
            let Some(n) = parse_number(value) else {
                return value.clone();
            };
            if *integer {
                if n.fract() == 0.0 && n.abs() < 9.0e15 {
                    return Value::from(n as i64);
                }
                return number(n);
            }
            match scale {
                Some(s) => {
                    let factor = 10f64.powi(*s as i32);
                    let rounded = (n * factor).round() / factor;
                    if value.is_number() && rounded == n {
                        value.clone()
                    } else {
                        number(rounded)
                    }
                }
                None if value.is_number() => value.clone(),
                None if n.fract() == 0.0 && n.abs() < 9.0e15 => Value::from(n as i64),
                None => number(n),
            }
        }
        FieldKind::Text { max_length } => match text_of(value) {
            Some(s) => {
                let trimmed = s.trim();
                let cut: String = match max_length {
                    Some(max) => trimmed.chars().take(*max as usize).collect(),
                    None => trimmed.to_string(),
                };
                Value::String(cut.trim_end().to_string())
            }
            None => value.clone(),
        },
        FieldKind::LargeText => match text_of(value) {
            Some(s) => Value::String(s.trim().to_string()),
            None => value.clone(),
        },
        FieldKind::Date { with_time } => match value.as_str().and_then(parse_date) {
            Some(dt) if *with_time => Value::String(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            Some(dt) => Value::String(dt.format("%Y-%m-%d").to_string()),
            None => value.clone(),
        },
        FieldKind::Binary => value.clone(),
        FieldKind::Enumerated { base, .. } => coerce(base, value),
    }
}

/// Integers that survive as integers: JSON `i64`/`u64` numbers as-is, and integer strings
/// parsed without a trip through `f64`.
fn exact_integer(v: &Value) -> Option<Value> {
    match v {
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(v.clone()),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .map(Value::from)
                .or_else(|_| s.parse::<u64>().map(Value::from))
                .ok()
        }
        _ => None,
    }
}

fn number(n: f64) -> Value {
    serde_json::Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
}

fn text_of(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn parse_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

/// RFC 3339, `YYYY-MM-DD`, or a naive date-time with `T` or space.
pub(crate) fn parse_date(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc).naive_utc());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn check_kind(field: &FieldDefinition, kind: &FieldKind, v: &Value) -> Result<(), String> {
    let name = &field.name;
    match kind {
        FieldKind::Numeric {
            integer,
            precision,
            scale,
        } => {
            let n = parse_number(v).ok_or_else(|| format!("{} must be a number", name))?;
            if *integer && n.fract() != 0.0 {
                return Err(format!("{} must be an integer", name));
            }
            if let Some(p) = precision {
                let s = scale.unwrap_or(0);
                let int_digits = n.abs().trunc().to_string().trim_end_matches(".0").len() as u32;
                let allowed = p.saturating_sub(s).max(1);
                if n.abs() >= 1.0 && int_digits > allowed {
                    return Err(format!("{} exceeds precision ({}, {})", name, p, s));
                }
            }
            Ok(())
        }
        FieldKind::Text { max_length } => {
            let s = text_of(v).ok_or_else(|| format!("{} must be text", name))?;
            if let Some(max) = max_length {
                if s.trim().chars().count() > *max as usize {
                    return Err(format!("{} must be at most {} characters", name, max));
                }
            }
            Ok(())
        }
        FieldKind::LargeText => text_of(v).map(|_| ()).ok_or_else(|| format!("{} must be text", name)),
        FieldKind::Binary => v
            .as_str()
            .map(|_| ())
            .ok_or_else(|| format!("{} must be base64 text", name)),
        FieldKind::Date { .. } => v
            .as_str()
            .and_then(parse_date)
            .map(|_| ())
            .ok_or_else(|| format!("{} must be a valid date", name)),
        FieldKind::Enumerated { base, values } => {
            check_kind(field, base, v)?;
            let coerced = coerce(base, v);
            if values.iter().any(|a| value_eq(&coerced, &a.value)) {
                Ok(())
            } else {
                Err(format!("{} must be one of: {}", name, labels(values)))
            }
        }
    }
}

fn labels(values: &[AllowedValue]) -> String {
    values.iter().map(|a| a.label.as_str()).collect::<Vec<_>>().join(", ")
}

fn check_rule(col: &str, v: &Value, rule: &ValidationRule) -> Result<(), String> {
    let text = text_of(v);
    if let (Some(min), Some(s)) = (rule.min_length, text.as_deref()) {
        if s.trim().chars().count() < min as usize {
            return Err(format!("{} must be at least {} characters", col, min));
        }
    }
    if let (Some(max), Some(s)) = (rule.max_length, text.as_deref()) {
        if s.trim().chars().count() > max as usize {
            return Err(format!("{} must be at most {} characters", col, max));
        }
    }
    if let (Some(re), Some(s)) = (&rule.pattern, text.as_deref()) {
        if !re.is_match(s) {
            return Err(format!("{} does not match required pattern", col));
        }
    }
    if let Some(format) = rule.format {
        validate_format(col, v, format)?;
    }
    if let Some(allowed) = &rule.allowed_values {
        if !allowed.iter().any(|a| value_eq(v, a)) {
            let shown: Vec<String> = allowed.iter().map(|a| a.to_string()).collect();
            return Err(format!("{} must be one of: {}", col, shown.join(", ")));
        }
    }
    if let (Some(min), Some(n)) = (rule.minimum, parse_number(v)) {
        if n < min {
            return Err(format!("{} must be at least {}", col, min));
        }
    }
    if let (Some(max), Some(n)) = (rule.maximum, parse_number(v)) {
        if n > max {
            return Err(format!("{} must be at most {}", col, max));
        }
    }
    Ok(())
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(s), Value::String(t)) => s == t,
        (Value::Number(n), Value::Number(m)) => n.as_f64() == m.as_f64(),
        (Value::String(s), Value::Number(n)) | (Value::Number(n), Value::String(s)) => {
            s.trim().parse::<f64>().ok() == n.as_f64()
        }
        _ => a == b,
    }
}

fn validate_format(col: &str, v: &Value, format: Format) -> Result<(), String> {
    let Some(s) = v.as_str() else {
        return Err(format!("{} must be text", col));
    };
    let ok = match format {
        Format::Email => is_email(s),
        Format::Url => url::Url::parse(s).map(|u| u.has_host()).unwrap_or(false),
        Format::Phone => is_phone(s),
        Format::Uuid => uuid::Uuid::parse_str(s).is_ok(),
    };
    if ok {
        return Ok(());
    }
    let what = match format {
        Format::Email => "email",
        Format::Url => "URL",
        Format::Phone => "phone number",
        Format::Uuid => "UUID",
    };
    Err(format!("{} must be a valid {}", col, what))
}

/// `local@domain.tld`: no whitespace, one `@`, a dot inside the domain.
fn is_email(s: &str) -> bool {
    if s.chars().any(char::is_whitespace) {
        return false;
    }
    let mut parts = s.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    if local.is_empty() {
        return false;
    }
    domain
        .char_indices()
        .any(|(i, c)| c == '.' && i > 0 && i + 1 < domain.len())
}

/// Optional `+`, then up to 16 digits not starting with 0; spaces, dashes and parentheses ignored.
fn is_phone(s: &str) -> bool {
    let cleaned: String = s.chars().filter(|c| !matches!(c, ' ' | '-' | '(' | ')')).collect();
    let digits = cleaned.strip_prefix('+').unwrap_or(&cleaned);
    let mut chars = digits.chars();
    match chars.next() {
        Some(c) if ('1'..='9').contains(&c) => {}
        _ => return false,
    }
    digits.len() <= 16 && chars.all(|c| c.is_ascii_digit())
}
