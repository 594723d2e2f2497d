//! Config validation: identifiers, primary keys, references between sections.

use crate::config::{EntityConfig, EntityConfigFile};
use crate::error::ConfigError;

/// Plain SQL identifier: letters, digits, `_`, `$`, `#`; not starting with a digit.
/// Definitions are the only source of identifiers in emitted SQL, so this is enforced at load.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '#'))
}

/// Table name, optionally schema-qualified (`schema.table`).
pub fn is_table_identifier(s: &str) -> bool {
    let mut parts = s.split('.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(t), None, None) => is_identifier(t),
        (Some(schema), Some(t), None) => is_identifier(schema) && is_identifier(t),
        _ => false,
    }
}

pub fn validate(file: &EntityConfigFile) -> Result<(), ConfigError> {
    let s = &file.settings;
    if s.max_page_size == 0 {
        return Err(ConfigError::Validation("maxPageSize must be at least 1".into()));
    }
    if s.default_page_size == 0 || s.default_page_size > s.max_page_size {
        return Err(ConfigError::Validation(format!(
            "defaultPageSize must be between 1 and maxPageSize ({})",
            s.max_page_size
        )));
    }
    for (name, entity) in &file.entities {
        validate_entity(name, entity)?;
    }
    Ok(())
}

fn validate_entity(name: &str, entity: &EntityConfig) -> Result<(), ConfigError> {
    if name.trim().is_empty() {
        return Err(ConfigError::Validation("entity name must not be empty".into()));
    }
    if !is_table_identifier(&entity.table_name) {
        return Err(ConfigError::InvalidIdentifier {
            kind: "table",
            name: entity.table_name.clone(),
        });
    }
    if entity.fields.0.is_empty() {
        return Err(ConfigError::Validation(format!("entity {} has no fields", name)));
    }
    for (field, _) in &entity.fields.0 {
        if !is_identifier(field) {
            return Err(ConfigError::InvalidIdentifier {
                kind: "field",
                name: field.clone(),
            });
        }
    }

    let pk = entity
        .fields
        .0
        .iter()
        .find(|(f, _)| *f == entity.primary_key)
        .ok_or_else(|| ConfigError::InvalidPrimaryKey {
            entity: name.to_string(),
            field: entity.primary_key.clone(),
        })?;
    if !pk.1.primary_key {
        return Err(ConfigError::InvalidPrimaryKey {
            entity: name.to_string(),
            field: entity.primary_key.clone(),
        });
    }
    for (field, cfg) in &entity.fields.0 {
        if cfg.primary_key && *field != entity.primary_key {
            return Err(ConfigError::Validation(format!(
                "entity {}: field {} is flagged primaryKey but primaryKey is {}",
                name, field, entity.primary_key
            )));
        }
    }

    let has_field = |f: &str| entity.fields.0.iter().any(|(n, _)| n == f);
    for (preset, filter) in &entity.filters {
        if !has_field(&filter.field) {
            return Err(ConfigError::MissingReference {
                entity: name.to_string(),
                kind: "filter field",
                name: filter.field.clone(),
            });
        }
        match filter.operator.as_deref() {
            None | Some("=") | Some("eq") | Some("equals") => {}
            Some(op) => {
                return Err(ConfigError::Validation(format!(
                    "entity {}: filter {} uses unsupported operator '{}'",
                    name, preset, op
                )))
            }
        }
    }
    for field in entity.validations.keys() {
        if !has_field(field) {
            return Err(ConfigError::MissingReference {
                entity: name.to_string(),
                kind: "validation field",
                name: field.clone(),
            });
        }
    }
    if let Some(allowed) = &entity.allowed_connections {
        if let Some(default) = &entity.default_connection {
            if !allowed.contains(default) {
                return Err(ConfigError::Validation(format!(
                    "entity {}: defaultConnection '{}' is not in allowedConnections",
                    name, default
                )));
            }
        }
    }
    Ok(())
}
