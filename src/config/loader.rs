//! Load entity definitions from JSON and resolve them into an [`EntityCatalog`].

use crate::config::resolved::{
    AllowedValue, EntityCatalog, EntityDefinition, FieldDefinition, FieldKind, FilterPreset, Format, Operations,
    PageSettings, ValidationRule,
};
use crate::config::types::*;
use crate::config::validate;
use crate::error::ConfigError;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Parse and resolve a definition document.
pub fn load_from_str(json: &str) -> Result<EntityCatalog, ConfigError> {
    let file: EntityConfigFile = serde_json::from_str(json)?;
    resolve(&file)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<EntityCatalog, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    load_from_str(&text)
}

/// Build the catalog from a raw document (validates first).
pub fn resolve(file: &EntityConfigFile) -> Result<EntityCatalog, ConfigError> {
    validate(file)?;
    let mut entities = HashMap::with_capacity(file.entities.len());
    for (name, cfg) in &file.entities {
        let entity = resolve_entity(name, cfg)?;
        entities.insert(name.clone(), Arc::new(entity));
    }
    Ok(EntityCatalog {
        entities,
        settings: PageSettings {
            default_page_size: file.settings.default_page_size,
            max_page_size: file.settings.max_page_size,
        },
    })
}

fn resolve_entity(name: &str, cfg: &EntityConfig) -> Result<EntityDefinition, ConfigError> {
    let mut fields = Vec::with_capacity(cfg.fields.0.len());
    for (field_name, field) in &cfg.fields.0 {
        let kind = field_kind(name, field_name, field)?;
        let is_pk = *field_name == cfg.primary_key;
        let auto_increment = field.auto_increment || (is_pk && cfg.auto_increment);
        fields.push(FieldDefinition {
            name: field_name.clone(),
            kind,
            required: field.required,
            primary_key: is_pk,
            auto_increment,
            readonly: field.readonly || auto_increment,
            searchable: field.searchable,
            unique: field.unique,
            default_value: field.default_value.clone(),
            display_name: field.display_name.clone().unwrap_or_else(|| field_name.clone()),
            description: field.description.clone(),
        });
    }

    let mut validations = HashMap::with_capacity(cfg.validations.len());
    for (field, rule) in &cfg.validations {
        validations.insert(field.clone(), resolve_rule(name, field, rule)?);
    }

    let filters = cfg
        .filters
        .iter()
        .map(|(preset, f)| {
            (
                preset.clone(),
                FilterPreset {
                    name: preset.clone(),
                    field: f.field.clone(),
                    value: f.value.clone(),
                    display_name: f.display_name.clone().unwrap_or_else(|| preset.clone()),
                },
            )
        })
        .collect();

    let ops = &cfg.operations;
    Ok(EntityDefinition {
        name: name.to_string(),
        table_name: cfg.table_name.clone(),
        primary_key: cfg.primary_key.clone(),
        auto_increment: cfg.auto_increment || fields.iter().any(|f| f.primary_key && f.auto_increment),
        display_name: cfg.display_name.clone().unwrap_or_else(|| name.to_string()),
        description: cfg.description.clone(),
        fields,
        operations: Operations {
            create: ops.create,
            read: ops.read,
            update: ops.update,
            delete: ops.delete,
            search: ops.search,
            paginate: ops.paginate,
        },
        filters,
        validations,
        default_connection: cfg.default_connection.clone(),
        allowed_connections: cfg.allowed_connections.clone(),
    })
}

/// Map a type name (case-insensitive) plus size attributes to a [`FieldKind`].
fn field_kind(entity: &str, field: &str, cfg: &FieldConfig) -> Result<FieldKind, ConfigError> {
    let base = match cfg.type_.to_lowercase().as_str() {
        "number" | "numeric" | "decimal" | "float" | "double" | "real" => FieldKind::Numeric {
            integer: cfg.scale == Some(0),
            precision: cfg.precision,
            scale: cfg.scale,
        },
        "integer" | "int" | "bigint" | "smallint" => FieldKind::Numeric {
            integer: true,
            precision: cfg.precision,
            scale: Some(0),
        },
        "string" | "varchar" | "varchar2" | "nvarchar2" | "char" | "text" => FieldKind::Text {
            max_length: cfg.length,
        },
        "date" => FieldKind::Date { with_time: false },
        "timestamp" | "datetime" => FieldKind::Date { with_time: true },
        "clob" | "nclob" | "largetext" | "longtext" => FieldKind::LargeText,
        "blob" | "binary" | "raw" | "bytea" => FieldKind::Binary,
        _ => {
            return Err(ConfigError::UnknownFieldType {
                entity: entity.to_string(),
                field: field.to_string(),
                type_name: cfg.type_.clone(),
            })
        }
    };
    Ok(match &cfg.values {
        Some(values) if !values.is_empty() => FieldKind::Enumerated {
            base: Box::new(base),
            values: values
                .iter()
                .map(|v| match v {
                    AllowedValueConfig::Labeled { value, label } => AllowedValue {
                        value: value.clone(),
                        label: label.clone(),
                    },
                    AllowedValueConfig::Bare(value) => AllowedValue {
                        value: value.clone(),
                        label: label_of(value),
                    },
                })
                .collect(),
        },
        _ => base,
    })
}

fn label_of(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn resolve_rule(entity: &str, field: &str, cfg: &ValidationConfig) -> Result<ValidationRule, ConfigError> {
    let pattern = match &cfg.pattern {
        Some(p) => Some(Regex::new(p).map_err(|source| ConfigError::InvalidPattern {
            entity: entity.to_string(),
            field: field.to_string(),
            source,
        })?),
        None => None,
    };
    let format = match cfg.format.as_deref().map(str::to_lowercase).as_deref() {
        None => None,
        Some("email") => Some(Format::Email),
        Some("url") => Some(Format::Url),
        Some("phone") => Some(Format::Phone),
        Some("uuid") => Some(Format::Uuid),
        Some(other) => {
            return Err(ConfigError::Validation(format!(
                "unknown format '{}' for {}.{}",
                other, entity, field
            )))
        }
    };
    Ok(ValidationRule {
        required: cfg.required,
        min_length: cfg.min_length,
        max_length: cfg.max_length,
        pattern,
        format,
        allowed_values: cfg.allowed_values.clone(),
        minimum: cfg.minimum,
        maximum: cfg.maximum,
        message: cfg.message.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRODUCTS: &str = r#"{
        "entities": {
            "products": {
                "tableName": "products",
                "primaryKey": "ID",
                "autoIncrement": true,
                "fields": {
                    "ID": { "type": "integer", "primaryKey": true },
                    "NAME": { "type": "varchar2", "length": 10, "required": true, "searchable": true },
                    "PRICE": { "type": "number", "precision": 10, "scale": 2, "required": true },
                    "STATUS": { "type": "string", "values": [
                        { "value": "A", "label": "Active" }, "I"
                    ], "defaultValue": "A" },
                    "CREATED_AT": { "type": "timestamp", "readonly": true }
                },
                "filters": { "active": { "field": "STATUS", "value": "A" } },
                "validations": { "NAME": { "pattern": "^[A-Za-z ]+$", "message": "letters only" } }
            }
        },
        "settings": { "defaultPageSize": 5, "maxPageSize": 50 }
    }"#;

    #[test]
    fn resolves_products() {
        let catalog = load_from_str(PRODUCTS).unwrap();
        assert_eq!(catalog.settings.max_page_size, 50);
        let p = catalog.get("products").unwrap();
        let names: Vec<&str> = p.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["ID", "NAME", "PRICE", "STATUS", "CREATED_AT"]);
        let id = p.primary_key_field().unwrap();
        assert!(id.auto_increment && id.readonly);
        let writable: Vec<&str> = p.writable_fields().map(|f| f.name.as_str()).collect();
        assert_eq!(writable, ["NAME", "PRICE", "STATUS"]);
        let required: Vec<&str> = p.required_fields().map(|f| f.name.as_str()).collect();
        assert_eq!(required, ["NAME", "PRICE"]);
        match &p.field("STATUS").unwrap().kind {
            FieldKind::Enumerated { values, .. } => {
                assert_eq!(values[0].label, "Active");
                assert_eq!(values[1].label, "I");
            }
            other => panic!("unexpected kind {:?}", other),
        }
        assert!(p.rule("NAME").unwrap().pattern.is_some());
        assert_eq!(p.filters["active"].field, "STATUS");
    }

    #[test]
    fn primary_key_must_be_flagged() {
        let json = r#"{ "entities": { "t": { "tableName": "t", "primaryKey": "ID",
            "fields": { "ID": { "type": "integer" } } } } }"#;
        assert!(matches!(load_from_str(json), Err(ConfigError::InvalidPrimaryKey { .. })));
    }

    #[test]
    fn primary_key_must_exist() {
        let json = r#"{ "entities": { "t": { "tableName": "t", "primaryKey": "ID",
            "fields": { "CODE": { "type": "string", "primaryKey": true } } } } }"#;
        assert!(matches!(load_from_str(json), Err(ConfigError::InvalidPrimaryKey { .. })));
    }

    #[test]
    fn bad_pattern_fails_at_load() {
        let json = r#"{ "entities": { "t": { "tableName": "t", "primaryKey": "ID",
            "fields": { "ID": { "type": "integer", "primaryKey": true } },
            "validations": { "ID": { "pattern": "([" } } } } }"#;
        assert!(matches!(load_from_str(json), Err(ConfigError::InvalidPattern { .. })));
    }

    #[test]
    fn rejects_unsafe_identifiers() {
        let json = r#"{ "entities": { "t": { "tableName": "t; drop table x", "primaryKey": "ID",
            "fields": { "ID": { "type": "integer", "primaryKey": true } } } } }"#;
        assert!(matches!(load_from_str(json), Err(ConfigError::InvalidIdentifier { .. })));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let json = r#"{ "entities": { "t": { "tableName": "t", "primaryKey": "ID",
            "fields": { "ID": { "type": "geometry", "primaryKey": true } } } } }"#;
        assert!(matches!(load_from_str(json), Err(ConfigError::UnknownFieldType { .. })));
    }

    #[test]
    fn page_settings_are_checked() {
        let json = r#"{ "entities": {}, "settings": { "defaultPageSize": 20, "maxPageSize": 10 } }"#;
        assert!(matches!(load_from_str(json), Err(ConfigError::Validation(_))));
    }
}
