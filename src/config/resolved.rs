//! Resolved model: entity definitions ready for validation and statement building.

use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Closed set of field kinds, each carrying its own constraint data.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldKind {
    Numeric {
        integer: bool,
        precision: Option<u32>,
        scale: Option<u32>,
    },
    Text {
        max_length: Option<u32>,
    },
    Date {
        with_time: bool,
    },
    LargeText,
    Binary,
    /// Scalar kind restricted to a fixed set of values.
    Enumerated {
        base: Box<FieldKind>,
        values: Vec<AllowedValue>,
    },
}

impl FieldKind {
    /// Kind used for coercion and binding (the base kind for enumerated fields).
    pub fn scalar(&self) -> &FieldKind {
        match self {
            FieldKind::Enumerated { base, .. } => base.scalar(),
            other => other,
        }
    }

    pub fn is_textual(&self) -> bool {
        matches!(self.scalar(), FieldKind::Text { .. } | FieldKind::LargeText)
    }

    pub fn is_large(&self) -> bool {
        matches!(self.scalar(), FieldKind::LargeText | FieldKind::Binary)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AllowedValue {
    pub value: Value,
    pub label: String,
}

#[derive(Clone, Debug)]
pub struct FieldDefinition {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub primary_key: bool,
    pub auto_increment: bool,
    /// Auto-increment fields are always readonly.
    pub readonly: bool,
    pub searchable: bool,
    pub unique: bool,
    pub default_value: Option<Value>,
    pub display_name: String,
    pub description: Option<String>,
}

impl FieldDefinition {
    pub fn is_writable(&self) -> bool {
        !self.readonly && !self.auto_increment
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    Email,
    Url,
    Phone,
    Uuid,
}

#[derive(Clone, Debug, Default)]
pub struct ValidationRule {
    pub required: bool,
    pub min_length: Option<u32>,
    pub max_length: Option<u32>,
    pub pattern: Option<Regex>,
    pub format: Option<Format>,
    pub allowed_values: Option<Vec<Value>>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub message: Option<String>,
}

/// Named equality filter selectable by callers.
#[derive(Clone, Debug)]
pub struct FilterPreset {
    pub name: String,
    pub field: String,
    pub value: Value,
    pub display_name: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Operations {
    pub create: bool,
    pub read: bool,
    pub update: bool,
    pub delete: bool,
    pub search: bool,
    pub paginate: bool,
}

#[derive(Clone, Debug)]
pub struct EntityDefinition {
    pub name: String,
    pub table_name: String,
    pub primary_key: String,
    pub auto_increment: bool,
    pub display_name: String,
    pub description: Option<String>,
    /// In document order.
    pub fields: Vec<FieldDefinition>,
    pub operations: Operations,
    pub filters: HashMap<String, FilterPreset>,
    pub validations: HashMap<String, ValidationRule>,
    pub default_connection: Option<String>,
    pub allowed_connections: Option<Vec<String>>,
}

impl EntityDefinition {
    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Backends may fold unquoted identifiers; match result labels back to field names.
    pub fn field_case_insensitive(&self, name: &str) -> Option<&FieldDefinition> {
        self.field(name)
            .or_else(|| self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name)))
    }

    /// Always present on resolved definitions; hand-built ones may lack it.
    pub fn primary_key_field(&self) -> Option<&FieldDefinition> {
        self.field(&self.primary_key)
    }

    /// Fields a payload may set: not readonly and not auto-increment.
    pub fn writable_fields(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields.iter().filter(|f| f.is_writable())
    }

    pub fn searchable_fields(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields.iter().filter(|f| f.searchable)
    }

    /// Required for create: flagged required (or by rule) and not generated by the backend.
    pub fn required_fields(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields
            .iter()
            .filter(|f| !f.auto_increment && (f.required || self.rule(&f.name).map(|r| r.required).unwrap_or(false)))
    }

    pub fn rule(&self, field: &str) -> Option<&ValidationRule> {
        self.validations.get(field)
    }

    pub fn allows_connection(&self, name: &str) -> bool {
        match &self.allowed_connections {
            Some(list) => list.iter().any(|c| c == name),
            None => true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageSettings {
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for PageSettings {
    fn default() -> Self {
        PageSettings {
            default_page_size: 10,
            max_page_size: 100,
        }
    }
}

/// Immutable set of entity definitions; replaced as a whole on reload.
#[derive(Clone, Debug, Default)]
pub struct EntityCatalog {
    pub entities: HashMap<String, Arc<EntityDefinition>>,
    pub settings: PageSettings,
}

impl EntityCatalog {
    pub fn get(&self, name: &str) -> Option<Arc<EntityDefinition>> {
        self.entities.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entities.keys().cloned().collect();
        names.sort();
        names
    }
}
