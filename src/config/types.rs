//! Raw config types matching the entity definition JSON document.

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Whole entity definition document: `{ "entities": { ... }, "settings": { ... } }`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntityConfigFile {
    #[serde(default)]
    pub entities: HashMap<String, EntityConfig>,
    #[serde(default)]
    pub settings: SettingsConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsConfig {
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,
    #[serde(default = "max_page_size")]
    pub max_page_size: u32,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        SettingsConfig {
            default_page_size: default_page_size(),
            max_page_size: max_page_size(),
        }
    }
}

fn default_page_size() -> u32 {
    10
}

fn max_page_size() -> u32 {
    100
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityConfig {
    pub table_name: String,
    pub primary_key: String,
    #[serde(default)]
    pub auto_increment: bool,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub default_connection: Option<String>,
    #[serde(default)]
    pub allowed_connections: Option<Vec<String>>,
    pub fields: OrderedFields,
    #[serde(default)]
    pub operations: OperationsConfig,
    #[serde(default)]
    pub filters: HashMap<String, FilterConfig>,
    #[serde(default)]
    pub validations: HashMap<String, ValidationConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldConfig {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub length: Option<u32>,
    #[serde(default)]
    pub precision: Option<u32>,
    #[serde(default)]
    pub scale: Option<u32>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub auto_increment: bool,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub searchable: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub default_value: Option<Value>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Allowed values; makes the field enumerated.
    #[serde(default)]
    pub values: Option<Vec<AllowedValueConfig>>,
}

/// Enumerated value: either a bare scalar or `{ "value": ..., "label": "..." }`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AllowedValueConfig {
    Labeled { value: Value, label: String },
    Bare(Value),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OperationsConfig {
    #[serde(default = "default_true")]
    pub create: bool,
    #[serde(default = "default_true")]
    pub read: bool,
    #[serde(default = "default_true")]
    pub update: bool,
    #[serde(default = "default_true")]
    pub delete: bool,
    #[serde(default = "default_true")]
    pub search: bool,
    #[serde(default = "default_true")]
    pub paginate: bool,
}

impl Default for OperationsConfig {
    fn default() -> Self {
        OperationsConfig {
            create: true,
            read: true,
            update: true,
            delete: true,
            search: true,
            paginate: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterConfig {
    pub field: String,
    #[serde(default)]
    pub operator: Option<String>,
    pub value: Value,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationConfig {
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub min_length: Option<u32>,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub allowed_values: Option<Vec<Value>>,
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Field map that keeps document order; statements list columns in this order.
#[derive(Clone, Debug, Default)]
pub struct OrderedFields(pub Vec<(String, FieldConfig)>);

impl<'de> Deserialize<'de> for OrderedFields {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct FieldsVisitor;

        impl<'de> Visitor<'de> for FieldsVisitor {
            type Value = OrderedFields;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of field name to field definition")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut out: Vec<(String, FieldConfig)> = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((name, field)) = map.next_entry::<String, FieldConfig>()? {
                    if out.iter().any(|(n, _)| *n == name) {
                        return Err(serde::de::Error::custom(format!("duplicate field '{}'", name)));
                    }
                    out.push((name, field));
                }
                Ok(OrderedFields(out))
            }
        }

        deserializer.deserialize_map(FieldsVisitor)
    }
}

impl Serialize for OrderedFields {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_map(self.0.iter().map(|(k, v)| (k, v)))
    }
}
