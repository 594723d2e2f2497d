//! Cache keys and invalidation patterns for entity reads.
//!
//! Keys carry the resolved connection name so reads against different backends never
//! share an entry.

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// `entity:<name>:list:<canonical options>:conn:<connection>`
pub fn list_key<T: Serialize>(entity: &str, options: &T, connection: &str) -> String {
    let canonical = serde_json::to_value(options)
        .map(|v| canonical_json(&v))
        .unwrap_or_default();
    format!("entity:{}:list:{}:conn:{}", entity, canonical, connection)
}

/// `entity:<name>:item:<canonical id>:conn:<connection>`
pub fn item_key(entity: &str, id: &Value, connection: &str) -> String {
    format!("entity:{}:item:{}:conn:{}", entity, canonical_json(id), connection)
}

/// Every list entry of an entity, on any connection.
pub fn list_pattern(entity: &str) -> Option<Regex> {
    Regex::new(&format!("^entity:{}:list:", regex::escape(entity))).ok()
}

/// Every list entry of an entity plus the entries for one id, on any connection.
pub fn entity_and_item_pattern(entity: &str, id: &Value) -> Option<Regex> {
    Regex::new(&format!(
        "^entity:{}:(list:|item:{}:conn:)",
        regex::escape(entity),
        regex::escape(&canonical_json(id))
    ))
    .ok()
}

/// JSON text with object keys sorted at every level, so equal values give equal keys
/// regardless of insertion order.
pub fn canonical_json(v: &Value) -> String {
    let mut out = String::new();
    write_sorted(v, &mut out);
    out
}

// Sorts explicitly so the result holds even if serde_json is built with preserve_order.
fn write_sorted(v: &Value, out: &mut String) {
    match v {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            out.push('{');
            for (i, (k, child)) in sorted.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(k.clone()).to_string());
                out.push(':');
                write_sorted(child, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_sorted(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_form_ignores_key_order() {
        let a = json!({ "b": 1, "a": { "y": [2, { "q": 1, "p": 0 }], "x": null } });
        let b = json!({ "a": { "x": null, "y": [2, { "p": 0, "q": 1 }] }, "b": 1 });
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(canonical_json(&json!({ "b": 1, "a": 2 })), r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn keys_separate_connections() {
        let opts = json!({ "page": 1 });
        assert_ne!(list_key("products", &opts, "main"), list_key("products", &opts, "replica"));
        assert_eq!(item_key("products", &json!(5), "main"), "entity:products:item:5:conn:main");
    }

    #[test]
    fn item_pattern_does_not_match_prefix_ids() {
        let re = entity_and_item_pattern("products", &json!(5)).unwrap();
        assert!(re.is_match("entity:products:item:5:conn:main"));
        assert!(re.is_match("entity:products:list:{}:conn:main"));
        assert!(!re.is_match("entity:products:item:55:conn:main"));
        assert!(!re.is_match("entity:product:list:{}:conn:main"));
        let re = list_pattern("products").unwrap();
        assert!(!re.is_match("entity:products:item:5:conn:main"));
    }
}
