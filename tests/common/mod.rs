#![allow(dead_code)]

use entity_crud::{ConnectionConfig, ConnectionRegistry, EntityStore, RegistryOptions, SqlStatement};
use std::path::Path;
use std::sync::Arc;

pub const PRODUCTS: &str = r#"{
    "entities": {
        "products": {
            "tableName": "products",
            "primaryKey": "ID",
            "autoIncrement": true,
            "displayName": "Product",
            "fields": {
                "ID": { "type": "integer", "primaryKey": true, "autoIncrement": true },
                "NAME": { "type": "string", "length": 100, "required": true, "searchable": true },
                "PRICE": { "type": "number", "required": true }
            },
            "filters": {
                "cheap": { "field": "PRICE", "operator": "eq", "value": 1 }
            }
        },
        "audit": {
            "tableName": "audit_log",
            "primaryKey": "ID",
            "autoIncrement": true,
            "operations": { "delete": false, "update": false, "paginate": false },
            "fields": {
                "ID": { "type": "integer", "primaryKey": true, "autoIncrement": true },
                "NOTE": { "type": "string", "length": 200 }
            }
        }
    },
    "settings": { "defaultPageSize": 10, "maxPageSize": 50 }
}"#;

pub const PRODUCTS_DDL: &str =
    "CREATE TABLE products (ID INTEGER PRIMARY KEY AUTOINCREMENT, NAME TEXT NOT NULL, PRICE REAL NOT NULL)";

pub const AUDIT_DDL: &str = "CREATE TABLE audit_log (ID INTEGER PRIMARY KEY AUTOINCREMENT, NOTE TEXT)";

/// Single-connection SQLite pool in `dir`, created on first use.
pub fn sqlite(dir: &Path, name: &str) -> ConnectionConfig {
    let path = dir.join(format!("{}.db", name));
    ConnectionConfig::new(name, format!("sqlite://{}?mode=rwc", path.display())).pool_size(0, 1)
}

pub fn registry(dir: &Path, names: &[&str]) -> Arc<ConnectionRegistry> {
    let configs = names.iter().map(|n| sqlite(dir, n)).collect();
    Arc::new(ConnectionRegistry::from_configs(configs, RegistryOptions::default()).unwrap())
}

pub async fn run(registry: &ConnectionRegistry, connection: &str, sql: &str) {
    registry.execute(&SqlStatement::new(sql), Some(connection)).await.unwrap();
}

pub async fn count(registry: &ConnectionRegistry, connection: &str, table: &str) -> i64 {
    let rows = registry
        .query(&SqlStatement::new(format!("SELECT COUNT(*) AS n FROM {}", table)), Some(connection))
        .await
        .unwrap();
    rows[0].get("n").and_then(|c| c.as_i64()).unwrap()
}

pub fn store() -> Arc<EntityStore> {
    Arc::new(EntityStore::load_from_str(PRODUCTS).unwrap())
}
