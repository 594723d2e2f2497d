//! Builds parameterized SELECT, COUNT, INSERT, UPDATE, DELETE from an entity definition.
//!
//! Identifiers come only from definitions (checked at load). Request-supplied names are
//! matched against the definition before they reach SQL, and every value is bound.

use crate::config::{EntityDefinition, FieldDefinition};
use crate::error::SqlBuildError;
use crate::pool::{BackendAdapter, Dialect, GenericAdapter};
use crate::sql::options::SearchOptions;
use crate::sql::params::{BindType, SqlStatement};
use serde_json::{Map, Value};

pub struct SqlBuilder<'a> {
    entity: &'a EntityDefinition,
    adapter: &'static dyn BackendAdapter,
}

impl<'a> SqlBuilder<'a> {
    pub fn new(entity: &'a EntityDefinition) -> Self {
        SqlBuilder {
            entity,
            adapter: &GenericAdapter,
        }
    }

    /// Target backend; affects only the outer select list.
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.adapter = dialect.adapter();
        self
    }

    fn table(&self) -> &str {
        &self.entity.table_name
    }

    fn pk(&self) -> &str {
        &self.entity.primary_key
    }

    /// Bind type of the key; untyped if the definition lacks the key field.
    fn pk_bind(&self) -> Option<BindType> {
        self.entity.primary_key_field().map(|f| BindType::for_kind(&f.kind))
    }

    /// Bare column names, in field order.
    fn column_list(&self) -> String {
        self.entity
            .fields
            .iter()
            .map(|f| f.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Outer select list as the backend needs it.
    fn projection(&self) -> String {
        self.entity
            .fields
            .iter()
            .map(|f| self.adapter.project(f))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Request names match definitions ignoring case; SQL always uses the defined name.
    fn known_field(&self, name: &str) -> Result<&'a FieldDefinition, SqlBuildError> {
        self.entity.field_case_insensitive(name).ok_or_else(|| SqlBuildError::UnknownField {
            entity: self.entity.name.clone(),
            field: name.to_string(),
        })
    }

    fn search_targets(&self, options: &SearchOptions) -> Result<Vec<&'a FieldDefinition>, SqlBuildError> {
        if options.requested_search_fields().is_empty() {
            return Ok(self.entity.searchable_fields().collect());
        }
        options
            .requested_search_fields()
            .iter()
            .map(|name| {
                let f = self.known_field(name)?;
                if !f.searchable {
                    return Err(SqlBuildError::NotSearchable {
                        entity: self.entity.name.clone(),
                        field: name.clone(),
                    });
                }
                Ok(f)
            })
            .collect()
    }

    /// ` WHERE ...` (or empty) for search and filters; binds into `stmt`.
    fn where_clause(&self, options: &SearchOptions, stmt: &mut SqlStatement) -> Result<String, SqlBuildError> {
        let mut parts = Vec::new();

        if let Some(text) = options.search_text() {
            let mut ors = Vec::new();
            for (i, f) in self.search_targets(options)?.into_iter().enumerate() {
                let param = format!("search_{}", i);
                let column = if f.kind.is_textual() {
                    f.name.clone()
                } else {
                    format!("CAST({} AS VARCHAR(4000))", f.name)
                };
                ors.push(format!("UPPER({}) LIKE UPPER(:{})", column, param));
                stmt.push_param(param, Value::String(format!("%{}%", text)), Some(BindType::Text));
            }
            if !ors.is_empty() {
                parts.push(format!("({})", ors.join(" OR ")));
            }
        }

        let mut i = 0;
        for (name, value) in options.filters() {
            if value.is_null() {
                continue;
            }
            let f = self.known_field(name)?;
            let param = format!("filter_{}", i);
            parts.push(format!("{} = :{}", f.name, param));
            stmt.push_param(param, value.clone(), Some(BindType::for_kind(&f.kind)));
            i += 1;
        }

        Ok(if parts.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", parts.join(" AND "))
        })
    }

    /// `ORDER BY` for the row-number window. The primary key breaks ties so pages never overlap.
    fn order_clause(&self, options: &SearchOptions) -> Result<String, SqlBuildError> {
        let pk = self.pk();
        match options.order_field() {
            Some(name) => {
                let f = self.known_field(name)?;
                let mut clause = format!("ORDER BY {} {}", f.name, options.direction().as_sql());
                if f.name != pk {
                    clause.push_str(&format!(", {} ASC", pk));
                }
                Ok(clause)
            }
            None => Ok(format!("ORDER BY {} {}", pk, options.direction().as_sql())),
        }
    }

    /// One page of rows: rows numbered `offset + 1 ..= offset + page_size` after filtering
    /// and ordering.
    pub fn select(&self, options: &SearchOptions) -> Result<SqlStatement, SqlBuildError> {
        let mut stmt = SqlStatement::new(String::new());
        let where_clause = self.where_clause(options, &mut stmt)?;
        let order = self.order_clause(options)?;
        let cols = self.column_list();
        let inner = format!("SELECT {} FROM {}{}", cols, self.table(), where_clause);
        stmt.sql = format!(
            "SELECT {} FROM (SELECT {}, ROW_NUMBER() OVER ({}) AS rnum FROM ({}) filtered) numbered \
             WHERE rnum > :offset AND rnum <= :limit ORDER BY rnum",
            self.projection(),
            cols,
            order,
            inner
        );
        let offset = options.offset();
        let limit = offset + u64::from(options.current_page_size());
        stmt.push_param("offset", Value::from(offset), Some(BindType::Integer));
        stmt.push_param("limit", Value::from(limit), Some(BindType::Integer));
        Ok(stmt)
    }

    /// Total rows matching the same search and filters as [`SqlBuilder::select`].
    pub fn count(&self, options: &SearchOptions) -> Result<SqlStatement, SqlBuildError> {
        let mut stmt = SqlStatement::new(String::new());
        let where_clause = self.where_clause(options, &mut stmt)?;
        stmt.sql = format!("SELECT COUNT(*) AS total FROM {}{}", self.table(), where_clause);
        Ok(stmt)
    }

    pub fn select_by_id(&self, id: &Value) -> SqlStatement {
        let mut stmt = SqlStatement::new(format!(
            "SELECT {} FROM {} WHERE {} = :id",
            self.projection(),
            self.table(),
            self.pk()
        ));
        stmt.push_param("id", id.clone(), self.pk_bind());
        stmt
    }

    /// INSERT of the writable fields present in `payload`, in field order. Auto-increment
    /// entities ask for the generated key back.
    pub fn insert(&self, payload: &Map<String, Value>) -> Result<SqlStatement, SqlBuildError> {
        let mut stmt = SqlStatement::new(String::new());
        let mut cols = Vec::new();
        let mut placeholders = Vec::new();
        for f in self.entity.writable_fields() {
            if let Some(v) = payload.get(&f.name) {
                cols.push(f.name.as_str());
                placeholders.push(format!(":{}", f.name));
                stmt.push_param(f.name.clone(), v.clone(), Some(BindType::for_kind(&f.kind)));
            }
        }
        if cols.is_empty() {
            return Err(SqlBuildError::NoFieldsToInsert);
        }
        stmt.sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table(),
            cols.join(", "),
            placeholders.join(", ")
        );
        if self.entity.auto_increment {
            stmt.returning = Some(self.pk().to_string());
        }
        Ok(stmt)
    }

    /// UPDATE of the writable fields present in `payload`; the primary key is never set.
    pub fn update(&self, id: &Value, payload: &Map<String, Value>) -> Result<SqlStatement, SqlBuildError> {
        let mut stmt = SqlStatement::new(String::new());
        let mut sets = Vec::new();
        for f in self.entity.writable_fields() {
            if f.primary_key {
                continue;
            }
            if let Some(v) = payload.get(&f.name) {
                sets.push(format!("{} = :{}", f.name, f.name));
                stmt.push_param(f.name.clone(), v.clone(), Some(BindType::for_kind(&f.kind)));
            }
        }
        if sets.is_empty() {
            return Err(SqlBuildError::NoFieldsToUpdate);
        }
        stmt.sql = format!("UPDATE {} SET {} WHERE {} = :id", self.table(), sets.join(", "), self.pk());
        stmt.push_param("id", id.clone(), self.pk_bind());
        Ok(stmt)
    }

    pub fn delete(&self, id: &Value) -> SqlStatement {
        let mut stmt = SqlStatement::new(format!("DELETE FROM {} WHERE {} = :id", self.table(), self.pk()));
        stmt.push_param("id", id.clone(), self.pk_bind());
        stmt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{load_from_str, PageSettings};
    use crate::sql::OrderDirection;
    use serde_json::json;
    use std::sync::Arc;

    fn products() -> Arc<EntityDefinition> {
        let catalog = load_from_str(
            r#"{ "entities": { "products": {
                "tableName": "products", "primaryKey": "ID", "autoIncrement": true,
                "fields": {
                    "ID": { "type": "integer", "primaryKey": true },
                    "NAME": { "type": "varchar2", "length": 100, "required": true, "searchable": true },
                    "PRICE": { "type": "number", "required": true },
                    "CATEGORY": { "type": "varchar2", "searchable": true },
                    "CREATED_AT": { "type": "timestamp", "readonly": true }
                } } } }"#,
        )
        .unwrap();
        catalog.get("products").unwrap()
    }

    fn opts() -> SearchOptions {
        SearchOptions::new(PageSettings::default())
    }

    #[test]
    fn insert_products_scenario() {
        let e = products();
        let payload = json!({ "NAME": "Lamp", "PRICE": 9.99 });
        let stmt = SqlBuilder::new(&e).insert(payload.as_object().unwrap()).unwrap();
        assert_eq!(stmt.sql, "INSERT INTO products (NAME, PRICE) VALUES (:NAME, :PRICE)");
        assert_eq!(stmt.returning.as_deref(), Some("ID"));
        assert_eq!(stmt.param("NAME"), Some(&json!("Lamp")));
        assert_eq!(stmt.param("PRICE"), Some(&json!(9.99)));
    }

    #[test]
    fn insert_never_writes_readonly_or_generated_fields() {
        let e = products();
        let payload = json!({ "ID": 5, "NAME": "Lamp", "CREATED_AT": "2024-01-01" });
        let stmt = SqlBuilder::new(&e).insert(payload.as_object().unwrap()).unwrap();
        assert_eq!(stmt.sql, "INSERT INTO products (NAME) VALUES (:NAME)");
        assert!(stmt.param("ID").is_none());
        assert!(stmt.param("CREATED_AT").is_none());
    }

    #[test]
    fn empty_payloads_fail() {
        let e = products();
        let empty = Map::new();
        assert_eq!(SqlBuilder::new(&e).insert(&empty), Err(SqlBuildError::NoFieldsToInsert));
        let only_pk = json!({ "ID": 1 });
        assert_eq!(
            SqlBuilder::new(&e).update(&json!(1), only_pk.as_object().unwrap()),
            Err(SqlBuildError::NoFieldsToUpdate)
        );
    }

    #[test]
    fn update_excludes_primary_key() {
        let e = products();
        let payload = json!({ "PRICE": 12.5, "NAME": "Desk lamp" });
        let stmt = SqlBuilder::new(&e).update(&json!(7), payload.as_object().unwrap()).unwrap();
        assert_eq!(stmt.sql, "UPDATE products SET NAME = :NAME, PRICE = :PRICE WHERE ID = :id");
        assert_eq!(stmt.param("id"), Some(&json!(7)));
    }

    #[test]
    fn select_with_search_filters_and_window() {
        let e = products();
        let o = opts()
            .search("lamp")
            .filter("CATEGORY", json!("home"))
            .page(2)
            .page_size(5)
            .order_by("PRICE", OrderDirection::Desc);
        let stmt = SqlBuilder::new(&e).select(&o).unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT ID, NAME, PRICE, CATEGORY, CREATED_AT FROM (SELECT ID, NAME, PRICE, CATEGORY, CREATED_AT, \
             ROW_NUMBER() OVER (ORDER BY PRICE DESC, ID ASC) AS rnum FROM (SELECT ID, NAME, PRICE, CATEGORY, \
             CREATED_AT FROM products WHERE (UPPER(NAME) LIKE UPPER(:search_0) OR UPPER(CATEGORY) LIKE \
             UPPER(:search_1)) AND CATEGORY = :filter_0) filtered) numbered WHERE rnum > :offset AND rnum <= :limit \
             ORDER BY rnum"
        );
        assert_eq!(stmt.param("search_0"), Some(&json!("%lamp%")));
        assert_eq!(stmt.param("offset"), Some(&json!(5)));
        assert_eq!(stmt.param("limit"), Some(&json!(10)));
    }

    #[test]
    fn hand_built_definition_without_key_field() {
        let bare = EntityDefinition {
            name: "bare".into(),
            table_name: "bare".into(),
            primary_key: "ID".into(),
            auto_increment: false,
            display_name: "Bare".into(),
            description: None,
            fields: Vec::new(),
            operations: products().operations,
            filters: Default::default(),
            validations: Default::default(),
            default_connection: None,
            allowed_connections: None,
        };
        assert!(bare.primary_key_field().is_none());
        let stmt = SqlBuilder::new(&bare).delete(&json!(3));
        assert_eq!(stmt.sql, "DELETE FROM bare WHERE ID = :id");
        assert_eq!(stmt.param("id"), Some(&json!(3)));
    }

    #[test]
    fn search_text_keeps_its_spaces() {
        let e = products();
        let stmt = SqlBuilder::new(&e).count(&opts().search(" lamp")).unwrap();
        assert_eq!(stmt.param("search_0"), Some(&json!("% lamp%")));
    }

    #[test]
    fn null_filters_and_blank_search_are_ignored() {
        let e = products();
        let o = opts().search("  ").filter("CATEGORY", Value::Null);
        let stmt = SqlBuilder::new(&e).count(&o).unwrap();
        assert_eq!(stmt.sql, "SELECT COUNT(*) AS total FROM products");
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn explicit_search_fields_must_be_searchable() {
        let e = products();
        let o = opts().search("x").search_fields(["PRICE"]);
        assert!(matches!(
            SqlBuilder::new(&e).select(&o),
            Err(SqlBuildError::NotSearchable { .. })
        ));
        let o = opts().search("x").search_fields(["NAME"]);
        let stmt = SqlBuilder::new(&e).count(&o).unwrap();
        assert_eq!(stmt.sql, "SELECT COUNT(*) AS total FROM products WHERE (UPPER(NAME) LIKE UPPER(:search_0))");
    }

    #[test]
    fn unknown_request_names_are_rejected() {
        let e = products();
        let o = opts().order_by("NAME; DROP TABLE products", OrderDirection::Asc);
        assert!(matches!(SqlBuilder::new(&e).select(&o), Err(SqlBuildError::UnknownField { .. })));
        let o = opts().filter("nope", json!(1));
        assert!(matches!(SqlBuilder::new(&e).count(&o), Err(SqlBuildError::UnknownField { .. })));
    }

    #[test]
    fn request_names_resolve_to_defined_case() {
        let e = products();
        let o = opts().order_by("name", OrderDirection::Desc);
        let stmt = SqlBuilder::new(&e).select(&o).unwrap();
        assert!(stmt.sql.contains("ORDER BY NAME DESC, ID ASC"));
    }

    #[test]
    fn default_order_is_primary_key() {
        let e = products();
        let stmt = SqlBuilder::new(&e).select(&opts()).unwrap();
        assert!(stmt.sql.contains("ROW_NUMBER() OVER (ORDER BY ID ASC)"));
    }

    #[test]
    fn postgres_projection_casts_outer_select_only() {
        let e = products();
        let stmt = SqlBuilder::new(&e).dialect(Dialect::Postgres).select_by_id(&json!(3));
        assert_eq!(
            stmt.sql,
            "SELECT CAST(ID AS BIGINT) AS ID, NAME, CAST(PRICE AS DOUBLE PRECISION) AS PRICE, CATEGORY, \
             CAST(CREATED_AT AS TEXT) AS CREATED_AT FROM products WHERE ID = :id"
        );
    }

    #[test]
    fn delete_by_id() {
        let e = products();
        let stmt = SqlBuilder::new(&e).delete(&json!(4));
        assert_eq!(stmt.sql, "DELETE FROM products WHERE ID = :id");
        assert_eq!(stmt.param("id"), Some(&json!(4)));
    }
}
