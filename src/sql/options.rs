//! Search, filter, ordering and paging parameters for list queries.

use crate::config::{EntityDefinition, PageSettings};
use crate::error::SqlBuildError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

impl OrderDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        }
    }

    /// Lenient parse for query-string input; anything but `desc` is ascending.
    pub fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("desc") {
            OrderDirection::Desc
        } else {
            OrderDirection::Asc
        }
    }
}

/// List query parameters. `page >= 1` and `1 <= page_size <= max_page_size` hold after
/// construction and after every setter.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOptions {
    search: Option<String>,
    search_fields: Vec<String>,
    filters: BTreeMap<String, Value>,
    page: u32,
    page_size: u32,
    order_by: Option<String>,
    order_direction: OrderDirection,
    #[serde(skip)]
    max_page_size: u32,
}

impl SearchOptions {
    pub fn new(settings: PageSettings) -> Self {
        let max = settings.max_page_size.max(1);
        SearchOptions {
            search: None,
            search_fields: Vec::new(),
            filters: BTreeMap::new(),
            page: 1,
            page_size: settings.default_page_size.clamp(1, max),
            order_by: None,
            order_direction: OrderDirection::Asc,
            max_page_size: max,
        }
    }

    /// Free-text search, matched as given; empty or whitespace-only text disables search.
    pub fn search(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        self.search = if text.trim().is_empty() { None } else { Some(text) };
        self
    }

    pub fn search_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.search_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Equality filter. Null values are kept here and skipped when the statement is built.
    pub fn filter(mut self, field: impl Into<String>, value: Value) -> Self {
        self.filters.insert(field.into(), value);
        self
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = page.max(1);
        self
    }

    pub fn page_size(mut self, size: u32) -> Self {
        self.page_size = size.clamp(1, self.max_page_size);
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: OrderDirection) -> Self {
        self.order_by = Some(field.into());
        self.order_direction = direction;
        self
    }

    /// Add the equality filter of a named preset defined on the entity.
    pub fn apply_preset(self, entity: &EntityDefinition, preset: &str) -> Result<Self, SqlBuildError> {
        let p = entity.filters.get(preset).ok_or_else(|| SqlBuildError::UnknownPreset {
            entity: entity.name.clone(),
            preset: preset.to_string(),
        })?;
        let (field, value) = (p.field.clone(), p.value.clone());
        Ok(self.filter(field, value))
    }

    pub fn search_text(&self) -> Option<&str> {
        self.search.as_deref()
    }

    pub fn requested_search_fields(&self) -> &[String] {
        &self.search_fields
    }

    pub fn filters(&self) -> &BTreeMap<String, Value> {
        &self.filters
    }

    pub(crate) fn filters_mut(&mut self) -> &mut BTreeMap<String, Value> {
        &mut self.filters
    }

    pub fn current_page(&self) -> u32 {
        self.page
    }

    pub fn current_page_size(&self) -> u32 {
        self.page_size
    }

    pub fn order_field(&self) -> Option<&str> {
        self.order_by.as_deref()
    }

    pub fn direction(&self) -> OrderDirection {
        self.order_direction
    }

    pub fn max_page_size(&self) -> u32 {
        self.max_page_size
    }

    /// Rows skipped before this page: `(page - 1) * page_size`.
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }
}
