//! Response envelope returned by every CRUD operation.

use crate::service::validation::FieldError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
    pub cached: bool,
    pub execution_time_ms: f64,
    pub connection_used: String,
}

/// One entry of `errors`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ErrorItem {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl ErrorItem {
    pub const VALIDATION: &'static str = "validation_error";
    pub const NOT_FOUND: &'static str = "not_found";

    pub fn not_found(message: impl Into<String>) -> Self {
        ErrorItem {
            code: Self::NOT_FOUND.to_string(),
            field: None,
            message: message.into(),
            value: None,
        }
    }
}

impl From<FieldError> for ErrorItem {
    fn from(e: FieldError) -> Self {
        ErrorItem {
            code: Self::VALIDATION.to_string(),
            field: Some(e.field),
            message: e.message,
            value: e.value,
        }
    }
}

/// `{ success, data, errors, meta }`. Validation failures and missing rows come back here
/// with `success: false`; everything else that goes wrong is an `EngineError`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CrudResponse<T = Value> {
    pub success: bool,
    pub data: Option<T>,
    pub errors: Option<Vec<ErrorItem>>,
    pub meta: ResponseMeta,
}

impl<T> CrudResponse<T> {
    pub fn ok(data: T, meta: ResponseMeta) -> Self {
        CrudResponse {
            success: true,
            data: Some(data),
            errors: None,
            meta,
        }
    }

    pub fn failed(errors: Vec<ErrorItem>, meta: ResponseMeta) -> Self {
        CrudResponse {
            success: false,
            data: None,
            errors: Some(errors),
            meta,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.errors
            .as_ref()
            .map(|errs| errs.iter().any(|e| e.code == ErrorItem::NOT_FOUND))
            .unwrap_or(false)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
    pub total_pages: u64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl Pagination {
    pub fn new(page: u32, page_size: u32, total: u64) -> Self {
        let size = u64::from(page_size.max(1));
        let total_pages = total.div_ceil(size);
        Pagination {
            page,
            page_size,
            total,
            total_pages,
            has_next: u64::from(page) < total_pages,
            has_prev: page > 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub items: Vec<Value>,
    pub pagination: Pagination,
}

/// Data of a create, update or delete.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteOutcome {
    pub id: Value,
    pub rows_affected: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkOutcome {
    pub count: usize,
    pub rows_affected: u64,
}

impl<T: Serialize> IntoResponse for CrudResponse<T> {
    fn into_response(self) -> Response {
        let status = if self.success {
            StatusCode::OK
        } else if self.is_not_found() {
            StatusCode::NOT_FOUND
        } else {
            StatusCode::UNPROCESSABLE_ENTITY
        };
        (status, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta() -> ResponseMeta {
        ResponseMeta {
            cached: false,
            execution_time_ms: 1.5,
            connection_used: "main".into(),
        }
    }

    #[test]
    fn pagination_edges() {
        let p = Pagination::new(1, 10, 0);
        assert_eq!((p.total_pages, p.has_next, p.has_prev), (0, false, false));
        let p = Pagination::new(2, 10, 25);
        assert_eq!((p.total_pages, p.has_next, p.has_prev), (3, true, true));
        let p = Pagination::new(3, 10, 25);
        assert!(!p.has_next);
    }

    #[test]
    fn envelope_shape() {
        let r = CrudResponse::ok(json!({ "id": 1 }), meta());
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["success"], json!(true));
        assert_eq!(v["errors"], Value::Null);
        assert_eq!(v["meta"]["connectionUsed"], json!("main"));
        assert_eq!(v["meta"]["executionTimeMs"], json!(1.5));
    }

    #[test]
    fn status_follows_outcome() {
        let r: CrudResponse = CrudResponse::failed(vec![ErrorItem::not_found("gone")], meta());
        assert_eq!(r.into_response().status(), StatusCode::NOT_FOUND);
        let item = ErrorItem::from(FieldError {
            field: "NAME".into(),
            message: "NAME is required".into(),
            value: None,
        });
        let r: CrudResponse = CrudResponse::failed(vec![item], meta());
        assert_eq!(r.into_response().status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
