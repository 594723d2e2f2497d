//! Connection override supplied by the transport (`X-Database-Connection` header).

use crate::service::ConnectionRequest;
use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::request::Parts,
};

pub const CONNECTION_HEADER: &str = "X-Database-Connection";

/// Optional connection name from the `X-Database-Connection` header. Blank values count as absent.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionOverride(pub Option<String>);

impl ConnectionOverride {
    /// Request for the routing strategy, with `explicit` (e.g. a query parameter) ranked above the header.
    pub fn into_request(self, explicit: Option<String>) -> ConnectionRequest {
        ConnectionRequest {
            explicit: explicit.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
            transport: self.0,
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for ConnectionOverride
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(CONNECTION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        Ok(ConnectionOverride(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(header: Option<&str>) -> ConnectionOverride {
        let mut builder = Request::builder().uri("/products");
        if let Some(h) = header {
            builder = builder.header(CONNECTION_HEADER, h);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        ConnectionOverride::from_request_parts(&mut parts, &()).await.unwrap()
    }

    #[tokio::test]
    async fn reads_header() {
        assert_eq!(extract(Some(" replica ")).await.0.as_deref(), Some("replica"));
        assert_eq!(extract(Some("  ")).await.0, None);
        assert_eq!(extract(None).await.0, None);
    }

    #[test]
    fn explicit_name_ranks_first() {
        let req = ConnectionOverride(Some("replica".into())).into_request(Some("main".into()));
        assert_eq!(req.explicit.as_deref(), Some("main"));
        assert_eq!(req.transport.as_deref(), Some("replica"));
        let req = ConnectionOverride(None).into_request(Some(" ".into()));
        assert_eq!(req, ConnectionRequest::default());
    }
}
