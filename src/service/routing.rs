//! Which connection a request runs on.

use crate::config::EntityDefinition;
use crate::error::ConnectionError;

/// Connection names a caller supplied for one request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionRequest {
    /// Named by the caller directly (e.g. a query parameter).
    pub explicit: Option<String>,
    /// Supplied by the transport (e.g. the `X-Database-Connection` header).
    pub transport: Option<String>,
}

impl ConnectionRequest {
    pub fn explicit(name: impl Into<String>) -> Self {
        ConnectionRequest {
            explicit: Some(name.into()),
            transport: None,
        }
    }

    pub fn transport(name: impl Into<String>) -> Self {
        ConnectionRequest {
            explicit: None,
            transport: Some(name.into()),
        }
    }
}

/// Picks a connection name for a request; `None` means the registry default.
pub trait ConnectionStrategy: Send + Sync {
    fn select(&self, request: &ConnectionRequest, entity: &EntityDefinition) -> Result<Option<String>, ConnectionError>;
}

/// Explicit name, then transport override, then the entity's default, then the system default.
/// Caller-supplied names must be in the entity's allowed list when it has one.
#[derive(Clone, Copy, Debug, Default)]
pub struct PrecedenceStrategy;

impl ConnectionStrategy for PrecedenceStrategy {
    fn select(&self, request: &ConnectionRequest, entity: &EntityDefinition) -> Result<Option<String>, ConnectionError> {
        let requested = populated(&request.explicit).or_else(|| populated(&request.transport));
        if let Some(name) = requested {
            if !entity.allows_connection(name) {
                return Err(ConnectionError::NotAllowed {
                    entity: entity.name.clone(),
                    connection: name.to_string(),
                });
            }
            return Ok(Some(name.to_string()));
        }
        Ok(entity.default_connection.clone())
    }
}

fn populated(name: &Option<String>) -> Option<&str> {
    name.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_from_str;
    use std::sync::Arc;

    fn entity(extra: &str) -> Arc<EntityDefinition> {
        let json = format!(
            r#"{{ "entities": {{ "orders": {{ "tableName": "orders", "primaryKey": "ID", {}
                "fields": {{ "ID": {{ "type": "integer", "primaryKey": true }} }} }} }} }}"#,
            extra
        );
        load_from_str(&json).unwrap().get("orders").unwrap()
    }

    #[test]
    fn precedence_order() {
        let e = entity(r#""defaultConnection": "reporting","#);
        let s = PrecedenceStrategy;
        let both = ConnectionRequest {
            explicit: Some("a".into()),
            transport: Some("b".into()),
        };
        assert_eq!(s.select(&both, &e).unwrap().as_deref(), Some("a"));
        assert_eq!(s.select(&ConnectionRequest::transport("b"), &e).unwrap().as_deref(), Some("b"));
        assert_eq!(s.select(&ConnectionRequest::default(), &e).unwrap().as_deref(), Some("reporting"));
        assert_eq!(s.select(&ConnectionRequest::default(), &entity("")).unwrap(), None);
    }

    #[test]
    fn blank_names_fall_through() {
        let e = entity(r#""defaultConnection": "reporting","#);
        let s = PrecedenceStrategy;
        let blank_explicit = ConnectionRequest {
            explicit: Some("".into()),
            transport: Some(" replica ".into()),
        };
        assert_eq!(s.select(&blank_explicit, &e).unwrap().as_deref(), Some("replica"));
        let all_blank = ConnectionRequest {
            explicit: Some("  ".into()),
            transport: Some("".into()),
        };
        assert_eq!(s.select(&all_blank, &e).unwrap().as_deref(), Some("reporting"));
    }

    #[test]
    fn allowed_list_is_enforced() {
        let e = entity(r#""defaultConnection": "main", "allowedConnections": ["main", "replica"],"#);
        let s = PrecedenceStrategy;
        assert!(s.select(&ConnectionRequest::explicit("replica"), &e).is_ok());
        assert!(matches!(
            s.select(&ConnectionRequest::transport("archive"), &e),
            Err(ConnectionError::NotAllowed { .. })
        ));
    }
}
