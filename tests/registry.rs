mod common;

use common::{count, registry, run, sqlite, store, PRODUCTS_DDL};
use entity_crud::{
    ConnectionError, ConnectionRegistry, ConnectionRequest, CrudService, EngineError, EntityStore, RegistryOptions,
    SqlStatement,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn first_registered_pool_is_default() {
    let dir = tempfile::tempdir().unwrap();
    let reg = registry(dir.path(), &["main", "replica"]);
    assert_eq!(reg.default_name().as_deref(), Some("main"));
    assert_eq!(reg.resolve(None).unwrap().name(), "main");
    assert_eq!(reg.names(), vec!["main", "replica"]);

    let mut flagged = sqlite(dir.path(), "archive");
    flagged.is_default = true;
    reg.register(flagged).unwrap();
    assert_eq!(reg.default_name().as_deref(), Some("archive"));

    reg.set_default("replica").unwrap();
    assert_eq!(reg.resolve(None).unwrap().name(), "replica");
    assert!(matches!(reg.set_default("nope"), Err(ConnectionError::Unknown(_))));
}

#[tokio::test]
async fn duplicate_unknown_and_inactive_names() {
    let dir = tempfile::tempdir().unwrap();
    let reg = registry(dir.path(), &["main", "replica"]);

    assert!(matches!(
        reg.register(sqlite(dir.path(), "main")),
        Err(ConnectionError::AlreadyRegistered(_))
    ));
    assert!(matches!(reg.resolve(Some("nope")), Err(ConnectionError::Unknown(_))));

    reg.deactivate("main").await.unwrap();
    assert!(matches!(reg.resolve(Some("main")), Err(ConnectionError::Inactive(_))));
    assert_eq!(reg.default_name().as_deref(), Some("replica"));
    let err = reg.execute(&SqlStatement::new("SELECT 1"), Some("main")).await.unwrap_err();
    assert!(matches!(err, EngineError::Connection(ConnectionError::Inactive(_))));

    // A deactivated name may be registered again.
    reg.register(sqlite(dir.path(), "main")).unwrap();
    assert!(reg.resolve(Some("main")).is_ok());
}

#[tokio::test]
async fn empty_registry_has_no_default() {
    let reg = ConnectionRegistry::new(RegistryOptions::default());
    assert!(matches!(reg.resolve(None), Err(ConnectionError::NoDefault)));
    let probe = reg.test(None).await;
    assert!(!probe.ok);
}

#[tokio::test]
async fn failed_transaction_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let reg = registry(dir.path(), &["main"]);
    run(&reg, "main", "CREATE TABLE t (X INTEGER UNIQUE)").await;

    let insert = |x: i64| SqlStatement::new("INSERT INTO t (X) VALUES (:x)").bind("x", json!(x));
    let err = reg
        .transaction(&[insert(1), insert(2), insert(1)], None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Backend { ref connection, .. } if connection == "main"));
    assert_eq!(count(&reg, "main", "t").await, 0);

    let affected = reg.transaction(&[insert(1), insert(2)], None).await.unwrap();
    assert_eq!(affected, vec![1, 1]);
    assert_eq!(count(&reg, "main", "t").await, 2);
}

#[tokio::test]
async fn probes_and_listing() {
    let dir = tempfile::tempdir().unwrap();
    let reg = registry(dir.path(), &["main", "replica"]);
    let probe = reg.test(Some("main")).await;
    assert!(probe.ok, "{:?}", probe.error);
    assert_eq!(reg.test_all().await.len(), 2);

    let listing = reg.connections();
    assert_eq!(listing.len(), 2);
    assert!(listing[0].is_default);
    assert!(listing.iter().all(|c| c.active));

    reg.shutdown_all().await;
    assert!(reg.names().is_empty());
    assert_eq!(reg.summary().total, 0);
}

#[tokio::test]
async fn statement_timeout_applies_to_slow_work() {
    let dir = tempfile::tempdir().unwrap();
    let reg = ConnectionRegistry::from_configs(
        vec![sqlite(dir.path(), "main")],
        RegistryOptions {
            statement_timeout: Some(Duration::from_millis(1)),
        },
    )
    .unwrap();
    // A recursive CTE long enough to outlast the limit.
    let slow = SqlStatement::new(
        "WITH RECURSIVE c(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM c WHERE n < 5000000) SELECT COUNT(*) FROM c",
    );
    let err = reg.query(&slow, None).await.unwrap_err();
    assert!(matches!(err, EngineError::Connection(ConnectionError::StatementTimeout { .. })));
}

#[tokio::test]
async fn request_connection_beats_entity_default() {
    let dir = tempfile::tempdir().unwrap();
    let reg = registry(dir.path(), &["a", "b"]);
    for name in ["a", "b"] {
        run(&reg, name, PRODUCTS_DDL).await;
        run(
            &reg,
            name,
            &format!("INSERT INTO products (NAME, PRICE) VALUES ('from {}', 1)", name),
        )
        .await;
    }
    let defs = common::PRODUCTS.replace(
        r#""displayName": "Product","#,
        r#""displayName": "Product", "defaultConnection": "b", "allowedConnections": ["a", "b"],"#,
    );
    let entities = Arc::new(EntityStore::load_from_str(&defs).unwrap());
    let svc = CrudService::new(entities, reg);

    let via_a = svc
        .get_by_id("products", &json!(1), &ConnectionRequest::explicit("a"))
        .await
        .unwrap();
    assert_eq!(via_a.meta.connection_used, "a");
    assert_eq!(via_a.data.unwrap()["NAME"], json!("from a"));

    let via_default = svc.get_by_id("products", &json!(1), &ConnectionRequest::default()).await.unwrap();
    assert_eq!(via_default.meta.connection_used, "b");
    assert_eq!(via_default.data.unwrap()["NAME"], json!("from b"));

    let via_header = svc
        .list("products", svc.options(), &ConnectionRequest::transport("a"))
        .await
        .unwrap();
    assert_eq!(via_header.meta.connection_used, "a");

    let err = svc
        .list("products", svc.options(), &ConnectionRequest::explicit("c"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Connection(ConnectionError::NotAllowed { .. })));

    // No default on the entity: the registry's default ("a") serves it.
    let plain = CrudService::new(store(), svc.registry().clone());
    let via_system = plain.get_by_id("products", &json!(1), &ConnectionRequest::default()).await.unwrap();
    assert_eq!(via_system.meta.connection_used, "a");
}
