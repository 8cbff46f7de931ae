//! Behaviour every backend must share, run against each implementation.

use super::{LocalBackend, MemoryBackend, StorageBackend};
use crate::error::ErrorKind;
use rstest::rstest;
use serde_json::{Value, json};
use std::time::Duration;

enum Kind {
    Memory,
    Local,
}

/// The temporary directory has to outlive the backend using it.
fn open(kind: Kind) -> (Option<tempfile::TempDir>, Box<dyn StorageBackend>) {
    match kind {
        Kind::Memory => (None, Box::new(MemoryBackend::default())),
        Kind::Local => {
            let dir = tempfile::tempdir().unwrap();
            let backend = LocalBackend::new("contract", dir.path()).unwrap();
            (Some(dir), Box::new(backend))
        },
    }
}

fn sorted(mut keys: Vec<String>) -> Vec<String> {
    keys.sort();
    keys
}

async fn check_round_trip(backend: &dyn StorageBackend) {
    let values = [
        json!({"title": "Movie", "play_time": 60, "nested": {"list": [1, 2.5, null, "x"]}}),
        json!("plain string"),
        json!(42),
        json!([]),
        json!(null),
    ];
    for (n, value) in values.iter().enumerate() {
        let key = format!("u/alice/play/siteA+{n}");
        backend.set(&key, value, None).await.unwrap();
        assert_eq!(backend.get(&key).await.unwrap().as_ref(), Some(value), "{key}");
    }
    backend.set("u/alice/play/siteA+0", &json!({"replaced": true}), None).await.unwrap();
    assert_eq!(backend.get("u/alice/play/siteA+0").await.unwrap(), Some(json!({"replaced": true})));
    assert_eq!(backend.get("u/alice/play/missing").await.unwrap(), None);
    assert!(!backend.exists("u/alice/play/missing").await.unwrap());
}

async fn check_lookalike_values(backend: &dyn StorageBackend) {
    let values = [
        json!({"$expireAt": 1, "$value": {"title": "Movie"}}),
        json!({"$expireAt": null, "$value": 2}),
        json!({"$expireAt": "soon", "$value": 3}),
        json!({"$expireAt": 1, "$value": 4, "extra": true}),
    ];
    for (n, value) in values.iter().enumerate() {
        let key = format!("lookalike/{n}");
        backend.set(&key, value, None).await.unwrap();
        assert_eq!(backend.get(&key).await.unwrap().as_ref(), Some(value), "{key}");
        assert!(backend.exists(&key).await.unwrap());
    }
    assert_eq!(backend.keys("lookalike/").await.unwrap().len(), values.len());
}

async fn check_delete_idempotent(backend: &dyn StorageBackend) {
    backend.set("admin/config", &json!({}), None).await.unwrap();
    backend.delete("admin/config").await.unwrap();
    assert_eq!(backend.get("admin/config").await.unwrap(), None);
    backend.delete("admin/config").await.unwrap();
    backend.delete("never/written").await.unwrap();
}

async fn check_ttl_expiry(backend: &dyn StorageBackend) {
    backend.set("cache/long", &json!("kept"), Some(Duration::from_secs(60))).await.unwrap();
    backend.set("cache/short", &json!("gone"), Some(Duration::from_millis(250))).await.unwrap();
    assert_eq!(backend.get("cache/short").await.unwrap(), Some(json!("gone")));
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(backend.get("cache/short").await.unwrap(), None);
    assert!(!backend.exists("cache/short").await.unwrap());
    assert_eq!(backend.get("cache/long").await.unwrap(), Some(json!("kept")));
    // Rewriting without a TTL makes the value permanent again.
    backend.set("cache/short", &json!("back"), None).await.unwrap();
    assert_eq!(backend.get("cache/short").await.unwrap(), Some(json!("back")));
}

async fn check_prefix_listing(backend: &dyn StorageBackend) {
    for key in ["u/alice/play/siteA+1", "u/alice/playlist", "u/alice/fav/siteA+1", "u/albert/play/siteB+2", "u/bob"] {
        backend.set(key, &json!(1), None).await.unwrap();
    }
    assert_eq!(
        sorted(backend.keys("u/alice/pl").await.unwrap()),
        vec!["u/alice/play/siteA+1", "u/alice/playlist"],
    );
    assert_eq!(
        sorted(backend.keys("u/al").await.unwrap()),
        vec!["u/albert/play/siteB+2", "u/alice/fav/siteA+1", "u/alice/play/siteA+1", "u/alice/playlist"],
    );
    assert_eq!(backend.keys("u/").await.unwrap().len(), 5);
    assert_eq!(backend.keys("").await.unwrap().len(), 5);
    assert!(backend.keys("nothing/").await.unwrap().is_empty());
}

async fn check_concurrent_writes(backend: &dyn StorageBackend) {
    let writers = (0..16).map(|n| async move {
        let value = json!({"writer": n, "padding": "x".repeat(512)});
        backend.set("u/alice/play/siteA+1", &value, None).await.unwrap();
        backend.set(&format!("u/alice/play/siteB+{n}"), &value, None).await.unwrap();
    });
    futures::future::join_all(writers).await;

    let Some(Value::Object(last)) = backend.get("u/alice/play/siteA+1").await.unwrap() else {
        panic!("concurrent writes left no readable value");
    };
    assert!(last["writer"].as_u64().is_some_and(|n| n < 16));
    assert_eq!(last["padding"].as_str().map(str::len), Some(512));
    assert_eq!(backend.keys("u/alice/play/siteB+").await.unwrap().len(), 16);
}

async fn check_invalid_keys(backend: &dyn StorageBackend) {
    for key in ["", "/abs", "a//b", "a/../b", "a/"] {
        let err = backend.set(key, &json!(1), None).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidKey(_)), "{key:?}");
        assert!(backend.get(key).await.is_err(), "{key:?}");
    }
    assert!(backend.keys("../").await.is_err());
}

#[rstest]
#[case::memory(Kind::Memory)]
#[case::local(Kind::Local)]
#[tokio::test(flavor = "multi_thread")]
async fn test_backend_contract(#[case] kind: Kind) {
    let (_dir, backend) = open(kind);
    check_round_trip(&*backend).await;
    check_lookalike_values(&*backend).await;
    check_delete_idempotent(&*backend).await;
    check_ttl_expiry(&*backend).await;
    check_invalid_keys(&*backend).await;
}

// Listings are checked on a fresh backend so earlier checks don't add keys.
#[rstest]
#[case::memory(Kind::Memory)]
#[case::local(Kind::Local)]
#[tokio::test(flavor = "multi_thread")]
async fn test_backend_listing_contract(#[case] kind: Kind) {
    let (_dir, backend) = open(kind);
    check_prefix_listing(&*backend).await;
}

#[rstest]
#[case::memory(Kind::Memory)]
#[case::local(Kind::Local)]
#[tokio::test(flavor = "multi_thread")]
async fn test_backend_concurrency_contract(#[case] kind: Kind) {
    let (_dir, backend) = open(kind);
    check_concurrent_writes(&*backend).await;
}

#[cfg(feature = "sqlite")]
#[tokio::test(flavor = "multi_thread")]
async fn test_sqlite_contract() {
    let connect = || super::SqliteBackend::connect_in_memory("contract");
    check_round_trip(&connect().await.unwrap()).await;
    check_lookalike_values(&connect().await.unwrap()).await;
    check_delete_idempotent(&connect().await.unwrap()).await;
    check_ttl_expiry(&connect().await.unwrap()).await;
    check_invalid_keys(&connect().await.unwrap()).await;
    check_prefix_listing(&connect().await.unwrap()).await;
    check_concurrent_writes(&connect().await.unwrap()).await;
}
