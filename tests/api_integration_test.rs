//! End-to-end tests for the HTTP API, driven through the axum router with
//! tower's `oneshot` against a real database in a temp directory.

use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use emberdb::server::{router, AppState};
use emberdb::tmpfs::TempDir;
use emberdb::{Config, Database, Storage};

async fn start_db(dir: &Path, shards: usize, cache_capacity: usize) -> Arc<Database> {
    let config = Config::new(dir).shards(shards).cache_capacity(cache_capacity);
    let db = Arc::new(Database::open(config).unwrap());
    db.start().await.unwrap();
    db
}

fn app(db: &Arc<Database>) -> axum::Router {
    router(AppState { db: Arc::clone(db) })
}

async fn post(app: axum::Router, path: &str, body: &str) -> (StatusCode, String) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(path)
                .header("content-type", "application/json")
                .body(Body::from(body.to_owned()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

/// (path, request body, expected status, expected response body)
const SCENARIOS: &[(&str, &str, u16, &str)] = &[
    ("/v1/get", r#"{ "key" : "1111" }"#, 404, ""),
    ("/v1/set", r#"{ "key" : "2222", "value" : "bbbb" }"#, 200, ""),
    (
        "/v1/get",
        r#"{ "key" : "2222" }"#,
        200,
        r#"{ "key" : "2222", "value" : "bbbb" }"#,
    ),
    ("/v1/delete", r#"{ "key" : "1111" }"#, 200, ""),
    ("/v1/set", r#"{ "key" : "2233", "value" : "cccc" }"#, 200, ""),
    (
        "/v1/query",
        r#"{ "prefix" : "22" }"#,
        200,
        r#"[ { "key" : "2222" }, { "key" : "2233" } ]"#,
    ),
    ("/v1/delete", r#"{ "key" : "2222" }"#, 200, ""),
    ("/v1/delete", r#"{ "key" : "2222" }"#, 200, ""),
    (
        "/v1/query",
        r#"{ "prefix" : "22" }"#,
        200,
        r#"[ { "key" : "2233" } ]"#,
    ),
];

async fn run_scenarios(db: &Arc<Database>) {
    for (i, (path, body, status, expected)) in SCENARIOS.iter().enumerate() {
        let (got_status, got_body) = post(app(db), path, body).await;
        assert_eq!(got_status.as_u16(), *status, "scenario #{i} status");
        assert_eq!(&got_body, expected, "scenario #{i} body");
    }
}

#[tokio::test]
async fn test_api_scenarios() {
    let dir = TempDir::new().unwrap();
    let db = start_db(dir.path(), 2, 20).await;

    run_scenarios(&db).await;

    db.stop().await.unwrap();
}

#[tokio::test]
async fn test_restart_preserves_live_keys() {
    let dir = TempDir::new().unwrap();

    let db = start_db(dir.path(), 2, 20).await;
    run_scenarios(&db).await;
    db.stop().await.unwrap();
    drop(db);

    // Same working directory, fresh process state: the disk tier rebuilds
    // its index from the shard files.
    let db = start_db(dir.path(), 2, 20).await;
    let (status, body) = post(app(&db), "/v1/query", r#"{ "prefix" : "" }"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, r#"[ { "key" : "2233" } ]"#);

    db.stop().await.unwrap();
}

#[tokio::test]
async fn test_lru_eviction_falls_back_to_disk() {
    let dir = TempDir::new().unwrap();
    let db = start_db(dir.path(), 1, 2).await;

    for (key, value) in [("a", "va"), ("b", "vb"), ("c", "vc")] {
        let (status, _) = post(
            app(&db),
            "/v1/set",
            &format!(r#"{{ "key" : "{key}", "value" : "{value}" }}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    // "a" has been evicted from the capacity-2 cache; the get must succeed
    // from the disk tier with the original bytes.
    let (status, body) = post(app(&db), "/v1/get", r#"{ "key" : "a" }"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, r#"{ "key" : "a", "value" : "va" }"#);

    db.stop().await.unwrap();
}

#[tokio::test]
async fn test_get_after_set_and_overwrite() {
    let dir = TempDir::new().unwrap();
    let db = start_db(dir.path(), 2, 20).await;

    let (status, _) = post(
        app(&db),
        "/v1/set",
        r#"{ "key" : "k", "value" : "first" }"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = post(
        app(&db),
        "/v1/set",
        r#"{ "key" : "k", "value" : "second" }"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = post(app(&db), "/v1/get", r#"{ "key" : "k" }"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, r#"{ "key" : "k", "value" : "second" }"#);

    db.stop().await.unwrap();
}

#[tokio::test]
async fn test_malformed_body_is_client_error() {
    let dir = TempDir::new().unwrap();
    let db = start_db(dir.path(), 1, 20).await;

    let (status, _) = post(app(&db), "/v1/get", "not valid json").await;
    assert!(
        status.is_client_error(),
        "expected 4xx for invalid JSON, got {status}"
    );

    let (status, _) = post(app(&db), "/v1/set", r#"{ "key" : "only-key" }"#).await;
    assert!(
        status.is_client_error(),
        "expected 4xx for missing field, got {status}"
    );

    db.stop().await.unwrap();
}

#[tokio::test]
async fn test_empty_key_is_rejected() {
    let dir = TempDir::new().unwrap();
    let db = start_db(dir.path(), 1, 20).await;

    let (status, _) = post(
        app(&db),
        "/v1/set",
        r#"{ "key" : "", "value" : "v" }"#,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    db.stop().await.unwrap();
}

#[tokio::test]
async fn test_health() {
    let dir = TempDir::new().unwrap();
    let db = start_db(dir.path(), 1, 20).await;

    let response = app(&db)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    db.stop().await.unwrap();
}
