//! `HttpRemoteService` against a local mock HTTP server.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tether_core::{
    Collection, ConnectivityState, KeywordRecord, RemoteConfig, RemoteError, RemoteService,
    SyncConfig,
};
use tether_storage::{LocalStore, MemoryStore};
use tether_sync::{HttpRemoteService, SyncOrchestrator};
use tether_test_utils::fixtures;
use tokio::sync::watch;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> HttpRemoteService {
    client_with_timeout(server, Duration::from_secs(2))
}

fn client_with_timeout(server: &MockServer, request_timeout: Duration) -> HttpRemoteService {
    let config = RemoteConfig {
        base_url: format!("{}/api", server.uri()),
        request_timeout,
    };
    HttpRemoteService::new(&config).expect("client should build")
}

#[tokio::test]
async fn test_fetch_groups_decodes_snapshot() {
    let server = MockServer::start().await;
    let groups = fixtures::sample_groups(&fixtures::sample_keywords(6));
    Mock::given(method("GET"))
        .and(path("/api/groups"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&groups))
        .expect(1)
        .mount(&server)
        .await;

    let fetched = client(&server).fetch_groups().await.expect("fetch");
    assert_eq!(fetched, groups);
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/keywords"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let err = client(&server)
        .fetch_keywords()
        .await
        .expect_err("503 should fail");
    assert!(err.is_transient());
    match err {
        RemoteError::Server { status, message } => {
            assert_eq!(status, 503);
            assert_eq!(message, "maintenance");
        }
        other => panic!("expected Server error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_client_error_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/groups/content"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such group"))
        .mount(&server)
        .await;

    let err = client(&server)
        .remove_group("content")
        .await
        .expect_err("404 should fail");
    assert!(!err.is_transient());
    assert!(matches!(err, RemoteError::Rejected { ref operation, .. } if operation == "remove_group"));
}

#[tokio::test]
async fn test_mutation_reports_success_flag() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/files/import-a.csv"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": false })))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/files/import-b.csv"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .mount(&server)
        .await;

    let remote = client(&server);
    assert!(!remote.remove_file("import-a.csv").await.expect("refused"));
    assert!(remote.remove_file("import-b.csv").await.expect("accepted"));
}

#[tokio::test]
async fn test_malformed_body_is_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/files"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let err = client(&server).fetch_files().await.expect_err("not json");
    assert!(matches!(err, RemoteError::Decode { .. }));
}

#[tokio::test]
async fn test_path_segments_are_encoded_on_the_wire() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/groups/technical%20seo%2Faudit/keywords/kw-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;

    let removed = client(&server)
        .remove_keyword("kw-1", "technical seo/audit")
        .await
        .expect("remove");
    assert!(removed);
}

#[tokio::test]
async fn test_create_keywords_posts_records() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/keywords"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;

    let records = fixtures::sample_keywords(2);
    assert!(client(&server)
        .create_keywords(&records)
        .await
        .expect("create"));

    let requests = server.received_requests().await.expect("recording enabled");
    let body: Vec<KeywordRecord> =
        serde_json::from_slice(&requests[0].body).expect("body is a keyword list");
    assert_eq!(body.len(), 2);
    assert_eq!(body[0].id, records[0].id);
}

#[tokio::test]
async fn test_health_check_maps_error_statuses_to_unhealthy() {
    let server = MockServer::start().await;
    let remote = client(&server);

    Mock::given(method("GET"))
        .and(path("/api/health"))
        .respond_with(ResponseTemplate::new(200))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    assert!(remote.health_check().await.expect("healthy"));

    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/api/health"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    assert!(!remote.health_check().await.expect("5xx reads as unhealthy"));

    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/api/health"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    assert!(!remote.health_check().await.expect("4xx reads as unhealthy"));
}

#[tokio::test]
async fn test_slow_response_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/groups"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let err = client_with_timeout(&server, Duration::from_millis(100))
        .fetch_groups()
        .await
        .expect_err("should time out");
    assert!(matches!(err, RemoteError::Timeout { .. }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_cycle_over_http_isolates_failing_collection() {
    let server = MockServer::start().await;
    let records = fixtures::sample_keywords(6);
    Mock::given(method("GET"))
        .and(path("/api/groups"))
        .respond_with(ResponseTemplate::new(200).set_body_json(fixtures::sample_groups(&records)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/keywords"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(fixtures::sample_remote_keywords(6)),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/files"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let (_tx, rx) = watch::channel(ConnectivityState::Online);
    let orchestrator = SyncOrchestrator::new(
        store.clone(),
        Arc::new(client(&server)),
        SyncConfig::development(),
        rx,
    )
    .expect("valid config");

    let outcome = orchestrator.perform_full_sync().await.expect("cycle");
    let report = outcome.report().expect("cycle should run");
    assert_eq!(report.collections_failed, vec![Collection::Files]);
    let counts = store.counts().await.expect("counts");
    assert_eq!(counts.keywords, 6);
    assert_eq!(counts.groups, 3);
    assert_eq!(counts.files, 0);
}
