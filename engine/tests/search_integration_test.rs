//! Integration tests for the search executor against a mock search API
//!
//! Every failure mode must come back as a status on the outcome, never as
//! an error or a panic.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::{
    matchers::{body_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use lexis_engine::search::{HttpSearchProvider, SearchExecutor, SearchStatus};

fn executor(uri: &str, api_key: Option<&str>) -> SearchExecutor {
    let provider =
        HttpSearchProvider::with_api_key(uri, api_key.map(str::to_string)).unwrap();
    SearchExecutor::new(Arc::new(provider), 500)
}

#[tokio::test]
async fn test_request_shape_and_normalization() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/search"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_json(json!({ "query": "articulo 15 codigo civil", "numResults": 3 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "engine": "mock",
            "results": [
                { "title": "Código Civil, art. 15", "url": "https://www.boe.es/cc#a15", "snippet": "Los  extranjeros\n gozan..." },
                { "name": "Sin URL", "snippet": "descartado" },
                { "title": "Comentario", "link": "https://blog.example/cc-15", "description": "Análisis" }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = executor(&server.uri(), Some("test-key"))
        .search(
            "articulo 15 codigo civil",
            3,
            Duration::from_secs(2),
            &CancellationToken::new(),
        )
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.status, SearchStatus::Ok);
    assert_eq!(outcome.engine, "mock");
    assert_eq!(outcome.results.len(), 2);
    assert_eq!(outcome.results[0].snippet, "Los extranjeros gozan...");
    assert_eq!(outcome.results[1].url, "https://blog.example/cc-15");
    assert_eq!(outcome.results[1].snippet, "Análisis");
}

#[tokio::test]
async fn test_timeout_is_a_failed_outcome() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "results": [] }))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let outcome = executor(&server.uri(), None)
        .search("ley 1", 2, Duration::from_millis(50), &CancellationToken::new())
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.status, SearchStatus::Timeout);
    assert!(outcome.results.is_empty());
    assert!(outcome.error_reason.unwrap().contains("50ms"));
}

#[tokio::test]
async fn test_provider_error_status() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .mount(&server)
        .await;

    let outcome = executor(&server.uri(), None)
        .search("ley 1", 2, Duration::from_secs(2), &CancellationToken::new())
        .await;

    assert!(!outcome.success);
    assert_eq!(
        outcome.status,
        SearchStatus::ProviderError { status: Some(500) }
    );
    assert!(outcome.error_reason.is_some());
}

#[tokio::test]
async fn test_empty_result_is_success() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": [] })))
        .mount(&server)
        .await;

    let outcome = executor(&server.uri(), None)
        .search("ley 99999", 2, Duration::from_secs(2), &CancellationToken::new())
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.status, SearchStatus::Empty);
    assert!(outcome.error_reason.is_none());
}

#[tokio::test]
async fn test_malformed_body_is_parse_failure() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "message": "ok" })))
        .mount(&server)
        .await;

    let outcome = executor(&server.uri(), None)
        .search("ley 1", 2, Duration::from_secs(2), &CancellationToken::new())
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.status, SearchStatus::Parse);
}

#[tokio::test]
async fn test_unreachable_provider() {
    // Nothing listens on the discard port
    let outcome = executor("http://127.0.0.1:9", None)
        .search("ley 1", 2, Duration::from_secs(2), &CancellationToken::new())
        .await;

    assert!(!outcome.success);
    assert!(matches!(
        outcome.status,
        SearchStatus::Network | SearchStatus::Timeout
    ));
}

#[tokio::test]
async fn test_cancellation_aborts_in_flight_call() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "results": [] }))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let outcome = executor(&server.uri(), None)
        .search("ley 1", 2, Duration::from_secs(10), &cancel)
        .await;

    assert_eq!(outcome.status, SearchStatus::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(2));
}
