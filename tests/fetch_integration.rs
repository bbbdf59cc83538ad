//! Integration tests for HttpFetcher against a simulated config server.

use std::time::Duration;

use cac_client::{ErrorKind, FetchOutcome, Fetcher, HttpFetcher};
use chrono::{TimeZone, Utc};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TENANT: &str = "acme";

fn fetcher() -> HttpFetcher {
    HttpFetcher::new(Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn fetch_returns_document_with_tenant_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/config"))
        .and(header("x-tenant", TENANT))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"a": 1, "db": {"host": "x"}})))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = fetcher().fetch(TENANT, &server.uri(), None).await.unwrap();
    match outcome {
        FetchOutcome::Modified { document, last_modified } => {
            assert_eq!(document["a"], json!(1));
            assert_eq!(document["db"]["host"], json!("x"));
            assert_eq!(last_modified, None);
        }
        FetchOutcome::NotModified => panic!("expected a document"),
    }
}

#[tokio::test]
async fn fetch_trims_trailing_slash_on_hostname() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/config"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let hostname = format!("{}/", server.uri());
    assert!(fetcher().fetch(TENANT, &hostname, None).await.is_ok());
}

#[tokio::test]
async fn fetch_parses_last_modified_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/config"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Last-Modified", "Wed, 21 Oct 2015 07:28:00 GMT")
                .set_body_json(json!({"a": 1})),
        )
        .mount(&server)
        .await;

    let outcome = fetcher().fetch(TENANT, &server.uri(), None).await.unwrap();
    let expected = Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap();
    match outcome {
        FetchOutcome::Modified { last_modified, .. } => assert_eq!(last_modified, Some(expected)),
        FetchOutcome::NotModified => panic!("expected a document"),
    }
}

#[tokio::test]
async fn fetch_sends_if_modified_since_and_handles_304() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/config"))
        .respond_with(ResponseTemplate::new(304))
        .expect(1)
        .mount(&server)
        .await;

    let since = Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap();
    let outcome = fetcher().fetch(TENANT, &server.uri(), Some(since)).await.unwrap();
    assert_eq!(outcome, FetchOutcome::NotModified);

    let requests = server.received_requests().await.unwrap();
    let sent = requests[0].headers.get("if-modified-since").unwrap().to_str().unwrap();
    assert_eq!(sent, "Wed, 21 Oct 2015 07:28:00 GMT");
}

#[tokio::test]
async fn fetch_without_since_sends_no_if_modified_since() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/config"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    fetcher().fetch(TENANT, &server.uri(), None).await.unwrap();
    let requests = server.received_requests().await.unwrap();
    assert!(requests[0].headers.get("if-modified-since").is_none());
}

#[tokio::test]
async fn fetch_error_on_500() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = fetcher().fetch(TENANT, &server.uri(), None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(err.to_string().contains("500"));
}

#[tokio::test]
async fn fetch_error_on_404() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = fetcher().fetch(TENANT, &server.uri(), None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
}

#[tokio::test]
async fn fetch_error_on_non_object_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([1, 2, 3])))
        .mount(&server)
        .await;

    let err = fetcher().fetch(TENANT, &server.uri(), None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(err.to_string().contains("not a JSON object"));
}

#[tokio::test]
async fn fetch_error_on_invalid_json() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
        .mount(&server)
        .await;

    let err = fetcher().fetch(TENANT, &server.uri(), None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
}

#[tokio::test]
async fn fetch_error_on_unreachable_host() {
    let err = fetcher().fetch(TENANT, "http://127.0.0.1:1", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
}
