#![allow(unused_crate_dependencies)]
#![allow(clippy::tests_outside_test_module, reason = "integration tests live in tests/ dir")]
#![allow(clippy::expect_used, reason = "integration test, panics are the assertion mechanism")]

use harmonized_client::{ClientConfig, ReqwestTransport, RetryConfig};
use harmonized_types::{HttpMethod, HttpRequest, HttpTransport, TransportError};
use serde_json::json;
use std::collections::BTreeMap;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_retries(max_retries: u32) -> ClientConfig {
    ClientConfig {
        retry: RetryConfig { max_retries, base_delay_ms: 5, max_delay_ms: 20 },
        ..ClientConfig::default()
    }
}

fn request(server: &MockServer, method: HttpMethod, route: &str) -> HttpRequest {
    HttpRequest {
        url: format!("{}{}", server.uri(), route),
        method,
        headers: BTreeMap::new(),
        params: BTreeMap::new(),
        body: None,
    }
}

#[tokio::test]
async fn test_post_sends_json_headers_and_params() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/todos/"))
        .and(header("x-token", "abc"))
        .and(query_param("lang", "de"))
        .and(body_json(json!({"title": "milk"})))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header("Last-Modified", "42")
                .set_body_json(json!({"id": 7, "title": "milk"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let transport = ReqwestTransport::new(fast_retries(0)).expect("client builds");
    let mut req = request(&server, HttpMethod::Post, "/api/todos/");
    req.headers.insert("x-token".to_string(), "abc".to_string());
    req.params.insert("lang".to_string(), "de".to_string());
    req.body = Some(json!({"title": "milk"}));

    let resp = transport.send(req).await.expect("request succeeds");
    assert_eq!(resp.status, 201);
    assert_eq!(resp.data, json!({"id": 7, "title": "milk"}));
    assert_eq!(resp.headers.get("last-modified").map(String::as_str), Some("42"));
}

#[tokio::test]
async fn test_empty_body_decodes_to_null() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/todos/7/"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let transport = ReqwestTransport::new(fast_retries(0)).expect("client builds");
    let resp = transport
        .send(request(&server, HttpMethod::Delete, "/api/todos/7/"))
        .await
        .expect("request succeeds");
    assert_eq!(resp.status, 204);
    assert!(resp.data.is_null());
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/todos/7/"))
        .respond_with(ResponseTemplate::new(422).set_body_string("title missing"))
        .expect(1)
        .mount(&server)
        .await;

    let transport = ReqwestTransport::new(fast_retries(3)).expect("client builds");
    let err = transport
        .send(request(&server, HttpMethod::Put, "/api/todos/7/"))
        .await
        .expect_err("422 must fail");
    assert_eq!(err.status(), Some(422));
    assert!(!err.is_transient());
    match err {
        TransportError::Status { message, .. } => assert_eq!(message, "title missing"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_server_error_retried_then_succeeds() {
    let server = MockServer::start().await;
    {
        let _guard = Mock::given(method("GET"))
            .and(path("/api/todos/"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount_as_scoped(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/todos/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}])))
            .mount(&server)
            .await;

        let transport = ReqwestTransport::new(fast_retries(3)).expect("client builds");
        let resp = transport
            .send(request(&server, HttpMethod::Get, "/api/todos/"))
            .await
            .expect("third attempt succeeds");
        assert_eq!(resp.data, json!([{"id": 1}]));
    }
}

#[tokio::test]
async fn test_server_error_exhausts_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/todos/"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(3)
        .mount(&server)
        .await;

    let transport = ReqwestTransport::new(fast_retries(2)).expect("client builds");
    let err = transport
        .send(request(&server, HttpMethod::Get, "/api/todos/"))
        .await
        .expect_err("all attempts fail");
    assert_eq!(err.status(), Some(500));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_rate_limit_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/todos/"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
        .expect(2)
        .mount(&server)
        .await;

    let transport = ReqwestTransport::new(fast_retries(1)).expect("client builds");
    let err = transport
        .send(request(&server, HttpMethod::Get, "/api/todos/"))
        .await
        .expect_err("rate limit persists");
    assert_eq!(err.status(), Some(429));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_invalid_json_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/todos/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let transport = ReqwestTransport::new(fast_retries(0)).expect("client builds");
    let err = transport
        .send(request(&server, HttpMethod::Get, "/api/todos/"))
        .await
        .expect_err("html is not json");
    assert!(matches!(err, TransportError::InvalidResponse { .. }));
}

#[tokio::test]
async fn test_unreachable_server_is_connection_error() {
    let server = MockServer::start().await;
    let url = format!("{}/api/todos/", server.uri());
    drop(server);

    let transport = ReqwestTransport::new(ClientConfig::without_retries()).expect("client builds");
    let err = transport
        .send(HttpRequest {
            url,
            method: HttpMethod::Get,
            headers: BTreeMap::new(),
            params: BTreeMap::new(),
            body: None,
        })
        .await
        .expect_err("nothing listens");
    assert!(err.is_transient());
}
