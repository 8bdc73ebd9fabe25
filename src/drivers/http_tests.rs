// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `drivers/http.rs`

use super::*;
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer, auth: ApplianceAuth) -> ApplianceClient {
    ApplianceClient::new("test", &server.uri(), auth, Duration::from_secs(5), false).unwrap()
}

fn basic() -> ApplianceAuth {
    ApplianceAuth::Basic {
        username: "admin".to_string(),
        password: "secret".to_string(),
    }
}

#[test]
fn test_classify_by_status() {
    assert_eq!(classify(StatusCode::OK, ""), ResponseClass::Success);
    assert_eq!(classify(StatusCode::CREATED, ""), ResponseClass::Success);
    assert_eq!(classify(StatusCode::CONFLICT, ""), ResponseClass::AlreadyExists);
    assert_eq!(classify(StatusCode::NOT_FOUND, ""), ResponseClass::NotFound);
    assert_eq!(
        classify(StatusCode::INTERNAL_SERVER_ERROR, "boom"),
        ResponseClass::Failure
    );
}

#[test]
fn test_classify_by_body() {
    assert_eq!(
        classify(
            StatusCode::BAD_REQUEST,
            r#"{"message":"01020066:3: The requested Pool (/Common/p) already exists in partition Common."}"#
        ),
        ResponseClass::AlreadyExists
    );
    assert_eq!(
        classify(
            StatusCode::BAD_REQUEST,
            r#"{"message":"01020036:3: The requested Node (/Common/10.0.0.1) was not found."}"#
        ),
        ResponseClass::NotFound
    );
    assert_eq!(
        classify(
            StatusCode::from_u16(599).unwrap(),
            r#"{"errorcode":258,"message":"No such resource [name, x]"}"#
        ),
        ResponseClass::NotFound
    );
}

#[test]
fn test_auth_debug_hides_secrets() {
    let rendered = format!("{:?}", basic());
    assert!(rendered.contains("admin"));
    assert!(!rendered.contains("secret"));

    let headers = ApplianceAuth::Headers(vec![("X-NITRO-PASS".to_string(), "hunter2".to_string())]);
    assert!(!format!("{headers:?}").contains("hunter2"));
}

#[tokio::test]
async fn test_create_conflict_is_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/things"))
        .respond_with(ResponseTemplate::new(409).set_body_string("already exists"))
        .expect(1)
        .mount(&server)
        .await;

    let result = client(&server, basic())
        .create(Method::POST, "/things", Some(&json!({"name": "a"})), "create_thing", "a")
        .await;

    assert!(result.is_ok());
}

#[tokio::test]
async fn test_delete_not_found_is_success() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/things/a"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let result = client(&server, basic())
        .delete("/things/a", "delete_thing", "a")
        .await;

    assert!(result.is_ok());
}

#[tokio::test]
async fn test_failure_carries_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/things"))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid mode"))
        .mount(&server)
        .await;

    let err = client(&server, basic())
        .create(Method::POST, "/things", Some(&json!({})), "create_thing", "a")
        .await
        .unwrap_err();

    match err {
        DriverError::Http {
            operation,
            status,
            body,
        } => {
            assert_eq!(operation, "create_thing a");
            assert_eq!(status, 400);
            assert_eq!(body, "invalid mode");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_create_not_found_is_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = client(&server, basic())
        .create(Method::POST, "/things", Some(&json!({})), "create_thing", "a")
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), Some(404));
}

#[tokio::test]
async fn test_get_decodes_and_maps_missing_to_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/things/a"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "a"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/things/b"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let c = client(&server, basic());
    let found: Option<serde_json::Value> = c.get("/things/a", "get_thing", "a").await.unwrap();
    let missing: Option<serde_json::Value> = c.get("/things/b", "get_thing", "b").await.unwrap();

    assert_eq!(found, Some(json!({"name": "a"})));
    assert!(missing.is_none());
}

#[tokio::test]
async fn test_get_invalid_json() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let err = client(&server, basic())
        .get::<serde_json::Value>("/things/a", "get_thing", "a")
        .await
        .unwrap_err();

    assert!(matches!(err, DriverError::InvalidResponse { .. }));
}

#[tokio::test]
async fn test_header_auth_is_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("X-NITRO-USER", "nsroot"))
        .and(header("X-NITRO-PASS", "pw"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let auth = ApplianceAuth::Headers(vec![
        ("X-NITRO-USER".to_string(), "nsroot".to_string()),
        ("X-NITRO-PASS".to_string(), "pw".to_string()),
    ]);
    let result: Option<serde_json::Value> = client(&server, auth)
        .get("/x", "get_x", "x")
        .await
        .unwrap();

    assert!(result.is_some());
}

#[tokio::test]
async fn test_transport_error() {
    // Nothing listens on this port once the server is dropped
    let uri = {
        let server = MockServer::start().await;
        server.uri()
    };
    let c = ApplianceClient::new("test", &uri, basic(), Duration::from_secs(2), false).unwrap();

    let err = c.delete("/things/a", "delete_thing", "a").await.unwrap_err();

    assert!(matches!(err, DriverError::Transport { .. }));
}

#[test]
fn test_url_trims_trailing_slash() {
    let c = ApplianceClient::new(
        "test",
        "https://lb.example.com/",
        basic(),
        Duration::from_secs(1),
        true,
    )
    .unwrap();
    assert_eq!(c.url("/mgmt/tm/ltm/pool"), "https://lb.example.com/mgmt/tm/ltm/pool");
    assert_eq!(c.appliance(), "test");
}
