//! Integration tests for armature-rest-client

use armature_rest_client::*;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;
use tracing_subscriber::EnvFilter;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Deserialize, PartialEq)]
struct User {
    id: u32,
    name: String,
}

#[tokio::test]
async fn test_object_with_basic_auth_and_product_info() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/42"))
        .and(header("authorization", "Basic dXNlcjpwYXNz"))
        .and(header("user-agent", "integration-tests/1.0"))
        .and(header("accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 42, "name": "Ada"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = RestClient::get(format!("{}/users/{{id}}", server.uri()))
        .credentials(Credentials::basic("user", "pass"))
        .product_info("integration-tests/1.0")
        .accept_type("application/json")
        .build()
        .unwrap();

    let response = client.call().template("id", "42").object::<User>().await;

    assert_eq!(response.status(), Some(StatusCode::OK));
    assert_eq!(
        response.into_result().unwrap(),
        User {
            id: 42,
            name: "Ada".to_string()
        }
    );
}

#[tokio::test]
async fn test_plus_reaches_server_as_literal_plus() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("q", "a+b c"))
        .respond_with(ResponseTemplate::new(200).set_body_string("found"))
        .expect(1)
        .mount(&server)
        .await;

    let client = RestClient::get(format!("{}/search", server.uri()))
        .build()
        .unwrap();

    let response = client.call().query("q", "a+b c").string().await;

    assert_eq!(response.request().url().query(), Some("q=a%2Bb%20c"));
    assert_eq!(response.into_result().unwrap(), "found");
}

#[tokio::test]
async fn test_array_at_path() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"users": [{"id": 1, "name": "Ada"}, {"id": 2, "name": "Grace"}]}
        })))
        .mount(&server)
        .await;

    let client = RestClient::get(format!("{}/users", server.uri()))
        .build()
        .unwrap();

    let users = client
        .call()
        .path(["data", "users"])
        .array::<User>()
        .await
        .into_result()
        .unwrap();

    assert_eq!(users.len(), 2);
    assert_eq!(users[1].name, "Grace");
}

#[tokio::test]
async fn test_post_json_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/users"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({"name": "Ada"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 7, "name": "Ada"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = RestClient::post(format!("{}/users", server.uri()))
        .json(&json!({"name": "Ada"}))
        .build()
        .unwrap();

    let response = client.call().object::<User>().await;
    assert_eq!(response.status(), Some(StatusCode::CREATED));
    assert_eq!(response.into_result().unwrap().id, 7);
}

#[tokio::test]
async fn test_server_error_is_not_a_breaker_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"id": 1, "name": "Ada"})))
        .expect(3)
        .mount(&server)
        .await;

    let client = RestClient::get(server.uri())
        .circuit_parameters(CircuitParameters::new(|_, _| {}).with_max_failures(1))
        .build()
        .unwrap();

    for _ in 0..3 {
        let response = client.call().object::<User>().await;
        assert!(response.is_success());
        assert_eq!(response.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
    }
    assert_eq!(client.circuit_state(), Some(CircuitState::Closed));
}

#[tokio::test]
async fn test_response_to_error_hook_rejects_status() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(409).set_body_string("conflict"))
        .mount(&server)
        .await;

    let client = RestClient::delete(format!("{}/users/1", server.uri()))
        .build()
        .unwrap();

    let response = client
        .call()
        .response_to_error(|meta, body| {
            let meta = meta?;
            if meta.status() == StatusCode::CONFLICT {
                let text = body.map(|b| String::from_utf8_lossy(b).into_owned());
                Some(format!("conflict: {}", text.unwrap_or_default()).into())
            } else {
                None
            }
        })
        .void()
        .await;

    match response.error() {
        Some(Error::Response(e)) => assert_eq!(e.to_string(), "conflict: conflict"),
        other => panic!("expected hook error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_connection_refused_is_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = RestClient::get(format!("http://{addr}/users"))
        .build()
        .unwrap();

    let response = client.call().bytes().await;
    let error = response.error().unwrap();
    assert!(error.is_transport());
    assert_eq!(error.rest_error(), None);
    assert!(response.meta().is_none());
}

#[tokio::test]
async fn test_breaker_timeout_invokes_fallback() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("slow")
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let diverted = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&diverted);
    let client = RestClient::get(server.uri())
        .circuit_parameters(
            CircuitParameters::new(move |error, _| recorded.lock().push(error))
                .with_timeout(Duration::from_millis(50))
                .with_max_failures(1),
        )
        .build()
        .unwrap();

    let first = client.call().string().await;
    assert!(first.error().unwrap().is_circuit_open());

    let second = client.call().string().await;
    assert!(second.error().unwrap().is_circuit_open());

    assert_eq!(
        *diverted.lock(),
        vec![BreakerError::Timeout(Duration::from_millis(50)), BreakerError::Open]
    );
    assert_eq!(client.circuit_state(), Some(CircuitState::Open));
}

#[tokio::test]
async fn test_download_to_destination() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/report.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.7".to_vec()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("report.pdf");
    let client = RestClient::get(format!("{}/files/{{name}}", server.uri()))
        .build()
        .unwrap();

    let response = client
        .call()
        .template("name", "report.pdf")
        .download(&destination)
        .await;

    assert_eq!(response.meta().map(ResponseMeta::status), Some(StatusCode::OK));
    assert_eq!(assert_ok!(response.into_result()), destination);
    assert_eq!(assert_ok!(tokio::fs::read(&destination).await), b"%PDF-1.7");
}

#[tokio::test]
async fn test_download_to_unwritable_destination() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"data".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("missing").join("out.bin");
    let client = RestClient::get(server.uri()).build().unwrap();

    let response = client.download(&destination).await;

    assert!(response.meta().is_none());
    assert_eq!(
        response.result().as_ref().err().and_then(Error::rest_error),
        Some(RestError::FileManagerError)
    );
    assert!(!destination.exists());
}

#[tokio::test]
async fn test_clients_are_usable_across_tasks() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(4)
        .mount(&server)
        .await;

    let client = RestClient::get(server.uri()).build().unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.call().string().await.into_result() })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), "ok");
    }
}
