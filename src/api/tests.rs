use std::time::Duration;

use httpmock::Method::GET;
use httpmock::MockServer;
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::api::models::{Budget, Task, TaskStatus};
use crate::api::{ApiClient, ApiError};

fn client(server: &MockServer) -> ApiClient {
    ApiClient::new(&format!("{}/api", server.base_url()), Duration::from_secs(5))
        .expect("client should build")
}

#[tokio::test]
async fn get_data_unwraps_envelope_and_sends_bearer() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/api/tasks")
            .header("authorization", "Bearer secret-token");
        then.status(200).json_body(json!({
            "success": true,
            "data": [
                { "id": "t1", "title": "Book crane", "status": "todo", "assigneeId": "u1" }
            ]
        }));
    });

    let tasks: Vec<Task> = client(&server)
        .with_token("secret-token")
        .get_data("/tasks")
        .await
        .expect("tasks should load");

    mock.assert();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status, TaskStatus::Todo);
}

#[tokio::test]
async fn http_error_uses_body_message() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/budget");
        then.status(403).json_body(json!({ "success": false, "message": "Insufficient permissions" }));
    });

    let err = client(&server).get_data::<Budget>("/budget").await.unwrap_err();

    assert_eq!(
        err,
        ApiError::Http {
            status: 403,
            message: "Insufficient permissions".to_string()
        }
    );
    assert_eq!(err.status(), 403);
}

#[tokio::test]
async fn http_error_without_body_falls_back() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/script");
        then.status(500).body("boom");
    });

    let err = client(&server).get_data::<serde_json::Value>("/script").await.unwrap_err();

    assert_eq!(err.to_string(), "Request failed");
    assert_eq!(err.status(), 500);
}

#[tokio::test]
async fn unsuccessful_envelope_is_an_error() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/script");
        then.status(200)
            .json_body(json!({ "success": false, "data": null, "message": "Script not found" }));
    });

    let err = client(&server)
        .get_data::<Option<serde_json::Value>>("/script")
        .await
        .unwrap_err();

    assert_eq!(err, ApiError::Unsuccessful("Script not found".to_string()));
}

#[tokio::test]
async fn unreachable_server_is_network_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = ApiClient::new(&format!("http://{addr}/api"), Duration::from_secs(2)).unwrap();
    let err = client.get_data::<serde_json::Value>("/tasks").await.unwrap_err();

    assert!(matches!(err, ApiError::Network(_)), "unexpected error: {err:?}");
    assert_eq!(err.status(), 0);
    assert_eq!(err.to_string(), "Network error: Unable to connect to server");
}
