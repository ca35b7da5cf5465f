//! HTTP transport tests against a mock management endpoint.

use std::sync::Arc;
use std::time::Duration;

use hostlink_driver::remote;
use hostlink_driver::transport::http::SESSION_HEADER;
use hostlink_driver::transport::{Connector, HttpConnector, SessionKey, Transport};
use hostlink_driver::{Invoker, InvokerConfig, Session, TransportError};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,hostlink_driver=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

fn sdk(method_path: &str) -> String {
    format!("/sdk/{method_path}")
}

async fn connect(server: &MockServer) -> Arc<dyn Transport> {
    HttpConnector::new(format!("{}/", server.uri()), Duration::from_secs(5))
        .connect()
        .await
        .unwrap()
}

async fn mount_login(server: &MockServer, key: &str) {
    Mock::given(method("POST"))
        .and(path(sdk(remote::LOGIN)))
        .and(body_json(json!({
            "args": { "userName": "root", "password": "secret" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": { "key": key }
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_login_key_rides_on_later_calls() {
    init_tracing();
    let server = MockServer::start().await;
    mount_login(&server, "52b1f4c0-session").await;
    Mock::given(method("POST"))
        .and(path(sdk(remote::LIST_VMS)))
        .and(header(SESSION_HEADER, "52b1f4c0-session"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": [{ "name": "vm-a" }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let transport = connect(&server).await;
    let key = transport.login("root", "secret").await.unwrap();
    assert_eq!(key.as_str(), "52b1f4c0-session");

    let vms = transport.call(remote::LIST_VMS, &json!({})).await.unwrap();
    assert_eq!(vms, json!([{ "name": "vm-a" }]));
}

#[tokio::test]
async fn test_missing_result_is_null() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(sdk(remote::UNREGISTER_VM)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let transport = connect(&server).await;
    let reply = transport
        .call(remote::UNREGISTER_VM, &json!({ "vm": "vm-1" }))
        .await
        .unwrap();
    assert!(reply.is_null());
}

#[tokio::test]
async fn test_fault_body_maps_to_fault() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(sdk(remote::POWER_ON_VM_TASK)))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "faults": ["NotAuthenticated"],
            "message": "The session is not authenticated."
        })))
        .mount(&server)
        .await;

    let transport = connect(&server).await;
    let err = transport
        .call(remote::POWER_ON_VM_TASK, &json!({ "vm": "vm-1" }))
        .await
        .unwrap_err();

    match err {
        TransportError::Fault { faults, message } => {
            assert_eq!(faults, vec!["NotAuthenticated".to_string()]);
            assert_eq!(message, "The session is not authenticated.");
        }
        other => panic!("expected Fault, got {other:?}"),
    }
}

#[tokio::test]
async fn test_status_codes_without_faults() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(sdk("Busy.Method")))
        .respond_with(ResponseTemplate::new(503).set_body_string("try later"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(sdk("Throttled.Method")))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(sdk("Bad.Method")))
        .respond_with(ResponseTemplate::new(400).set_body_string("no such argument"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(sdk("Broken.Method")))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let transport = connect(&server).await;
    let call = |m: &'static str| {
        let transport = Arc::clone(&transport);
        async move { transport.call(m, &json!({})).await.unwrap_err() }
    };

    match call("Busy.Method").await {
        TransportError::Overloaded(message) => assert!(message.contains("try later")),
        other => panic!("expected Overloaded, got {other:?}"),
    }
    assert!(matches!(
        call("Throttled.Method").await,
        TransportError::Overloaded(_)
    ));
    assert!(matches!(
        call("Bad.Method").await,
        TransportError::InvalidRequest(_)
    ));
    assert!(matches!(
        call("Broken.Method").await,
        TransportError::Connection(_)
    ));
}

#[tokio::test]
async fn test_undecodable_success_body_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(sdk(remote::LIST_VMS)))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy</html>"))
        .mount(&server)
        .await;

    let transport = connect(&server).await;
    let err = transport
        .call(remote::LIST_VMS, &json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Malformed(_)), "got {err:?}");
}

#[tokio::test]
async fn test_unreachable_host_is_connection_error() {
    // Grab a free port and release it so nothing is listening there.
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    let transport = HttpConnector::new(format!("http://127.0.0.1:{port}"), Duration::from_secs(1))
        .connect()
        .await
        .unwrap();
    let err = transport.login("root", "secret").await.unwrap_err();
    assert!(matches!(err, TransportError::Connection(_)), "got {err:?}");
}

#[tokio::test]
async fn test_terminate_and_logout() {
    let server = MockServer::start().await;
    mount_login(&server, "session-b").await;
    Mock::given(method("POST"))
        .and(path(sdk(remote::TERMINATE_SESSION)))
        .and(body_json(json!({ "args": { "sessionId": ["session-a"] } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": null })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(sdk(remote::LOGOUT)))
        .and(header(SESSION_HEADER, "session-b"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": null })))
        .expect(1)
        .mount(&server)
        .await;

    let transport = connect(&server).await;
    transport.login("root", "secret").await.unwrap();
    transport
        .terminate_session(&[SessionKey("session-a".to_string())])
        .await
        .unwrap();
    transport.logout().await.unwrap();
}

#[tokio::test]
async fn test_invoker_over_http_retries_overload_and_reauthenticates() {
    init_tracing();
    let server = MockServer::start().await;
    mount_login(&server, "session-1").await;
    Mock::given(method("POST"))
        .and(path(sdk(remote::TERMINATE_SESSION)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": null })))
        .mount(&server)
        .await;

    // One overload, one expired session, then success.
    Mock::given(method("POST"))
        .and(path(sdk(remote::FIND_VM)))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(sdk(remote::FIND_VM)))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "faults": ["NotAuthenticated"],
            "message": "The session is not authenticated."
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(sdk(remote::FIND_VM)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": "vm-42" })))
        .mount(&server)
        .await;

    let connector = Arc::new(HttpConnector::new(server.uri(), Duration::from_secs(5)));
    let session = Arc::new(Session::new(connector, "root", "secret"));
    let invoker = Invoker::new(
        Arc::clone(&session),
        InvokerConfig {
            max_attempts: 3,
            retry_delay: Duration::from_millis(10),
        },
    );

    let vm = invoker
        .invoke(remote::FIND_VM, json!({ "name": "vm-a" }))
        .await
        .unwrap();
    assert_eq!(vm, json!("vm-42"));
    assert_eq!(session.generation().await, 2);

    let received = server.received_requests().await.unwrap();
    let logins = received
        .iter()
        .filter(|r| r.url.path() == sdk(remote::LOGIN))
        .count();
    assert_eq!(logins, 2);
}
