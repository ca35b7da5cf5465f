//! Integration tests for session lifecycle.

use std::sync::Arc;
use std::time::Duration;

use hostlink_driver::{DriverError, Session, TransportError};
use hostlink_testing::FakeHost;

fn session(host: &FakeHost) -> Arc<Session> {
    Arc::new(Session::new(host.connector(), "root", "secret"))
}

#[tokio::test]
async fn test_login_is_lazy() {
    let host = FakeHost::new("root", "secret");
    let session = session(&host);

    assert_eq!(host.logins(), 0);
    assert!(session.session_key().await.is_none());

    let (_transport, generation) = session.transport().await.unwrap();
    assert_eq!(generation, 1);
    assert_eq!(host.logins(), 1);
    assert_eq!(session.session_key().await.unwrap().as_str(), "session-1");

    // A second lookup reuses the handle.
    session.transport().await.unwrap();
    assert_eq!(host.logins(), 1);
    assert_eq!(host.connects(), 1);
}

#[tokio::test]
async fn test_reauthentication_terminates_previous_session() {
    let host = FakeHost::new("root", "secret");
    let session = session(&host);

    session.authenticate().await.unwrap();
    session.authenticate().await.unwrap();

    assert_eq!(host.logins(), 2);
    assert_eq!(host.connects(), 2);
    assert_eq!(host.terminated(), vec!["session-1".to_string()]);
    assert_eq!(session.session_key().await.unwrap().as_str(), "session-2");
    assert_eq!(session.generation().await, 2);
}

#[tokio::test]
async fn test_terminate_failure_is_swallowed() {
    let host = FakeHost::new("root", "secret");
    let session = session(&host);
    host.fail_terminate(TransportError::fault(["NotFound"], "session already gone"));

    session.authenticate().await.unwrap();
    session.authenticate().await.unwrap();

    assert_eq!(session.session_key().await.unwrap().as_str(), "session-2");
    assert!(host.terminated().is_empty());
}

#[tokio::test]
async fn test_bad_credentials_is_authentication_error() {
    let host = FakeHost::new("root", "secret");
    let session = Arc::new(Session::new(host.connector(), "root", "wrong"));

    let err = session.authenticate().await.unwrap_err();
    match &err {
        DriverError::Authentication { host, detail } => {
            assert_eq!(host, "fake://host");
            assert!(detail.contains("InvalidLogin"));
        }
        other => panic!("expected Authentication, got {other:?}"),
    }
    assert!(session.session_key().await.is_none());
}

#[tokio::test]
async fn test_failed_reauthentication_keeps_previous_session() {
    let host = FakeHost::new("root", "secret");
    let session = session(&host);
    session.authenticate().await.unwrap();

    host.fail_next_login(TransportError::Connection("host unreachable".into()));
    assert!(session.authenticate().await.is_err());

    assert_eq!(session.session_key().await.unwrap().as_str(), "session-1");
    assert_eq!(session.generation().await, 1);
}

#[tokio::test]
async fn test_close_swallows_logout_error() {
    let host = FakeHost::new("root", "secret");
    let session = session(&host);
    session.authenticate().await.unwrap();
    host.fail_logout(TransportError::Connection("connection reset".into()));

    session.close().await;

    assert_eq!(host.logouts(), 1);
    assert!(session.session_key().await.is_none());
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let host = FakeHost::new("root", "secret");
    let session = session(&host);

    // Never logged in: nothing to do.
    session.close().await;
    assert_eq!(host.logouts(), 0);

    session.authenticate().await.unwrap();
    session.close().await;
    session.close().await;
    assert_eq!(host.logouts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_reauthentication_coalesces() {
    let host = FakeHost::new("root", "secret");
    let session = session(&host);
    let (_, seen) = session.transport().await.unwrap();
    host.set_login_delay(Duration::from_millis(100));

    let callers: Vec<_> = (0..5)
        .map(|_| {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.reauthenticate(seen).await })
        })
        .collect();

    for caller in callers {
        assert_eq!(caller.await.unwrap().unwrap(), 2);
    }
    assert_eq!(host.logins(), 2);
    assert_eq!(host.terminated(), vec!["session-1".to_string()]);
}

#[tokio::test]
async fn test_reauthenticate_with_current_generation_logs_in() {
    let host = FakeHost::new("root", "secret");
    let session = session(&host);
    let (_, seen) = session.transport().await.unwrap();

    assert_eq!(session.reauthenticate(seen).await.unwrap(), seen + 1);
    assert_eq!(host.logins(), 2);
}
