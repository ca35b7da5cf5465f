//! Transport seam between the driver and the remote management API.
//!
//! The driver never talks to the wire directly. A `Connector` hands out fresh
//! `Transport` handles (one per login), and a `Transport` exposes the session
//! primitives plus a generic dotted method-path dispatch used by the retrying
//! invoker.
//!
//! ## Implementations
//!
//! - `http`: JSON over HTTP using `reqwest`
//! - `hostlink-testing`: scripted in-memory fake host for tests

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub mod http;

pub use http::{HttpConnector, HttpTransport};

/// Errors raised by a transport.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The host answered with a structured fault.
    #[error("remote fault {faults:?}: {message}")]
    Fault {
        faults: Vec<String>,
        message: String,
    },

    /// The host refused the call for capacity reasons (HTTP 429/503).
    #[error("host overloaded: {0}")]
    Overloaded(String),

    /// The request could not be built from the supplied arguments.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Network level failure (connect, reset, timeout) or an unstructured
    /// server error.
    #[error("connection error: {0}")]
    Connection(String),

    /// The reply could not be decoded.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl TransportError {
    /// Build a structured fault from codes and a message.
    pub fn fault<I, S>(codes: I, message: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TransportError::Fault {
            faults: codes.into_iter().map(Into::into).collect(),
            message: message.into(),
        }
    }

    /// Structured fault codes carried by this error (empty if none).
    pub fn fault_codes(&self) -> &[String] {
        match self {
            TransportError::Fault { faults, .. } => faults,
            _ => &[],
        }
    }

    /// Human readable detail without the variant prefix.
    pub fn detail(&self) -> &str {
        match self {
            TransportError::Fault { message, .. } => message,
            TransportError::Overloaded(m)
            | TransportError::InvalidRequest(m)
            | TransportError::Connection(m)
            | TransportError::Malformed(m) => m,
        }
    }
}

/// Opaque key identifying one authenticated session on the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey(pub String);

impl SessionKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Session keys are bearer tokens; only show a prefix.
        let shown: String = self.0.chars().take(8).collect();
        write!(f, "{shown}...")
    }
}

/// One connection handle to the host.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Log in and return the new session key.
    async fn login(&self, username: &str, password: &str) -> Result<SessionKey, TransportError>;

    /// Log out the session this handle is bound to.
    async fn logout(&self) -> Result<(), TransportError>;

    /// Terminate other sessions by key.
    async fn terminate_session(&self, keys: &[SessionKey]) -> Result<(), TransportError>;

    /// Dispatch an arbitrary dotted method path with JSON arguments.
    async fn call(&self, method_path: &str, args: &Value) -> Result<Value, TransportError>;
}

/// Factory for fresh transport handles.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Endpoint this connector targets, for logs and errors.
    fn endpoint(&self) -> String;

    /// Create a new, unauthenticated transport handle.
    async fn connect(&self) -> Result<Arc<dyn Transport>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_codes() {
        let err = TransportError::fault(["NotAuthenticated"], "session gone");
        assert_eq!(err.fault_codes(), ["NotAuthenticated".to_string()]);
        assert_eq!(err.detail(), "session gone");

        let err = TransportError::Connection("reset".to_string());
        assert!(err.fault_codes().is_empty());
    }

    #[test]
    fn test_session_key_display_is_truncated() {
        let key = SessionKey("52a3c1d8-8c8e-4b1f-a9e0-1f2b3c4d5e6f".to_string());
        assert_eq!(key.to_string(), "52a3c1d8...");
    }
}
