//! JSON-over-HTTP transport.
//!
//! Every call is `POST {endpoint}/sdk/{method_path}` with a `{"args": ...}`
//! body. Once logged in, the session key rides along in `X-Session-Key`.
//!
//! | Reply                                   | Result                 |
//! |-----------------------------------------|------------------------|
//! | 2xx `{"result": v}`                     | `Ok(v)`                |
//! | non-2xx `{"faults": [..], "message"}`   | `Fault`                |
//! | 429 / 503 without faults                | `Overloaded`           |
//! | other 4xx without faults                | `InvalidRequest`       |
//! | other 5xx without faults, I/O errors    | `Connection`           |
//! | undecodable 2xx body                    | `Malformed`            |

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{Connector, SessionKey, Transport, TransportError};
use crate::config::DriverConfig;
use crate::remote;

/// Header carrying the session key.
pub const SESSION_HEADER: &str = "X-Session-Key";

#[derive(Debug, Deserialize)]
struct ResultEnvelope {
    #[serde(default)]
    result: Value,
}

#[derive(Debug, Default, Deserialize)]
struct FaultEnvelope {
    #[serde(default)]
    faults: Vec<String>,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct LoginReply {
    key: String,
}

/// Creates `HttpTransport` handles for one endpoint.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    endpoint: String,
    timeout: Duration,
}

impl HttpConnector {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub fn from_config(config: &DriverConfig) -> Self {
        Self::new(config.endpoint(), config.request_timeout)
    }
}

#[async_trait]
impl Connector for HttpConnector {
    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }

    async fn connect(&self) -> Result<Arc<dyn Transport>, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        Ok(Arc::new(HttpTransport::new(client, self.endpoint.clone())))
    }
}

/// One HTTP connection handle bound to at most one session.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    session_key: Mutex<Option<SessionKey>>,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            session_key: Mutex::new(None),
        }
    }

    fn current_key(&self) -> Option<SessionKey> {
        self.session_key
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_key(&self, key: Option<SessionKey>) {
        *self
            .session_key
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = key;
    }

    async fn post(&self, method_path: &str, args: &Value) -> Result<Value, TransportError> {
        let url = format!("{}/sdk/{}", self.endpoint, method_path);
        debug!(method = method_path, "POST to management API");

        let mut request = self.client.post(&url).json(&json!({ "args": args }));
        if let Some(key) = self.current_key() {
            request = request.header(SESSION_HEADER, key.as_str());
        }

        let response = request.send().await.map_err(map_send_error)?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        if status.is_success() {
            let envelope: ResultEnvelope = serde_json::from_slice(&body)
                .map_err(|e| TransportError::Malformed(format!("{method_path}: {e}")))?;
            return Ok(envelope.result);
        }

        let fault: FaultEnvelope = serde_json::from_slice(&body).unwrap_or_default();
        let message = if fault.message.is_empty() {
            format!("HTTP {status}: {}", String::from_utf8_lossy(&body).trim())
        } else {
            fault.message
        };

        if !fault.faults.is_empty() {
            return Err(TransportError::Fault {
                faults: fault.faults,
                message,
            });
        }

        Err(match status {
            StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
                TransportError::Overloaded(message)
            }
            s if s.is_client_error() => TransportError::InvalidRequest(message),
            _ => TransportError::Connection(message),
        })
    }
}

fn map_send_error(err: reqwest::Error) -> TransportError {
    if err.is_builder() {
        TransportError::InvalidRequest(err.to_string())
    } else {
        TransportError::Connection(err.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn login(&self, username: &str, password: &str) -> Result<SessionKey, TransportError> {
        let reply = self
            .post(
                remote::LOGIN,
                &json!({ "userName": username, "password": password }),
            )
            .await?;
        let reply: LoginReply = serde_json::from_value(reply)
            .map_err(|e| TransportError::Malformed(format!("login reply: {e}")))?;

        let key = SessionKey(reply.key);
        self.set_key(Some(key.clone()));
        Ok(key)
    }

    async fn logout(&self) -> Result<(), TransportError> {
        let result = self.post(remote::LOGOUT, &json!({})).await;
        self.set_key(None);
        result.map(|_| ())
    }

    async fn terminate_session(&self, keys: &[SessionKey]) -> Result<(), TransportError> {
        let ids: Vec<&str> = keys.iter().map(SessionKey::as_str).collect();
        self.post(remote::TERMINATE_SESSION, &json!({ "sessionId": ids }))
            .await
            .map(|_| ())
    }

    async fn call(&self, method_path: &str, args: &Value) -> Result<Value, TransportError> {
        self.post(method_path, args).await
    }
}
