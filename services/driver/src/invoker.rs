//! Retrying method invoker.
//!
//! Every remote call goes through `Invoker::invoke`, which absorbs transient
//! failures and surfaces everything else as one final `DriverError`:
//!
//! - `AuthExpired`: re-authenticate and retry immediately
//! - `Overloaded`: sleep the fixed retry delay and retry
//! - `CallerError` / `Unknown`: surface on the first occurrence
//!
//! Retryable faults stop once the attempt counter exceeds the configured
//! budget; the last error is surfaced.
//!
//! ## Idle sessions
//!
//! An idle session can answer a property query with a `NotAuthenticated`
//! fault that the host also uses for a legitimately empty result set. When
//! the same fault signature comes back right after a fresh login, the call
//! is treated as having returned an empty collection. This conflates a real
//! repeated auth failure with an empty result; callers that cannot tolerate
//! that must check the result themselves.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{debug, error, warn, Instrument};
use uuid::Uuid;

use crate::config::DriverConfig;
use crate::error::DriverError;
use crate::fault::{classify, FaultKind, FaultSignature};
use crate::remote;
use crate::session::Session;
use crate::transport::TransportError;

/// Retry settings for the invoker.
#[derive(Debug, Clone)]
pub struct InvokerConfig {
    /// Attempt budget for retryable faults.
    pub max_attempts: u32,

    /// Fixed delay before retrying an overloaded call.
    pub retry_delay: Duration,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            retry_delay: crate::config::DEFAULT_RETRY_DELAY,
        }
    }
}

impl From<&DriverConfig> for InvokerConfig {
    fn from(config: &DriverConfig) -> Self {
        Self {
            max_attempts: config.api_retry_count,
            retry_delay: config.retry_delay,
        }
    }
}

/// Per-invocation state. Never shared across calls.
struct CallContext<'a> {
    call_id: Uuid,
    method: &'a str,
    attempt: u32,
    /// Signature of the `AuthExpired` fault that triggered the last
    /// re-authentication, cleared by any other fault.
    last_auth_fault: Option<FaultSignature>,
}

impl<'a> CallContext<'a> {
    fn new(method: &'a str) -> Self {
        Self {
            call_id: Uuid::new_v4(),
            method,
            attempt: 0,
            last_auth_fault: None,
        }
    }
}

/// Dispatches remote calls with classification-driven retry.
#[derive(Clone)]
pub struct Invoker {
    session: Arc<Session>,
    config: InvokerConfig,
    shutdown: watch::Receiver<bool>,
}

impl Invoker {
    /// Create an invoker that is never cancelled.
    pub fn new(session: Arc<Session>, config: InvokerConfig) -> Self {
        let (_tx, shutdown) = watch::channel(false);
        Self::with_shutdown(session, config, shutdown)
    }

    /// Create an invoker whose suspension points end on shutdown.
    pub fn with_shutdown(
        session: Arc<Session>,
        config: InvokerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            session,
            config,
            shutdown,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// A receiver for the shutdown signal this invoker honors.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.clone()
    }

    /// Invoke `method_path` with `args`, retrying as described in the module
    /// docs.
    pub async fn invoke(&self, method_path: &str, args: Value) -> Result<Value, DriverError> {
        let ctx = CallContext::new(method_path);
        let span = tracing::debug_span!("invoke", method = method_path, call_id = %ctx.call_id);
        self.run(ctx, &args).instrument(span).await
    }

    /// Invoke and decode the result.
    pub async fn invoke_as<T: DeserializeOwned>(
        &self,
        method_path: &str,
        args: Value,
    ) -> Result<T, DriverError> {
        let value = self.invoke(method_path, args).await?;
        serde_json::from_value(value).map_err(|e| DriverError::Malformed {
            method: method_path.to_string(),
            detail: e.to_string(),
        })
    }

    /// Read one property of a managed object.
    pub async fn get_dynamic_property(
        &self,
        obj: &str,
        obj_type: &str,
        property: &str,
    ) -> Result<Value, DriverError> {
        self.invoke(
            remote::GET_DYNAMIC_PROPERTY,
            json!({ "obj": obj, "type": obj_type, "property": property }),
        )
        .await
    }

    async fn run(&self, mut ctx: CallContext<'_>, args: &Value) -> Result<Value, DriverError> {
        loop {
            ctx.attempt += 1;
            let (transport, generation) = self.session.transport().await?;

            let err = match transport.call(ctx.method, args).await {
                Ok(value) => {
                    if ctx.attempt > 1 {
                        debug!(attempts = ctx.attempt, "Call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            let kind = classify(&err);
            let signature = FaultSignature::of(&err);
            if kind == FaultKind::AuthExpired && ctx.last_auth_fault.as_ref() == Some(&signature) {
                warn!(
                    faults = %signature,
                    attempt = ctx.attempt,
                    "Same auth fault after fresh login, treating as empty result"
                );
                return Ok(Value::Array(Vec::new()));
            }
            if !kind.is_retryable() || ctx.attempt > self.config.max_attempts {
                return Err(self.surface(&ctx, kind, err));
            }

            if kind == FaultKind::AuthExpired {
                warn!(
                    faults = %signature,
                    attempt = ctx.attempt,
                    "Session not authenticated, re-authenticating"
                );
                ctx.last_auth_fault = Some(signature);
                self.session.reauthenticate(generation).await?;
            } else {
                ctx.last_auth_fault = None;
                warn!(
                    error = %err,
                    attempt = ctx.attempt,
                    delay_ms = self.config.retry_delay.as_millis() as u64,
                    "Host overloaded, retrying"
                );
                self.pause(self.config.retry_delay, ctx.method).await?;
            }
        }
    }

    fn surface(&self, ctx: &CallContext<'_>, kind: FaultKind, err: TransportError) -> DriverError {
        error!(
            fault = %kind,
            attempts = ctx.attempt,
            error = %err,
            "Remote call failed"
        );

        let faults = FaultSignature::of(&err);
        let message = err.detail().to_string();
        match kind {
            FaultKind::AuthExpired => DriverError::AuthExpired { faults, message },
            FaultKind::Overloaded => DriverError::Overloaded {
                attempts: ctx.attempt,
                message,
            },
            FaultKind::CallerError => DriverError::CallerError {
                method: ctx.method.to_string(),
                faults,
                message,
            },
            FaultKind::Unknown => DriverError::Unknown {
                method: ctx.method.to_string(),
                message: err.to_string(),
            },
        }
    }

    async fn pause(&self, delay: Duration, what: &str) -> Result<(), DriverError> {
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = shutdown_requested(&mut shutdown) => Err(DriverError::Cancelled(what.to_string())),
        }
    }
}

/// Resolves once shutdown is signalled. Never resolves if the sender is gone
/// without having signalled.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invoker_config_from_driver_config() {
        let mut driver = DriverConfig::new("esx01.lab", "root", "secret");
        driver.api_retry_count = 4;
        driver.retry_delay = Duration::from_millis(10);

        let config = InvokerConfig::from(&driver);
        assert_eq!(config.max_attempts, 4);
        assert_eq!(config.retry_delay, Duration::from_millis(10));
    }

    #[test]
    fn test_invoker_config_default() {
        let config = InvokerConfig::default();
        assert_eq!(config.max_attempts, 10);
        assert_eq!(config.retry_delay, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_shutdown_requested_pends_when_sender_dropped() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        let waited = tokio::time::timeout(
            Duration::from_millis(20),
            shutdown_requested(&mut rx),
        )
        .await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_requested_resolves_on_signal() {
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();
        shutdown_requested(&mut rx).await;
    }
}
