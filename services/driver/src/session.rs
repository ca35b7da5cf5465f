//! Session lifecycle against the virtualization host.
//!
//! A `Session` owns the current transport handle and session key. It is
//! shared (behind an `Arc`) by every in-flight call on one driver, so all
//! mutation happens under a single async mutex:
//!
//! - at most one login runs at a time;
//! - callers that saw a stale session pass the generation they observed to
//!   `reauthenticate`, and reuse the fresh session if somebody else already
//!   replaced it.
//!
//! There is no async drop, so owners must call `close()` to log out.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::DriverConfig;
use crate::error::DriverError;
use crate::transport::{Connector, SessionKey, Transport, TransportError};

#[derive(Default)]
struct SessionState {
    transport: Option<Arc<dyn Transport>>,
    key: Option<SessionKey>,
    /// Bumped on every successful login.
    generation: u64,
}

/// Authenticated channel to the host.
pub struct Session {
    connector: Arc<dyn Connector>,
    username: String,
    password: String,
    state: Mutex<SessionState>,
}

impl Session {
    /// Create an unauthenticated session. Login happens lazily on first use.
    pub fn new(
        connector: Arc<dyn Connector>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            connector,
            username: username.into(),
            password: password.into(),
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Create a session using the credentials from the driver config.
    pub fn from_config(connector: Arc<dyn Connector>, config: &DriverConfig) -> Self {
        Self::new(connector, config.username.clone(), config.password.clone())
    }

    /// Establish a fresh session, replacing the current one.
    pub async fn authenticate(&self) -> Result<(), DriverError> {
        let mut state = self.state.lock().await;
        self.login_locked(&mut state).await
    }

    /// Replace the session only if nobody else did since `seen_generation`.
    ///
    /// Returns the generation of the session the caller should use next.
    pub async fn reauthenticate(&self, seen_generation: u64) -> Result<u64, DriverError> {
        let mut state = self.state.lock().await;
        if state.transport.is_some() && state.generation > seen_generation {
            debug!(
                seen_generation,
                generation = state.generation,
                "Session already re-established by another caller"
            );
            return Ok(state.generation);
        }
        self.login_locked(&mut state).await?;
        Ok(state.generation)
    }

    /// Current transport handle and its generation, logging in if needed.
    pub async fn transport(&self) -> Result<(Arc<dyn Transport>, u64), DriverError> {
        let mut state = self.state.lock().await;
        if state.transport.is_none() {
            self.login_locked(&mut state).await?;
        }
        match &state.transport {
            Some(transport) => Ok((Arc::clone(transport), state.generation)),
            None => Err(self.auth_error("no transport after login".to_string())),
        }
    }

    /// Log out, swallowing every error. Safe to call more than once.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        let Some(transport) = state.transport.take() else {
            return;
        };
        let key = state.key.take();

        match transport.logout().await {
            Ok(()) => {
                if let Some(key) = key {
                    info!(endpoint = %self.connector.endpoint(), session = %key, "Logged out");
                }
            }
            Err(e) => {
                warn!(
                    endpoint = %self.connector.endpoint(),
                    error = %e,
                    "Logout failed, session left to expire on the host"
                );
            }
        }
    }

    /// Key of the current session, if logged in.
    pub async fn session_key(&self) -> Option<SessionKey> {
        self.state.lock().await.key.clone()
    }

    /// Number of successful logins so far.
    pub async fn generation(&self) -> u64 {
        self.state.lock().await.generation
    }

    /// Endpoint of the host this session talks to.
    pub fn endpoint(&self) -> String {
        self.connector.endpoint()
    }

    async fn login_locked(&self, state: &mut SessionState) -> Result<(), DriverError> {
        let transport = self
            .connector
            .connect()
            .await
            .map_err(|e| self.login_failed(e))?;

        let key = transport
            .login(&self.username, &self.password)
            .await
            .map_err(|e| self.login_failed(e))?;

        // Hosts cap the number of concurrent sessions, so retire the old one.
        if let Some(old) = state.key.take() {
            if let Err(e) = transport.terminate_session(&[old.clone()]).await {
                debug!(session = %old, error = %e, "Could not terminate previous session");
            }
        }

        state.transport = Some(transport);
        state.key = Some(key.clone());
        state.generation += 1;

        info!(
            endpoint = %self.connector.endpoint(),
            session = %key,
            generation = state.generation,
            "Session established"
        );
        Ok(())
    }

    fn login_failed(&self, err: TransportError) -> DriverError {
        error!(endpoint = %self.connector.endpoint(), error = %err, "Login failed");
        self.auth_error(err.to_string())
    }

    fn auth_error(&self, detail: String) -> DriverError {
        DriverError::Authentication {
            host: self.connector.endpoint(),
            detail,
        }
    }
}
