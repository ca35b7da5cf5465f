//! # hostlink-testing
//!
//! A scripted, in-memory virtualization host for exercising the driver
//! without a network.
//!
//! Responses are queued per method path. For `get_dynamic_property` calls the
//! queue can be keyed by object and property as well, so task status and VM
//! summaries can be scripted independently:
//!
//! ```ignore
//! let host = FakeHost::new("root", "secret");
//! host.push_ok(remote::LIST_VMS, json!([{"name": "vm-a"}]));
//! host.push_task_states("task-1", &["queued", "running", "success"]);
//! let session = Session::new(host.connector(), "root", "secret");
//! ```
//!
//! When a queue runs dry the method's default (if set) is returned, otherwise
//! a `MethodNotFound` fault.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use hostlink_driver::remote;
use hostlink_driver::transport::{Connector, SessionKey, Transport, TransportError};
use serde_json::{json, Value};

/// One call the host received.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: String,
    pub args: Value,
    pub session: Option<String>,
}

#[derive(Default)]
struct HostState {
    username: String,
    password: String,
    scripts: HashMap<String, VecDeque<Result<Value, TransportError>>>,
    defaults: HashMap<String, Value>,
    login_failures: VecDeque<TransportError>,
    logout_error: Option<TransportError>,
    terminate_error: Option<TransportError>,
    login_delay: Option<Duration>,
    calls: Vec<RecordedCall>,
    connects: u32,
    logins: u32,
    logouts: u32,
    terminated: Vec<String>,
}

/// Shared handle to the fake host. Clones see the same state.
#[derive(Clone, Default)]
pub struct FakeHost {
    state: Arc<Mutex<HostState>>,
}

impl FakeHost {
    /// A host accepting exactly these credentials.
    pub fn new(username: &str, password: &str) -> Self {
        let host = Self::default();
        {
            let mut state = host.lock();
            state.username = username.to_string();
            state.password = password.to_string();
        }
        host
    }

    /// Connector handing out transports bound to this host.
    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(FakeConnector { host: self.clone() })
    }

    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    // ------------------------------------------------------------------
    // Scripting
    // ------------------------------------------------------------------

    /// Queue a raw response for `method`.
    pub fn push(&self, method: &str, response: Result<Value, TransportError>) {
        self.lock()
            .scripts
            .entry(method.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn push_ok(&self, method: &str, value: Value) {
        self.push(method, Ok(value));
    }

    pub fn push_fault(&self, method: &str, codes: &[&str], message: &str) {
        self.push(method, Err(TransportError::fault(codes.iter().copied(), message)));
    }

    /// Queue the same error `times` times.
    pub fn push_repeated(&self, method: &str, err: TransportError, times: usize) {
        for _ in 0..times {
            self.push(method, Err(err.clone()));
        }
    }

    /// Response used once the queue for `method` is empty.
    pub fn set_default(&self, method: &str, value: Value) {
        self.lock().defaults.insert(method.to_string(), value);
    }

    /// Queue a response for `get_dynamic_property(obj, _, property)`.
    pub fn push_property(&self, obj: &str, property: &str, response: Result<Value, TransportError>) {
        self.push(&property_key(obj, property), response);
    }

    /// Default for `get_dynamic_property(obj, _, property)`.
    pub fn set_property(&self, obj: &str, property: &str, value: Value) {
        self.set_default(&property_key(obj, property), value);
    }

    /// Queue task `info` records for each state in order. A state of
    /// `error` carries a generic localized message.
    pub fn push_task_states(&self, task_ref: &str, states: &[&str]) {
        for state in states {
            let info = if *state == "error" {
                task_info(state, Some("A general system error occurred"))
            } else {
                task_info(state, None)
            };
            self.push_property(task_ref, "info", Ok(info));
        }
    }

    /// Fail the next login with `err`.
    pub fn fail_next_login(&self, err: TransportError) {
        self.lock().login_failures.push_back(err);
    }

    pub fn fail_logout(&self, err: TransportError) {
        self.lock().logout_error = Some(err);
    }

    pub fn fail_terminate(&self, err: TransportError) {
        self.lock().terminate_error = Some(err);
    }

    /// Make every login take this long.
    pub fn set_login_delay(&self, delay: Duration) {
        self.lock().login_delay = Some(delay);
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// Number of calls to `method` (any object).
    pub fn calls(&self, method: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.method == method)
            .count()
    }

    /// Number of `get_dynamic_property` reads of `obj.property`.
    pub fn property_reads(&self, obj: &str, property: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| {
                c.method == remote::GET_DYNAMIC_PROPERTY
                    && c.args["obj"] == obj
                    && c.args["property"] == property
            })
            .count()
    }

    /// Every call in arrival order.
    pub fn recorded(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    /// Method paths of every call in arrival order.
    pub fn methods(&self) -> Vec<String> {
        self.lock().calls.iter().map(|c| c.method.clone()).collect()
    }

    pub fn connects(&self) -> u32 {
        self.lock().connects
    }

    pub fn logins(&self) -> u32 {
        self.lock().logins
    }

    pub fn logouts(&self) -> u32 {
        self.lock().logouts
    }

    /// Session keys retired through `terminate_session`.
    pub fn terminated(&self) -> Vec<String> {
        self.lock().terminated.clone()
    }

    fn respond(&self, method: &str, args: &Value, session: Option<String>) -> Result<Value, TransportError> {
        let mut state = self.lock();
        state.calls.push(RecordedCall {
            method: method.to_string(),
            args: args.clone(),
            session,
        });

        let mut keys = Vec::with_capacity(2);
        if let (Some(obj), Some(property)) = (args["obj"].as_str(), args["property"].as_str()) {
            keys.push(property_key(obj, property));
        }
        keys.push(method.to_string());

        for key in &keys {
            if let Some(response) = state.scripts.get_mut(key).and_then(VecDeque::pop_front) {
                return response;
            }
        }
        for key in &keys {
            if let Some(value) = state.defaults.get(key) {
                return Ok(value.clone());
            }
        }
        Err(TransportError::fault(
            ["MethodNotFound"],
            format!("no scripted response for {method}"),
        ))
    }
}

/// `info` record of a task in `state`.
pub fn task_info(state: &str, message: Option<&str>) -> Value {
    let mut info = json!({ "name": "FakeTask", "state": state });
    if let Some(message) = message {
        info["error"] = json!({ "localizedMessage": message });
    }
    info
}

fn property_key(obj: &str, property: &str) -> String {
    format!("{}#{obj}.{property}", remote::GET_DYNAMIC_PROPERTY)
}

struct FakeConnector {
    host: FakeHost,
}

#[async_trait]
impl Connector for FakeConnector {
    fn endpoint(&self) -> String {
        "fake://host".to_string()
    }

    async fn connect(&self) -> Result<Arc<dyn Transport>, TransportError> {
        self.host.lock().connects += 1;
        Ok(Arc::new(FakeTransport {
            host: self.host.clone(),
            key: Mutex::new(None),
        }))
    }
}

struct FakeTransport {
    host: FakeHost,
    key: Mutex<Option<String>>,
}

impl FakeTransport {
    fn key(&self) -> Option<String> {
        self.key
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn login(&self, username: &str, password: &str) -> Result<SessionKey, TransportError> {
        let delay = self.host.lock().login_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.host.lock();
        if let Some(err) = state.login_failures.pop_front() {
            return Err(err);
        }
        if username != state.username || password != state.password {
            return Err(TransportError::fault(
                ["InvalidLogin"],
                "Cannot complete login due to an incorrect user name or password.",
            ));
        }
        state.logins += 1;
        let key = format!("session-{}", state.logins);
        drop(state);

        *self
            .key
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(key.clone());
        Ok(SessionKey(key))
    }

    async fn logout(&self) -> Result<(), TransportError> {
        let mut state = self.host.lock();
        state.logouts += 1;
        match state.logout_error.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn terminate_session(&self, keys: &[SessionKey]) -> Result<(), TransportError> {
        let mut state = self.host.lock();
        if let Some(err) = state.terminate_error.clone() {
            return Err(err);
        }
        state
            .terminated
            .extend(keys.iter().map(|k| k.as_str().to_string()));
        Ok(())
    }

    async fn call(&self, method_path: &str, args: &Value) -> Result<Value, TransportError> {
        self.host.respond(method_path, args, self.key())
    }
}
