//! Remote task completion tracking.
//!
//! Long-running host operations return a task reference immediately and run
//! asynchronously. `TaskPoller::await_completion` turns that into an
//! awaitable result:
//!
//! ```text
//!  waiter ──await──► oneshot ◄──send once── poll task ──every P──► invoker
//!     │                                          │
//!     └─ shutdown / deadline ─► abort ───────────┘
//! ```
//!
//! The poll task is the only producer and the waiter the only consumer. Task
//! states `queued` and `running` keep polling; `success` and every other
//! state are terminal. If the waiter gives up (shutdown, deadline, or the
//! waiting future is dropped) the poll task stops too.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn, Instrument};

use crate::config::{DriverConfig, MIN_TASK_POLL_INTERVAL};
use crate::error::DriverError;
use crate::invoker::{shutdown_requested, Invoker};
use crate::remote;

/// Reference to a remote task plus a correlation id for logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    pub task_ref: String,
    pub correlation_id: String,
}

impl TaskHandle {
    pub fn new(task_ref: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self {
            task_ref: task_ref.into(),
            correlation_id: correlation_id.into(),
        }
    }
}

/// Interpreted task status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Pending,
    Succeeded(String),
    Failed(String),
}

/// Error record attached to a failed task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskErrorInfo {
    #[serde(default)]
    pub localized_message: Option<String>,
}

/// The `info` property of a remote task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    #[serde(default)]
    pub name: Option<String>,
    pub state: String,
    #[serde(default)]
    pub error: Option<TaskErrorInfo>,
    #[serde(default)]
    pub queue_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub complete_time: Option<DateTime<Utc>>,
}

impl TaskInfo {
    pub fn outcome(&self) -> TaskOutcome {
        match self.state.as_str() {
            "queued" | "running" => TaskOutcome::Pending,
            "success" => TaskOutcome::Succeeded("success".to_string()),
            other => {
                let message = self
                    .error
                    .as_ref()
                    .and_then(|e| e.localized_message.clone())
                    .unwrap_or_else(|| format!("task ended in state '{other}'"));
                TaskOutcome::Failed(message)
            }
        }
    }

    /// Time from queueing to completion, when the host reports both.
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        Some(self.complete_time? - self.queue_time.or(self.start_time)?)
    }
}

/// What the poll task hands to the waiter.
enum Completion {
    Succeeded(String),
    Failed(String),
    QueryFailed(DriverError),
}

/// Polls remote tasks until they reach a terminal state.
#[derive(Clone)]
pub struct TaskPoller {
    invoker: Invoker,
    poll_interval: Duration,
}

impl TaskPoller {
    /// Intervals below `MIN_TASK_POLL_INTERVAL` are raised to it.
    pub fn new(invoker: Invoker, poll_interval: Duration) -> Self {
        Self {
            invoker,
            poll_interval: poll_interval.max(MIN_TASK_POLL_INTERVAL),
        }
    }

    pub fn from_config(invoker: Invoker, config: &DriverConfig) -> Self {
        Self::new(invoker, config.task_poll_interval)
    }

    /// Wait for the task to finish.
    ///
    /// Returns the success status, `RemoteTaskFailure` with the host's error
    /// message, or the error that ended the status query. `deadline` bounds
    /// the wait; `None` waits until the task is terminal or shutdown.
    pub async fn await_completion(
        &self,
        handle: &TaskHandle,
        deadline: Option<Duration>,
    ) -> Result<String, DriverError> {
        let (tx, rx) = oneshot::channel();
        let span = tracing::debug_span!(
            "task_poll",
            task = %handle.task_ref,
            correlation_id = %handle.correlation_id
        );
        let poll = tokio::spawn(
            poll_until_terminal(self.invoker.clone(), handle.clone(), self.poll_interval, tx)
                .instrument(span),
        );

        let mut shutdown = self.invoker.shutdown_signal();
        let expired = async {
            match deadline {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        let completion = tokio::select! {
            completion = rx => completion,
            _ = shutdown_requested(&mut shutdown) => {
                poll.abort();
                info!(task = %handle.task_ref, "Abandoning task wait on shutdown");
                return Err(DriverError::Cancelled(handle.task_ref.clone()));
            }
            _ = expired => {
                poll.abort();
                let timeout_secs = deadline.map(|d| d.as_secs_f64()).unwrap_or_default();
                warn!(
                    task = %handle.task_ref,
                    correlation_id = %handle.correlation_id,
                    timeout_secs,
                    "Task wait deadline exceeded"
                );
                return Err(DriverError::DeadlineExceeded {
                    task: handle.task_ref.clone(),
                    timeout_secs,
                });
            }
        };

        match completion {
            Ok(Completion::Succeeded(status)) => Ok(status),
            Ok(Completion::Failed(message)) => Err(DriverError::RemoteTaskFailure {
                task: handle.task_ref.clone(),
                message,
            }),
            Ok(Completion::QueryFailed(err)) => Err(err),
            Err(_) => Err(DriverError::Unknown {
                method: remote::GET_DYNAMIC_PROPERTY.to_string(),
                message: format!("poll task for {} ended without an outcome", handle.task_ref),
            }),
        }
    }
}

async fn poll_until_terminal(
    invoker: Invoker,
    handle: TaskHandle,
    interval: Duration,
    mut tx: oneshot::Sender<Completion>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut polls: u32 = 0;

    let completion = loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tx.closed() => {
                debug!(polls, "Waiter gone, stopping poll");
                return;
            }
        }
        polls += 1;

        let queried = tokio::select! {
            queried = invoker.get_dynamic_property(&handle.task_ref, remote::TYPE_TASK, "info") => queried,
            _ = tx.closed() => {
                debug!(polls, "Waiter gone, stopping poll");
                return;
            }
        };

        let info = queried.and_then(|value| {
            serde_json::from_value::<TaskInfo>(value).map_err(|e| DriverError::Malformed {
                method: remote::GET_DYNAMIC_PROPERTY.to_string(),
                detail: e.to_string(),
            })
        });

        let info = match info {
            Ok(info) => info,
            Err(err) => {
                warn!(error = %err, polls, "Task status query failed");
                break Completion::QueryFailed(err);
            }
        };

        let name = info.name.as_deref().unwrap_or("unnamed");
        match info.outcome() {
            TaskOutcome::Pending => {
                debug!(task_name = name, state = %info.state, polls, "Task still in progress");
            }
            TaskOutcome::Succeeded(status) => {
                debug!(
                    task_name = name,
                    polls,
                    elapsed_ms = info.elapsed().map(|d| d.num_milliseconds()),
                    "Task status: success"
                );
                break Completion::Succeeded(status);
            }
            TaskOutcome::Failed(message) => {
                warn!(
                    task_name = name,
                    correlation_id = %handle.correlation_id,
                    polls,
                    error = %message,
                    "Task status: error"
                );
                break Completion::Failed(message);
            }
        }
    };

    // The waiter may have given up between the last poll and now.
    let _ = tx.send(completion);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(json: &str) -> TaskInfo {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_pending_states() {
        assert_eq!(info(r#"{"state":"queued"}"#).outcome(), TaskOutcome::Pending);
        assert_eq!(info(r#"{"state":"running"}"#).outcome(), TaskOutcome::Pending);
    }

    #[test]
    fn test_success() {
        let outcome = info(r#"{"name":"PowerOnVM_Task","state":"success"}"#).outcome();
        assert_eq!(outcome, TaskOutcome::Succeeded("success".to_string()));
    }

    #[test]
    fn test_error_carries_localized_message() {
        let outcome = info(
            r#"{"state":"error","error":{"localizedMessage":"Insufficient disk space on datastore"}}"#,
        )
        .outcome();
        assert_eq!(
            outcome,
            TaskOutcome::Failed("Insufficient disk space on datastore".to_string())
        );
    }

    #[test]
    fn test_unrecognized_state_is_terminal_failure() {
        let outcome = info(r#"{"state":"cancelled"}"#).outcome();
        assert_eq!(
            outcome,
            TaskOutcome::Failed("task ended in state 'cancelled'".to_string())
        );
    }

    #[test]
    fn test_elapsed() {
        let task = info(
            r#"{"state":"success","queueTime":"2024-05-01T10:00:00Z","completeTime":"2024-05-01T10:00:07Z"}"#,
        );
        assert_eq!(task.elapsed(), Some(chrono::Duration::seconds(7)));
        assert_eq!(info(r#"{"state":"success"}"#).elapsed(), None);
    }
}
