//! Error types for the host driver.
//!
//! Everything below the operation facade is either absorbed by the retrying
//! invoker or converted into exactly one `DriverError`. Raw transport errors
//! never escape the facade.

use thiserror::Error;

use crate::fault::{FaultKind, FaultSignature};

/// Errors surfaced to callers of the driver.
#[derive(Debug, Error)]
pub enum DriverError {
    /// A session could not be established at all (bad credentials, host
    /// unreachable, malformed login reply).
    #[error("authentication failed against {host}: {detail}")]
    Authentication { host: String, detail: String },

    /// The host kept reporting the session as unauthenticated after the
    /// retry budget was spent.
    #[error("session expired: {message} (faults: {faults})")]
    AuthExpired {
        faults: FaultSignature,
        message: String,
    },

    /// The host stayed overloaded for the whole retry budget.
    #[error("host overloaded after {attempts} attempts: {message}")]
    Overloaded { attempts: u32, message: String },

    /// The request itself was rejected; retrying cannot help.
    #[error("{method} rejected: {message} (faults: {faults})")]
    CallerError {
        method: String,
        faults: FaultSignature,
        message: String,
    },

    /// A remote task reached a terminal state other than success.
    #[error("task {task} failed: {message}")]
    RemoteTaskFailure { task: String, message: String },

    /// Unclassified failure (network error, unparsable reply).
    #[error("{method} failed: {message}")]
    Unknown { method: String, message: String },

    /// The operation was called with arguments the driver cannot use.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No VM with this name exists on the host.
    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    /// The VM is in a power state that does not allow the operation.
    #[error("instance {instance} is {state}, cannot {operation}")]
    InvalidState {
        instance: String,
        state: String,
        operation: &'static str,
    },

    /// The host's virtual networking cannot carry the requested interface.
    #[error("network configuration: {0}")]
    NetworkConfig(String),

    /// A successful reply did not have the expected shape.
    #[error("malformed reply from {method}: {detail}")]
    Malformed { method: String, detail: String },

    /// The driver was shut down while the call was suspended.
    #[error("cancelled while waiting on {0}")]
    Cancelled(String),

    /// The caller-supplied deadline elapsed before the task finished.
    #[error("task {task} did not finish within {timeout_secs:.1}s")]
    DeadlineExceeded { task: String, timeout_secs: f64 },

    /// Configuration is missing or invalid.
    #[error("config error: {0}")]
    Config(String),
}

impl DriverError {
    /// Get the standardized reason code for this error.
    pub fn reason_code(&self) -> &'static str {
        match self {
            DriverError::Authentication { .. } => "authentication_failed",
            DriverError::AuthExpired { .. } => "auth_expired",
            DriverError::Overloaded { .. } => "overloaded",
            DriverError::CallerError { .. } => "caller_error",
            DriverError::RemoteTaskFailure { .. } => "remote_task_failure",
            DriverError::Unknown { .. } => "unknown",
            DriverError::InvalidArgument(_) => "invalid_argument",
            DriverError::InstanceNotFound(_) => "instance_not_found",
            DriverError::InvalidState { .. } => "invalid_state",
            DriverError::Malformed { .. } => "malformed_reply",
            DriverError::Cancelled(_) => "cancelled",
            DriverError::DeadlineExceeded { .. } => "deadline_exceeded",
            DriverError::NetworkConfig(_) => "network_config",
            DriverError::Config(_) => "config_error",
        }
    }

    /// The fault class this error was surfaced for, if it came out of the
    /// retrying invoker.
    pub fn fault_kind(&self) -> Option<FaultKind> {
        match self {
            DriverError::AuthExpired { .. } => Some(FaultKind::AuthExpired),
            DriverError::Overloaded { .. } => Some(FaultKind::Overloaded),
            DriverError::CallerError { .. } => Some(FaultKind::CallerError),
            DriverError::Unknown { .. } => Some(FaultKind::Unknown),
            _ => None,
        }
    }

    /// Returns true if the driver was shut down or the deadline passed.
    pub fn is_abandoned(&self) -> bool {
        matches!(
            self,
            DriverError::Cancelled(_) | DriverError::DeadlineExceeded { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes_are_stable() {
        let err = DriverError::RemoteTaskFailure {
            task: "task-1".to_string(),
            message: "disk full".to_string(),
        };
        assert_eq!(err.reason_code(), "remote_task_failure");
        assert_eq!(err.to_string(), "task task-1 failed: disk full");
        assert!(err.fault_kind().is_none());
    }

    #[test]
    fn test_caller_error_display_carries_faults() {
        let err = DriverError::CallerError {
            method: "PowerOnVM_Task".to_string(),
            faults: FaultSignature::from_codes(["InvalidArgument"]),
            message: "bad vm".to_string(),
        };
        assert_eq!(err.fault_kind(), Some(FaultKind::CallerError));
        assert!(err.to_string().contains("InvalidArgument"));
    }

    #[test]
    fn test_abandoned() {
        assert!(DriverError::Cancelled("task-1".to_string()).is_abandoned());
        assert!(!DriverError::InstanceNotFound("vm".to_string()).is_abandoned());
    }
}
