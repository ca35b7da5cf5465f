//! Fault classification.
//!
//! Maps a transport error onto the remedy the invoker applies:
//!
//! | Kind          | Remedy                                   |
//! |---------------|------------------------------------------|
//! | `AuthExpired` | re-authenticate and retry, no delay      |
//! | `Overloaded`  | sleep the fixed delay and retry          |
//! | `CallerError` | surface immediately                      |
//! | `Unknown`     | surface immediately                      |

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::transport::TransportError;

/// Fault code the host returns for an expired or idle session.
pub const FAULT_NOT_AUTHENTICATED: &str = "NotAuthenticated";

/// Fault codes the host uses for capacity problems.
pub const OVERLOAD_FAULTS: &[&str] = &["ServerBusy", "RequestLimitExceeded", "SessionOverload"];

/// Classification of a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    AuthExpired,
    Overloaded,
    CallerError,
    Unknown,
}

impl FaultKind {
    /// Whether the invoker retries this kind at all.
    pub fn is_retryable(self) -> bool {
        matches!(self, FaultKind::AuthExpired | FaultKind::Overloaded)
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FaultKind::AuthExpired => "auth_expired",
            FaultKind::Overloaded => "overloaded",
            FaultKind::CallerError => "caller_error",
            FaultKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Classify a transport error.
pub fn classify(err: &TransportError) -> FaultKind {
    match err {
        TransportError::Fault { faults, .. } => {
            if faults.iter().any(|f| f == FAULT_NOT_AUTHENTICATED) {
                FaultKind::AuthExpired
            } else if faults.iter().any(|f| OVERLOAD_FAULTS.contains(&f.as_str())) {
                FaultKind::Overloaded
            } else {
                FaultKind::CallerError
            }
        }
        TransportError::Overloaded(_) => FaultKind::Overloaded,
        TransportError::InvalidRequest(_) => FaultKind::CallerError,
        TransportError::Connection(_) | TransportError::Malformed(_) => FaultKind::Unknown,
    }
}

/// The set of structured fault codes attached to one error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FaultSignature(BTreeSet<String>);

impl FaultSignature {
    pub fn from_codes<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(codes.into_iter().map(Into::into).collect())
    }

    pub fn of(err: &TransportError) -> Self {
        Self::from_codes(err.fault_codes().iter().cloned())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, code: &str) -> bool {
        self.0.contains(code)
    }
}

impl fmt::Display for FaultSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let codes: Vec<&str> = self.0.iter().map(String::as_str).collect();
        f.write_str(&codes.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_not_authenticated_wins_over_overload() {
        let err = TransportError::fault(["ServerBusy", FAULT_NOT_AUTHENTICATED], "idle");
        assert_eq!(classify(&err), FaultKind::AuthExpired);
    }

    #[test]
    fn test_transport_level_errors() {
        assert_eq!(
            classify(&TransportError::Overloaded("503".into())),
            FaultKind::Overloaded
        );
        assert_eq!(
            classify(&TransportError::InvalidRequest("bad args".into())),
            FaultKind::CallerError
        );
        assert_eq!(
            classify(&TransportError::Connection("reset".into())),
            FaultKind::Unknown
        );
        assert_eq!(
            classify(&TransportError::Malformed("eof".into())),
            FaultKind::Unknown
        );
    }

    #[test]
    fn test_signature_is_order_insensitive() {
        let a = FaultSignature::from_codes(["A", "B"]);
        let b = FaultSignature::from_codes(["B", "A", "A"]);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "A,B");
        assert_eq!(FaultSignature::default().to_string(), "none");
    }

    #[test]
    fn test_retryable() {
        assert!(FaultKind::AuthExpired.is_retryable());
        assert!(FaultKind::Overloaded.is_retryable());
        assert!(!FaultKind::CallerError.is_retryable());
        assert!(!FaultKind::Unknown.is_retryable());
    }

    fn ordinary_code() -> impl Strategy<Value = String> {
        "[A-Z][A-Za-z]{2,20}".prop_filter("reserved fault code", |c| {
            c != FAULT_NOT_AUTHENTICATED && !OVERLOAD_FAULTS.contains(&c.as_str())
        })
    }

    proptest! {
        #[test]
        fn prop_structured_faults_without_reserved_codes_are_caller_errors(
            codes in proptest::collection::vec(ordinary_code(), 0..5),
            message in ".*",
        ) {
            let err = TransportError::fault(codes, message);
            prop_assert_eq!(classify(&err), FaultKind::CallerError);
        }

        #[test]
        fn prop_not_authenticated_always_classifies_as_auth_expired(
            mut codes in proptest::collection::vec("[A-Za-z]{1,12}", 0..5),
            position in 0usize..5,
        ) {
            let at = position.min(codes.len());
            codes.insert(at, FAULT_NOT_AUTHENTICATED.to_string());
            let err = TransportError::fault(codes, "idle session");
            prop_assert_eq!(classify(&err), FaultKind::AuthExpired);
        }
    }
}
