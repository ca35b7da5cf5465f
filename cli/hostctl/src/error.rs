//! Error display for the CLI.

use colored::Colorize;
use hostlink_driver::DriverError;

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {:#}", "Error:".red().bold(), err);

    let Some(driver_err) = err.downcast_ref::<DriverError>() else {
        return;
    };
    eprintln!("{}", format!("Reason: {}", driver_err.reason_code()).dimmed());
    if let Some(kind) = driver_err.fault_kind() {
        eprintln!("{}", format!("Fault class: {kind}").dimmed());
    }
    if let Some(hint) = hint(driver_err) {
        eprintln!("\n{}", format!("Hint: {hint}").yellow());
    }
}

fn hint(err: &DriverError) -> Option<&'static str> {
    if err.is_abandoned() {
        return Some(match err {
            DriverError::DeadlineExceeded { .. } => {
                "The task may still be running on the host. Raise --task-timeout to wait longer."
            }
            _ => "The task may still be running on the host.",
        });
    }
    match err {
        DriverError::Config(_) => {
            Some("Pass --host, --username and --password or set HOSTLINK_HOST, HOSTLINK_USERNAME and HOSTLINK_PASSWORD.")
        }
        DriverError::Authentication { .. } => {
            Some("Check the credentials and that the management endpoint is reachable.")
        }
        DriverError::Overloaded { .. } => {
            Some("The host is busy. Retry later or raise HOSTLINK_API_RETRY_COUNT.")
        }
        DriverError::InstanceNotFound(_) => Some("Run `hostctl list` to see usable VMs."),
        DriverError::NetworkConfig(_) => {
            Some("Check the host's port groups, or set HOSTLINK_VLAN_INTERFACE to the adapter carrying VLAN traffic.")
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hints_cover_operator_fixable_errors() {
        assert!(hint(&DriverError::Config("missing".to_string())).is_some());
        assert!(hint(&DriverError::InstanceNotFound("vm-a".to_string())).is_some());
        assert!(hint(&DriverError::InvalidArgument("bad".to_string())).is_none());
    }

    #[test]
    fn abandoned_waits_warn_the_task_may_still_run() {
        let cancelled = hint(&DriverError::Cancelled("task-1".to_string())).unwrap();
        assert!(cancelled.contains("still be running"));

        let expired = hint(&DriverError::DeadlineExceeded {
            task: "task-2".to_string(),
            timeout_secs: 30.0,
        })
        .unwrap();
        assert!(expired.contains("--task-timeout"));
    }

    #[test]
    fn config_errors_downcast_through_anyhow_context() {
        let err = anyhow::Error::from(DriverError::Config("missing".to_string()))
            .context("loading connection settings");
        assert!(err.downcast_ref::<DriverError>().is_some());
    }
}
