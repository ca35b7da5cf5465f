//! Configuration for the host driver.

use std::fmt;
use std::time::Duration;

use crate::error::DriverError;

/// Environment variable prefix for all driver settings.
pub const ENV_PREFIX: &str = "HOSTLINK_";

/// Delay between retries of an overloaded call.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Shortest accepted interval between task status polls.
pub const MIN_TASK_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Driver configuration.
#[derive(Clone)]
pub struct DriverConfig {
    /// Host name or address of the virtualization host.
    pub host: String,

    /// Username for the management API.
    pub username: String,

    /// Password for the management API.
    pub password: String,

    /// Connection scheme (`https` or `http`).
    pub scheme: String,

    /// Interval between remote task status polls.
    pub task_poll_interval: Duration,

    /// Maximum attempts for a retryable call.
    pub api_retry_count: u32,

    /// Delay between attempts when the host is overloaded.
    pub retry_delay: Duration,

    /// Per-request HTTP timeout.
    pub request_timeout: Duration,

    /// Upper bound on a single remote task wait. `None` waits indefinitely.
    pub task_timeout: Option<Duration>,

    /// Physical adapter whose virtual switch carries VLAN port groups.
    pub vlan_interface: String,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl DriverConfig {
    /// Config with defaults for everything but the endpoint and credentials.
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            password: password.into(),
            scheme: "https".to_string(),
            task_poll_interval: Duration::from_secs(5),
            api_retry_count: 10,
            retry_delay: DEFAULT_RETRY_DELAY,
            request_timeout: Duration::from_secs(30),
            task_timeout: None,
            vlan_interface: "vmnic0".to_string(),
            log_level: "info".to_string(),
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, DriverError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    ///
    /// Keys are looked up with the `HOSTLINK_` prefix.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, DriverError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.trim().is_empty())
        };

        let (Some(host), Some(username), Some(password)) =
            (get("HOST"), get("USERNAME"), get("PASSWORD"))
        else {
            return Err(DriverError::Config(format!(
                "{ENV_PREFIX}HOST, {ENV_PREFIX}USERNAME and {ENV_PREFIX}PASSWORD must be set"
            )));
        };

        let mut config = Self::new(host, username, password);

        if let Some(scheme) = get("SCHEME") {
            if scheme != "https" && scheme != "http" {
                return Err(DriverError::Config(format!(
                    "unsupported scheme '{scheme}'"
                )));
            }
            config.scheme = scheme;
        }

        if let Some(v) = get("TASK_POLL_INTERVAL") {
            let secs: f64 = parse(&v, "TASK_POLL_INTERVAL")?;
            config.task_poll_interval = Duration::try_from_secs_f64(secs)
                .ok()
                .filter(|interval| *interval >= MIN_TASK_POLL_INTERVAL)
                .ok_or_else(|| {
                    DriverError::Config(format!(
                        "{ENV_PREFIX}TASK_POLL_INTERVAL must be at least 0.001 seconds, got '{v}'"
                    ))
                })?;
        }

        if let Some(v) = get("API_RETRY_COUNT") {
            config.api_retry_count = parse(&v, "API_RETRY_COUNT")?;
        }

        if let Some(v) = get("RETRY_DELAY_MS") {
            config.retry_delay = Duration::from_millis(parse(&v, "RETRY_DELAY_MS")?);
        }

        if let Some(v) = get("REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(parse(&v, "REQUEST_TIMEOUT_SECS")?);
        }

        if let Some(v) = get("TASK_TIMEOUT_SECS") {
            config.task_timeout = Some(Duration::from_secs(parse(&v, "TASK_TIMEOUT_SECS")?));
        }

        if let Some(iface) = get("VLAN_INTERFACE") {
            config.vlan_interface = iface;
        }

        if let Some(level) = get("LOG_LEVEL") {
            config.log_level = level;
        }

        Ok(config)
    }

    /// Base URL of the management endpoint.
    pub fn endpoint(&self) -> String {
        format!("{}://{}", self.scheme, self.host)
    }
}

fn parse<T: std::str::FromStr>(value: &str, name: &str) -> Result<T, DriverError> {
    value
        .trim()
        .parse()
        .map_err(|_| DriverError::Config(format!("invalid {ENV_PREFIX}{name}: '{value}'")))
}

impl fmt::Debug for DriverConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverConfig")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("scheme", &self.scheme)
            .field("task_poll_interval", &self.task_poll_interval)
            .field("api_retry_count", &self.api_retry_count)
            .field("retry_delay", &self.retry_delay)
            .field("request_timeout", &self.request_timeout)
            .field("task_timeout", &self.task_timeout)
            .field("vlan_interface", &self.vlan_interface)
            .field("log_level", &self.log_level)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (format!("{ENV_PREFIX}{k}"), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("HOST", "esx01.lab"),
        ("USERNAME", "root"),
        ("PASSWORD", "secret"),
    ];

    #[test]
    fn test_defaults() {
        let config = DriverConfig::from_lookup(lookup(&REQUIRED)).unwrap();
        assert_eq!(config.endpoint(), "https://esx01.lab");
        assert_eq!(config.task_poll_interval, Duration::from_secs(5));
        assert_eq!(config.api_retry_count, 10);
        assert_eq!(config.retry_delay, Duration::from_secs(2));
        assert_eq!(config.task_timeout, None);
        assert_eq!(config.vlan_interface, "vmnic0");
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_missing_credentials() {
        let err = DriverConfig::from_lookup(lookup(&[("HOST", "esx01.lab")])).unwrap_err();
        assert_eq!(err.reason_code(), "config_error");

        let err = DriverConfig::from_lookup(lookup(&[
            ("HOST", "esx01.lab"),
            ("USERNAME", "root"),
            ("PASSWORD", "  "),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("PASSWORD"));
    }

    #[test]
    fn test_overrides() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("SCHEME", "http"),
            ("TASK_POLL_INTERVAL", "0.5"),
            ("API_RETRY_COUNT", "3"),
            ("RETRY_DELAY_MS", "250"),
            ("TASK_TIMEOUT_SECS", "600"),
            ("VLAN_INTERFACE", "vmnic1"),
        ]);
        let config = DriverConfig::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.endpoint(), "http://esx01.lab");
        assert_eq!(config.task_poll_interval, Duration::from_millis(500));
        assert_eq!(config.api_retry_count, 3);
        assert_eq!(config.retry_delay, Duration::from_millis(250));
        assert_eq!(config.task_timeout, Some(Duration::from_secs(600)));
        assert_eq!(config.vlan_interface, "vmnic1");
    }

    #[test]
    fn test_invalid_values() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("API_RETRY_COUNT", "lots"));
        assert!(DriverConfig::from_lookup(lookup(&pairs)).is_err());

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("TASK_POLL_INTERVAL", "-1"));
        assert!(DriverConfig::from_lookup(lookup(&pairs)).is_err());

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("TASK_POLL_INTERVAL", "NaN"));
        assert!(DriverConfig::from_lookup(lookup(&pairs)).is_err());

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("SCHEME", "ftp"));
        assert!(DriverConfig::from_lookup(lookup(&pairs)).is_err());
    }

    #[test]
    fn test_poll_interval_floor() {
        for too_small in ["1e-12", "0.0001", "0"] {
            let mut pairs = REQUIRED.to_vec();
            pairs.push(("TASK_POLL_INTERVAL", too_small));
            let err = DriverConfig::from_lookup(lookup(&pairs)).unwrap_err();
            assert_eq!(err.reason_code(), "config_error", "{too_small}");
        }

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("TASK_POLL_INTERVAL", "1e30"));
        assert!(DriverConfig::from_lookup(lookup(&pairs)).is_err());

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("TASK_POLL_INTERVAL", "0.001"));
        let config = DriverConfig::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.task_poll_interval, MIN_TASK_POLL_INTERVAL);
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = DriverConfig::new("esx01.lab", "root", "hunter2");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
