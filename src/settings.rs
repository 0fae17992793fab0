//! Runtime settings read from the environment
//!
//! # Environment Variables
//!
//! - `TELOPHASE_LOCALSTACK` - send provider calls to a local test endpoint
//!   and use the `cdklocal` / `tflocal` wrappers
//! - `TELOPHASE_ENDPOINT_URL` - endpoint used with `TELOPHASE_LOCALSTACK`
//! - `TELOPHASE_BYPASS_ASSUME_ROLE` - skip role assumption (local endpoint only)
//! - `TELOPHASE_ACCOUNT_POLL_SECS` / `TELOPHASE_CHANGESET_POLL_SECS` - polling intervals
//! - `TELOPHASE_POLL_TIMEOUT_SECS` - deadline for every polling loop
//! - `TELOPHASE_COMMAND_TIMEOUT_SECS` - deadline for IaC subprocesses

use orgtree::PollConfig;
use std::time::Duration;

pub const ENV_LOCALSTACK: &str = "TELOPHASE_LOCALSTACK";
pub const ENV_ENDPOINT_URL: &str = "TELOPHASE_ENDPOINT_URL";
pub const ENV_BYPASS_ASSUME_ROLE: &str = "TELOPHASE_BYPASS_ASSUME_ROLE";
pub const ENV_ACCOUNT_POLL_SECS: &str = "TELOPHASE_ACCOUNT_POLL_SECS";
pub const ENV_CHANGESET_POLL_SECS: &str = "TELOPHASE_CHANGESET_POLL_SECS";
pub const ENV_POLL_TIMEOUT_SECS: &str = "TELOPHASE_POLL_TIMEOUT_SECS";
pub const ENV_COMMAND_TIMEOUT_SECS: &str = "TELOPHASE_COMMAND_TIMEOUT_SECS";

const DEFAULT_LOCAL_ENDPOINT: &str = "http://localhost:4566";

/// Settings for one run, read once and passed explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Provider endpoint override
    pub endpoint_url: Option<String>,
    /// Skip role assumption
    pub bypass_assume_role: bool,
    pub account_poll: PollConfig,
    pub change_set_poll: PollConfig,
    /// Deadline for IaC subprocesses
    pub command_timeout: Option<Duration>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoint_url: None,
            bypass_assume_role: false,
            account_poll: PollConfig::account_creation(),
            change_set_poll: PollConfig::change_set(),
            command_timeout: None,
        }
    }
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |key: &str| {
            lookup(key).is_some_and(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
        };
        let secs = |key: &str| {
            let value = lookup(key)?;
            match value.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Some(Duration::from_secs(secs)),
                _ => {
                    log::warn!("Ignoring {key}={value}: expected a positive number of seconds");
                    None
                }
            }
        };

        let mut settings = Self::default();

        if flag(ENV_LOCALSTACK) {
            let endpoint =
                lookup(ENV_ENDPOINT_URL).unwrap_or_else(|| DEFAULT_LOCAL_ENDPOINT.to_string());
            log::debug!("Using local endpoint {endpoint}");
            settings.endpoint_url = Some(endpoint);
        }

        if flag(ENV_BYPASS_ASSUME_ROLE) {
            if settings.is_local() {
                settings.bypass_assume_role = true;
            } else {
                log::warn!("{ENV_BYPASS_ASSUME_ROLE} is only honoured with {ENV_LOCALSTACK}, ignoring it");
            }
        }

        if let Some(interval) = secs(ENV_ACCOUNT_POLL_SECS) {
            settings.account_poll.interval = interval;
        }
        if let Some(interval) = secs(ENV_CHANGESET_POLL_SECS) {
            settings.change_set_poll.interval = interval;
        }
        if let Some(timeout) = secs(ENV_POLL_TIMEOUT_SECS) {
            settings.account_poll.timeout = timeout;
            settings.change_set_poll.timeout = timeout;
        }
        settings.command_timeout = secs(ENV_COMMAND_TIMEOUT_SECS);

        settings
    }

    /// Whether provider calls go to a local test endpoint.
    pub fn is_local(&self) -> bool {
        self.endpoint_url.is_some()
    }
}
