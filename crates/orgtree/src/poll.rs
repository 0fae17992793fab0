//! Bounded polling for asynchronous provider work (account creation,
//! change sets).

use crate::error::{Error, Result};
use std::thread;
use std::time::{Duration, Instant};

/// Outcome of one status check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState<T> {
    /// Terminal state reached
    Ready(T),
    /// Still in progress, check again after the interval
    Pending,
}

/// Interval and deadline for a polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay between checks
    pub interval: Duration,
    /// Total time allowed before giving up
    pub timeout: Duration,
}

impl PollConfig {
    /// Defaults for account creation status.
    pub fn account_creation() -> Self {
        Self {
            interval: Duration::from_secs(15),
            timeout: Duration::from_secs(3600),
        }
    }

    /// Defaults for change set status.
    pub fn change_set() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(3600),
        }
    }
}

/// Call `check` until it reports `Ready`, sleeping `config.interval` between
/// attempts.
///
/// Errors from `check` are returned immediately. Once `config.timeout` has
/// elapsed without a terminal state the loop stops with [`Error::Timeout`].
/// The first check runs without delay.
pub fn poll_until<T, F>(config: &PollConfig, what: &str, mut check: F) -> Result<T>
where
    F: FnMut() -> Result<PollState<T>>,
{
    let deadline = Instant::now() + config.timeout;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        if let PollState::Ready(value) = check()? {
            return Ok(value);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(Error::Timeout {
                what: what.to_string(),
                after: config.timeout,
            });
        }

        log::debug!("{what} still pending after attempt {attempt}");
        thread::sleep(config.interval.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn fast() -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_ready_on_first_check() {
        let result = poll_until(&fast(), "status", || Ok(PollState::Ready(7)));
        assert_eq!(result.unwrap(), 7);
    }

    #[test]
    fn test_polls_until_ready() {
        let calls = Cell::new(0);
        let result = poll_until(&fast(), "status", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Ok(PollState::Pending)
            } else {
                Ok(PollState::Ready("done"))
            }
        });
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_error_stops_immediately() {
        let calls = Cell::new(0);
        let result: Result<()> = poll_until(&fast(), "status", || {
            calls.set(calls.get() + 1);
            Err(Error::read("status", "throttled"))
        });
        assert!(matches!(result, Err(Error::ProviderRead { .. })));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_deadline_yields_timeout() {
        let config = PollConfig {
            interval: Duration::from_millis(1),
            timeout: Duration::from_millis(20),
        };
        let result: Result<()> = poll_until(&config, "account e1", || Ok(PollState::Pending));
        match result {
            Err(Error::Timeout { what, .. }) => assert_eq!(what, "account e1"),
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
