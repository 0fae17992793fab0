//! Error types for organization reconciliation and execution.
//!
//! Errors are categorized by the phase they abort. Read-phase and
//! configuration errors halt the whole run; everything else is contained
//! to the operation branch or account task that raised it.

use std::time::Duration;
use thiserror::Error;

/// Categories of errors, used to decide how far a failure propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Invalid organization document
    Config,
    /// Failed to read live state from the provider
    Read,
    /// Failed to mutate live state (create/move/rename)
    Write,
    /// IaC tool or change set failure
    Execution,
    /// Role assumption failure
    Auth,
    /// A bounded wait ran out of time
    Timeout,
}

impl ErrorCategory {
    /// Whether an error of this category stops the run before any mutation.
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(self, Self::Config | Self::Read)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Config => "Invalid organization configuration",
            Self::Read => "Could not read the live organization",
            Self::Write => "Could not change the live organization",
            Self::Execution => "Stack execution failed",
            Self::Auth => "Role assumption failed",
            Self::Timeout => "Timed out",
        }
    }
}

/// Errors raised while building, diffing or executing an organization.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid organization document
    #[error("configuration error: {0}")]
    Config(String),

    /// Provider read failed (list/describe calls)
    #[error("failed to read {operation}: {message}")]
    ProviderRead {
        /// What was being read
        operation: String,
        /// Provider error output
        message: String,
    },

    /// Provider write failed (create/move/rename calls)
    #[error("failed to {operation}: {message}")]
    ProviderWrite {
        /// What was being changed
        operation: String,
        /// Provider error output
        message: String,
    },

    /// An IaC tool exited non-zero
    #[error("command `{command}` failed with exit code {}", .code.map_or_else(|| "none".to_string(), |c| c.to_string()))]
    Subprocess {
        /// Rendered command line
        command: String,
        /// Exit code, if the process exited normally
        code: Option<i32>,
    },

    /// Change set creation or execution failed
    #[error("stack {stack}: {reason}")]
    ChangeSet {
        /// Stack name
        stack: String,
        /// Status reason reported by the provider
        reason: String,
    },

    /// Role assumption failed
    #[error("failed to assume {role_arn}: {message}")]
    Auth {
        /// Role that could not be assumed
        role_arn: String,
        /// Provider error output
        message: String,
    },

    /// The provider reported that account creation failed
    #[error("account creation for {email} failed: {reason}")]
    AccountCreation {
        /// Email of the account being created
        email: String,
        /// Failure reason reported by the provider
        reason: String,
    },

    /// A bounded wait expired
    #[error("timed out after {}s waiting for {what}", .after.as_secs())]
    Timeout {
        /// What was being waited on
        what: String,
        /// The deadline that expired
        after: Duration,
    },

    /// An operation needed the id of a resource that is not provisioned yet
    #[error("{0} has no provider id yet")]
    Unprovisioned(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_) => ErrorCategory::Config,
            Error::ProviderRead { .. } => ErrorCategory::Read,
            Error::ProviderWrite { .. } | Error::AccountCreation { .. } => ErrorCategory::Write,
            Error::Auth { .. } => ErrorCategory::Auth,
            Error::Timeout { .. } => ErrorCategory::Timeout,
            Error::Subprocess { .. }
            | Error::ChangeSet { .. }
            | Error::Unprovisioned(_)
            | Error::Io(_) => ErrorCategory::Execution,
        }
    }

    /// Whether this error stops the whole run.
    pub fn is_fatal_for_run(&self) -> bool {
        self.category().is_fatal_for_run()
    }

    /// Shorthand for a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    /// Shorthand for a provider read error.
    pub fn read(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ProviderRead {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a provider write error.
    pub fn write(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ProviderWrite {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// Result type for organization operations.
pub type Result<T> = std::result::Result<T, Error>;
