//! # Orgtree
//!
//! Declarative management of a cloud organization: account-grouping units,
//! accounts and the IaC stacks deployed into them.
//!
//! The crate models the desired organization as a tree, compares it with the
//! live organization and turns the differences into a forest of operations
//! that can be printed (diff) or executed (deploy).
//!
//! ## Core Concepts
//!
//! - **OrgTree**: arena of groups and accounts with inheritance helpers
//! - **reconcile**: hydrates provider ids and diffs desired against live
//! - **OperationForest**: operations owning the operations that depend on them
//! - **execute / call**: runs operations parent-first, containing failures
//!   to their own branch
//!
//! ## Provider Traits
//!
//! Everything outside the engine comes in through traits:
//!
//! - [`OrgProvider`]: the cloud organization API
//! - [`ConsoleSink`]: output and subprocess streaming
//! - [`StackDeployer`]: IaC stack deployment
//!
//! This keeps the crate free of any concrete cloud CLI, terminal or IaC tool.

pub mod context;
pub mod diff;
pub mod error;
pub mod executor;
pub mod operation;
pub mod poll;
pub mod provider;
pub mod stack;
pub mod tree;
pub mod types;

// Re-export main types at crate root
pub use context::{
    AccountSession, ConsoleSink, DeployRequest, ExecContext, StackContext, StackDeployer,
    StackOutcome, StackTarget, Target, render_command,
};
pub use diff::{diff, hydrate, reconcile};
pub use error::{Error, ErrorCategory, Result};
pub use executor::{call, execute};
pub use operation::{OperationForest, OperationKind, ResourceOperation, StackRef};
pub use poll::{PollConfig, PollState, poll_until};
pub use provider::{
    AccountRequest, AccountSummary, CreateAccountStatus, Credentials, OrgProvider,
};
pub use stack::{Stack, StackKind, TemplateOptions, filter_stacks, split_list};
pub use tree::{Account, AccountId, DEFAULT_ASSUME_ROLE_NAME, GroupId, OrgNode, OrgTree, ProviderId};
pub use types::{ExecuteSummary, Mode, OperationResult};
