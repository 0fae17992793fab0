//! Execution context and output traits
//!
//! These traits keep the engine free of any concrete terminal, cloud CLI or
//! IaC tool.

use std::collections::{HashMap, HashSet};
use std::process::{Command, ExitStatus};
use std::sync::{Mutex, PoisonError};

use crate::error::{Error, Result};
use crate::poll::PollConfig;
use crate::provider::{Credentials, OrgProvider};
use crate::stack::Stack;
use crate::tree::{Account, OrgNode, OrgTree};
use crate::types::Mode;

/// Who a line of output belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    /// Stable key (account email, group path) used for colors and panes
    pub key: String,
    /// Display label
    pub label: String,
}

impl Target {
    /// Output not tied to a single account.
    pub fn organization() -> Self {
        Self {
            key: "organization".to_string(),
            label: "organization".to_string(),
        }
    }

    pub fn for_account(account: &Account) -> Self {
        let label = match account.id.get() {
            Some(id) => format!("{}({id})", account.name),
            None => account.name.clone(),
        };
        Self {
            key: account.email.clone(),
            label,
        }
    }

    pub fn for_group(tree: &OrgTree, group: &OrgNode) -> Self {
        let key = match group.parent() {
            Some(parent) => format!("{}/{}", tree.path_of(parent), group.name),
            None => group.name.clone(),
        };
        Self {
            label: key.clone(),
            key,
        }
    }
}

/// Output boundary: the stdout printer or the live view.
pub trait ConsoleSink: Send + Sync {
    /// Print one message attributed to `target`.
    fn print(&self, message: &str, target: &Target);

    /// Run `command`, streaming its output attributed to `target`.
    fn run_command(&self, command: Command, target: &Target) -> Result<ExitStatus>;

    /// Run `command` and turn a non-zero exit into [`Error::Subprocess`].
    fn run_checked(&self, command: Command, target: &Target) -> Result<()> {
        let rendered = render_command(&command);
        let status = self.run_command(command, target)?;
        if status.success() {
            Ok(())
        } else {
            Err(Error::Subprocess {
                command: rendered,
                code: status.code(),
            })
        }
    }
}

/// Program and arguments of a command, space separated.
pub fn render_command(command: &Command) -> String {
    std::iter::once(command.get_program())
        .chain(command.get_args())
        .map(|part| part.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// The resource a stack deploys into.
#[derive(Debug, Clone, Copy)]
pub enum StackTarget<'a> {
    Account(&'a Account),
    Group(&'a OrgNode),
}

impl StackTarget<'_> {
    /// Provider id of the target, if provisioned.
    pub fn id(&self) -> Option<String> {
        match self {
            StackTarget::Account(account) => account.id.get(),
            StackTarget::Group(group) => group.id.get(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            StackTarget::Account(account) => &account.name,
            StackTarget::Group(group) => &group.name,
        }
    }

    /// Resource type, as used in substitution tokens.
    pub fn resource_type(&self) -> &'static str {
        match self {
            StackTarget::Account(_) => "account",
            StackTarget::Group(_) => "organization_unit",
        }
    }
}

/// State owned by one account task for the duration of a run.
#[derive(Debug, Default)]
pub struct AccountSession {
    bootstrapped: Mutex<HashSet<String>>,
}

impl AccountSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `region` needs bootstrapping. Returns `false` when it
    /// was already recorded this run.
    pub fn mark_bootstrapped(&self, region: &str) -> bool {
        self.bootstrapped
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(region.to_string())
    }

    /// Forget a region after a failed bootstrap so the next stack retries.
    pub fn unmark_bootstrapped(&self, region: &str) {
        self.bootstrapped
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(region);
    }
}

/// Everything a deployer needs for one stack.
pub struct DeployRequest<'a> {
    pub target: StackTarget<'a>,
    pub stack: &'a Stack,
    /// `None` means ambient credentials
    pub credentials: Option<&'a Credentials>,
    pub session: &'a AccountSession,
    pub mode: Mode,
    pub console: &'a dyn ConsoleSink,
    pub console_target: &'a Target,
}

/// How a stack deployment ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackOutcome {
    Deployed,
    NoChanges,
    /// Diff mode: changes were printed
    Planned,
}

/// Deploys IaC stacks of every kind.
pub trait StackDeployer: Send + Sync {
    fn deploy(&self, request: &DeployRequest<'_>) -> Result<StackOutcome>;
}

/// Stack-related parts of the context, present in account tasks.
pub struct StackContext<'a> {
    pub deployer: &'a dyn StackDeployer,
    pub credentials: Option<&'a Credentials>,
    pub session: &'a AccountSession,
}

/// Context passed to operation calls.
pub struct ExecContext<'a> {
    pub tree: &'a OrgTree,
    pub provider: &'a dyn OrgProvider,
    pub console: &'a dyn ConsoleSink,
    pub mode: Mode,
    /// Output attribution for this call tree
    pub target: Target,
    pub account_poll: PollConfig,
    pub stacks: Option<StackContext<'a>>,
    /// Old group id to the id it was recreated under in this run
    relocations: Mutex<HashMap<String, String>>,
}

impl<'a> ExecContext<'a> {
    /// Context for organization operations.
    pub fn new(
        tree: &'a OrgTree,
        provider: &'a dyn OrgProvider,
        console: &'a dyn ConsoleSink,
        mode: Mode,
    ) -> Self {
        Self {
            tree,
            provider,
            console,
            mode,
            target: Target::organization(),
            account_poll: PollConfig::account_creation(),
            stacks: None,
            relocations: Mutex::default(),
        }
    }

    /// Same context, attributed to `target` and able to deploy stacks.
    pub fn with_stacks(mut self, target: Target, stacks: StackContext<'a>) -> Self {
        self.target = target;
        self.stacks = Some(stacks);
        self
    }

    pub fn print(&self, message: &str) {
        self.console.print(message, &self.target);
    }

    /// Record that the group `old_id` now lives on as `new_id`.
    pub fn record_relocation(&self, old_id: &str, new_id: &str) {
        self.relocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(old_id.to_string(), new_id.to_string());
    }

    /// Current id of a group known as `id` when the run started.
    pub fn resolve_group_id(&self, id: &str) -> String {
        let relocations = self.relocations.lock().unwrap_or_else(PoisonError::into_inner);
        let mut current = id;
        // Bounded by the map size in case of a cycle.
        for _ in 0..relocations.len() {
            match relocations.get(current) {
                Some(next) => current = next.as_str(),
                None => break,
            }
        }
        current.to_string()
    }
}
