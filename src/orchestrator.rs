//! Concurrent per-account stack runs
//!
//! One task per target account runs on a rayon pool sized to the number of
//! tasks. Inside a task stacks run strictly in order and the first failure
//! aborts the rest of that account only. Policy stacks run in one extra task
//! with ambient credentials.
//!
//! Nothing is shared between tasks except the read-only tree and the
//! console, which serializes output itself.

use anyhow::{Context, Result};
use orgtree::{
    Account, AccountId, AccountSession, ConsoleSink, Credentials, Error, ExecContext,
    ExecuteSummary, Mode, OperationKind, OperationResult, OrgProvider, OrgTree,
    ResourceOperation, Stack, StackContext, StackDeployer, StackRef, Target, filter_stacks,
};
use rayon::prelude::*;
use std::collections::HashMap;

use crate::settings::Settings;

/// `--account-tag` value selecting every account.
pub const ALL_TAG: &str = "all";

/// What a run deploys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub mode: Mode,
    /// A tag, or [`ALL_TAG`]
    pub account_tag: String,
    /// Comma-separated stack names
    pub stacks: Option<String>,
    /// Include policy stacks without naming them
    pub all_stacks: bool,
}

impl RunOptions {
    fn matches_tags(&self, tags: &[String]) -> bool {
        self.account_tag == ALL_TAG || tags.iter().any(|tag| *tag == self.account_tag)
    }

    fn includes_policies(&self) -> bool {
        self.all_stacks || self.stacks.is_some()
    }
}

/// Outcome of one task.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub target: Target,
    pub summary: ExecuteSummary,
    /// The error that aborted the task
    pub error: Option<String>,
    /// The account was not provisioned
    pub skipped: bool,
}

impl TaskReport {
    fn new(target: Target) -> Self {
        Self {
            target,
            summary: ExecuteSummary::default(),
            error: None,
            skipped: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.summary.is_success()
    }
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub tasks: Vec<TaskReport>,
}

impl RunReport {
    /// Counts of every task combined.
    pub fn summary(&self) -> ExecuteSummary {
        let mut summary = ExecuteSummary::default();
        for task in &self.tasks {
            summary.merge(&task.summary);
        }
        summary
    }

    pub fn failed(&self) -> impl Iterator<Item = &TaskReport> {
        self.tasks.iter().filter(|task| !task.is_success())
    }

    pub fn is_success(&self) -> bool {
        self.failed().next().is_none()
    }
}

enum Task {
    Account(AccountId),
    Policies(Vec<(StackRef, Stack)>),
}

/// Runs stacks across accounts.
pub struct Orchestrator<'a> {
    tree: &'a OrgTree,
    provider: &'a dyn OrgProvider,
    deployer: &'a dyn StackDeployer,
    console: &'a dyn ConsoleSink,
    settings: &'a Settings,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        tree: &'a OrgTree,
        provider: &'a dyn OrgProvider,
        deployer: &'a dyn StackDeployer,
        console: &'a dyn ConsoleSink,
        settings: &'a Settings,
    ) -> Self {
        Self {
            tree,
            provider,
            deployer,
            console,
            settings,
        }
    }

    /// Accounts whose inherited tags match, sorted by email.
    pub fn target_accounts(&self, options: &RunOptions) -> Vec<AccountId> {
        self.tree
            .all_descendant_accounts(self.tree.root())
            .into_iter()
            .filter(|id| options.matches_tags(&self.tree.all_account_tags(*id)))
            .collect()
    }

    /// Baseline stacks selected for one account, one per region.
    pub fn account_stacks(&self, account: AccountId, options: &RunOptions) -> Vec<Stack> {
        let stacks = match &options.stacks {
            Some(filter) => self.tree.filter_baseline_stacks(account, filter),
            None => self.tree.all_account_baseline_stacks(account),
        };
        stacks.iter().flat_map(Stack::expand_regions).collect()
    }

    /// Policy stacks of the target accounts and of every matching group.
    pub fn policy_stacks(&self, options: &RunOptions, accounts: &[AccountId]) -> Vec<(StackRef, Stack)> {
        let select = |stacks: &[Stack]| match &options.stacks {
            Some(filter) => filter_stacks(stacks, filter),
            None => stacks.to_vec(),
        };

        let root = self.tree.root();
        let groups = std::iter::once(root).chain(self.tree.descendants_preorder(root));
        let mut selected = Vec::new();

        for group in groups {
            if !options.matches_tags(&self.tree.all_group_tags(group)) {
                continue;
            }
            for stack in select(&self.tree.group(group).scp_stacks) {
                selected.extend(
                    stack
                        .expand_regions()
                        .into_iter()
                        .map(|s| (StackRef::Group(group), s)),
                );
            }
        }
        for account in accounts {
            for stack in select(&self.tree.account(*account).scp_stacks) {
                selected.extend(
                    stack
                        .expand_regions()
                        .into_iter()
                        .map(|s| (StackRef::Account(*account), s)),
                );
            }
        }
        selected
    }

    /// Run every task and wait for all of them.
    pub fn run(&self, options: &RunOptions) -> Result<RunReport> {
        let accounts = self.target_accounts(options);
        let mut tasks: Vec<Task> = accounts.iter().copied().map(Task::Account).collect();
        if options.includes_policies() {
            let policies = self.policy_stacks(options, &accounts);
            if !policies.is_empty() {
                tasks.push(Task::Policies(policies));
            }
        }

        if tasks.is_empty() {
            log::info!("No accounts match tag '{}'", options.account_tag);
            return Ok(RunReport::default());
        }
        log::info!("Running {} task(s)", tasks.len());

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(tasks.len())
            .build()
            .context("Failed to create thread pool")?;

        let tasks: Vec<TaskReport> = pool.install(|| {
            tasks
                .par_iter()
                .map(|task| match task {
                    Task::Account(account) => self.run_account(*account, options),
                    Task::Policies(stacks) => self.run_policies(stacks, options),
                })
                .collect()
        });

        Ok(RunReport { tasks })
    }

    fn context(&self, mode: Mode) -> ExecContext<'a> {
        let mut ctx = ExecContext::new(self.tree, self.provider, self.console, mode);
        ctx.account_poll = self.settings.account_poll;
        ctx
    }

    fn run_account(&self, id: AccountId, options: &RunOptions) -> TaskReport {
        let account = self.tree.account(id);
        let target = Target::for_account(account);
        let mut report = TaskReport::new(target.clone());

        if !account.is_provisioned() {
            self.console
                .print("skipping: account is not provisioned yet", &target);
            report.skipped = true;
            return report;
        }

        let stacks = self.account_stacks(id, options);
        if stacks.is_empty() {
            self.console.print("no stacks selected", &target);
            return report;
        }

        let session = AccountSession::new();
        let mut assumed = HashMap::new();

        for (index, stack) in stacks.iter().enumerate() {
            let result = self.deploy_account_stack(
                id,
                account,
                stack,
                &target,
                &session,
                &mut assumed,
                options.mode,
                &mut report.summary,
            );

            if let Err(e) = result {
                let remaining = stacks.len() - index - 1;
                if remaining > 0 {
                    self.console
                        .print(&format!("aborting {remaining} remaining stack(s)"), &target);
                    for _ in 0..remaining {
                        report.summary.add_result(&OperationResult::Skipped {
                            reason: format!("stack {} failed", stack.name),
                        });
                    }
                }
                report.error = Some(e.to_string());
                break;
            }
        }

        report
    }

    #[allow(clippy::too_many_arguments)]
    fn deploy_account_stack(
        &self,
        id: AccountId,
        account: &Account,
        stack: &Stack,
        target: &Target,
        session: &AccountSession,
        assumed: &mut HashMap<String, Credentials>,
        mode: Mode,
        summary: &mut ExecuteSummary,
    ) -> orgtree::Result<()> {
        let credentials = match self.credentials_for(account, stack, assumed) {
            Ok(credentials) => credentials,
            Err(e) => {
                self.console
                    .print(&format!("failed: stack {stack}: {e}"), target);
                summary.add_result(&OperationResult::Failed {
                    error: e.to_string(),
                });
                return Err(e);
            }
        };

        let ctx = self.context(mode).with_stacks(
            target.clone(),
            StackContext {
                deployer: self.deployer,
                credentials: credentials.as_ref(),
                session,
            },
        );
        let op = ResourceOperation::new(OperationKind::DeployStack {
            target: StackRef::Account(id),
            stack: stack.clone(),
        });
        orgtree::call(&op, &ctx, summary).map(|_| ())
    }

    /// Credentials for deploying `stack` into `account`, `None` for ambient.
    fn credentials_for(
        &self,
        account: &Account,
        stack: &Stack,
        assumed: &mut HashMap<String, Credentials>,
    ) -> orgtree::Result<Option<Credentials>> {
        if self.settings.bypass_assume_role {
            return Ok(None);
        }

        let role_arn = match &stack.role_override_arn {
            Some(arn) => arn.clone(),
            None => account
                .role_arn()
                .ok_or_else(|| Error::Unprovisioned(format!("account {}", account.email)))?,
        };
        if let Some(credentials) = assumed.get(&role_arn) {
            return Ok(Some(credentials.clone()));
        }

        match self.provider.assume_role(&role_arn) {
            Ok(credentials) => {
                assumed.insert(role_arn, credentials.clone());
                Ok(Some(credentials))
            }
            Err(Error::Auth { message, .. }) if is_self_assumption(account, &role_arn) => {
                log::info!(
                    "Using ambient credentials for management account {}: {message}",
                    account.email
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn run_policies(&self, stacks: &[(StackRef, Stack)], options: &RunOptions) -> TaskReport {
        let mut report = TaskReport::new(Target::organization());
        let session = AccountSession::new();

        for (target_ref, stack) in stacks {
            let target = match target_ref {
                StackRef::Account(id) => Target::for_account(self.tree.account(*id)),
                StackRef::Group(id) => Target::for_group(self.tree, self.tree.group(*id)),
            };
            let ctx = self.context(options.mode).with_stacks(
                target,
                StackContext {
                    deployer: self.deployer,
                    credentials: None,
                    session: &session,
                },
            );
            let op = ResourceOperation::new(OperationKind::DeployStack {
                target: *target_ref,
                stack: stack.clone(),
            });
            // Policies are independent of each other; keep going.
            if let Err(e) = orgtree::call(&op, &ctx, &mut report.summary) {
                report.error.get_or_insert_with(|| e.to_string());
            }
        }

        report
    }
}

/// Whether `role_arn` is a role of the management account itself.
fn is_self_assumption(account: &Account, role_arn: &str) -> bool {
    account.is_management
        && account
            .id
            .get()
            .is_some_and(|id| role_arn.contains(&format!(":{id}:")))
}
