//! Execution engine - calls operations and their dependents
//!
//! An operation performs exactly one mutation, then its dependents run in
//! order. A failure is reported, its dependents are skipped and execution
//! continues with the next sibling.

use crate::context::{DeployRequest, ExecContext, StackOutcome, StackTarget};
use crate::error::{Error, Result};
use crate::operation::{OperationForest, OperationKind, ResourceOperation, StackRef};
use crate::poll::{PollState, poll_until};
use crate::provider::{AccountRequest, CreateAccountStatus};
use crate::tree::GroupId;
use crate::types::{ExecuteSummary, OperationResult};

/// Execute every operation of `forest` in pre-order.
pub fn execute(forest: &OperationForest, ctx: &ExecContext<'_>) -> ExecuteSummary {
    let mut summary = ExecuteSummary::default();
    for root in &forest.roots {
        // Failures are already reported and counted.
        let _ = call(root, ctx, &mut summary);
    }
    summary
}

/// Call one operation, then its dependents.
///
/// Returns the operation's own result. Dependent failures are contained:
/// they are reported and counted in `summary` but not returned.
pub fn call(
    op: &ResourceOperation,
    ctx: &ExecContext<'_>,
    summary: &mut ExecuteSummary,
) -> Result<OperationResult> {
    let description = op.describe(ctx.tree);
    log::debug!("calling: {description}");

    match perform(&op.kind, ctx) {
        Ok(result) => {
            ctx.print(&format!("{} {description}", result_label(&result)));
            summary.add_result(&result);
            for dependent in &op.dependents {
                let _ = call(dependent, ctx, summary);
            }
            Ok(result)
        }
        Err(e) => {
            ctx.print(&format!("failed: {description}: {e}"));
            summary.add_result(&OperationResult::Failed {
                error: e.to_string(),
            });
            let skipped = op.dependent_count();
            if skipped > 0 {
                ctx.print(&format!("skipping {skipped} dependent operation(s)"));
                for _ in 0..skipped {
                    summary.add_result(&OperationResult::Skipped {
                        reason: description.clone(),
                    });
                }
            }
            Err(e)
        }
    }
}

fn result_label(result: &OperationResult) -> &'static str {
    match result {
        OperationResult::Created => "created:",
        OperationResult::Modified => "updated:",
        OperationResult::NoChange => "unchanged:",
        OperationResult::Planned => "(diff)",
        OperationResult::Failed { .. } => "failed:",
        OperationResult::Skipped { .. } => "skipped:",
    }
}

/// Provider id of `group`, or [`Error::Unprovisioned`].
fn group_id(ctx: &ExecContext<'_>, group: GroupId) -> Result<String> {
    let node = ctx.tree.group(group);
    node.id
        .get()
        .ok_or_else(|| Error::Unprovisioned(format!("organization unit {}", node.name)))
}

fn perform(kind: &OperationKind, ctx: &ExecContext<'_>) -> Result<OperationResult> {
    if ctx.mode.is_diff() && !matches!(kind, OperationKind::DeployStack { .. }) {
        return Ok(OperationResult::Planned);
    }

    let tree = ctx.tree;
    let provider = ctx.provider;

    match kind {
        OperationKind::CreateGroup { group, new_parent } => {
            let parent_id = group_id(ctx, *new_parent)?;
            let node = tree.group(*group);
            let id = provider.create_group(&node.name, &parent_id)?;
            log::info!("created organization unit {} as {id}", node.name);
            node.id.set(id);
            Ok(OperationResult::Created)
        }

        OperationKind::ReparentGroup {
            group, new_parent, ..
        } => {
            let current_id = group_id(ctx, *group)?;
            let new_parent_id = group_id(ctx, *new_parent)?;
            let node = tree.group(*group);
            let id = provider.recreate_group(&current_id, &node.name, &new_parent_id)?;
            log::info!(
                "recreated organization unit {} as {id} (was {current_id})",
                node.name
            );
            // Its accounts went along; later moves out of it start from the new id.
            ctx.record_relocation(&current_id, &id);
            node.id.set(id);
            Ok(OperationResult::Modified)
        }

        OperationKind::RenameGroup { group, .. } => {
            let id = group_id(ctx, *group)?;
            provider.rename_group(&id, &tree.group(*group).name)?;
            Ok(OperationResult::Modified)
        }

        OperationKind::CreateAccount {
            account,
            new_parent,
        } => {
            let parent_id = group_id(ctx, *new_parent)?;
            let root_id = group_id(ctx, tree.root())?;
            let account = tree.account(*account);

            let request_id = provider
                .create_accounts(&[AccountRequest {
                    email: account.email.clone(),
                    name: account.name.clone(),
                }])?
                .into_iter()
                .next()
                .ok_or_else(|| Error::write("create account", "no request id returned"))?;

            let what = format!("account creation for {}", account.email);
            let account_id = poll_until(&ctx.account_poll, &what, || {
                match provider.describe_create_account_status(&request_id)? {
                    CreateAccountStatus::InProgress => Ok(PollState::Pending),
                    CreateAccountStatus::Succeeded { account_id } => {
                        Ok(PollState::Ready(account_id))
                    }
                    CreateAccountStatus::Failed { reason } => Err(Error::AccountCreation {
                        email: account.email.clone(),
                        reason,
                    }),
                }
            })?;
            account.id.set(account_id.clone());

            // New accounts always land under the root.
            if parent_id != root_id {
                provider.move_account(&account_id, &root_id, &parent_id)?;
            }
            Ok(OperationResult::Created)
        }

        OperationKind::ReparentAccount {
            account,
            new_parent,
            current_parent_id,
        } => {
            let account = tree.account(*account);
            let account_id = account
                .id
                .get()
                .ok_or_else(|| Error::Unprovisioned(format!("account {}", account.email)))?;
            let new_parent_id = group_id(ctx, *new_parent)?;
            let from = ctx.resolve_group_id(current_parent_id);
            if from == new_parent_id {
                return Ok(OperationResult::NoChange);
            }
            provider.move_account(&account_id, &from, &new_parent_id)?;
            Ok(OperationResult::Modified)
        }

        OperationKind::DeployStack { target, stack } => {
            let Some(stacks) = &ctx.stacks else {
                return Ok(OperationResult::Skipped {
                    reason: "no stack deployer configured".to_string(),
                });
            };
            let target = match target {
                StackRef::Account(id) => StackTarget::Account(tree.account(*id)),
                StackRef::Group(id) => StackTarget::Group(tree.group(*id)),
            };
            if target.id().is_none() {
                return Err(Error::Unprovisioned(format!(
                    "{} {}",
                    target.resource_type(),
                    target.name()
                )));
            }

            let request = DeployRequest {
                target,
                stack,
                credentials: stacks.credentials,
                session: stacks.session,
                mode: ctx.mode,
                console: ctx.console,
                console_target: &ctx.target,
            };
            Ok(match stacks.deployer.deploy(&request)? {
                StackOutcome::Deployed => OperationResult::Modified,
                StackOutcome::NoChanges => OperationResult::NoChange,
                StackOutcome::Planned => OperationResult::Planned,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{AccountSession, ConsoleSink, StackContext, StackDeployer, Target};
    use crate::diff::{diff, hydrate};
    use crate::poll::PollConfig;
    use crate::provider::{AccountSummary, Credentials, OrgProvider};
    use crate::stack::{Stack, StackKind};
    use crate::tree::OrgTree;
    use crate::types::Mode;
    use std::collections::HashMap;
    use std::process::{Command, ExitStatus};
    use std::sync::Mutex;
    use std::time::Duration;

    /// In-memory provider recording every mutating call.
    ///
    /// With `locations` set, accounts are tracked by parent id and a move
    /// from the wrong parent fails like the real provider does.
    #[derive(Default)]
    struct FakeProvider {
        calls: Mutex<Vec<String>>,
        fail_create_group: Option<String>,
        locations: Mutex<HashMap<String, String>>,
    }

    impl FakeProvider {
        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl OrgProvider for FakeProvider {
        fn fetch_management_account(&self) -> Result<AccountSummary> {
            Err(Error::read("management account", "not faked"))
        }

        fn root_id(&self) -> Result<String> {
            Ok("r-root".to_string())
        }

        fn fetch_group_and_descendants(&self, _root_id: &str) -> Result<OrgTree> {
            let tree = OrgTree::new("root");
            tree.group(tree.root()).id.set("r-root");
            Ok(tree)
        }

        fn create_group(&self, name: &str, parent_id: &str) -> Result<String> {
            if self.fail_create_group.as_deref() == Some(name) {
                return Err(Error::write("create organization unit", "denied"));
            }
            self.record(format!("create_group {name} {parent_id}"));
            Ok(format!("ou-{}", name.to_lowercase()))
        }

        fn delete_group(&self, id: &str) -> Result<()> {
            self.record(format!("delete_group {id}"));
            Ok(())
        }

        fn rename_group(&self, id: &str, new_name: &str) -> Result<()> {
            self.record(format!("rename_group {id} {new_name}"));
            Ok(())
        }

        fn create_accounts(&self, requests: &[AccountRequest]) -> Result<Vec<String>> {
            for request in requests {
                self.record(format!("create_account {}", request.email));
            }
            Ok(requests.iter().map(|r| format!("car-{}", r.name)).collect())
        }

        fn describe_create_account_status(&self, request_id: &str) -> Result<CreateAccountStatus> {
            match request_id {
                "car-broken" => Ok(CreateAccountStatus::Failed {
                    reason: "EMAIL_ALREADY_EXISTS".to_string(),
                }),
                other => Ok(CreateAccountStatus::Succeeded {
                    account_id: other.replace("car-", "acct-"),
                }),
            }
        }

        fn move_account(&self, account_id: &str, from: &str, to: &str) -> Result<()> {
            self.record(format!("move_account {account_id} {from} {to}"));
            if let Some(current) = self.locations.lock().unwrap().get_mut(account_id) {
                if current != from {
                    return Err(Error::write(
                        "move account",
                        format!("{account_id} is in {current}, not {from}"),
                    ));
                }
                *current = to.to_string();
            }
            Ok(())
        }

        fn current_accounts_for_parent(&self, parent_id: &str) -> Result<Vec<AccountSummary>> {
            let locations = self.locations.lock().unwrap();
            if locations.is_empty() {
                return Ok(vec![AccountSummary {
                    id: format!("{parent_id}-member"),
                    email: "member@example.com".to_string(),
                    name: "member".to_string(),
                }]);
            }
            Ok(locations
                .iter()
                .filter(|(_, parent)| parent.as_str() == parent_id)
                .map(|(id, _)| AccountSummary {
                    id: id.clone(),
                    email: format!("{id}@example.com"),
                    name: id.clone(),
                })
                .collect())
        }

        fn tags(&self, _resource_id: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        fn assume_role(&self, role_arn: &str) -> Result<Credentials> {
            Err(Error::Auth {
                role_arn: role_arn.to_string(),
                message: "not faked".to_string(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingConsole {
        lines: Mutex<Vec<String>>,
    }

    impl ConsoleSink for RecordingConsole {
        fn print(&self, message: &str, _target: &Target) {
            self.lines.lock().unwrap().push(message.to_string());
        }

        fn run_command(&self, _command: Command, _target: &Target) -> Result<ExitStatus> {
            Err(Error::Unprovisioned("no commands in tests".to_string()))
        }
    }

    fn context<'a>(
        tree: &'a OrgTree,
        provider: &'a FakeProvider,
        console: &'a RecordingConsole,
        mode: Mode,
    ) -> ExecContext<'a> {
        let mut ctx = ExecContext::new(tree, provider, console, mode);
        ctx.account_poll = PollConfig {
            interval: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
        };
        ctx
    }

    fn new_org() -> (OrgTree, OrgTree) {
        let mut desired = OrgTree::new("root");
        let prod = desired.add_group(desired.root(), "Prod");
        desired.add_account(prod, "e1", "e1@example.com");
        let live = OrgTree::new("root");
        live.group(live.root()).id.set("r-root");
        (desired, live)
    }

    #[test]
    fn test_create_group_then_account_under_it() {
        let (desired, live) = new_org();
        hydrate(&desired, &live).unwrap();
        let forest = diff(&desired, &live);

        let provider = FakeProvider::default();
        let console = RecordingConsole::default();
        let summary = execute(&forest, &context(&desired, &provider, &console, Mode::Deploy));

        assert_eq!(summary.created, 2);
        assert!(summary.is_success());
        assert_eq!(
            provider.calls(),
            [
                "create_group Prod r-root",
                "create_account e1@example.com",
                "move_account acct-e1 r-root ou-prod",
            ]
        );
        let e1 = desired.find_account_by_email("e1@example.com").unwrap();
        assert_eq!(desired.account(e1).id.get().as_deref(), Some("acct-e1"));
    }

    #[test]
    fn test_diff_mode_makes_no_provider_calls() {
        let (desired, live) = new_org();
        hydrate(&desired, &live).unwrap();
        let forest = diff(&desired, &live);

        let provider = FakeProvider::default();
        let console = RecordingConsole::default();
        let summary = execute(&forest, &context(&desired, &provider, &console, Mode::Diff));

        assert_eq!(summary.planned, 2);
        assert!(provider.calls().is_empty());
        assert_eq!(
            console.lines.lock().unwrap()[0],
            "(diff) Create organization unit Prod under root"
        );
    }

    #[test]
    fn test_failed_branch_skips_dependents_but_not_siblings() {
        let (mut desired, live) = new_org();
        let dev = desired.add_group(desired.root(), "Dev");
        desired.add_account(dev, "d1", "d1@example.com");
        hydrate(&desired, &live).unwrap();
        let forest = diff(&desired, &live);

        let provider = FakeProvider {
            fail_create_group: Some("Dev".to_string()),
            ..Default::default()
        };
        let console = RecordingConsole::default();
        let summary = execute(&forest, &context(&desired, &provider, &console, Mode::Deploy));

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.created, 2);
        assert!(!provider.calls().iter().any(|c| c.contains("d1@example.com")));
        assert!(provider.calls().iter().any(|c| c.contains("e1@example.com")));
    }

    #[test]
    fn test_account_creation_failure_is_reported() {
        let mut desired = OrgTree::new("root");
        desired.group(desired.root()).id.set("r-root");
        let broken = desired.add_account(desired.root(), "broken", "broken@example.com");
        let op = ResourceOperation::new(OperationKind::CreateAccount {
            account: broken,
            new_parent: desired.root(),
        });

        let provider = FakeProvider::default();
        let console = RecordingConsole::default();
        let ctx = context(&desired, &provider, &console, Mode::Deploy);
        let mut summary = ExecuteSummary::default();
        let err = call(&op, &ctx, &mut summary).unwrap_err();

        assert!(matches!(err, Error::AccountCreation { .. }));
        assert_eq!(desired.account(broken).id.get(), None);
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn test_reparent_group_recreates_and_updates_id() {
        let mut tree = OrgTree::new("root");
        tree.group(tree.root()).id.set("r-root");
        let platform = tree.add_group(tree.root(), "Platform");
        tree.group(platform).id.set("ou-platform");
        let web = tree.add_group(platform, "Web");
        tree.group(web).id.set("ou-web-old");

        let op = ResourceOperation::new(OperationKind::ReparentGroup {
            group: web,
            new_parent: platform,
            current_parent_id: "ou-prod".to_string(),
        });
        let provider = FakeProvider::default();
        let console = RecordingConsole::default();
        let ctx = context(&tree, &provider, &console, Mode::Deploy);
        let result = call(&op, &ctx, &mut ExecuteSummary::default()).unwrap();

        assert_eq!(result, OperationResult::Modified);
        assert_eq!(tree.group(web).id.get().as_deref(), Some("ou-web"));
        assert_eq!(
            provider.calls(),
            [
                "create_group Web ou-platform",
                "move_account ou-web-old-member ou-web-old ou-web",
                "delete_group ou-web-old",
            ]
        );
    }

    #[test]
    fn test_account_leaving_a_recreated_group_moves_from_its_new_id() {
        let mut live = OrgTree::new("root");
        live.group(live.root()).id.set("r-root");
        let live_prod = live.add_group(live.root(), "Prod");
        live.group(live_prod).id.set("ou-prod");
        let live_web = live.add_group(live_prod, "Web");
        live.group(live_web).id.set("ou-web-old");
        let a = live.add_account(live_web, "a", "a@example.com");
        live.account(a).id.set("111");

        let mut desired = OrgTree::new("root");
        let prod = desired.add_group(desired.root(), "Prod");
        desired.add_account(prod, "a", "a@example.com");
        let platform = desired.add_group(desired.root(), "Platform");
        let web = desired.add_group(platform, "Web");
        desired.group(web).id.set("ou-web-old");

        hydrate(&desired, &live).unwrap();
        let forest = diff(&desired, &live);

        let provider = FakeProvider::default();
        provider
            .locations
            .lock()
            .unwrap()
            .insert("111".to_string(), "ou-web-old".to_string());
        let console = RecordingConsole::default();
        let summary = execute(&forest, &context(&desired, &provider, &console, Mode::Deploy));

        assert!(summary.is_success(), "{:?}", provider.calls());
        assert_eq!(provider.locations.lock().unwrap()["111"], "ou-prod");
        assert_eq!(desired.group(web).id.get().as_deref(), Some("ou-web"));
        assert_eq!(
            provider.calls(),
            [
                "create_group Platform r-root",
                "create_group Web ou-platform",
                "move_account 111 ou-web-old ou-web",
                "delete_group ou-web-old",
                "move_account 111 ou-web ou-prod",
            ]
        );
    }

    #[test]
    fn test_relocations_are_followed_through_chains() {
        let tree = OrgTree::new("root");
        let provider = FakeProvider::default();
        let console = RecordingConsole::default();
        let ctx = context(&tree, &provider, &console, Mode::Deploy);
        assert_eq!(ctx.resolve_group_id("ou-a"), "ou-a");

        ctx.record_relocation("ou-a", "ou-b");
        ctx.record_relocation("ou-b", "ou-c");
        assert_eq!(ctx.resolve_group_id("ou-a"), "ou-c");
        assert_eq!(ctx.resolve_group_id("ou-x"), "ou-x");
    }

    struct FixedDeployer(StackOutcome);

    impl StackDeployer for FixedDeployer {
        fn deploy(&self, request: &DeployRequest<'_>) -> Result<StackOutcome> {
            request
                .console
                .print(&format!("deploying {}", request.stack.name), request.console_target);
            Ok(self.0)
        }
    }

    #[test]
    fn test_deploy_stack_delegates_to_deployer() {
        let mut tree = OrgTree::new("root");
        let account = tree.add_account(tree.root(), "web", "web@example.com");
        tree.account(account).id.set("111");

        let provider = FakeProvider::default();
        let console = RecordingConsole::default();
        let deployer = FixedDeployer(StackOutcome::NoChanges);
        let session = AccountSession::new();
        let ctx = context(&tree, &provider, &console, Mode::Deploy).with_stacks(
            Target::for_account(tree.account(account)),
            StackContext {
                deployer: &deployer,
                credentials: None,
                session: &session,
            },
        );

        let op = ResourceOperation::new(OperationKind::DeployStack {
            target: StackRef::Account(account),
            stack: Stack::new("net", StackKind::GenericIac, "tf/net"),
        });
        let result = call(&op, &ctx, &mut ExecuteSummary::default()).unwrap();
        assert_eq!(result, OperationResult::NoChange);
        assert_eq!(console.lines.lock().unwrap()[0], "deploying net");
    }

    #[test]
    fn test_deploy_stack_to_unprovisioned_account_fails() {
        let mut tree = OrgTree::new("root");
        let account = tree.add_account(tree.root(), "new", "new@example.com");

        let provider = FakeProvider::default();
        let console = RecordingConsole::default();
        let deployer = FixedDeployer(StackOutcome::Deployed);
        let session = AccountSession::new();
        let ctx = context(&tree, &provider, &console, Mode::Deploy).with_stacks(
            Target::for_account(tree.account(account)),
            StackContext {
                deployer: &deployer,
                credentials: None,
                session: &session,
            },
        );

        let op = ResourceOperation::new(OperationKind::DeployStack {
            target: StackRef::Account(account),
            stack: Stack::new("net", StackKind::GenericIac, "tf/net"),
        });
        let err = call(&op, &ctx, &mut ExecuteSummary::default()).unwrap_err();
        assert!(matches!(err, Error::Unprovisioned(_)));
    }
}
