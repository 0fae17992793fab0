//! Generic IaC and policy stacks (`terraform`)
//!
//! The stack source is materialized once per (stack, target, region) into
//! its own working copy, with tokens substituted, and initialized there.
//! Later runs reuse the initialized copy.

use orgtree::{DeployRequest, Error, Mode, Result, StackOutcome};
use std::fs;
use std::io;
use std::path::Path;

use super::Tooling;
use super::workdir::{self, Tokens};
use crate::paths;

pub fn deploy(tooling: &Tooling, request: &DeployRequest<'_>) -> Result<StackOutcome> {
    let stack = request.stack;
    let target = request.target;
    let tokens = Tokens::for_target(&target, stack.region.as_deref())?;
    let workdir = paths::stack_work_dir(&tooling.work_root, stack, &tokens.id);

    let program = tooling.program("terraform", "tflocal");
    let run = |args: &[&str]| {
        let mut command = tooling.command(program, &workdir, request);
        command.args(args);
        request.console.run_checked(command, request.console_target)
    };

    if !workdir.exists() {
        let prepared = workdir::materialize(&stack.path, &workdir, &tokens).and_then(|()| run(&["init"]));
        if let Err(e) = prepared {
            remove_working_copy(&workdir);
            return Err(e);
        }
    }

    if let Some(template) = &stack.workspace {
        let workspace = workdir::substitute(template, &tokens)?;
        if workspace.trim().is_empty() {
            return Err(Error::config(format!(
                "stack {} has an empty workspace name",
                stack.name
            )));
        }
        run(&["workspace", "select", "-or-create", &workspace])?;
    }

    match request.mode {
        Mode::Diff => {
            run(&["plan"])?;
            Ok(StackOutcome::Planned)
        }
        Mode::Deploy => {
            run(&["apply", "-auto-approve"])?;
            Ok(StackOutcome::Deployed)
        }
    }
}

fn remove_working_copy(workdir: &Path) {
    match fs::remove_dir_all(workdir) {
        Ok(()) => log::debug!("Removed working copy {}", workdir.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Failed to remove {}: {e}", workdir.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stacks::testing::ScriptedConsole;
    use orgtree::{AccountSession, OrgTree, Stack, StackKind, StackTarget, Target};
    use tempfile::TempDir;

    struct Fixture {
        source: TempDir,
        work: TempDir,
        tree: OrgTree,
    }

    impl Fixture {
        fn new() -> Self {
            let source = tempfile::tempdir().unwrap();
            fs::write(
                source.path().join("main.tf"),
                "account = \"${telophase.account_id}\"\n",
            )
            .unwrap();

            let mut tree = OrgTree::new("root");
            let group = tree.add_group(tree.root(), "Prod");
            tree.group(group).id.set("ou-prod");
            let account = tree.add_account(group, "web", "web@example.com");
            tree.account(account).id.set("111122223333");

            Self {
                source,
                work: tempfile::tempdir().unwrap(),
                tree,
            }
        }

        fn stack(&self, kind: StackKind) -> Stack {
            Stack::new("net", kind, self.source.path())
        }

        fn tooling(&self) -> Tooling {
            Tooling {
                endpoint_url: None,
                work_root: self.work.path().to_path_buf(),
            }
        }

        fn deploy(
            &self,
            stack: &Stack,
            target: StackTarget<'_>,
            console: &ScriptedConsole,
            mode: Mode,
        ) -> Result<StackOutcome> {
            let session = AccountSession::new();
            let request = DeployRequest {
                target,
                stack,
                credentials: None,
                session: &session,
                mode,
                console,
                console_target: &Target::organization(),
            };
            deploy(&self.tooling(), &request)
        }

        fn account_target(&self) -> StackTarget<'_> {
            let (_, account) = self.tree.accounts().next().unwrap();
            StackTarget::Account(account)
        }
    }

    #[test]
    fn test_init_once_then_apply() {
        let fixture = Fixture::new();
        let stack = fixture.stack(StackKind::GenericIac);
        let console = ScriptedConsole::default();

        let outcome = fixture
            .deploy(&stack, fixture.account_target(), &console, Mode::Deploy)
            .unwrap();
        assert_eq!(outcome, StackOutcome::Deployed);
        fixture
            .deploy(&stack, fixture.account_target(), &console, Mode::Deploy)
            .unwrap();

        assert_eq!(
            console.commands(),
            [
                "terraform init",
                "terraform apply -auto-approve",
                "terraform apply -auto-approve"
            ]
        );
        let workdir = paths::stack_work_dir(fixture.work.path(), &stack, "111122223333");
        assert_eq!(
            fs::read_to_string(workdir.join("main.tf")).unwrap(),
            "account = \"111122223333\"\n"
        );
    }

    #[test]
    fn test_diff_plans_in_selected_workspace() {
        let fixture = Fixture::new();
        let mut stack = fixture.stack(StackKind::GenericIac);
        stack.workspace = Some("${telophase.resource_name}-telophase.resource_id".to_string());
        let console = ScriptedConsole::default();

        let outcome = fixture
            .deploy(&stack, fixture.account_target(), &console, Mode::Diff)
            .unwrap();

        assert_eq!(outcome, StackOutcome::Planned);
        assert_eq!(
            console.commands(),
            [
                "terraform init",
                "terraform workspace select -or-create web-111122223333",
                "terraform plan"
            ]
        );
    }

    #[test]
    fn test_failed_init_removes_the_working_copy() {
        let fixture = Fixture::new();
        let stack = fixture.stack(StackKind::GenericIac);
        let console = ScriptedConsole::failing_on("init");

        let err = fixture
            .deploy(&stack, fixture.account_target(), &console, Mode::Deploy)
            .unwrap_err();

        assert!(matches!(err, Error::Subprocess { .. }));
        let workdir = paths::stack_work_dir(fixture.work.path(), &stack, "111122223333");
        assert!(!workdir.exists());
    }

    #[test]
    fn test_policy_stack_targets_a_group() {
        let fixture = Fixture::new();
        fs::write(
            fixture.source.path().join("main.tf"),
            "target = \"${telophase.organization_unit_id}\"\n",
        )
        .unwrap();
        let stack = fixture.stack(StackKind::PolicyDocument);
        let group = fixture.tree.group(fixture.tree.group(fixture.tree.root()).children()[0]);
        let console = ScriptedConsole::default();

        fixture
            .deploy(&stack, StackTarget::Group(group), &console, Mode::Deploy)
            .unwrap();

        let workdir = paths::stack_work_dir(fixture.work.path(), &stack, "ou-prod");
        assert_eq!(
            fs::read_to_string(workdir.join("main.tf")).unwrap(),
            "target = \"ou-prod\"\n"
        );
    }

    #[test]
    fn test_unprovisioned_target_is_rejected() {
        let mut fixture = Fixture::new();
        let account = fixture.tree.add_account(fixture.tree.root(), "new", "new@example.com");
        let stack = fixture.stack(StackKind::GenericIac);
        let console = ScriptedConsole::default();

        let err = fixture
            .deploy(
                &stack,
                StackTarget::Account(fixture.tree.account(account)),
                &console,
                Mode::Deploy,
            )
            .unwrap_err();
        assert!(matches!(err, Error::Unprovisioned(_)));
        assert!(console.commands().is_empty());
    }
}
