//! Programmatic IaC stacks (`cdk`)
//!
//! Each run bootstraps the target environment once per account and region,
//! synthesizes into a private output directory, then runs `diff` or
//! `deploy` against the synthesized app. Every step must exit zero before
//! the next one starts.

use orgtree::{DeployRequest, Error, Mode, Result, StackOutcome, StackTarget};

use super::Tooling;
use crate::paths;

/// Session key used when a stack has no region.
const DEFAULT_REGION_KEY: &str = "default";

pub fn deploy(tooling: &Tooling, request: &DeployRequest<'_>) -> Result<StackOutcome> {
    let stack = request.stack;
    let StackTarget::Account(account) = request.target else {
        return Err(Error::config(format!(
            "stack {} is a CDK app and can only be deployed to accounts",
            stack.name
        )));
    };
    let account_id = account
        .id
        .get()
        .ok_or_else(|| Error::Unprovisioned(format!("account {}", account.email)))?;

    let program = tooling.program("cdk", "cdklocal");
    let run = |args: &[&str]| {
        let mut command = tooling.command(program, &stack.path, request);
        command.args(args);
        request.console.run_checked(command, request.console_target)
    };

    if request.mode == Mode::Deploy {
        let region_key = stack.region.as_deref().unwrap_or(DEFAULT_REGION_KEY);
        if request.session.mark_bootstrapped(region_key) {
            let environment = stack
                .region
                .as_deref()
                .map(|region| format!("aws://{account_id}/{region}"));
            let mut args = vec!["bootstrap"];
            args.extend(environment.as_deref());
            if let Err(e) = run(&args) {
                request.session.unmark_bootstrapped(region_key);
                return Err(e);
            }
        }
    }

    let output = paths::cdk_output_dir(&tooling.work_root, stack, &account_id)
        .to_string_lossy()
        .into_owned();
    let output = output.as_str();
    run(&["synth", "--output", output])?;

    match request.mode {
        Mode::Diff => {
            run(&["diff", "--app", output])?;
            Ok(StackOutcome::Planned)
        }
        Mode::Deploy => {
            run(&[
                "deploy",
                "--app",
                output,
                "--require-approval",
                "never",
                "--all",
            ])?;
            Ok(StackOutcome::Deployed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stacks::testing::ScriptedConsole;
    use orgtree::{AccountId, AccountSession, OrgTree, Stack, StackKind, Target};
    use std::path::PathBuf;

    struct Fixture {
        tree: OrgTree,
        account: AccountId,
        stack: Stack,
        tooling: Tooling,
    }

    impl Fixture {
        fn new(endpoint_url: Option<&str>) -> Self {
            let mut tree = OrgTree::new("root");
            let group = tree.add_group(tree.root(), "Prod");
            let account = tree.add_account(group, "web", "web@example.com");
            tree.account(account).id.set("111122223333");
            tree.group(group).id.set("ou-prod");
            let mut stack = Stack::new("app", StackKind::ProgrammaticIac, "/src/app");
            stack.region = Some("us-east-1".to_string());
            Self {
                tree,
                account,
                stack,
                tooling: Tooling {
                    endpoint_url: endpoint_url.map(str::to_string),
                    work_root: PathBuf::from("/tmp/telophase"),
                },
            }
        }

        fn deploy(
            &self,
            console: &ScriptedConsole,
            session: &AccountSession,
            mode: Mode,
        ) -> Result<StackOutcome> {
            let account = self.tree.account(self.account);
            let target = Target::for_account(account);
            let request = DeployRequest {
                target: StackTarget::Account(account),
                stack: &self.stack,
                credentials: None,
                session,
                mode,
                console,
                console_target: &target,
            };
            deploy(&self.tooling, &request)
        }
    }

    #[test]
    fn test_bootstrap_once_then_synth_and_deploy() {
        let fixture = Fixture::new(None);
        let console = ScriptedConsole::default();
        let session = AccountSession::new();

        let outcome = fixture.deploy(&console, &session, Mode::Deploy).unwrap();
        assert_eq!(outcome, StackOutcome::Deployed);
        fixture.deploy(&console, &session, Mode::Deploy).unwrap();

        let out = paths::cdk_output_dir(
            &fixture.tooling.work_root,
            &fixture.stack,
            "111122223333",
        );
        let out = out.display();
        assert_eq!(
            console.commands(),
            [
                "cdk bootstrap aws://111122223333/us-east-1".to_string(),
                format!("cdk synth --output {out}"),
                format!("cdk deploy --app {out} --require-approval never --all"),
                format!("cdk synth --output {out}"),
                format!("cdk deploy --app {out} --require-approval never --all"),
            ]
        );
    }

    #[test]
    fn test_diff_uses_local_wrapper_without_bootstrap() {
        let fixture = Fixture::new(Some("http://localhost:4566"));
        let console = ScriptedConsole::default();

        let outcome = fixture
            .deploy(&console, &AccountSession::new(), Mode::Diff)
            .unwrap();

        assert_eq!(outcome, StackOutcome::Planned);
        let commands = console.commands();
        assert_eq!(commands.len(), 2);
        assert!(commands[0].starts_with("cdklocal synth"));
        assert!(commands[1].starts_with("cdklocal diff --app"));
    }

    #[test]
    fn test_failed_bootstrap_is_retried_by_the_next_stack() {
        let fixture = Fixture::new(None);
        let console = ScriptedConsole::failing_on("bootstrap");
        let session = AccountSession::new();

        let err = fixture
            .deploy(&console, &session, Mode::Deploy)
            .unwrap_err();
        assert!(matches!(err, Error::Subprocess { code: Some(1), .. }));
        assert_eq!(console.commands().len(), 1);

        console.stop_failing();
        fixture.deploy(&console, &session, Mode::Deploy).unwrap();
        assert_eq!(
            console.commands()[1],
            "cdk bootstrap aws://111122223333/us-east-1"
        );
    }

    #[test]
    fn test_group_target_is_rejected() {
        let fixture = Fixture::new(None);
        let console = ScriptedConsole::default();
        let session = AccountSession::new();
        let group = fixture.tree.group(fixture.tree.group(fixture.tree.root()).children()[0]);
        let target = Target::for_group(&fixture.tree, group);
        let request = DeployRequest {
            target: StackTarget::Group(group),
            stack: &fixture.stack,
            credentials: None,
            session: &session,
            mode: Mode::Deploy,
            console: &console,
            console_target: &target,
        };

        assert!(matches!(
            deploy(&fixture.tooling, &request),
            Err(Error::Config(_))
        ));
        assert!(console.commands().is_empty());
    }
}
