//! IaC stack deployers
//!
//! [`IacDeployer`] is the binary's [`StackDeployer`]: it picks the strategy
//! by stack kind.
//!
//! - Declarative templates go through the change-set state machine
//! - Programmatic IaC runs `cdk` (bootstrap, synth, diff or deploy)
//! - Generic IaC and policy stacks run `terraform` in a materialized copy
//!
//! With the local endpoint enabled the `cdklocal` and `tflocal` wrappers are
//! used instead.

pub mod cdk;
pub mod changeset;
pub mod terraform;
pub mod workdir;

use orgtree::{DeployRequest, Result, StackDeployer, StackKind, StackOutcome};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::settings::Settings;
use changeset::{ChangeSetDeployer, CloudFormationApi};

/// How IaC tools are invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tooling {
    /// Local endpoint, switching to the `*local` wrappers
    pub endpoint_url: Option<String>,
    /// Root of working copies and synth output
    pub work_root: PathBuf,
}

impl Tooling {
    pub fn new(settings: &Settings, work_root: PathBuf) -> Self {
        Self {
            endpoint_url: settings.endpoint_url.clone(),
            work_root,
        }
    }

    /// `local` when the local endpoint is enabled, `program` otherwise.
    pub fn program<'a>(&self, program: &'a str, local: &'a str) -> &'a str {
        if self.endpoint_url.is_some() { local } else { program }
    }

    /// A tool command running in `dir` with the request's credentials and
    /// region in its environment.
    pub fn command(&self, program: &str, dir: &Path, request: &DeployRequest<'_>) -> Command {
        let mut command = Command::new(program);
        command.current_dir(dir);

        if let Some(credentials) = request.credentials {
            command.env_remove("AWS_PROFILE");
            command.envs(credentials.to_env());
        }
        if let Some(region) = &request.stack.region {
            command.env("AWS_REGION", region);
            command.env("AWS_DEFAULT_REGION", region);
        }
        if let Some(endpoint) = &self.endpoint_url {
            command.env("AWS_ENDPOINT_URL", endpoint);
        }
        command
    }
}

/// Deploys every stack kind.
pub struct IacDeployer<'a> {
    tooling: Tooling,
    change_sets: ChangeSetDeployer<'a>,
}

impl<'a> IacDeployer<'a> {
    pub fn new(settings: &Settings, work_root: PathBuf, api: &'a dyn CloudFormationApi) -> Self {
        Self {
            tooling: Tooling::new(settings, work_root),
            change_sets: ChangeSetDeployer::new(api, settings.change_set_poll),
        }
    }
}

impl StackDeployer for IacDeployer<'_> {
    fn deploy(&self, request: &DeployRequest<'_>) -> Result<StackOutcome> {
        log::debug!(
            "Deploying {} to {} {}",
            request.stack,
            request.target.resource_type(),
            request.target.name()
        );
        match request.stack.kind {
            StackKind::DeclarativeTemplate => self.change_sets.deploy(request),
            StackKind::ProgrammaticIac => cdk::deploy(&self.tooling, request),
            StackKind::GenericIac | StackKind::PolicyDocument => {
                terraform::deploy(&self.tooling, request)
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedConsole;
    use super::*;
    use orgtree::{AccountSession, Credentials, Mode, OrgTree, Stack, StackTarget, Target};

    #[test]
    fn test_command_environment() {
        let mut tree = OrgTree::new("root");
        let account = tree.add_account(tree.root(), "web", "web@example.com");
        tree.account(account).id.set("111");
        let mut stack = Stack::new("net", StackKind::GenericIac, "tf/net");
        stack.region = Some("eu-west-1".to_string());
        let credentials = Credentials {
            access_key_id: "AKIA".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: "token".to_string(),
        };
        let console = ScriptedConsole::default();
        let session = AccountSession::new();
        let target = Target::for_account(tree.account(account));
        let request = DeployRequest {
            target: StackTarget::Account(tree.account(account)),
            stack: &stack,
            credentials: Some(&credentials),
            session: &session,
            mode: Mode::Deploy,
            console: &console,
            console_target: &target,
        };

        let tooling = Tooling {
            endpoint_url: Some("http://localhost:4566".to_string()),
            work_root: PathBuf::from("/tmp/telophase"),
        };
        assert_eq!(tooling.program("terraform", "tflocal"), "tflocal");

        let command = tooling.command("tflocal", Path::new("/work"), &request);
        let envs: Vec<(String, Option<String>)> = command
            .get_envs()
            .map(|(k, v)| {
                (
                    k.to_string_lossy().into_owned(),
                    v.map(|v| v.to_string_lossy().into_owned()),
                )
            })
            .collect();

        assert!(envs.contains(&("AWS_SESSION_TOKEN".to_string(), Some("token".to_string()))));
        assert!(envs.contains(&("AWS_REGION".to_string(), Some("eu-west-1".to_string()))));
        assert!(envs.contains(&("AWS_PROFILE".to_string(), None)));
        assert!(envs.contains(&(
            "AWS_ENDPOINT_URL".to_string(),
            Some("http://localhost:4566".to_string())
        )));
        assert_eq!(command.get_current_dir(), Some(Path::new("/work")));
    }
}
