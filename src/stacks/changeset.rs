//! Declarative template deployment through change sets
//!
//! A deployment walks an explicit state machine:
//!
//! ```text
//! NoStack -> ChangeSetCreating -> ChangeSetReady  -> Executing -> ExecuteComplete
//!                              \                             \-> ExecuteFailed
//!                               -> ChangeSetFailed -> NoChanges
//! ```
//!
//! A change set that fails because the template holds no changes is not an
//! error: it is reported, deleted, and the stack counts as unchanged.

use orgtree::{
    Credentials, DeployRequest, Error, Mode, PollConfig, PollState, Result, StackOutcome,
    poll_until,
};
use std::time::{SystemTime, UNIX_EPOCH};

/// Failure reasons meaning "nothing to deploy".
const NO_CHANGE_REASONS: [&str; 2] = [
    "didn't contain changes",
    "No updates are to be performed",
];

/// Placeholder status of a stack whose first change set was never executed.
const REVIEW_IN_PROGRESS: &str = "REVIEW_IN_PROGRESS";

/// Credentials and region of one API call.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallScope<'a> {
    /// `None` means ambient credentials
    pub credentials: Option<&'a Credentials>,
    pub region: Option<&'a str>,
}

/// Whether a change set creates a stack or updates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSetType {
    Create,
    Update,
}

impl ChangeSetType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeSetType::Create => "CREATE",
            ChangeSetType::Update => "UPDATE",
        }
    }
}

/// Inputs of `create_change_set`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSetRequest {
    pub stack_name: String,
    pub change_set_name: String,
    pub change_set_type: ChangeSetType,
    pub template_path: String,
    /// `Key=Value` pairs
    pub parameters: Vec<String>,
    pub capabilities: Vec<String>,
}

/// Status of an existing stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackStatus {
    pub status: String,
    pub reason: Option<String>,
}

/// Status of a change set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChangeSetDescription {
    /// `CREATE_PENDING`, `CREATE_IN_PROGRESS`, `CREATE_COMPLETE` or `FAILED`
    pub status: String,
    pub status_reason: Option<String>,
    /// `AVAILABLE`, `EXECUTE_IN_PROGRESS`, `EXECUTE_COMPLETE`, `EXECUTE_FAILED` or `OBSOLETE`
    pub execution_status: Option<String>,
    /// One line per resource change
    pub changes: Vec<String>,
}

/// The template deployment API.
pub trait CloudFormationApi: Send + Sync {
    /// `Ok(None)` when the stack does not exist.
    fn describe_stack(&self, scope: &CallScope<'_>, stack_name: &str)
    -> Result<Option<StackStatus>>;

    fn create_change_set(&self, scope: &CallScope<'_>, request: &ChangeSetRequest) -> Result<()>;

    fn describe_change_set(
        &self,
        scope: &CallScope<'_>,
        stack_name: &str,
        change_set_name: &str,
    ) -> Result<ChangeSetDescription>;

    fn execute_change_set(
        &self,
        scope: &CallScope<'_>,
        stack_name: &str,
        change_set_name: &str,
    ) -> Result<()>;

    fn delete_change_set(
        &self,
        scope: &CallScope<'_>,
        stack_name: &str,
        change_set_name: &str,
    ) -> Result<()>;
}

/// States of one change-set deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeSetState {
    NoStack,
    ChangeSetCreating,
    ChangeSetReady { changes: Vec<String> },
    ChangeSetFailed { reason: String },
    NoChanges,
    Executing,
    ExecuteComplete,
    ExecuteFailed { reason: String },
}

/// Whether a change-set failure reason means the template holds no changes.
pub fn is_no_changes(reason: &str) -> bool {
    NO_CHANGE_REASONS.iter().any(|text| reason.contains(text))
}

/// Provider-side name of a template stack: the explicit override, else the
/// primary alias reduced to the characters stack names allow.
pub fn stack_name(stack: &orgtree::Stack) -> String {
    if let Some(name) = &stack.template.stack_name {
        return name.clone();
    }
    stack
        .primary_name()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect()
}

fn change_set_name() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("telophase-{millis}")
}

/// Drives the change-set state machine for one stack.
pub struct ChangeSetDeployer<'a> {
    api: &'a dyn CloudFormationApi,
    poll: PollConfig,
}

impl<'a> ChangeSetDeployer<'a> {
    pub fn new(api: &'a dyn CloudFormationApi, poll: PollConfig) -> Self {
        Self { api, poll }
    }

    pub fn deploy(&self, request: &DeployRequest<'_>) -> Result<StackOutcome> {
        let stack = request.stack;
        let name = stack_name(stack);
        let scope = CallScope {
            credentials: request.credentials,
            region: stack.region.as_deref(),
        };
        let print = |message: &str| request.console.print(message, request.console_target);

        let change_set = ChangeSetRequest {
            stack_name: name.clone(),
            change_set_name: change_set_name(),
            change_set_type: ChangeSetType::Update,
            template_path: stack.path.to_string_lossy().into_owned(),
            parameters: stack.template.parameters.clone(),
            capabilities: stack.template.capabilities.clone(),
        };

        let mut state = ChangeSetState::NoStack;
        loop {
            log::debug!("{name}: {state:?}");
            state = match state {
                ChangeSetState::NoStack => {
                    let existing = self.api.describe_stack(&scope, &name)?;
                    let change_set_type = match &existing {
                        Some(status) if status.status != REVIEW_IN_PROGRESS => {
                            ChangeSetType::Update
                        }
                        _ => ChangeSetType::Create,
                    };
                    let change_set = ChangeSetRequest {
                        change_set_type,
                        ..change_set.clone()
                    };
                    print(&format!(
                        "creating {} change set {} for stack {name}",
                        change_set_type.as_str().to_lowercase(),
                        change_set.change_set_name
                    ));
                    self.api.create_change_set(&scope, &change_set)?;
                    ChangeSetState::ChangeSetCreating
                }

                ChangeSetState::ChangeSetCreating => {
                    let what = format!("change set for stack {name}");
                    poll_until(&self.poll, &what, || {
                        let ChangeSetDescription {
                            status,
                            status_reason,
                            changes,
                            ..
                        } = self.api.describe_change_set(
                            &scope,
                            &name,
                            &change_set.change_set_name,
                        )?;
                        Ok(match status.as_str() {
                            "CREATE_COMPLETE" => {
                                PollState::Ready(ChangeSetState::ChangeSetReady { changes })
                            }
                            "FAILED" => PollState::Ready(ChangeSetState::ChangeSetFailed {
                                reason: status_reason.unwrap_or_default(),
                            }),
                            _ => PollState::Pending,
                        })
                    })?
                }

                ChangeSetState::ChangeSetFailed { reason } => {
                    if !is_no_changes(&reason) {
                        return Err(Error::ChangeSet {
                            stack: name,
                            reason,
                        });
                    }
                    ChangeSetState::NoChanges
                }

                ChangeSetState::NoChanges => {
                    print(&format!("no changes for stack {name}"));
                    self.cleanup(&scope, &name, &change_set.change_set_name);
                    return Ok(StackOutcome::NoChanges);
                }

                ChangeSetState::ChangeSetReady { changes } => {
                    for change in &changes {
                        print(change);
                    }
                    if request.mode == Mode::Diff {
                        self.cleanup(&scope, &name, &change_set.change_set_name);
                        return Ok(StackOutcome::Planned);
                    }
                    print(&format!("executing change set for stack {name}"));
                    self.api
                        .execute_change_set(&scope, &name, &change_set.change_set_name)?;
                    ChangeSetState::Executing
                }

                ChangeSetState::Executing => {
                    let what = format!("execution of stack {name}");
                    let state = poll_until(&self.poll, &what, || {
                        let description = self.api.describe_change_set(
                            &scope,
                            &name,
                            &change_set.change_set_name,
                        )?;
                        Ok(execution_state(description.execution_status.as_deref()))
                    })?;
                    match state {
                        ChangeSetState::ExecuteFailed { reason } => ChangeSetState::ExecuteFailed {
                            reason: self.failure_reason(&scope, &name, reason),
                        },
                        other => other,
                    }
                }

                ChangeSetState::ExecuteComplete => {
                    print(&format!("stack {name} deployed"));
                    return Ok(StackOutcome::Deployed);
                }

                ChangeSetState::ExecuteFailed { reason } => {
                    return Err(Error::ChangeSet {
                        stack: name,
                        reason,
                    });
                }
            };
        }
    }

    /// Stack status and reason behind a failed execution, else `fallback`.
    fn failure_reason(&self, scope: &CallScope<'_>, stack_name: &str, fallback: String) -> String {
        match self.api.describe_stack(scope, stack_name) {
            Ok(Some(StackStatus {
                status,
                reason: Some(reason),
            })) => format!("{status}: {reason}"),
            Ok(Some(StackStatus { status, .. })) => format!("{status}: {fallback}"),
            Ok(None) => fallback,
            Err(e) => {
                log::debug!("Failed to describe stack {stack_name}: {e}");
                fallback
            }
        }
    }

    /// Change sets left behind are harmless, so a failed delete only warns.
    fn cleanup(&self, scope: &CallScope<'_>, stack_name: &str, change_set_name: &str) {
        if let Err(e) = self
            .api
            .delete_change_set(scope, stack_name, change_set_name)
        {
            log::warn!("Failed to delete change set {change_set_name} of {stack_name}: {e}");
        }
    }
}

/// Map the change set's execution status to the next state.
///
/// The stack's own status may still be the one from before execution, so
/// only the change set is trusted here.
fn execution_state(execution_status: Option<&str>) -> PollState<ChangeSetState> {
    match execution_status {
        Some("EXECUTE_COMPLETE") => PollState::Ready(ChangeSetState::ExecuteComplete),
        Some(code @ ("EXECUTE_FAILED" | "OBSOLETE")) => {
            PollState::Ready(ChangeSetState::ExecuteFailed {
                reason: code.to_string(),
            })
        }
        _ => PollState::Pending,
    }
}
