//! CloudFormation adapter for the change-set deployer

use orgtree::{Error, Result};
use serde_json::Value;

use super::{AwsCli, array_at, str_at};
use crate::stacks::changeset::{
    CallScope, ChangeSetDescription, ChangeSetRequest, CloudFormationApi, StackStatus,
};

const SERVICE: &str = "cloudformation";

/// [`CloudFormationApi`] backed by `aws cloudformation`.
#[derive(Debug, Clone, Default)]
pub struct AwsCloudFormation {
    cli: AwsCli,
}

impl AwsCloudFormation {
    pub fn new(cli: AwsCli) -> Self {
        Self { cli }
    }
}

impl CloudFormationApi for AwsCloudFormation {
    fn describe_stack(&self, scope: &CallScope<'_>, stack_name: &str) -> Result<Option<StackStatus>> {
        let value = match self
            .cli
            .call(SERVICE, &["describe-stacks", "--stack-name", stack_name], *scope)
        {
            Ok(value) => value,
            Err(message) if message.contains("does not exist") => return Ok(None),
            Err(message) => return Err(Error::read("cloudformation describe-stacks", message)),
        };
        parse_stack_status(&value)
            .map(Some)
            .map_err(|message| Error::read("cloudformation describe-stacks", message))
    }

    fn create_change_set(&self, scope: &CallScope<'_>, request: &ChangeSetRequest) -> Result<()> {
        let args = change_set_args(request)?;
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.cli.write(SERVICE, &args, *scope)?;
        Ok(())
    }

    fn describe_change_set(
        &self,
        scope: &CallScope<'_>,
        stack_name: &str,
        change_set_name: &str,
    ) -> Result<ChangeSetDescription> {
        let value = self.cli.read(
            SERVICE,
            &[
                "describe-change-set",
                "--stack-name",
                stack_name,
                "--change-set-name",
                change_set_name,
            ],
            *scope,
        )?;
        parse_change_set(&value)
            .map_err(|message| Error::read("cloudformation describe-change-set", message))
    }

    fn execute_change_set(
        &self,
        scope: &CallScope<'_>,
        stack_name: &str,
        change_set_name: &str,
    ) -> Result<()> {
        self.cli.write(
            SERVICE,
            &[
                "execute-change-set",
                "--stack-name",
                stack_name,
                "--change-set-name",
                change_set_name,
            ],
            *scope,
        )?;
        Ok(())
    }

    fn delete_change_set(
        &self,
        scope: &CallScope<'_>,
        stack_name: &str,
        change_set_name: &str,
    ) -> Result<()> {
        self.cli.write(
            SERVICE,
            &[
                "delete-change-set",
                "--stack-name",
                stack_name,
                "--change-set-name",
                change_set_name,
            ],
            *scope,
        )?;
        Ok(())
    }
}

/// Arguments of `create-change-set`.
fn change_set_args(request: &ChangeSetRequest) -> Result<Vec<String>> {
    let mut args = vec![
        "create-change-set".to_string(),
        "--stack-name".to_string(),
        request.stack_name.clone(),
        "--change-set-name".to_string(),
        request.change_set_name.clone(),
        "--change-set-type".to_string(),
        request.change_set_type.as_str().to_string(),
        "--template-body".to_string(),
        format!("file://{}", request.template_path),
    ];

    if !request.parameters.is_empty() {
        args.push("--parameters".to_string());
        for parameter in &request.parameters {
            let (key, value) = parameter.split_once('=').ok_or_else(|| {
                Error::config(format!(
                    "parameter '{parameter}' of stack {} is not Key=Value",
                    request.stack_name
                ))
            })?;
            args.push(format!(
                "ParameterKey={},ParameterValue={}",
                key.trim(),
                value.trim()
            ));
        }
    }

    if !request.capabilities.is_empty() {
        args.push("--capabilities".to_string());
        args.extend(request.capabilities.iter().cloned());
    }

    Ok(args)
}

fn parse_stack_status(value: &Value) -> std::result::Result<StackStatus, String> {
    Ok(StackStatus {
        status: str_at(value, "/Stacks/0/StackStatus")?,
        reason: str_at(value, "/Stacks/0/StackStatusReason").ok(),
    })
}

fn parse_change_set(value: &Value) -> std::result::Result<ChangeSetDescription, String> {
    let changes = array_at(value, "/Changes")
        .iter()
        .filter_map(|change| {
            let action = str_at(change, "/ResourceChange/Action").ok()?;
            let kind = str_at(change, "/ResourceChange/ResourceType").unwrap_or_default();
            let logical = str_at(change, "/ResourceChange/LogicalResourceId").unwrap_or_default();
            let mut line = format!("{action} {kind} {logical}");
            if str_at(change, "/ResourceChange/Replacement").as_deref() == Ok("True") {
                line.push_str(" (replacement)");
            }
            Some(line)
        })
        .collect();

    Ok(ChangeSetDescription {
        status: str_at(value, "/Status")?,
        status_reason: str_at(value, "/StatusReason").ok(),
        execution_status: str_at(value, "/ExecutionStatus").ok(),
        changes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stacks::changeset::ChangeSetType;
    use serde_json::json;

    fn request() -> ChangeSetRequest {
        ChangeSetRequest {
            stack_name: "vpc".to_string(),
            change_set_name: "telophase-1".to_string(),
            change_set_type: ChangeSetType::Create,
            template_path: "/stacks/vpc.yml".to_string(),
            parameters: vec!["CidrBlock = 10.0.0.0/16".to_string()],
            capabilities: vec!["CAPABILITY_IAM".to_string()],
        }
    }

    #[test]
    fn test_change_set_args() {
        let args = change_set_args(&request()).unwrap();
        assert_eq!(
            args.join(" "),
            "create-change-set --stack-name vpc --change-set-name telophase-1 \
             --change-set-type CREATE --template-body file:///stacks/vpc.yml \
             --parameters ParameterKey=CidrBlock,ParameterValue=10.0.0.0/16 \
             --capabilities CAPABILITY_IAM"
        );
    }

    #[test]
    fn test_malformed_parameter_is_config_error() {
        let mut request = request();
        request.parameters = vec!["CidrBlock".to_string()];
        assert!(matches!(
            change_set_args(&request),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_parse_change_set() {
        let value = json!({
            "Status": "CREATE_COMPLETE",
            "ExecutionStatus": "AVAILABLE",
            "Changes": [
                {"Type": "Resource", "ResourceChange": {
                    "Action": "Modify",
                    "LogicalResourceId": "Vpc",
                    "ResourceType": "AWS::EC2::VPC",
                    "Replacement": "True"
                }},
                {"Type": "Resource", "ResourceChange": {
                    "Action": "Add",
                    "LogicalResourceId": "Subnet",
                    "ResourceType": "AWS::EC2::Subnet"
                }}
            ]
        });
        let description = parse_change_set(&value).unwrap();
        assert_eq!(description.status, "CREATE_COMPLETE");
        assert_eq!(description.status_reason, None);
        assert_eq!(description.execution_status.as_deref(), Some("AVAILABLE"));
        assert_eq!(
            description.changes,
            [
                "Modify AWS::EC2::VPC Vpc (replacement)",
                "Add AWS::EC2::Subnet Subnet"
            ]
        );
    }

    #[test]
    fn test_parse_stack_status() {
        let value = json!({
            "Stacks": [{"StackName": "vpc", "StackStatus": "UPDATE_ROLLBACK_COMPLETE",
                        "StackStatusReason": "Resource creation cancelled"}]
        });
        let status = parse_stack_status(&value).unwrap();
        assert_eq!(status.status, "UPDATE_ROLLBACK_COMPLETE");
        assert_eq!(status.reason.as_deref(), Some("Resource creation cancelled"));
    }
}
