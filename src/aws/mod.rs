//! Provider adapters on top of the `aws` CLI
//!
//! Every call runs `aws <service> <operation> ... --output json` and parses
//! stdout with serde_json. With the local endpoint enabled `--endpoint-url`
//! is added to every call.

mod cloudformation;
mod organizations;

pub use cloudformation::AwsCloudFormation;
pub use organizations::AwsOrganizations;

use orgtree::{Credentials, Error};
use serde_json::Value;
use std::process::Command;

use crate::runner;
use crate::settings::Settings;
use crate::stacks::changeset::CallScope;

/// Session name used for every assumed role.
const ROLE_SESSION_NAME: &str = "telophase";

/// Invokes the `aws` CLI.
#[derive(Debug, Clone, Default)]
pub struct AwsCli {
    endpoint_url: Option<String>,
}

impl AwsCli {
    pub fn new(settings: &Settings) -> Self {
        Self {
            endpoint_url: settings.endpoint_url.clone(),
        }
    }

    fn command(&self, service: &str, args: &[&str], scope: CallScope<'_>) -> Command {
        let mut command = Command::new("aws");
        command.arg(service).args(args).args(["--output", "json"]);
        if let Some(endpoint) = &self.endpoint_url {
            command.args(["--endpoint-url", endpoint.as_str()]);
        }
        if let Some(region) = scope.region {
            command.args(["--region", region]);
        }
        if let Some(credentials) = scope.credentials {
            command.env_remove("AWS_PROFILE");
            command.envs(credentials.to_env());
        }
        command
    }

    /// Run a call and parse its output. Empty output parses as `null`.
    pub fn call(&self, service: &str, args: &[&str], scope: CallScope<'_>) -> Result<Value, String> {
        let stdout = runner::run_capture(&mut self.command(service, args, scope))?;
        if stdout.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&stdout)
            .map_err(|e| format!("invalid JSON from aws {service} {}: {e}", args.join(" ")))
    }

    /// A read call; failures become [`Error::ProviderRead`].
    pub fn read(&self, service: &str, args: &[&str], scope: CallScope<'_>) -> orgtree::Result<Value> {
        self.call(service, args, scope)
            .map_err(|message| Error::read(describe(service, args), message))
    }

    /// A mutating call; failures become [`Error::ProviderWrite`].
    pub fn write(&self, service: &str, args: &[&str], scope: CallScope<'_>) -> orgtree::Result<Value> {
        self.call(service, args, scope)
            .map_err(|message| Error::write(describe(service, args), message))
    }

    /// Assume `role_arn` with the ambient credentials.
    pub fn assume_role(&self, role_arn: &str) -> orgtree::Result<Credentials> {
        let value = self
            .call(
                "sts",
                &[
                    "assume-role",
                    "--role-arn",
                    role_arn,
                    "--role-session-name",
                    ROLE_SESSION_NAME,
                ],
                CallScope::default(),
            )
            .map_err(|message| Error::Auth {
                role_arn: role_arn.to_string(),
                message,
            })?;
        parse_credentials(&value).map_err(|message| Error::Auth {
            role_arn: role_arn.to_string(),
            message,
        })
    }
}

/// `service operation` for error messages.
fn describe(service: &str, args: &[&str]) -> String {
    match args.first() {
        Some(operation) => format!("{service} {operation}"),
        None => service.to_string(),
    }
}

/// String at a JSON pointer.
pub fn str_at(value: &Value, pointer: &str) -> Result<String, String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| format!("missing {pointer} in response"))
}

/// Array at a JSON pointer; a missing array is empty.
pub fn array_at<'a>(value: &'a Value, pointer: &str) -> &'a [Value] {
    value
        .pointer(pointer)
        .and_then(Value::as_array)
        .map_or(&[][..], Vec::as_slice)
}

fn parse_credentials(value: &Value) -> Result<Credentials, String> {
    Ok(Credentials {
        access_key_id: str_at(value, "/Credentials/AccessKeyId")?,
        secret_access_key: str_at(value, "/Credentials/SecretAccessKey")?,
        session_token: str_at(value, "/Credentials/SessionToken")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_credentials() {
        let value = json!({
            "Credentials": {
                "AccessKeyId": "ASIA123",
                "SecretAccessKey": "secret",
                "SessionToken": "token",
                "Expiration": "2026-01-01T00:00:00Z"
            }
        });
        let credentials = parse_credentials(&value).unwrap();
        assert_eq!(credentials.access_key_id, "ASIA123");
        assert_eq!(credentials.session_token, "token");

        let err = parse_credentials(&json!({"Credentials": {}})).unwrap_err();
        assert!(err.contains("/Credentials/AccessKeyId"));
    }

    #[test]
    fn test_command_flags() {
        let cli = AwsCli {
            endpoint_url: Some("http://localhost:4566".to_string()),
        };
        let command = cli.command(
            "organizations",
            &["list-roots"],
            CallScope {
                credentials: None,
                region: Some("us-east-1"),
            },
        );
        assert_eq!(
            orgtree::render_command(&command),
            "aws organizations list-roots --output json --endpoint-url http://localhost:4566 --region us-east-1"
        );
    }

    #[test]
    fn test_array_at_missing_is_empty() {
        assert!(array_at(&json!({}), "/Roots").is_empty());
        assert_eq!(array_at(&json!({"Roots": [1, 2]}), "/Roots").len(), 2);
    }
}
