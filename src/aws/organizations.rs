//! Organizations adapter

use orgtree::{
    AccountRequest, AccountSummary, CreateAccountStatus, Credentials, Error, GroupId,
    OrgProvider, OrgTree, Result,
};
use serde_json::Value;
use std::collections::VecDeque;

use super::{AwsCli, array_at, str_at};
use crate::stacks::changeset::CallScope;

const SERVICE: &str = "organizations";

/// Account states that no longer count as members.
const CLOSED_STATES: [&str; 2] = ["SUSPENDED", "PENDING_CLOSURE"];

/// [`OrgProvider`] backed by `aws organizations` and `aws sts`.
#[derive(Debug, Clone, Default)]
pub struct AwsOrganizations {
    cli: AwsCli,
}

impl AwsOrganizations {
    pub fn new(cli: AwsCli) -> Self {
        Self { cli }
    }

    fn read(&self, args: &[&str]) -> Result<Value> {
        self.cli.read(SERVICE, args, CallScope::default())
    }

    fn write(&self, args: &[&str]) -> Result<Value> {
        self.cli.write(SERVICE, args, CallScope::default())
    }

    fn read_field(&self, args: &[&str], pointer: &str) -> Result<String> {
        let value = self.read(args)?;
        str_at(&value, pointer).map_err(|message| Error::read(format!("{SERVICE} {}", args[0]), message))
    }

    fn groups_for_parent(&self, parent_id: &str) -> Result<Vec<(String, String)>> {
        let value = self.read(&[
            "list-organizational-units-for-parent",
            "--parent-id",
            parent_id,
        ])?;
        parse_groups(&value)
            .map_err(|message| Error::read("list organizational units", message))
    }
}

impl OrgProvider for AwsOrganizations {
    fn fetch_management_account(&self) -> Result<AccountSummary> {
        let value = self.read(&["describe-organization"])?;
        let id = str_at(&value, "/Organization/MasterAccountId")
            .map_err(|message| Error::read("describe organization", message))?;
        let email = str_at(&value, "/Organization/MasterAccountEmail")
            .map_err(|message| Error::read("describe organization", message))?;
        let name = self.read_field(&["describe-account", "--account-id", &id], "/Account/Name")?;
        Ok(AccountSummary { id, email, name })
    }

    fn root_id(&self) -> Result<String> {
        self.read_field(&["list-roots"], "/Roots/0/Id")
    }

    fn fetch_group_and_descendants(&self, root_id: &str) -> Result<OrgTree> {
        let roots = self.read(&["list-roots"])?;
        let root_name = array_at(&roots, "/Roots")
            .iter()
            .find(|root| root.get("Id").and_then(Value::as_str) == Some(root_id))
            .and_then(|root| root.get("Name").and_then(Value::as_str))
            .unwrap_or("Root")
            .to_string();

        let mut tree = OrgTree::new(root_name);
        tree.group(tree.root()).id.set(root_id);

        let mut queue: VecDeque<(GroupId, String)> = VecDeque::new();
        queue.push_back((tree.root(), root_id.to_string()));

        while let Some((group, group_id)) = queue.pop_front() {
            for (child_id, child_name) in self.groups_for_parent(&group_id)? {
                let child = tree.add_group(group, child_name);
                tree.group(child).id.set(child_id.clone());
                tree.group_mut(child).tags = self.tags(&child_id)?;
                queue.push_back((child, child_id));
            }

            for summary in self.current_accounts_for_parent(&group_id)? {
                let account = tree.add_account(group, summary.name, summary.email);
                tree.account(account).id.set(summary.id.clone());
                tree.account_mut(account).tags = self.tags(&summary.id)?;
            }
        }

        log::debug!(
            "Fetched {} groups and {} accounts",
            tree.groups().count(),
            tree.accounts().count()
        );
        Ok(tree)
    }

    fn create_group(&self, name: &str, parent_id: &str) -> Result<String> {
        let value = self.write(&[
            "create-organizational-unit",
            "--parent-id",
            parent_id,
            "--name",
            name,
        ])?;
        str_at(&value, "/OrganizationalUnit/Id")
            .map_err(|message| Error::write("create organizational unit", message))
    }

    fn delete_group(&self, id: &str) -> Result<()> {
        self.write(&["delete-organizational-unit", "--organizational-unit-id", id])?;
        Ok(())
    }

    fn rename_group(&self, id: &str, new_name: &str) -> Result<()> {
        self.write(&[
            "update-organizational-unit",
            "--organizational-unit-id",
            id,
            "--name",
            new_name,
        ])?;
        Ok(())
    }

    fn create_accounts(&self, requests: &[AccountRequest]) -> Result<Vec<String>> {
        requests
            .iter()
            .map(|request| {
                let value = self.write(&[
                    "create-account",
                    "--email",
                    &request.email,
                    "--account-name",
                    &request.name,
                ])?;
                str_at(&value, "/CreateAccountStatus/Id")
                    .map_err(|message| Error::write("create account", message))
            })
            .collect()
    }

    fn describe_create_account_status(&self, request_id: &str) -> Result<CreateAccountStatus> {
        let value = self.read(&[
            "describe-create-account-status",
            "--create-account-request-id",
            request_id,
        ])?;
        parse_create_status(&value)
            .map_err(|message| Error::read("describe create account status", message))
    }

    fn move_account(&self, account_id: &str, from_parent_id: &str, to_parent_id: &str) -> Result<()> {
        self.write(&[
            "move-account",
            "--account-id",
            account_id,
            "--source-parent-id",
            from_parent_id,
            "--destination-parent-id",
            to_parent_id,
        ])?;
        Ok(())
    }

    fn current_accounts_for_parent(&self, parent_id: &str) -> Result<Vec<AccountSummary>> {
        let value = self.read(&["list-accounts-for-parent", "--parent-id", parent_id])?;
        parse_accounts(&value).map_err(|message| Error::read("list accounts", message))
    }

    fn tags(&self, resource_id: &str) -> Result<Vec<String>> {
        let value = self.read(&["list-tags-for-resource", "--resource-id", resource_id])?;
        Ok(parse_tags(&value))
    }

    fn assume_role(&self, role_arn: &str) -> Result<Credentials> {
        self.cli.assume_role(role_arn)
    }
}

/// `(id, name)` of every organizational unit in a listing.
fn parse_groups(value: &Value) -> std::result::Result<Vec<(String, String)>, String> {
    array_at(value, "/OrganizationalUnits")
        .iter()
        .map(|unit| Ok((str_at(unit, "/Id")?, str_at(unit, "/Name")?)))
        .collect()
}

/// Member accounts of a listing, closed accounts left out.
fn parse_accounts(value: &Value) -> std::result::Result<Vec<AccountSummary>, String> {
    let mut accounts = Vec::new();
    for account in array_at(value, "/Accounts") {
        let status = account.get("Status").and_then(Value::as_str).unwrap_or_default();
        if CLOSED_STATES.contains(&status) {
            continue;
        }
        accounts.push(AccountSummary {
            id: str_at(account, "/Id")?,
            email: str_at(account, "/Email")?,
            name: str_at(account, "/Name")?,
        });
    }
    Ok(accounts)
}

/// Tags as `Key=Value`, or `Key` alone when the value is empty.
fn parse_tags(value: &Value) -> Vec<String> {
    array_at(value, "/Tags")
        .iter()
        .filter_map(|tag| {
            let key = tag.get("Key").and_then(Value::as_str)?;
            match tag.get("Value").and_then(Value::as_str) {
                Some(value) if !value.is_empty() => Some(format!("{key}={value}")),
                _ => Some(key.to_string()),
            }
        })
        .collect()
}

fn parse_create_status(value: &Value) -> std::result::Result<CreateAccountStatus, String> {
    let state = str_at(value, "/CreateAccountStatus/State")?;
    match state.as_str() {
        "IN_PROGRESS" => Ok(CreateAccountStatus::InProgress),
        "SUCCEEDED" => Ok(CreateAccountStatus::Succeeded {
            account_id: str_at(value, "/CreateAccountStatus/AccountId")?,
        }),
        "FAILED" => Ok(CreateAccountStatus::Failed {
            reason: str_at(value, "/CreateAccountStatus/FailureReason")
                .unwrap_or_else(|_| "unknown reason".to_string()),
        }),
        other => Err(format!("unknown account creation state {other}")),
    }
}
