//! Provider adapter contract
//!
//! Everything the engine needs from the cloud organization API. The
//! binary implements it on top of the provider CLI; tests use in-memory
//! fakes.

use std::fmt;

use crate::error::Result;
use crate::tree::OrgTree;

/// Temporary credentials returned by role assumption.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
}

impl Credentials {
    /// Environment variables injected into subprocesses using these
    /// credentials.
    pub fn to_env(&self) -> Vec<(&'static str, String)> {
        vec![
            ("AWS_ACCESS_KEY_ID", self.access_key_id.clone()),
            ("AWS_SECRET_ACCESS_KEY", self.secret_access_key.clone()),
            ("AWS_SESSION_TOKEN", self.session_token.clone()),
        ]
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &"<redacted>")
            .finish()
    }
}

/// Minimal description of a live account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSummary {
    pub id: String,
    pub email: String,
    pub name: String,
}

/// One account creation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRequest {
    pub email: String,
    pub name: String,
}

/// Status of an asynchronous account creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateAccountStatus {
    InProgress,
    Failed { reason: String },
    Succeeded { account_id: String },
}

/// Cloud organization API.
///
/// Read methods map failures to [`crate::Error::ProviderRead`], mutating
/// methods to [`crate::Error::ProviderWrite`].
pub trait OrgProvider: Send + Sync {
    /// The organization's management (billing) account.
    fn fetch_management_account(&self) -> Result<AccountSummary>;

    /// Id of the organization root.
    fn root_id(&self) -> Result<String>;

    /// The live tree below `root_id`, every id populated.
    fn fetch_group_and_descendants(&self, root_id: &str) -> Result<OrgTree>;

    /// Create a group under `parent_id`, returning its id.
    fn create_group(&self, name: &str, parent_id: &str) -> Result<String>;

    /// Delete an empty group.
    fn delete_group(&self, id: &str) -> Result<()>;

    fn rename_group(&self, id: &str, new_name: &str) -> Result<()>;

    /// Start account creation, returning one request id per request.
    fn create_accounts(&self, requests: &[AccountRequest]) -> Result<Vec<String>>;

    fn describe_create_account_status(&self, request_id: &str) -> Result<CreateAccountStatus>;

    fn move_account(&self, account_id: &str, from_parent_id: &str, to_parent_id: &str)
    -> Result<()>;

    /// Accounts directly under `parent_id`.
    fn current_accounts_for_parent(&self, parent_id: &str) -> Result<Vec<AccountSummary>>;

    /// Tags of a group or account, as `key=value` strings.
    fn tags(&self, resource_id: &str) -> Result<Vec<String>>;

    /// Assume `role_arn`, returning temporary credentials.
    fn assume_role(&self, role_arn: &str) -> Result<Credentials>;

    /// Move a group under a new parent, returning its new id.
    ///
    /// The provider has no move primitive for groups: a group with the same
    /// name is created under `new_parent_id`, the accounts of the old group
    /// are moved into it and the old group is deleted. Child groups are not
    /// carried over, so deleting a group that still has children fails.
    fn recreate_group(&self, id: &str, name: &str, new_parent_id: &str) -> Result<String> {
        let new_id = self.create_group(name, new_parent_id)?;
        for account in self.current_accounts_for_parent(id)? {
            log::debug!("moving {} from {id} to {new_id}", account.email);
            self.move_account(&account.id, id, &new_id)?;
        }
        self.delete_group(id)?;
        Ok(new_id)
    }
}
