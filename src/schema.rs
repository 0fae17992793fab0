//! Organization document
//!
//! The YAML file passed with `--org`. Parsed with serde, validated, then
//! turned into an [`OrgTree`]. `account import` goes the other way.

use anyhow::{Context, Result};
use orgtree::{GroupId, OrgTree, Stack, StackKind, TemplateOptions};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

// ============================================================================
// Document Schema
// ============================================================================

/// Top-level document.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct OrgDocument {
    #[serde(rename = "Organization")]
    pub organization: OrgUnitConfig,
}

/// An organization unit, the root included.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct OrgUnitConfig {
    #[serde(default)]
    pub name: String,

    /// Provider id, written by `account import`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accounts: Vec<AccountConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_units: Option<Vec<OrgUnitConfig>>,

    /// Legacy name of `OrganizationUnits`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_groups: Option<Vec<OrgUnitConfig>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stacks: Vec<StackConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_control_policies: Vec<StackConfig>,
}

/// An account entry.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct AccountConfig {
    pub account_name: String,

    pub email: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,

    /// `active` or `deleted`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assume_role_name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stacks: Vec<StackConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_control_policies: Vec<StackConfig>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub management_account: bool,
}

/// A stack entry.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct StackConfig {
    pub name: String,

    /// Required for `Stacks`, implied for `ServiceControlPolicies`
    #[serde(default, rename = "Type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default)]
    pub path: String,

    #[serde(
        default,
        rename = "RoleOverrideARN",
        skip_serializing_if = "Option::is_none"
    )]
    pub role_override_arn: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,

    #[serde(
        default,
        rename = "CloudFormationParameters",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub cloudformation_parameters: Vec<String>,

    #[serde(
        default,
        rename = "CloudFormationCapabilities",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub cloudformation_capabilities: Vec<String>,

    #[serde(
        default,
        rename = "CloudFormationStackName",
        skip_serializing_if = "Option::is_none"
    )]
    pub cloudformation_stack_name: Option<String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

const STATE_ACTIVE: &str = "active";
const STATE_DELETED: &str = "deleted";

// ============================================================================
// Loading
// ============================================================================

impl OrgDocument {
    /// Read and validate the document at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read organization file: {}", path.display()))?;
        let document = Self::parse(&content)
            .with_context(|| format!("Invalid organization file: {}", path.display()))?;
        log::debug!("Loaded organization document from {}", path.display());
        Ok(document)
    }

    /// Parse and validate YAML content.
    pub fn parse(content: &str) -> Result<Self> {
        let document: Self = serde_yaml::from_str(content).context("Invalid YAML")?;
        document.validate()?;
        Ok(document)
    }

    /// Serialize as YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize organization")
    }

    /// Write the document to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_yaml()?)
            .with_context(|| format!("Could not write organization file: {}", path.display()))
    }

    /// Check everything that does not need the provider.
    pub fn validate(&self) -> orgtree::Result<()> {
        let mut emails = HashSet::new();
        let mut management = Vec::new();
        self.organization
            .validate("Organization", &mut emails, &mut management)?;
        if management.len() > 1 {
            return Err(orgtree::Error::config(format!(
                "more than one management account: {}",
                management.join(", ")
            )));
        }
        Ok(())
    }

    /// Emails of accounts marked `deleted`, left out of the desired tree.
    pub fn deleted_accounts(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.organization.collect_deleted(&mut out);
        out
    }

    /// Build the desired tree. Stack paths are resolved against `base_dir`.
    pub fn to_tree(&self, base_dir: &Path) -> orgtree::Result<OrgTree> {
        let root = &self.organization;
        let mut tree = OrgTree::new(root.name.clone());
        let root_id = tree.root();
        root.fill(&mut tree, root_id, base_dir)?;
        Ok(tree)
    }

    /// Document describing a live tree, ids included.
    pub fn from_tree(tree: &OrgTree) -> Self {
        Self {
            organization: OrgUnitConfig::from_tree(tree, tree.root()),
        }
    }
}

impl OrgUnitConfig {
    /// Child units, from whichever field is set.
    pub fn units(&self) -> &[OrgUnitConfig] {
        self.organization_units
            .as_deref()
            .or(self.account_groups.as_deref())
            .unwrap_or_default()
    }

    fn validate(
        &self,
        path: &str,
        emails: &mut HashSet<String>,
        management: &mut Vec<String>,
    ) -> orgtree::Result<()> {
        if self.organization_units.is_some() && self.account_groups.is_some() {
            return Err(orgtree::Error::config(format!(
                "{path}: both OrganizationUnits and AccountGroups are set"
            )));
        }

        for stack in &self.stacks {
            stack.validate(path, false)?;
        }
        for stack in &self.service_control_policies {
            stack.validate(path, true)?;
        }

        for account in &self.accounts {
            if !emails.insert(account.email.clone()) {
                return Err(orgtree::Error::config(format!(
                    "duplicate account email {}",
                    account.email
                )));
            }
            account.validate(path)?;
            if account.management_account {
                management.push(account.email.clone());
            }
        }

        let mut names = HashSet::new();
        for unit in self.units() {
            if !names.insert(unit.name.as_str()) {
                return Err(orgtree::Error::config(format!(
                    "{path}: duplicate organization unit name '{}'",
                    unit.name
                )));
            }
            unit.validate(&format!("{path}/{}", unit.name), emails, management)?;
        }
        Ok(())
    }

    fn collect_deleted(&self, out: &mut Vec<String>) {
        out.extend(
            self.accounts
                .iter()
                .filter(|a| a.is_deleted())
                .map(|a| a.email.clone()),
        );
        for unit in self.units() {
            unit.collect_deleted(out);
        }
    }

    fn fill(&self, tree: &mut OrgTree, group: GroupId, base_dir: &Path) -> orgtree::Result<()> {
        {
            let node = tree.group_mut(group);
            node.tags = self.tags.clone();
            node.baseline_stacks = to_stacks(&self.stacks, base_dir, false)?;
            node.scp_stacks = to_stacks(&self.service_control_policies, base_dir, true)?;
            if let Some(id) = &self.id {
                node.id.set(id.clone());
            }
        }

        for account in self.accounts.iter().filter(|a| !a.is_deleted()) {
            let id = tree.add_account(group, account.account_name.clone(), account.email.clone());
            let node = tree.account_mut(id);
            node.tags = account.tags.clone();
            node.baseline_stacks = to_stacks(&account.stacks, base_dir, false)?;
            node.scp_stacks = to_stacks(&account.service_control_policies, base_dir, true)?;
            node.is_management = account.management_account;
            node.assume_role_name = account.assume_role_name.clone();
            if let Some(account_id) = &account.account_id {
                node.id.set(account_id.clone());
            }
        }

        for unit in self.units() {
            let child = tree.add_group(group, unit.name.clone());
            unit.fill(tree, child, base_dir)?;
        }
        Ok(())
    }

    fn from_tree(tree: &OrgTree, group: GroupId) -> Self {
        let node = tree.group(group);

        let mut accounts: Vec<AccountConfig> = node
            .accounts()
            .iter()
            .map(|id| {
                let account = tree.account(*id);
                AccountConfig {
                    account_name: account.name.clone(),
                    email: account.email.clone(),
                    account_id: account.id.get(),
                    tags: account.tags.clone(),
                    management_account: account.is_management,
                    assume_role_name: account.assume_role_name.clone(),
                    ..Default::default()
                }
            })
            .collect();
        accounts.sort_by(|a, b| a.email.cmp(&b.email));

        let mut children: Vec<GroupId> = node.children().to_vec();
        children.sort_by(|a, b| tree.group(*a).name.cmp(&tree.group(*b).name));
        let units: Vec<OrgUnitConfig> = children
            .into_iter()
            .map(|child| Self::from_tree(tree, child))
            .collect();

        Self {
            name: node.name.clone(),
            id: node.id.get(),
            tags: node.tags.clone(),
            accounts,
            organization_units: (!units.is_empty()).then_some(units),
            ..Default::default()
        }
    }
}

impl AccountConfig {
    fn is_deleted(&self) -> bool {
        self.state
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case(STATE_DELETED))
    }

    fn validate(&self, path: &str) -> orgtree::Result<()> {
        if let Some(state) = &self.state
            && !state.eq_ignore_ascii_case(STATE_ACTIVE)
            && !state.eq_ignore_ascii_case(STATE_DELETED)
        {
            return Err(orgtree::Error::config(format!(
                "account {}: invalid State '{state}' (expected {STATE_ACTIVE} or {STATE_DELETED})",
                self.email
            )));
        }
        let scope = format!("{path}/{}", self.account_name);
        for stack in &self.stacks {
            stack.validate(&scope, false)?;
        }
        for stack in &self.service_control_policies {
            stack.validate(&scope, true)?;
        }
        Ok(())
    }
}

impl StackConfig {
    fn kind(&self, policy: bool) -> orgtree::Result<StackKind> {
        if policy {
            return Ok(StackKind::PolicyDocument);
        }
        match &self.kind {
            Some(kind) => kind.parse(),
            None => Err(orgtree::Error::config(format!(
                "stack {} has no Type",
                self.name
            ))),
        }
    }

    fn validate(&self, scope: &str, policy: bool) -> orgtree::Result<()> {
        if let Err(orgtree::Error::Config(message)) = self.kind(policy) {
            return Err(orgtree::Error::config(format!("{scope}: {message}")));
        }
        if self.path.trim().is_empty() {
            return Err(orgtree::Error::config(format!(
                "{scope}: stack {} has an empty Path",
                self.name
            )));
        }
        Ok(())
    }

    fn to_stack(&self, base_dir: &Path, policy: bool) -> orgtree::Result<Stack> {
        let mut stack = Stack::new(
            self.name.clone(),
            self.kind(policy)?,
            resolve_path(&self.path, base_dir),
        );
        stack.role_override_arn = self.role_override_arn.clone();
        stack.region = self.region.clone();
        stack.workspace = self.workspace.clone();
        stack.template = TemplateOptions {
            parameters: self.cloudformation_parameters.clone(),
            capabilities: self.cloudformation_capabilities.clone(),
            stack_name: self.cloudformation_stack_name.clone(),
        };
        Ok(stack)
    }
}

fn to_stacks(configs: &[StackConfig], base_dir: &Path, policy: bool) -> orgtree::Result<Vec<Stack>> {
    configs
        .iter()
        .map(|config| config.to_stack(base_dir, policy))
        .collect()
}

/// Expand `~` and resolve relative paths against `base_dir`.
fn resolve_path(path: &str, base_dir: &Path) -> PathBuf {
    let expanded = PathBuf::from(shellexpand::tilde(path.trim()).as_ref());
    if expanded.is_absolute() {
        expanded
    } else {
        base_dir.join(expanded)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
Organization:
  Name: root
  Tags: ["org=acme"]
  Stacks:
    - Name: guardrails
      Type: GenericIaC
      Path: stacks/guardrails
      Region: us-east-1,us-west-2
  OrganizationUnits:
    - Name: Prod
      Tags: ["env=prod"]
      ServiceControlPolicies:
        - Name: deny-leave
          Path: scps/deny-leave
      Accounts:
        - AccountName: web
          Email: web@example.com
          AssumeRoleName: Deployer
          Stacks:
            - Name: app,web
              Type: CloudFormation
              Path: /abs/app.yml
              CloudFormationParameters: ["Env=prod"]
              CloudFormationCapabilities: ["CAPABILITY_IAM"]
        - AccountName: old
          Email: old@example.com
          State: deleted
  Accounts:
    - AccountName: management
      Email: mgmt@example.com
      AccountId: "111111111111"
      ManagementAccount: true
"#;

    #[test]
    fn test_parse_example_document() {
        let document = OrgDocument::parse(EXAMPLE).unwrap();
        let tree = document.to_tree(Path::new("/org")).unwrap();

        let web = tree.find_account_by_email("web@example.com").unwrap();
        let account = tree.account(web);
        assert_eq!(account.role_name(), "Deployer");
        assert_eq!(tree.all_account_tags(web), ["org=acme", "env=prod"]);

        let stacks = tree.all_account_baseline_stacks(web);
        assert_eq!(stacks.len(), 2);
        assert_eq!(stacks[0].path, PathBuf::from("/org/stacks/guardrails"));
        assert_eq!(stacks[1].kind, StackKind::DeclarativeTemplate);
        assert_eq!(stacks[1].path, PathBuf::from("/abs/app.yml"));
        assert_eq!(stacks[1].template.capabilities, ["CAPABILITY_IAM"]);

        let prod = tree.group(account.parent());
        assert_eq!(prod.scp_stacks[0].kind, StackKind::PolicyDocument);

        let mgmt = tree.management_account().unwrap();
        assert_eq!(tree.account(mgmt).id.get().as_deref(), Some("111111111111"));
    }

    #[test]
    fn test_deleted_accounts_are_left_out() {
        let document = OrgDocument::parse(EXAMPLE).unwrap();
        let tree = document.to_tree(Path::new(".")).unwrap();
        assert!(tree.find_account_by_email("old@example.com").is_none());
        assert_eq!(document.deleted_accounts(), ["old@example.com"]);
    }

    #[test]
    fn test_legacy_account_groups() {
        let document = OrgDocument::parse(
            r#"
Organization:
  Name: root
  AccountGroups:
    - Name: Dev
      Accounts:
        - AccountName: dev
          Email: dev@example.com
"#,
        )
        .unwrap();
        let tree = document.to_tree(Path::new(".")).unwrap();
        let dev = tree.find_account_by_email("dev@example.com").unwrap();
        assert_eq!(tree.path_of(tree.account(dev).parent()), "root/Dev");
    }

    fn config_error(yaml: &str) -> String {
        let err = OrgDocument::parse(yaml).unwrap_err();
        let err = err
            .downcast_ref::<orgtree::Error>()
            .expect("expected a configuration error");
        assert!(matches!(err, orgtree::Error::Config(_)));
        err.to_string()
    }

    #[test]
    fn test_both_grouping_fields_rejected() {
        let message = config_error(
            r"
Organization:
  Name: root
  OrganizationUnits: []
  AccountGroups: []
",
        );
        assert!(message.contains("both OrganizationUnits and AccountGroups"));
    }

    #[test]
    fn test_duplicate_email_rejected() {
        let message = config_error(
            r"
Organization:
  Name: root
  Accounts:
    - AccountName: a
      Email: same@example.com
  OrganizationUnits:
    - Name: Prod
      Accounts:
        - AccountName: b
          Email: same@example.com
",
        );
        assert!(message.contains("duplicate account email same@example.com"));
    }

    #[test]
    fn test_invalid_state_rejected() {
        let message = config_error(
            r"
Organization:
  Name: root
  Accounts:
    - AccountName: a
      Email: a@example.com
      State: suspended
",
        );
        assert!(message.contains("invalid State 'suspended'"));
    }

    #[test]
    fn test_duplicate_sibling_names_rejected() {
        let message = config_error(
            r"
Organization:
  Name: root
  OrganizationUnits:
    - Name: Prod
    - Name: Prod
",
        );
        assert!(message.contains("duplicate organization unit name 'Prod'"));
    }

    #[test]
    fn test_stack_errors_rejected() {
        let message = config_error(
            r"
Organization:
  Name: root
  Stacks:
    - Name: net
      Type: Pulumi
      Path: stacks/net
",
        );
        assert!(message.contains("unknown stack type 'Pulumi'"));

        let message = config_error(
            r"
Organization:
  Name: root
  Stacks:
    - Name: net
      Type: Terraform
      Path: ''
",
        );
        assert!(message.contains("empty Path"));
    }

    #[test]
    fn test_multiple_management_accounts_rejected() {
        let message = config_error(
            r"
Organization:
  Name: root
  Accounts:
    - AccountName: a
      Email: a@example.com
      ManagementAccount: true
    - AccountName: b
      Email: b@example.com
      ManagementAccount: true
",
        );
        assert!(message.contains("more than one management account"));
    }

    #[test]
    fn test_import_document_rebuilds_the_live_tree() {
        let mut live = OrgTree::new("root");
        live.group(live.root()).id.set("r-root");
        let prod = live.add_group(live.root(), "Prod");
        live.group(prod).id.set("ou-prod");
        live.group_mut(prod).tags = vec!["env=prod".to_string()];
        let web = live.add_account(prod, "web", "web@example.com");
        live.account(web).id.set("222222222222");

        let yaml = OrgDocument::from_tree(&live).to_yaml().unwrap();
        let document = OrgDocument::parse(&yaml).unwrap();
        let tree = document.to_tree(Path::new(".")).unwrap();

        let web = tree.find_account_by_email("web@example.com").unwrap();
        assert_eq!(tree.account(web).id.get().as_deref(), Some("222222222222"));
        let prod = tree.account(web).parent();
        assert_eq!(tree.group(prod).id.get().as_deref(), Some("ou-prod"));
        assert_eq!(tree.group(prod).tags, ["env=prod"]);
    }
}
