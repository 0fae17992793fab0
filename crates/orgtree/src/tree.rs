//! Organization tree arena
//!
//! Groups and accounts live in two flat vectors. A group owns its children
//! through index lists; every node points back to its parent with a plain
//! index, so there is exactly one ownership edge per node.

use std::fmt;
use std::sync::{PoisonError, RwLock};

use crate::stack::{Stack, filter_stacks};

/// Role assumed in member accounts when none is configured.
pub const DEFAULT_ASSUME_ROLE_NAME: &str = "OrganizationAccountAccessRole";

/// Handle to a group in an [`OrgTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(usize);

/// Handle to an account in an [`OrgTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountId(usize);

/// Provider-assigned identifier, absent until the resource exists.
///
/// Interior mutability lets operations record new ids while the tree is
/// shared read-only with dependents and concurrent account tasks.
#[derive(Default)]
pub struct ProviderId(RwLock<Option<String>>);

impl ProviderId {
    pub fn new(id: Option<String>) -> Self {
        Self(RwLock::new(id))
    }

    /// Current id, if provisioned.
    pub fn get(&self) -> Option<String> {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_set(&self) -> bool {
        self.0.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Record the provider id.
    pub fn set(&self, id: impl Into<String>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = Some(id.into());
    }

    /// Forget the id (stale configuration).
    pub fn clear(&self) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl Clone for ProviderId {
    fn clone(&self) -> Self {
        Self::new(self.get())
    }
}

impl fmt::Debug for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(id) => write!(f, "{id}"),
            None => write!(f, "<unprovisioned>"),
        }
    }
}

impl PartialEq for ProviderId {
    fn eq(&self, other: &Self) -> bool {
        self.get() == other.get()
    }
}

/// An account-grouping unit.
#[derive(Debug, Clone)]
pub struct OrgNode {
    pub id: ProviderId,
    pub name: String,
    pub tags: Vec<String>,
    pub baseline_stacks: Vec<Stack>,
    pub scp_stacks: Vec<Stack>,
    children: Vec<GroupId>,
    accounts: Vec<AccountId>,
    parent: Option<GroupId>,
}

impl OrgNode {
    fn new(name: String, parent: Option<GroupId>) -> Self {
        Self {
            id: ProviderId::default(),
            name,
            tags: Vec::new(),
            baseline_stacks: Vec::new(),
            scp_stacks: Vec::new(),
            children: Vec::new(),
            accounts: Vec::new(),
            parent,
        }
    }

    /// Parent group, `None` for the root.
    pub fn parent(&self) -> Option<GroupId> {
        self.parent
    }

    /// Direct child groups in insertion order.
    pub fn children(&self) -> &[GroupId] {
        &self.children
    }

    /// Accounts attached directly to this group.
    pub fn accounts(&self) -> &[AccountId] {
        &self.accounts
    }
}

/// A member account.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: ProviderId,
    /// Correlation key between desired and live trees
    pub email: String,
    pub name: String,
    pub tags: Vec<String>,
    pub baseline_stacks: Vec<Stack>,
    pub scp_stacks: Vec<Stack>,
    pub is_management: bool,
    pub assume_role_name: Option<String>,
    parent: GroupId,
}

impl Account {
    pub fn parent(&self) -> GroupId {
        self.parent
    }

    pub fn is_provisioned(&self) -> bool {
        self.id.is_set()
    }

    /// Role name assumed for deployments into this account.
    pub fn role_name(&self) -> &str {
        self.assume_role_name
            .as_deref()
            .unwrap_or(DEFAULT_ASSUME_ROLE_NAME)
    }

    /// ARN of the default deployment role, once the account is provisioned.
    pub fn role_arn(&self) -> Option<String> {
        self.id
            .get()
            .map(|id| format!("arn:aws:iam::{id}:role/{}", self.role_name()))
    }
}

/// An organization: one root group with nested groups and accounts.
#[derive(Debug, Clone)]
pub struct OrgTree {
    groups: Vec<OrgNode>,
    accounts: Vec<Account>,
}

impl OrgTree {
    /// Create a tree holding only a root group.
    pub fn new(root_name: impl Into<String>) -> Self {
        Self {
            groups: vec![OrgNode::new(root_name.into(), None)],
            accounts: Vec::new(),
        }
    }

    pub fn root(&self) -> GroupId {
        GroupId(0)
    }

    pub fn group(&self, id: GroupId) -> &OrgNode {
        &self.groups[id.0]
    }

    pub fn group_mut(&mut self, id: GroupId) -> &mut OrgNode {
        &mut self.groups[id.0]
    }

    pub fn account(&self, id: AccountId) -> &Account {
        &self.accounts[id.0]
    }

    pub fn account_mut(&mut self, id: AccountId) -> &mut Account {
        &mut self.accounts[id.0]
    }

    /// Add a group under `parent`.
    pub fn add_group(&mut self, parent: GroupId, name: impl Into<String>) -> GroupId {
        let id = GroupId(self.groups.len());
        self.groups.push(OrgNode::new(name.into(), Some(parent)));
        self.groups[parent.0].children.push(id);
        id
    }

    /// Add an account under `parent`.
    pub fn add_account(
        &mut self,
        parent: GroupId,
        name: impl Into<String>,
        email: impl Into<String>,
    ) -> AccountId {
        let id = AccountId(self.accounts.len());
        self.accounts.push(Account {
            id: ProviderId::default(),
            email: email.into(),
            name: name.into(),
            tags: Vec::new(),
            baseline_stacks: Vec::new(),
            scp_stacks: Vec::new(),
            is_management: false,
            assume_role_name: None,
            parent,
        });
        self.groups[parent.0].accounts.push(id);
        id
    }

    /// Every group, root first, in insertion order.
    pub fn groups(&self) -> impl Iterator<Item = (GroupId, &OrgNode)> {
        self.groups.iter().enumerate().map(|(i, g)| (GroupId(i), g))
    }

    /// Every account in insertion order.
    pub fn accounts(&self) -> impl Iterator<Item = (AccountId, &Account)> {
        self.accounts
            .iter()
            .enumerate()
            .map(|(i, a)| (AccountId(i), a))
    }

    /// Every account under `group`, sorted by email.
    pub fn all_descendant_accounts(&self, group: GroupId) -> Vec<AccountId> {
        let mut accounts: Vec<AccountId> = self
            .subtree(group)
            .into_iter()
            .flat_map(|g| self.group(g).accounts.iter().copied())
            .collect();
        accounts.sort_by(|a, b| self.account(*a).email.cmp(&self.account(*b).email));
        accounts
    }

    /// Every group strictly below `group`, sorted by name.
    pub fn all_descendant_groups(&self, group: GroupId) -> Vec<GroupId> {
        let mut groups = self.descendants_preorder(group);
        groups.sort_by(|a, b| self.group(*a).name.cmp(&self.group(*b).name));
        groups
    }

    /// Every group strictly below `group`, parents before children,
    /// siblings sorted by name.
    pub fn descendants_preorder(&self, group: GroupId) -> Vec<GroupId> {
        let mut out = Vec::new();
        let mut stack = vec![group];
        while let Some(current) = stack.pop() {
            if current != group {
                out.push(current);
            }
            let mut children = self.group(current).children.clone();
            children.sort_by(|a, b| self.group(*b).name.cmp(&self.group(*a).name));
            stack.extend(children);
        }
        out
    }

    /// `group` and everything below it.
    fn subtree(&self, group: GroupId) -> Vec<GroupId> {
        let mut out = vec![group];
        out.extend(self.descendants_preorder(group));
        out
    }

    /// Groups from the root down to `group`, inclusive.
    pub fn ancestry(&self, group: GroupId) -> Vec<GroupId> {
        let mut chain = vec![group];
        let mut current = group;
        while let Some(parent) = self.group(current).parent {
            chain.push(parent);
            current = parent;
        }
        chain.reverse();
        chain
    }

    /// Tags inherited root-to-leaf, the group's own last.
    pub fn all_group_tags(&self, group: GroupId) -> Vec<String> {
        self.ancestry(group)
            .into_iter()
            .flat_map(|g| self.group(g).tags.iter().cloned())
            .collect()
    }

    /// Tags inherited from every ancestor group, the account's own last.
    pub fn all_account_tags(&self, account: AccountId) -> Vec<String> {
        let account = self.account(account);
        let mut tags = self.all_group_tags(account.parent);
        tags.extend(account.tags.iter().cloned());
        tags
    }

    /// Baseline stacks inherited root-to-leaf, the group's own last.
    pub fn all_group_baseline_stacks(&self, group: GroupId) -> Vec<Stack> {
        self.ancestry(group)
            .into_iter()
            .flat_map(|g| self.group(g).baseline_stacks.iter().cloned())
            .collect()
    }

    /// Baseline stacks inherited by an account, its own last.
    pub fn all_account_baseline_stacks(&self, account: AccountId) -> Vec<Stack> {
        let account = self.account(account);
        let mut stacks = self.all_group_baseline_stacks(account.parent);
        stacks.extend(account.baseline_stacks.iter().cloned());
        stacks
    }

    /// Inherited baseline stacks of `account` restricted to the
    /// comma-separated `filter`.
    pub fn filter_baseline_stacks(&self, account: AccountId, filter: &str) -> Vec<Stack> {
        filter_stacks(&self.all_account_baseline_stacks(account), filter)
    }

    pub fn find_account_by_email(&self, email: &str) -> Option<AccountId> {
        self.accounts().find(|(_, a)| a.email == email).map(|(id, _)| id)
    }

    pub fn find_account_by_id(&self, provider_id: &str) -> Option<AccountId> {
        self.accounts()
            .find(|(_, a)| a.id.get().as_deref() == Some(provider_id))
            .map(|(id, _)| id)
    }

    pub fn find_group_by_id(&self, provider_id: &str) -> Option<GroupId> {
        self.groups()
            .find(|(_, g)| g.id.get().as_deref() == Some(provider_id))
            .map(|(id, _)| id)
    }

    /// Direct child of `parent` with the given name, if exactly one exists.
    pub fn find_unique_child(&self, parent: GroupId, name: &str) -> Option<GroupId> {
        let mut matches = self
            .group(parent)
            .children
            .iter()
            .copied()
            .filter(|c| self.group(*c).name == name);
        match (matches.next(), matches.next()) {
            (Some(only), None) => Some(only),
            _ => None,
        }
    }

    pub fn management_account(&self) -> Option<AccountId> {
        self.accounts()
            .find(|(_, a)| a.is_management)
            .map(|(id, _)| id)
    }

    /// Slash-separated group names from the root, for display.
    pub fn path_of(&self, group: GroupId) -> String {
        self.ancestry(group)
            .into_iter()
            .map(|g| self.group(g).name.as_str())
            .collect::<Vec<_>>()
            .join("/")
    }
}
