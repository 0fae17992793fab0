//! Operation forest
//!
//! Each operation owns the operations that must run after it. Pre-order
//! flattening gives both the display order and a valid execution order.

use crate::stack::Stack;
use crate::tree::{AccountId, GroupId, OrgTree};

/// What a stack deploys into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackRef {
    Account(AccountId),
    Group(GroupId),
}

/// One mutation of the organization or one stack deployment.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationKind {
    CreateGroup {
        group: GroupId,
        new_parent: GroupId,
    },
    /// Move an existing group; realized as recreate under the new parent
    ReparentGroup {
        group: GroupId,
        new_parent: GroupId,
        current_parent_id: String,
    },
    RenameGroup {
        group: GroupId,
        current_name: String,
    },
    CreateAccount {
        account: AccountId,
        new_parent: GroupId,
    },
    ReparentAccount {
        account: AccountId,
        new_parent: GroupId,
        current_parent_id: String,
    },
    DeployStack {
        target: StackRef,
        stack: Stack,
    },
}

/// A node of the operation forest.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceOperation {
    pub kind: OperationKind,
    /// Run in order, only after this operation succeeded
    pub dependents: Vec<ResourceOperation>,
}

impl ResourceOperation {
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            dependents: Vec::new(),
        }
    }

    /// Number of operations below this one.
    pub fn dependent_count(&self) -> usize {
        self.dependents
            .iter()
            .map(|d| 1 + d.dependent_count())
            .sum()
    }

    /// Human readable one-line description.
    pub fn describe(&self, tree: &OrgTree) -> String {
        let group_name = |id: GroupId| tree.group(id).name.as_str();
        match &self.kind {
            OperationKind::CreateGroup { group, new_parent } => format!(
                "Create organization unit {} under {}",
                group_name(*group),
                group_name(*new_parent)
            ),
            OperationKind::ReparentGroup {
                group,
                new_parent,
                current_parent_id,
            } => format!(
                "Move organization unit {} from {current_parent_id} to {}",
                group_name(*group),
                group_name(*new_parent)
            ),
            OperationKind::RenameGroup {
                group,
                current_name,
            } => format!(
                "Rename organization unit {current_name} to {}",
                group_name(*group)
            ),
            OperationKind::CreateAccount {
                account,
                new_parent,
            } => {
                let account = tree.account(*account);
                format!(
                    "Create account {} ({}) in {}",
                    account.name,
                    account.email,
                    group_name(*new_parent)
                )
            }
            OperationKind::ReparentAccount {
                account,
                new_parent,
                current_parent_id,
            } => {
                let account = tree.account(*account);
                format!(
                    "Move account {} ({}) from {current_parent_id} to {}",
                    account.name,
                    account.email,
                    group_name(*new_parent)
                )
            }
            OperationKind::DeployStack { target, stack } => {
                let target = match target {
                    StackRef::Account(id) => tree.account(*id).name.as_str(),
                    StackRef::Group(id) => group_name(*id),
                };
                format!("Deploy stack {stack} to {target}")
            }
        }
    }
}

/// Top-level operations with their dependents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationForest {
    pub roots: Vec<ResourceOperation>,
}

impl OperationForest {
    /// Every operation, parents before their dependents.
    pub fn flatten(&self) -> Vec<&ResourceOperation> {
        self.flatten_with_depth()
            .into_iter()
            .map(|(_, op)| op)
            .collect()
    }

    /// Every operation in pre-order with its nesting depth.
    pub fn flatten_with_depth(&self) -> Vec<(usize, &ResourceOperation)> {
        fn walk<'a>(
            op: &'a ResourceOperation,
            depth: usize,
            out: &mut Vec<(usize, &'a ResourceOperation)>,
        ) {
            out.push((depth, op));
            for dependent in &op.dependents {
                walk(dependent, depth + 1, out);
            }
        }

        let mut out = Vec::new();
        for root in &self.roots {
            walk(root, 0, &mut out);
        }
        out
    }

    /// Total number of operations.
    pub fn len(&self) -> usize {
        self.roots.iter().map(|r| 1 + r.dependent_count()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Indented description of every operation, one per line.
    pub fn render(&self, tree: &OrgTree) -> Vec<String> {
        self.flatten_with_depth()
            .into_iter()
            .map(|(depth, op)| format!("{}{}", "  ".repeat(depth), op.describe(tree)))
            .collect()
    }
}
