//! Reconciliation - compare the desired tree with the live tree
//!
//! Runs once per run, single threaded, before anything is executed:
//!
//! 1. [`hydrate`] copies provider ids from the live tree onto the desired
//!    tree (accounts by email, groups by name under the same parent).
//! 2. [`diff`] walks desired groups parents-first, then accounts by email,
//!    and emits one operation per difference. An operation whose parent is
//!    being created or recreated in this run becomes a dependent of that
//!    operation, found through a group-to-operation map.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::operation::{OperationForest, OperationKind, ResourceOperation};
use crate::provider::OrgProvider;
use crate::tree::{GroupId, OrgTree};

/// Fetch the live tree and compute the operation forest for `desired`.
///
/// Any read failure aborts the pass; no partial live tree is used.
pub fn reconcile(desired: &OrgTree, provider: &dyn OrgProvider) -> Result<OperationForest> {
    let root_id = provider.root_id()?;
    let live = provider.fetch_group_and_descendants(&root_id)?;
    hydrate(desired, &live)?;
    Ok(diff(desired, &live))
}

/// Copy provider ids from `live` onto `desired`.
pub fn hydrate(desired: &OrgTree, live: &OrgTree) -> Result<()> {
    let live_root = live.group(live.root());
    let root_id = live_root
        .id
        .get()
        .ok_or_else(|| Error::read("organization root", "live tree has no root id"))?;
    desired.group(desired.root()).id.set(root_id);

    for group_id in desired.descendants_preorder(desired.root()) {
        let group = desired.group(group_id);

        if let Some(id) = group.id.get() {
            if live.find_group_by_id(&id).is_none() {
                log::warn!(
                    "organization unit {} has id {id} which no longer exists, treating it as new",
                    group.name
                );
                group.id.clear();
            }
            continue;
        }

        let Some(parent_id) = group.parent().and_then(|p| desired.group(p).id.get()) else {
            continue;
        };
        let matched = live
            .find_group_by_id(&parent_id)
            .and_then(|live_parent| live.find_unique_child(live_parent, &group.name));
        if let Some(live_group) = matched
            && let Some(id) = live.group(live_group).id.get()
        {
            log::debug!("matched organization unit {} to {id}", group.name);
            group.id.set(id);
        }
    }

    for (_, account) in desired.accounts() {
        match live.find_account_by_email(&account.email) {
            Some(live_account) => {
                if let Some(live_id) = live.account(live_account).id.get() {
                    if let Some(configured) = account.id.get()
                        && configured != live_id
                    {
                        log::warn!(
                            "account {} is configured with id {configured} but lives as {live_id}",
                            account.email
                        );
                    }
                    account.id.set(live_id);
                }
            }
            None => {
                if let Some(configured) = account.id.get() {
                    return Err(Error::config(format!(
                        "account {} has id {configured} but no live account uses that email",
                        account.email
                    )));
                }
            }
        }
    }

    Ok(())
}

struct Draft {
    kind: OperationKind,
    dependents: Vec<usize>,
}

/// Operations under construction, addressed by index until assembled.
#[derive(Default)]
struct ForestBuilder {
    drafts: Vec<Draft>,
    roots: Vec<usize>,
    /// Operation that gives a group its (new) id in this run
    creators: HashMap<GroupId, usize>,
}

impl ForestBuilder {
    /// Add an operation, as a dependent of whatever creates `parent` or at
    /// top level when `parent` is already provisioned.
    fn attach(&mut self, parent: GroupId, kind: OperationKind) -> usize {
        let index = self.drafts.len();
        self.drafts.push(Draft {
            kind,
            dependents: Vec::new(),
        });
        match self.creators.get(&parent) {
            Some(&creator) => self.drafts[creator].dependents.push(index),
            None => self.roots.push(index),
        }
        index
    }

    fn build(self) -> OperationForest {
        let mut slots: Vec<Option<Draft>> = self.drafts.into_iter().map(Some).collect();

        fn assemble(index: usize, slots: &mut [Option<Draft>]) -> Option<ResourceOperation> {
            let draft = slots[index].take()?;
            let dependents = draft
                .dependents
                .into_iter()
                .filter_map(|d| assemble(d, slots))
                .collect();
            Some(ResourceOperation {
                kind: draft.kind,
                dependents,
            })
        }

        let roots = self
            .roots
            .into_iter()
            .filter_map(|r| assemble(r, &mut slots))
            .collect();
        OperationForest { roots }
    }
}

/// Compute the operations turning `live` into `desired`.
///
/// Expects `desired` to be hydrated. Accounts and groups that only exist
/// live are left alone.
pub fn diff(desired: &OrgTree, live: &OrgTree) -> OperationForest {
    let mut builder = ForestBuilder::default();
    let live_parent_id = |parent: Option<GroupId>| parent.and_then(|p| live.group(p).id.get());

    for group_id in desired.descendants_preorder(desired.root()) {
        let group = desired.group(group_id);
        let Some(parent) = group.parent() else {
            continue;
        };
        let desired_parent_id = desired.group(parent).id.get();

        let live_group = group.id.get().and_then(|id| live.find_group_by_id(&id));
        let Some(live_group) = live_group else {
            let index = builder.attach(
                parent,
                OperationKind::CreateGroup {
                    group: group_id,
                    new_parent: parent,
                },
            );
            builder.creators.insert(group_id, index);
            continue;
        };

        let live_node = live.group(live_group);
        let current_parent_id = live_parent_id(live_node.parent());
        if desired_parent_id != current_parent_id {
            let index = builder.attach(
                parent,
                OperationKind::ReparentGroup {
                    group: group_id,
                    new_parent: parent,
                    current_parent_id: current_parent_id.unwrap_or_default(),
                },
            );
            builder.creators.insert(group_id, index);
        } else if live_node.name != group.name {
            builder.attach(
                parent,
                OperationKind::RenameGroup {
                    group: group_id,
                    current_name: live_node.name.clone(),
                },
            );
        }
    }

    for account_id in desired.all_descendant_accounts(desired.root()) {
        let account = desired.account(account_id);
        let parent = account.parent();
        let desired_parent_id = desired.group(parent).id.get();

        let live_account = account.id.get().and_then(|id| live.find_account_by_id(&id));
        match live_account {
            None => {
                builder.attach(
                    parent,
                    OperationKind::CreateAccount {
                        account: account_id,
                        new_parent: parent,
                    },
                );
            }
            Some(live_account) => {
                let current_parent_id = live_parent_id(Some(live.account(live_account).parent()));
                if desired_parent_id != current_parent_id {
                    builder.attach(
                        parent,
                        OperationKind::ReparentAccount {
                            account: account_id,
                            new_parent: parent,
                            current_parent_id: current_parent_id.unwrap_or_default(),
                        },
                    );
                }
            }
        }
    }

    builder.build()
}
