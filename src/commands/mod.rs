//! Command implementations

pub mod account;
pub mod stacks;

use anyhow::{Context as _, Result};
use orgtree::{OrgProvider, OrgTree};
use std::path::Path;

use crate::schema::OrgDocument;
use crate::ui;

/// Load the organization document at `path` as a desired tree.
///
/// Stack paths resolve against the document's directory. Accounts marked
/// `deleted` are reported and left out.
pub fn load_tree(path: &Path) -> Result<OrgTree> {
    let document = OrgDocument::load(path)?;
    for email in document.deleted_accounts() {
        ui::dim(&format!("ignoring deleted account {email}"));
    }

    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    document
        .to_tree(base_dir)
        .with_context(|| format!("Invalid organization file: {}", path.display()))
}

/// Flag the organization's management account on `tree`, unless the
/// document already names one.
pub fn flag_management_account(tree: &mut OrgTree, provider: &dyn OrgProvider) {
    if tree.management_account().is_some() {
        return;
    }
    match provider.fetch_management_account() {
        Ok(management) => {
            if let Some(id) = tree.find_account_by_email(&management.email) {
                log::debug!("Management account is {}", management.email);
                tree.account_mut(id).is_management = true;
            }
        }
        Err(e) => log::warn!("Could not look up the management account: {e}"),
    }
}

/// Fetch the live tree and copy its ids onto `desired`.
pub fn hydrate_from_live(desired: &OrgTree, provider: &dyn OrgProvider) -> Result<()> {
    let root_id = provider.root_id()?;
    let live = provider
        .fetch_group_and_descendants(&root_id)
        .context("Failed to fetch the live organization")?;
    orgtree::hydrate(desired, &live)?;
    Ok(())
}
