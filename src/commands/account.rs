//! `account import | diff | deploy`
//!
//! Organization units and accounts only; stacks are handled by the
//! top-level `diff` and `deploy` commands.

use anyhow::{Context as _, Result, bail};
use dialoguer::Confirm;
use orgtree::{ExecContext, Mode, OperationForest, OrgProvider, OrgTree};
use std::io::IsTerminal;

use super::{flag_management_account, load_tree};
use crate::Context;
use crate::aws::{AwsCli, AwsOrganizations};
use crate::cli::{AccountCommand, AccountDeployArgs, ImportArgs, OrgArgs};
use crate::console::Console;
use crate::schema::OrgDocument;
use crate::settings::Settings;
use crate::ui;

pub fn run(ctx: &Context, cmd: AccountCommand) -> Result<()> {
    let settings = Settings::from_env();
    let provider = AwsOrganizations::new(AwsCli::new(&settings));
    match cmd {
        AccountCommand::Import(args) => import(ctx, &args, &provider),
        AccountCommand::Diff(args) => diff(ctx, &args, &provider),
        AccountCommand::Deploy(args) => deploy(ctx, &args, &settings, &provider),
    }
}

/// Write the live organization as a document.
fn import(ctx: &Context, args: &ImportArgs, provider: &dyn OrgProvider) -> Result<()> {
    let root_id = provider.root_id()?;
    let mut live = provider
        .fetch_group_and_descendants(&root_id)
        .context("Failed to fetch the live organization")?;
    flag_management_account(&mut live, provider);

    let document = OrgDocument::from_tree(&live);
    if args.stdout {
        print!("{}", document.to_yaml()?);
        return Ok(());
    }

    let path = &args.org.org;
    if path.exists() && !args.yes {
        if !std::io::stdin().is_terminal() {
            bail!("{} exists; pass --yes to overwrite it", path.display());
        }
        let confirmed = Confirm::new()
            .with_prompt(format!("Overwrite {}?", path.display()))
            .default(false)
            .interact()
            .context("Failed to read confirmation")?;
        if !confirmed {
            ui::info("Import cancelled");
            return Ok(());
        }
    }

    document.save(path)?;
    if !ctx.quiet {
        ui::success(&format!(
            "Imported {} accounts into {}",
            live.accounts().count(),
            path.display()
        ));
    }
    Ok(())
}

/// Desired tree and the operations that bring the live organization to it.
fn plan(args: &OrgArgs, provider: &dyn OrgProvider) -> Result<(OrgTree, OperationForest)> {
    let mut desired = load_tree(&args.org)?;
    flag_management_account(&mut desired, provider);
    let forest = orgtree::reconcile(&desired, provider)
        .context("Failed to reconcile with the live organization")?;
    Ok((desired, forest))
}

fn print_forest(tree: &OrgTree, forest: &OperationForest) {
    ui::header(&format!("{} operation(s)", forest.len()));
    for line in forest.render(tree) {
        ui::operation(&line);
    }
    println!();
}

fn diff(ctx: &Context, args: &OrgArgs, provider: &dyn OrgProvider) -> Result<()> {
    let (desired, forest) = plan(args, provider)?;
    if forest.is_empty() {
        ui::success("Organization is up to date");
        return Ok(());
    }
    if !ctx.quiet {
        print_forest(&desired, &forest);
    }
    ui::info("Run `telophase account deploy` to apply these changes");
    Ok(())
}

fn deploy(
    ctx: &Context,
    args: &AccountDeployArgs,
    settings: &Settings,
    provider: &dyn OrgProvider,
) -> Result<()> {
    let (desired, forest) = plan(&args.org, provider)?;
    if forest.is_empty() {
        ui::success("Organization is up to date");
        return Ok(());
    }

    print_forest(&desired, &forest);
    if !args.yes {
        if !std::io::stdin().is_terminal() {
            bail!("refusing to apply without confirmation; pass --yes");
        }
        let confirmed = Confirm::new()
            .with_prompt("Apply these changes?")
            .default(false)
            .interact()
            .context("Failed to read confirmation")?;
        if !confirmed {
            ui::info("Deploy cancelled");
            return Ok(());
        }
    }

    let console = Console::stdout(settings.command_timeout);
    let mut exec = ExecContext::new(&desired, provider, &console, Mode::Deploy);
    exec.account_poll = settings.account_poll;
    let summary = orgtree::execute(&forest, &exec);
    drop(exec);
    console.close();

    if !ctx.quiet || !summary.is_success() {
        ui::summary(&summary);
    }
    if !summary.is_success() {
        bail!("{} operation(s) failed", summary.failed);
    }
    Ok(())
}
