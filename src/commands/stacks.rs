//! `diff` and `deploy`: run IaC stacks across accounts

use anyhow::{Result, bail};
use orgtree::Mode;

use super::{flag_management_account, hydrate_from_live, load_tree};
use crate::Context;
use crate::aws::{AwsCli, AwsCloudFormation, AwsOrganizations};
use crate::cli::StackArgs;
use crate::console::Console;
use crate::orchestrator::{Orchestrator, RunOptions};
use crate::paths;
use crate::settings::Settings;
use crate::stacks::IacDeployer;
use crate::ui;

pub fn run(ctx: &Context, args: &StackArgs, mode: Mode) -> Result<()> {
    let settings = Settings::from_env();
    let cli = AwsCli::new(&settings);
    let provider = AwsOrganizations::new(cli.clone());
    let cloudformation = AwsCloudFormation::new(cli);

    let mut tree = load_tree(&args.org.org)?;
    flag_management_account(&mut tree, &provider);
    hydrate_from_live(&tree, &provider)?;

    let work_root = paths::work_root();
    if ctx.verbose > 0 {
        ui::dim(&format!("working copies under {}", work_root.display()));
    }
    let deployer = IacDeployer::new(&settings, work_root, &cloudformation);
    let console = if args.tui {
        Console::live(settings.command_timeout)
    } else {
        Console::stdout(settings.command_timeout)
    };

    let options = RunOptions {
        mode,
        account_tag: args.account_tag.clone(),
        stacks: args.stacks.clone(),
        all_stacks: args.all_stacks,
    };
    let report = Orchestrator::new(&tree, &provider, &deployer, &console, &settings).run(&options);
    console.close();
    let report = report?;

    if report.tasks.is_empty() {
        ui::warn(&format!("No accounts match tag '{}'", args.account_tag));
        return Ok(());
    }

    let skipped = report.tasks.iter().filter(|task| task.skipped).count();
    if skipped > 0 && !ctx.quiet {
        ui::dim(&format!(
            "{skipped} account(s) not provisioned yet; run `telophase account deploy` first"
        ));
    }

    ui::summary(&report.summary());
    if report.is_success() {
        return Ok(());
    }
    for task in report.failed() {
        let reason = task.error.as_deref().unwrap_or("operation failed");
        ui::error(&format!("{}: {reason}", task.target.label));
    }
    bail!("{} target(s) failed", report.failed().count())
}
