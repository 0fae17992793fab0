use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "telophase")]
#[command(version)]
#[command(about = "Manage a cloud organization and deploy IaC stacks to every account", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Manage organization units and accounts
    #[command(subcommand)]
    Account(AccountCommand),

    /// Show what stack deployments would change
    Diff(StackArgs),

    /// Deploy stacks to every matching account
    Deploy(StackArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Account Commands
// ============================================================================

#[derive(Subcommand)]
pub enum AccountCommand {
    /// Write the live organization as an organization document
    Import(ImportArgs),

    /// Show the operations needed to match the organization document
    Diff(OrgArgs),

    /// Create, move and rename units and accounts to match the document
    Deploy(AccountDeployArgs),
}

#[derive(Args, Clone)]
pub struct OrgArgs {
    /// Organization document
    #[arg(long, default_value = "organization.yml")]
    pub org: PathBuf,
}

#[derive(Args, Clone)]
pub struct ImportArgs {
    #[command(flatten)]
    pub org: OrgArgs,

    /// Print the document instead of writing it
    #[arg(long)]
    pub stdout: bool,

    /// Overwrite an existing document without asking
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Args, Clone)]
pub struct AccountDeployArgs {
    #[command(flatten)]
    pub org: OrgArgs,

    /// Apply without asking for confirmation
    #[arg(short, long)]
    pub yes: bool,
}

// ============================================================================
// Stack Commands
// ============================================================================

#[derive(Args, Clone)]
pub struct StackArgs {
    #[command(flatten)]
    pub org: OrgArgs,

    /// Accounts to target: a tag, or "all"
    #[arg(long)]
    pub account_tag: String,

    /// Only these stacks (comma-separated names)
    #[arg(long, conflicts_with = "all_stacks")]
    pub stacks: Option<String>,

    /// Include service control policy stacks
    #[arg(long)]
    pub all_stacks: bool,

    /// Live view with one line per account
    #[arg(long)]
    pub tui: bool,
}
