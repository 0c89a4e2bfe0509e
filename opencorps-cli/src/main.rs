//! OpenCorps operator CLI.
//!
//! # Usage
//!
//! ```text
//! opencorps init <owner/repo> [--description <text>] [--tag <tag>]... [--webhook-registered]
//! opencorps status [--project <owner/repo>] [--json]
//! opencorps push <owner/repo> <payload.json>
//! opencorps validate <.opencorps.yml>
//! opencorps diff <.opencorps.yml> [--project <owner/repo>] [--existing <.travis.yml>]
//! opencorps purge-jobs <job-id>
//! ```
//!
//! Every command works offline against the file store under `~/.opencorps/`.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    diff::DiffArgs, init::InitArgs, purge_jobs::PurgeJobsArgs, push::PushArgs,
    status::StatusArgs, validate::ValidateArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "opencorps",
    version,
    about = "Onboard projects onto forked CI and keep the forks in step",
    long_about = None,
)]
struct Cli {
    /// Log at debug level (RUST_LOG still takes precedence).
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register a project in the local store.
    Init(InitArgs),

    /// Show onboarding progress for stored projects.
    Status(StatusArgs),

    /// Record an upstream push notification for a project.
    Push(PushArgs),

    /// Check a `.opencorps.yml` against the supported schema.
    Validate(ValidateArgs),

    /// Show what the generated CI config would change.
    Diff(DiffArgs),

    /// Invalidate CI jobs superseded by a restarted job.
    PurgeJobs(PurgeJobsArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    opencorps_daemon::init_tracing(if cli.verbose { "debug" } else { "warn" });
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Push(args) => args.run(),
        Commands::Validate(args) => args.run(),
        Commands::Diff(args) => args.run(),
        Commands::PurgeJobs(args) => args.run(),
    }
}
