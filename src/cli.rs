use anyhow::{Result, anyhow};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::commands::{self, CommandReport};
use crate::commands::sync::SyncOptions;
use crate::commands::verify::VerifyOptions;
use crate::logging;

#[derive(Debug, Parser)]
#[command(
    name = "blog-mirror",
    version,
    about = "Incrementally mirror a member's blog, profile imagery and greeting history"
)]
struct Cli {
    /// Print the command report as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch new posts, then refresh the profile and its history (default).
    Sync(SyncArgs),
    /// Summarize the local archive.
    Status,
    /// Check that every archived image referenced from state exists on disk.
    Verify(VerifyArgs),
}

#[derive(Debug, Default, Args)]
struct SyncArgs {
    /// Re-fetch every listed post and replace the post archive.
    #[arg(long, conflicts_with = "profile_only")]
    full: bool,
    /// Skip post discovery; refresh only the profile and history.
    #[arg(long)]
    profile_only: bool,
    /// Minimum delay between page requests, in milliseconds.
    #[arg(long)]
    request_delay_ms: Option<u64>,
    /// Minimum delay between image downloads, in milliseconds.
    #[arg(long)]
    image_delay_ms: Option<u64>,
    /// Upper bound on listing pages scanned.
    #[arg(long)]
    max_pages: Option<usize>,
    /// Era-title lookup file (JSON object of label to title).
    #[arg(long)]
    era_titles: Option<PathBuf>,
    /// Add the curated profile timeline and recovered greeting months to the
    /// history before the profile phase. Existing eras and months are kept.
    #[arg(long)]
    seed_history: bool,
}

#[derive(Debug, Args)]
struct VerifyArgs {
    /// Treat missing or remote-only images as failures.
    #[arg(long)]
    strict: bool,
}

impl From<SyncArgs> for SyncOptions {
    fn from(args: SyncArgs) -> Self {
        Self {
            full: args.full,
            profile_only: args.profile_only,
            request_delay_ms: args.request_delay_ms,
            image_delay_ms: args.image_delay_ms,
            max_pages: args.max_pages,
            era_titles: args.era_titles,
            seed_history: args.seed_history,
        }
    }
}

fn print_report(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{}", report.render_text());
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init();

    let report = match cli.command.unwrap_or(Command::Sync(SyncArgs::default())) {
        Command::Sync(args) => commands::sync::run(&SyncOptions::from(args))?,
        Command::Status => commands::status::run()?,
        Command::Verify(args) => commands::verify::run(&VerifyOptions {
            strict: args.strict,
        })?,
    };

    print_report(&report, cli.json)?;
    if !report.ok {
        return Err(anyhow!("{} reported {} issue(s)", report.command, report.issues.len()));
    }
    Ok(())
}
