//! CLI entry point for overlay-merge
//!
//! Parses command line arguments, loads the configuration and runs one merge
//! pass over a directory.

use clap::Parser;
use overlay_merge::{check_tools, Config, MergeCoordinator, RunSummary};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// overlay-merge - fold exported overlay layers back into photos and videos
#[derive(Parser, Debug)]
#[command(name = "overlay-merge")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding the exported media
    #[arg(default_value = "snapchat_memories")]
    directory: PathBuf,

    /// Path to an optional configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,

    /// Exit with status 1 if any group ended partial or failed
    #[arg(long)]
    strict: bool,

    /// Skip the ffmpeg/ffprobe availability checks
    #[arg(long)]
    skip_checks: bool,
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

fn print_summary(summary: &RunSummary) {
    println!("Processing complete for {}", summary.directory);
    println!("  Groups:           {}", summary.total_groups());
    println!("  Merged:           {}", summary.merged);
    println!("  Skipped:          {}", summary.skipped);
    println!("  Partial failures: {}", summary.partial);
    println!("  Failed:           {}", summary.failed);
    println!("  Overlays applied: {}", summary.overlays_applied);

    for result in summary.results.iter().filter(|r| r.outcome.is_failure()) {
        for failure in &result.failures {
            println!(
                "  [{}] {} {}: {}",
                result.base_id, failure.overlay, failure.kind, failure.message
            );
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging();

    let config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(config) => config,
            Err(e) => {
                error!(config = %path.display(), error = %e, "Failed to load configuration");
                return ExitCode::FAILURE;
            }
        },
        None => Config::from_env(),
    };

    if args.skip_checks {
        warn!("Skipping tool checks (--skip-checks enabled)");
    } else {
        for check in check_tools(&config).await {
            match check.result {
                Ok(version) => info!(program = %check.program, version = %version, "Tool available"),
                Err(e) => warn!(
                    program = %check.program,
                    error = %e,
                    "Tool check failed; video overlays will not merge"
                ),
            }
        }
    }

    let coordinator = MergeCoordinator::new(config);
    let summary = match coordinator.run(&args.directory).await {
        Ok(summary) => summary,
        Err(e) => {
            error!(error = %e, "Cannot process directory");
            return ExitCode::FAILURE;
        }
    };

    if args.json {
        match summary.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => {
                error!(error = %e, "Failed to serialize summary");
                return ExitCode::FAILURE;
            }
        }
    } else {
        print_summary(&summary);
    }

    if args.strict && summary.has_failures() {
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
