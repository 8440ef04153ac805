use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use lgtm_bot::config::DEFAULT_API_URL;
use lgtm_bot::{
    ApplyReport, Forge, ForgeClient, ForgeDialect, PullRequestSnapshot, Reconciler, RepoRef,
};
use lgtm_core::Classification;

/// lgtm: two-approval review gate for pull requests
#[derive(Parser, Debug)]
#[command(name = "lgtm")]
#[command(about = "Inspect or fix the review gate of open pull requests", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Classify every open pull request of a repository
    Scan(ScanArgs),
}

#[derive(Parser, Debug)]
struct ScanArgs {
    /// Repository to scan, as owner/name
    #[arg(long)]
    repo: RepoRef,

    /// Apply labels and commit statuses instead of only printing them
    #[arg(long)]
    apply: bool,

    /// REST base URL of the forge
    #[arg(long, env = "FORGE_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,

    /// API token
    #[arg(long, env = "FORGE_TOKEN", hide_env_values = true)]
    token: String,

    /// Forge dialect
    #[arg(
        long,
        env = "FORGE_DIALECT",
        default_value = "github",
        value_parser = ["github", "gitea", "forgejo"]
    )]
    dialect: String,
}

fn print_classification(snapshot: &PullRequestSnapshot, classification: &Classification) {
    println!(
        "#{} {} {} {} {}",
        snapshot.number,
        classification.desired_label,
        classification.status_state,
        classification.status_message,
        snapshot.title
    );
}

fn print_report(report: &ApplyReport) {
    for label in &report.removed {
        println!("    removed {}", label);
    }
    if let Some(label) = &report.added {
        println!("    added {}", label);
    }
    if report.status_set {
        println!("    commit status set");
    }
    for failure in &report.failures {
        println!("    FAILED {}: {}", failure.operation, failure.message);
    }
}

async fn run_scan(args: ScanArgs) -> Result<()> {
    let dialect: ForgeDialect = args.dialect.parse()?;
    let forge = Arc::new(ForgeClient::new(
        args.api_url.trim_end_matches('/'),
        args.token,
        dialect,
    )?);

    let pull_requests = forge
        .list_open_pull_requests(&args.repo.owner, &args.repo.repo)
        .await
        .with_context(|| format!("Failed to list open pull requests of {}", args.repo))?;

    if pull_requests.is_empty() {
        println!("No open pull requests in {}", args.repo);
        return Ok(());
    }

    let reconciler = Reconciler::new(forge);
    let mut failures = 0;

    for snapshot in &pull_requests {
        if args.apply {
            match reconciler.run_classified(snapshot).await {
                Ok((classification, report)) => {
                    print_classification(snapshot, &classification);
                    print_report(&report);
                    failures += report.failures.len();
                }
                Err(e) => {
                    eprintln!("#{} {:#}", snapshot.number, e);
                    failures += 1;
                }
            }
        } else {
            match reconciler.evaluate(snapshot).await {
                Ok((_verdict, classification)) => print_classification(snapshot, &classification),
                Err(e) => {
                    eprintln!("#{} {:#}", snapshot.number, e);
                    failures += 1;
                }
            }
        }
    }

    if failures > 0 {
        eprintln!("{} operation(s) failed", failures);
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Scan(args) => run_scan(args).await,
    }
}
