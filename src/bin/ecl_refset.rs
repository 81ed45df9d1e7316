//! ecl-refset - reconcile query reference sets against their ECL definitions
//!
//! Usage:
//!   ecl-refset --config refset.yaml
//!   ecl-refset --config refset.yaml --dry-run --json
//!   ecl-refset --set 32570581000036105 --set 1184831000168105
//!
//! Settings come from the YAML file, then `ECL_REFSET_*` environment
//! variables (a `.env` file is honoured), then the flags below.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use ecl_refset::config::{RefsetConfig, ThresholdPolicy};
use ecl_refset::reconcile::{Reconciler, RunOptions, RunReport};
use ecl_refset::snowstorm::SnowstormClient;
use ecl_refset::ticketing::TicketingClient;

#[derive(Parser, Debug)]
#[command(name = "ecl-refset")]
#[command(about = "Reconcile query reference sets against their ECL definitions")]
struct Args {
    /// YAML configuration file
    #[arg(long, short = 'c', env = "ECL_REFSET_CONFIG")]
    config: Option<PathBuf>,

    /// Resolve and diff, but submit nothing
    #[arg(long, short = 'n')]
    dry_run: bool,

    /// Only reconcile these sets (repeatable)
    #[arg(long = "set", short = 's')]
    sets: Vec<String>,

    /// Override the terminology server base URL
    #[arg(long)]
    snowstorm_url: Option<String>,

    /// Override the branch path
    #[arg(long)]
    branch: Option<String>,

    /// Override the percent threshold policy (warn or block)
    #[arg(long)]
    threshold_policy: Option<ThresholdPolicy>,

    /// Print the run report as JSON
    #[arg(long)]
    json: bool,
}

impl Args {
    fn apply(&self, config: &mut RefsetConfig) {
        if let Some(url) = &self.snowstorm_url {
            config.snowstorm_url = url.clone();
        }
        if let Some(branch) = &self.branch {
            config.branch = branch.clone();
        }
        if let Some(policy) = self.threshold_policy {
            config.threshold_policy = policy;
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = RefsetConfig::load(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let store = Arc::new(
        SnowstormClient::from_config(&config).context("Failed to build terminology client")?,
    );

    let (cancel_tx, cancel) = watch::channel(false);
    let cancel_tx = Arc::new(cancel_tx);

    if let Some(secs) = config.run_timeout_secs {
        let tx = cancel_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            warn!(secs, "Run timeout reached, cancelling");
            let _ = tx.send(true);
        });
    }
    {
        let tx = cancel_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling");
                let _ = tx.send(true);
            }
        });
    }

    let mut reconciler = Reconciler::new(store, config.clone());
    if let Some(url) = &config.ticketing_url {
        let sink = TicketingClient::new(url, config.auth_cookie.clone(), config.request_timeout())
            .context("Failed to build ticketing client")?;
        reconciler = reconciler.with_report_sink(Arc::new(sink));
    }

    let options = RunOptions {
        dry_run: args.dry_run,
        only_sets: args.sets.iter().cloned().collect::<BTreeSet<_>>(),
    };
    info!(dry_run = options.dry_run, branch = %config.branch, "Starting run");
    let report = reconciler.run(options, cancel).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }

    Ok(if report.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_summary(report: &RunReport) {
    println!("{} {}", report.job_name, report.job_id);
    if let Some(reason) = &report.skipped {
        println!("  skipped: {}", reason);
        return;
    }
    if let Some(error) = &report.error {
        println!("  error: {}", error);
    }
    println!("  resolution passes: {}", report.resolution_passes);
    for set in &report.sets {
        println!(
            "  {} {:<18} +{} (created {}, reactivated {}) -{}  [{:?}]",
            set.set_id,
            set.term.as_deref().unwrap_or(""),
            set.added(),
            set.created,
            set.reactivated,
            set.deactivated,
            set.outcome,
        );
        for warning in &set.warnings {
            println!("      warning: {}", warning);
        }
        for error in &set.errors {
            println!("      error: {}", error);
        }
    }
    let failed = report.failed_sets().count();
    println!("  {} sets, {} failed", report.sets.len(), failed);
}
