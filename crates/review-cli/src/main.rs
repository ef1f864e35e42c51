//! nix-review - build what a nixpkgs change touches and report the outcome
//!
//! ## Commands
//!
//! - `build`: resolve, build and classify attributes in a checkout
//! - `hydra`: show the latest Hydra status of attributes

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nix_build_backend::{is_nix_available, NixError};
use review_core::{
    guess_jobset, ArtifactDirs, BuildStatusProvider, CrossReferencer, FilterConfig,
    FilterPipeline, HydraClient, HydraConfig, NixBackend, Review, ReviewContext, ReviewOptions,
    ReviewPolicy, SuccessCriteria, REPORT_MARKDOWN,
};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "nix-review")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build the packages touched by a nixpkgs change and report the outcome", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build attributes in a checkout and classify the results
    Build(BuildArgs),

    /// Show the latest Hydra build status of attributes
    Hydra {
        /// Attribute names
        #[arg(required = true)]
        attrs: Vec<String>,

        /// Target system (default: the current system)
        #[arg(long)]
        system: Option<String>,

        /// Channel or jobset to look in
        #[arg(long, default_value = "unstable")]
        channel: String,

        /// Hydra base URL
        #[arg(long, env = "HYDRA_URL")]
        hydra_url: Option<String>,
    },
}

#[derive(clap::Args)]
struct BuildArgs {
    /// Attribute names to build
    #[arg(required = true)]
    attrs: Vec<String>,

    /// nixpkgs checkout to evaluate against
    #[arg(long, default_value = ".")]
    checkout: PathBuf,

    /// Target system (default: the current system)
    #[arg(long)]
    system: Option<String>,

    /// Base branch of the change, used to pick the Hydra jobset
    #[arg(long)]
    base_branch: Option<String>,

    /// Directory for logs, result links and the report
    #[arg(short, long, default_value = "nix-review-output")]
    output: PathBuf,

    /// Extra arguments passed to `nix build` (shell-quoted)
    #[arg(long, default_value = "", allow_hyphen_values = true)]
    build_args: String,

    /// Only failures introduced by the change fail the run
    #[arg(long)]
    lenient: bool,

    /// Do not treat dependency failures as timeouts when a build timed out
    #[arg(long)]
    no_timeout_heuristic: bool,

    /// Skip the Hydra cross-reference; every failure counts as new
    #[arg(long)]
    no_hydra: bool,

    /// Hydra base URL
    #[arg(long, env = "HYDRA_URL")]
    hydra_url: Option<String>,

    /// Concurrent Hydra requests
    #[arg(long, default_value_t = review_core::DEFAULT_CONCURRENCY)]
    hydra_concurrency: usize,

    /// Keep only the last N bytes of each build log
    #[arg(long)]
    max_log_size: Option<usize>,

    /// Prefix for log links in the report
    #[arg(long)]
    log_url_prefix: Option<String>,

    /// Change URL shown above the console summary
    #[arg(long)]
    pr_url: Option<String>,

    /// Commit the change was reviewed at
    #[arg(long)]
    head_sha: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    review_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Build(args) => {
            let succeeded = cmd_build(args).await?;
            if !succeeded {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Hydra {
            attrs,
            system,
            channel,
            hydra_url,
        } => cmd_hydra(&attrs, system, &channel, hydra_url).await,
    }
}

/// nix system double for the running host.
fn current_system() -> String {
    let os = match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    };
    format!("{}-{}", std::env::consts::ARCH, os)
}

fn hydra_config(url: Option<String>) -> HydraConfig {
    let mut config = HydraConfig::from_env();
    if let Some(url) = url.filter(|u| !u.is_empty()) {
        config.base_url = url.trim_end_matches('/').to_string();
    }
    config
}

fn policy_from_args(args: &BuildArgs) -> ReviewPolicy {
    ReviewPolicy {
        success: if args.lenient {
            SuccessCriteria::Lenient
        } else {
            SuccessCriteria::Strict
        },
        timeout_heuristic: !args.no_timeout_heuristic,
        ..ReviewPolicy::default()
    }
}

fn review_command(args: &BuildArgs) -> String {
    let mut command = String::from("nix-review build");
    for attr in &args.attrs {
        command.push(' ');
        command.push_str(attr);
    }
    command
}

fn review_options(
    args: &BuildArgs,
    checkout: &Path,
    work_dir: &Path,
    system: &str,
    extra_build_args: Vec<String>,
) -> ReviewOptions {
    let mut opts = ReviewOptions::new(checkout, work_dir, system);
    opts.base_branch = args.base_branch.clone();
    opts.extra_build_args = extra_build_args;
    opts.output = Some(ArtifactDirs {
        log_url_prefix: args.log_url_prefix.clone(),
        max_log_bytes: args.max_log_size,
        ..ArtifactDirs::under(&args.output)
    });
    opts.report_dir = Some(args.output.clone());
    opts.context = ReviewContext {
        command: review_command(args),
        head_sha: args.head_sha.clone(),
        pr_url: args.pr_url.clone(),
    };
    opts
}

/// Build and classify; returns whether the report succeeded.
async fn cmd_build(args: BuildArgs) -> Result<bool> {
    if !is_nix_available() {
        return Err(NixError::NixNotFound.into());
    }

    let checkout = args
        .checkout
        .canonicalize()
        .context(format!("Failed to resolve checkout {:?}", args.checkout))?;
    let extra_build_args = shell_words::split(&args.build_args)
        .context(format!("Failed to parse --build-args {:?}", args.build_args))?;
    let system = args.system.clone().unwrap_or_else(current_system);

    let policy = policy_from_args(&args);
    let filters = FilterConfig::from_env();
    let backend = Arc::new(NixBackend::new());

    let mut review = Review::new(backend, policy).with_filters(
        FilterPipeline::from_commands(&filters.pre_build, &checkout),
        FilterPipeline::from_commands(&filters.post_build, &checkout),
    );
    if !args.no_hydra {
        let config = hydra_config(args.hydra_url.clone()).with_concurrency(args.hydra_concurrency);
        review = review.with_cross_referencer(CrossReferencer::for_hydra(HydraClient::new(config)));
    }

    let work_dir = tempfile::tempdir().context("Failed to create work directory")?;
    let opts = review_options(&args, &checkout, work_dir.path(), &system, extra_build_args);

    let names: BTreeSet<String> = args.attrs.iter().cloned().collect();
    let report = review
        .run(&names, &opts)
        .await
        .context(format!("Review of {} attribute(s) on {} failed", names.len(), system))?;

    print!("{}", report.console());
    info!("Report written to {:?}", args.output.join(REPORT_MARKDOWN));

    Ok(report.succeeded())
}

async fn cmd_hydra(
    attrs: &[String],
    system: Option<String>,
    channel: &str,
    hydra_url: Option<String>,
) -> Result<()> {
    let system = system.unwrap_or_else(current_system);
    let client = HydraClient::new(hydra_config(hydra_url));
    let jobset = guess_jobset(channel);

    for attr in attrs {
        println!("{}", client.job_url(&jobset, attr, &system));
        match client.build_status(&jobset, attr, &system).await {
            Ok(Some(status)) => {
                println!("  Status: {}", status.status);
                if let Some(url) = &status.build_url {
                    println!("  Build: {url}");
                }
                if let Some(ts) = status.timestamp {
                    println!("  Finished: {}", ts.to_rfc3339());
                }
                if let Some(name) = &status.name {
                    println!("  Name: {name}");
                }
            }
            Ok(None) => println!("  No data"),
            Err(e) => println!("  Error: {e}"),
        }
    }

    Ok(())
}
