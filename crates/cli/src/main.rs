//! Rightsize CLI
//!
//! Recommends memory limits for running Kubernetes workloads from their
//! Prometheus history, and optionally writes them back to GitOps manifests.

mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use rightsize_lib::duration::parse_duration;
use rightsize_lib::FallbackStrategy;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Memory right-sizing for Kubernetes workloads
#[derive(Parser)]
#[command(name = "rightsize")]
#[command(author, version, about = "Memory right-sizing for Kubernetes workloads", long_about = None)]
pub struct Cli {
    /// Output format
    #[arg(long, short, global = true, default_value = "table")]
    pub format: output::OutputFormat,

    /// Log progress instead of drawing a live spinner
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Analyze workloads and print memory recommendations
    Simple {
        #[command(flatten)]
        analysis: AnalysisArgs,

        /// Kubeconfig context to analyze; repeat for several clusters
        #[arg(long = "context")]
        contexts: Vec<String>,

        /// Write the report to a file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Print run metrics in Prometheus text format after the report
        #[arg(long)]
        print_metrics: bool,
    },

    /// Analyze, then patch matching manifests after confirmation
    Apply {
        #[command(flatten)]
        analysis: AnalysisArgs,

        /// Kubeconfig context to analyze
        #[arg(long)]
        context: Option<String>,

        /// Root of the GitOps repository holding `clusters/`
        #[arg(long, env = "RIGHTSIZE_REPO_PATH")]
        repo: Option<PathBuf>,
    },
}

/// Flags shared by every analysis
#[derive(Args, Debug, Clone, Default)]
pub struct AnalysisArgs {
    /// Prometheus base URL (discovered in-cluster when omitted)
    #[arg(long, short = 'p')]
    pub prometheus: Option<String>,

    /// Namespaces to analyze (all when omitted)
    #[arg(long = "namespace", short = 'n', value_delimiter = ',')]
    pub namespaces: Vec<String>,

    /// Label selector for pods
    #[arg(long, short = 'l')]
    pub selector: Option<String>,

    /// Lookback window, e.g. 7d, 2w, 1w3d
    #[arg(long, value_parser = parse_history)]
    pub history: Option<Duration>,

    /// Headroom above peak usage (0.5 = 50%)
    #[arg(long)]
    pub memory_buffer: Option<f64>,

    /// Minimum recommended memory in MiB
    #[arg(long = "mem-min")]
    pub min_memory: Option<f64>,

    /// Workloads analyzed in parallel
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Targeted query used when a container is missing from the bulk fetch
    #[arg(long, value_enum)]
    pub fallback: Option<FallbackArg>,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum FallbackArg {
    /// Match pods by name prefix
    Instance,
    /// Join pods to their owning workload
    Workload,
}

impl From<FallbackArg> for FallbackStrategy {
    fn from(arg: FallbackArg) -> Self {
        match arg {
            FallbackArg::Instance => FallbackStrategy::Instance,
            FallbackArg::Workload => FallbackStrategy::Workload,
        }
    }
}

fn parse_history(raw: &str) -> Result<Duration, String> {
    parse_duration(raw).map_err(|e| e.to_string())
}

fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    match cli.command {
        Commands::Simple {
            analysis,
            contexts,
            output,
            print_metrics,
        } => {
            let config = config::resolve(&analysis, cli.verbose, None)?;
            commands::analyze::run(&config, &contexts, cli.format, output.as_deref(), print_metrics).await?;
        }
        Commands::Apply {
            analysis,
            context,
            repo,
        } => {
            let config = config::resolve(&analysis, cli.verbose, repo)?;
            commands::apply::run(&config, context.as_deref()).await?;
        }
    }

    Ok(())
}
