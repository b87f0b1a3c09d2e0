use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("duration cannot be empty (expected e.g. 10s, 250ms, 1m)".to_string());
    }
    humantime::parse_duration(s)
        .map_err(|e| format!("invalid duration '{s}' (expected e.g. 10s, 250ms, 1m): {e}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Progress bars and a human-readable summary.
    HumanReadable,
    /// Emit JSON progress lines (NDJSON) and the JSON summary to stdout.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "surge",
    author,
    version,
    about = "Load-test orchestration engine",
    long_about = "surge runs load-test plans against an HTTP service.\n\nA plan file names scenarios (executor + built-in workload) and thresholds over the collected metrics. The run ends when every scenario finishes, or early on Ctrl-C / --abort-after.",
    after_help = "Examples:\n  surge run demos/smoke.yaml\n  surge run demos/shop-flow.yaml --base-url http://localhost:8080 --duration 30s\n  surge run demos/shop-stages.yaml --output json --summary-json summary.json\n  surge workloads"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a test plan
    #[command(
        long_about = "Run every scenario of a plan file, then evaluate its thresholds.\n\nExit code 0 means every threshold passed, 11 that some failed and 13 that the run was aborted with failing thresholds."
    )]
    Run(RunArgs),

    /// List the built-in workloads a plan can `exec`
    Workloads,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the plan (.yaml, .yml or .json)
    pub plan: PathBuf,

    /// Base URL of the service under test
    #[arg(long, env = "SURGE_BASE_URL", default_value = "http://localhost:8080")]
    pub base_url: String,

    /// Override the duration of every fixed-length scenario (e.g. 10s, 250ms, 1m)
    #[arg(long, value_parser = parse_duration)]
    pub duration: Option<Duration>,

    /// Abort the run after this long; thresholds are still evaluated
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub abort_after: Option<Duration>,

    /// Pause at the end of each workload invocation
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub think_time: Option<Duration>,

    /// How long aborted scenarios may take to wind down before they are terminated
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub abort_grace: Option<Duration>,

    /// Write the JSON summary to this file
    #[arg(long, value_name = "PATH")]
    pub summary_json: Option<PathBuf>,

    /// Write the text summary to this file
    #[arg(long, value_name = "PATH")]
    pub summary_text: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,
}
