//! Persona Presence Simulator CLI
//!
//! Run presence scenarios and fold their telemetry into the friction report.

use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use presence_core::{PersonaPresenceScript, RecordFilter};
use presence_sim::scenarios::ScenarioId;
use presence_sim::{fixtures, write_report, HarnessConfig, ScenarioResult, ScenarioRunner};
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Persona Presence multi-persona simulation harness
#[derive(Parser, Debug)]
#[command(name = "presence-sim")]
#[command(about = "Run multi-persona presence scenarios and summarize their UX telemetry", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one scenario or all of them
    Run(RunArgs),

    /// Aggregate stored telemetry and append a report section
    Summarize(SummarizeArgs),

    /// List built-in venues
    Venues,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Scenario to run (see `ScenarioId`), or "all"
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Built-in venue to run every scenario against
    #[arg(long, conflicts_with = "script")]
    venue: Option<String>,

    /// Persona script file to run every scenario against
    #[arg(long)]
    script: Option<PathBuf>,

    /// Master seed (0 = random from time)
    #[arg(short, long)]
    seed: Option<u64>,

    /// Number of consecutive seeds to run
    #[arg(long, default_value = "1")]
    seeds: u64,

    /// Telemetry output directory
    #[arg(long)]
    artifacts: Option<PathBuf>,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct SummarizeArgs {
    /// Telemetry directory to read
    #[arg(long)]
    artifacts: Option<PathBuf>,

    /// Report file to append to
    #[arg(long)]
    report: Option<PathBuf>,

    /// Only records from this day on (YYYY-MM-DD)
    #[arg(long, conflicts_with = "window")]
    since: Option<String>,

    /// Only records from the last N days (e.g. 7d)
    #[arg(long)]
    window: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    let config = HarnessConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(2);
    });

    let code = match cli.command {
        Command::Run(args) => run(config, args).await,
        Command::Summarize(args) => summarize(config, args),
        Command::Venues => {
            for venue in fixtures::available_venues() {
                println!("{}", venue);
            }
            0
        }
    };
    std::process::exit(code);
}

async fn run(mut config: HarnessConfig, args: RunArgs) -> i32 {
    if let Some(dir) = args.artifacts {
        config = config.with_artifacts_dir(dir);
    }

    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        match args.scenario.parse() {
            Ok(id) => vec![id],
            Err(e) => {
                eprintln!("Error: {}", e);
                let names: Vec<_> = ScenarioId::all().iter().map(|s| s.name()).collect();
                eprintln!("Available scenarios: {}, all", names.join(", "));
                return 1;
            }
        }
    };

    let script = match (&args.venue, &args.script) {
        (Some(venue), _) => Some(fixtures::load_fixture(venue)),
        (None, Some(path)) => Some(PersonaPresenceScript::load(path)),
        (None, None) => None,
    };
    let script = match script.transpose() {
        Ok(script) => script,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    // Determine base seed
    let base_seed = match args.seed {
        Some(0) => std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(config.seed),
        Some(seed) => seed,
        None => config.seed,
    };

    if !args.json {
        info!("Persona Presence Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    let mut all_results: Vec<ScenarioResult> = Vec::new();
    for seed_offset in 0..args.seeds.max(1) {
        let seed = base_seed.wrapping_add(seed_offset);
        let mut runner = ScenarioRunner::new(config.clone()).with_seed(seed);
        if let Some(script) = &script {
            runner = runner.with_script(script.clone());
        }

        for scenario in &scenarios {
            let result = runner.run(*scenario).await;
            if !args.json {
                if result.passed {
                    info!("✓ {} (seed={}) PASSED", scenario.name(), seed);
                } else {
                    error!(
                        "✗ {} (seed={}) FAILED: {}",
                        scenario.name(),
                        seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }
            all_results.push(result);
        }
    }

    let total = all_results.len();
    let failed_count = all_results.iter().filter(|r| !r.passed).count();

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": total - failed_count,
            "failed": failed_count,
            "results": all_results,
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Error: {}", e);
                return 1;
            }
        }
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed_count, total);
            for result in all_results.iter().filter(|r| !r.passed) {
                error!(
                    "  - {} seed={}: {}",
                    result.scenario.name(),
                    result.seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
        info!("Telemetry written to {}", config.artifacts_dir.display());
    }

    // Exit with proper code for CI
    if failed_count > 0 {
        1
    } else {
        0
    }
}

fn summarize(mut config: HarnessConfig, args: SummarizeArgs) -> i32 {
    if let Some(dir) = args.artifacts {
        config = config.with_artifacts_dir(dir);
    }
    if let Some(path) = args.report {
        config = config.with_report_path(path);
    }

    let now = Utc::now();
    let filter = match (&args.since, &args.window) {
        (Some(date), _) => RecordFilter::since_date(date),
        (None, Some(window)) => RecordFilter::window(window, now),
        (None, None) => Ok(RecordFilter::default()),
    };
    let filter = match filter {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    match write_report(&config, filter, now) {
        Ok(summary) => {
            info!(
                "{} runs, {} personas, {} friction patterns",
                summary.total_runs,
                summary.stats.len(),
                summary.friction_patterns.len()
            );
            0
        }
        Err(e) => {
            error!("{}", e);
            1
        }
    }
}
