//! Telos CLI
//!
//! Command-line front end for the Telos cognitive substrate:
//! launch the background runtime, run chaos experiments, force indexing
//! cycles, and probe the memory fabric and concept repository.
//!
//! Exit codes: 0 success, 2 invariant violation, 3 external dependency
//! failure, 4 invalid argument.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{CommandFactory, FromArgMatches, Parser, Subcommand};
use colored::Colorize;
use directories::ProjectDirs;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use telos_core::{
    ChaosError, ConceptError, CoreConfig, CoreContext, ExperimentOutcome, ExperimentOverrides,
    FabricError,
};

// ============================================================================
// EXIT CODES
// ============================================================================

const EXIT_OK: u8 = 0;
const EXIT_INVARIANT: u8 = 2;
const EXIT_DEPENDENCY: u8 = 3;
const EXIT_INVALID_ARGUMENT: u8 = 4;

// ============================================================================
// CLI DEFINITION
// ============================================================================

/// Telos - neuro-symbolic cognitive substrate
#[derive(Parser)]
#[command(name = "telos")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Tiered memory fabric, decision cycle, planner, chaos conductor and graph indexer")]
struct Cli {
    /// Custom data directory (defaults to the platform data dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the background tasks and run until interrupted
    Serve,

    /// Chaos engineering
    Chaos {
        #[command(subcommand)]
        command: ChaosCommands,
    },

    /// Graph indexing
    Index {
        #[command(subcommand)]
        command: IndexCommands,
    },

    /// Memory fabric probes
    Memory {
        #[command(subcommand)]
        command: MemoryCommands,
    },

    /// Concept repository probes
    Concept {
        #[command(subcommand)]
        command: ConceptCommands,
    },
}

#[derive(Subcommand)]
enum ChaosCommands {
    /// Run one experiment, or the full validation gauntlet
    Run {
        /// Experiment id (e.g. CEP-001); omit for the gauntlet
        #[arg(long)]
        experiment: Option<String>,
    },
}

#[derive(Subcommand)]
enum IndexCommands {
    /// Force one indexing cycle
    Build,
}

#[derive(Subcommand)]
enum MemoryCommands {
    /// Dump cache sizes, hit ratios and outbox depth
    Stat,
}

#[derive(Subcommand)]
enum ConceptCommands {
    /// Load one concept by oid
    Get {
        /// Concept oid
        oid: String,
    },
    /// List concepts
    List {
        /// Maximum concepts to print
        #[arg(long, default_value = "20")]
        limit: usize,
        /// Pagination offset
        #[arg(long, default_value = "0")]
        offset: usize,
    },
}

// ============================================================================
// ERROR MAPPING
// ============================================================================

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{0}")]
    InvalidArgument(String),
    #[error("{0}")]
    InvariantViolation(String),
    #[error("{0}")]
    Dependency(String),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            CliError::InvalidArgument(_) => EXIT_INVALID_ARGUMENT,
            CliError::InvariantViolation(_) => EXIT_INVARIANT,
            CliError::Dependency(_) => EXIT_DEPENDENCY,
        }
    }
}

impl From<telos_core::CoreError> for CliError {
    fn from(e: telos_core::CoreError) -> Self {
        match e {
            telos_core::CoreError::Fabric(FabricError::InvariantViolation(detail)) => {
                CliError::InvariantViolation(detail)
            }
            other => CliError::Dependency(other.to_string()),
        }
    }
}

impl From<FabricError> for CliError {
    fn from(e: FabricError) -> Self {
        match e {
            FabricError::Input(detail) => CliError::InvalidArgument(detail),
            FabricError::InvariantViolation(detail) => CliError::InvariantViolation(detail),
            other => CliError::Dependency(other.to_string()),
        }
    }
}

impl From<ConceptError> for CliError {
    fn from(e: ConceptError) -> Self {
        match e {
            ConceptError::NotFound(oid) => {
                CliError::InvalidArgument(format!("concept not found: {oid}"))
            }
            ConceptError::DanglingEdge { .. } => CliError::InvalidArgument(e.to_string()),
            other => CliError::Dependency(other.to_string()),
        }
    }
}

impl From<ChaosError> for CliError {
    fn from(e: ChaosError) -> Self {
        match e {
            ChaosError::UnknownExperiment(id) => {
                CliError::InvalidArgument(format!("unknown experiment: {id}"))
            }
            ChaosError::AlreadyRunning(id) => {
                CliError::InvalidArgument(format!("experiment already running: {id}"))
            }
            other => CliError::Dependency(other.to_string()),
        }
    }
}

impl From<telos_core::IndexerError> for CliError {
    fn from(e: telos_core::IndexerError) -> Self {
        CliError::Dependency(e.to_string())
    }
}

// ============================================================================
// MAIN
// ============================================================================

fn default_data_dir() -> Result<PathBuf, CliError> {
    ProjectDirs::from("org", "telos", "core")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_else(|| {
            CliError::Dependency("could not determine platform data directory".to_string())
        })
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse before logging init so --help/--version exit cleanly; map
    // clap's parse failures onto the documented invalid-argument code
    let matches = match Cli::command().try_get_matches() {
        Ok(matches) => matches,
        Err(e) if e.use_stderr() => {
            let _ = e.print();
            return ExitCode::from(EXIT_INVALID_ARGUMENT);
        }
        Err(e) => {
            // --help / --version
            let _ = e.print();
            return ExitCode::from(EXIT_OK);
        }
    };
    let cli = match Cli::from_arg_matches(&matches) {
        Ok(cli) => cli,
        Err(_) => return ExitCode::from(EXIT_INVALID_ARGUMENT),
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::from(EXIT_OK),
        Err(e) => {
            error!("{e}");
            eprintln!("{} {e}", "error:".red().bold());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };
    let core = CoreContext::open(CoreConfig::new(&data_dir))?;

    match cli.command {
        Commands::Serve => run_serve(core).await,
        Commands::Chaos {
            command: ChaosCommands::Run { experiment },
        } => run_chaos(core, experiment).await,
        Commands::Index {
            command: IndexCommands::Build,
        } => run_index_build(core).await,
        Commands::Memory {
            command: MemoryCommands::Stat,
        } => run_memory_stat(core),
        Commands::Concept { command } => run_concept(core, command),
    }
}

// ============================================================================
// COMMANDS
// ============================================================================

async fn run_serve(core: CoreContext) -> Result<(), CliError> {
    info!("telos core v{} serving", env!("CARGO_PKG_VERSION"));
    core.serve();

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| CliError::Dependency(format!("signal handler failed: {e}")))?;
    info!("interrupt received; shutting down");
    core.shutdown().await?;
    Ok(())
}

async fn run_chaos(core: CoreContext, experiment: Option<String>) -> Result<(), CliError> {
    // Experiments need the background tasks (outbox drain in particular)
    core.serve();

    let result = match experiment {
        Some(id) => {
            let record = core
                .conductor()
                .start_experiment(&id, ExperimentOverrides::default())
                .await?;
            print_record(&record);
            if record.outcome == ExperimentOutcome::Passed {
                Ok(())
            } else {
                Err(CliError::Dependency(format!(
                    "experiment {} {:?}: {}",
                    record.experiment_id, record.outcome, record.analysis
                )))
            }
        }
        None => {
            let report = core.conductor().run_validation_gauntlet().await?;
            for record in &report.results {
                print_record(record);
            }
            println!(
                "\n{} {}/{} passed ({:.0}%)",
                "gauntlet:".bold(),
                report.passed,
                report.total,
                report.success_rate * 100.0
            );
            Ok(())
        }
    };

    core.shutdown().await?;
    result
}

fn print_record(record: &telos_core::ExperimentRecord) {
    let outcome = match record.outcome {
        ExperimentOutcome::Passed => "passed".green(),
        ExperimentOutcome::Failed => "failed".red(),
        ExperimentOutcome::Error => "error".yellow(),
    };
    println!(
        "{:<10} {} baseline={} {}",
        record.experiment_id.bold(),
        outcome,
        record
            .baseline
            .map(|b| format!("{b:.2}"))
            .unwrap_or_else(|| "n/a".to_string()),
        record.analysis.dimmed()
    );
}

async fn run_index_build(core: CoreContext) -> Result<(), CliError> {
    let report = core.indexer().run_indexing_cycle().await?;
    println!(
        "{} {} concepts, {} levels, {} communities, {} summaries",
        "indexed:".bold(),
        report.concepts,
        report.levels,
        report.communities,
        report.summaries
    );
    Ok(())
}

fn run_memory_stat(core: CoreContext) -> Result<(), CliError> {
    let stats = core.fabric().stats()?;

    println!("{}", "Memory Fabric".bold().underline());
    for (tier, size, max, telemetry) in [
        ("L1", stats.l1_size, Some(stats.l1_max_size), stats.l1_telemetry),
        ("L2", stats.l2_size, Some(stats.l2_max_size), stats.l2_telemetry),
        ("L3", stats.l3_size, None, stats.l3_telemetry),
    ] {
        let capacity = max
            .map(|m| format!("/{m}"))
            .unwrap_or_default();
        let ratio = telemetry
            .hit_ratio()
            .map(|r| format!("{:.1}%", r * 100.0))
            .unwrap_or_else(|| "n/a".to_string());
        println!(
            "  {:<3} {:>8}{:<8} hits {:>6}  misses {:>6}  hit ratio {}",
            tier.cyan(),
            size,
            capacity,
            telemetry.hits,
            telemetry.misses,
            ratio
        );
    }

    println!(
        "  {} pending {}  retry {}  dead-letter {}  processed {}",
        "outbox".cyan(),
        stats.outbox.pending,
        stats.outbox.retry,
        stats.outbox.dead_letter,
        stats.outbox.processed
    );
    if let Some(p99) = stats.p99_query_latency_ms {
        println!("  {} {:.2} ms", "p99 query latency".cyan(), p99);
    }
    Ok(())
}

fn run_concept(core: CoreContext, command: ConceptCommands) -> Result<(), CliError> {
    let repository = core.repository();
    match command {
        ConceptCommands::Get { oid } => {
            let concept = repository.load(&oid)?;
            let rendered = serde_json::to_string_pretty(&concept)
                .map_err(|e| CliError::Dependency(e.to_string()))?;
            println!("{rendered}");
        }
        ConceptCommands::List { limit, offset } => {
            let concepts = repository.list(limit, offset)?;
            if concepts.is_empty() {
                println!("{}", "no concepts".dimmed());
            }
            for concept in concepts {
                println!(
                    "{}  {}  confidence {:.2}  used {}",
                    concept.oid.cyan(),
                    concept.label.bold(),
                    concept.confidence,
                    concept.usage_count
                );
            }
        }
    }
    Ok(())
}
