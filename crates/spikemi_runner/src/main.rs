pub mod config;
pub mod export;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use spikemi_core::{
    datasets, load_results, run_or_load, AnalysisConfig, CurveKind, DirectoryArchive,
    JsonSpikeFile, ResultsArchive,
};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::RunnerConfig;

#[derive(Parser)]
#[command(name = "spikemi")]
#[command(about = "Clustering-decoder mutual information for simulated spike trains")]
struct Cli {
    #[command(flatten)]
    analysis: AnalysisConfig,

    /// TOML file with an [analysis] table; replaces the analysis flags when given
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Results archive root (default: ~/.spikemi/results)
    #[arg(long, global = true)]
    archive_dir: Option<PathBuf>,

    /// Emit JSON log lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyse one parameter point and store its results
    Run {
        /// JSON spike file
        spikes: PathBuf,
        /// Recompute even if complete results are stored
        #[arg(long)]
        force: bool,
    },
    /// Report whether complete results are stored for the parameter point
    Status,
    /// Write the stored MI curves as CSV
    Export {
        /// Output CSV path
        output: PathBuf,
    },
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    let runner = match &cli.config {
        Some(path) => RunnerConfig::load(path)?,
        None => RunnerConfig {
            analysis: cli.analysis.clone(),
            archive_dir: None,
        },
    };
    let analysis = runner.analysis.clone();
    analysis.validate().context("invalid analysis parameters")?;
    let archive_dir = cli.archive_dir.clone().unwrap_or_else(|| runner.archive_dir());
    let archive = DirectoryArchive::open(&archive_dir)
        .with_context(|| format!("opening results archive {}", archive_dir.display()))?;
    let key = analysis.parameter_key();

    match cli.command {
        Commands::Run { spikes, force } => {
            let source = JsonSpikeFile::open(&spikes)
                .with_context(|| format!("loading spikes from {}", spikes.display()))?;
            let results = run_or_load(&analysis, &source, &archive, force)?;
            for kind in CurveKind::ALL {
                if let Some(mi) = results.point_mi(kind) {
                    info!(
                        curve = kind.dataset_name(),
                        alphabet_size = analysis.n_stim_patterns,
                        mi,
                        "point information"
                    );
                }
            }
            info!(
                key = %key,
                archive = %archive_dir.display(),
                mean_hoyer = results.activity.mean_hoyer(),
                mean_activity = results.activity.mean_activity(),
                "analysis complete"
            );
        }
        Commands::Status => {
            let stored = archive.stored_names(&key)?;
            let missing: Vec<&str> = datasets::EXPECTED
                .iter()
                .copied()
                .filter(|name| !stored.iter().any(|s| s == name))
                .collect();
            if missing.is_empty() {
                println!("{key}: complete");
            } else if stored.is_empty() {
                println!("{key}: not run");
            } else {
                println!("{key}: incomplete, missing {}", missing.join(", "));
            }
        }
        Commands::Export { output } => {
            let Some(results) = load_results(&analysis, &archive)? else {
                warn!(key = %key, "no complete results stored");
                bail!("no complete results for {key}; run it first");
            };
            export::export_csv(&results, &output)?;
            info!(output = %output.display(), "curves exported");
        }
    }
    Ok(())
}
