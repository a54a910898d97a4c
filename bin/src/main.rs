//! Navcycle CLI binary.
//!
//! Loads a universe of daily price observations, runs the cyclicality
//! pipeline over it and writes the ranking, turning-point and backtest
//! reports.

mod data;

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use navcycle_eval::{JsonDirCache, RunOutput, Runner, tables};
use navcycle_traits::AnalysisParams;

#[derive(Parser)]
#[command(name = "navcycle")]
#[command(about = "Cyclicality detection for daily price series", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full analysis and write all reports
    Analyze {
        /// Input CSV with instrument_id, date and value columns
        input: PathBuf,

        /// Parameter bundle (TOML); defaults are used when omitted
        #[arg(short, long)]
        params: Option<PathBuf>,

        /// Directory for the output reports
        #[arg(short, long, default_value = "reports")]
        output: PathBuf,

        /// Directory for cached per-instrument results
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Abort scheduling new instruments after this many seconds
        #[arg(long)]
        deadline_secs: Option<u64>,

        /// Abort the whole run on the first instrument failure
        #[arg(long)]
        fail_fast: bool,
    },

    /// Print the top of the cyclicality ranking
    Rank {
        /// Input CSV with instrument_id, date and value columns
        input: PathBuf,

        /// Parameter bundle (TOML); defaults are used when omitted
        #[arg(short, long)]
        params: Option<PathBuf>,

        /// Number of instruments to show
        #[arg(short, long, default_value = "20")]
        top: usize,
    },

    /// Print forward-return statistics for confirmed troughs
    Backtest {
        /// Input CSV with instrument_id, date and value columns
        input: PathBuf,

        /// Parameter bundle (TOML); defaults are used when omitted
        #[arg(short, long)]
        params: Option<PathBuf>,

        /// Horizons in grid steps, overriding the bundle
        #[arg(short = 'H', long, value_delimiter = ',')]
        horizons: Vec<usize>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze {
            input,
            params,
            output,
            cache_dir,
            deadline_secs,
            fail_fast,
        } => analyze(
            &input,
            params.as_deref(),
            &output,
            cache_dir,
            deadline_secs,
            fail_fast,
        ),
        Commands::Rank { input, params, top } => rank(&input, params.as_deref(), top),
        Commands::Backtest {
            input,
            params,
            horizons,
        } => backtest(&input, params.as_deref(), &horizons),
    }
}

fn run_universe(
    input: &std::path::Path,
    params: AnalysisParams,
    cache_dir: Option<PathBuf>,
    deadline_secs: Option<u64>,
) -> Result<RunOutput> {
    let (universe, loader_diagnostics) = data::load_observations(input)?;
    println!("Universe: {} instruments from {}", universe.len(), input.display());
    println!();

    let mut runner = Runner::new(params);
    if let Some(dir) = cache_dir {
        runner = runner.with_cache(Arc::new(JsonDirCache::new(dir)?));
    }
    if let Some(secs) = deadline_secs {
        runner = runner.with_deadline(Duration::from_secs(secs));
    }

    let mut output = runner.run(&universe)?;
    output.diagnostics.extend(loader_diagnostics);
    Ok(output)
}

fn analyze(
    input: &std::path::Path,
    params_path: Option<&std::path::Path>,
    output_dir: &std::path::Path,
    cache_dir: Option<PathBuf>,
    deadline_secs: Option<u64>,
    fail_fast: bool,
) -> Result<()> {
    println!("\n╔══════════════════════════════════════════════════════════════╗");
    println!("║                     Cyclicality Analysis                     ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    let mut params = data::load_params(params_path)?;
    params.fail_fast = params.fail_fast || fail_fast;

    let output = run_universe(input, params, cache_dir, deadline_secs)?;

    std::fs::create_dir_all(output_dir)?;
    data::write_ranking_csv(&output_dir.join("ranking.csv"), &output.ranking)?;
    data::write_turning_points_csv(
        &output_dir.join("turning_points.csv"),
        &output.turning_points,
    )?;
    data::write_backtest_csv(&output_dir.join("backtest.csv"), &output.backtest_records)?;
    data::write_backtest_summary_csv(
        &output_dir.join("backtest_summary.csv"),
        &output.backtest_summaries,
    )?;
    data::write_diagnostics_csv(&output_dir.join("diagnostics.csv"), &output.diagnostics)?;

    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("RANKING ({} instruments scored)", output.ranking.len());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
    println!("{}", tables::ranking_table(&output.ranking)?);

    if !output.diagnostics.is_empty() {
        println!("Excluded instruments: {}", output.diagnostics.len());
        println!("{}", tables::diagnostics_table(&output.diagnostics)?);
    }

    println!("Reports written to {}", output_dir.display());
    println!();
    Ok(())
}

fn rank(
    input: &std::path::Path,
    params_path: Option<&std::path::Path>,
    top: usize,
) -> Result<()> {
    println!("\n╔══════════════════════════════════════════════════════════════╗");
    println!("║                    Cyclicality Ranking                       ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    let params = data::load_params(params_path)?;
    let output = run_universe(input, params, None, None)?;

    let shown = output.ranking.len().min(top);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("TOP {} OF {} INSTRUMENTS", shown, output.ranking.len());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
    println!("{}", tables::ranking_table(&output.ranking[..shown])?);
    println!();
    Ok(())
}

fn backtest(
    input: &std::path::Path,
    params_path: Option<&std::path::Path>,
    horizons: &[usize],
) -> Result<()> {
    println!("\n╔══════════════════════════════════════════════════════════════╗");
    println!("║                    Trough Backtest                           ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    let mut params = data::load_params(params_path)?;
    if !horizons.is_empty() {
        params.backtest_horizons = horizons.to_vec();
    }
    println!(
        "Horizons: {} grid steps",
        params
            .backtest_horizons
            .iter()
            .map(|h| h.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let output = run_universe(input, params, None, None)?;

    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("FORWARD RETURNS AFTER CONFIRMED TROUGHS");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");

    if output.backtest_summaries.is_empty() {
        println!("No confirmed troughs with a full forward window.");
    } else {
        println!(
            "{}",
            tables::backtest_summary_table(&output.backtest_summaries)?
        );
    }
    println!();
    Ok(())
}
