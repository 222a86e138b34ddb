//! jvfit CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jvfit::{CalibrationConfig, Calibrator};
use std::io;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "jvfit")]
#[command(about = "Calibrate drift-diffusion device parameters against measured JV curves")]
#[command(version)]
struct Cli {
    /// Log filter (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit the configured parameters
    Calibrate {
        /// Job description (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Output file for the result (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run the configured one-at-a-time parameter sweep
    Sweep {
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Run the simulator once and print the loss
    Evaluate {
        #[arg(short, long)]
        config: PathBuf,

        /// Optimizer-space values, comma separated. Defaults to the initial guess.
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
        at: Option<Vec<f64>>,
    },

    /// Validate the job without running the simulator
    Check {
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .with_context(|| format!("invalid log level '{}'", cli.log_level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Calibrate { config, output } => cmd_calibrate(&config, output.as_ref()),
        Commands::Sweep { config } => cmd_sweep(&config),
        Commands::Evaluate { config, at } => cmd_evaluate(&config, at.as_deref()),
        Commands::Check { config } => cmd_check(&config),
    }
}

fn load(path: &Path) -> Result<CalibrationConfig> {
    CalibrationConfig::load(path).with_context(|| format!("loading {}", path.display()))
}

fn cmd_calibrate(config: &Path, output: Option<&PathBuf>) -> Result<()> {
    let calibrator = Calibrator::new(load(config)?);
    let run = calibrator.calibrate()?;
    // Keep stdout parseable when the JSON goes there
    if output.is_some() {
        run.write_summary(&mut io::stdout().lock())?;
    } else {
        run.write_summary(&mut io::stderr().lock())?;
    }
    write_json(output, serde_json::to_value(&run.result)?)
}

fn cmd_sweep(config: &Path) -> Result<()> {
    let calibrator = Calibrator::new(load(config)?);
    let report = calibrator.sweep()?;

    println!("{}", report.to_csv_string().trim_end());
    println!("Summary written to {}", report.summary.display());
    Ok(())
}

fn cmd_evaluate(config: &Path, at: Option<&[f64]>) -> Result<()> {
    let calibrator = Calibrator::new(load(config)?);
    let loss = calibrator.evaluate(at)?;
    println!("{:.6e}", loss);
    Ok(())
}

fn cmd_check(config: &Path) -> Result<()> {
    let cfg = load(config)?;
    cfg.check()?;

    println!("✓ {} is valid", config.display());
    println!("  Device file: {}", cfg.device_path().display());
    println!("  Parameters:  {}", cfg.parameters.len());
    if let Some(sweep) = &cfg.sweep {
        println!("  Sweep steps: {}", sweep.values.len());
    }
    Ok(())
}

fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)
            .with_context(|| format!("writing {}", path.display()))?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}
