//! Connect every configured instrument and print its snapshot.
//!
//! ```bash
//! lab_snapshot --config config/labdrivers.toml
//! lab_snapshot --format json --id dc_dac
//! ```

use anyhow::{Context, Result};
use barrera_lab_drivers::config::{Settings, DEFAULT_CONFIG_PATH};
use barrera_lab_drivers::drivers::Driver;
use barrera_lab_drivers::logging::{init_tracing, LogFormat};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Parser)]
#[command(name = "lab_snapshot")]
#[command(about = "Print the parameters of the configured lab instruments", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Only this instrument
    #[arg(long)]
    id: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    /// Report cached values instead of querying the devices
    #[arg(long)]
    cached: bool,

    /// Log lines as JSON
    #[arg(long)]
    json_logs: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let log_format = if cli.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    init_tracing(&settings.application.log_level, log_format);

    let selected: Vec<_> = settings
        .enabled_instruments()
        .filter(|i| cli.id.as_deref().map_or(true, |id| i.id == id))
        .collect();
    if selected.is_empty() {
        anyhow::bail!("no enabled instrument matches the selection");
    }

    let mut failures = 0;
    for config in selected {
        let mut driver = match Driver::open(config) {
            Ok(driver) => driver,
            Err(e) => {
                error!("Could not connect '{}': {}", config.id, e);
                failures += 1;
                continue;
            }
        };

        let snapshot = driver.snapshot(!cli.cached);
        match cli.format {
            OutputFormat::Table => println!("{snapshot}"),
            OutputFormat::Json => println!("{}", snapshot.to_json()?),
        }
        failures += snapshot.failures().count();
        driver
            .close()
            .with_context(|| format!("closing '{}'", config.id))?;
    }

    if failures > 0 {
        anyhow::bail!("{failures} instrument(s) or parameter(s) could not be read");
    }
    Ok(())
}
