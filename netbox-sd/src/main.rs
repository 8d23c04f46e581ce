//! NetBox to Prometheus file-SD exporter.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use clap::error::ErrorKind;
use tracing::{error, info};

use netbox_sd::config::OutputMode;
use netbox_sd::{Exporter, ExporterConfig, ExporterError, RunSummary};

/// Exit status for command-line usage errors (`EX_USAGE`).
const USAGE_EXIT_CODE: u8 = 64;

/// Write Prometheus file-based service discovery targets from NetBox.
#[derive(Parser, Debug)]
#[command(name = "netbox-sd")]
#[command(about = "Export NetBox devices and virtual machines as Prometheus file-SD targets")]
#[command(version)]
struct Args {
    /// NetBox base URL (overrides config).
    #[arg(env = "NETBOX_URL")]
    url: Option<String>,

    /// NetBox API token (overrides config).
    #[arg(env = "NETBOX_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Output file, or output directory with --directory (overrides config).
    #[arg(env = "OUTPUT_FILE")]
    output: Option<PathBuf>,

    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write one file per target list into the output directory.
    #[arg(long)]
    directory: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn into_config(self) -> Result<ExporterConfig, ExporterError> {
        let mut config = match &self.config {
            Some(path) => ExporterConfig::load_from_file(path)?,
            None => ExporterConfig::default(),
        };

        if let Some(url) = self.url {
            config.netbox.url = url;
        }
        if let Some(token) = self.token {
            config.netbox.token = token;
        }
        if let Some(output) = self.output {
            config.output.path = Some(output);
        }
        if self.directory {
            config.output.mode = OutputMode::Directory;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Exit status for a rejected command line.
///
/// `--help` and `--version` succeed; every other parse failure gets a code
/// outside the range used for failed runs.
fn parse_exit_code(err: &clap::Error) -> u8 {
    match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
        _ => USAGE_EXIT_CODE,
    }
}

async fn run(config: ExporterConfig) -> anyhow::Result<RunSummary> {
    netbox_sd_common::init_tracing(&config.logging).context("Failed to initialize logging")?;

    info!("Starting NetBox service discovery");

    let exporter = Exporter::new(config)?;
    let summary = exporter
        .run()
        .await
        .with_context(|| format!("Discovery run for {} failed", exporter.output().display()))?;

    Ok(summary)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // clap renders help and version to stdout, errors to stderr.
            let _ = e.print();
            return ExitCode::from(parse_exit_code(&e));
        }
    };

    // Logging is configured from the config file, so config errors go to stderr.
    let config = match args.into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("netbox-sd: {}", e);
            return ExitCode::from(e.exit_code());
        }
    };

    match run(config).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            let code = e
                .downcast_ref::<ExporterError>()
                .map_or(1, ExporterError::exit_code);
            let kind = e
                .downcast_ref::<ExporterError>()
                .map_or("internal", ExporterError::kind);
            error!(kind, "Exporter failed: {:#}", e);
            ExitCode::from(code)
        }
    }
}
