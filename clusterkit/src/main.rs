//! clusterkit - Entry Point
//!
//! Creates, inspects and tears down Dask clusters on Hetzner Cloud.

use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;
use tracing::{debug, error};

use clusterkit::cli::{self, Cli};
use clusterkit::logs::{init_logging, LogOptions};
use clusterkit::utils::version_info;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_options = LogOptions {
        log_level: cli.common.log_level.clone(),
        json_format: cli.common.log_json,
        ..Default::default()
    };
    if let Err(e) = init_logging(log_options) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let version = version_info();
    debug!(
        "clusterkit {} ({}, built {})",
        version.version, version.git_hash, version.build_time
    );

    match cli::run(cli).await {
        Ok(0) => ExitCode::SUCCESS,
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            error!("{e}");
            if let Some(hint) = cli::hint(&e) {
                eprintln!("{}", hint.yellow());
            }
            ExitCode::FAILURE
        }
    }
}
