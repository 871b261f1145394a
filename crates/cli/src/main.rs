//! `ispbx`: command-line front end for the PBX gateway

mod cli;
mod commands;
mod logging;
mod settings;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::error;

use ispbx_pbx_core::PbxGateway;

use crate::cli::Cli;
use crate::settings::AppConfig;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn execute(cli: Cli) -> Result<ExitCode> {
    let mut app = AppConfig::load(&cli.config)?;
    if let Some(level) = cli.log_level {
        app.logging.level = level;
    }
    app.logging.json |= cli.json_logs;
    logging::setup_logging(&app.logging)?;

    let gateway = match PbxGateway::connect_new(app.ami, app.pbx).await {
        Ok(gateway) => gateway,
        Err(e) => {
            error!(error = %e, "Could not reach the PBX");
            return Err(anyhow::anyhow!(e.user_message()));
        }
    };

    let result = commands::run(&gateway, cli.command).await;
    gateway.shutdown().await;
    result
}
