pub mod commands;
pub mod utils;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::config::AppConfig;

#[derive(Parser)]
#[command(name = "directsql")]
#[command(about = "directsql - file-defined SQL statements served over HTTP")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[arg(long, global = true, help = "YAML config file (overrides DIRECTSQL_CONFIG)")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Run the HTTP server (default)")]
    Serve {
        #[arg(long, help = "Listen address, e.g. 0.0.0.0:3000 (defaults to PORT)")]
        bind: Option<SocketAddr>,
    },

    #[command(about = "Parse every statement definition and report errors")]
    Check,

    #[command(about = "List statement URLs with their logical paths and kinds")]
    Routes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);

    let config = AppConfig::load(cli.config.as_deref())?;
    config.validate()?;

    match cli.command.unwrap_or(Commands::Serve { bind: None }) {
        Commands::Serve { bind } => commands::serve::handle(config, bind).await,
        Commands::Check => commands::check::handle(&config, output_format).await,
        Commands::Routes => commands::routes::handle(&config, output_format).await,
    }
}
