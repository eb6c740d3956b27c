//! docsync CLI - Command-line interface for docsync
//!
//! Provides commands for:
//! - Inspecting the state cache (cursor, root, record counts)
//! - Listing and resetting per-item failure counters
//! - Viewing and validating configuration

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use docsync_core::config::Config;

mod commands;
mod output;

use commands::{config::ConfigCommand, failures::FailuresCommand, status::StatusCommand};
use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(
    name = "docsync",
    version,
    about = "Two-way sync between a local folder and a document repository"
)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show the state cache summary
    Status(StatusCommand),
    /// List or reset failure counters
    Failures(FailuresCommand),
    /// View and manage configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

/// Everything a command needs from the global flags
#[derive(Debug, Clone)]
pub struct Context {
    pub format: OutputFormat,
    pub quiet: bool,
    pub config_path: PathBuf,
}

impl Context {
    /// Configuration at `config_path`, or the defaults when it is missing
    pub fn load_config(&self) -> Config {
        Config::load_or_default(&self.config_path)
    }
}

/// Level directive for the `-v` count, falling back to the configured level
fn filter_directive(verbose: u8, configured: &str) -> String {
    match verbose {
        0 => configured.to_string(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

fn init_tracing(verbose: u8, config: &Config) {
    let directive = filter_directive(verbose, &config.logging.level);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if config.logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = Context {
        format: if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        },
        quiet: cli.quiet,
        config_path: cli.config.clone().unwrap_or_else(Config::default_path),
    };

    init_tracing(cli.verbose, &ctx.load_config());

    match cli.command {
        Commands::Status(cmd) => cmd.execute(&ctx).await,
        Commands::Failures(cmd) => cmd.execute(&ctx).await,
        Commands::Config(cmd) => cmd.execute(&ctx).await,
    }
}
