//! Config command - View and manage docsync configuration
//!
//! Provides the `docsync config` CLI command which:
//! 1. Shows the effective configuration (YAML or JSON)
//! 2. Prints the configuration file path
//! 3. Validates the configuration file and reports errors
//! 4. Sets individual values via dot-notation keys

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Subcommand;
use tracing::info;

use docsync_core::config::Config;

use crate::output::{get_formatter, OutputFormat};
use crate::Context;

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display current configuration
    Show,
    /// Print the configuration file path
    Path,
    /// Validate configuration file
    Validate,
    /// Set a configuration value
    Set {
        /// Configuration key (e.g., "sync.max_workers")
        key: String,
        /// New value
        value: String,
    },
}

impl ConfigCommand {
    pub async fn execute(&self, ctx: &Context) -> Result<()> {
        match self {
            ConfigCommand::Show => self.execute_show(ctx),
            ConfigCommand::Path => self.execute_path(ctx),
            ConfigCommand::Validate => self.execute_validate(ctx),
            ConfigCommand::Set { key, value } => self.execute_set(ctx, key, value),
        }
    }

    fn execute_show(&self, ctx: &Context) -> Result<()> {
        let formatter = get_formatter(ctx.format, ctx.quiet);
        let config = ctx.load_config();

        info!(config_path = %ctx.config_path.display(), "Showing configuration");

        if ctx.format == OutputFormat::Json {
            let json = serde_json::to_value(&config)
                .context("Failed to serialize configuration to JSON")?;
            formatter.print_json(&json);
        } else {
            formatter.success(&format!("Configuration ({})", ctx.config_path.display()));
            formatter.info("");
            for line in config.to_yaml()?.lines() {
                formatter.info(line);
            }
        }

        Ok(())
    }

    fn execute_path(&self, ctx: &Context) -> Result<()> {
        let path = ctx.config_path.display().to_string();
        if ctx.format == OutputFormat::Json {
            get_formatter(ctx.format, ctx.quiet).print_json(&serde_json::json!({
                "config_path": path,
                "exists": ctx.config_path.exists(),
            }));
        } else {
            println!("{path}");
        }
        Ok(())
    }

    fn execute_validate(&self, ctx: &Context) -> Result<()> {
        let formatter = get_formatter(ctx.format, ctx.quiet);
        let config_path = &ctx.config_path;

        // Load explicitly; a parse error must not fall back to defaults
        let config = match Config::load(config_path) {
            Ok(cfg) => cfg,
            Err(e) => {
                let message = if config_path.exists() {
                    format!("Failed to parse configuration: {e}")
                } else {
                    "Configuration file not found. Using defaults.".to_string()
                };
                if ctx.format == OutputFormat::Json {
                    formatter.print_json(&serde_json::json!({
                        "valid": false,
                        "config_path": config_path.display().to_string(),
                        "errors": [message],
                    }));
                } else {
                    formatter.error(&message);
                    formatter.info(&format!("File: {}", config_path.display()));
                }
                return Ok(());
            }
        };

        info!(config_path = %config_path.display(), "Validating configuration");

        let errors = config.validate();

        if ctx.format == OutputFormat::Json {
            let error_strings: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            formatter.print_json(&serde_json::json!({
                "valid": errors.is_empty(),
                "config_path": config_path.display().to_string(),
                "errors": error_strings,
            }));
        } else if errors.is_empty() {
            formatter.success("Configuration is valid");
            formatter.info(&format!("File: {}", config_path.display()));
        } else {
            formatter.error(&format!(
                "Configuration has {} error{}:",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" }
            ));
            formatter.info(&format!("File: {}", config_path.display()));
            formatter.info("");
            for error in &errors {
                formatter.info(&format!("  {} - {}", error.field, error.message));
            }
        }

        Ok(())
    }

    fn execute_set(&self, ctx: &Context, key: &str, value: &str) -> Result<()> {
        let formatter = get_formatter(ctx.format, ctx.quiet);
        let mut config = ctx.load_config();

        info!(key = %key, value = %value, "Setting configuration value");

        apply_config_value(&mut config, key, value)?;

        // The root may not exist before the first pass
        let errors: Vec<String> = config
            .validate()
            .iter()
            .filter(|e| e.field != "sync.root")
            .map(|e| e.to_string())
            .collect();
        if !errors.is_empty() {
            anyhow::bail!("Invalid value for '{key}': {}", errors.join("; "));
        }

        if let Some(parent) = ctx.config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create configuration directory")?;
        }
        std::fs::write(&ctx.config_path, config.to_yaml()?)
            .context("Failed to write configuration file")?;

        if ctx.format == OutputFormat::Json {
            formatter.print_json(&serde_json::json!({
                "success": true,
                "key": key,
                "value": value,
                "config_path": ctx.config_path.display().to_string(),
            }));
        } else {
            formatter.success(&format!("Set {key} = {value}"));
            formatter.info(&format!("Saved to {}", ctx.config_path.display()));
        }
        Ok(())
    }
}

/// Apply a dot-notation key/value pair to a Config struct
fn apply_config_value(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        // --- sync ---
        "sync.root" => config.sync.root = PathBuf::from(value),
        "sync.remote_folder" => config.sync.remote_folder = value.to_string(),
        "sync.bidirectional" => {
            config.sync.bidirectional = value
                .parse::<bool>()
                .context("Expected true or false for sync.bidirectional")?;
        }
        "sync.poll_interval" => {
            config.sync.poll_interval = value
                .parse::<u64>()
                .context("Expected a positive integer for sync.poll_interval")?;
        }
        "sync.max_workers" => {
            config.sync.max_workers = value
                .parse::<usize>()
                .context("Expected a positive integer")?;
        }
        "sync.change_page_size" => {
            config.sync.change_page_size = value
                .parse::<u32>()
                .context("Expected a positive integer")?;
        }
        "sync.failure_ceiling" => {
            config.sync.failure_ceiling = value
                .parse::<u32>()
                .context("Expected a positive integer")?;
        }
        "sync.request_timeout_secs" => {
            config.sync.request_timeout_secs = value
                .parse::<u64>()
                .context("Expected a positive integer")?;
        }

        // --- database ---
        "database.path" => config.database.path = PathBuf::from(value),

        // --- logging ---
        "logging.level" => config.logging.level = value.to_string(),
        "logging.format" => config.logging.format = value.to_string(),

        _ => anyhow::bail!("Unknown configuration key: '{}'", key),
    }

    Ok(())
}
