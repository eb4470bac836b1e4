use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Common CLI arguments shared across Quill binaries
#[derive(Parser, Debug, Clone)]
pub struct CommonArgs {
    #[arg(long, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short, long, help = "Enable quiet mode (minimal output)")]
    pub quiet: bool,
}

/// Subcommands understood by the reclaimer service
#[derive(Subcommand, Debug, Clone, Default)]
pub enum CommonCommands {
    /// Start the reclamation loop (default behavior)
    #[default]
    Start,
    /// Run a single reclamation pass and exit
    Once,
    /// Show current configuration and exit
    Config {
        #[arg(long, help = "Show configuration in JSON format")]
        json: bool,
    },
    /// Validate configuration and exit
    Validate,
    /// Show version information and exit
    Version,
}

/// Utility functions for CLI operations
pub mod utils {
    use super::*;
    use crate::config::Configuration;
    use anyhow::{Context, Result};
    use tracing_subscriber::EnvFilter;

    /// Pick the default log level from CLI flags
    pub fn log_level(args: &CommonArgs) -> &'static str {
        if args.quiet {
            "warn"
        } else if args.verbose {
            "debug"
        } else {
            "info"
        }
    }

    /// Initialize logging based on CLI arguments; `RUST_LOG` wins when set
    pub fn init_logging(args: &CommonArgs) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(log_level(args)));

        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    /// Load configuration with optional override from CLI
    pub fn load_config(config_path: Option<&PathBuf>) -> Result<Configuration> {
        match config_path {
            Some(path) => {
                log::info!("Loading configuration from: {}", path.display());
                Configuration::load_from_path(path).context("Failed to load configuration")
            }
            None => Configuration::load().context("Failed to load configuration"),
        }
    }

    /// Display configuration in human-readable or JSON format
    pub fn display_config(config: &Configuration, json: bool) -> Result<()> {
        if json {
            let json = serde_json::to_string_pretty(config)
                .context("Failed to serialize configuration to JSON")?;
            println!("{json}");
        } else {
            let reclaimer = &config.reclaimer;
            println!("Quill Reclaimer Configuration:");
            println!("==============================");
            println!("Database DSN: {}", config.database.dsn);
            println!("Storage DSN: {}", config.storage.dsn);
            println!("Certificate store DSN: {}", config.certificates.dsn);
            println!("Queue: {} ({})", config.queue.queue_type, config.queue.url);
            println!("Enabled: {}", reclaimer.enabled);
            println!("Tick interval: {:?}", reclaimer.tick_interval);
            println!("Company batch size: {}", reclaimer.company_batch_size);
            println!(
                "Retention (days): signed={:?}, unsigned={:?}",
                reclaimer.retention.signed_days, reclaimer.retention.unsigned_days
            );
            if reclaimer.audit.use_queue {
                println!("Audit channel: queue stream '{}'", config.queue.stream);
            } else {
                println!(
                    "Audit channel: HTTP {} (app key: {:?})",
                    reclaimer
                        .audit
                        .history_base_url
                        .as_deref()
                        .unwrap_or("<unset>"),
                    reclaimer.audit.key_encryption
                );
            }
        }
        Ok(())
    }

    /// Validate configuration and report any issues
    pub fn validate_config(config: &Configuration) -> Result<()> {
        log::info!("Validating configuration...");

        if config.database.dsn.is_empty() {
            anyhow::bail!("Database DSN cannot be empty");
        }

        if config.storage.dsn.is_empty() {
            anyhow::bail!("Storage DSN cannot be empty");
        }

        if config.certificates.dsn.is_empty() {
            anyhow::bail!("Certificate store DSN cannot be empty");
        }

        config
            .validate()
            .context("Reclaimer configuration is invalid")?;

        log::info!("Configuration validation passed");
        Ok(())
    }

    /// Handle CLI commands that don't require starting the service
    pub fn handle_common_command(command: &CommonCommands, config: &Configuration) -> Result<bool> {
        match command {
            CommonCommands::Config { json } => {
                display_config(config, *json)?;
                Ok(true)
            }
            CommonCommands::Validate => {
                validate_config(config)?;
                Ok(true)
            }
            CommonCommands::Version => {
                println!("{}", version_info());
                Ok(true)
            }
            CommonCommands::Start | CommonCommands::Once => Ok(false),
        }
    }

    /// Standard version information
    pub fn version_info() -> String {
        format!(
            "{} {} ({})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            env!("CARGO_PKG_RUST_VERSION")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_commands_default() {
        assert!(matches!(CommonCommands::default(), CommonCommands::Start));
    }

    #[test]
    fn test_log_level_from_flags() {
        let args = CommonArgs {
            config: None,
            verbose: true,
            quiet: false,
        };
        assert_eq!(utils::log_level(&args), "debug");

        let args = CommonArgs {
            config: None,
            verbose: true,
            quiet: true,
        };
        assert_eq!(utils::log_level(&args), "warn");
    }

    #[test]
    fn test_version_info() {
        let version = utils::version_info();
        assert!(version.contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_validate_rejects_empty_storage() {
        let mut config = crate::config::Configuration::default();
        config.reclaimer.audit.use_queue = true;
        assert!(utils::validate_config(&config).is_ok());

        config.storage.dsn.clear();
        assert!(utils::validate_config(&config).is_err());
    }
}
