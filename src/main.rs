use anyhow::{Context, Result};
use bat_harness::{config::Config, suite::Suite};
use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "bat_harness")]
#[command(author = "Ian Lintner")]
#[command(version = "0.1.0")]
#[command(about = "Call bat with various command line arguments to test bat", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full conformance and timing suite
    Run {
        /// Play and capture device
        #[arg(short, long)]
        device: Option<String>,

        /// Show the output of bat
        #[arg(short, long)]
        verbose: bool,

        /// Path to the bat binary
        #[arg(short, long)]
        subject: Option<PathBuf>,

        /// Kill bat if a single run exceeds this many seconds
        #[arg(short, long)]
        timeout: Option<f64>,

        /// Configuration file path
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Generate default configuration file
    GenerateConfig {
        /// Output file path
        #[arg(default_value = "bat_harness.json")]
        output: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            device,
            verbose,
            subject,
            timeout,
            config: config_file,
        } => {
            // Initialize logger
            if verbose {
                env_logger::Builder::from_default_env()
                    .filter_level(log::LevelFilter::Debug)
                    .init();
            } else {
                env_logger::Builder::from_default_env()
                    .filter_level(log::LevelFilter::Info)
                    .init();
            }

            // Load or create config
            let mut config = if let Some(path) = config_file {
                Config::from_file(&path)
                    .with_context(|| format!("failed to load configuration from '{}'", path))?
            } else {
                Config::default()
            };

            // Override with CLI arguments
            if let Some(device) = device {
                config.device = device;
            }
            if let Some(subject) = subject {
                config.subject = subject;
            }
            if timeout.is_some() {
                config.process_timeout_secs = timeout;
            }
            config.verbose |= verbose;
            config.validate()?;

            info!("Testing {} on device {}", config.subject.display(), config.device);
            if let Some(secs) = config.process_timeout_secs {
                info!("Process timeout: {}s", secs);
            }

            let mut suite = Suite::new(config);
            suite.run_all().context("suite halted")?;

            Ok(())
        }

        Commands::GenerateConfig { output } => {
            let config = Config::default();
            config.to_file(&output)?;
            println!("Configuration file generated: {}", output);
            Ok(())
        }
    }
}
