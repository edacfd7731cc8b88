use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use crate::cli::signals::install_shutdown_handler;
use crate::core::{
    acquisition::{AcquisitionLoop, LoopStats},
    config::AcquisitionConfig,
    extractor::StatusPolicy,
    reader::{PcscReader, ReaderGateway},
    store::LogFormat,
    utils::format_hex_spaced,
};

#[derive(Parser)]
#[command(name = "pcsc-uid-logger")]
#[command(about = "Poll PC/SC card readers and log card UIDs to a JSON file")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Wait for cards and append each new UID to the record log
    Run(RunArgs),

    /// List available PCSC readers
    List {
        /// Show detailed information about readers
        #[arg(short = 'l', long)]
        detailed: bool,
    },
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// JSON config file; command-line options override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Record log path [default: rfid_pcscreader_records.json]
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Seconds during which the same UID is ignored [default: 1.5]
    #[arg(long)]
    pub cooldown: Option<f64>,

    /// Seconds to wait for a card before re-checking for shutdown [default: 1.0]
    #[arg(long)]
    pub poll_timeout: Option<f64>,

    /// Record log layout: array (rewritten JSON array) or lines (JSON lines)
    #[arg(short, long)]
    pub format: Option<LogFormat>,

    /// Reject UIDs returned with a status word other than 90 00
    #[arg(long)]
    pub strict_status: bool,
}

impl RunArgs {
    /// Defaults, then the config file, then command-line overrides
    pub fn resolve(&self) -> Result<AcquisitionConfig> {
        let mut config = match &self.config {
            Some(path) => AcquisitionConfig::from_file(path)?,
            None => AcquisitionConfig::default(),
        };

        if let Some(output) = &self.output {
            config.output = output.clone();
        }
        if let Some(cooldown) = self.cooldown {
            config.cooldown_secs = cooldown;
        }
        if let Some(poll_timeout) = self.poll_timeout {
            config.poll_timeout_secs = poll_timeout;
        }
        if let Some(format) = self.format {
            config.format = format;
        }
        if self.strict_status {
            config.status_policy = StatusPolicy::Strict;
        }

        config.validate()?;
        Ok(config)
    }
}

pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.debug {
        log::LevelFilter::Debug
    } else if cli.verbose {
        log::LevelFilter::Info
    } else {
        log::LevelFilter::Warn
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    match cli.command {
        Commands::Run(args) => cmd_run(&args),
        Commands::List { detailed } => cmd_list(detailed),
    }
}

fn cmd_run(args: &RunArgs) -> Result<()> {
    let config = args.resolve()?;
    log::info!("Acquisition settings: {config:?}");

    let reader = PcscReader::new().context("Failed to initialize PCSC")?;

    let shutdown = CancellationToken::new();
    install_shutdown_handler(shutdown.clone())?;

    let mut acquisition = AcquisitionLoop::new(reader, config);
    let stats = acquisition.run(&shutdown)?;

    print_summary(&stats);
    println!("Exiting.");
    Ok(())
}

fn cmd_list(detailed: bool) -> Result<()> {
    let reader = PcscReader::new().context("Failed to initialize PCSC")?;

    let readers = reader.list_readers().context("Failed to list readers")?;

    if readers.is_empty() {
        println!("No PCSC readers found.");
        return Ok(());
    }

    println!("Available PCSC readers:");
    for (i, reader_info) in readers.iter().enumerate() {
        if detailed {
            println!("  [{}] {}", i, reader_info.name);
            println!(
                "      Status: {}",
                if reader_info.card_present {
                    "Card present"
                } else {
                    "No card"
                }
            );
            if let Some(ref atr) = reader_info.atr {
                println!("      ATR: {}", format_hex_spaced(atr));
            }
        } else if reader_info.card_present {
            println!("  [{}] {} [CARD]", i, reader_info.name);
        } else {
            println!("  [{}] {}", i, reader_info.name);
        }
    }

    Ok(())
}

fn print_summary(stats: &LoopStats) {
    println!(
        "Session: {} saved, {} duplicate(s) ignored, {} failed read(s), {} failed save(s), {} reader error(s)",
        stats.saved,
        stats.duplicates,
        stats.extraction_failures,
        stats.persist_failures,
        stats.reader_errors
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_resolve_defaults() {
        let config = RunArgs::default().resolve().unwrap();
        assert_eq!(config, AcquisitionConfig::default());
    }

    #[test]
    fn test_cli_overrides_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "output": "from-file.json", "cooldown_secs": 4.0, "format": "lines" }}"#
        )
        .unwrap();

        let args = RunArgs {
            config: Some(file.path().to_path_buf()),
            cooldown: Some(2.0),
            strict_status: true,
            ..RunArgs::default()
        };
        let config = args.resolve().unwrap();

        assert_eq!(config.output, PathBuf::from("from-file.json"));
        assert_eq!(config.cooldown(), Duration::from_secs(2));
        assert_eq!(config.format, LogFormat::Lines);
        assert_eq!(config.status_policy, StatusPolicy::Strict);
    }

    #[test]
    fn test_resolve_rejects_bad_override() {
        let args = RunArgs {
            poll_timeout: Some(0.0),
            ..RunArgs::default()
        };
        assert!(args.resolve().is_err());

        let args = RunArgs {
            cooldown: Some(-0.5),
            ..RunArgs::default()
        };
        assert!(args.resolve().is_err());
    }

    #[test]
    fn test_parse_run_arguments() {
        let cli = Cli::try_parse_from([
            "pcsc-uid-logger",
            "run",
            "--output",
            "badges.json",
            "--cooldown",
            "2.5",
            "--format",
            "jsonl",
        ])
        .unwrap();

        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.output, Some(PathBuf::from("badges.json")));
                assert_eq!(args.cooldown, Some(2.5));
                assert_eq!(args.format, Some(LogFormat::Lines));
                assert!(!args.strict_status);
            }
            _ => panic!("Expected run command"),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_format() {
        assert!(Cli::try_parse_from(["pcsc-uid-logger", "run", "--format", "csv"]).is_err());
    }
}
