//! vsum: summarize videos from sampled frames with an AI CLI.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vsum_pipeline::PipelineConfig;

use commands::analyze::AnalyzeArgs;
use commands::cache::CacheAction;
use commands::history::HistoryArgs;

#[derive(Parser)]
#[command(name = "vsum")]
#[command(author, version, about = "Summarize videos from sampled frames with an AI CLI", long_about = None)]
struct Cli {
    /// Data directory for history, cache and downloads (default: ~/.vsum)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a video file or URL
    Analyze(AnalyzeArgs),
    /// List past analyses or show one
    History(HistoryArgs),
    /// Frame cache maintenance
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Check external tool availability
    Status {
        /// Print JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,vsum=info"));

    // stdout is reserved for command output
    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(true)
                    .with_target(false),
            )
            .with(env_filter)
            .init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing();

    let mut config = PipelineConfig::from_env();
    if let Some(dir) = cli.data_dir {
        config = config.with_data_dir(dir);
    }

    let result = match cli.command {
        Commands::Analyze(args) => commands::analyze::run(args, config).await,
        Commands::History(args) => commands::history::run(args, &config).await,
        Commands::Cache { action } => commands::cache::run(action, &config).await,
        Commands::Status { json } => commands::status::run(json, &config),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use vsum_models::Provider;
    use vsum_pipeline::IntervalChoice;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_analyze() {
        let cli = Cli::try_parse_from([
            "vsum", "--data-dir", "/tmp/v", "analyze", "talk.mp4", "--interval", "10", "--provider", "claude",
            "--keep-cache", "--json",
        ])
        .unwrap();
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/v")));
        match cli.command {
            Commands::Analyze(args) => {
                assert_eq!(args.source, "talk.mp4");
                assert_eq!(args.interval, Some(IntervalChoice::Seconds(10)));
                assert_eq!(args.provider, Some(Provider::Claude));
                assert!(args.keep_cache && args.json && !args.no_sidecar);
            }
            _ => panic!("expected analyze"),
        }
    }

    #[test]
    fn test_parse_cache_clean_old() {
        let cli = Cli::try_parse_from(["vsum", "cache", "clean-old", "--days", "3"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Cache {
                action: CacheAction::CleanOld { days: Some(3), .. }
            }
        ));
        assert!(Cli::try_parse_from(["vsum", "analyze", "a.mp4", "--interval", "0"]).is_err());
    }

    #[test]
    fn test_parse_cache_clean_downloads() {
        let cli = Cli::try_parse_from(["vsum", "cache", "clean", "--downloads"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Cache {
                action: CacheAction::Clean { downloads: true, json: false }
            }
        ));
        let cli = Cli::try_parse_from(["vsum", "cache", "clean-old", "--days", "18446744073709551615"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Cache {
                action: CacheAction::CleanOld { days: Some(u64::MAX), .. }
            }
        ));
    }
}
