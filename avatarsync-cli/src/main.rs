// avatarsync command line interface
// Replay recorded avatar streams, validate engine configs, follow a live backend

mod replay;

use anyhow::{Context, Result};
use avatarsync_me::{
    AvatarEngine, ClockPlayback, EngineConfig, EngineDriver, StreamClient, StreamClosed,
};
use clap::{Parser, Subcommand, ValueEnum};
use replay::ReplayRecord;
use std::io::{self, Write};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "avatarsync")]
#[command(about = "Avatar animation synchronization engine", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Engine configuration file (JSON, TOML or YAML)
    #[arg(long, short, global = true)]
    config: Option<String>,

    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON-lines stream log and print the composed frames
    Replay {
        /// Log file, one stream message per line
        log: String,

        /// Tick cadence in milliseconds
        #[arg(long, default_value = "16")]
        step_ms: u64,

        /// Stop ticking at this time (default: two seconds after the last message)
        #[arg(long)]
        until_ms: Option<u64>,

        /// Seed for blink scheduling
        #[arg(long)]
        seed: Option<u64>,

        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Validate a configuration file
    CheckConfig {
        path: String,
    },

    /// Connect to a live backend stream and print engine events
    Live {
        /// WebSocket URL of the speech/avatar backend
        #[arg(long)]
        url: String,

        /// Also print the latest frame at this interval
        #[arg(long)]
        frame_log_ms: Option<u64>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Table,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Replay {
            log,
            step_ms,
            until_ms,
            seed,
            format,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            if seed.is_some() {
                config.rng_seed = seed;
            }
            run_replay(config, &log, step_ms, until_ms, format)?;
        }
        Commands::CheckConfig { path } => {
            check_config(&path)?;
        }
        Commands::Live { url, frame_log_ms } => {
            let config = load_config(cli.config.as_deref())?;
            run_live(config, &url, frame_log_ms).await?;
        }
    }

    Ok(())
}

/// File configuration when given, else defaults with `AVATARSYNC_*` overrides
fn load_config(path: Option<&str>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path))?,
        None => EngineConfig::from_env(),
    };
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?;
    Ok(config)
}

fn run_replay(
    config: EngineConfig,
    log: &str,
    step_ms: u64,
    until_ms: Option<u64>,
    format: OutputFormat,
) -> Result<()> {
    let content = std::fs::read_to_string(log).with_context(|| format!("failed to read {}", log))?;
    let entries = replay::parse_log(&content)?;
    info!("Replaying {} messages from {}", entries.len(), log);

    let records = replay::replay(config, entries, step_ms, until_ms)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();

    if format == OutputFormat::Table {
        writeln!(out, "{:>6} {:>7} {:<10} weights", "frame", "t(ms)", "status")?;
    }
    for record in &records {
        match (format, record) {
            (OutputFormat::Json, record) => writeln!(out, "{}", serde_json::to_string(record)?)?,
            (OutputFormat::Table, ReplayRecord::Frame(frame)) => {
                writeln!(out, "{}", replay::frame_row(frame, 6))?
            }
            (OutputFormat::Table, ReplayRecord::Event(event)) => {
                writeln!(out, "  event  {}", serde_json::to_string(event)?)?
            }
            (OutputFormat::Table, ReplayRecord::Rejected { at_ms, error }) => {
                writeln!(out, "  reject {:>7} {}", at_ms, error)?
            }
        }
    }
    Ok(())
}

fn check_config(path: &str) -> Result<()> {
    let config = EngineConfig::from_file(path).with_context(|| format!("failed to load {}", path))?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("{}: {}", path, e))?;
    // Overrides are only checked against the gesture table when the engine builds its registry.
    AvatarEngine::new(config.clone(), Box::new(ClockPlayback::new()), 0)
        .with_context(|| format!("{}: engine rejected configuration", path))?;

    println!("{}: ok", path);
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

async fn run_live(config: EngineConfig, url: &str, frame_log_ms: Option<u64>) -> Result<()> {
    let client = StreamClient::new(url)?;
    let engine = AvatarEngine::new(config, Box::new(ClockPlayback::new()), 0)?;
    let driver = EngineDriver::spawn(engine);
    let mut events = driver.subscribe_events();
    let sink = driver.message_sender();

    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!("Failed to encode event: {}", e),
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Event printer lagged, {} events skipped", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let frames = frame_log_ms.map(|every| {
        let frames = driver.frames();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_millis(every.max(1)));
            loop {
                ticker.tick().await;
                let frame = frames.borrow().clone();
                println!("{}", replay::frame_row(&frame, 6));
            }
        })
    });

    let outcome = tokio::select! {
        result = client.run(sink) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    if let Some(frames) = frames {
        frames.abort();
    }
    let engine = driver.shutdown().await?;
    printer.abort();

    match outcome {
        Some(Ok(StreamClosed::Remote)) => info!("Backend closed the stream"),
        Some(Ok(StreamClosed::Receiver)) => info!("Engine stopped accepting messages"),
        Some(Err(e)) => return Err(e.into()),
        None => info!("Interrupted"),
    }
    info!("Rendered {} frames", engine.frames());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn test_check_config_accepts_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "gesture_hold_ms = 900\n[gesture_overrides.smile]\nmouthSmileLeft = 0.5").unwrap();
        let path = file.path().to_str().unwrap();
        assert!(check_config(path).is_ok());
        assert_eq!(load_config(Some(path)).unwrap().gesture_hold_ms, 900);
    }

    #[test]
    fn test_check_config_rejects_unknown_gesture_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"gesture_overrides": {{"moonwalk": {{"legSlide": 1.0}}}}}}"#).unwrap();
        assert!(check_config(file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn test_cli_parses_replay_flags() {
        let cli = Cli::try_parse_from([
            "avatarsync", "replay", "talk.jsonl", "--step-ms", "50", "--seed", "9", "--format", "json",
        ])
        .unwrap();
        match cli.command {
            Commands::Replay { step_ms, seed, format, .. } => {
                assert_eq!(step_ms, 50);
                assert_eq!(seed, Some(9));
                assert_eq!(format, OutputFormat::Json);
            }
            _ => panic!("expected replay"),
        }
    }
}
