//! Binary entrypoint for the MeshMini gateway.
//!
//! Commands:
//! - `start [--config <path>] [--device <path>]` - run the gateway
//! - `init [--config <path>]` - write a default configuration file
//!
//! The gateway exits 0 on a graceful stop and non-zero when the serial
//! transport cannot be opened at startup.

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{info, warn};

use meshmini::bbs::Gateway;
use meshmini::config::Config;
use meshmini::link::SerialLink;
use meshmini::storage::Store;

#[derive(Parser)]
#[command(name = "meshmini")]
#[command(about = "Minimal community message board gateway for mesh networks")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "meshmini.toml", global = true)]
    config: String,

    /// Verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway
    Start {
        /// Serial device path (overrides config and probing)
        #[arg(short, long)]
        device: Option<String>,
    },
    /// Write a default configuration file
    Init,
}

fn init_logging(config: &Config, verbosity: u8) {
    let mut builder = env_logger::Builder::new();
    let level = match verbosity {
        0 => config
            .logging
            .level
            .parse()
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(level);
    builder.format_timestamp_secs();
    if let Some(ref file) = config.logging.file {
        match std::fs::OpenOptions::new().create(true).append(true).open(file) {
            Ok(f) => {
                builder.target(env_logger::Target::Pipe(Box::new(f)));
            }
            Err(e) => eprintln!("cannot open log file {}: {}; logging to stderr", file, e),
        }
    }
    let _ = builder.try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            let config = Config::default();
            init_logging(&config, cli.verbose);
            Config::create_default(&cli.config).await?;
            info!("wrote default config to {}", cli.config);
            Ok(())
        }
        Commands::Start { device } => {
            let mut config = Config::load(&cli.config).await?;
            if let Some(device) = device {
                config.link.device = device;
            }
            init_logging(&config, cli.verbose);

            // Human-facing timestamps follow the configured zone.
            std::env::set_var("TZ", &config.board.tz);

            let store = Store::open(&config.storage.db)?;
            let (link, packets) = SerialLink::open(&config.link).map_err(|e| {
                warn!("transport open failed: {}", e);
                e
            })?;
            let mut gateway = Gateway::new(config, store, Box::new(link), packets)?;
            gateway.run().await
        }
    }
}
