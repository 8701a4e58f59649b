//! saxmap - saxophone note-mask mapping console
//!
//! Connects to the controller over MIDI, mirrors its mapping table, and
//! exposes the protocol actions through an interactive console.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{info, trace};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use saxmap::cli;
use saxmap::config::AppConfig;
use saxmap::store::MappingStore;
use saxmap::sysex::format_hex;
use saxmap::transport::{self, MidirOutput};

/// Saxophone note-mask mapping console
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// List available MIDI ports
    #[arg(long)]
    list_ports: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_logging(&args.log_level)?;

    if args.list_ports {
        list_ports_formatted()?;
        return Ok(());
    }

    info!("Starting saxmap");
    info!("Configuration file: {}", args.config);

    let config = AppConfig::load(&args.config).await?;
    let store = MappingStore::with_config(&config.sax);

    let output = MidirOutput::connect(&config.midi.output_port)?;
    info!("Output connected: {}", output.port_name());
    store.attach_output(Arc::new(output));

    // Inbound frames go through the store first; anything it does not
    // claim belongs to other sub-protocols on the bus.
    let inbound_store = store.clone();
    let _input_conn = transport::connect_input(&config.midi.input_port, move |data| {
        if !inbound_store.handle_event(data) {
            trace!("Unclaimed frame: {}", format_hex(data));
        }
    })?;

    store.request_current_mask();

    cli::run_repl(store).await?;

    info!("saxmap shutdown complete");
    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}

fn list_ports_formatted() -> Result<()> {
    println!("MIDI input ports:");
    for name in transport::list_input_ports()? {
        println!("  {}", name);
    }
    println!("MIDI output ports:");
    for name in transport::list_output_ports()? {
        println!("  {}", name);
    }
    Ok(())
}
