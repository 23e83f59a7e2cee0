//! NR MAC Scheduler Simulator
//!
//! Runs the slot scheduler of one cell, and optionally the sidelink
//! scheduler of one UE, on a synthetic traffic scenario.

mod config;
mod sim;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use config::SimConfig;
use sim::Simulator;

/// NR MAC scheduler simulator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Scenario file (.yml, .yaml or .toml); built-in defaults when absent
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error), overrides the scenario
    #[arg(short, long)]
    log_level: Option<String>,

    /// Number of slots to simulate
    #[arg(short, long, default_value = "10000")]
    slots: u64,

    /// Pace the slots on their real duration
    #[arg(long)]
    realtime: bool,

    /// Write every slot allocation to this file as JSON lines
    #[arg(long)]
    trace: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => SimConfig::load(path)?,
        None => SimConfig::default(),
    };

    // Initialize logging
    let level = args.log_level.clone().unwrap_or_else(|| config.log.level.clone());
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&level));

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting NR MAC scheduler simulator");
    match &args.config {
        Some(path) => info!("Configuration file: {}", path.display()),
        None => info!("No configuration file, using defaults"),
    }
    if args.slots == 0 {
        return Err(anyhow!("Nothing to simulate: --slots is 0"));
    }
    if config.ues.is_empty() && config.sidelink.is_none() {
        warn!("Scenario has neither UEs nor sidelink destinations");
    }

    let mut sim = Simulator::new(&config)?;
    info!("{} UEs connected", sim.scheduler().ues().count());
    info!("Simulating {} slots of {:?}{}", args.slots, sim.slot_duration(),
          if args.realtime { " in real time" } else { "" });

    let trace_path = args.trace.clone().or_else(|| config.log.trace_file.clone().map(PathBuf::from));
    let mut trace = match &trace_path {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create trace file {}", path.display()))?;
            info!("Writing slot trace to {}", path.display());
            Some(BufWriter::new(file))
        }
        None => None,
    };

    let summary = sim::run(
        &mut sim,
        args.slots,
        args.realtime,
        config.log.stats_period_slots,
        trace.as_mut().map(|writer| writer as &mut (dyn Write + Send)),
    )
    .await?;

    if summary.interrupted {
        warn!("Stopped after {} of {} slots", summary.slots, args.slots);
    }
    info!("Final statistics after {} slots:", summary.slots);
    sim.log_stats();

    info!("Simulation complete");
    Ok(())
}
