//! qflasher - QSPI flash arbitration simulator
//!
//! Drives the flash arbiter against an emulated QSPI device so its
//! behaviour can be exercised without hardware:
//!
//! - `stress` runs several client threads mixing erases, writes and reads
//!   and checks that every read-back matches and that the transport was
//!   never driven out of protocol.
//! - `lowlevel` opens a low-level window and compares raw and nibble-swapped
//!   fast reads.
//! - `dump` prints a range read through the gateway.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use qflasher_arbiter::ArbiterConfig;
use qflasher_dummy::{DummyConfig, DummyFlash};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let config = ArbiterConfig::from_params(&cli.params)?;
    let transport = DummyFlash::new(DummyConfig {
        size: cli.size,
        ..DummyConfig::default()
    });
    log::debug!("Emulating {} byte flash with {:?}", cli.size, config);

    match cli.command {
        Commands::Stress {
            threads,
            iterations,
        } => commands::stress::run(transport, config, threads, iterations),
        Commands::Lowlevel { address, length } => {
            commands::lowlevel::run(transport, config, address, length)
        }
        Commands::Dump { address, length } => {
            commands::dump::run(transport, config, address, length)
        }
    }
}
