//! seqflash - Sequential ESP32 provisioning station
//!
//! Devices are plugged into a single serial port one after another. For each
//! one seqflash erases and writes the firmware with esptool, resets the
//! device, reads its identifier and public key from the boot console, and
//! appends successful devices to a CSV ledger. A JSON summary of every
//! attempt is written when the run ends.
//!
//! # Architecture
//!
//! The device lifecycle lives in `seqflash-core` and talks to hardware only
//! through three traits:
//! - **PortMonitor** and **IdentityReader**, implemented over `serialport` by
//!   `seqflash-serial`
//! - **ImageProgrammer**, implemented by `seqflash-esptool` as a bounded
//!   child process
//!
//! This binary wires the backends together, handles Ctrl+C, and prints the
//! per-device banners and the final tally.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};

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

    let config = match commands::load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load station configuration: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run {
            port,
            chip,
            baudrate,
            no_erase,
            verify_flash,
            timeout,
            output_base,
            images,
        } => {
            let resolved = commands::resolve_images(&images)?;
            commands::run_provisioning(
                config,
                resolved,
                commands::RunOptions {
                    port,
                    chip,
                    baudrate,
                    erase: !no_erase,
                    verify: verify_flash,
                    timeout_secs: timeout,
                    output_base,
                },
            )
        }
        Commands::ListPorts => commands::list_ports(),
        Commands::Check { images } => commands::run_check(&config, &images),
        Commands::TestConnection { port } => commands::run_test_connection(&config, &port),
    };

    result
}
