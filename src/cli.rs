//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "seqflash")]
#[command(
    author,
    version,
    about = "Sequential ESP32 provisioning station",
    long_about = "Flash firmware onto devices one after another as they are plugged into a \
                  serial port, read each device's identity from its boot console, and record \
                  the results in a CSV ledger and a JSON summary."
)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Station configuration file (TOML format)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Where the firmware images come from
#[derive(clap::Args, Debug, Clone, Default)]
pub struct ImageArgs {
    /// Build directory containing bootloader, partition table and firmware
    /// (defaults to the first PlatformIO environment under .pio/build)
    #[arg(short, long, conflicts_with = "files")]
    pub build_dir: Option<PathBuf>,

    /// Explicit images as ADDRESS:FILE (e.g. 0x10000:firmware.bin)
    #[arg(short, long, num_args = 1.., value_name = "ADDRESS:FILE")]
    pub files: Vec<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Provision devices one after another until interrupted
    Run {
        /// Serial port the devices are plugged into (auto-detected if omitted)
        #[arg(short, long)]
        port: Option<String>,

        /// Chip type passed to esptool
        #[arg(long, default_value = "auto")]
        chip: String,

        /// Serial baud rate for flashing and console reads
        #[arg(long)]
        baudrate: Option<u32>,

        /// Skip the full-chip erase before writing
        #[arg(long)]
        no_erase: bool,

        /// Verify flash contents after writing
        #[arg(long)]
        verify_flash: bool,

        /// Console read window in seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Base name for the CSV ledger and JSON summary
        #[arg(short, long)]
        output_base: Option<String>,

        #[command(flatten)]
        images: ImageArgs,
    },

    /// List serial ports and show which one would be auto-selected
    ListPorts,

    /// Check the flashing setup: images and esptool availability
    Check {
        #[command(flatten)]
        images: ImageArgs,
    },

    /// Query the chip and flash IDs of an attached device
    TestConnection {
        /// Serial port of the device
        #[arg(short, long)]
        port: String,
    },
}
