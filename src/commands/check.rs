//! Setup and connection checks

use std::fs;
use std::time::Duration;

use seqflash_core::config::StationConfig;
use seqflash_core::image::parse_image_spec;
use seqflash_esptool::{EspTool, EsptoolError};

use super::{resolve_images, ResolvedImages};
use crate::cli::ImageArgs;

/// Report the image set and whether the flashing tool runs
///
/// Explicit `--files` entries are checked one by one, so a missing file is
/// reported rather than aborting the check.
pub fn run_check(
    config: &StationConfig,
    args: &ImageArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("=== FLASH SETUP CHECK ===");

    let mut problems = 0usize;
    let entries: Vec<(String, std::path::PathBuf)> = if args.files.is_empty() {
        let ResolvedImages { images, source } = resolve_images(args)?;
        println!("Images from {}", source);
        images
            .iter()
            .map(|i| (i.address.clone(), i.path.clone()))
            .collect()
    } else {
        let mut entries = Vec::new();
        for spec in &args.files {
            let image = parse_image_spec(spec)?;
            entries.push((image.address, image.path));
        }
        entries
    };

    println!("Flash files: {}", entries.len());
    for (address, path) in &entries {
        match fs::metadata(path) {
            Ok(meta) if meta.len() == 0 => {
                println!("  {}: {} (0 bytes) EMPTY", address, path.display());
                problems += 1;
            }
            Ok(meta) => println!("  {}: {} ({} bytes) OK", address, path.display(), meta.len()),
            Err(_) => {
                println!("  {}: {} NOT FOUND", address, path.display());
                problems += 1;
            }
        }
    }

    let tool = EspTool::new(config.programmer.clone(), config.serial.baud, Duration::ZERO);
    println!("\nTesting {} availability:", tool.program());
    match tool.probe_available() {
        Ok(()) => println!("{} is available", tool.program()),
        Err(EsptoolError::Launch { .. }) => {
            println!("{} not found - install with: pip install esptool", tool.program());
            problems += 1;
        }
        Err(e) => {
            println!("{} not working properly: {}", tool.program(), e);
            problems += 1;
        }
    }

    if problems > 0 {
        return Err(format!("Setup check found {} problem(s)", problems).into());
    }
    println!("\nSetup looks good.");
    Ok(())
}

/// Query chip and flash IDs of the device on `port`
pub fn run_test_connection(
    config: &StationConfig,
    port: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("=== CONNECTION TEST: {} ===", port);
    let tool = EspTool::new(config.programmer.clone(), config.serial.baud, Duration::ZERO);
    tool.test_connection(port)?;
    println!("Device on {} responded to chip_id and flash_id", port);
    Ok(())
}
