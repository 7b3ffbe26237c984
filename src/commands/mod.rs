//! CLI command implementations
//!
//! Each command resolves what it needs from the CLI arguments and the
//! optional station file, then hands off to the library crates:
//!
//! - `run` drives the provisioning loop over the serial and esptool backends
//! - `list_ports` prints the enumerated ports and the auto-selected one
//! - `check` validates the image set and the flashing tool
//! - `test_connection` queries an attached device without writing

mod check;
mod ports;
mod progress;
mod run;

pub use check::{run_check, run_test_connection};
pub use ports::list_ports;
pub use run::{run_provisioning, RunOptions};

use std::path::{Path, PathBuf};

use seqflash_core::config::StationConfig;
use seqflash_core::image::{self, FlashImageSet, PIO_BUILD_ROOT};

use crate::cli::ImageArgs;

/// Load the station file, or built-in defaults when none is given
pub fn load_config(path: Option<&Path>) -> Result<StationConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            let config = StationConfig::from_toml_file(path)?;
            log::info!("Loaded station configuration from {}", path.display());
            Ok(config)
        }
        None => Ok(StationConfig::default()),
    }
}

/// Image set plus a description of where it came from
pub struct ResolvedImages {
    pub images: FlashImageSet,
    pub source: String,
}

/// Resolve the image set from explicit files, a build directory, or the
/// PlatformIO build tree in the current directory
pub fn resolve_images(args: &ImageArgs) -> Result<ResolvedImages, Box<dyn std::error::Error>> {
    if !args.files.is_empty() {
        let images = FlashImageSet::from_specs(&args.files)?;
        return Ok(ResolvedImages {
            images,
            source: "command line".to_string(),
        });
    }

    if let Some(dir) = &args.build_dir {
        let detected = image::detect_images(dir)?;
        return Ok(ResolvedImages {
            images: detected.images,
            source: format!(
                "{} ({} layout, {})",
                dir.display(),
                detected.layout,
                detected.chip_family
            ),
        });
    }

    let root = PathBuf::from(PIO_BUILD_ROOT);
    let (env, detected) = image::detect_pio_build(&root)?;
    println!("Auto-detected build environment: {}", env);
    Ok(ResolvedImages {
        images: detected.images,
        source: format!(
            "{} ({} layout, {})",
            root.join(&env).display(),
            detected.layout,
            detected.chip_family
        ),
    })
}

/// Print the image set in write order
pub fn print_images(resolved: &ResolvedImages) {
    println!("Flash images from {}:", resolved.source);
    for image in resolved.images.iter() {
        println!("  {}: {}", image.address, image.path.display());
    }
}
