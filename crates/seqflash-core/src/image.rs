//! Flash image sets and build-output layout detection
//!
//! A [`FlashImageSet`] is the ordered list of `(address, file)` pairs handed
//! to the programmer in a single write. It is built once at start-up either
//! from explicit `ADDR:FILE` specs or by detecting a known build layout in
//! a directory.
//!
//! Layout detection is a list of [`BuildLayout`] strategies tried in order;
//! each one looks at a directory listing and either claims it or passes.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Build environments searched under `.pio/build` when no directory is given
pub const PIO_ENVIRONMENTS: &[&str] = &[
    "esp32-c3",
    "esp32dev",
    "esp32",
    "nodemcu-32s",
    "esp32-s2",
    "esp32-s3",
];

/// Default root for PlatformIO build output
pub const PIO_BUILD_ROOT: &str = ".pio/build";

/// A single image to write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashImage {
    /// Address token passed verbatim to the programmer (e.g. `0x10000`)
    pub address: String,
    /// Path of the image file
    pub path: PathBuf,
}

impl FlashImage {
    /// Create a new image entry
    pub fn new(address: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            address: address.into(),
            path: path.into(),
        }
    }

    /// File name for display
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Ordered set of images with unique addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashImageSet {
    images: Vec<FlashImage>,
}

impl FlashImageSet {
    /// Build a set from entries, rejecting duplicate addresses
    pub fn from_entries(entries: impl IntoIterator<Item = FlashImage>) -> Result<Self> {
        let mut images: Vec<FlashImage> = Vec::new();
        for entry in entries {
            if images
                .iter()
                .any(|i| i.address.eq_ignore_ascii_case(&entry.address))
            {
                return Err(Error::DuplicateAddress(entry.address));
            }
            images.push(entry);
        }
        if images.is_empty() {
            return Err(Error::EmptyImageSet);
        }
        Ok(Self { images })
    }

    /// Build a set from `ADDR:FILE` specs; every file must exist
    pub fn from_specs<S: AsRef<str>>(specs: impl IntoIterator<Item = S>) -> Result<Self> {
        let mut entries = Vec::new();
        for spec in specs {
            let image = parse_image_spec(spec.as_ref())?;
            if !image.path.exists() {
                return Err(Error::ImageNotFound(image.path));
            }
            entries.push(image);
        }
        Self::from_entries(entries)
    }

    /// Iterate over the images in write order
    pub fn iter(&self) -> impl Iterator<Item = &FlashImage> {
        self.images.iter()
    }

    /// Number of images
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// Whether the set is empty (never true for a constructed set)
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

/// Parse one `ADDR:FILE` spec, splitting on the first colon
pub fn parse_image_spec(spec: &str) -> Result<FlashImage> {
    match spec.split_once(':') {
        Some((addr, file)) if !addr.trim().is_empty() && !file.is_empty() => {
            Ok(FlashImage::new(addr.trim(), file))
        }
        _ => Err(Error::InvalidImageSpec(spec.to_string())),
    }
}

/// A strategy that maps a build directory listing to an image set
pub trait BuildLayout {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Try to build an image set from the files present in `dir`
    ///
    /// `files` holds the names of regular files directly inside `dir`.
    /// Returns `None` if this layout does not apply.
    fn resolve(&self, dir: &Path, files: &[String]) -> Option<FlashImageSet>;
}

/// Layout defined by a fixed file-name to address table
#[derive(Debug, Clone, Copy)]
pub struct AddressMap {
    name: &'static str,
    entries: &'static [(&'static str, &'static str)],
}

impl AddressMap {
    /// Create a layout from `(file name, address)` pairs in write order
    pub const fn new(name: &'static str, entries: &'static [(&'static str, &'static str)]) -> Self {
        Self { name, entries }
    }
}

impl BuildLayout for AddressMap {
    fn name(&self) -> &'static str {
        self.name
    }

    fn resolve(&self, dir: &Path, files: &[String]) -> Option<FlashImageSet> {
        let entries: Vec<FlashImage> = self
            .entries
            .iter()
            .filter(|(file, _)| files.iter().any(|f| f == file))
            .map(|(file, addr)| FlashImage::new(*addr, dir.join(file)))
            .collect();
        if entries.is_empty() {
            return None;
        }
        FlashImageSet::from_entries(entries).ok()
    }
}

/// ESP32-C3 style: bootloader at 0x0
pub const ESP32C3_LAYOUT: AddressMap = AddressMap::new(
    "esp32-c3",
    &[
        ("bootloader.bin", "0x0"),
        ("partitions.bin", "0x8000"),
        ("firmware.bin", "0x10000"),
    ],
);

/// Classic ESP32 style: bootloader at 0x1000 plus boot_app0
pub const ESP32_LAYOUT: AddressMap = AddressMap::new(
    "esp32",
    &[
        ("bootloader.bin", "0x1000"),
        ("partitions.bin", "0x8000"),
        ("boot_app0.bin", "0xe000"),
        ("firmware.bin", "0x10000"),
    ],
);

/// Layout strategies in priority order
pub fn default_layouts() -> [&'static dyn BuildLayout; 2] {
    [&ESP32C3_LAYOUT, &ESP32_LAYOUT]
}

/// Result of layout detection
#[derive(Debug, Clone)]
pub struct DetectedImages {
    /// The resolved image set
    pub images: FlashImageSet,
    /// Name of the layout strategy that matched
    pub layout: &'static str,
    /// Chip family guessed from the directory name
    pub chip_family: &'static str,
}

/// Guess the chip family label from a build directory name
pub fn chip_family(dir: &Path) -> &'static str {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if name.contains("c3") {
        "ESP32-C3"
    } else {
        "ESP32"
    }
}

/// Resolve a directory listing against an ordered list of layouts
///
/// Pure over its inputs: the first layout that claims the listing wins.
pub fn resolve_layout(
    layouts: &[&'static dyn BuildLayout],
    dir: &Path,
    files: &[String],
) -> Option<(FlashImageSet, &'static str)> {
    layouts
        .iter()
        .find_map(|layout| layout.resolve(dir, files).map(|set| (set, layout.name())))
}

fn list_files(dir: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| Error::io(dir, e))? {
        let entry = entry.map_err(|e| Error::io(dir, e))?;
        if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            files.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    files.sort();
    Ok(files)
}

/// Detect flash images in a build directory
pub fn detect_images(dir: &Path) -> Result<DetectedImages> {
    if !dir.is_dir() {
        return Err(Error::BuildDirNotFound(dir.to_path_buf()));
    }
    let files = list_files(dir)?;
    match resolve_layout(&default_layouts(), dir, &files) {
        Some((images, layout)) => {
            log::debug!("{} matched layout '{}'", dir.display(), layout);
            Ok(DetectedImages {
                images,
                layout,
                chip_family: chip_family(dir),
            })
        }
        None => Err(Error::NoLayoutMatched {
            dir: dir.to_path_buf(),
            available: files,
        }),
    }
}

/// Search a PlatformIO build root for the first usable environment
///
/// Returns the environment name along with the detected images.
pub fn detect_pio_build(root: &Path) -> Result<(String, DetectedImages)> {
    if !root.is_dir() {
        return Err(Error::BuildDirNotFound(root.to_path_buf()));
    }

    for env in PIO_ENVIRONMENTS {
        let env_dir = root.join(env);
        if !env_dir.is_dir() {
            continue;
        }
        match detect_images(&env_dir) {
            Ok(detected) => return Ok((env.to_string(), detected)),
            Err(e) => log::warn!("{} for environment '{}'. Trying next...", e, env),
        }
    }

    let mut available = Vec::new();
    for entry in fs::read_dir(root).map_err(|e| Error::io(root, e))? {
        let entry = entry.map_err(|e| Error::io(root, e))?;
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            available.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    available.sort();
    Err(Error::NoBuildEnvironment(available))
}
