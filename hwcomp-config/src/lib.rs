//! Persisted configuration for hwcomp.
//!
//! The config file is KDL, decoded with knuffel. All settings are optional;
//! an empty file is a valid config.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use miette::{Context, IntoDiagnostic};
use tracing::debug;

#[derive(knuffel::Decode, Debug, Clone, PartialEq)]
pub struct Config {
    /// Automotive products drive hotplug from the manager rather than the
    /// framework, and skip startup HPD gating.
    #[knuffel(child)]
    pub automotive_mode: bool,
    #[knuffel(child, default)]
    pub external: ExternalPart,
    #[knuffel(child, default)]
    pub debug: DebugPart,
}

#[derive(knuffel::Decode, Debug, Clone, PartialEq)]
pub struct ExternalPart {
    /// Preferred sink mode id. -1 means no preference (pick best advertised).
    #[knuffel(child, unwrap(argument), default = -1)]
    pub preferred_mode: i32,
    /// Source product description written to the sink, when supported.
    #[knuffel(child, unwrap(argument))]
    pub vendor_name: Option<String>,
    #[knuffel(child, unwrap(argument))]
    pub product_name: Option<String>,
}

#[derive(knuffel::Decode, Debug, Clone, PartialEq)]
pub struct DebugPart {
    /// Overrides the graphics sysfs root (normally
    /// /sys/devices/virtual/graphics).
    #[knuffel(child, unwrap(argument))]
    pub sysfs_root: Option<PathBuf>,
    /// Overrides the fb device directory (normally /dev/graphics).
    #[knuffel(child, unwrap(argument))]
    pub fb_device_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            automotive_mode: false,
            external: ExternalPart::default(),
            debug: DebugPart::default(),
        }
    }
}

impl Default for ExternalPart {
    fn default() -> Self {
        Self {
            preferred_mode: -1,
            vendor_name: None,
            product_name: None,
        }
    }
}

impl Default for DebugPart {
    fn default() -> Self {
        Self {
            sysfs_root: None,
            fb_device_dir: None,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> miette::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .into_diagnostic()
            .with_context(|| format!("error reading {path:?}"))?;

        let filename = path
            .file_name()
            .and_then(OsStr::to_str)
            .unwrap_or("config.kdl");
        let config = Self::parse(filename, &contents)?;

        debug!("loaded config from {path:?}");
        Ok(config)
    }

    pub fn parse(filename: &str, text: &str) -> miette::Result<Self> {
        knuffel::parse(filename, text).map_err(miette::Report::new)
    }
}
