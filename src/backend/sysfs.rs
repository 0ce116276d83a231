//! Thin wrapper over one framebuffer's sysfs attribute directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::trace;

pub const DEFAULT_SYSFS_ROOT: &str = "/sys/devices/virtual/graphics";

/// Attribute access for `<root>/fbN`. The root is injectable so tests can
/// point it at a scratch directory.
#[derive(Debug, Clone)]
pub struct FbSysfs {
    root: PathBuf,
    fb: u32,
}

impl FbSysfs {
    pub fn new(root: impl Into<PathBuf>, fb: u32) -> Self {
        Self { root: root.into(), fb }
    }

    pub fn with_default_root(fb: u32) -> Self {
        Self::new(DEFAULT_SYSFS_ROOT, fb)
    }

    pub fn fb(&self) -> u32 {
        self.fb
    }

    pub fn node_path(&self, node: &str) -> PathBuf {
        self.root.join(format!("fb{}", self.fb)).join(node)
    }

    /// Reads an attribute, trimming the trailing newline sysfs appends.
    pub fn read(&self, node: &str) -> io::Result<String> {
        let text = fs::read_to_string(self.node_path(node))?;
        Ok(text.trim_end().to_owned())
    }

    pub fn write(&self, node: &str, value: &str) -> io::Result<()> {
        trace!("fb{}/{node} <- {value:?}", self.fb);
        fs::write(self.node_path(node), value)
    }
}

/// Reads `<root>/fbN/msm_fb_type` without constructing a wrapper; used
/// during display discovery.
pub fn read_fb_type(root: &Path, fb: u32) -> io::Result<String> {
    let path = root.join(format!("fb{fb}")).join("msm_fb_type");
    Ok(fs::read_to_string(path)?.trim_end().to_owned())
}
