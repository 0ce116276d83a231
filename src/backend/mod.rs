//! Hardware access layer: capability probing, framebuffer discovery, and
//! the traits the registry and external display drive their hardware
//! through. Tests substitute fakes behind the same traits.

pub mod mdp;
pub mod sysfs;

use std::io;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, warn};

use crate::comp::Display;
use crate::external::hotplug::ConnectStatus;
use crate::external::modes::ModeTiming;
use crate::overlay::PipeHandle;

/// Pipe counts and version reported by the MDP driver's caps node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub rgb_pipes: usize,
    pub vg_pipes: usize,
    pub dma_pipes: usize,
    pub mdp_version: u32,
}

impl Capabilities {
    pub fn total_pipes(&self) -> usize {
        self.rgb_pipes + self.vg_pipes + self.dma_pipes
    }

    /// Parses the caps node, `key=value` per line. Unknown keys are
    /// ignored; the node also carries feature lists we do not use.
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let mut caps = Self {
            rgb_pipes: 0,
            vg_pipes: 0,
            dma_pipes: 0,
            mdp_version: 0,
        };
        for line in text.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let Ok(value) = value.trim().parse::<u32>() else {
                // Non-numeric lines also carry feature name lists.
                continue;
            };
            match key.trim() {
                "rgb_pipes" => caps.rgb_pipes = value as usize,
                "vg_pipes" => caps.vg_pipes = value as usize,
                "dma_pipes" => caps.dma_pipes = value as usize,
                "mdp_version" => caps.mdp_version = value,
                _ => (),
            }
        }
        anyhow::ensure!(caps.total_pipes() > 0, "caps node listed no pipes");
        Ok(caps)
    }

    /// Reads and parses the primary framebuffer's caps node.
    pub fn probe(sysfs_root: &Path) -> anyhow::Result<Self> {
        let path = sysfs_root.join("fb0/mdp/caps");
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&text)
    }
}

/// Which framebuffer index each display role sits on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FbMap {
    pub external: Option<u32>,
    pub tertiary: Option<u32>,
    pub writeback: Option<u32>,
}

impl FbMap {
    pub const PRIMARY_FB: u32 = 0;

    /// Scans fb1..=fb7 and classifies each by its panel type string. fb0
    /// is always the primary panel.
    pub fn discover(sysfs_root: &Path) -> Self {
        let mut map = Self::default();
        for fb in 1..=7 {
            let kind = match sysfs::read_fb_type(sysfs_root, fb) {
                Ok(kind) => kind,
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => {
                    warn!("error reading fb{fb} type: {err}");
                    continue;
                }
            };
            match kind.as_str() {
                "dtv panel" => map.external.get_or_insert(fb),
                "writeback panel" => map.writeback.get_or_insert(fb),
                _ => map.tertiary.get_or_insert(fb),
            };
        }
        debug!(
            "fb map: external={:?} tertiary={:?} writeback={:?}",
            map.external, map.tertiary, map.writeback,
        );
        map
    }

    pub fn fb_for(&self, dpy: Display) -> Option<u32> {
        match dpy {
            Display::Primary => Some(Self::PRIMARY_FB),
            Display::External => self.external,
            Display::Tertiary => self.tertiary,
            Display::Writeback => self.writeback,
        }
    }
}

/// Resolution and refresh read back from a framebuffer device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenTiming {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// Source of pipe sessions for the registry.
pub trait PipeBackend {
    type Handle: PipeHandle;

    fn open_pipe(&mut self, dpy: Display) -> anyhow::Result<Self::Handle>;
}

/// Everything the external display needs from its framebuffer: the device
/// node, the sysfs attributes, and the hotplug wait.
pub trait ExternalLink {
    fn open_device(&mut self) -> anyhow::Result<()>;
    fn close_device(&mut self);

    /// Current resolution of the device, for panels without mode
    /// negotiation.
    fn read_timing(&mut self) -> anyhow::Result<ScreenTiming>;

    /// Reprograms the device to the given mode timing.
    fn apply_mode(&mut self, timing: &ModeTiming) -> anyhow::Result<()>;

    fn read_node(&self, node: &str) -> io::Result<String>;
    fn write_node(&self, node: &str, value: &str) -> io::Result<()>;

    fn wait_connect(&self, cancel: &AtomicBool, deadline: Option<Duration>) -> ConnectStatus;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_parse_picks_known_keys() {
        let caps = Capabilities::parse(
            "mdp_version=500\nrgb_pipes=4\nvg_pipes=3\ndma_pipes=2\nfeatures=bwc decimation\n",
        )
        .unwrap();
        assert_eq!(
            caps,
            Capabilities {
                rgb_pipes: 4,
                vg_pipes: 3,
                dma_pipes: 2,
                mdp_version: 500,
            },
        );
        assert_eq!(caps.total_pipes(), 9);
    }

    #[test]
    fn caps_parse_rejects_empty_pipe_set() {
        assert!(Capabilities::parse("mdp_version=500\n").is_err());
        assert!(Capabilities::parse("").is_err());
    }

    #[test]
    fn caps_parse_skips_bad_values() {
        let caps = Capabilities::parse("rgb_pipes=lots\nvg_pipes=2\n").unwrap();
        assert_eq!(caps.rgb_pipes, 0);
        assert_eq!(caps.vg_pipes, 2);
    }

    #[test]
    fn fb_map_classifies_panel_types() {
        let root = std::env::temp_dir().join(format!("fbmap-{}", std::process::id()));
        for (fb, kind) in [(1, "dtv panel"), (2, "writeback panel"), (3, "mipi dsi panel")] {
            let dir = root.join(format!("fb{fb}"));
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("msm_fb_type"), format!("{kind}\n")).unwrap();
        }

        let map = FbMap::discover(&root);
        assert_eq!(map.external, Some(1));
        assert_eq!(map.writeback, Some(2));
        assert_eq!(map.tertiary, Some(3));
        assert_eq!(map.fb_for(Display::Primary), Some(0));
        assert_eq!(map.fb_for(Display::External), Some(1));

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn fb_map_handles_missing_framebuffers() {
        let root = std::env::temp_dir().join(format!("fbmap-empty-{}", std::process::id()));
        std::fs::create_dir_all(&root).unwrap();
        let map = FbMap::discover(&root);
        assert_eq!(map, FbMap::default());
        assert_eq!(map.fb_for(Display::External), None);
        std::fs::remove_dir_all(&root).unwrap();
    }
}
