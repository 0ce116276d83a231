//! External display management: hotplug, EDID mode negotiation, and
//! published display attributes.

pub mod hotplug;
pub mod modes;

use std::sync::atomic::AtomicBool;
use std::time::Duration;

use anyhow::Context;
use hwcomp_config::Config;
use tracing::{debug, info, warn};

use crate::backend::ExternalLink;
use crate::comp::{Display, DisplayAttributes};
use crate::utils::{downscale_factor, MAX_DISPLAY_DIM};
use hotplug::ConnectStatus;
use modes::{Features, ModeCatalog, VideoFormat};

const FEATURE_NODE: &str = "hdmi_feature_en";
const HPD_NODE: &str = "hpd";
const EDID_MODES_NODE: &str = "edid_modes";
const SCAN_INFO_NODE: &str = "scan_info";
const VENDOR_NODE: &str = "vendor_name";
const PRODUCT_NODE: &str = "product_description";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    /// Cable seen, device not yet configured.
    Connecting,
    Configured,
}

/// One external display, driven through an [`ExternalLink`]. Whether it
/// hotplugs and negotiates modes is policy read from the driver at
/// startup, not a property of the type.
pub struct ExternalDisplay<L: ExternalLink> {
    link: L,
    dpy: Display,
    features: Features,
    automotive: bool,
    preferred_mode: i32,
    state: ConnState,
    catalog: ModeCatalog,
}

impl<L: ExternalLink> ExternalDisplay<L> {
    /// An HDMI sink. Reads the driver's feature policy, then programs the
    /// initial HPD state: when we manage hotplug ourselves it stays off
    /// until the display powers on, which also covers framework restarts
    /// with the cable left in.
    pub fn hdmi(link: L, config: &Config) -> Self {
        let features = match link.read_node(FEATURE_NODE) {
            Ok(text) => modes::parse_features(&text),
            Err(err) => {
                debug!("no feature node, assuming legacy driver: {err}");
                Features::default()
            }
        };
        info!("hdmi policy: hpd={} edid={}", features.hpd, features.edid);

        let display = Self {
            link,
            dpy: Display::External,
            features,
            automotive: config.automotive_mode,
            preferred_mode: config.external.preferred_mode,
            state: ConnState::Disconnected,
            catalog: ModeCatalog::default(),
        };

        if display.automotive {
            display.write_hpd(!features.hpd);
        } else {
            display.write_hpd(false);
        }
        if features.edid {
            display.write_spd(VENDOR_NODE, config.external.vendor_name.as_deref());
            display.write_spd(PRODUCT_NODE, config.external.product_name.as_deref());
        }
        display
    }

    /// A fixed secondary panel: always connected, no mode negotiation.
    pub fn panel(link: L, dpy: Display) -> Self {
        Self {
            link,
            dpy,
            features: Features::default(),
            automotive: false,
            preferred_mode: -1,
            state: ConnState::Disconnected,
            catalog: ModeCatalog::default(),
        }
    }

    /// Waits for the cable. Non-hotplug displays report connected
    /// immediately.
    ///
    /// This is the power-on step: hotplug detection was left off at
    /// startup and must come back up before the driver raises any
    /// connect event.
    pub fn connect(
        &mut self,
        cancel: &AtomicBool,
        deadline: Option<Duration>,
    ) -> ConnectStatus {
        if !self.features.hpd {
            self.state = ConnState::Connecting;
            return ConnectStatus::Connected;
        }
        self.write_hpd(true);
        match self.link.wait_connect(cancel, deadline) {
            ConnectStatus::Connected => {
                self.state = ConnState::Connecting;
                ConnectStatus::Connected
            }
            status => {
                self.state = ConnState::Disconnected;
                status
            }
        }
    }

    /// Opens the device, picks and applies a mode, and returns the
    /// attributes to publish for this display.
    ///
    /// `primary` enables downscale coordination: when the sink's native
    /// mode is larger than the primary panel and the hardware can cover
    /// the gap, the primary resolution is published instead and the
    /// composition path downscales.
    pub fn configure(
        &mut self,
        primary: Option<DisplayAttributes>,
    ) -> anyhow::Result<DisplayAttributes> {
        self.link
            .open_device()
            .with_context(|| format!("opening {} framebuffer", self.dpy.name()))?;

        if !self.features.edid {
            let timing = self.link.read_timing()?;
            let attrs = DisplayAttributes::new(timing.width, timing.height, timing.fps);
            info!(
                "{} panel at {}x{}@{}",
                self.dpy.name(),
                attrs.width,
                attrs.height,
                timing.fps,
            );
            self.state = ConnState::Configured;
            return Ok(attrs);
        }

        let underscan = match self.link.read_node(SCAN_INFO_NODE) {
            Ok(text) => modes::parse_underscan(&text),
            Err(err) => {
                debug!("no scan_info node: {err}");
                false
            }
        };
        let advertised = match self.link.read_node(EDID_MODES_NODE) {
            Ok(text) => modes::parse_mode_list(&text),
            Err(err) => {
                warn!("error reading edid_modes: {err}");
                Vec::new()
            }
        };
        self.catalog.repopulate(advertised, underscan);

        let mode = self.user_mode().unwrap_or_else(|| self.catalog.best());
        if self.catalog.current() != Some(mode) {
            let timing = mode.timing();
            self.link
                .apply_mode(&timing)
                .with_context(|| format!("applying mode {}", mode.id()))?;
            self.catalog.set_current(mode);
        }

        let (width, height, fps) = mode.resolution();
        let mut attrs = DisplayAttributes::new(width, height, fps);
        if let Some(primary) = primary {
            self.coordinate_downscale(&mut attrs, primary);
        }
        info!(
            "external configured: mode={} {}x{}@{} downscale={} underscan={}",
            mode.id(),
            attrs.width,
            attrs.height,
            fps,
            attrs.downscale,
            self.catalog.underscan_supported(),
        );
        self.state = ConnState::Configured;
        Ok(attrs)
    }

    /// The user-preferred mode, if it is advertised by the sink and not
    /// interlaced.
    fn user_mode(&self) -> Option<VideoFormat> {
        if self.preferred_mode < 0 {
            return None;
        }
        let id = self.preferred_mode as u32;
        let Some(format) = VideoFormat::from_id(id) else {
            warn!("preferred mode {id} is unknown, ignoring");
            return None;
        };
        if !self.catalog.contains(id) {
            warn!("preferred mode {id} not advertised by the sink, ignoring");
            return None;
        }
        if format.is_interlaced() {
            warn!("preferred mode {id} is interlaced, ignoring");
            return None;
        }
        Some(format)
    }

    /// When the sink is bigger than the primary panel but within the
    /// pipes' 50% downscale reach, publish the primary resolution and let
    /// the hardware scale up. The sink is always landscape, so a portrait
    /// primary publishes swapped.
    fn coordinate_downscale(&self, attrs: &mut DisplayAttributes, primary: DisplayAttributes) {
        let ext_pixels = u64::from(attrs.width) * u64::from(attrs.height);
        let pri_pixels = u64::from(primary.width) * u64::from(primary.height);
        if ext_pixels <= pri_pixels || primary.width.max(primary.height) > MAX_DISPLAY_DIM {
            return;
        }
        let landscape_w = primary.width.max(primary.height);
        let landscape_h = primary.width.min(primary.height);
        if downscale_factor(attrs.width, attrs.height, landscape_w, landscape_h) != 0 {
            return;
        }
        attrs.width = landscape_w;
        attrs.height = landscape_h;
        attrs.downscale = true;
    }

    /// Drops the device and negotiation state. HPD stays as-is so a
    /// reconnect is still observed.
    pub fn teardown(&mut self) {
        self.link.close_device();
        self.catalog.clear();
        self.state = ConnState::Disconnected;
    }

    /// Turns hotplug detection on or off, following display power.
    pub fn set_hpd(&mut self, on: bool) {
        if self.features.hpd {
            self.write_hpd(on);
        } else {
            debug!("{} does not manage hpd", self.dpy.name());
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn current_mode(&self) -> Option<VideoFormat> {
        self.catalog.current()
    }

    pub fn mode_count(&self) -> usize {
        self.catalog.len()
    }

    pub fn underscan_supported(&self) -> bool {
        self.catalog.underscan_supported()
    }

    fn write_hpd(&self, on: bool) {
        let value = if on { "1" } else { "0" };
        if let Err(err) = self.link.write_node(HPD_NODE, value) {
            warn!("error writing hpd={value}: {err}");
        }
    }

    /// Source Product Description, shown by sinks instead of a generic
    /// input label.
    fn write_spd(&self, node: &str, value: Option<&str>) {
        let Some(value) = value else {
            return;
        };
        if let Err(err) = self.link.write_node(node, value) {
            warn!("error writing {node}: {err}");
        }
    }
}
