//! HDMI video format catalog: numeric mode ids, detailed timings, and the
//! ranking used to pick the best advertised mode.

use tracing::warn;

/// Driver-visible video format ids. 1..=34 follow CEA-861 VIC numbering;
/// 61..=67 are vendor extensions for VESA and 4K formats. Variant names
/// keep the CEA aspect-ratio suffixes.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum VideoFormat {
    V640x480p60 = 1,
    V720x480p60_4_3 = 2,
    V720x480p60_16_9 = 3,
    V1280x720p60 = 4,
    V1920x1080i60 = 5,
    V1440x480i60_4_3 = 6,
    V1440x480i60_16_9 = 7,
    V1920x1080p60 = 16,
    V720x576p50_4_3 = 17,
    V720x576p50_16_9 = 18,
    V1280x720p50 = 19,
    V1440x576i50_4_3 = 21,
    V1440x576i50_16_9 = 22,
    V1920x1080p50 = 31,
    V1920x1080p24 = 32,
    V1920x1080p25 = 33,
    V1920x1080p30 = 34,
    V1280x1024p60 = 61,
    V2560x1600p60 = 62,
    V3840x2160p30 = 63,
    V3840x2160p25 = 64,
    V3840x2160p24 = 65,
    V4096x2160p24 = 66,
    V1280x800p60 = 67,
}

/// Timing detail for one format, in fb_var_screeninfo terms: porches are
/// (front, pulse, back) around each axis; `active_v` is per field for
/// interlaced formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeTiming {
    pub format: VideoFormat,
    pub active_h: u32,
    pub front_porch_h: u32,
    pub pulse_width_h: u32,
    pub back_porch_h: u32,
    pub active_v: u32,
    pub front_porch_v: u32,
    pub pulse_width_v: u32,
    pub back_porch_v: u32,
    pub pixel_freq_khz: u32,
    pub interlaced: bool,
}

impl VideoFormat {
    pub fn from_id(id: u32) -> Option<Self> {
        use VideoFormat::*;
        Some(match id {
            1 => V640x480p60,
            2 => V720x480p60_4_3,
            3 => V720x480p60_16_9,
            4 => V1280x720p60,
            5 => V1920x1080i60,
            6 => V1440x480i60_4_3,
            7 => V1440x480i60_16_9,
            16 => V1920x1080p60,
            17 => V720x576p50_4_3,
            18 => V720x576p50_16_9,
            19 => V1280x720p50,
            21 => V1440x576i50_4_3,
            22 => V1440x576i50_16_9,
            31 => V1920x1080p50,
            32 => V1920x1080p24,
            33 => V1920x1080p25,
            34 => V1920x1080p30,
            61 => V1280x1024p60,
            62 => V2560x1600p60,
            63 => V3840x2160p30,
            64 => V3840x2160p25,
            65 => V3840x2160p24,
            66 => V4096x2160p24,
            67 => V1280x800p60,
            _ => return None,
        })
    }

    pub fn id(self) -> u32 {
        self as u32
    }

    /// Desirability rank. Higher is better and fixed, not a per-sink
    /// preference. [`V1280x800p60`](Self::V1280x800p60) has no CEA rank
    /// and shares the floor with unknown ids.
    pub fn order(self) -> u32 {
        use VideoFormat::*;
        match self {
            V1440x480i60_4_3 => 1,
            V1440x480i60_16_9 => 2,
            V1440x576i50_4_3 => 3,
            V1440x576i50_16_9 => 4,
            V1920x1080i60 => 5,
            V640x480p60 => 6,
            V720x480p60_4_3 => 7,
            V720x480p60_16_9 => 8,
            V720x576p50_4_3 => 9,
            V720x576p50_16_9 => 10,
            V1280x1024p60 => 11,
            V1280x720p50 => 12,
            V1280x720p60 => 13,
            V1920x1080p24 => 14,
            V1920x1080p25 => 15,
            V1920x1080p30 => 16,
            V1920x1080p50 => 17,
            V1920x1080p60 => 18,
            V2560x1600p60 => 19,
            V3840x2160p24 => 20,
            V3840x2160p25 => 21,
            V3840x2160p30 => 22,
            V4096x2160p24 => 23,
            V1280x800p60 => 1,
        }
    }

    pub fn is_interlaced(self) -> bool {
        use VideoFormat::*;
        matches!(
            self,
            V1920x1080i60
                | V1440x480i60_4_3
                | V1440x480i60_16_9
                | V1440x576i50_4_3
                | V1440x576i50_16_9
        )
    }

    pub fn timing(self) -> ModeTiming {
        use VideoFormat::*;
        let t = |ah, fh, ph, bh, av, fv, pv, bv, khz, il| ModeTiming {
            format: self,
            active_h: ah,
            front_porch_h: fh,
            pulse_width_h: ph,
            back_porch_h: bh,
            active_v: av,
            front_porch_v: fv,
            pulse_width_v: pv,
            back_porch_v: bv,
            pixel_freq_khz: khz,
            interlaced: il,
        };
        match self {
            V640x480p60 => t(640, 16, 96, 48, 480, 10, 2, 33, 25200, false),
            V720x480p60_4_3 | V720x480p60_16_9 => {
                t(720, 16, 62, 60, 480, 9, 6, 30, 27030, false)
            }
            V1280x720p60 => t(1280, 110, 40, 220, 720, 5, 5, 20, 74250, false),
            V1920x1080i60 => t(1920, 88, 44, 148, 540, 2, 5, 15, 74250, true),
            V1440x480i60_4_3 | V1440x480i60_16_9 => {
                t(1440, 38, 124, 114, 240, 4, 3, 15, 27000, true)
            }
            V1920x1080p60 => t(1920, 88, 44, 148, 1080, 4, 5, 36, 148500, false),
            V720x576p50_4_3 | V720x576p50_16_9 => {
                t(720, 12, 64, 68, 576, 5, 5, 39, 27000, false)
            }
            V1280x720p50 => t(1280, 440, 40, 220, 720, 5, 5, 20, 74250, false),
            V1440x576i50_4_3 | V1440x576i50_16_9 => {
                t(1440, 24, 126, 138, 288, 2, 3, 19, 27000, true)
            }
            V1920x1080p50 => t(1920, 528, 44, 148, 1080, 4, 5, 36, 148500, false),
            V1920x1080p24 => t(1920, 638, 44, 148, 1080, 4, 5, 36, 74250, false),
            V1920x1080p25 => t(1920, 528, 44, 148, 1080, 4, 5, 36, 74250, false),
            V1920x1080p30 => t(1920, 88, 44, 148, 1080, 4, 5, 36, 74250, false),
            V1280x1024p60 => t(1280, 48, 112, 248, 1024, 1, 3, 38, 108000, false),
            V2560x1600p60 => t(2560, 48, 32, 80, 1600, 3, 6, 37, 268500, false),
            V3840x2160p30 => t(3840, 176, 88, 296, 2160, 8, 10, 72, 297000, false),
            V3840x2160p25 => t(3840, 1056, 88, 296, 2160, 8, 10, 72, 297000, false),
            V3840x2160p24 => t(3840, 1276, 88, 296, 2160, 8, 10, 72, 297000, false),
            V4096x2160p24 => t(4096, 1020, 88, 296, 2160, 8, 10, 72, 297000, false),
            V1280x800p60 => t(1280, 48, 32, 80, 800, 3, 6, 14, 71000, false),
        }
    }

    /// Active resolution and refresh rate. Height is the full frame even
    /// for interlaced formats.
    pub fn resolution(self) -> (u32, u32, u32) {
        let timing = self.timing();
        let height = if timing.interlaced {
            timing.active_v * 2
        } else {
            timing.active_v
        };
        (timing.active_h, height, self.fps())
    }

    pub fn fps(self) -> u32 {
        use VideoFormat::*;
        match self {
            V1920x1080p24 | V3840x2160p24 | V4096x2160p24 => 24,
            V1920x1080p25 | V3840x2160p25 => 25,
            V1920x1080p30 | V3840x2160p30 => 30,
            V720x576p50_4_3 | V720x576p50_16_9 | V1280x720p50 | V1440x576i50_4_3
            | V1440x576i50_16_9 | V1920x1080p50 => 50,
            _ => 60,
        }
    }
}

/// Rank of a raw mode id; ids we do not know still sort above "nothing".
pub fn mode_order(id: u32) -> u32 {
    VideoFormat::from_id(id).map_or(1, VideoFormat::order)
}

/// Picks the highest-ranked format from the advertised list. An empty or
/// entirely unknown list falls back to 640x480p60, which every sink must
/// accept.
pub fn best_mode(modes: &[u32]) -> VideoFormat {
    let mut best = VideoFormat::V640x480p60;
    let mut best_order = 0;
    for &id in modes {
        let order = mode_order(id);
        if order > best_order {
            if let Some(format) = VideoFormat::from_id(id) {
                best = format;
                best_order = order;
            }
        }
    }
    best
}

/// Negotiation state for one sink: the advertised ids in sink order, the
/// active format, and the underscan capability. Populated on configure,
/// cleared on teardown.
#[derive(Debug, Default)]
pub struct ModeCatalog {
    modes: Vec<u32>,
    current: Option<VideoFormat>,
    underscan: bool,
}

impl ModeCatalog {
    /// Replaces the advertised set; the active format is kept so an
    /// unchanged selection can skip reprogramming.
    pub fn repopulate(&mut self, modes: Vec<u32>, underscan: bool) {
        self.modes = modes;
        self.underscan = underscan;
    }

    pub fn modes(&self) -> &[u32] {
        &self.modes
    }

    pub fn len(&self) -> usize {
        self.modes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.modes.contains(&id)
    }

    pub fn current(&self) -> Option<VideoFormat> {
        self.current
    }

    pub fn set_current(&mut self, format: VideoFormat) {
        self.current = Some(format);
    }

    pub fn underscan_supported(&self) -> bool {
        self.underscan
    }

    pub fn best(&self) -> VideoFormat {
        best_mode(&self.modes)
    }

    pub fn clear(&mut self) {
        self.modes.clear();
        self.current = None;
        self.underscan = false;
    }
}

/// Hardware policy flags read from the driver's feature node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Features {
    pub hpd: bool,
    pub edid: bool,
}

/// Parses a `"HPD:1;EDID:0;"` style feature string. Unknown keys are
/// logged and skipped so newer drivers keep working.
pub fn parse_features(text: &str) -> Features {
    let mut features = Features::default();
    for entry in text.trim().split(';').filter(|e| !e.is_empty()) {
        let Some((key, value)) = entry.split_once(':') else {
            warn!("malformed feature entry {entry:?}");
            continue;
        };
        let enabled = value.trim() == "1";
        match key.trim() {
            "HPD" => features.hpd = enabled,
            "EDID" => features.edid = enabled,
            other => warn!("unknown display feature {other:?}"),
        }
    }
    features
}

/// Parses the comma-separated advertised mode list, e.g. `"16,4,5,3"`.
/// Bad tokens are skipped with a warning.
pub fn parse_mode_list(text: &str) -> Vec<u32> {
    let mut modes = Vec::new();
    for token in text.trim().split(',').filter(|t| !t.is_empty()) {
        match token.trim().parse::<u32>() {
            Ok(id) => modes.push(id),
            Err(_) => warn!("bad mode token {token:?}"),
        }
    }
    modes
}

/// Sink always underscans CE formats.
const SCAN_ALWAYS_UNDERSCANNED: u32 = 2;
/// Sink supports both, in which case the driver underscans.
const SCAN_BOTH_SUPPORTED: u32 = 3;

/// Parses the scan_info node, three tokens for the PT, IT and CE video
/// format classes. The CE token carries the underscan capability; when the
/// sink underscans, no action-safe rectangle needs to be applied.
pub fn parse_underscan(text: &str) -> bool {
    let ce = text
        .split([',', ' ', '\n'])
        .filter(|t| !t.is_empty())
        .nth(2)
        .and_then(|t| t.parse::<u32>().ok());
    match ce {
        Some(code) => code == SCAN_ALWAYS_UNDERSCANNED || code == SCAN_BOTH_SUPPORTED,
        None => {
            warn!("malformed scan_info string {text:?}");
            false
        }
    }
}
