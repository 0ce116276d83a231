//! Process-wide composition context.
//!
//! `Comp` replaces the hardware-facing singletons of older composition
//! managers with one explicit context constructed at startup: it owns the
//! pipe registry and the per-display attribute table that downstream
//! composition reads.

use serde::Serialize;

use crate::backend::PipeBackend;
use crate::overlay::Overlay;
use crate::utils::vsync_period_ns;

/// Logical display identity. The indices double as slots in the fb map and
/// the attribute table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Display {
    Primary,
    External,
    Tertiary,
    Writeback,
}

impl Display {
    pub const COUNT: usize = 4;

    pub const ALL: [Display; Self::COUNT] = [
        Display::Primary,
        Display::External,
        Display::Tertiary,
        Display::Writeback,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Display::Primary => "primary",
            Display::External => "external",
            Display::Tertiary => "tertiary",
            Display::Writeback => "writeback",
        }
    }
}

/// Attributes published per display for downstream composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DisplayAttributes {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub vsync_period_ns: u64,
    /// Composition happens at a smaller resolution than the panel's native
    /// one; hardware upscales on scanout.
    pub downscale: bool,
}

impl DisplayAttributes {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width,
            height,
            fps,
            vsync_period_ns: vsync_period_ns(fps),
            downscale: false,
        }
    }
}

pub struct Comp<B: PipeBackend> {
    overlay: Overlay<B>,
    attrs: [Option<DisplayAttributes>; Display::COUNT],
}

impl<B: PipeBackend> Comp<B> {
    pub fn new(overlay: Overlay<B>) -> Self {
        Self {
            overlay,
            attrs: [None; Display::COUNT],
        }
    }

    pub fn overlay(&mut self) -> &mut Overlay<B> {
        &mut self.overlay
    }

    pub fn display_attrs(&self, dpy: Display) -> Option<DisplayAttributes> {
        self.attrs[dpy.index()]
    }

    pub fn publish_attrs(&mut self, dpy: Display, attrs: DisplayAttributes) {
        tracing::debug!(
            "publishing {}: {}x{}@{}{}",
            dpy.name(),
            attrs.width,
            attrs.height,
            attrs.fps,
            if attrs.downscale { " (downscale)" } else { "" },
        );
        self.attrs[dpy.index()] = Some(attrs);
    }

    /// Powers a display off outside the normal round flow: releases its
    /// pipes and withdraws its published attributes.
    pub fn power_off(&mut self, dpy: Display) {
        self.overlay.clear(dpy);
        self.attrs[dpy.index()] = None;
    }

    pub fn dump(&self) -> String {
        self.overlay.dump()
    }

    pub fn pipe_summary(&self) -> Vec<crate::overlay::PipeSummary> {
        self.overlay.summary()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Capabilities;
    use crate::overlay::{PipeArgs, PipeHandle, PipeKind, Rect, Transform, VisualParams};

    struct NullPipe;

    impl PipeHandle for NullPipe {
        fn commit(&mut self) -> bool {
            true
        }
        fn queue_buffer(&mut self, _fd: i32, _offset: u32) -> bool {
            true
        }
        fn set_crop(&mut self, _crop: Rect) {}
        fn set_position(&mut self, _pos: Rect) {}
        fn set_transform(&mut self, _transform: Transform) {}
        fn set_source(&mut self, _args: PipeArgs) {}
        fn set_visual_params(&mut self, _params: VisualParams) {}
        fn force_set(&mut self) {}
        fn append_dump(&self, _buf: &mut String) {}
    }

    struct NullBackend;

    impl PipeBackend for NullBackend {
        type Handle = NullPipe;

        fn open_pipe(&mut self, _dpy: Display) -> anyhow::Result<NullPipe> {
            Ok(NullPipe)
        }
    }

    fn comp() -> Comp<NullBackend> {
        let caps = Capabilities {
            rgb_pipes: 1,
            vg_pipes: 1,
            dma_pipes: 0,
            mdp_version: 500,
        };
        Comp::new(Overlay::new(NullBackend, &caps).unwrap())
    }

    #[test]
    fn attrs_published_and_withdrawn() {
        let mut comp = comp();
        assert_eq!(comp.display_attrs(Display::External), None);

        let attrs = DisplayAttributes::new(1920, 1080, 60);
        comp.publish_attrs(Display::External, attrs);
        assert_eq!(comp.display_attrs(Display::External), Some(attrs));
        assert_eq!(attrs.vsync_period_ns, 16_666_666);

        comp.power_off(Display::External);
        assert_eq!(comp.display_attrs(Display::External), None);
    }

    #[test]
    fn power_off_releases_pipes() {
        let mut comp = comp();
        comp.overlay().config_begin();
        let id = comp
            .overlay()
            .next_pipe(Some(PipeKind::Rgb), Display::External)
            .unwrap();
        assert!(comp.overlay().commit(id));

        comp.power_off(Display::External);
        assert!(!comp.overlay().is_committed(id));
        assert_eq!(comp.overlay().owner(id), Some(Display::External));
    }
}
