//! Pipe slot bookkeeping types and the hardware pipe contract.

use bitflags::bitflags;
use serde::Serialize;

use crate::comp::Display;

/// Hardware pipe class. RGB pipes blit, VG pipes scale and color-convert,
/// DMA pipes only fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PipeKind {
    Rgb,
    Vg,
    Dma,
}

impl PipeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PipeKind::Rgb => "RGB",
            PipeKind::Vg => "VG",
            PipeKind::Dma => "DMA",
        }
    }
}

/// Index of a pipe slot handed out by the registry. Only valid within the
/// round it was acquired in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipeId(pub(super) usize);

impl PipeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Round lifecycle of one slot.
///
/// `Allocated` means the slot was handed out this round regardless of commit
/// outcome; `Committed` means the last commit succeeded and the slot may
/// queue buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Free,
    Allocated,
    Committed,
}

bitflags! {
    /// Capability flags normalized onto source parameters per slot kind.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PipeFlags: u32 {
        /// VG pipes can be shared with the rotator session.
        const SHARE = 1 << 0;
        /// The layer must stay on a DMA pipe even if a scaler is idle.
        const FORCE_DMA = 1 << 1;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Transform: u32 {
        const FLIP_H = 1 << 0;
        const FLIP_V = 1 << 1;
        const ROT_90 = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
}

/// Source surface parameters pushed onto a pipe before commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeArgs {
    pub width: u32,
    pub height: u32,
    pub format: u32,
    pub z_order: u32,
    pub flags: PipeFlags,
}

/// Per-frame visual metadata forwarded to the pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VisualParams {
    pub color_space: Option<u32>,
    pub igc_enabled: bool,
}

/// Contract the registry expects from a hardware pipe session.
///
/// Calls are synchronous; `commit` and `queue_buffer` report success as a
/// boolean, everything else stages state for the next commit. `force_set`
/// drops the session to a safe idle state and marks all staged parameters
/// dirty, so the next commit reprograms the pipe from scratch.
pub trait PipeHandle {
    fn commit(&mut self) -> bool;
    fn queue_buffer(&mut self, fd: i32, offset: u32) -> bool;
    fn set_crop(&mut self, crop: Rect);
    fn set_position(&mut self, pos: Rect);
    fn set_transform(&mut self, transform: Transform);
    fn set_source(&mut self, args: PipeArgs);
    fn set_visual_params(&mut self, params: VisualParams);
    fn force_set(&mut self);
    fn append_dump(&self, buf: &mut String);
}

/// Bookkeeping record for one hardware pipe, independent of whether a
/// session is currently open on it.
pub(super) struct Slot<H> {
    pub kind: PipeKind,
    pub owner: Option<Display>,
    pub state: SlotState,
    pub handle: Option<H>,
}

impl<H> Slot<H> {
    pub fn new(kind: PipeKind) -> Self {
        Self {
            kind,
            owner: None,
            state: SlotState::Free,
            handle: None,
        }
    }
}

/// One row of the serializable registry summary.
#[derive(Debug, Serialize)]
pub struct PipeSummary {
    pub name: String,
    pub kind: PipeKind,
    pub display: Option<&'static str>,
    pub committed: bool,
}
