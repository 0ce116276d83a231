//! MDP framebuffer backend: the ioctl ABI and the real implementations of
//! the pipe and external-link traits.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, warn};

use crate::comp::Display;
use crate::external::hotplug::{self, ConnectStatus};
use crate::external::modes::ModeTiming;
use crate::overlay::{PipeArgs, PipeFlags, PipeHandle, Rect, Transform, VisualParams};

use super::sysfs::FbSysfs;
use super::{ExternalLink, FbMap, PipeBackend, ScreenTiming};

pub const DEFAULT_FB_DEVICE_DIR: &str = "/dev/graphics";

// linux/fb.h

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct FbBitfield {
    pub offset: u32,
    pub length: u32,
    pub msb_right: u32,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct FbVarScreeninfo {
    pub xres: u32,
    pub yres: u32,
    pub xres_virtual: u32,
    pub yres_virtual: u32,
    pub xoffset: u32,
    pub yoffset: u32,
    pub bits_per_pixel: u32,
    pub grayscale: u32,
    pub red: FbBitfield,
    pub green: FbBitfield,
    pub blue: FbBitfield,
    pub transp: FbBitfield,
    pub nonstd: u32,
    pub activate: u32,
    pub height: u32,
    pub width: u32,
    pub accel_flags: u32,
    /// Pixel clock in picoseconds per pixel.
    pub pixclock: u32,
    pub left_margin: u32,
    pub right_margin: u32,
    pub upper_margin: u32,
    pub lower_margin: u32,
    pub hsync_len: u32,
    pub vsync_len: u32,
    pub sync: u32,
    pub vmode: u32,
    pub rotate: u32,
    pub colorspace: u32,
    pub reserved: [u32; 4],
}

pub const FBIOGET_VSCREENINFO: libc::c_ulong = 0x4600;
pub const FBIOPUT_VSCREENINFO: libc::c_ulong = 0x4601;

pub const FB_ACTIVATE_NOW: u32 = 0;
pub const FB_ACTIVATE_ALL: u32 = 64;
pub const FB_ACTIVATE_FORCE: u32 = 128;
pub const FB_VMODE_INTERLACED: u32 = 1;

// msm_mdp.h

const IOC_WRITE: libc::c_ulong = 1;
const IOC_READ: libc::c_ulong = 2;

const fn ioc(dir: libc::c_ulong, ty: u8, nr: u8, size: usize) -> libc::c_ulong {
    (dir << 30) | ((size as libc::c_ulong) << 16) | ((ty as libc::c_ulong) << 8) | nr as libc::c_ulong
}

const MSMFB_MAGIC: u8 = b'm';

pub const MSMFB_OVERLAY_SET: libc::c_ulong =
    ioc(IOC_WRITE | IOC_READ, MSMFB_MAGIC, 135, std::mem::size_of::<MdpOverlay>());
pub const MSMFB_OVERLAY_UNSET: libc::c_ulong =
    ioc(IOC_WRITE, MSMFB_MAGIC, 136, std::mem::size_of::<u32>());
pub const MSMFB_OVERLAY_PLAY: libc::c_ulong =
    ioc(IOC_WRITE, MSMFB_MAGIC, 137, std::mem::size_of::<MsmfbOverlayData>());
pub const MSMFB_DISPLAY_COMMIT: libc::c_ulong =
    ioc(IOC_WRITE, MSMFB_MAGIC, 164, std::mem::size_of::<MdpDisplayCommit>());

/// Pipe id requesting a fresh hardware assignment from the driver.
pub const MSMFB_NEW_REQUEST: u32 = u32::MAX;

const MDP_FLIP_LR: u32 = 0x1;
const MDP_FLIP_UD: u32 = 0x2;
const MDP_ROT_90: u32 = 0x4;
const MDP_OV_PIPE_FORCE_DMA: u32 = 0x4000;
const MDP_OV_PIPE_SHARE: u32 = 0x0080_0000;
const MDP_IGC_LUT_ENABLE: u32 = 0x1000_0000;

const MDP_DISPLAY_COMMIT_OVERLAY: u32 = 1;

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct MdpRect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct MdpImg {
    pub width: u32,
    pub height: u32,
    pub format: u32,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct MdpOverlay {
    pub src: MdpImg,
    pub src_rect: MdpRect,
    pub dst_rect: MdpRect,
    pub z_order: u32,
    pub is_fg: u32,
    pub alpha: u32,
    pub blend_op: u32,
    pub transp_mask: u32,
    pub flags: u32,
    pub color_space: u32,
    pub id: u32,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct MsmfbData {
    pub offset: u32,
    pub memory_id: i32,
    pub id: u32,
    pub flags: u32,
    pub priv_: u32,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct MsmfbOverlayData {
    pub id: u32,
    pub data: MsmfbData,
    pub version_key: u32,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct MdpDisplayCommit {
    pub flags: u32,
    pub wait_for_finish: u32,
    pub var: FbVarScreeninfo,
}

fn ioctl<T>(fd: &impl AsRawFd, request: libc::c_ulong, arg: *mut T) -> io::Result<()> {
    // SAFETY: the request codes above match the argument structs they are
    // declared with.
    let ret = unsafe { libc::ioctl(fd.as_raw_fd(), request, arg) };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

// The driver rect is unsigned; callers clip before staging.
fn mdp_rect(rect: Rect) -> MdpRect {
    MdpRect {
        x: rect.x.max(0) as u32,
        y: rect.y.max(0) as u32,
        w: rect.w,
        h: rect.h,
    }
}

fn open_fb_device(dev_dir: &Path, fb: u32) -> anyhow::Result<File> {
    let path = dev_dir.join(format!("fb{fb}"));
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(&path)
        .with_context(|| format!("opening {}", path.display()))
}

/// One hardware pipe session. Parameters are staged in `params` and pushed
/// to the driver on `commit`; the driver assigns the pipe id on the first
/// successful set.
pub struct MdpPipe {
    fd: File,
    params: MdpOverlay,
    dirty: bool,
}

impl MdpPipe {
    fn new(fd: File) -> Self {
        let params = MdpOverlay {
            id: MSMFB_NEW_REQUEST,
            ..Default::default()
        };
        Self {
            fd,
            params,
            dirty: true,
        }
    }
}

impl PipeHandle for MdpPipe {
    fn commit(&mut self) -> bool {
        if !self.dirty {
            return true;
        }
        match ioctl(&self.fd, MSMFB_OVERLAY_SET, &mut self.params) {
            Ok(()) => {
                self.dirty = false;
                true
            }
            Err(err) => {
                warn!("OVERLAY_SET failed: {err}");
                // A failed set may have invalidated the assignment.
                self.params.id = MSMFB_NEW_REQUEST;
                false
            }
        }
    }

    fn queue_buffer(&mut self, fd: i32, offset: u32) -> bool {
        let mut data = MsmfbOverlayData {
            id: self.params.id,
            data: MsmfbData {
                offset,
                memory_id: fd,
                ..Default::default()
            },
            ..Default::default()
        };
        match ioctl(&self.fd, MSMFB_OVERLAY_PLAY, &mut data) {
            Ok(()) => true,
            Err(err) => {
                warn!("OVERLAY_PLAY failed: {err}");
                false
            }
        }
    }

    fn set_crop(&mut self, crop: Rect) {
        self.params.src_rect = mdp_rect(crop);
        self.dirty = true;
    }

    fn set_position(&mut self, pos: Rect) {
        self.params.dst_rect = mdp_rect(pos);
        self.dirty = true;
    }

    fn set_transform(&mut self, transform: Transform) {
        let mut bits = 0;
        if transform.contains(Transform::FLIP_H) {
            bits |= MDP_FLIP_LR;
        }
        if transform.contains(Transform::FLIP_V) {
            bits |= MDP_FLIP_UD;
        }
        if transform.contains(Transform::ROT_90) {
            bits |= MDP_ROT_90;
        }
        self.params.flags =
            (self.params.flags & !(MDP_FLIP_LR | MDP_FLIP_UD | MDP_ROT_90)) | bits;
        self.dirty = true;
    }

    fn set_source(&mut self, args: PipeArgs) {
        self.params.src = MdpImg {
            width: args.width,
            height: args.height,
            format: args.format,
        };
        self.params.z_order = args.z_order;
        let mut bits = 0;
        if args.flags.contains(PipeFlags::SHARE) {
            bits |= MDP_OV_PIPE_SHARE;
        }
        if args.flags.contains(PipeFlags::FORCE_DMA) {
            bits |= MDP_OV_PIPE_FORCE_DMA;
        }
        self.params.flags =
            (self.params.flags & !(MDP_OV_PIPE_SHARE | MDP_OV_PIPE_FORCE_DMA)) | bits;
        self.dirty = true;
    }

    fn set_visual_params(&mut self, params: VisualParams) {
        self.params.color_space = params.color_space.unwrap_or(0);
        if params.igc_enabled {
            self.params.flags |= MDP_IGC_LUT_ENABLE;
        } else {
            self.params.flags &= !MDP_IGC_LUT_ENABLE;
        }
        self.dirty = true;
    }

    fn force_set(&mut self) {
        self.dirty = true;
    }

    fn append_dump(&self, buf: &mut String) {
        use std::fmt::Write as _;
        let _ = writeln!(
            buf,
            "  id={:#x} src={}x{} fmt={} crop=({},{},{},{}) dst=({},{},{},{}) z={} flags={:#x}",
            self.params.id,
            self.params.src.width,
            self.params.src.height,
            self.params.src.format,
            self.params.src_rect.x,
            self.params.src_rect.y,
            self.params.src_rect.w,
            self.params.src_rect.h,
            self.params.dst_rect.x,
            self.params.dst_rect.y,
            self.params.dst_rect.w,
            self.params.dst_rect.h,
            self.params.z_order,
            self.params.flags,
        );
    }
}

impl Drop for MdpPipe {
    fn drop(&mut self) {
        if self.params.id != MSMFB_NEW_REQUEST {
            let mut id = self.params.id;
            if let Err(err) = ioctl(&self.fd, MSMFB_OVERLAY_UNSET, &mut id) {
                warn!("OVERLAY_UNSET failed for {id:#x}: {err}");
            }
        }
    }
}

/// Real pipe source: hands out sessions backed by duplicated framebuffer
/// device fds, one device per display, opened lazily.
pub struct MdpBackend {
    dev_dir: PathBuf,
    fb_map: FbMap,
    devices: [Option<File>; Display::COUNT],
}

impl MdpBackend {
    pub fn new(dev_dir: impl Into<PathBuf>, fb_map: FbMap) -> Self {
        Self {
            dev_dir: dev_dir.into(),
            fb_map,
            devices: [None, None, None, None],
        }
    }

    /// Flushes all staged pipe state of one display to the panel.
    pub fn display_commit(&mut self, dpy: Display, wait_for_finish: bool) -> anyhow::Result<()> {
        let file = self.device(dpy)?;
        let mut commit = MdpDisplayCommit {
            flags: MDP_DISPLAY_COMMIT_OVERLAY,
            wait_for_finish: wait_for_finish.into(),
            ..Default::default()
        };
        ioctl(file, MSMFB_DISPLAY_COMMIT, &mut commit)
            .with_context(|| format!("DISPLAY_COMMIT on {}", dpy.name()))
    }

    fn device(&mut self, dpy: Display) -> anyhow::Result<&File> {
        let index = dpy.index();
        if self.devices[index].is_none() {
            let fb = self
                .fb_map
                .fb_for(dpy)
                .with_context(|| format!("no framebuffer for {}", dpy.name()))?;
            self.devices[index] = Some(open_fb_device(&self.dev_dir, fb)?);
        }
        self.devices[index]
            .as_ref()
            .context("framebuffer device missing")
    }
}

impl PipeBackend for MdpBackend {
    type Handle = MdpPipe;

    fn open_pipe(&mut self, dpy: Display) -> anyhow::Result<MdpPipe> {
        let fd = self.device(dpy)?.try_clone().context("duplicating fb fd")?;
        debug!("opened pipe session on {}", dpy.name());
        Ok(MdpPipe::new(fd))
    }
}

fn timing_to_var(var: &mut FbVarScreeninfo, timing: &ModeTiming) {
    var.xres = timing.active_h;
    var.yres = if timing.interlaced {
        timing.active_v * 2
    } else {
        timing.active_v
    };
    var.right_margin = timing.front_porch_h;
    var.hsync_len = timing.pulse_width_h;
    var.left_margin = timing.back_porch_h;
    var.lower_margin = timing.front_porch_v;
    var.vsync_len = timing.pulse_width_v;
    var.upper_margin = timing.back_porch_v;
    // pixclock is in picoseconds per pixel.
    var.pixclock = 1_000_000_000 / timing.pixel_freq_khz;
    var.vmode = if timing.interlaced {
        FB_VMODE_INTERLACED
    } else {
        0
    };
    var.reserved[3] = timing.format.id();
}

fn var_refresh_rate(var: &FbVarScreeninfo) -> u32 {
    let htotal =
        u64::from(var.xres + var.right_margin + var.hsync_len + var.left_margin);
    let vtotal =
        u64::from(var.yres + var.lower_margin + var.vsync_len + var.upper_margin);
    let total = htotal * vtotal * u64::from(var.pixclock);
    if total == 0 {
        return 60;
    }
    // pixclock ps per pixel, so 1e12 ps per second.
    (1_000_000_000_000 / total).max(1) as u32
}

/// Real external-display link: a framebuffer device plus its sysfs
/// directory.
pub struct FbLink {
    sysfs: FbSysfs,
    dev_dir: PathBuf,
    device: Option<File>,
}

impl FbLink {
    pub fn new(sysfs: FbSysfs, dev_dir: impl Into<PathBuf>) -> Self {
        Self {
            sysfs,
            dev_dir: dev_dir.into(),
            device: None,
        }
    }

    fn open_device_ref(&self) -> anyhow::Result<&File> {
        self.device.as_ref().context("framebuffer device not open")
    }
}

impl ExternalLink for FbLink {
    fn open_device(&mut self) -> anyhow::Result<()> {
        if self.device.is_none() {
            self.device = Some(open_fb_device(&self.dev_dir, self.sysfs.fb())?);
        }
        Ok(())
    }

    fn close_device(&mut self) {
        self.device = None;
    }

    fn read_timing(&mut self) -> anyhow::Result<ScreenTiming> {
        let file = self.open_device_ref()?;
        let mut var = FbVarScreeninfo::default();
        ioctl(file, FBIOGET_VSCREENINFO, &mut var).context("FBIOGET_VSCREENINFO")?;
        Ok(ScreenTiming {
            width: var.xres,
            height: var.yres,
            fps: var_refresh_rate(&var),
        })
    }

    fn apply_mode(&mut self, timing: &ModeTiming) -> anyhow::Result<()> {
        let file = self.open_device_ref()?;
        let mut var = FbVarScreeninfo::default();
        ioctl(file, FBIOGET_VSCREENINFO, &mut var).context("FBIOGET_VSCREENINFO")?;
        timing_to_var(&mut var, timing);
        var.activate = FB_ACTIVATE_NOW | FB_ACTIVATE_ALL | FB_ACTIVATE_FORCE;
        ioctl(file, FBIOPUT_VSCREENINFO, &mut var).context("FBIOPUT_VSCREENINFO")?;
        debug!(
            "applied mode {}: {}x{} pixclock={}ps",
            timing.format.id(),
            var.xres,
            var.yres,
            var.pixclock,
        );
        Ok(())
    }

    fn read_node(&self, node: &str) -> io::Result<String> {
        self.sysfs.read(node)
    }

    fn write_node(&self, node: &str, value: &str) -> io::Result<()> {
        self.sysfs.write(node, value)
    }

    fn wait_connect(&self, cancel: &AtomicBool, deadline: Option<Duration>) -> ConnectStatus {
        hotplug::wait_for_connect(&self.sysfs.node_path("connected"), cancel, deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::modes::VideoFormat;

    #[test]
    fn timing_fills_var_screeninfo() {
        let mut var = FbVarScreeninfo::default();
        timing_to_var(&mut var, &VideoFormat::V1920x1080p60.timing());
        assert_eq!((var.xres, var.yres), (1920, 1080));
        assert_eq!(var.right_margin, 88);
        assert_eq!(var.hsync_len, 44);
        assert_eq!(var.left_margin, 148);
        assert_eq!(var.pixclock, 1_000_000_000 / 148_500);
        assert_eq!(var.vmode, 0);
        assert_eq!(var.reserved[3], 16);
    }

    #[test]
    fn interlaced_timing_doubles_frame_height() {
        let mut var = FbVarScreeninfo::default();
        timing_to_var(&mut var, &VideoFormat::V1920x1080i60.timing());
        assert_eq!(var.yres, 1080);
        assert_eq!(var.vmode, FB_VMODE_INTERLACED);
    }

    #[test]
    fn refresh_rate_recovered_from_var() {
        let mut var = FbVarScreeninfo::default();
        timing_to_var(&mut var, &VideoFormat::V1280x720p60.timing());
        // 74.25MHz over a 1650x750 total is 60Hz.
        assert_eq!(var_refresh_rate(&var), 60);
    }

    #[test]
    fn zero_pixclock_defaults_to_sixty() {
        let var = FbVarScreeninfo::default();
        assert_eq!(var_refresh_rate(&var), 60);
    }

    #[test]
    fn ioctl_codes_match_the_abi() {
        assert_eq!(FBIOGET_VSCREENINFO, 0x4600);
        assert_eq!(FBIOPUT_VSCREENINFO, 0x4601);
        // dir=write, magic 'm', nr=164.
        assert_eq!(MSMFB_DISPLAY_COMMIT & 0xff, 164);
        assert_eq!((MSMFB_DISPLAY_COMMIT >> 8) & 0xff, u64::from(MSMFB_MAGIC) as libc::c_ulong);
        assert_eq!(MSMFB_OVERLAY_SET & 0xff, 135);
    }
}
