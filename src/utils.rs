//! Small shared helpers.

/// Widest source line the mixer can feed through a single pipe.
pub const MAX_DISPLAY_DIM: u32 = 2048;

/// Vertical sync period in nanoseconds for a refresh rate.
pub fn vsync_period_ns(fps: u32) -> u64 {
    1_000_000_000 / u64::from(fps.max(1))
}

/// Power-of-two downscale steps needed to bring `(src_w, src_h)` within 2x of
/// `(dst_w, dst_h)`. Zero means the pipe scaler covers the ratio on its own
/// (the destination is at least half the source in both dimensions).
pub fn downscale_factor(src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> u32 {
    if dst_w == 0 || dst_h == 0 {
        return 0;
    }

    let mut factor = 0;
    let (mut w, mut h) = (src_w, src_h);
    while w > dst_w * 2 || h > dst_h * 2 {
        w /= 2;
        h /= 2;
        factor += 1;
        if w == 0 || h == 0 {
            break;
        }
    }
    factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vsync_period() {
        assert_eq!(vsync_period_ns(60), 16_666_666);
        assert_eq!(vsync_period_ns(0), 1_000_000_000);
    }

    #[test]
    fn downscale_factor_within_scaler_range() {
        // 4K down to 1080p is exactly 2x in both dimensions.
        assert_eq!(downscale_factor(3840, 2160, 1920, 1080), 0);
        assert_eq!(downscale_factor(1920, 1080, 1920, 1080), 0);
    }

    #[test]
    fn downscale_factor_needs_steps() {
        assert_eq!(downscale_factor(3840, 2160, 960, 540), 1);
        assert_eq!(downscale_factor(3840, 2160, 480, 270), 2);
    }
}
