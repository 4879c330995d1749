//! Frame conversion: raw decoded frames to packed presentable buffers.
//!
//! [`FrameConverter`] normalizes decoder output (planar YUV 4:2:0, NV12,
//! RGB24, or already-packed BGRA) into tightly packed BGRA and attaches
//! presentation timing. A reusable conversion context is keyed by
//! (width, height, source format, destination format) and rebuilt whenever
//! any key component changes, so steady-state playback never re-resolves
//! the conversion path per frame.
//!
//! Color conversion uses BT.601 full-range coefficients on the CPU; the
//! destination layout is fixed packed BGRA.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::video::{DecodedFrame, PixelFormat, PlayerError, PresentableBuffer};

/// Frame rate assumed when no hint has been set and the source carries no
/// timestamps.
pub const FALLBACK_FPS: f64 = 30.0;

/// Resolved conversion path for one (dimensions, format) combination.
///
/// Building the context is where format support is decided; conversion
/// itself can then only fail on malformed plane data or allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ConvertContext {
    width: u32,
    height: u32,
    src: PixelFormat,
    dst: PixelFormat,
}

impl ConvertContext {
    fn build(width: u32, height: u32, src: PixelFormat) -> Result<Self, PlayerError> {
        if width == 0 || height == 0 {
            return Err(PlayerError::FrameCorrupt(format!(
                "degenerate frame dimensions {width}x{height}"
            )));
        }
        match src {
            PixelFormat::Yuv420p | PixelFormat::Nv12 | PixelFormat::Rgb24 | PixelFormat::Bgra => {
                Ok(Self {
                    width,
                    height,
                    src,
                    dst: PixelFormat::Bgra,
                })
            }
            // 10-bit output would need a widened destination; no packed
            // 8-bit path is defined for it.
            PixelFormat::P010 => Err(PlayerError::UnsupportedFormat(
                "P010 (10-bit) has no packed BGRA conversion path".to_string(),
            )),
        }
    }

    fn matches(&self, frame: &DecodedFrame) -> bool {
        self.width == frame.width && self.height == frame.height && self.src == frame.format
    }
}

/// Mutable converter state guarded by one lock.
struct ConvertState {
    context: Option<ConvertContext>,
    /// Last emitted timestamp; the monotonicity baseline for this session.
    last_pts: Option<Duration>,
}

/// Converts decoded frames into packed BGRA presentable buffers.
///
/// One converter instance belongs to one playback pipeline. `convert` is
/// called from the decode thread; `set_fps` and `clear` may be called
/// concurrently from the control surface, so the FPS hint is an atomic
/// (last-writer-wins, no torn reads) and the context lives under a lock.
pub struct FrameConverter {
    state: Mutex<ConvertState>,
    /// FPS hint, stored as `f64` bits.
    fps_bits: AtomicU64,
}

impl FrameConverter {
    /// Creates a converter with the given fallback frame rate hint.
    pub fn new(fallback_fps: f64) -> Self {
        let fps = if fallback_fps.is_finite() && fallback_fps > 0.0 {
            fallback_fps
        } else {
            FALLBACK_FPS
        };
        Self {
            state: Mutex::new(ConvertState {
                context: None,
                last_pts: None,
            }),
            fps_bits: AtomicU64::new(fps.to_bits()),
        }
    }

    /// Updates the pacing hint used to synthesize timestamps.
    ///
    /// Takes effect on the next frame that lacks an explicit timestamp.
    /// Non-finite or non-positive values are ignored.
    pub fn set_fps(&self, fps: f64) {
        if fps.is_finite() && fps > 0.0 {
            self.fps_bits.store(fps.to_bits(), Ordering::Relaxed);
        } else {
            tracing::warn!("ignoring invalid fps hint {fps}");
        }
    }

    /// Returns the current FPS hint.
    pub fn fps(&self) -> f64 {
        f64::from_bits(self.fps_bits.load(Ordering::Relaxed))
    }

    /// Returns the synthesized frame interval derived from the FPS hint.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps())
    }

    /// Releases the conversion context and scratch state.
    ///
    /// Does not touch any cached buffers; that is the frame cache's job.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        if state.context.take().is_some() {
            tracing::debug!("conversion context released");
        }
    }

    /// Rewinds the synthesized-timestamp baseline to zero.
    ///
    /// Called when a looping session restarts from the top and when a new
    /// session begins, so timestamps never drift across restarts.
    pub fn reset_baseline(&self) {
        self.state.lock().last_pts = None;
    }

    /// Converts a decoded frame into a packed BGRA presentable buffer.
    ///
    /// Fails with [`PlayerError::UnsupportedFormat`] when no conversion
    /// path exists, [`PlayerError::FrameCorrupt`] when the plane data does
    /// not match the declared layout, and [`PlayerError::AllocationFailed`]
    /// when the destination buffer cannot be reserved.
    pub fn convert(&self, frame: &DecodedFrame) -> Result<PresentableBuffer, PlayerError> {
        let mut state = self.state.lock();

        // Rebuild the context if dimensions or format changed.
        let rebuild = state.context.map_or(true, |ctx| !ctx.matches(frame));
        if rebuild {
            let ctx = ConvertContext::build(frame.width, frame.height, frame.format)?;
            tracing::debug!(
                "conversion context {}x{} {:?} -> {:?}",
                ctx.width,
                ctx.height,
                ctx.src,
                ctx.dst
            );
            state.context = Some(ctx);
        }

        validate_planes(frame)?;
        let data = fill_bgra(frame)?;

        let interval = self.frame_interval();
        let pts = match frame.pts {
            Some(p) => p,
            None => match state.last_pts {
                Some(prev) => prev + interval,
                None => Duration::ZERO,
            },
        };
        // Emitted timestamps never move backwards within a session.
        let pts = match state.last_pts {
            Some(last) if pts < last => last,
            _ => pts,
        };
        state.last_pts = Some(pts);

        Ok(PresentableBuffer {
            data,
            width: frame.width,
            height: frame.height,
            pts,
            duration: frame.duration.unwrap_or(interval),
        })
    }
}

/// Checks that every plane holds enough bytes for the declared layout.
fn validate_planes(frame: &DecodedFrame) -> Result<(), PlayerError> {
    let (w, h) = (frame.width as usize, frame.height as usize);
    let chroma_w = w.div_ceil(2);
    let chroma_h = h.div_ceil(2);

    let expected: &[(usize, usize)] = match frame.format {
        // (rows, bytes per row) for each plane
        PixelFormat::Yuv420p => &[(h, w), (chroma_h, chroma_w), (chroma_h, chroma_w)],
        PixelFormat::Nv12 | PixelFormat::P010 => &[(h, w), (chroma_h, chroma_w * 2)],
        PixelFormat::Rgb24 => &[(h, w * 3)],
        PixelFormat::Bgra => &[(h, w * 4)],
    };

    if frame.planes.len() != expected.len() {
        return Err(PlayerError::FrameCorrupt(format!(
            "{:?} frame carries {} planes, expected {}",
            frame.format,
            frame.planes.len(),
            expected.len()
        )));
    }

    for (index, ((rows, row_bytes), plane)) in expected.iter().zip(&frame.planes).enumerate() {
        if plane.stride < *row_bytes {
            return Err(PlayerError::FrameCorrupt(format!(
                "plane {index} stride {} below row width {row_bytes}",
                plane.stride
            )));
        }
        let needed = (rows - 1) * plane.stride + row_bytes;
        if plane.data.len() < needed {
            return Err(PlayerError::FrameCorrupt(format!(
                "plane {index} holds {} bytes, layout needs {needed}",
                plane.data.len()
            )));
        }
    }
    Ok(())
}

/// Allocates and fills the packed BGRA destination.
fn fill_bgra(frame: &DecodedFrame) -> Result<Vec<u8>, PlayerError> {
    let (w, h) = (frame.width as usize, frame.height as usize);
    let len = w * h * 4;
    let mut out = Vec::new();
    out.try_reserve_exact(len)
        .map_err(|e| PlayerError::AllocationFailed(format!("{len} byte BGRA buffer: {e}")))?;
    out.resize(len, 0);

    match frame.format {
        PixelFormat::Yuv420p => {
            let y_plane = &frame.planes[0];
            let u_plane = &frame.planes[1];
            let v_plane = &frame.planes[2];
            for row in 0..h {
                for col in 0..w {
                    let y = y_plane.data[row * y_plane.stride + col];
                    let u = u_plane.data[(row / 2) * u_plane.stride + col / 2];
                    let v = v_plane.data[(row / 2) * v_plane.stride + col / 2];
                    write_yuv(&mut out, (row * w + col) * 4, y, u, v);
                }
            }
        }
        PixelFormat::Nv12 => {
            let y_plane = &frame.planes[0];
            let uv_plane = &frame.planes[1];
            for row in 0..h {
                for col in 0..w {
                    let y = y_plane.data[row * y_plane.stride + col];
                    let uv = (row / 2) * uv_plane.stride + (col / 2) * 2;
                    write_yuv(&mut out, (row * w + col) * 4, y, uv_plane.data[uv], uv_plane.data[uv + 1]);
                }
            }
        }
        PixelFormat::Rgb24 => {
            let plane = &frame.planes[0];
            for row in 0..h {
                for col in 0..w {
                    let src = row * plane.stride + col * 3;
                    let dst = (row * w + col) * 4;
                    out[dst] = plane.data[src + 2];
                    out[dst + 1] = plane.data[src + 1];
                    out[dst + 2] = plane.data[src];
                    out[dst + 3] = 255;
                }
            }
        }
        PixelFormat::Bgra => {
            let plane = &frame.planes[0];
            for row in 0..h {
                let src = row * plane.stride;
                let dst = row * w * 4;
                out[dst..dst + w * 4].copy_from_slice(&plane.data[src..src + w * 4]);
            }
        }
        // Rejected at context build.
        PixelFormat::P010 => unreachable!("no context is ever built for P010"),
    }

    Ok(out)
}

/// BT.601 full-range YUV to BGRA for one pixel.
#[inline]
fn write_yuv(out: &mut [u8], index: usize, y: u8, u: u8, v: u8) {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;
    let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
    let g = (y - 0.344136 * u - 0.714136 * v).clamp(0.0, 255.0) as u8;
    let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
    out[index] = b;
    out[index + 1] = g;
    out[index + 2] = r;
    out[index + 3] = 255;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::Plane;

    fn yuv_frame(width: u32, height: u32, y: u8, u: u8, v: u8) -> DecodedFrame {
        let (w, h) = (width as usize, height as usize);
        let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
        DecodedFrame::new(
            PixelFormat::Yuv420p,
            width,
            height,
            vec![
                Plane {
                    data: vec![y; w * h],
                    stride: w,
                },
                Plane {
                    data: vec![u; cw * ch],
                    stride: cw,
                },
                Plane {
                    data: vec![v; cw * ch],
                    stride: cw,
                },
            ],
        )
    }

    #[test]
    fn test_gray_yuv_converts_to_gray_bgra() {
        let converter = FrameConverter::new(30.0);
        let buffer = converter.convert(&yuv_frame(4, 4, 128, 128, 128)).unwrap();
        assert_eq!(buffer.data.len(), 4 * 4 * 4);
        assert_eq!(&buffer.data[0..4], &[128, 128, 128, 255]);
    }

    #[test]
    fn test_red_yuv_converts_to_red_bgra() {
        let converter = FrameConverter::new(30.0);
        // Full-range BT.601 encoding of pure red
        let buffer = converter.convert(&yuv_frame(2, 2, 76, 85, 255)).unwrap();
        let [b, g, r, a] = [buffer.data[0], buffer.data[1], buffer.data[2], buffer.data[3]];
        assert!(r >= 250, "red channel was {r}");
        assert!(g <= 5, "green channel was {g}");
        assert!(b <= 5, "blue channel was {b}");
        assert_eq!(a, 255);
    }

    #[test]
    fn test_nv12_conversion() {
        let converter = FrameConverter::new(30.0);
        let frame = DecodedFrame::new(
            PixelFormat::Nv12,
            2,
            2,
            vec![
                Plane {
                    data: vec![128; 4],
                    stride: 2,
                },
                Plane {
                    data: vec![128, 128],
                    stride: 2,
                },
            ],
        );
        let buffer = converter.convert(&frame).unwrap();
        assert_eq!(&buffer.data[0..4], &[128, 128, 128, 255]);
    }

    #[test]
    fn test_rgb24_repack() {
        let converter = FrameConverter::new(30.0);
        let frame = DecodedFrame::new(
            PixelFormat::Rgb24,
            1,
            1,
            vec![Plane {
                data: vec![10, 20, 30],
                stride: 3,
            }],
        );
        let buffer = converter.convert(&frame).unwrap();
        assert_eq!(&buffer.data, &[30, 20, 10, 255]);
    }

    #[test]
    fn test_bgra_passthrough_strips_stride_padding() {
        let converter = FrameConverter::new(30.0);
        let mut data = vec![0u8; 2 * 8]; // 1x2 frame, stride 8 (4 bytes padding)
        data[0..4].copy_from_slice(&[1, 2, 3, 4]);
        data[8..12].copy_from_slice(&[5, 6, 7, 8]);
        let frame = DecodedFrame::new(
            PixelFormat::Bgra,
            1,
            2,
            vec![Plane { data, stride: 8 }],
        );
        let buffer = converter.convert(&frame).unwrap();
        assert_eq!(&buffer.data, &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_p010_is_unsupported() {
        let converter = FrameConverter::new(30.0);
        let frame = DecodedFrame::new(
            PixelFormat::P010,
            2,
            2,
            vec![
                Plane {
                    data: vec![0; 4],
                    stride: 2,
                },
                Plane {
                    data: vec![0; 2],
                    stride: 2,
                },
            ],
        );
        assert!(matches!(
            converter.convert(&frame),
            Err(PlayerError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_short_plane_is_corrupt() {
        let converter = FrameConverter::new(30.0);
        let mut frame = yuv_frame(4, 4, 128, 128, 128);
        frame.planes[0].data.truncate(3);
        assert!(matches!(
            converter.convert(&frame),
            Err(PlayerError::FrameCorrupt(_))
        ));
    }

    #[test]
    fn test_fps_hint_spaces_synthesized_timestamps() {
        let converter = FrameConverter::new(30.0);
        converter.set_fps(24.0);
        let interval = Duration::from_secs_f64(1.0 / 24.0);

        let mut previous = None;
        for index in 0..5 {
            let buffer = converter.convert(&yuv_frame(2, 2, 128, 128, 128)).unwrap();
            if index == 0 {
                assert_eq!(buffer.pts, Duration::ZERO);
            }
            if let Some(prev) = previous {
                assert_eq!(buffer.pts - prev, interval);
            }
            previous = Some(buffer.pts);
        }
    }

    #[test]
    fn test_source_timestamps_win_and_never_regress() {
        let converter = FrameConverter::new(30.0);

        let mut frame = yuv_frame(2, 2, 128, 128, 128);
        frame.pts = Some(Duration::from_millis(100));
        assert_eq!(
            converter.convert(&frame).unwrap().pts,
            Duration::from_millis(100)
        );

        // A backwards source timestamp is clamped to the baseline.
        frame.pts = Some(Duration::from_millis(40));
        assert_eq!(
            converter.convert(&frame).unwrap().pts,
            Duration::from_millis(100)
        );
    }

    #[test]
    fn test_reset_baseline_restarts_at_zero() {
        let converter = FrameConverter::new(25.0);
        for _ in 0..3 {
            converter.convert(&yuv_frame(2, 2, 128, 128, 128)).unwrap();
        }
        converter.reset_baseline();
        let buffer = converter.convert(&yuv_frame(2, 2, 128, 128, 128)).unwrap();
        assert_eq!(buffer.pts, Duration::ZERO);
    }

    #[test]
    fn test_context_rebuilds_on_dimension_change() {
        let converter = FrameConverter::new(30.0);
        let small = converter.convert(&yuv_frame(2, 2, 128, 128, 128)).unwrap();
        let large = converter.convert(&yuv_frame(4, 2, 128, 128, 128)).unwrap();
        assert_eq!(small.data.len(), 2 * 2 * 4);
        assert_eq!(large.data.len(), 4 * 2 * 4);
    }

    #[test]
    fn test_invalid_fps_hint_is_ignored() {
        let converter = FrameConverter::new(30.0);
        converter.set_fps(0.0);
        converter.set_fps(f64::NAN);
        assert_eq!(converter.fps(), 30.0);
    }
}
