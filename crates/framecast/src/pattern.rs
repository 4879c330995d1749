//! Synthetic test-pattern source.
//!
//! [`PatternDecoder`] generates planar YUV gradient frames without any
//! media backend. It exists for demos, benchmarks, and tests that need a
//! real [`Decoder`] but no container on disk: the gradient scrolls with
//! the frame index so dropped or repeated frames are visible, and frames
//! carry no timestamps by default so the converter's synthesis path is
//! exercised.
//!
//! Sources are addressed as `pattern://WIDTHxHEIGHT@FPS?frames=N`; every
//! component is optional and falls back to 320x180 @ 30 fps, 300 frames.

use std::time::Duration;

use crate::video::{DecodedFrame, Decoder, PixelFormat, Plane, PlayerError, SourceMetadata};

const DEFAULT_WIDTH: u32 = 320;
const DEFAULT_HEIGHT: u32 = 180;
const DEFAULT_FPS: f64 = 30.0;
const DEFAULT_FRAMES: u32 = 300;

/// A decoder that synthesizes gradient frames.
pub struct PatternDecoder {
    metadata: SourceMetadata,
    frame_count: u32,
    next_index: u32,
    /// When set, frames carry explicit timestamps instead of relying on
    /// the converter's FPS hint.
    timestamped: bool,
}

impl PatternDecoder {
    /// Creates a pattern source with explicit parameters.
    pub fn new(width: u32, height: u32, fps: f64, frame_count: u32) -> Self {
        let fps = if fps.is_finite() && fps > 0.0 {
            fps
        } else {
            DEFAULT_FPS
        };
        Self {
            metadata: SourceMetadata {
                width: width.max(2),
                height: height.max(2),
                frame_rate: Some(fps),
                duration: Some(Duration::from_secs_f64(frame_count as f64 / fps)),
            },
            frame_count,
            next_index: 0,
            timestamped: false,
        }
    }

    /// Makes generated frames carry explicit presentation timestamps.
    pub fn with_timestamps(mut self, timestamped: bool) -> Self {
        self.timestamped = timestamped;
        self
    }

    fn generate(&self, index: u32) -> DecodedFrame {
        let (w, h) = (self.metadata.width as usize, self.metadata.height as usize);
        let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));

        // Horizontal luma ramp scrolling with the frame index.
        let mut y_data = vec![0u8; w * h];
        let shift = (index as usize * 4) % w.max(1);
        for row in 0..h {
            for col in 0..w {
                y_data[row * w + col] = (((col + shift) * 255) / w.max(1)) as u8;
            }
        }
        // Slow chroma drift keeps the pattern visibly animated.
        let u = 128u8.wrapping_add((index % 64) as u8);
        let v = 128u8.wrapping_sub((index % 64) as u8);

        let mut frame = DecodedFrame::new(
            PixelFormat::Yuv420p,
            self.metadata.width,
            self.metadata.height,
            vec![
                Plane {
                    data: y_data,
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
        );
        if self.timestamped {
            if let Some(interval) = self.metadata.frame_interval() {
                frame.pts = Some(interval * index);
                frame.duration = Some(interval);
            }
        }
        frame
    }
}

/// Parses `WIDTHxHEIGHT@FPS?frames=N`, tolerating missing pieces.
fn parse_source(source: &str) -> (u32, u32, f64, u32) {
    let rest = source.strip_prefix("pattern://").unwrap_or(source);
    let (shape, query) = match rest.split_once('?') {
        Some((shape, query)) => (shape, Some(query)),
        None => (rest, None),
    };

    let (dims, fps) = match shape.split_once('@') {
        Some((dims, fps)) => (dims, fps.parse().ok()),
        None => (shape, None),
    };
    let (width, height) = dims
        .split_once('x')
        .and_then(|(w, h)| Some((w.parse().ok()?, h.parse().ok()?)))
        .unwrap_or((DEFAULT_WIDTH, DEFAULT_HEIGHT));

    let frames = query
        .and_then(|q| {
            q.split('&')
                .find_map(|kv| kv.strip_prefix("frames="))
                .and_then(|n| n.parse().ok())
        })
        .unwrap_or(DEFAULT_FRAMES);

    (width, height, fps.unwrap_or(DEFAULT_FPS), frames)
}

impl Decoder for PatternDecoder {
    fn open(source: &str) -> Result<Self, PlayerError> {
        let (width, height, fps, frames) = parse_source(source);
        tracing::debug!("pattern source {width}x{height} @ {fps} fps, {frames} frames");
        Ok(Self::new(width, height, fps, frames))
    }

    fn next_frame(&mut self) -> Result<Option<DecodedFrame>, PlayerError> {
        if self.next_index >= self.frame_count {
            return Ok(None);
        }
        let frame = self.generate(self.next_index);
        self.next_index += 1;
        Ok(Some(frame))
    }

    fn seek_to_start(&mut self) -> Result<(), PlayerError> {
        self.next_index = 0;
        Ok(())
    }

    fn metadata(&self) -> &SourceMetadata {
        &self.metadata
    }
}
