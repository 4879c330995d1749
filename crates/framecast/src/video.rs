//! Core playback types: pixel formats, frames, buffers, states, and the
//! decoder collaborator trait.
//!
//! This module is the shared vocabulary of the pipeline. Decoders produce
//! [`DecodedFrame`]s, the converter turns them into [`PresentableBuffer`]s,
//! and the controller advances a [`PlaybackState`].

use std::time::Duration;

/// Pixel format of a decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUV 4:2:0 planar (most common software-decode output)
    Yuv420p,
    /// NV12 (Y plane + interleaved UV, common for hardware decoders)
    Nv12,
    /// P010 (10-bit NV12 layout, produced by some HDR decode paths)
    P010,
    /// RGB 24-bit packed
    Rgb24,
    /// BGRA 32-bit packed (the presentable output layout)
    Bgra,
}

impl PixelFormat {
    /// Returns the number of planes for this format.
    pub fn num_planes(&self) -> usize {
        match self {
            PixelFormat::Yuv420p => 3,
            PixelFormat::Nv12 | PixelFormat::P010 => 2,
            PixelFormat::Rgb24 | PixelFormat::Bgra => 1,
        }
    }

    /// Returns true if this is a YUV-based format requiring color conversion.
    pub fn is_yuv(&self) -> bool {
        matches!(
            self,
            PixelFormat::Yuv420p | PixelFormat::Nv12 | PixelFormat::P010
        )
    }
}

/// A single plane of pixel data.
#[derive(Debug, Clone)]
pub struct Plane {
    /// Raw pixel data
    pub data: Vec<u8>,
    /// Stride (bytes per row, may include padding)
    pub stride: usize,
}

/// A raw decoded video frame as produced by a [`Decoder`].
///
/// Consumed exactly once by the frame converter. The presentation timestamp
/// is optional: sources without timing metadata leave it `None` and the
/// converter synthesizes one from the current FPS hint.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    /// Pixel format of the planes
    pub format: PixelFormat,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel data planes (count must match `format.num_planes()`)
    pub planes: Vec<Plane>,
    /// Presentation timestamp, if the source carries one
    pub pts: Option<Duration>,
    /// Display duration hint, if the source carries one
    pub duration: Option<Duration>,
}

impl DecodedFrame {
    /// Creates a new decoded frame without timing metadata.
    pub fn new(format: PixelFormat, width: u32, height: u32, planes: Vec<Plane>) -> Self {
        Self {
            format,
            width,
            height,
            planes,
            pts: None,
            duration: None,
        }
    }

    /// Returns the frame dimensions.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Returns the plane at `index`, if present.
    pub fn plane(&self, index: usize) -> Option<&Plane> {
        self.planes.get(index)
    }
}

/// A converted frame in the packed layout the display surface accepts.
///
/// Pixel data is tightly packed BGRA (`stride == width * 4`). Timestamps
/// emitted within one continuous session are non-decreasing; the baseline
/// resets only when a looping session restarts from the top.
#[derive(Debug, Clone)]
pub struct PresentableBuffer {
    /// Packed BGRA pixel data
    pub data: Vec<u8>,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Presentation timestamp
    pub pts: Duration,
    /// Display duration
    pub duration: Duration,
}

impl PresentableBuffer {
    /// Bytes per row of the packed buffer.
    pub fn stride(&self) -> usize {
        self.width as usize * 4
    }
}

/// Playback lifecycle state owned by the controller.
///
/// `Stopping` is a transient state observable while a stop is being
/// executed; both `is_playing` and `is_paused` report false in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// No session has been started (or the cache was cleared after stop)
    Idle,
    /// A session is actively decoding and presenting
    Playing,
    /// A session exists but decode and presentation are suspended
    Paused,
    /// A stop is in progress
    Stopping,
    /// The session was halted; cached buffers are retained
    Stopped,
}

impl PlaybackState {
    /// Returns true only in the `Playing` state.
    pub fn is_playing(&self) -> bool {
        matches!(self, PlaybackState::Playing)
    }

    /// Returns true only in the `Paused` state.
    pub fn is_paused(&self) -> bool {
        matches!(self, PlaybackState::Paused)
    }
}

/// Errors that can occur in the playback pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerError {
    /// The source could not be opened (network or file error)
    SourceUnreachable(String),
    /// The source pixel format has no conversion path
    UnsupportedFormat(String),
    /// A destination buffer could not be allocated
    AllocationFailed(String),
    /// A single frame failed to decode or convert; playback continues
    FrameCorrupt(String),
    /// The stream is unreadable; the session is over
    DecodeFailed(String),
}

impl PlayerError {
    /// Returns true for errors that affect only one frame.
    ///
    /// Transient errors are skipped by the decode loop; everything else
    /// ends the session.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PlayerError::FrameCorrupt(_) | PlayerError::AllocationFailed(_)
        )
    }
}

impl std::fmt::Display for PlayerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayerError::SourceUnreachable(msg) => write!(f, "Source unreachable: {msg}"),
            PlayerError::UnsupportedFormat(msg) => write!(f, "Unsupported format: {msg}"),
            PlayerError::AllocationFailed(msg) => write!(f, "Allocation failed: {msg}"),
            PlayerError::FrameCorrupt(msg) => write!(f, "Corrupt frame: {msg}"),
            PlayerError::DecodeFailed(msg) => write!(f, "Decode failed: {msg}"),
        }
    }
}

impl std::error::Error for PlayerError {}

/// Metadata about an opened source.
#[derive(Debug, Clone)]
pub struct SourceMetadata {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Nominal frame rate, if the container declares one
    pub frame_rate: Option<f64>,
    /// Total duration, if known (live streams report `None`)
    pub duration: Option<Duration>,
}

impl SourceMetadata {
    /// Returns the nominal frame interval, if a frame rate is declared.
    pub fn frame_interval(&self) -> Option<Duration> {
        match self.frame_rate {
            Some(fps) if fps > 0.0 && fps.is_finite() => Some(Duration::from_secs_f64(1.0 / fps)),
            _ => None,
        }
    }
}

/// Trait for the external demux/decode collaborator.
///
/// Implementations parse a container and emit raw decoded frames. Calls are
/// made from a single decode thread; `next_frame` may block on I/O, which is
/// why the controller only ever cancels it cooperatively between calls.
pub trait Decoder: Send {
    /// Opens a source by URL or file path.
    fn open(source: &str) -> Result<Self, PlayerError>
    where
        Self: Sized;

    /// Decodes and returns the next frame, or `Ok(None)` at end of stream.
    ///
    /// A transient per-frame failure is reported as
    /// [`PlayerError::FrameCorrupt`]; any other error ends the session.
    fn next_frame(&mut self) -> Result<Option<DecodedFrame>, PlayerError>;

    /// Rewinds the stream to its first frame (used for loop restarts).
    fn seek_to_start(&mut self) -> Result<(), PlayerError>;

    /// Returns the source metadata.
    fn metadata(&self) -> &SourceMetadata;
}
