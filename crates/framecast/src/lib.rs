//! framecast: a paced decode-to-present video playback pipeline.
//!
//! This crate turns raw frames from an external decoder into correctly
//! timed, display-ready buffers:
//!
//! - [`Decoder`] — the demux/decode collaborator trait (bring your own
//!   backend; [`PatternDecoder`] is a built-in synthetic one)
//! - [`FrameConverter`] — pixel-format normalization to packed BGRA and
//!   presentation-timestamp derivation
//! - [`FrameBufferCache`] — bounded, presentation-ordered buffering
//!   between decode and display
//! - [`PresentationSink`] — the display surface trait; buffers are
//!   submitted to it at their due times, from a single fixed thread
//! - [`PlaybackController`] — the state machine and control surface:
//!   play, pause, resume, toggle, fast stop (buffers retained), and a
//!   full cache clear that completes on the presentation-owning thread
//!   before returning
//!
//! # Example
//!
//! ```no_run
//! use framecast::{PatternDecoder, PlaybackController, PresentableBuffer, PresentationSink};
//!
//! struct PrintSink;
//!
//! impl PresentationSink for PrintSink {
//!     fn submit(&mut self, buffer: PresentableBuffer) {
//!         println!("frame at {:?}", buffer.pts);
//!     }
//! }
//!
//! let player = PlaybackController::<PatternDecoder>::new(Box::new(PrintSink));
//! player.play("pattern://320x180@30", true);
//! // ... interactive control ...
//! player.toggle_pause();
//! player.stop(|| println!("stopped, buffers retained"));
//! player.clear_cache(|| println!("cache cleared"));
//! ```
//!
//! # Threading
//!
//! Decode and conversion run on a per-session worker thread; pacing,
//! submission, and buffer release run on one presentation-owning thread.
//! Control commands are serialized against each other and cancel decode
//! work cooperatively — they never block on in-flight decoder I/O. The
//! one deliberate exception is [`PlaybackController::clear_cache`], which
//! blocks its caller until every buffer has been released.

pub mod convert;
pub mod frame_cache;
pub mod pattern;
pub mod player;
pub mod present;
pub mod video;

pub use convert::{FrameConverter, FALLBACK_FPS};
pub use frame_cache::{FrameBufferCache, DEFAULT_CACHE_CAPACITY};
pub use pattern::PatternDecoder;
pub use player::{PlaybackController, PlayerConfig, PlayerEvent};
pub use present::PresentationSink;
pub use video::{
    DecodedFrame, Decoder, PixelFormat, PlaybackState, Plane, PlayerError, PresentableBuffer,
    SourceMetadata,
};
