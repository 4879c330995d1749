//! framecast demo.
//!
//! Plays a synthetic test-pattern source through the full pipeline and
//! logs every presented buffer, then exercises the control surface:
//! pause, resume, fast stop (buffers retained), and a full cache clear.
//!
//! ```bash
//! framecast-demo [SOURCE] [--loop]
//! framecast-demo "pattern://640x360@24?frames=120" --loop
//! ```

use std::time::Duration;

use framecast::{PatternDecoder, PlaybackController, PresentableBuffer, PresentationSink};
use tracing_subscriber::EnvFilter;

/// Sink that logs each submitted buffer instead of displaying it.
struct LogSink {
    frames: u64,
}

impl PresentationSink for LogSink {
    fn submit(&mut self, buffer: PresentableBuffer) {
        self.frames += 1;
        tracing::info!(
            "frame {} at {:?} ({}x{}, {} bytes)",
            self.frames,
            buffer.pts,
            buffer.width,
            buffer.height,
            buffer.data.len()
        );
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let source = std::env::args()
        .nth(1)
        .filter(|arg| arg != "--loop")
        .unwrap_or_else(|| "pattern://320x180@30?frames=90".to_string());
    let repeats = std::env::args().any(|arg| arg == "--loop");

    let player = PlaybackController::<PatternDecoder>::new(Box::new(LogSink { frames: 0 }));
    player.play(source.as_str(), repeats);

    std::thread::sleep(Duration::from_secs(2));
    player.toggle_pause();
    tracing::info!(
        "paused at {:?}, {} buffers cached",
        player.position(),
        player.cached_frames()
    );
    std::thread::sleep(Duration::from_millis(500));
    player.toggle_pause();
    std::thread::sleep(Duration::from_secs(1));

    player.stop(|| tracing::info!("stop completed"));
    tracing::info!("{} buffers retained after stop", player.cached_frames());

    player.clear_cache(|| tracing::info!("cache clear completed"));
    tracing::info!("{} buffers cached after clear", player.cached_frames());

    while let Ok(event) = player.events().try_recv() {
        tracing::info!("event: {event:?}");
    }
}
