//! Playback controller: the public control surface and the decode loop.
//!
//! [`PlaybackController`] owns one pipeline end to end: the converter, the
//! bounded frame cache, the presentation thread, and at most one active
//! decode session. Control commands (`play`, `pause`, `resume`,
//! `toggle_pause`, `stop`, `clear_cache`) serialize on one mutex and talk
//! to the decode loop purely through atomic flags, so a command never waits
//! on in-flight decoder I/O. The decode loop checks those flags at least
//! once per decoded frame; that cooperative discipline is the only way a
//! session is ever cancelled, because decoder calls are opaque and cannot
//! be preempted.
//!
//! Teardown comes in two strengths: [`PlaybackController::stop`] halts
//! decode and pacing but leaves every converted buffer cached (bounded
//! latency, never waits on I/O), while [`PlaybackController::clear_cache`]
//! additionally drains the cache on the presentation-owning thread and
//! blocks until the release has completed.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::convert::FrameConverter;
use crate::frame_cache::{FrameBufferCache, DEFAULT_CACHE_CAPACITY};
use crate::present::{PresentJob, PresentThread, PresentationSink};
use crate::video::{
    DecodedFrame, Decoder, PlaybackState, PlayerError, PresentableBuffer, SourceMetadata,
};

/// Tuning knobs for a playback pipeline.
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    /// Watermark of the frame cache; beyond it the oldest buffer is evicted.
    pub cache_capacity: usize,
    /// FPS hint used to synthesize timestamps until a better value is known.
    pub fallback_fps: f64,
    /// Nap while the cache sits at its watermark.
    pub full_cache_nap: Duration,
    /// Poll interval of a paused decode loop.
    pub pause_poll: Duration,
    /// Nap after a skipped corrupt frame.
    pub error_nap: Duration,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            fallback_fps: 30.0,
            full_cache_nap: Duration::from_millis(5),
            pause_poll: Duration::from_millis(10),
            error_nap: Duration::from_millis(10),
        }
    }
}

impl PlayerConfig {
    /// Sets the frame cache watermark.
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity.max(1);
        self
    }

    /// Sets the fallback FPS hint.
    pub fn with_fallback_fps(mut self, fps: f64) -> Self {
        self.fallback_fps = fps;
        self
    }
}

/// Lifecycle notifications delivered through [`PlaybackController::events`].
///
/// This is the completion-style failure channel: per-frame problems are
/// absorbed by the decode loop, session-terminal outcomes always surface
/// here.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    /// The source was opened and decoding began.
    Started,
    /// The stream ended (non-looping session) and the cache drained.
    Ended,
    /// The session died; the payload says why.
    Failed(PlayerError),
}

/// State shared between the controller, the decode loop, and readers.
struct SharedState {
    state: Mutex<PlaybackState>,
    /// Generation of the current session; stale decode threads compare
    /// against it before touching shared state.
    generation: AtomicU64,
    metadata: Mutex<Option<SourceMetadata>>,
}

/// One active (or superseded but still winding down) decode session.
struct Session {
    generation: u64,
    stop: Arc<AtomicBool>,
    pause: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

struct Inner {
    session: Option<Session>,
    next_generation: u64,
}

/// Orchestrates decode, conversion, caching, and paced presentation for
/// one display sink.
///
/// Generic over the decoder so the same pipeline runs against any
/// [`Decoder`] implementation; tests inject scripted decoders through
/// [`PlaybackController::play_with_decoder`].
pub struct PlaybackController<D: Decoder> {
    inner: Mutex<Inner>,
    shared: Arc<SharedState>,
    converter: Arc<FrameConverter>,
    cache: Arc<FrameBufferCache>,
    present: PresentThread,
    last_presented: Arc<Mutex<Option<Duration>>>,
    events_tx: Sender<PlayerEvent>,
    events_rx: Receiver<PlayerEvent>,
    config: PlayerConfig,
    _decoder: PhantomData<fn() -> D>,
}

impl<D: Decoder + 'static> PlaybackController<D> {
    /// Creates a controller around the given display sink.
    pub fn new(sink: Box<dyn PresentationSink>) -> Self {
        Self::with_config(sink, PlayerConfig::default())
    }

    /// Creates a controller with explicit tuning.
    pub fn with_config(sink: Box<dyn PresentationSink>, config: PlayerConfig) -> Self {
        let converter = Arc::new(FrameConverter::new(config.fallback_fps));
        let cache = Arc::new(FrameBufferCache::new(config.cache_capacity));
        let last_presented = Arc::new(Mutex::new(None));
        let present = PresentThread::spawn(
            sink,
            Arc::clone(&cache),
            Arc::clone(&converter),
            Arc::clone(&last_presented),
        );
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        Self {
            inner: Mutex::new(Inner {
                session: None,
                next_generation: 0,
            }),
            shared: Arc::new(SharedState {
                state: Mutex::new(PlaybackState::Idle),
                generation: AtomicU64::new(0),
                metadata: Mutex::new(None),
            }),
            converter,
            cache,
            present,
            last_presented,
            events_tx,
            events_rx,
            config,
            _decoder: PhantomData,
        }
    }

    /// Starts (or replaces) playback of a source.
    ///
    /// Always allowed: an active session is superseded — its decode loop
    /// observes the stop flag and winds down on its own, without this call
    /// waiting on it. The source is opened on the new decode thread, so
    /// `play` returns without touching I/O; an open failure arrives as
    /// [`PlayerEvent::Failed`] and leaves the controller idle.
    pub fn play(&self, source: impl Into<String>, repeats: bool) {
        let source = source.into();
        tracing::info!("play {source} (repeats: {repeats})");
        self.start_session(move || D::open(&source), repeats);
    }

    /// Starts playback with an already-opened decoder.
    ///
    /// Same lifecycle as [`play`](Self::play); this is the injection seam
    /// for callers that construct their decoder by other means.
    pub fn play_with_decoder(&self, decoder: D, repeats: bool) {
        self.start_session(move || Ok(decoder), repeats);
    }

    fn start_session(
        &self,
        opener: impl FnOnce() -> Result<D, PlayerError> + Send + 'static,
        repeats: bool,
    ) {
        let mut inner = self.inner.lock();

        // Supersede the previous session cooperatively; never join it here.
        if let Some(old) = inner.session.take() {
            tracing::debug!("superseding session {}", old.generation);
            old.stop.store(true, Ordering::Release);
        }

        inner.next_generation += 1;
        let generation = inner.next_generation;
        self.shared.generation.store(generation, Ordering::Release);
        self.cache.begin_session(generation);
        self.converter.reset_baseline();
        *self.last_presented.lock() = None;
        *self.shared.metadata.lock() = None;
        self.present.send(PresentJob::Start);

        let stop = Arc::new(AtomicBool::new(false));
        let pause = Arc::new(AtomicBool::new(false));
        let worker = Worker {
            generation,
            stop: Arc::clone(&stop),
            pause: Arc::clone(&pause),
            converter: Arc::clone(&self.converter),
            cache: Arc::clone(&self.cache),
            shared: Arc::clone(&self.shared),
            events: self.events_tx.clone(),
            present_jobs: self.present.job_sender(),
            config: self.config.clone(),
            repeats,
        };
        let handle = thread::spawn(move || decode_loop(opener, worker));

        inner.session = Some(Session {
            generation,
            stop,
            pause,
            handle: Some(handle),
        });
        *self.shared.state.lock() = PlaybackState::Playing;
    }

    /// Suspends decode advancement and presentation scheduling.
    ///
    /// Converted buffers stay cached. No-op unless currently playing.
    pub fn pause(&self) {
        let inner = self.inner.lock();
        self.pause_locked(&inner);
    }

    /// Resumes a paused session from where it left off. No-op otherwise.
    pub fn resume(&self) {
        let inner = self.inner.lock();
        self.resume_locked(&inner);
    }

    /// Pauses when playing, resumes when paused.
    pub fn toggle_pause(&self) {
        let inner = self.inner.lock();
        let state = *self.shared.state.lock();
        match state {
            PlaybackState::Playing => self.pause_locked(&inner),
            PlaybackState::Paused => self.resume_locked(&inner),
            _ => {}
        }
    }

    fn pause_locked(&self, inner: &Inner) {
        let mut state = self.shared.state.lock();
        if *state != PlaybackState::Playing {
            tracing::trace!("pause ignored in {:?}", *state);
            return;
        }
        if let Some(session) = inner.session.as_ref() {
            session.pause.store(true, Ordering::Release);
        }
        self.cache.set_suspended(true);
        self.present.send(PresentJob::Pause);
        *state = PlaybackState::Paused;
        tracing::debug!("paused");
    }

    fn resume_locked(&self, inner: &Inner) {
        let mut state = self.shared.state.lock();
        if *state != PlaybackState::Paused {
            tracing::trace!("resume ignored in {:?}", *state);
            return;
        }
        if let Some(session) = inner.session.as_ref() {
            session.pause.store(false, Ordering::Release);
        }
        self.cache.set_suspended(false);
        self.present.send(PresentJob::Resume);
        *state = PlaybackState::Playing;
        tracing::debug!("resumed");
    }

    /// Fast stop: halts decode and presentation, keeps every cached buffer.
    ///
    /// Returns within a bounded time regardless of decoder I/O — the
    /// decode loop is signalled, never joined. The completion runs on the
    /// caller's thread once the state is `Stopped`. From `Idle` or
    /// `Stopped` the completion is invoked immediately.
    pub fn stop(&self, on_complete: impl FnOnce()) {
        let inner = self.inner.lock();
        {
            let mut state = self.shared.state.lock();
            match *state {
                PlaybackState::Playing | PlaybackState::Paused => {
                    *state = PlaybackState::Stopping;
                }
                _ => {
                    drop(state);
                    drop(inner);
                    on_complete();
                    return;
                }
            }
        }

        if let Some(session) = inner.session.as_ref() {
            session.stop.store(true, Ordering::Release);
        }
        self.cache.retain_all();
        self.present.send(PresentJob::Halt);
        *self.shared.state.lock() = PlaybackState::Stopped;
        tracing::info!("stopped; {} buffers retained", self.cache.len());
        drop(inner);
        on_complete();
    }

    /// Full clear: halts decode, then releases every cached buffer and the
    /// conversion context **on the presentation-owning thread**, blocking
    /// until the release has completed.
    ///
    /// Allowed from any state, and deliberately heavyweight — this is the
    /// one control operation that blocks its caller. It never fails
    /// observably: release is best-effort and the completion always runs.
    pub fn clear_cache(&self, on_complete: impl FnOnce()) {
        let mut inner = self.inner.lock();

        if let Some(session) = inner.session.take() {
            tracing::debug!("halting session {} for cache clear", session.generation);
            session.stop.store(true, Ordering::Release);
        }
        // Fence: no buffer can enter or leave while the clear is queued.
        self.cache.retain_all();
        self.present.send(PresentJob::Halt);

        if !self.present.clear_sync() {
            // Presentation thread already gone (tear-down race); release on
            // this thread rather than leaving buffers behind.
            tracing::warn!("presentation thread unavailable, clearing in place");
            self.cache.clear_all();
            self.converter.clear();
        }

        *self.shared.state.lock() = PlaybackState::Idle;
        *self.last_presented.lock() = None;
        tracing::info!("cache cleared");
        drop(inner);
        on_complete();
    }

    /// True only while actively playing.
    pub fn is_playing(&self) -> bool {
        self.shared.state.lock().is_playing()
    }

    /// True only while paused.
    pub fn is_paused(&self) -> bool {
        self.shared.state.lock().is_paused()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PlaybackState {
        *self.shared.state.lock()
    }

    /// Timestamp of the most recently presented buffer, if any.
    pub fn position(&self) -> Option<Duration> {
        *self.last_presented.lock()
    }

    /// Metadata of the current source, once its decoder has opened.
    pub fn metadata(&self) -> Option<SourceMetadata> {
        self.shared.metadata.lock().clone()
    }

    /// Number of converted buffers currently cached.
    pub fn cached_frames(&self) -> usize {
        self.cache.len()
    }

    /// Updates the FPS hint used to synthesize timestamps.
    pub fn set_fps(&self, fps: f64) {
        self.converter.set_fps(fps);
    }

    /// Lifecycle event receiver (started / ended / failed).
    pub fn events(&self) -> &Receiver<PlayerEvent> {
        &self.events_rx
    }
}

impl<D: Decoder> Drop for PlaybackController<D> {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        if let Some(mut session) = inner.session.take() {
            session.stop.store(true, Ordering::Release);
            if let Some(handle) = session.handle.take() {
                let _ = handle.join();
            }
        }
        self.cache.stop();
        // PresentThread::drop joins the presentation thread.
    }
}

/// Everything the decode thread needs, bundled for the spawn.
struct Worker {
    generation: u64,
    stop: Arc<AtomicBool>,
    pause: Arc<AtomicBool>,
    converter: Arc<FrameConverter>,
    cache: Arc<FrameBufferCache>,
    shared: Arc<SharedState>,
    events: Sender<PlayerEvent>,
    present_jobs: Sender<PresentJob>,
    config: PlayerConfig,
    repeats: bool,
}

impl Worker {
    fn is_current(&self) -> bool {
        self.shared.generation.load(Ordering::Acquire) == self.generation
    }

    /// Terminal failure: report it and, if this session is still current,
    /// move the controller to `next`.
    fn fail_session(&self, error: PlayerError, next: PlaybackState) {
        if self.is_current() {
            *self.shared.state.lock() = next;
            let _ = self.present_jobs.send(PresentJob::Halt);
        }
        let _ = self.events.send(PlayerEvent::Failed(error));
    }

    fn end_session(&self) {
        if self.is_current() {
            *self.shared.state.lock() = PlaybackState::Stopped;
            let _ = self.present_jobs.send(PresentJob::Halt);
        }
        let _ = self.events.send(PlayerEvent::Ended);
        tracing::info!("end of stream");
    }
}

/// The decode loop running on the session's decode thread.
///
/// Cooperative by construction: the stop and pause flags are checked at
/// least once per decoded frame, and once more between conversion and
/// enqueue so a cache clear that signalled stop before draining can never
/// see a late buffer arrive.
fn decode_loop<D: Decoder>(
    opener: impl FnOnce() -> Result<D, PlayerError>,
    worker: Worker,
) {
    let mut decoder = match opener() {
        Ok(decoder) => decoder,
        Err(error) => {
            // An unopenable source leaves the controller idle; nothing was
            // ever decoded or cached.
            tracing::error!("failed to open source: {error}");
            worker.fail_session(error, PlaybackState::Idle);
            return;
        }
    };

    if worker.is_current() {
        let metadata = decoder.metadata().clone();
        // A declared source frame rate becomes the pacing hint for frames
        // without timestamps.
        if let Some(fps) = metadata.frame_rate {
            worker.converter.set_fps(fps);
        }
        *worker.shared.metadata.lock() = Some(metadata);
    }
    let _ = worker.events.send(PlayerEvent::Started);
    tracing::debug!("session {} decoding", worker.generation);

    loop {
        if worker.stop.load(Ordering::Acquire) {
            tracing::debug!("session {} cancelled", worker.generation);
            return;
        }
        if worker.pause.load(Ordering::Acquire) {
            thread::sleep(worker.config.pause_poll);
            continue;
        }
        if worker.cache.len() >= worker.config.cache_capacity {
            // Backpressure: the cache would evict; give presentation a
            // moment to drain instead of churning buffers.
            thread::sleep(worker.config.full_cache_nap);
            continue;
        }

        let frame = match decoder.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                if worker.repeats {
                    if let Err(error) = decoder.seek_to_start() {
                        tracing::error!("loop restart failed: {error}");
                        worker.fail_session(error, PlaybackState::Stopped);
                        return;
                    }
                    worker.converter.reset_baseline();
                    tracing::debug!("end of stream, looping to start");
                    continue;
                }
                // Let the cached tail present before reporting the end.
                while !worker.cache.is_empty() && !worker.stop.load(Ordering::Acquire) {
                    thread::sleep(worker.config.pause_poll);
                }
                worker.end_session();
                return;
            }
            Err(error) if error.is_transient() => {
                tracing::warn!("skipping corrupt frame: {error}");
                thread::sleep(worker.config.error_nap);
                continue;
            }
            Err(error) => {
                tracing::error!("terminal decode error: {error}");
                worker.fail_session(error, PlaybackState::Stopped);
                return;
            }
        };

        let buffer = match convert_with_retry(&worker.converter, &frame) {
            Ok(buffer) => buffer,
            Err(error) if error.is_transient() => {
                tracing::warn!("dropping unconvertible frame: {error}");
                continue;
            }
            Err(error) => {
                tracing::error!("conversion cannot continue: {error}");
                worker.fail_session(error, PlaybackState::Stopped);
                return;
            }
        };

        if worker.stop.load(Ordering::Acquire) {
            return;
        }
        if !worker.cache.enqueue(worker.generation, buffer) {
            tracing::trace!("buffer rejected (session superseded or halted)");
        }
    }
}

/// Converts a frame, retrying once on allocation failure before giving the
/// error back to the caller (who then skips the frame).
fn convert_with_retry(
    converter: &FrameConverter,
    frame: &DecodedFrame,
) -> Result<PresentableBuffer, PlayerError> {
    match converter.convert(frame) {
        Err(PlayerError::AllocationFailed(msg)) => {
            tracing::warn!("allocation failed, retrying once: {msg}");
            converter.convert(frame)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::{PixelFormat, Plane};

    /// Decoder that never runs out of frames.
    struct EndlessDecoder {
        metadata: SourceMetadata,
    }

    impl Decoder for EndlessDecoder {
        fn open(_source: &str) -> Result<Self, PlayerError> {
            Ok(Self {
                metadata: SourceMetadata {
                    width: 2,
                    height: 2,
                    frame_rate: Some(100.0),
                    duration: None,
                },
            })
        }

        fn next_frame(&mut self) -> Result<Option<DecodedFrame>, PlayerError> {
            thread::sleep(Duration::from_millis(1));
            Ok(Some(DecodedFrame::new(
                PixelFormat::Bgra,
                2,
                2,
                vec![Plane {
                    data: vec![128; 16],
                    stride: 8,
                }],
            )))
        }

        fn seek_to_start(&mut self) -> Result<(), PlayerError> {
            Ok(())
        }

        fn metadata(&self) -> &SourceMetadata {
            &self.metadata
        }
    }

    struct NullSink;

    impl PresentationSink for NullSink {
        fn submit(&mut self, _buffer: PresentableBuffer) {}
    }

    fn controller() -> PlaybackController<EndlessDecoder> {
        PlaybackController::new(Box::new(NullSink))
    }

    #[test]
    fn test_controls_are_noops_when_idle() {
        let player = controller();
        assert_eq!(player.state(), PlaybackState::Idle);

        player.pause();
        assert_eq!(player.state(), PlaybackState::Idle);
        player.resume();
        assert_eq!(player.state(), PlaybackState::Idle);
        player.toggle_pause();
        assert_eq!(player.state(), PlaybackState::Idle);

        let mut completed = false;
        player.stop(|| completed = true);
        assert!(completed);
        assert_eq!(player.state(), PlaybackState::Idle);
    }

    #[test]
    fn test_play_pause_resume_toggle_cycle() {
        let player = controller();

        player.play("test://endless", false);
        assert!(player.is_playing());
        assert!(!player.is_paused());

        player.pause();
        assert!(player.is_paused());
        player.pause(); // no-op
        assert!(player.is_paused());

        player.resume();
        assert!(player.is_playing());
        player.resume(); // no-op
        assert!(player.is_playing());

        player.toggle_pause();
        assert!(player.is_paused());
        player.toggle_pause();
        assert!(player.is_playing());
    }

    #[test]
    fn test_stop_transitions_and_projections() {
        let player = controller();
        player.play("test://endless", false);

        let mut completed = false;
        player.stop(|| completed = true);
        assert!(completed);
        assert_eq!(player.state(), PlaybackState::Stopped);
        assert!(!player.is_playing());
        assert!(!player.is_paused());

        // Stop from Stopped completes immediately, stays Stopped.
        let mut again = false;
        player.stop(|| again = true);
        assert!(again);
        assert_eq!(player.state(), PlaybackState::Stopped);

        // Pause/resume are no-ops in Stopped.
        player.pause();
        player.resume();
        assert_eq!(player.state(), PlaybackState::Stopped);

        // A new play leaves Stopped.
        player.play("test://endless", false);
        assert!(player.is_playing());
    }

    #[test]
    fn test_clear_cache_returns_to_idle() {
        let player = controller();
        player.play("test://endless", false);

        let mut cleared = false;
        player.clear_cache(|| cleared = true);
        assert!(cleared);
        assert_eq!(player.state(), PlaybackState::Idle);
        assert_eq!(player.cached_frames(), 0);

        // From Idle it is still allowed and still completes.
        let mut cleared_again = false;
        player.clear_cache(|| cleared_again = true);
        assert!(cleared_again);
        assert_eq!(player.state(), PlaybackState::Idle);
    }

    #[test]
    fn test_stop_after_pause_keeps_cache() {
        let player = controller();
        player.play("test://endless", false);

        // Let a few frames accumulate.
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while player.cached_frames() == 0 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        player.pause();
        // Let an already-converted in-flight frame settle before counting.
        thread::sleep(Duration::from_millis(50));
        let cached = player.cached_frames();
        assert!(cached > 0, "expected buffered frames before stop");

        player.stop(|| {});
        assert_eq!(player.cached_frames(), cached);

        player.clear_cache(|| {});
        assert_eq!(player.cached_frames(), 0);
    }
}
