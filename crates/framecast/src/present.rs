//! The presentation-owning context.
//!
//! One fixed thread owns the display sink for the controller's whole
//! lifetime. It does three things:
//!
//! - paces: sleeps until the cache head comes due, then hands the buffer
//!   to the sink (never a burst, never a busy-poll);
//! - tracks the pacing epoch ([`PacingClock`]): the mapping from buffer
//!   timestamps to wall-clock, synced to the first frame of a session,
//!   frozen by pause, re-synced when a looping session wraps back to zero;
//! - executes jobs that must run on this thread, most importantly the
//!   synchronous cache clear. Releasing platform buffers off the thread
//!   that owns the surface can corrupt concurrent presentation state, so
//!   `Clear` drains the cache here and only then acknowledges the caller.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;

use crate::convert::FrameConverter;
use crate::frame_cache::FrameBufferCache;
use crate::video::PresentableBuffer;

/// Poll interval while the cache is empty or the clock is stopped.
const IDLE_TICK: Duration = Duration::from_millis(10);
/// Wait granularity while playback is not requested at all.
const PARKED_TICK: Duration = Duration::from_millis(50);

/// The display surface abstraction.
///
/// `submit` is only ever invoked from the presentation-owning thread; a
/// sink implementation may therefore touch thread-affine platform state
/// without further synchronization.
pub trait PresentationSink: Send {
    /// Accepts a buffer for display at its attached timestamp.
    fn submit(&mut self, buffer: PresentableBuffer);
}

/// Jobs executed on the presentation-owning thread.
pub(crate) enum PresentJob {
    /// A new session begins; re-arm the clock to sync on its first frame.
    Start,
    /// Freeze the pacing position.
    Pause,
    /// Continue from the frozen position.
    Resume,
    /// Stop pacing entirely (fast stop; the cache gate does the rest).
    Halt,
    /// Drain the cache and converter scratch state, then acknowledge.
    Clear { done: Sender<()> },
    /// Controller teardown.
    Shutdown,
}

/// Maps buffer timestamps to wall-clock time.
///
/// The clock does not start until the first frame of a session arrives,
/// so slow sources do not begin "behind". Pausing freezes the position;
/// resuming restarts the wall-clock anchor at the frozen position.
struct PacingClock {
    requested: bool,
    waiting_first: bool,
    anchor: Option<Instant>,
    anchor_position: Duration,
}

impl PacingClock {
    fn new() -> Self {
        Self {
            requested: false,
            waiting_first: true,
            anchor: None,
            anchor_position: Duration::ZERO,
        }
    }

    /// Current pacing position.
    fn position(&self) -> Duration {
        match self.anchor {
            Some(anchor) => self.anchor_position + anchor.elapsed(),
            None => self.anchor_position,
        }
    }

    fn running(&self) -> bool {
        self.requested
    }

    /// Arms the clock for a fresh session.
    fn start(&mut self) {
        self.requested = true;
        self.waiting_first = true;
        self.anchor = None;
        self.anchor_position = Duration::ZERO;
    }

    /// Freezes the position.
    fn pause(&mut self) {
        self.anchor_position = self.position();
        self.anchor = None;
        self.requested = false;
    }

    /// Continues from the frozen position.
    fn resume(&mut self) {
        if !self.requested {
            self.requested = true;
            if !self.waiting_first {
                self.anchor = Some(Instant::now());
            }
        }
    }

    /// Anchors the epoch at `pts` (first frame of a session, or the first
    /// frame after a loop wrap).
    fn sync_to(&mut self, pts: Duration) {
        self.anchor_position = pts;
        self.anchor = Some(Instant::now());
        self.waiting_first = false;
    }
}

/// Handle to the presentation thread.
///
/// Dropping the handle shuts the thread down and joins it.
pub(crate) struct PresentThread {
    handle: Option<JoinHandle<()>>,
    jobs: Sender<PresentJob>,
}

impl PresentThread {
    /// Spawns the presentation thread around the given sink.
    pub(crate) fn spawn(
        sink: Box<dyn PresentationSink>,
        cache: Arc<FrameBufferCache>,
        converter: Arc<FrameConverter>,
        last_presented: Arc<Mutex<Option<Duration>>>,
    ) -> Self {
        let (jobs_tx, jobs_rx) = crossbeam_channel::unbounded();
        let handle =
            thread::spawn(move || present_loop(sink, cache, converter, last_presented, jobs_rx));
        Self {
            handle: Some(handle),
            jobs: jobs_tx,
        }
    }

    /// Posts a job without waiting.
    pub(crate) fn send(&self, job: PresentJob) {
        let _ = self.jobs.send(job);
    }

    /// Clones the job sender for the decode thread, which posts `Halt`
    /// when a session ends on its own.
    pub(crate) fn job_sender(&self) -> Sender<PresentJob> {
        self.jobs.clone()
    }

    /// Runs a cache clear on the presentation thread and blocks until it
    /// has completed.
    ///
    /// Returns false if the thread is already gone; the caller then falls
    /// back to clearing on its own thread so completion is still honored.
    pub(crate) fn clear_sync(&self) -> bool {
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        if self.jobs.send(PresentJob::Clear { done: done_tx }).is_err() {
            return false;
        }
        done_rx.recv().is_ok()
    }
}

impl Drop for PresentThread {
    fn drop(&mut self) {
        let _ = self.jobs.send(PresentJob::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

enum JobOutcome {
    Continue,
    Shutdown,
}

fn handle_job(
    job: PresentJob,
    clock: &mut PacingClock,
    last_pts: &mut Option<Duration>,
    cache: &FrameBufferCache,
    converter: &FrameConverter,
) -> JobOutcome {
    match job {
        PresentJob::Start => {
            clock.start();
            *last_pts = None;
        }
        PresentJob::Pause => clock.pause(),
        PresentJob::Resume => clock.resume(),
        PresentJob::Halt => clock.pause(),
        PresentJob::Clear { done } => {
            cache.clear_all();
            converter.clear();
            let _ = done.send(());
        }
        PresentJob::Shutdown => return JobOutcome::Shutdown,
    }
    JobOutcome::Continue
}

/// The presentation loop.
fn present_loop(
    mut sink: Box<dyn PresentationSink>,
    cache: Arc<FrameBufferCache>,
    converter: Arc<FrameConverter>,
    last_presented: Arc<Mutex<Option<Duration>>>,
    jobs_rx: crossbeam_channel::Receiver<PresentJob>,
) {
    let mut clock = PacingClock::new();
    let mut last_pts: Option<Duration> = None;

    loop {
        // Drain pending jobs first so control latency is one iteration.
        loop {
            match jobs_rx.try_recv() {
                Ok(job) => {
                    if let JobOutcome::Shutdown =
                        handle_job(job, &mut clock, &mut last_pts, &cache, &converter)
                    {
                        return;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return,
            }
        }

        if !clock.running() {
            match jobs_rx.recv_timeout(PARKED_TICK) {
                Ok(job) => {
                    if let JobOutcome::Shutdown =
                        handle_job(job, &mut clock, &mut last_pts, &cache, &converter)
                    {
                        return;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return,
            }
            continue;
        }

        // Sync the epoch to the head frame: on session start, and again
        // whenever timestamps wrap backwards (loop restart).
        if let Some(head) = cache.next_due() {
            if clock.waiting_first {
                tracing::debug!("first frame at {:?}, starting pacing clock", head);
                clock.sync_to(head);
            } else if last_pts.is_some_and(|prev| head < prev) {
                tracing::debug!("timestamp wrap to {:?}, re-syncing pacing clock", head);
                clock.sync_to(head);
            }
        }

        let position = clock.position();
        if let Some(buffer) = cache.dequeue_due(position) {
            let pts = buffer.pts;
            tracing::trace!("presenting buffer at {:?} (position {:?})", pts, position);
            sink.submit(buffer);
            last_pts = Some(pts);
            *last_presented.lock() = Some(pts);
            continue;
        }

        // Sleep until the head is due; the job channel doubles as the
        // wakeup for control commands. Capped so a sparse-timestamp gap
        // still re-evaluates at a bounded interval.
        let wait = match cache.next_due() {
            Some(due) => due
                .saturating_sub(position)
                .max(Duration::from_millis(1))
                .min(Duration::from_millis(100)),
            None => IDLE_TICK,
        };
        match jobs_rx.recv_timeout(wait) {
            Ok(job) => {
                if let JobOutcome::Shutdown =
                    handle_job(job, &mut clock, &mut last_pts, &cache, &converter)
                {
                    return;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}
