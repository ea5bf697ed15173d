/*!
Playback scheduler.

Drives stills, timed sequences and device-side animations on one display.
Playback runs as a spawned task stepping through an explicit state machine:

```text
Idle -> Playing { index, total } -> Idle
```

Only one playback is active per scheduler. Starting another stops the
current one first. Stopping clears the playback's `enabled` flag and wakes its
pending timer; the task observes the flag before its next step, so a write
already in flight still completes but nothing after it is sent.
*/

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pixoo_codec::protocol::DEFAULT_SPEED_MS;
use pixoo_codec::Pacing;
use tokio::sync::{oneshot, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::cache::FrameRef;
use crate::display::{Display, StillInfo};
use crate::error::Result;

pub type SharedDisplay = Arc<Mutex<Display>>;

/// How a playback ended when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// Ran to its natural end
    Finished,
    /// Stopped by `stop()` or by a newer playback
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Playing { index: usize, total: usize },
}

/// The playback variants callers can request
#[derive(Debug, Clone)]
pub enum Playback {
    /// One frame sent once
    Still(FrameRef),
    /// Frames sent one by one as stills, `interval_ms` apart (0: each frame's own speed)
    Sequence {
        frames: Vec<FrameRef>,
        interval_ms: u32,
        looped: bool,
    },
    /// Frames sent once as a device-side animation
    Animation {
        frames: Vec<FrameRef>,
        speed_ms: u16,
        looped: bool,
        pacing: Pacing,
    },
}

/// Resolves once a playback ends
pub struct Completion(oneshot::Receiver<Result<PlaybackOutcome>>);

impl Completion {
    /// Wait for the outcome; a playback task that vanished counts as cancelled
    pub async fn wait(self) -> Result<PlaybackOutcome> {
        self.0.await.unwrap_or(Ok(PlaybackOutcome::Cancelled))
    }
}

/// The active playback: its flag, its timer wake-up and its task
struct PlaybackState {
    enabled: Arc<AtomicBool>,
    wake: Arc<Notify>,
    _task: JoinHandle<()>,
}

/// What a playback task sees of the scheduler
#[derive(Clone)]
struct StepContext {
    display: SharedDisplay,
    enabled: Arc<AtomicBool>,
    wake: Arc<Notify>,
    progress: Arc<watch::Sender<SchedulerState>>,
    generation: u64,
    current: Arc<AtomicU64>,
}

impl StepContext {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.generation
    }

    fn report(&self, index: usize, total: usize) {
        if self.is_current() {
            self.progress.send_replace(SchedulerState::Playing { index, total });
        }
    }

    fn finish(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        if self.is_current() {
            self.progress.send_replace(SchedulerState::Idle);
        }
    }

    /// Sleep for `ms`, returning early when stopped
    async fn delay(&self, ms: u32) {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(ms as u64)) => {}
            _ = self.wake.notified() => {}
        }
    }
}

pub struct Scheduler {
    display: SharedDisplay,
    active: Option<PlaybackState>,
    progress: Arc<watch::Sender<SchedulerState>>,
    generation: Arc<AtomicU64>,
}

impl Scheduler {
    pub fn new(display: SharedDisplay) -> Self {
        let (progress, _) = watch::channel(SchedulerState::Idle);
        Self {
            display,
            active: None,
            progress: Arc::new(progress),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn display(&self) -> SharedDisplay {
        Arc::clone(&self.display)
    }

    pub fn state(&self) -> SchedulerState {
        *self.progress.borrow()
    }

    pub fn is_playing(&self) -> bool {
        self.state() != SchedulerState::Idle
    }

    /// Cancel the active playback, if any, and return to idle
    pub fn stop(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(state) = self.active.take() {
            debug!("Stopping playback");
            state.enabled.store(false, Ordering::SeqCst);
            state.wake.notify_one();
        }
        self.progress.send_replace(SchedulerState::Idle);
    }

    /// Send one frame as a still image right away
    pub async fn show_still(&self, frame: &FrameRef) -> Result<StillInfo> {
        self.display.lock().await.show_still(frame).await
    }

    pub fn play(&mut self, playback: Playback) -> Completion {
        match playback {
            Playback::Still(frame) => self.start(move |ctx| run_still(ctx, frame)),
            Playback::Sequence {
                frames,
                interval_ms,
                looped,
            } => self.play_sequence(frames, interval_ms, looped),
            Playback::Animation {
                frames,
                speed_ms,
                looped,
                pacing,
            } => self.play_animation(frames, speed_ms, looped, pacing),
        }
    }

    /// Show each frame as a still for `interval_ms`, optionally forever
    pub fn play_sequence(&mut self, frames: Vec<FrameRef>, interval_ms: u32, looped: bool) -> Completion {
        self.start(move |ctx| run_sequence(ctx, frames, interval_ms, looped))
    }

    /// Transmit frames once as an animation the device plays by itself
    ///
    /// `looped` is left to the device and never causes a resend.
    pub fn play_animation(&mut self, frames: Vec<FrameRef>, speed_ms: u16, looped: bool, pacing: Pacing) -> Completion {
        self.start(move |ctx| run_animation(ctx, frames, speed_ms, looped, pacing))
    }

    fn start<F, Fut>(&mut self, body: F) -> Completion
    where
        F: FnOnce(StepContext) -> Fut,
        Fut: Future<Output = Result<PlaybackOutcome>> + Send + 'static,
    {
        self.stop();

        let generation = self.generation.load(Ordering::SeqCst);
        let enabled = Arc::new(AtomicBool::new(true));
        let wake = Arc::new(Notify::new());
        let ctx = StepContext {
            display: Arc::clone(&self.display),
            enabled: Arc::clone(&enabled),
            wake: Arc::clone(&wake),
            progress: Arc::clone(&self.progress),
            generation,
            current: Arc::clone(&self.generation),
        };

        let (tx, rx) = oneshot::channel();
        let steps = body(ctx.clone());
        let task = tokio::spawn(async move {
            let result = steps.await;
            ctx.finish();

            match &result {
                Ok(outcome) => info!("Playback ended: {:?}", outcome),
                Err(e) => error!("Playback failed: {}", e),
            }
            let _ = tx.send(result);
        });

        self.active = Some(PlaybackState {
            enabled,
            wake,
            _task: task,
        });
        Completion(rx)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_still(ctx: StepContext, frame: FrameRef) -> Result<PlaybackOutcome> {
    if !ctx.is_enabled() {
        return Ok(PlaybackOutcome::Cancelled);
    }
    ctx.report(0, 1);
    ctx.display.lock().await.show_still(&frame).await?;
    Ok(PlaybackOutcome::Finished)
}

async fn run_sequence(ctx: StepContext, frames: Vec<FrameRef>, interval_ms: u32, looped: bool) -> Result<PlaybackOutcome> {
    let total = frames.len();
    if total == 0 {
        return Ok(PlaybackOutcome::Finished);
    }

    loop {
        for (index, frame) in frames.iter().enumerate() {
            if !ctx.is_enabled() {
                return Ok(PlaybackOutcome::Cancelled);
            }
            ctx.report(index, total);

            let info = ctx.display.lock().await.show_still(frame).await?;
            let interval = match (interval_ms, info.speed_ms) {
                (0, 0) => DEFAULT_SPEED_MS as u32,
                (0, speed) => speed,
                (interval, _) => interval,
            };
            ctx.delay(interval).await;
        }

        if !ctx.is_enabled() {
            return Ok(PlaybackOutcome::Cancelled);
        }
        if !looped {
            return Ok(PlaybackOutcome::Finished);
        }
    }
}

async fn run_animation(
    ctx: StepContext,
    frames: Vec<FrameRef>,
    speed_ms: u16,
    looped: bool,
    pacing: Pacing,
) -> Result<PlaybackOutcome> {
    if !ctx.is_enabled() {
        return Ok(PlaybackOutcome::Cancelled);
    }
    ctx.report(0, frames.len());

    let mut device = ctx.display.lock().await;
    info!(
        "[{}]: SEND ANIM {} frames, speed {} ms{}",
        device.address(),
        frames.len(),
        speed_ms,
        if looped { "" } else { ", no loop" }
    );
    device.send_animation(&frames, speed_ms, pacing).await?;

    Ok(PlaybackOutcome::Finished)
}
