// Playback engine - one session at a time behind a single lock
//
// Every mutation goes through the core mutex: API calls, the fade ramp, the
// duration cap and the completion poller all serialize on it. Timer callbacks
// carry the epoch they were spawned under and no-op once it moves on, so a
// superseded session can never touch the output again.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::output::AudioOutput;
use super::publisher::StatePublisher;
use super::{
    EngineEvent, EngineTuning, PlayMode, PlaybackOrigin, PlaybackSnapshot, StartRequest,
    StopReason, Transport, TrackRef,
};
use crate::error::PlaybackError;

const MIN_SPEED: f32 = 0.5;
const MAX_SPEED: f32 = 3.0;

struct FadeRamp {
    steps_total: u32,
    steps_done: u32,
}

struct EngineCore {
    output: Box<dyn AudioOutput>,
    phase: Transport,
    queue: Vec<TrackRef>,
    index: usize,
    mode: PlayMode,
    origin: PlaybackOrigin,
    session: Uuid,
    /// Bumped whenever a session starts or ends; stale timers compare
    /// against it and bail.
    epoch: u64,
    /// Volume currently applied at the output. Mid-fade this trails the dial.
    volume: f32,
    /// Dial position, and the fade ramp's target.
    target_volume: f32,
    speed: f32,
    fade: Option<FadeRamp>,
    fade_task: Option<JoinHandle<()>>,
    cap_task: Option<JoinHandle<()>>,
    last_stop: Option<StopReason>,
}

struct EngineInner {
    core: Mutex<EngineCore>,
    publisher: StatePublisher,
    events: Option<mpsc::UnboundedSender<EngineEvent>>,
    tuning: EngineTuning,
}

/// Cheap-to-clone handle; every clone drives the same transport.
#[derive(Clone)]
pub struct PlaybackEngine {
    inner: Arc<EngineInner>,
}

impl PlaybackEngine {
    /// Build the engine and spawn its completion poller. Needs a running
    /// tokio runtime.
    pub fn new(
        output: Box<dyn AudioOutput>,
        tuning: EngineTuning,
        events: Option<mpsc::UnboundedSender<EngineEvent>>,
    ) -> Self {
        let initial_volume = tuning.initial_volume.clamp(0.0, 1.0);
        let initial = PlaybackSnapshot {
            volume: initial_volume,
            ..PlaybackSnapshot::default()
        };

        let engine = Self {
            inner: Arc::new(EngineInner {
                core: Mutex::new(EngineCore {
                    output,
                    phase: Transport::Stopped,
                    queue: Vec::new(),
                    index: 0,
                    mode: PlayMode::Sequential,
                    origin: PlaybackOrigin::Manual,
                    session: Uuid::nil(),
                    epoch: 0,
                    volume: initial_volume,
                    target_volume: initial_volume,
                    speed: 1.0,
                    fade: None,
                    fade_task: None,
                    cap_task: None,
                    last_stop: None,
                }),
                publisher: StatePublisher::new(initial),
                events,
                tuning,
            }),
        };

        engine.spawn_poller();
        engine
    }

    /// Begin a session, superseding whatever is running. Returns the new
    /// session id once the first playable track is on the output.
    pub async fn start(&self, request: StartRequest) -> Result<Uuid, PlaybackError> {
        let StartRequest {
            queue,
            start_index,
            mode,
            volume,
            fade_in_seconds,
            duration_cap_minutes,
            origin,
        } = request;

        if queue.is_empty() {
            return Err(PlaybackError::EmptyQueue);
        }
        if start_index >= queue.len() {
            return Err(PlaybackError::BadStartIndex {
                index: start_index,
                len: queue.len(),
            });
        }
        if volume > 100 {
            return Err(PlaybackError::VolumeOutOfRange(volume));
        }

        let inner = &self.inner;
        let mut core = inner.core.lock().await;

        if let Some(task) = core.fade_task.take() {
            task.abort();
        }
        if let Some(task) = core.cap_task.take() {
            task.abort();
        }
        if core.phase.is_active() {
            let old = core.session;
            core.output.stop();
            info!("Superseding playback session {}", old);
            inner.emit(EngineEvent::SessionEnded {
                session: old,
                reason: StopReason::Requested,
            });
        }

        let session = Uuid::new_v4();
        core.session = session;
        core.epoch += 1;
        let epoch = core.epoch;
        core.queue = queue;
        core.index = start_index;
        core.mode = mode;
        core.origin = origin;
        core.target_volume = volume as f32 / 100.0;
        core.last_stop = None;
        core.phase = Transport::Starting;

        core.fade = if fade_in_seconds > 0 && core.target_volume > 0.0 {
            let step_ms = inner.tuning.fade_step.as_millis().max(1);
            let steps_total = ((fade_in_seconds as u128 * 1000) / step_ms).max(1) as u32;
            Some(FadeRamp {
                steps_total,
                steps_done: 0,
            })
        } else {
            None
        };
        core.volume = if core.fade.is_some() {
            0.0
        } else {
            core.target_volume
        };

        inner.publish(&core);

        let opened = inner.open_walk(&mut core, start_index as i64, 1, mode == PlayMode::Loop);
        if !opened {
            inner.teardown(&mut core, StopReason::QueueFailed);
            return Err(PlaybackError::QueueFailed);
        }

        if core.fade.is_some() {
            core.fade_task = Some(self.spawn_fade(epoch));
        }
        if let Some(cap) = duration_cap_minutes {
            // the cap runs on the wall clock; pausing does not stretch it
            core.cap_task = Some(self.spawn_cap(epoch, Duration::from_secs(cap as u64 * 60)));
        }

        inner.publish(&core);
        info!(
            "Started playback session {} ({} tracks, {} mode)",
            session,
            core.queue.len(),
            core.mode.mode_tag()
        );
        Ok(session)
    }

    /// Stop the current session. Returns false when nothing was running.
    pub async fn stop(&self) -> bool {
        let mut core = self.inner.core.lock().await;
        if !core.phase.is_active() {
            return false;
        }
        self.inner.teardown(&mut core, StopReason::Requested);
        true
    }

    /// Returns true if a running track was paused.
    pub async fn pause(&self) -> bool {
        let mut core = self.inner.core.lock().await;
        match core.phase {
            Transport::Playing | Transport::FadingIn => {
                core.output.pause();
                core.phase = Transport::Paused;
                debug!("Playback paused");
                self.inner.publish(&core);
                true
            }
            _ => false,
        }
    }

    /// Returns true if a paused track was resumed. A session paused mid-fade
    /// picks its ramp back up where it stopped.
    pub async fn resume(&self) -> bool {
        let mut core = self.inner.core.lock().await;
        if core.phase != Transport::Paused {
            return false;
        }
        core.output.resume();
        core.phase = if core.fade.is_some() {
            Transport::FadingIn
        } else {
            Transport::Playing
        };
        debug!("Playback resumed");
        self.inner.publish(&core);
        true
    }

    /// Move to the next queue slot. Loop mode wraps; the other modes no-op
    /// at the end of the queue and report false.
    pub async fn skip_next(&self) -> Result<bool, PlaybackError> {
        let mut core = self.inner.core.lock().await;
        if !core.phase.is_active() || core.queue.is_empty() {
            return Ok(false);
        }
        let len = core.queue.len();
        let (start, wrap) = if core.mode == PlayMode::Loop {
            ((core.index + 1) % len, true)
        } else if core.index + 1 < len {
            (core.index + 1, false)
        } else {
            debug!("Skip next at queue end, ignoring");
            return Ok(false);
        };

        if self.inner.open_walk(&mut core, start as i64, 1, wrap) {
            self.inner.publish(&core);
            Ok(true)
        } else {
            self.inner.teardown(&mut core, StopReason::QueueFailed);
            Err(PlaybackError::QueueFailed)
        }
    }

    /// Move to the previous queue slot, walking further back past tracks
    /// that fail to open. Mirror of `skip_next`.
    pub async fn skip_previous(&self) -> Result<bool, PlaybackError> {
        let mut core = self.inner.core.lock().await;
        if !core.phase.is_active() || core.queue.is_empty() {
            return Ok(false);
        }
        let len = core.queue.len();
        let (start, wrap) = if core.mode == PlayMode::Loop {
            ((core.index + len - 1) % len, true)
        } else if core.index > 0 {
            (core.index - 1, false)
        } else {
            debug!("Skip previous at queue start, ignoring");
            return Ok(false);
        };

        if self.inner.open_walk(&mut core, start as i64, -1, wrap) {
            self.inner.publish(&core);
            Ok(true)
        } else {
            self.inner.teardown(&mut core, StopReason::QueueFailed);
            Err(PlaybackError::QueueFailed)
        }
    }

    /// Set the dial, clamped to 0.0-1.0. Mid-fade this retargets the ramp
    /// without resetting its progress; otherwise it applies immediately.
    pub async fn set_volume(&self, volume: f32) -> f32 {
        let volume = volume.clamp(0.0, 1.0);
        let mut core = self.inner.core.lock().await;
        core.target_volume = volume;
        if core.fade.is_none() {
            core.volume = volume;
            core.output.set_volume(volume);
        }
        self.inner.publish(&core);
        volume
    }

    /// Set playback speed, clamped to 0.5-3.0. Applies to the live track.
    pub async fn set_speed(&self, speed: f32) -> f32 {
        let speed = speed.clamp(MIN_SPEED, MAX_SPEED);
        let mut core = self.inner.core.lock().await;
        core.speed = speed;
        core.output.set_speed(speed);
        self.inner.publish(&core);
        speed
    }

    /// Latest published state, without touching the engine lock.
    pub fn snapshot(&self) -> PlaybackSnapshot {
        self.inner.publisher.snapshot()
    }

    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<PlaybackSnapshot> {
        self.inner.publisher.subscribe()
    }

    fn spawn_poller(&self) {
        let inner = self.inner.clone();
        let poll = inner.tuning.track_poll;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll);
            loop {
                ticker.tick().await;
                let mut core = inner.core.lock().await;
                if !matches!(core.phase, Transport::Playing | Transport::FadingIn) {
                    continue;
                }
                if core.output.is_finished() {
                    inner.advance(&mut core);
                }
            }
        });
    }

    fn spawn_fade(&self, epoch: u64) -> JoinHandle<()> {
        let inner = self.inner.clone();
        let step = inner.tuning.fade_step;
        tokio::spawn(async move {
            loop {
                sleep(step).await;
                let mut core = inner.core.lock().await;
                if core.epoch != epoch {
                    return;
                }
                if core.phase == Transport::Paused {
                    continue;
                }
                let (finished, progress) = match core.fade.as_mut() {
                    None => return,
                    Some(fade) => {
                        fade.steps_done += 1;
                        (
                            fade.steps_done >= fade.steps_total,
                            fade.steps_done as f32 / fade.steps_total as f32,
                        )
                    }
                };
                core.volume = if finished {
                    core.target_volume
                } else {
                    core.target_volume * progress
                };
                let volume = core.volume;
                core.output.set_volume(volume);
                if finished {
                    core.fade = None;
                    if core.phase == Transport::FadingIn {
                        core.phase = Transport::Playing;
                    }
                    debug!("Fade-in complete at volume {:.2}", volume);
                }
                inner.publish(&core);
                if finished {
                    return;
                }
            }
        })
    }

    fn spawn_cap(&self, epoch: u64, cap: Duration) -> JoinHandle<()> {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let deadline = Instant::now() + cap;
            sleep_until(deadline).await;
            let mut core = inner.core.lock().await;
            if core.epoch != epoch {
                return;
            }
            info!("Duration cap elapsed, stopping session");
            inner.teardown(&mut core, StopReason::CapElapsed);
        })
    }
}

// Internals. Everything below runs with the core lock held.
impl EngineInner {
    /// React to the current track playing out.
    fn advance(&self, core: &mut EngineCore) {
        let len = core.queue.len();
        if len == 0 {
            self.teardown(core, StopReason::QueueExhausted);
            return;
        }
        match core.mode {
            PlayMode::Single => {
                if self.try_open(core, core.index) {
                    self.publish(core);
                } else {
                    self.teardown(core, StopReason::QueueFailed);
                }
            }
            PlayMode::Loop => {
                if self.open_walk(core, ((core.index + 1) % len) as i64, 1, true) {
                    self.publish(core);
                } else {
                    self.teardown(core, StopReason::QueueFailed);
                }
            }
            PlayMode::Sequential | PlayMode::Random => {
                if core.index + 1 >= len {
                    info!("Queue finished");
                    self.teardown(core, StopReason::QueueExhausted);
                } else if self.open_walk(core, (core.index + 1) as i64, 1, false) {
                    self.publish(core);
                } else {
                    self.teardown(core, StopReason::QueueFailed);
                }
            }
        }
    }

    /// Try queue slots from `start`, stepping by `dir`, until one opens.
    /// Without `wrap` the walk stops at the queue edge. At most one full
    /// cycle of attempts.
    fn open_walk(&self, core: &mut EngineCore, start: i64, dir: i64, wrap: bool) -> bool {
        let len = core.queue.len() as i64;
        let mut idx = start;
        for _ in 0..len {
            if idx < 0 || idx >= len {
                if !wrap {
                    return false;
                }
                idx = (idx + len) % len;
            }
            if self.try_open(core, idx as usize) {
                return true;
            }
            idx += dir;
        }
        false
    }

    fn try_open(&self, core: &mut EngineCore, idx: usize) -> bool {
        let track = core.queue[idx].clone();
        match core.output.open(&track, core.volume, core.speed) {
            Ok(()) => {
                core.index = idx;
                core.phase = if core.fade.is_some() {
                    Transport::FadingIn
                } else {
                    Transport::Playing
                };
                info!("Playing track '{}' (queue position {})", track.name, idx);
                self.emit(EngineEvent::TrackStarted {
                    session: core.session,
                    track,
                    origin: core.origin,
                });
                true
            }
            Err(e) => {
                warn!("Failed to open track '{}', skipping: {}", track.name, e);
                self.emit(EngineEvent::TrackFailed {
                    session: core.session,
                    track_id: track.id,
                    name: track.name,
                    reason: e.to_string(),
                });
                false
            }
        }
    }

    /// End the session: kill timers, silence the output, return to rest.
    fn teardown(&self, core: &mut EngineCore, reason: StopReason) {
        if let Some(task) = core.fade_task.take() {
            task.abort();
        }
        if let Some(task) = core.cap_task.take() {
            task.abort();
        }
        core.output.stop();
        core.queue.clear();
        core.index = 0;
        core.fade = None;
        core.phase = Transport::Stopped;
        core.last_stop = Some(reason);
        // the dial keeps its position for the next session
        core.volume = core.target_volume;
        core.origin = PlaybackOrigin::Manual;
        core.epoch += 1;
        let session = core.session;
        info!("Playback session {} ended: {:?}", session, reason);
        self.emit(EngineEvent::SessionEnded { session, reason });
        self.publish(core);
    }

    fn publish(&self, core: &EngineCore) {
        let active = core.phase.is_active();
        let current = if active { core.queue.get(core.index) } else { None };
        self.publisher.publish(PlaybackSnapshot {
            phase: core.phase,
            is_playing: matches!(core.phase, Transport::Playing | Transport::FadingIn),
            current_track_id: current.map(|t| t.id),
            current_track_name: current.map(|t| t.name.clone()),
            volume: core.volume,
            speed: core.speed,
            play_mode: core.mode,
            queue: core.queue.iter().map(|t| t.id).collect(),
            current_index: if active { Some(core.index) } else { None },
            scheduled_task_id: core.origin.task_id(),
            session: if active { Some(core.session) } else { None },
            last_stop: core.last_stop,
        });
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}
