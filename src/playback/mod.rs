pub mod engine;
pub mod output;
pub mod publisher;
pub mod resolver;

pub use engine::PlaybackEngine;
pub use output::{AudioOutput, SilentOutput};
#[cfg(feature = "audio")]
pub use output::RodioOutput;
pub use publisher::StatePublisher;
pub use resolver::ResolvedPlaylist;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One playable entry as the engine sees it. Resolved from the library
/// up front so playback never touches the database mid-session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRef {
    pub id: i64,
    pub name: String,
    pub path: PathBuf,
    pub duration_seconds: f64,
}

/// How the queue advances when a track finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayMode {
    Sequential,
    Random,
    Single,
    Loop,
}

impl PlayMode {
    /// Tag stored in the `play_mode` column.
    pub fn mode_tag(&self) -> &'static str {
        match self {
            PlayMode::Sequential => "sequential",
            PlayMode::Random => "random",
            PlayMode::Single => "single",
            PlayMode::Loop => "loop",
        }
    }

    pub fn from_tag(tag: &str) -> Option<PlayMode> {
        match tag {
            "sequential" => Some(PlayMode::Sequential),
            "random" => Some(PlayMode::Random),
            "single" => Some(PlayMode::Single),
            "loop" => Some(PlayMode::Loop),
            _ => None,
        }
    }
}

/// Where the transport currently sits. `Stopped` doubles as the resting
/// state between sessions; everything else implies a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    Stopped,
    Starting,
    FadingIn,
    Playing,
    Paused,
}

impl Transport {
    pub fn is_active(&self) -> bool {
        !matches!(self, Transport::Stopped)
    }
}

/// Why the last session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Requested,
    CapElapsed,
    QueueExhausted,
    QueueFailed,
}

/// Who asked for playback. Scheduled sessions carry their task id so the
/// published state can say which task is on the air.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackOrigin {
    Manual,
    Scheduled { task_id: i64 },
}

impl PlaybackOrigin {
    pub fn task_id(&self) -> Option<i64> {
        match self {
            PlaybackOrigin::Manual => None,
            PlaybackOrigin::Scheduled { task_id } => Some(*task_id),
        }
    }
}

/// Everything `PlaybackEngine::start` needs for one session.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub queue: Vec<TrackRef>,
    pub start_index: usize,
    pub mode: PlayMode,
    /// Target volume, 0-100.
    pub volume: u8,
    pub fade_in_seconds: u32,
    pub duration_cap_minutes: Option<u32>,
    pub origin: PlaybackOrigin,
}

impl StartRequest {
    /// Manual playback: no fade, no cap, current dial volume.
    pub fn manual(queue: Vec<TrackRef>, mode: PlayMode, volume: u8) -> Self {
        StartRequest {
            queue,
            start_index: 0,
            mode,
            volume,
            fade_in_seconds: 0,
            duration_cap_minutes: None,
            origin: PlaybackOrigin::Manual,
        }
    }
}

/// Fired on the engine's event channel as sessions progress.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    TrackStarted {
        session: Uuid,
        track: TrackRef,
        origin: PlaybackOrigin,
    },
    TrackFailed {
        session: Uuid,
        track_id: i64,
        name: String,
        reason: String,
    },
    SessionEnded {
        session: Uuid,
        reason: StopReason,
    },
}

/// Point-in-time view of the transport, published over a watch channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSnapshot {
    pub phase: Transport,
    /// True while audio is actually running (playing or fading in).
    pub is_playing: bool,
    pub current_track_id: Option<i64>,
    pub current_track_name: Option<String>,
    /// Current output volume, 0.0 - 1.0. Mid-fade this is the ramp position.
    pub volume: f32,
    pub speed: f32,
    pub play_mode: PlayMode,
    pub queue: Vec<i64>,
    pub current_index: Option<usize>,
    pub scheduled_task_id: Option<i64>,
    pub session: Option<Uuid>,
    pub last_stop: Option<StopReason>,
}

impl PlaybackSnapshot {
    /// True when the session on the air was started by the scheduler.
    pub fn scheduler_triggered(&self) -> bool {
        self.scheduled_task_id.is_some()
    }
}

impl Default for PlaybackSnapshot {
    fn default() -> Self {
        Self {
            phase: Transport::Stopped,
            is_playing: false,
            current_track_id: None,
            current_track_name: None,
            volume: 0.5,
            speed: 1.0,
            play_mode: PlayMode::Sequential,
            queue: Vec::new(),
            current_index: None,
            scheduled_task_id: None,
            session: None,
            last_stop: None,
        }
    }
}

/// Engine timing knobs. Tests shrink these; production reads them from config.
#[derive(Debug, Clone)]
pub struct EngineTuning {
    pub fade_step: Duration,
    pub track_poll: Duration,
    pub initial_volume: f32,
}

impl Default for EngineTuning {
    fn default() -> Self {
        Self {
            fade_step: Duration::from_millis(100),
            track_poll: Duration::from_millis(250),
            initial_volume: 0.5,
        }
    }
}

impl From<&crate::config::PlaybackConfig> for EngineTuning {
    fn from(config: &crate::config::PlaybackConfig) -> Self {
        Self {
            fade_step: Duration::from_millis(config.fade_step_ms.max(1)),
            track_poll: Duration::from_millis(config.track_poll_ms.max(1)),
            initial_volume: config.initial_volume.clamp(0.0, 1.0),
        }
    }
}
