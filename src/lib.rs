// Daybell Library - Core modules for scheduled audio playback
// Modular design makes it easy to swap out components

pub mod api;      // facade tying store, scheduler and engine together
pub mod config;   // settings on disk, defaults when missing
pub mod error;    // crate-wide error types
pub mod playback; // engine, outputs, playlist resolution
pub mod schedule; // repeat rules, conflict checks, the scheduler loop
pub mod store;    // sqlite persistence for tasks, playlists, history

// Export the stuff other modules actually use
pub use api::Daybell;
pub use config::Config;
pub use error::{DaybellError, PlaybackError, Result};
pub use playback::{
    EngineEvent, EngineTuning, PlayMode, PlaybackEngine, PlaybackSnapshot, StartRequest,
    StopReason, Transport,
};
pub use schedule::Scheduler;
pub use store::{ScheduledTask, TaskDraft, TaskStore};
