pub mod database;

pub use database::TaskStore;

use serde::{Deserialize, Serialize};

use crate::error::DaybellError;
use crate::playback::PlayMode;
use crate::schedule::rule::RepeatRule;

/// A scheduled task as stored, joined with its playlist name.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledTask {
    pub id: i64,
    pub name: String,
    pub hour: u8,
    pub minute: u8,
    pub repeat: RepeatRule,
    pub playlist_id: i64,
    pub playlist_name: String,
    /// Target volume for the session, 0-100.
    pub volume: u8,
    pub fade_in_seconds: u32,
    /// Hard session length in minutes; `None` plays the queue out.
    pub duration_cap_minutes: Option<u32>,
    pub priority: i64,
    pub is_enabled: bool,
    pub created_at: String,
}

/// Fields callers supply when creating or updating a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDraft {
    pub name: String,
    pub hour: u8,
    pub minute: u8,
    pub repeat: RepeatRule,
    pub playlist_id: i64,
    pub volume: u8,
    pub fade_in_seconds: u32,
    pub duration_cap_minutes: Option<u32>,
    pub priority: i64,
}

impl TaskDraft {
    /// Shape checks that do not need the database.
    pub fn validate(&self) -> Result<(), DaybellError> {
        if self.name.trim().is_empty() {
            return Err(DaybellError::validation("task name must not be empty"));
        }
        if self.hour > 23 {
            return Err(DaybellError::validation(format!(
                "hour {} out of range (0-23)",
                self.hour
            )));
        }
        if self.minute > 59 {
            return Err(DaybellError::validation(format!(
                "minute {} out of range (0-59)",
                self.minute
            )));
        }
        if self.volume > 100 {
            return Err(DaybellError::validation(format!(
                "volume {} out of range (0-100)",
                self.volume
            )));
        }
        if self.duration_cap_minutes == Some(0) {
            return Err(DaybellError::validation(
                "duration cap must be at least one minute",
            ));
        }
        if let RepeatRule::Custom(set) = self.repeat {
            if set.is_empty() {
                return Err(DaybellError::validation(
                    "custom repeat needs at least one day",
                ));
            }
        }
        Ok(())
    }
}

/// Outcome of one scheduler firing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Playback was handed to the engine.
    Started,
    /// Resolution or engine start failed.
    Failed,
    /// The playlist resolved to zero tracks.
    Empty,
    /// A higher-priority task took the minute.
    Preempted,
}

impl ExecutionStatus {
    pub fn tag(&self) -> &'static str {
        match self {
            ExecutionStatus::Started => "started",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Empty => "empty",
            ExecutionStatus::Preempted => "preempted",
        }
    }

    pub fn from_tag(tag: &str) -> Option<ExecutionStatus> {
        match tag {
            "started" => Some(ExecutionStatus::Started),
            "failed" => Some(ExecutionStatus::Failed),
            "empty" => Some(ExecutionStatus::Empty),
            "preempted" => Some(ExecutionStatus::Preempted),
            _ => None,
        }
    }
}

/// One row of the append-only execution log.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub task_id: i64,
    pub fired_at: String,
    pub resolved_track_count: i64,
    pub status: ExecutionStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct Playlist {
    pub id: i64,
    pub name: String,
    pub play_mode: PlayMode,
    pub track_count: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Track {
    pub id: i64,
    pub name: String,
    pub path: std::path::PathBuf,
    pub duration_seconds: f64,
    pub play_count: i64,
    pub last_played: Option<String>,
}

/// A track in playlist order. `item_id` identifies the playlist entry
/// itself, so the same track can appear twice.
#[derive(Debug, Clone, Serialize)]
pub struct PlaylistTrack {
    pub item_id: i64,
    pub track_id: i64,
    pub name: String,
    pub path: std::path::PathBuf,
    pub duration_seconds: f64,
    pub position: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::rule::WeekdaySet;

    fn draft() -> TaskDraft {
        TaskDraft {
            name: "morning chime".into(),
            hour: 7,
            minute: 30,
            repeat: RepeatRule::Daily,
            playlist_id: 1,
            volume: 60,
            fade_in_seconds: 3,
            duration_cap_minutes: None,
            priority: 0,
        }
    }

    #[test]
    fn valid_draft_passes() {
        assert!(draft().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_fields() {
        let mut d = draft();
        d.hour = 24;
        assert!(d.validate().is_err());

        let mut d = draft();
        d.minute = 60;
        assert!(d.validate().is_err());

        let mut d = draft();
        d.volume = 101;
        assert!(d.validate().is_err());

        let mut d = draft();
        d.name = "   ".into();
        assert!(d.validate().is_err());

        let mut d = draft();
        d.duration_cap_minutes = Some(0);
        assert!(d.validate().is_err());
    }

    #[test]
    fn rejects_custom_rule_with_no_days() {
        let mut d = draft();
        d.repeat = RepeatRule::Custom(WeekdaySet::EMPTY);
        assert!(d.validate().is_err());
    }

    #[test]
    fn execution_status_tags_roundtrip() {
        for status in [
            ExecutionStatus::Started,
            ExecutionStatus::Failed,
            ExecutionStatus::Empty,
            ExecutionStatus::Preempted,
        ] {
            assert_eq!(ExecutionStatus::from_tag(status.tag()), Some(status));
        }
        assert_eq!(ExecutionStatus::from_tag("woke_up_late"), None);
    }
}
