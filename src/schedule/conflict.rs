// Conflict detection - advisory overlap checks between scheduled tasks
// Pure functions over task shapes; callers gather windows, we just compare them.

use serde::Serialize;

use super::rule::RepeatRule;

/// Window an existing task is expected to occupy.
#[derive(Debug, Clone)]
pub struct TaskWindow {
    pub task_id: i64,
    pub name: String,
    pub hour: u8,
    pub minute: u8,
    pub repeat: RepeatRule,
    pub window_minutes: u32,
}

/// Task shape being checked. `task_id` is set when editing an existing task
/// so it does not report a conflict with itself.
#[derive(Debug, Clone)]
pub struct CandidateWindow {
    pub task_id: Option<i64>,
    pub hour: u8,
    pub minute: u8,
    pub repeat: RepeatRule,
    pub window_minutes: u32,
}

/// One reported overlap. Advisory only; saves go through regardless.
#[derive(Debug, Clone, Serialize)]
pub struct TaskConflict {
    pub task_id: i64,
    pub task_name: String,
    pub hour: u8,
    pub minute: u8,
    pub window_minutes: u32,
}

impl TaskConflict {
    /// "HH:MM-HH:MM" for log lines and list output. Ranges past midnight
    /// are shown clipped at 24:00 since windows never wrap to the next day.
    pub fn time_range(&self) -> String {
        let start = self.hour as u32 * 60 + self.minute as u32;
        let end = (start + self.window_minutes).min(24 * 60);
        format!(
            "{:02}:{:02}-{:02}:{:02}",
            start / 60,
            start % 60,
            end / 60,
            end % 60
        )
    }
}

/// Minutes a task is assumed to occupy. An explicit duration cap wins;
/// otherwise the playlist's total length is rounded up, with a one minute
/// floor so zero-length playlists still occupy their start minute.
pub fn assumed_window_minutes(duration_cap_minutes: Option<u32>, playlist_seconds: f64) -> u32 {
    match duration_cap_minutes {
        Some(cap) => cap,
        None => {
            let estimated = (playlist_seconds.max(0.0) / 60.0).ceil() as u32;
            estimated.max(1)
        }
    }
}

/// Half-open overlap on minutes-from-midnight: windows that merely touch
/// (one ends exactly where the other starts) do not conflict. Windows that
/// run past midnight are not wrapped onto the next day.
fn windows_overlap(start_a: i64, len_a: i64, start_b: i64, len_b: i64) -> bool {
    start_a < start_b + len_b && start_b < start_a + len_a
}

/// Compare a candidate against every existing window and report overlaps.
/// Two tasks conflict when their repeat rules can land on the same day and
/// their minute windows overlap. Order of `existing` is preserved.
pub fn find_conflicts(candidate: &CandidateWindow, existing: &[TaskWindow]) -> Vec<TaskConflict> {
    let cand_start = candidate.hour as i64 * 60 + candidate.minute as i64;
    let cand_days = candidate.repeat.day_set();

    let mut conflicts = Vec::new();
    for task in existing {
        if candidate.task_id == Some(task.task_id) {
            continue;
        }
        if !cand_days.intersects(task.repeat.day_set()) {
            continue;
        }

        let start = task.hour as i64 * 60 + task.minute as i64;
        if windows_overlap(
            cand_start,
            candidate.window_minutes as i64,
            start,
            task.window_minutes as i64,
        ) {
            conflicts.push(TaskConflict {
                task_id: task.task_id,
                task_name: task.name.clone(),
                hour: task.hour,
                minute: task.minute,
                window_minutes: task.window_minutes,
            });
        }
    }
    conflicts
}
