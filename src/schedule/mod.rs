pub mod conflict;
pub mod rule;
pub mod runner;

pub use conflict::{assumed_window_minutes, find_conflicts, CandidateWindow, TaskConflict, TaskWindow};
pub use rule::{RepeatRule, WeekdaySet};
pub use runner::{CycleReport, Scheduler};
