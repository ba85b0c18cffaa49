// Scheduler - checks the clock and hands due tasks to the engine
//
// The loop wakes on a fixed tick and runs one cycle against the current
// local time. A task is due when the wall clock sits inside its h:m minute,
// its repeat rule covers today, and the execution log has no record for it
// this minute yet. When several tasks land on the same minute the highest
// priority one plays and the rest are logged as preempted.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Local, Timelike};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::playback::resolver::resolve_playlist;
use crate::playback::{PlaybackEngine, PlaybackOrigin, StartRequest};
use crate::schedule::rule::RepeatRule;
use crate::store::{ExecutionStatus, ScheduledTask, TaskStore};

/// What one scheduler pass did. Returned so tests can drive cycles with an
/// injected clock; the loop itself only logs it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// The winning task and how handing it off went.
    pub fired: Option<(i64, ExecutionStatus)>,
    /// Tasks that were due the same minute but lost on priority.
    pub preempted: Vec<i64>,
}

pub struct Scheduler {
    store: Arc<TaskStore>,
    engine: PlaybackEngine,
    tick: Duration,
}

impl Scheduler {
    pub fn new(store: Arc<TaskStore>, engine: PlaybackEngine, tick: Duration) -> Self {
        Self {
            store,
            engine,
            tick,
        }
    }

    /// Run the tick loop until the runtime shuts down.
    pub fn spawn(self) -> JoinHandle<()> {
        info!("Scheduler running, checking every {:?}", self.tick);
        tokio::spawn(async move {
            let mut ticker = interval(self.tick);
            // after a suspend there is no point replaying a backlog of ticks
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = self.run_cycle(Local::now()).await {
                    error!("Scheduler cycle failed: {}", e);
                }
            }
        })
    }

    /// One pass: fire whatever is due at `now`.
    pub async fn run_cycle(&self, now: DateTime<Local>) -> Result<CycleReport> {
        let mut report = CycleReport::default();
        let mut due = self.due_tasks(now).await?;
        if due.is_empty() {
            return Ok(report);
        }
        debug!("{} task(s) due at {}", due.len(), now.format("%H:%M"));

        // highest priority wins the minute; oldest task breaks ties
        due.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        let Some((winner, losers)) = due.split_first() else {
            return Ok(report);
        };

        for loser in losers {
            warn!(
                "Task '{}' preempted by higher-priority '{}'",
                loser.name, winner.name
            );
            if let Err(e) = self
                .store
                .record_execution(loser.id, now, 0, ExecutionStatus::Preempted)
                .await
            {
                error!("Failed to record preemption for task '{}': {}", loser.name, e);
            }
            report.preempted.push(loser.id);
        }

        let status = self.fire(winner, now).await;
        report.fired = Some((winner.id, status));
        Ok(report)
    }

    /// Enabled tasks whose minute is now, whose rule covers today, and which
    /// have not fired yet this minute.
    async fn due_tasks(&self, now: DateTime<Local>) -> Result<Vec<ScheduledTask>> {
        let minute_start = minute_start(now);
        let mut due = Vec::new();
        for task in self.store.enabled_tasks().await? {
            if u32::from(task.hour) != now.hour() || u32::from(task.minute) != now.minute() {
                continue;
            }
            if !task.repeat.matches_day(now.weekday()) {
                continue;
            }
            if self.store.has_fired_since(task.id, minute_start).await? {
                debug!("Task '{}' already fired this minute", task.name);
                continue;
            }
            due.push(task);
        }
        Ok(due)
    }

    /// Resolve the task's playlist and hand it to the engine, recording the
    /// outcome. Failures are logged here so one bad task never stalls the
    /// tick loop.
    async fn fire(&self, task: &ScheduledTask, now: DateTime<Local>) -> ExecutionStatus {
        info!(
            "Task '{}' due, starting playlist '{}'",
            task.name, task.playlist_name
        );

        let (status, track_count) = match resolve_playlist(&self.store, task.playlist_id).await {
            Err(e) => {
                error!("Failed to resolve playlist for task '{}': {}", task.name, e);
                (ExecutionStatus::Failed, 0)
            }
            Ok(resolved) if resolved.is_empty() => {
                warn!(
                    "Playlist '{}' for task '{}' has no tracks",
                    task.playlist_name, task.name
                );
                (ExecutionStatus::Empty, 0)
            }
            Ok(resolved) => {
                let track_count = resolved.tracks.len();
                let request = StartRequest {
                    queue: resolved.tracks,
                    start_index: 0,
                    mode: resolved.mode,
                    volume: task.volume,
                    fade_in_seconds: task.fade_in_seconds,
                    duration_cap_minutes: task.duration_cap_minutes,
                    origin: PlaybackOrigin::Scheduled { task_id: task.id },
                };
                match self.engine.start(request).await {
                    Ok(session) => {
                        info!(
                            "Task '{}' started session {} with {} tracks",
                            task.name, session, track_count
                        );
                        (ExecutionStatus::Started, track_count)
                    }
                    Err(e) => {
                        error!("Engine refused session for task '{}': {}", task.name, e);
                        (ExecutionStatus::Failed, track_count)
                    }
                }
            }
        };

        if let Err(e) = self
            .store
            .record_execution(task.id, now, track_count, status)
            .await
        {
            error!("Failed to record execution for task '{}': {}", task.name, e);
        }

        // one-shot tasks burn out once their minute has been consumed;
        // a transient failure keeps them armed for the next day
        if matches!(task.repeat, RepeatRule::Once)
            && matches!(status, ExecutionStatus::Started | ExecutionStatus::Empty)
        {
            match self.store.set_task_enabled(task.id, false).await {
                Ok(()) => info!("One-shot task '{}' disabled after firing", task.name),
                Err(e) => error!("Failed to disable one-shot task '{}': {}", task.name, e),
            }
        }

        status
    }
}

fn minute_start(now: DateTime<Local>) -> DateTime<Local> {
    now.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::output::fake::FakeOutput;
    use crate::playback::{EngineTuning, StopReason, Transport};
    use crate::store::TaskDraft;
    use chrono::TimeZone;
    use std::path::Path;
    use tokio::time::advance;

    struct Fixture {
        store: Arc<TaskStore>,
        engine: PlaybackEngine,
        fake: FakeOutput,
        playlist_id: i64,
    }

    impl Fixture {
        fn scheduler(&self) -> Scheduler {
            Scheduler::new(
                self.store.clone(),
                self.engine.clone(),
                Duration::from_secs(30),
            )
        }
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(TaskStore::open_in_memory().unwrap());
        let fake = FakeOutput::new();
        let engine = PlaybackEngine::new(Box::new(fake.clone()), EngineTuning::default(), None);

        let playlist_id = store.create_playlist("morning").await.unwrap();
        for (name, path) in [("dawn", "/music/dawn.mp3"), ("rise", "/music/rise.mp3")] {
            let track_id = store.add_track(name, Path::new(path), 120.0).await.unwrap();
            store.add_playlist_track(playlist_id, track_id).await.unwrap();
        }

        Fixture {
            store,
            engine,
            fake,
            playlist_id,
        }
    }

    fn draft(name: &str, hour: u8, minute: u8, playlist_id: i64) -> TaskDraft {
        TaskDraft {
            name: name.into(),
            hour,
            minute,
            repeat: RepeatRule::Daily,
            playlist_id,
            volume: 60,
            fade_in_seconds: 0,
            duration_cap_minutes: None,
            priority: 0,
        }
    }

    /// 2024-06-03 was a Monday.
    fn monday(hour: u32, minute: u32, second: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 6, 3, hour, minute, second)
            .unwrap()
    }

    /// 2024-06-08 was a Saturday.
    fn saturday(hour: u32, minute: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 6, 8, hour, minute, 10).unwrap()
    }

    /// Let freshly spawned timer tasks reach their first await.
    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    /// Advance the paused clock and let the engine's timer tasks catch up.
    async fn step_ms(ms: u64) {
        advance(Duration::from_millis(ms)).await;
        settle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn fires_the_task_whose_minute_is_now() {
        let fx = fixture().await;
        let task_id = fx
            .store
            .create_task(&draft("wake up", 7, 30, fx.playlist_id))
            .await
            .unwrap();

        let report = fx.scheduler().run_cycle(monday(7, 30, 5)).await.unwrap();

        assert_eq!(report.fired, Some((task_id, ExecutionStatus::Started)));
        assert!(report.preempted.is_empty());

        let snap = fx.engine.snapshot();
        assert_eq!(snap.phase, Transport::Playing);
        assert_eq!(snap.scheduled_task_id, Some(task_id));
        assert!(fx.fake.open_track().is_some());

        let log = fx.store.executions_for_task(task_id, 10).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].status, ExecutionStatus::Started);
        assert_eq!(log[0].resolved_track_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn ignores_tasks_outside_their_minute() {
        let fx = fixture().await;
        fx.store
            .create_task(&draft("wake up", 7, 30, fx.playlist_id))
            .await
            .unwrap();
        let scheduler = fx.scheduler();

        let before = scheduler.run_cycle(monday(7, 29, 59)).await.unwrap();
        let after = scheduler.run_cycle(monday(7, 31, 0)).await.unwrap();

        assert_eq!(before.fired, None);
        assert_eq!(after.fired, None);
        assert_eq!(fx.engine.snapshot().phase, Transport::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn repeat_rule_gates_the_day() {
        let fx = fixture().await;
        let mut d = draft("weekend brunch", 10, 0, fx.playlist_id);
        d.repeat = RepeatRule::Weekends;
        let task_id = fx.store.create_task(&d).await.unwrap();
        let scheduler = fx.scheduler();

        let weekday_run = scheduler.run_cycle(monday(10, 0, 5)).await.unwrap();
        assert_eq!(weekday_run.fired, None);

        let weekend_run = scheduler.run_cycle(saturday(10, 0)).await.unwrap();
        assert_eq!(weekend_run.fired, Some((task_id, ExecutionStatus::Started)));
    }

    #[tokio::test(start_paused = true)]
    async fn a_task_fires_once_per_minute() {
        let fx = fixture().await;
        let task_id = fx
            .store
            .create_task(&draft("wake up", 7, 30, fx.playlist_id))
            .await
            .unwrap();
        let scheduler = fx.scheduler();

        let first = scheduler.run_cycle(monday(7, 30, 5)).await.unwrap();
        let second = scheduler.run_cycle(monday(7, 30, 35)).await.unwrap();

        assert_eq!(first.fired, Some((task_id, ExecutionStatus::Started)));
        assert_eq!(second.fired, None);
        assert_eq!(
            fx.store.executions_for_task(task_id, 10).await.unwrap().len(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn highest_priority_takes_the_minute() {
        let fx = fixture().await;
        let quiet = fx.store.create_playlist("quiet").await.unwrap();
        let track = fx
            .store
            .add_track("hum", Path::new("/music/hum.mp3"), 30.0)
            .await
            .unwrap();
        fx.store.add_playlist_track(quiet, track).await.unwrap();

        let mut low = draft("background", 8, 0, quiet);
        low.priority = 1;
        let low_id = fx.store.create_task(&low).await.unwrap();

        let mut high = draft("announcement", 8, 0, fx.playlist_id);
        high.priority = 5;
        let high_id = fx.store.create_task(&high).await.unwrap();

        let report = fx.scheduler().run_cycle(monday(8, 0, 2)).await.unwrap();

        assert_eq!(report.fired, Some((high_id, ExecutionStatus::Started)));
        assert_eq!(report.preempted, vec![low_id]);
        assert_eq!(fx.engine.snapshot().scheduled_task_id, Some(high_id));

        let loser_log = fx.store.executions_for_task(low_id, 10).await.unwrap();
        assert_eq!(loser_log.len(), 1);
        assert_eq!(loser_log[0].status, ExecutionStatus::Preempted);

        // the whole minute stays settled, losers included
        let again = fx.scheduler().run_cycle(monday(8, 0, 40)).await.unwrap();
        assert_eq!(again.fired, None);
        assert!(again.preempted.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn equal_priority_goes_to_the_older_task() {
        let fx = fixture().await;
        let first_id = fx
            .store
            .create_task(&draft("first", 9, 15, fx.playlist_id))
            .await
            .unwrap();
        let second_id = fx
            .store
            .create_task(&draft("second", 9, 15, fx.playlist_id))
            .await
            .unwrap();

        let report = fx.scheduler().run_cycle(monday(9, 15, 0)).await.unwrap();

        assert_eq!(report.fired, Some((first_id, ExecutionStatus::Started)));
        assert_eq!(report.preempted, vec![second_id]);
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_tasks_disable_after_firing() {
        let fx = fixture().await;
        let mut d = draft("single reminder", 14, 0, fx.playlist_id);
        d.repeat = RepeatRule::Once;
        let task_id = fx.store.create_task(&d).await.unwrap();

        let report = fx.scheduler().run_cycle(monday(14, 0, 3)).await.unwrap();
        assert_eq!(report.fired, Some((task_id, ExecutionStatus::Started)));

        let task = fx.store.get_task(task_id).await.unwrap().unwrap();
        assert!(!task.is_enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn daily_tasks_stay_enabled_after_firing() {
        let fx = fixture().await;
        let task_id = fx
            .store
            .create_task(&draft("wake up", 7, 30, fx.playlist_id))
            .await
            .unwrap();

        fx.scheduler().run_cycle(monday(7, 30, 5)).await.unwrap();

        let task = fx.store.get_task(task_id).await.unwrap().unwrap();
        assert!(task.is_enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_playlist_logs_empty_and_burns_a_one_shot() {
        let fx = fixture().await;
        let bare = fx.store.create_playlist("bare").await.unwrap();
        let mut d = draft("silence", 6, 0, bare);
        d.repeat = RepeatRule::Once;
        let task_id = fx.store.create_task(&d).await.unwrap();

        let report = fx.scheduler().run_cycle(monday(6, 0, 0)).await.unwrap();

        assert_eq!(report.fired, Some((task_id, ExecutionStatus::Empty)));
        assert_eq!(fx.engine.snapshot().phase, Transport::Stopped);

        let task = fx.store.get_task(task_id).await.unwrap().unwrap();
        assert!(!task.is_enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn engine_failure_is_logged_and_keeps_the_task_armed() {
        let fx = fixture().await;
        // every track in the playlist refuses to open
        for id in fx.store.playlist_tracks(fx.playlist_id).await.unwrap() {
            fx.fake.fail_on(id.track_id);
        }
        let mut d = draft("doomed", 7, 0, fx.playlist_id);
        d.repeat = RepeatRule::Once;
        let task_id = fx.store.create_task(&d).await.unwrap();

        let report = fx.scheduler().run_cycle(monday(7, 0, 20)).await.unwrap();

        assert_eq!(report.fired, Some((task_id, ExecutionStatus::Failed)));
        let log = fx.store.executions_for_task(task_id, 10).await.unwrap();
        assert_eq!(log[0].status, ExecutionStatus::Failed);

        // a failed one-shot gets to try again another day
        let task = fx.store.get_task(task_id).await.unwrap().unwrap();
        assert!(task.is_enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_tasks_never_fire() {
        let fx = fixture().await;
        let task_id = fx
            .store
            .create_task(&draft("muted", 7, 30, fx.playlist_id))
            .await
            .unwrap();
        fx.store.set_task_enabled(task_id, false).await.unwrap();

        let report = fx.scheduler().run_cycle(monday(7, 30, 5)).await.unwrap();
        assert_eq!(report.fired, None);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_session_carries_the_task_settings() {
        let fx = fixture().await;
        let mut d = draft("loud one", 7, 30, fx.playlist_id);
        d.volume = 90;
        d.duration_cap_minutes = Some(15);
        let task_id = fx.store.create_task(&d).await.unwrap();

        fx.scheduler().run_cycle(monday(7, 30, 5)).await.unwrap();

        let snap = fx.engine.snapshot();
        assert_eq!(snap.scheduled_task_id, Some(task_id));
        assert!((snap.volume - 0.9).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn a_fired_session_fades_in_and_plays_the_playlist_to_rest() {
        let fx = fixture().await;
        let third = fx
            .store
            .add_track("shine", Path::new("/music/shine.mp3"), 90.0)
            .await
            .unwrap();
        fx.store
            .add_playlist_track(fx.playlist_id, third)
            .await
            .unwrap();

        let mut d = draft("morning", 7, 0, fx.playlist_id);
        d.fade_in_seconds = 5;
        let task_id = fx.store.create_task(&d).await.unwrap();

        let report = fx.scheduler().run_cycle(monday(7, 0, 10)).await.unwrap();
        assert_eq!(report.fired, Some((task_id, ExecutionStatus::Started)));
        settle().await;

        let snap = fx.engine.snapshot();
        assert_eq!(snap.phase, Transport::FadingIn);
        assert_eq!(snap.queue.len(), 3);

        // 5 s fade at the default 100 ms step
        for _ in 0..50 {
            step_ms(100).await;
        }
        let snap = fx.engine.snapshot();
        assert_eq!(snap.phase, Transport::Playing);
        assert!((snap.volume - 0.6).abs() < 1e-6);

        for _ in 0..3 {
            fx.fake.finish_current();
            step_ms(300).await;
        }

        let snap = fx.engine.snapshot();
        assert_eq!(snap.phase, Transport::Stopped);
        assert_eq!(snap.last_stop, Some(StopReason::QueueExhausted));
        assert_eq!(snap.scheduled_task_id, None);

        let log = fx.store.executions_for_task(task_id, 10).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].resolved_track_count, 3);
    }
}
