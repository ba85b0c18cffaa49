// Daybell facade - the one handle callers hold
//
// Ties the task store, the conflict checker and the playback engine together
// behind validated operations. The scheduler runs against the same store and
// engine, so anything done here shows up in its next cycle.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

use crate::error::{DaybellError, Result};
use crate::playback::resolver::resolve_playlist;
use crate::playback::{PlayMode, PlaybackEngine, PlaybackSnapshot, StartRequest, TrackRef};
use crate::schedule::conflict::{
    assumed_window_minutes, find_conflicts, CandidateWindow, TaskConflict, TaskWindow,
};
use crate::store::{
    ExecutionRecord, Playlist, PlaylistTrack, ScheduledTask, TaskDraft, TaskStore, Track,
};

/// Clones share the same store and engine.
#[derive(Clone)]
pub struct Daybell {
    store: Arc<TaskStore>,
    engine: PlaybackEngine,
}

impl Daybell {
    pub fn new(store: Arc<TaskStore>, engine: PlaybackEngine) -> Self {
        Self { store, engine }
    }

    // Scheduled tasks

    /// Validate and store a new task. Overlaps with existing tasks are
    /// advisory; run `check_task_conflicts` first when they should block.
    pub async fn create_task(&self, draft: TaskDraft) -> Result<ScheduledTask> {
        draft.validate()?;
        let task_id = self.store.create_task(&draft).await?;
        info!(
            "Created task '{}' at {:02}:{:02}",
            draft.name, draft.hour, draft.minute
        );
        self.get_task(task_id).await
    }

    pub async fn update_task(&self, task_id: i64, draft: TaskDraft) -> Result<ScheduledTask> {
        draft.validate()?;
        self.store.update_task(task_id, &draft).await?;
        info!("Updated task '{}' ({})", draft.name, task_id);
        self.get_task(task_id).await
    }

    pub async fn delete_task(&self, task_id: i64) -> Result<()> {
        self.store.delete_task(task_id).await?;
        info!("Deleted task {}", task_id);
        Ok(())
    }

    /// Flip a task on or off; returns the new state.
    pub async fn toggle_task(&self, task_id: i64) -> Result<bool> {
        let enabled = self.store.toggle_task(task_id).await?;
        info!(
            "Task {} is now {}",
            task_id,
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(enabled)
    }

    pub async fn get_task(&self, task_id: i64) -> Result<ScheduledTask> {
        self.store
            .get_task(task_id)
            .await?
            .ok_or_else(|| DaybellError::not_found("task", task_id))
    }

    pub async fn tasks(&self) -> Result<Vec<ScheduledTask>> {
        self.store.get_tasks().await
    }

    /// Report which enabled tasks the draft would overlap with. Pass the
    /// task's own id when editing so it does not collide with itself.
    pub async fn check_task_conflicts(
        &self,
        draft: &TaskDraft,
        exclude_task_id: Option<i64>,
    ) -> Result<Vec<TaskConflict>> {
        draft.validate()?;
        let playlist_seconds = self.store.playlist_total_seconds(draft.playlist_id).await?;
        let candidate = CandidateWindow {
            task_id: exclude_task_id,
            hour: draft.hour,
            minute: draft.minute,
            repeat: draft.repeat,
            window_minutes: assumed_window_minutes(draft.duration_cap_minutes, playlist_seconds),
        };

        let mut windows = Vec::new();
        for task in self.store.enabled_tasks().await? {
            let seconds = self.store.playlist_total_seconds(task.playlist_id).await?;
            windows.push(TaskWindow {
                task_id: task.id,
                name: task.name,
                hour: task.hour,
                minute: task.minute,
                repeat: task.repeat,
                window_minutes: assumed_window_minutes(task.duration_cap_minutes, seconds),
            });
        }
        Ok(find_conflicts(&candidate, &windows))
    }

    // Playback

    /// Resolve a playlist and start it now at the current dial volume.
    pub async fn play_playlist(&self, playlist_id: i64) -> Result<Uuid> {
        let resolved = resolve_playlist(&self.store, playlist_id).await?;
        if resolved.is_empty() {
            return Err(DaybellError::validation(format!(
                "playlist '{}' has no tracks",
                resolved.name
            )));
        }
        let request = StartRequest::manual(resolved.tracks, resolved.mode, self.dial_percent());
        Ok(self.engine.start(request).await?)
    }

    /// Play one library track immediately.
    pub async fn play_track(&self, track_id: i64) -> Result<Uuid> {
        self.play_tracks(&[track_id]).await
    }

    /// Play an explicit list of library tracks, in the order given.
    pub async fn play_tracks(&self, track_ids: &[i64]) -> Result<Uuid> {
        if track_ids.is_empty() {
            return Err(DaybellError::validation("track list must not be empty"));
        }
        let mut queue = Vec::with_capacity(track_ids.len());
        for &track_id in track_ids {
            let track = self
                .store
                .get_track(track_id)
                .await?
                .ok_or_else(|| DaybellError::not_found("track", track_id))?;
            queue.push(TrackRef {
                id: track.id,
                name: track.name,
                path: track.path,
                duration_seconds: track.duration_seconds,
            });
        }
        let request = StartRequest::manual(queue, PlayMode::Sequential, self.dial_percent());
        Ok(self.engine.start(request).await?)
    }

    /// Play one file immediately, outside the library. It runs once.
    pub async fn play_file(&self, path: &Path) -> Result<Uuid> {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let track = TrackRef {
            id: 0,
            name,
            path: path.to_path_buf(),
            duration_seconds: 0.0,
        };
        let request =
            StartRequest::manual(vec![track], PlayMode::Sequential, self.dial_percent());
        Ok(self.engine.start(request).await?)
    }

    pub async fn pause(&self) -> bool {
        self.engine.pause().await
    }

    pub async fn resume(&self) -> bool {
        self.engine.resume().await
    }

    pub async fn stop(&self) -> bool {
        self.engine.stop().await
    }

    pub async fn next_track(&self) -> Result<bool> {
        Ok(self.engine.skip_next().await?)
    }

    pub async fn previous_track(&self) -> Result<bool> {
        Ok(self.engine.skip_previous().await?)
    }

    /// Set the dial, 0.0 - 1.0. Returns the value after clamping.
    pub async fn set_volume(&self, volume: f32) -> f32 {
        self.engine.set_volume(volume).await
    }

    /// Set playback speed, 0.5 - 3.0. Returns the value after clamping.
    pub async fn set_speed(&self, speed: f32) -> f32 {
        self.engine.set_speed(speed).await
    }

    pub fn playback_state(&self) -> PlaybackSnapshot {
        self.engine.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackSnapshot> {
        self.engine.subscribe()
    }

    // Library

    pub async fn add_track(&self, name: &str, path: &Path, duration_seconds: f64) -> Result<i64> {
        if name.trim().is_empty() {
            return Err(DaybellError::validation("track name must not be empty"));
        }
        self.store.add_track(name, path, duration_seconds).await
    }

    pub async fn tracks(&self) -> Result<Vec<Track>> {
        self.store.get_tracks().await
    }

    pub async fn create_playlist(&self, name: &str) -> Result<i64> {
        if name.trim().is_empty() {
            return Err(DaybellError::validation("playlist name must not be empty"));
        }
        let playlist_id = self.store.create_playlist(name).await?;
        info!("Created playlist '{}'", name);
        Ok(playlist_id)
    }

    pub async fn playlists(&self) -> Result<Vec<Playlist>> {
        self.store.get_playlists().await
    }

    pub async fn playlist_tracks(&self, playlist_id: i64) -> Result<Vec<PlaylistTrack>> {
        self.store.playlist_tracks(playlist_id).await
    }

    pub async fn add_playlist_track(&self, playlist_id: i64, track_id: i64) -> Result<i64> {
        self.store.add_playlist_track(playlist_id, track_id).await
    }

    pub async fn remove_playlist_track(&self, item_id: i64) -> Result<()> {
        self.store.remove_playlist_track(item_id).await
    }

    pub async fn set_play_mode(&self, playlist_id: i64, mode: PlayMode) -> Result<()> {
        self.store.set_play_mode(playlist_id, mode).await
    }

    /// Delete a playlist unless a scheduled task still points at it.
    pub async fn delete_playlist(&self, playlist_id: i64) -> Result<()> {
        let users = self.store.tasks_using_playlist(playlist_id).await?;
        if !users.is_empty() {
            return Err(DaybellError::validation(format!(
                "playlist is used by scheduled task(s): {}",
                users.join(", ")
            )));
        }
        self.store.delete_playlist(playlist_id).await?;
        info!("Deleted playlist {}", playlist_id);
        Ok(())
    }

    // Execution history

    pub async fn recent_executions(&self, limit: usize) -> Result<Vec<ExecutionRecord>> {
        self.store.recent_executions(limit).await
    }

    pub async fn task_executions(
        &self,
        task_id: i64,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>> {
        self.store.executions_for_task(task_id, limit).await
    }

    fn dial_percent(&self) -> u8 {
        (self.engine.snapshot().volume * 100.0).round() as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::output::fake::FakeOutput;
    use crate::playback::{EngineTuning, Transport};
    use crate::schedule::rule::RepeatRule;

    struct Fixture {
        bell: Daybell,
        fake: FakeOutput,
        playlist_id: i64,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(TaskStore::open_in_memory().unwrap());
        let fake = FakeOutput::new();
        let engine = PlaybackEngine::new(Box::new(fake.clone()), EngineTuning::default(), None);
        let bell = Daybell::new(store, engine);

        let playlist_id = bell.create_playlist("morning").await.unwrap();
        for (name, path, seconds) in [
            ("dawn", "/music/dawn.mp3", 240.0),
            ("rise", "/music/rise.mp3", 180.0),
        ] {
            let track_id = bell.add_track(name, Path::new(path), seconds).await.unwrap();
            bell.add_playlist_track(playlist_id, track_id).await.unwrap();
        }

        Fixture {
            bell,
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
            duration_cap_minutes: Some(10),
            priority: 0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn create_task_returns_the_stored_row() {
        let fx = fixture().await;

        let task = fx
            .bell
            .create_task(draft("wake up", 7, 30, fx.playlist_id))
            .await
            .unwrap();

        assert_eq!(task.name, "wake up");
        assert_eq!(task.playlist_name, "morning");
        assert!(task.is_enabled);
        assert_eq!(fx.bell.tasks().await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn create_task_rejects_bad_drafts_and_missing_playlists() {
        let fx = fixture().await;

        let bad = draft("late", 25, 0, fx.playlist_id);
        assert!(matches!(
            fx.bell.create_task(bad).await.unwrap_err(),
            DaybellError::Validation(_)
        ));

        let orphan = draft("orphan", 7, 0, 999);
        assert!(matches!(
            fx.bell.create_task(orphan).await.unwrap_err(),
            DaybellError::NotFound { kind: "playlist", .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn conflict_check_reports_overlapping_enabled_tasks() {
        let fx = fixture().await;
        let stored = fx
            .bell
            .create_task(draft("early show", 7, 30, fx.playlist_id))
            .await
            .unwrap();

        // 7:35 lands inside early show's 7:30 + 10 minute window
        let overlapping = draft("pirate show", 7, 35, fx.playlist_id);
        let conflicts = fx
            .bell
            .check_task_conflicts(&overlapping, None)
            .await
            .unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].task_id, stored.id);
        assert_eq!(conflicts[0].time_range(), "07:30-07:40");

        // 7:40 starts exactly when the window closes
        let touching = draft("late show", 7, 40, fx.playlist_id);
        assert!(fx
            .bell
            .check_task_conflicts(&touching, None)
            .await
            .unwrap()
            .is_empty());

        // disabled tasks hold no window
        fx.bell.toggle_task(stored.id).await.unwrap();
        assert!(fx
            .bell
            .check_task_conflicts(&overlapping, None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn conflict_check_skips_the_task_being_edited() {
        let fx = fixture().await;
        let stored = fx
            .bell
            .create_task(draft("early show", 7, 30, fx.playlist_id))
            .await
            .unwrap();

        let same_slot = draft("early show", 7, 30, fx.playlist_id);
        let conflicts = fx
            .bell
            .check_task_conflicts(&same_slot, Some(stored.id))
            .await
            .unwrap();
        assert!(conflicts.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn conflict_window_falls_back_to_playlist_length() {
        let fx = fixture().await;
        // 240s + 180s rounds up to 7 minutes: 8:00 - 8:07
        let mut uncapped = draft("uncapped", 8, 0, fx.playlist_id);
        uncapped.duration_cap_minutes = None;
        fx.bell.create_task(uncapped).await.unwrap();

        let inside = draft("inside", 8, 6, fx.playlist_id);
        assert_eq!(
            fx.bell
                .check_task_conflicts(&inside, None)
                .await
                .unwrap()
                .len(),
            1
        );

        let outside = draft("outside", 8, 7, fx.playlist_id);
        assert!(fx
            .bell
            .check_task_conflicts(&outside, None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn delete_playlist_is_guarded_by_referencing_tasks() {
        let fx = fixture().await;
        let task = fx
            .bell
            .create_task(draft("wake up", 7, 30, fx.playlist_id))
            .await
            .unwrap();

        let err = fx.bell.delete_playlist(fx.playlist_id).await.unwrap_err();
        match err {
            DaybellError::Validation(msg) => assert!(msg.contains("wake up")),
            other => panic!("expected Validation, got {other:?}"),
        }

        fx.bell.delete_task(task.id).await.unwrap();
        fx.bell.delete_playlist(fx.playlist_id).await.unwrap();
        assert!(fx.bell.playlists().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn play_playlist_starts_a_manual_session_at_dial_volume() {
        let fx = fixture().await;

        fx.bell.set_volume(0.7).await;
        fx.bell.play_playlist(fx.playlist_id).await.unwrap();

        let snap = fx.bell.playback_state();
        assert_eq!(snap.phase, Transport::Playing);
        assert_eq!(snap.scheduled_task_id, None);
        assert_eq!(snap.queue.len(), 2);
        assert!((snap.volume - 0.7).abs() < 1e-6);
        assert!(fx.fake.open_track().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn play_playlist_rejects_an_empty_playlist() {
        let fx = fixture().await;
        let bare = fx.bell.create_playlist("bare").await.unwrap();

        assert!(matches!(
            fx.bell.play_playlist(bare).await.unwrap_err(),
            DaybellError::Validation(_)
        ));
        assert_eq!(fx.bell.playback_state().phase, Transport::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn play_tracks_queues_exactly_the_ids_given() {
        let fx = fixture().await;
        let tracks = fx.bell.tracks().await.unwrap();
        let dawn = tracks.iter().find(|t| t.name == "dawn").unwrap().id;
        let rise = tracks.iter().find(|t| t.name == "rise").unwrap().id;

        fx.bell.play_tracks(&[rise, dawn]).await.unwrap();
        let snap = fx.bell.playback_state();
        assert_eq!(snap.queue, vec![rise, dawn]);
        assert_eq!(snap.current_track_id, Some(rise));

        assert!(matches!(
            fx.bell.play_tracks(&[rise, 999]).await.unwrap_err(),
            DaybellError::NotFound { kind: "track", .. }
        ));
        assert!(matches!(
            fx.bell.play_tracks(&[]).await.unwrap_err(),
            DaybellError::Validation(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn play_file_queues_a_single_ad_hoc_track() {
        let fx = fixture().await;

        fx.bell.play_file(Path::new("/tmp/chime.mp3")).await.unwrap();

        let snap = fx.bell.playback_state();
        assert_eq!(snap.phase, Transport::Playing);
        assert_eq!(snap.queue, vec![0]);
        assert_eq!(snap.current_track_name.as_deref(), Some("chime"));
    }

    #[tokio::test(start_paused = true)]
    async fn transport_controls_pass_through() {
        let fx = fixture().await;
        fx.bell.play_playlist(fx.playlist_id).await.unwrap();

        assert!(fx.bell.pause().await);
        assert_eq!(fx.bell.playback_state().phase, Transport::Paused);
        assert!(fx.bell.resume().await);
        assert!(fx.bell.next_track().await.unwrap());
        assert!(!fx.bell.next_track().await.unwrap());
        assert!(fx.bell.stop().await);
        assert!(!fx.bell.stop().await);
    }
}
