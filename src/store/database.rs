// SQLite storage - tracks, playlists, scheduled tasks and the execution log

use std::path::Path;

use chrono::{DateTime, Local};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::Mutex;
use tracing::warn;

use super::{
    ExecutionRecord, ExecutionStatus, Playlist, PlaylistTrack, ScheduledTask, TaskDraft, Track,
};
use crate::error::{DaybellError, Result};
use crate::playback::PlayMode;
use crate::schedule::rule::RepeatRule;

/// All persistence behind one connection. The mutex serializes access so the
/// store can be shared between the scheduler and API callers.
pub struct TaskStore {
    conn: Mutex<Connection>,
}

impl TaskStore {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        Self::setup(conn)
    }

    /// Private throwaway database, used by tests and the playback smoke bin.
    pub fn open_in_memory() -> Result<Self> {
        Self::setup(Connection::open_in_memory()?)
    }

    fn setup(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        Self::initialize_tables(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_tables(conn: &Connection) -> rusqlite::Result<()> {
        // Audio library
        conn.execute(
            "CREATE TABLE IF NOT EXISTS tracks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                path TEXT NOT NULL,
                duration REAL NOT NULL DEFAULT 0,
                play_count INTEGER NOT NULL DEFAULT 0,
                last_played TEXT,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS playlists (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                play_mode TEXT NOT NULL DEFAULT 'sequential',
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS playlist_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                playlist_id INTEGER NOT NULL REFERENCES playlists(id) ON DELETE CASCADE,
                track_id INTEGER NOT NULL REFERENCES tracks(id) ON DELETE CASCADE,
                position INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        // Scheduling
        conn.execute(
            "CREATE TABLE IF NOT EXISTS scheduled_tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                hour INTEGER NOT NULL,
                minute INTEGER NOT NULL,
                repeat_mode TEXT NOT NULL,
                custom_days TEXT,
                playlist_id INTEGER NOT NULL REFERENCES playlists(id),
                volume INTEGER NOT NULL DEFAULT 50,
                fade_in_seconds INTEGER NOT NULL DEFAULT 0,
                duration_minutes INTEGER,
                priority INTEGER NOT NULL DEFAULT 0,
                is_enabled INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        // Append-only firing audit. No foreign key on purpose: the log
        // outlives deleted tasks.
        conn.execute(
            "CREATE TABLE IF NOT EXISTS execution_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id INTEGER NOT NULL,
                fired_at TEXT NOT NULL,
                resolved_track_count INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_items_playlist ON playlist_items(playlist_id)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_log_task_fired ON execution_log(task_id, fired_at)",
            [],
        )?;

        Ok(())
    }

    // Tracks

    pub async fn add_track(&self, name: &str, path: &Path, duration_seconds: f64) -> Result<i64> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO tracks (name, path, duration) VALUES (?1, ?2, ?3)",
            params![name, path.to_string_lossy(), duration_seconds],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub async fn get_track(&self, track_id: i64) -> Result<Option<Track>> {
        let conn = self.conn.lock().await;
        let track = conn
            .query_row(
                "SELECT id, name, path, duration, play_count, last_played
                 FROM tracks WHERE id = ?1",
                params![track_id],
                row_to_track,
            )
            .optional()?;
        Ok(track)
    }

    pub async fn get_tracks(&self) -> Result<Vec<Track>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, name, path, duration, play_count, last_played
             FROM tracks ORDER BY id",
        )?;
        let tracks = stmt
            .query_map([], row_to_track)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tracks)
    }

    /// Bump the play counter after a track actually starts.
    pub async fn mark_track_played(&self, track_id: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE tracks SET play_count = play_count + 1, last_played = ?1 WHERE id = ?2",
            params![local_stamp(Local::now()), track_id],
        )?;
        Ok(())
    }

    // Playlists

    pub async fn create_playlist(&self, name: &str) -> Result<i64> {
        let conn = self.conn.lock().await;
        conn.execute("INSERT INTO playlists (name) VALUES (?1)", params![name])?;
        Ok(conn.last_insert_rowid())
    }

    pub async fn get_playlist(&self, playlist_id: i64) -> Result<Option<Playlist>> {
        let conn = self.conn.lock().await;
        let playlist = conn
            .query_row(
                "SELECT p.id, p.name, p.play_mode,
                        (SELECT COUNT(*) FROM playlist_items pi WHERE pi.playlist_id = p.id),
                        p.created_at
                 FROM playlists p WHERE p.id = ?1",
                params![playlist_id],
                row_to_playlist,
            )
            .optional()?;
        Ok(playlist)
    }

    pub async fn get_playlists(&self) -> Result<Vec<Playlist>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT p.id, p.name, p.play_mode,
                    (SELECT COUNT(*) FROM playlist_items pi WHERE pi.playlist_id = p.id),
                    p.created_at
             FROM playlists p ORDER BY p.id",
        )?;
        let playlists = stmt
            .query_map([], row_to_playlist)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(playlists)
    }

    pub async fn set_play_mode(&self, playlist_id: i64, mode: PlayMode) -> Result<()> {
        let conn = self.conn.lock().await;
        let updated = conn.execute(
            "UPDATE playlists SET play_mode = ?1 WHERE id = ?2",
            params![mode.mode_tag(), playlist_id],
        )?;
        if updated == 0 {
            return Err(DaybellError::not_found("playlist", playlist_id));
        }
        Ok(())
    }

    /// Items cascade away with the playlist. Tasks still pointing at it make
    /// the delete fail at the foreign key; callers check first.
    pub async fn delete_playlist(&self, playlist_id: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        let deleted = conn.execute(
            "DELETE FROM playlists WHERE id = ?1",
            params![playlist_id],
        )?;
        if deleted == 0 {
            return Err(DaybellError::not_found("playlist", playlist_id));
        }
        Ok(())
    }

    pub async fn add_playlist_track(&self, playlist_id: i64, track_id: i64) -> Result<i64> {
        let conn = self.conn.lock().await;
        if !row_exists(&conn, "playlists", playlist_id)? {
            return Err(DaybellError::not_found("playlist", playlist_id));
        }
        if !row_exists(&conn, "tracks", track_id)? {
            return Err(DaybellError::not_found("track", track_id));
        }
        conn.execute(
            "INSERT INTO playlist_items (playlist_id, track_id, position)
             VALUES (?1, ?2, COALESCE(
                 (SELECT MAX(position) + 1 FROM playlist_items WHERE playlist_id = ?1), 0))",
            params![playlist_id, track_id],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub async fn remove_playlist_track(&self, item_id: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        let deleted = conn.execute(
            "DELETE FROM playlist_items WHERE id = ?1",
            params![item_id],
        )?;
        if deleted == 0 {
            return Err(DaybellError::not_found("playlist item", item_id));
        }
        Ok(())
    }

    pub async fn playlist_tracks(&self, playlist_id: i64) -> Result<Vec<PlaylistTrack>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT pi.id, t.id, t.name, t.path, t.duration, pi.position
             FROM playlist_items pi
             JOIN tracks t ON t.id = pi.track_id
             WHERE pi.playlist_id = ?1
             ORDER BY pi.position, pi.id",
        )?;
        let tracks = stmt
            .query_map(params![playlist_id], row_to_playlist_track)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tracks)
    }

    pub async fn playlist_total_seconds(&self, playlist_id: i64) -> Result<f64> {
        let conn = self.conn.lock().await;
        let total: f64 = conn.query_row(
            "SELECT COALESCE(SUM(t.duration), 0)
             FROM playlist_items pi
             JOIN tracks t ON t.id = pi.track_id
             WHERE pi.playlist_id = ?1",
            params![playlist_id],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    /// Names of scheduled tasks pointing at a playlist, for delete guards.
    pub async fn tasks_using_playlist(&self, playlist_id: i64) -> Result<Vec<String>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT name FROM scheduled_tasks WHERE playlist_id = ?1 ORDER BY id",
        )?;
        let names = stmt
            .query_map(params![playlist_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    // Scheduled tasks

    pub async fn create_task(&self, draft: &TaskDraft) -> Result<i64> {
        let conn = self.conn.lock().await;
        if !row_exists(&conn, "playlists", draft.playlist_id)? {
            return Err(DaybellError::not_found("playlist", draft.playlist_id));
        }
        conn.execute(
            "INSERT INTO scheduled_tasks
             (name, hour, minute, repeat_mode, custom_days, playlist_id,
              volume, fade_in_seconds, duration_minutes, priority, is_enabled)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 1)",
            params![
                draft.name,
                draft.hour,
                draft.minute,
                draft.repeat.mode_tag(),
                draft.repeat.custom_days_json(),
                draft.playlist_id,
                draft.volume,
                draft.fade_in_seconds,
                draft.duration_cap_minutes,
                draft.priority,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub async fn update_task(&self, task_id: i64, draft: &TaskDraft) -> Result<()> {
        let conn = self.conn.lock().await;
        if !row_exists(&conn, "playlists", draft.playlist_id)? {
            return Err(DaybellError::not_found("playlist", draft.playlist_id));
        }
        let updated = conn.execute(
            "UPDATE scheduled_tasks SET
                 name = ?1, hour = ?2, minute = ?3, repeat_mode = ?4, custom_days = ?5,
                 playlist_id = ?6, volume = ?7, fade_in_seconds = ?8,
                 duration_minutes = ?9, priority = ?10
             WHERE id = ?11",
            params![
                draft.name,
                draft.hour,
                draft.minute,
                draft.repeat.mode_tag(),
                draft.repeat.custom_days_json(),
                draft.playlist_id,
                draft.volume,
                draft.fade_in_seconds,
                draft.duration_cap_minutes,
                draft.priority,
                task_id,
            ],
        )?;
        if updated == 0 {
            return Err(DaybellError::not_found("task", task_id));
        }
        Ok(())
    }

    pub async fn delete_task(&self, task_id: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        let deleted = conn.execute(
            "DELETE FROM scheduled_tasks WHERE id = ?1",
            params![task_id],
        )?;
        if deleted == 0 {
            return Err(DaybellError::not_found("task", task_id));
        }
        Ok(())
    }

    /// Flip the enabled flag; returns the new state.
    pub async fn toggle_task(&self, task_id: i64) -> Result<bool> {
        let conn = self.conn.lock().await;
        let updated = conn.execute(
            "UPDATE scheduled_tasks SET is_enabled = NOT is_enabled WHERE id = ?1",
            params![task_id],
        )?;
        if updated == 0 {
            return Err(DaybellError::not_found("task", task_id));
        }
        let enabled: bool = conn.query_row(
            "SELECT is_enabled FROM scheduled_tasks WHERE id = ?1",
            params![task_id],
            |row| row.get(0),
        )?;
        Ok(enabled)
    }

    pub async fn set_task_enabled(&self, task_id: i64, enabled: bool) -> Result<()> {
        let conn = self.conn.lock().await;
        let updated = conn.execute(
            "UPDATE scheduled_tasks SET is_enabled = ?1 WHERE id = ?2",
            params![enabled, task_id],
        )?;
        if updated == 0 {
            return Err(DaybellError::not_found("task", task_id));
        }
        Ok(())
    }

    pub async fn get_task(&self, task_id: i64) -> Result<Option<ScheduledTask>> {
        let conn = self.conn.lock().await;
        let task = conn
            .query_row(
                &format!("{TASK_SELECT} WHERE t.id = ?1"),
                params![task_id],
                row_to_task,
            )
            .optional()?;
        Ok(task)
    }

    pub async fn get_tasks(&self) -> Result<Vec<ScheduledTask>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!("{TASK_SELECT} ORDER BY t.hour, t.minute, t.id"))?;
        let tasks = stmt
            .query_map([], row_to_task)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }

    pub async fn enabled_tasks(&self) -> Result<Vec<ScheduledTask>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "{TASK_SELECT} WHERE t.is_enabled = 1 ORDER BY t.hour, t.minute, t.id"
        ))?;
        let tasks = stmt
            .query_map([], row_to_task)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }

    // Execution log

    pub async fn record_execution(
        &self,
        task_id: i64,
        fired_at: DateTime<Local>,
        resolved_track_count: usize,
        status: ExecutionStatus,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO execution_log (task_id, fired_at, resolved_track_count, status)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                task_id,
                local_stamp(fired_at),
                resolved_track_count as i64,
                status.tag(),
            ],
        )?;
        Ok(())
    }

    /// True once any record for the task exists at or after `since`.
    /// Used by the scheduler to dedup firings within a minute.
    pub async fn has_fired_since(&self, task_id: i64, since: DateTime<Local>) -> Result<bool> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM execution_log WHERE task_id = ?1 AND fired_at >= ?2",
            params![task_id, local_stamp(since)],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub async fn executions_for_task(
        &self,
        task_id: i64,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT task_id, fired_at, resolved_track_count, status
             FROM execution_log WHERE task_id = ?1
             ORDER BY id DESC LIMIT ?2",
        )?;
        let records = stmt
            .query_map(params![task_id, limit as i64], row_to_execution)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    pub async fn recent_executions(&self, limit: usize) -> Result<Vec<ExecutionRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT task_id, fired_at, resolved_track_count, status
             FROM execution_log ORDER BY id DESC LIMIT ?1",
        )?;
        let records = stmt
            .query_map(params![limit as i64], row_to_execution)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}

const TASK_SELECT: &str = "SELECT t.id, t.name, t.hour, t.minute, t.repeat_mode, t.custom_days,
        t.playlist_id, t.volume, t.fade_in_seconds, t.duration_minutes,
        t.priority, t.is_enabled, t.created_at, p.name
 FROM scheduled_tasks t
 JOIN playlists p ON p.id = t.playlist_id";

fn local_stamp(dt: DateTime<Local>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn row_exists(conn: &Connection, table: &str, id: i64) -> rusqlite::Result<bool> {
    // table names come from this file only
    let found = conn
        .query_row(
            &format!("SELECT 1 FROM {table} WHERE id = ?1"),
            params![id],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn row_to_task(row: &Row) -> rusqlite::Result<ScheduledTask> {
    let mode_tag: String = row.get(4)?;
    let custom_days: Option<String> = row.get(5)?;
    let repeat = RepeatRule::from_parts(&mode_tag, custom_days.as_deref()).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(ScheduledTask {
        id: row.get(0)?,
        name: row.get(1)?,
        hour: row.get(2)?,
        minute: row.get(3)?,
        repeat,
        playlist_id: row.get(6)?,
        volume: row.get(7)?,
        fade_in_seconds: row.get(8)?,
        duration_cap_minutes: row.get(9)?,
        priority: row.get(10)?,
        is_enabled: row.get(11)?,
        created_at: row.get(12)?,
        playlist_name: row.get(13)?,
    })
}

fn row_to_track(row: &Row) -> rusqlite::Result<Track> {
    let path: String = row.get(2)?;
    Ok(Track {
        id: row.get(0)?,
        name: row.get(1)?,
        path: path.into(),
        duration_seconds: row.get(3)?,
        play_count: row.get(4)?,
        last_played: row.get(5)?,
    })
}

fn row_to_playlist(row: &Row) -> rusqlite::Result<Playlist> {
    let tag: String = row.get(2)?;
    let play_mode = PlayMode::from_tag(&tag).unwrap_or_else(|| {
        warn!("Unknown play_mode tag '{}', treating as sequential", tag);
        PlayMode::Sequential
    });
    Ok(Playlist {
        id: row.get(0)?,
        name: row.get(1)?,
        play_mode,
        track_count: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn row_to_playlist_track(row: &Row) -> rusqlite::Result<PlaylistTrack> {
    let path: String = row.get(3)?;
    Ok(PlaylistTrack {
        item_id: row.get(0)?,
        track_id: row.get(1)?,
        name: row.get(2)?,
        path: path.into(),
        duration_seconds: row.get(4)?,
        position: row.get(5)?,
    })
}

fn row_to_execution(row: &Row) -> rusqlite::Result<ExecutionRecord> {
    let tag: String = row.get(3)?;
    let status = ExecutionStatus::from_tag(&tag).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown execution status '{tag}'").into(),
        )
    })?;
    Ok(ExecutionRecord {
        task_id: row.get(0)?,
        fired_at: row.get(1)?,
        resolved_track_count: row.get(2)?,
        status,
    })
}
