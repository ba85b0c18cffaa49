// Playlist resolver - turns a stored playlist into a concrete queue

use rand::seq::SliceRandom;
use tracing::debug;

use super::{PlayMode, TrackRef};
use crate::error::{DaybellError, Result};
use crate::store::TaskStore;

/// A playlist snapshotted into concrete tracks, ready for the engine.
#[derive(Debug, Clone)]
pub struct ResolvedPlaylist {
    pub playlist_id: i64,
    pub name: String,
    pub mode: PlayMode,
    pub tracks: Vec<TrackRef>,
}

impl ResolvedPlaylist {
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn total_seconds(&self) -> f64 {
        self.tracks.iter().map(|t| t.duration_seconds).sum()
    }
}

/// Resolve a playlist to a queue. Random mode shuffles once, here, so the
/// running queue stays stable for skip and wrap decisions. A playlist with
/// no tracks resolves to an empty queue; callers decide what that means.
pub async fn resolve_playlist(store: &TaskStore, playlist_id: i64) -> Result<ResolvedPlaylist> {
    let playlist = store
        .get_playlist(playlist_id)
        .await?
        .ok_or_else(|| DaybellError::not_found("playlist", playlist_id))?;

    let mut tracks: Vec<TrackRef> = store
        .playlist_tracks(playlist_id)
        .await?
        .into_iter()
        .map(|item| TrackRef {
            id: item.track_id,
            name: item.name,
            path: item.path,
            duration_seconds: item.duration_seconds,
        })
        .collect();

    if playlist.play_mode == PlayMode::Random {
        tracks.shuffle(&mut rand::thread_rng());
    }

    debug!(
        "Resolved playlist '{}': {} tracks, {} mode",
        playlist.name,
        tracks.len(),
        playlist.play_mode.mode_tag()
    );

    Ok(ResolvedPlaylist {
        playlist_id,
        name: playlist.name,
        mode: playlist.play_mode,
        tracks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    async fn seeded_store() -> (TaskStore, i64, Vec<i64>) {
        let store = TaskStore::open_in_memory().unwrap();
        let playlist_id = store.create_playlist("chimes").await.unwrap();
        let mut track_ids = Vec::new();
        for (name, secs) in [("one", 30.0), ("two", 45.0), ("three", 60.0)] {
            let id = store
                .add_track(name, &PathBuf::from(format!("/music/{name}.mp3")), secs)
                .await
                .unwrap();
            store.add_playlist_track(playlist_id, id).await.unwrap();
            track_ids.push(id);
        }
        (store, playlist_id, track_ids)
    }

    #[tokio::test]
    async fn sequential_resolution_keeps_playlist_order() {
        let (store, playlist_id, track_ids) = seeded_store().await;
        let resolved = resolve_playlist(&store, playlist_id).await.unwrap();

        let ids: Vec<i64> = resolved.tracks.iter().map(|t| t.id).collect();
        assert_eq!(ids, track_ids);
        assert_eq!(resolved.mode, PlayMode::Sequential);
        assert!((resolved.total_seconds() - 135.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn random_mode_shuffles_but_keeps_every_track() {
        let (store, playlist_id, track_ids) = seeded_store().await;
        store
            .set_play_mode(playlist_id, PlayMode::Random)
            .await
            .unwrap();

        let resolved = resolve_playlist(&store, playlist_id).await.unwrap();
        let mut ids: Vec<i64> = resolved.tracks.iter().map(|t| t.id).collect();
        ids.sort_unstable();
        let mut expected = track_ids.clone();
        expected.sort_unstable();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn duplicate_playlist_items_each_get_a_slot() {
        let (store, playlist_id, track_ids) = seeded_store().await;
        store
            .add_playlist_track(playlist_id, track_ids[0])
            .await
            .unwrap();

        let resolved = resolve_playlist(&store, playlist_id).await.unwrap();
        assert_eq!(resolved.tracks.len(), 4);
        assert_eq!(resolved.tracks[3].id, track_ids[0]);
    }

    #[tokio::test]
    async fn empty_playlist_resolves_to_an_empty_queue() {
        let store = TaskStore::open_in_memory().unwrap();
        let playlist_id = store.create_playlist("bare").await.unwrap();

        let resolved = resolve_playlist(&store, playlist_id).await.unwrap();
        assert!(resolved.is_empty());
    }

    #[tokio::test]
    async fn missing_playlist_is_reported_as_not_found() {
        let store = TaskStore::open_in_memory().unwrap();
        let err = resolve_playlist(&store, 42).await.unwrap_err();
        assert!(matches!(
            err,
            DaybellError::NotFound { kind: "playlist", id: 42 }
        ));
    }
}
