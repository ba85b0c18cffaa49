// State publisher - fans playback snapshots out over a watch channel

use tokio::sync::watch;

use super::PlaybackSnapshot;

/// Single writer, any number of readers. The latest snapshot is always
/// available to poll; subscribers get woken on every change.
pub struct StatePublisher {
    tx: watch::Sender<PlaybackSnapshot>,
}

impl StatePublisher {
    pub fn new(initial: PlaybackSnapshot) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Replace the published snapshot. Works with zero subscribers.
    pub fn publish(&self, snapshot: PlaybackSnapshot) {
        self.tx.send_replace(snapshot);
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackSnapshot> {
        self.tx.subscribe()
    }
}

impl Default for StatePublisher {
    fn default() -> Self {
        Self::new(PlaybackSnapshot::default())
    }
}
