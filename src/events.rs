//! Refresh notifications backed by a `tokio::sync::broadcast` channel.
//!
//! Delivery is best-effort: publishing with no subscribers drops the event
//! and a slow subscriber skips ahead (`RecvError::Lagged`). Every event
//! means "redraw this pin's album", so losing one is harmless.

use std::path::PathBuf;
use tokio::sync::broadcast;

/// Something changed in a pin's album
#[derive(Debug, Clone, PartialEq)]
pub enum AlbumEvent {
    /// A search returned and placeholder rows were created
    BatchStarted { pin_id: i64, page: u32, count: usize },
    /// One image landed on disk
    PhotoReady { pin_id: i64, photo_id: i64, path: PathBuf },
    /// One image failed and now carries the error sentinel
    PhotoFailed { pin_id: i64, photo_id: i64 },
    /// Photos were removed (single delete, new collection, or pin delete)
    PhotosDeleted { pin_id: i64, count: usize },
}

impl AlbumEvent {
    pub fn pin_id(&self) -> i64 {
        match self {
            AlbumEvent::BatchStarted { pin_id, .. }
            | AlbumEvent::PhotoReady { pin_id, .. }
            | AlbumEvent::PhotoFailed { pin_id, .. }
            | AlbumEvent::PhotosDeleted { pin_id, .. } => *pin_id,
        }
    }
}

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 256;

/// In-process fan-out of [`AlbumEvent`]s. Cheap to clone; clones share the channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<AlbumEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to all current subscribers. Never fails.
    pub fn publish(&self, event: AlbumEvent) {
        // SendError only means there are zero receivers
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AlbumEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
