//! Same-origin signal board
//!
//! A scanner and a display running side by side in one process share a board.
//! After a successful insert the scanner writes the new id; displays on the
//! polling strategy wake on the change instead of waiting for their next tick.

use scanlink_core::ScanId;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct SignalBoard {
    latest: Arc<watch::Sender<ScanId>>,
}

impl SignalBoard {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self { latest: Arc::new(tx) }
    }

    /// Record a newly persisted id. Ids that do not move the board forward
    /// are ignored and wake nobody.
    pub fn announce(&self, id: ScanId) -> bool {
        let moved = self.latest.send_if_modified(|current| {
            if id > *current {
                *current = id;
                true
            } else {
                false
            }
        });
        if moved {
            debug!(record_id = id, "Signal board advanced");
        }
        moved
    }

    pub fn latest(&self) -> ScanId {
        *self.latest.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<ScanId> {
        self.latest.subscribe()
    }
}

impl Default for SignalBoard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_announce_wakes_watchers() {
        let board = SignalBoard::new();
        let mut rx = board.watch();

        assert!(board.announce(3));
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 3);
    }

    #[test]
    fn test_stale_announce_ignored() {
        let board = SignalBoard::new();
        let mut rx = board.watch();
        board.announce(5);
        let _ = rx.borrow_and_update();

        assert!(!board.announce(4));
        assert!(!board.announce(5));
        assert_eq!(board.latest(), 5);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_clones_share_state() {
        let board = SignalBoard::new();
        let other = board.clone();
        other.announce(9);
        assert_eq!(board.latest(), 9);
    }
}
