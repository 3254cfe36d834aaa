use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use escrow_lending_core::{LenderPosition, UserId};
use tokio::sync::watch;

type Slot = watch::Sender<Option<LenderPosition>>;

/// Last known position of every user. Snapshots are only ever replaced whole.
#[derive(Clone, Default)]
pub struct PositionCache {
    slots: Arc<Mutex<HashMap<UserId, Slot>>>,
}

impl PositionCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<UserId, Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, user_id: UserId) -> Option<LenderPosition> {
        self.slots()
            .get(&user_id)
            .and_then(|slot| *slot.borrow())
    }

    /// Stores `position` and returns the snapshot it replaced.
    pub fn replace(&self, position: LenderPosition) -> Option<LenderPosition> {
        self.slots()
            .entry(position.user_id)
            .or_insert_with(|| watch::channel(None).0)
            .send_replace(Some(position))
    }

    /// `None` until the first successful read for `user_id`.
    pub fn subscribe(&self, user_id: UserId) -> watch::Receiver<Option<LenderPosition>> {
        self.slots()
            .entry(user_id)
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }
}
