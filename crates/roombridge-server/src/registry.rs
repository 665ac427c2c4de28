//! Session registry
//!
//! Holds the joined session of each room. A slot is written once, when the
//! room connects, and relays for the opposite room wait on it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::room::{RoomSession, RoomSide};

type Slot = watch::Sender<Option<Arc<dyn RoomSession>>>;

/// One write-once session slot per room side
pub struct SessionRegistry {
    a: Slot,
    b: Slot,
}

impl SessionRegistry {
    /// Registry with both slots empty
    pub fn new() -> Self {
        Self {
            a: watch::channel(None).0,
            b: watch::channel(None).0,
        }
    }

    fn slot(&self, side: RoomSide) -> &Slot {
        match side {
            RoomSide::A => &self.a,
            RoomSide::B => &self.b,
        }
    }

    /// Store the session for `side`
    ///
    /// Returns the rejected session if the slot was already filled.
    pub fn set(
        &self,
        side: RoomSide,
        session: Arc<dyn RoomSession>,
    ) -> Result<(), Arc<dyn RoomSession>> {
        let mut candidate = Some(session);
        let mut rejected = None;
        self.slot(side).send_if_modified(|slot| {
            if slot.is_some() {
                rejected = candidate.take();
                false
            } else {
                *slot = candidate.take();
                true
            }
        });
        match rejected {
            Some(session) => Err(session),
            None => Ok(()),
        }
    }

    /// Session for `side`, if joined
    pub fn get(&self, side: RoomSide) -> Option<Arc<dyn RoomSession>> {
        self.slot(side).borrow().clone()
    }

    /// Wait up to `timeout` for the session of `side` to appear
    pub async fn wait_for(&self, side: RoomSide, timeout: Duration) -> Option<Arc<dyn RoomSession>> {
        let mut rx = self.slot(side).subscribe();
        match tokio::time::timeout(timeout, rx.wait_for(|slot| slot.is_some())).await {
            Ok(Ok(slot)) => slot.clone(),
            _ => None,
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
