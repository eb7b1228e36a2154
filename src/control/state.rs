// State broadcast - the typed publish/subscribe port owned by the controller
// Subscribers are called synchronously and must return quickly

use super::PlaylistMode;
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::trace;

/// One changed field. Serializes as a single-key map, e.g. `{"volume":75}`,
/// so remote consumers can ignore keys they don't know.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerStateUpdate {
    /// Empty when nothing is playing
    CurrentlyPlaying(String),
    /// Seconds left on the kill switch, 0 once it has expired
    KillSwitchCounter(u64),
    PlaylistMode(PlaylistMode),
    /// Percent of max volume
    Volume(u8),
    /// Percent charge
    Battery(u8),
}

pub trait StateSubscriber: Send + Sync {
    fn on_state_update(&self, update: &ControllerStateUpdate);
}

impl<F> StateSubscriber for F
where
    F: Fn(&ControllerStateUpdate) + Send + Sync,
{
    fn on_state_update(&self, update: &ControllerStateUpdate) {
        self(update)
    }
}

#[derive(Default)]
pub struct StateBroadcaster {
    subscribers: RwLock<Vec<Arc<dyn StateSubscriber>>>,
}

impl StateBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, subscriber: Arc<dyn StateSubscriber>) {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(subscriber);
    }

    pub fn publish(&self, update: ControllerStateUpdate) {
        trace!(?update, "publishing state");
        // snapshot so a subscriber may subscribe others without deadlocking
        let subscribers: Vec<Arc<dyn StateSubscriber>> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for subscriber in subscribers {
            subscriber.on_state_update(&update);
        }
    }
}
