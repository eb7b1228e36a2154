// Kill switch - a timed lockout on new playback with a live countdown

use super::state::{ControllerStateUpdate, StateBroadcaster};
use super::task::RestartableTask;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct KillSwitch {
    window: Duration,
    deadline: Mutex<Option<Instant>>,
    broadcaster: Arc<StateBroadcaster>,
    counter: RestartableTask,
}

impl KillSwitch {
    pub fn new(window: Duration, broadcaster: Arc<StateBroadcaster>) -> Self {
        Self {
            window,
            deadline: Mutex::new(None),
            broadcaster,
            counter: RestartableTask::new("kill-switch-counter"),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Start (or restart) the lockout window from now.
    pub fn activate(&self) {
        let deadline = Instant::now() + self.window;
        *self.deadline.lock().unwrap_or_else(PoisonError::into_inner) = Some(deadline);
        info!("🛑 kill switch active for {}s", self.window.as_secs());

        let broadcaster = Arc::clone(&self.broadcaster);
        self.counter
            .restart(move |token| publish_countdown(deadline, broadcaster, token));
    }

    pub fn is_active(&self) -> bool {
        self.deadline()
            .map_or(false, |deadline| Instant::now() < deadline)
    }

    pub fn remaining(&self) -> Duration {
        self.deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::ZERO)
    }

    /// Stop the countdown publisher, e.g. when the controller shuts down
    pub fn stop_publisher(&self) {
        self.counter.cancel();
    }

    fn deadline(&self) -> Option<Instant> {
        *self.deadline.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Publishes whole seconds left (rounded up) once a second, then a single 0.
/// An instance cancelled by reactivation publishes nothing further.
async fn publish_countdown(deadline: Instant, broadcaster: Arc<StateBroadcaster>, token: CancellationToken) {
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }

        broadcaster.publish(ControllerStateUpdate::KillSwitchCounter(ceil_secs(remaining)));

        let tick = remaining.min(Duration::from_secs(1));
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(tick) => {}
        }
    }

    if token.is_cancelled() {
        return;
    }
    debug!("kill switch expired");
    broadcaster.publish(ControllerStateUpdate::KillSwitchCounter(0));
}

fn ceil_secs(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counting_switch(window: Duration) -> (KillSwitch, Arc<Mutex<Vec<u64>>>) {
        let broadcaster = Arc::new(StateBroadcaster::new());
        let counts = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&counts);
        broadcaster.subscribe(Arc::new(move |update: &ControllerStateUpdate| {
            if let ControllerStateUpdate::KillSwitchCounter(secs) = update {
                sink.lock().unwrap().push(*secs);
            }
        }));
        (KillSwitch::new(window, broadcaster), counts)
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_exactly_for_the_window() {
        let (switch, _counts) = counting_switch(Duration::from_secs(5));
        assert!(!switch.is_active());

        switch.activate();
        assert!(switch.is_active());

        tokio::time::advance(Duration::from_millis(4999)).await;
        assert!(switch.is_active());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(!switch.is_active());
        assert_eq!(switch.remaining(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_is_monotonic_and_ends_at_zero() {
        let (switch, counts) = counting_switch(Duration::from_secs(5));
        switch.activate();

        tokio::time::sleep(Duration::from_secs(7)).await;

        let counts = counts.lock().unwrap().clone();
        assert_eq!(counts, vec![5, 4, 3, 2, 1, 0]);
        assert!(counts.windows(2).all(|pair| pair[0] >= pair[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reactivation_replaces_deadline_and_publisher() {
        let (switch, counts) = counting_switch(Duration::from_secs(3));
        switch.activate();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        switch.activate();
        assert_eq!(switch.remaining(), Duration::from_secs(3));

        tokio::time::sleep(Duration::from_secs(5)).await;
        let counts = counts.lock().unwrap().clone();

        // first run: 3, 2 - then the restart counts down from 3 to a single 0
        assert_eq!(counts, vec![3, 2, 3, 2, 1, 0]);
        assert_eq!(counts.iter().filter(|&&c| c == 0).count(), 1);
    }

    #[test]
    fn test_ceil_secs() {
        assert_eq!(ceil_secs(Duration::from_millis(1)), 1);
        assert_eq!(ceil_secs(Duration::from_secs(2)), 2);
        assert_eq!(ceil_secs(Duration::from_millis(2001)), 3);
    }
}
