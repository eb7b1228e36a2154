// Playlist scheduling - daytime or nighttime songs, by the clock or by a same-day override

use super::state::{ControllerStateUpdate, StateBroadcaster};
use super::task::RestartableTask;
use crate::device::Clock;
use crate::error::ConfigError;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const MINUTES_PER_DAY: u32 = 24 * 60;
const SECONDS_PER_DAY: u32 = 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaylistMode {
    Daytime,
    Nighttime,
}

impl PlaylistMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaylistMode::Daytime => "daytime",
            PlaylistMode::Nighttime => "nighttime",
        }
    }
}

impl fmt::Display for PlaylistMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlaylistMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daytime" => Ok(PlaylistMode::Daytime),
            "nighttime" => Ok(PlaylistMode::Nighttime),
            other => Err(format!("unknown playlist '{}'", other)),
        }
    }
}

/// `[start, end)` in minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaytimeRange {
    start: u32,
    end: u32,
}

impl DaytimeRange {
    /// Parse two "HH:MM" boundaries. A range whose end is before its start
    /// wraps past midnight; identical boundaries are rejected.
    pub fn parse(start: &str, end: &str) -> Result<Self, ConfigError> {
        let start_minute = parse_minute_of_day(start)?;
        let end_minute = parse_minute_of_day(end)?;

        if start_minute == end_minute {
            return Err(ConfigError::EmptyRange(start.to_string()));
        }
        if end_minute < start_minute {
            warn!("daytime range {}-{} wraps past midnight", start, end);
        }

        Ok(Self {
            start: start_minute,
            end: end_minute,
        })
    }

    pub fn start_minute(&self) -> u32 {
        self.start
    }

    pub fn end_minute(&self) -> u32 {
        self.end
    }

    pub fn wraps_midnight(&self) -> bool {
        self.end < self.start
    }

    pub fn contains(&self, minute_of_day: u32) -> bool {
        if self.wraps_midnight() {
            minute_of_day >= self.start || minute_of_day < self.end
        } else {
            self.start <= minute_of_day && minute_of_day < self.end
        }
    }

    /// Time until the next instant the mode could change on its own: either
    /// boundary, or midnight (when a same-day override lapses).
    pub fn until_next_boundary(&self, now: NaiveTime) -> Duration {
        let now_secs = now.num_seconds_from_midnight();
        let secs = [self.start * 60, self.end * 60, 0]
            .into_iter()
            .map(|boundary| match (boundary + SECONDS_PER_DAY - now_secs) % SECONDS_PER_DAY {
                0 => SECONDS_PER_DAY,
                ahead => ahead,
            })
            .min()
            .unwrap_or(SECONDS_PER_DAY);

        // sub-second part of now, so the wake lands on the boundary itself
        Duration::from_secs(u64::from(secs)) - Duration::from_nanos(u64::from(now.nanosecond() % 1_000_000_000))
    }
}

fn parse_minute_of_day(value: &str) -> Result<u32, ConfigError> {
    let time = NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|_| ConfigError::InvalidTime(value.to_string()))?;
    let minute = time.hour() * 60 + time.minute();
    debug_assert!(minute < MINUTES_PER_DAY);
    Ok(minute)
}

pub struct PlaylistScheduler {
    range: DaytimeRange,
    clock: Arc<dyn Clock>,
    override_mode: Mutex<Option<(NaiveDate, PlaylistMode)>>,
    broadcaster: Arc<StateBroadcaster>,
    publisher: RestartableTask,
}

impl PlaylistScheduler {
    pub fn new(range: DaytimeRange, clock: Arc<dyn Clock>, broadcaster: Arc<StateBroadcaster>) -> Self {
        Self {
            range,
            clock,
            override_mode: Mutex::new(None),
            broadcaster,
            publisher: RestartableTask::new("playlist-publisher"),
        }
    }

    pub fn range(&self) -> DaytimeRange {
        self.range
    }

    pub fn current_mode(&self) -> PlaylistMode {
        self.mode_at(self.clock.now())
    }

    pub fn mode_at(&self, now: NaiveDateTime) -> PlaylistMode {
        let overridden = *self.override_mode.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((date, mode)) = overridden {
            if date == now.date() {
                return mode;
            }
        }

        let minute = now.hour() * 60 + now.minute();
        if self.range.contains(minute) {
            PlaylistMode::Daytime
        } else {
            PlaylistMode::Nighttime
        }
    }

    /// Force `mode` for the rest of today and republish.
    pub fn override_mode(&self, mode: PlaylistMode) {
        let today = self.clock.now().date();
        *self.override_mode.lock().unwrap_or_else(PoisonError::into_inner) = Some((today, mode));
        info!("🌗 playlist overridden to {} for {}", mode, today);
        self.publish_current();
    }

    pub fn publish_current(&self) {
        self.broadcaster
            .publish(ControllerStateUpdate::PlaylistMode(self.current_mode()));
    }

    /// (Re)start the boundary publisher, cancelling any running instance first.
    /// Called at startup and whenever the device clock is changed.
    pub fn restart_publisher(self: &Arc<Self>) {
        let scheduler = Arc::clone(self);
        self.publisher
            .restart(move |token| scheduler.run_publisher(token));
    }

    pub fn stop_publisher(&self) {
        self.publisher.cancel();
    }

    async fn run_publisher(self: Arc<Self>, token: CancellationToken) {
        loop {
            self.publish_current();

            let wait = self.range.until_next_boundary(self.clock.now().time());
            debug!("next playlist boundary in {}s", wait.as_secs());

            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ManualClock;
    use chrono::NaiveDate;

    fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn scheduler(start: &str, end: &str, now: NaiveDateTime) -> (Arc<PlaylistScheduler>, Arc<ManualClock>, Arc<Mutex<Vec<PlaylistMode>>>) {
        let clock = Arc::new(ManualClock::new(now));
        let broadcaster = Arc::new(StateBroadcaster::new());
        let modes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&modes);
        broadcaster.subscribe(Arc::new(move |update: &ControllerStateUpdate| {
            if let ControllerStateUpdate::PlaylistMode(mode) = update {
                sink.lock().unwrap().push(*mode);
            }
        }));
        let range = DaytimeRange::parse(start, end).unwrap();
        let clock_port: Arc<dyn Clock> = clock.clone();
        (
            Arc::new(PlaylistScheduler::new(range, clock_port, broadcaster)),
            clock,
            modes,
        )
    }

    #[test]
    fn test_range_is_half_open() {
        let range = DaytimeRange::parse("06:00", "18:00").unwrap();
        assert!(!range.contains(5 * 60 + 59));
        assert!(range.contains(6 * 60));
        assert!(range.contains(17 * 60 + 59));
        assert!(!range.contains(18 * 60));
    }

    #[test]
    fn test_wrapping_range() {
        let range = DaytimeRange::parse("22:00", "06:00").unwrap();
        assert!(range.wraps_midnight());
        assert!(range.contains(23 * 60));
        assert!(range.contains(0));
        assert!(range.contains(5 * 60 + 59));
        assert!(!range.contains(6 * 60));
        assert!(!range.contains(12 * 60));
    }

    #[test]
    fn test_malformed_ranges() {
        assert!(matches!(DaytimeRange::parse("25:00", "18:00"), Err(ConfigError::InvalidTime(_))));
        assert!(matches!(DaytimeRange::parse("06:00", "noon"), Err(ConfigError::InvalidTime(_))));
        assert!(matches!(DaytimeRange::parse("06:00", "06:00"), Err(ConfigError::EmptyRange(_))));
    }

    #[test]
    fn test_evening_is_nighttime_until_overridden_for_the_day() {
        let (scheduler, clock, modes) = scheduler("06:00", "18:00", at(10, 20, 0));
        assert_eq!(scheduler.current_mode(), PlaylistMode::Nighttime);

        scheduler.override_mode(PlaylistMode::Daytime);
        assert_eq!(scheduler.current_mode(), PlaylistMode::Daytime);
        assert_eq!(*modes.lock().unwrap(), vec![PlaylistMode::Daytime]);

        clock.set(at(10, 23, 59));
        assert_eq!(scheduler.current_mode(), PlaylistMode::Daytime);

        // date rolls over: back to the range
        clock.set(at(11, 0, 0));
        assert_eq!(scheduler.current_mode(), PlaylistMode::Nighttime);
        clock.set(at(11, 9, 0));
        assert_eq!(scheduler.current_mode(), PlaylistMode::Daytime);
    }

    #[test]
    fn test_until_next_boundary() {
        let range = DaytimeRange::parse("06:00", "18:00").unwrap();
        let time = |h, m, s| NaiveTime::from_hms_opt(h, m, s).unwrap();

        assert_eq!(range.until_next_boundary(time(5, 0, 0)), Duration::from_secs(3600));
        assert_eq!(range.until_next_boundary(time(17, 59, 30)), Duration::from_secs(30));
        // midnight counts, so an override lapses on time
        assert_eq!(range.until_next_boundary(time(23, 0, 0)), Duration::from_secs(3600));
        // sitting exactly on a boundary waits for the next one
        assert_eq!(range.until_next_boundary(time(6, 0, 0)), Duration::from_secs(12 * 3600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_publisher_publishes_immediately_and_restarts_cleanly() {
        let (scheduler, _clock, modes) = scheduler("06:00", "18:00", at(10, 12, 0));

        scheduler.restart_publisher();
        tokio::task::yield_now().await;
        assert_eq!(*modes.lock().unwrap(), vec![PlaylistMode::Daytime]);

        scheduler.restart_publisher();
        tokio::task::yield_now().await;
        assert_eq!(modes.lock().unwrap().len(), 2);

        scheduler.stop_publisher();
        // the wall clock never moves here, so nothing else may publish
        tokio::time::sleep(Duration::from_secs(13 * 3600)).await;
        assert_eq!(modes.lock().unwrap().len(), 2);
    }

    /// Wall clock that moves with tokio's (paused) time.
    struct FollowingClock {
        origin: NaiveDateTime,
        started: tokio::time::Instant,
    }

    impl Clock for FollowingClock {
        fn now(&self) -> NaiveDateTime {
            self.origin + chrono::Duration::from_std(self.started.elapsed()).unwrap()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_publisher_wakes_at_boundaries_and_midnight() {
        let modes = Arc::new(Mutex::new(Vec::new()));
        let broadcaster = Arc::new(StateBroadcaster::new());
        let sink = Arc::clone(&modes);
        broadcaster.subscribe(Arc::new(move |update: &ControllerStateUpdate| {
            if let ControllerStateUpdate::PlaylistMode(mode) = update {
                sink.lock().unwrap().push(*mode);
            }
        }));
        let clock = Arc::new(FollowingClock {
            origin: at(10, 20, 0),
            started: tokio::time::Instant::now(),
        });
        let scheduler = Arc::new(PlaylistScheduler::new(
            DaytimeRange::parse("06:00", "18:00").unwrap(),
            clock,
            broadcaster,
        ));

        scheduler.override_mode(PlaylistMode::Daytime);
        scheduler.restart_publisher();
        tokio::task::yield_now().await;
        assert_eq!(*modes.lock().unwrap(), vec![PlaylistMode::Daytime, PlaylistMode::Daytime]);

        // 00:00 drops the override, 06:00 brings daytime back
        tokio::time::sleep(Duration::from_secs(4 * 3600 + 60)).await;
        assert_eq!(modes.lock().unwrap().last(), Some(&PlaylistMode::Nighttime));
        tokio::time::sleep(Duration::from_secs(6 * 3600)).await;
        assert_eq!(
            *modes.lock().unwrap(),
            vec![
                PlaylistMode::Daytime,
                PlaylistMode::Daytime,
                PlaylistMode::Nighttime,
                PlaylistMode::Daytime,
            ]
        );

        scheduler.stop_publisher();
    }

    #[test]
    fn test_mode_names() {
        assert_eq!("daytime".parse::<PlaylistMode>(), Ok(PlaylistMode::Daytime));
        assert_eq!("nighttime".parse::<PlaylistMode>(), Ok(PlaylistMode::Nighttime));
        assert!("weekend".parse::<PlaylistMode>().is_err());
        assert_eq!(PlaylistMode::Nighttime.to_string(), "nighttime");
    }
}
