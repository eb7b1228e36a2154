// Device ports - what the controller needs from the box it runs on

pub mod clock;

pub use clock::{Clock, ManualClock, SystemClock};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Power-state operations. On the toy these put the board into light sleep
/// (woken by the movement sensor) or reboot it.
pub trait DeviceLifecycle: Send + Sync {
    /// Block until the device wakes up again.
    fn sleep(&self);
    fn reset(&self);
}

pub trait BatteryGauge: Send + Sync {
    /// Charge in percent, `0..=100`
    fn level_percent(&self) -> Option<u8>;
}

/// Lifecycle for a desktop host: there is no real sleep, and a reset ends the
/// process so a supervisor can start it again.
#[derive(Debug)]
pub struct HostLifecycle {
    shutdown: CancellationToken,
    restart_requested: AtomicBool,
    sleeps: AtomicU32,
}

impl HostLifecycle {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            shutdown,
            restart_requested: AtomicBool::new(false),
            sleeps: AtomicU32::new(0),
        }
    }

    pub fn restart_requested(&self) -> bool {
        self.restart_requested.load(Ordering::SeqCst)
    }

    pub fn sleep_count(&self) -> u32 {
        self.sleeps.load(Ordering::SeqCst)
    }
}

impl DeviceLifecycle for HostLifecycle {
    fn sleep(&self) {
        self.sleeps.fetch_add(1, Ordering::SeqCst);
        info!("😴 Yaar doesn't want to play, going to sleep");
        // nothing to suspend on a host; waking is immediate
        info!("🌅 woke up");
    }

    fn reset(&self) {
        info!("🔄 resetting device");
        self.restart_requested.store(true, Ordering::SeqCst);
        self.shutdown.cancel();
    }
}

/// Reads a Linux power-supply `capacity` file.
#[derive(Debug, Clone)]
pub struct SysfsBattery {
    capacity_path: PathBuf,
}

impl SysfsBattery {
    pub fn new(capacity_path: impl Into<PathBuf>) -> Self {
        Self {
            capacity_path: capacity_path.into(),
        }
    }

    /// First `BAT*` supply under `/sys/class/power_supply`, if any.
    pub fn detect() -> Option<Self> {
        Self::detect_in(Path::new("/sys/class/power_supply"))
    }

    pub fn detect_in(root: &Path) -> Option<Self> {
        let mut batteries: Vec<PathBuf> = fs::read_dir(root)
            .ok()?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with("BAT"))
            .map(|entry| entry.path().join("capacity"))
            .filter(|path| path.is_file())
            .collect();
        batteries.sort();

        let capacity_path = batteries.into_iter().next()?;
        debug!("🔋 battery gauge at {}", capacity_path.display());
        Some(Self { capacity_path })
    }
}

impl BatteryGauge for SysfsBattery {
    fn level_percent(&self) -> Option<u8> {
        let raw = match fs::read_to_string(&self.capacity_path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("can't read {}: {}", self.capacity_path.display(), e);
                return None;
            }
        };
        raw.trim().parse::<u8>().ok().map(|level| level.min(100))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_reset_requests_restart_and_shutdown() {
        let token = CancellationToken::new();
        let lifecycle = HostLifecycle::new(token.clone());
        assert!(!lifecycle.restart_requested());

        lifecycle.reset();
        assert!(lifecycle.restart_requested());
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_sysfs_battery() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("AC")).unwrap();
        fs::create_dir(dir.path().join("BAT0")).unwrap();
        fs::write(dir.path().join("BAT0").join("capacity"), "87\n").unwrap();

        let battery = SysfsBattery::detect_in(dir.path()).unwrap();
        assert_eq!(battery.level_percent(), Some(87));

        fs::write(dir.path().join("BAT0").join("capacity"), "garbage").unwrap();
        assert_eq!(battery.level_percent(), None);
    }

    #[test]
    fn test_no_battery() {
        let dir = TempDir::new().unwrap();
        assert!(SysfsBattery::detect_in(dir.path()).is_none());
    }
}
