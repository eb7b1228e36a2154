// SweetYaar controller - the one place where actions, timers and engine events meet
// Owns playback, lockout, playlist and volume state and fans every change out to subscribers

use super::interface::{ActionSink, Interface};
use super::kill_switch::KillSwitch;
use super::scheduler::{DaytimeRange, PlaylistMode, PlaylistScheduler};
use super::state::{ControllerStateUpdate, StateBroadcaster, StateSubscriber};
use super::volume::Volume;
use super::Action;
use crate::audio::{ActivityEvent, AudioLibrary, AudioOutput, PlaybackEngine};
use crate::config::{Config, ControllerConfig, VolumeConfig};
use crate::device::{BatteryGauge, Clock, DeviceLifecycle};
use crate::error::ConfigError;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const SONG_MARKER: &str = "♫";
const ANIMAL_MARKER: &str = "🐶";
const DRAIN_POLL: Duration = Duration::from_millis(20);

/// Why `take_control` returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlExit {
    /// The stop token fired (signal, or a device reset)
    StopRequested,
    /// An interface's listen loop ended
    InterfaceClosed,
    /// The output device failed; a reset has been requested
    OutputFailed,
}

/// Everything the controller needs from the hardware around it
pub struct DevicePorts {
    pub lifecycle: Arc<dyn DeviceLifecycle>,
    pub clock: Arc<dyn Clock>,
    pub battery: Option<Arc<dyn BatteryGauge>>,
}

struct ControllerState {
    library: AudioLibrary,
    volume: Volume,
    last_activity: Instant,
}

struct ControllerInner {
    engine: PlaybackEngine,
    scheduler: Arc<PlaylistScheduler>,
    kill_switch: KillSwitch,
    broadcaster: Arc<StateBroadcaster>,
    lifecycle: Arc<dyn DeviceLifecycle>,
    battery: Option<Arc<dyn BatteryGauge>>,
    settings: ControllerConfig,
    volume_defaults: VolumeConfig,
    state: Mutex<ControllerState>,
    stop: CancellationToken,
}

/// Cheap to clone; every clone is the same controller.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

impl Controller {
    pub fn new(
        config: &Config,
        library: AudioLibrary,
        ports: DevicePorts,
        stop: CancellationToken,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let [start, end] = &config.playlists.daytime_range;
        let range = DaytimeRange::parse(start, end)?;

        let broadcaster = Arc::new(StateBroadcaster::new());
        let scheduler = Arc::new(PlaylistScheduler::new(
            range,
            ports.clock,
            Arc::clone(&broadcaster),
        ));
        let kill_switch = KillSwitch::new(
            config.controller.kill_switch_window(),
            Arc::clone(&broadcaster),
        );

        let engine = PlaybackEngine::new(config.audio.format(), config.audio.buffer_length_bytes);
        {
            // the only path that changes "currently playing"
            let broadcaster = Arc::clone(&broadcaster);
            engine.subscribe(Arc::new(move |event: &ActivityEvent| {
                let description = match event {
                    ActivityEvent::Started(description) => description.clone(),
                    ActivityEvent::Finished => String::new(),
                };
                broadcaster.publish(ControllerStateUpdate::CurrentlyPlaying(description));
            }));
        }

        let volume = Volume::new(
            default_volume(&config.volume, scheduler.current_mode()),
            config.volume.max,
        );
        engine.set_gain(volume.gain());

        info!(
            "🎛 controller ready: daytime {}-{}, kill switch {}s, volume {}/{}",
            start,
            end,
            config.controller.kill_switch_secs,
            volume.level(),
            volume.max()
        );

        Ok(Self {
            inner: Arc::new(ControllerInner {
                engine,
                scheduler,
                kill_switch,
                broadcaster,
                lifecycle: ports.lifecycle,
                battery: ports.battery,
                settings: config.controller.clone(),
                volume_defaults: config.volume.clone(),
                state: Mutex::new(ControllerState {
                    library,
                    volume,
                    last_activity: Instant::now(),
                }),
                stop,
            }),
        })
    }

    pub fn subscribe(&self, subscriber: Arc<dyn StateSubscriber>) {
        self.inner.broadcaster.subscribe(subscriber);
    }

    pub fn engine(&self) -> &PlaybackEngine {
        &self.inner.engine
    }

    pub fn scheduler(&self) -> &Arc<PlaylistScheduler> {
        &self.inner.scheduler
    }

    pub fn kill_switch(&self) -> &KillSwitch {
        &self.inner.kill_switch
    }

    pub fn volume(&self) -> Volume {
        self.state().volume
    }

    pub fn current_mode(&self) -> PlaylistMode {
        self.inner.scheduler.current_mode()
    }

    pub fn idle_for(&self) -> Duration {
        self.state().last_activity.elapsed()
    }

    /// The single entry point for user intent. Never fails the caller:
    /// anything that goes wrong is logged.
    pub fn handle_action(&self, action: Action) {
        self.record_activity();
        debug!("🎮 {}", action);

        match action {
            Action::PlaySong => self.play_song(),
            Action::PlayAnimalSound => self.play_animal_sound(),
            Action::StopPlaying => self.inner.engine.stop(),
            Action::ActivateKillSwitch => {
                self.inner.engine.stop();
                self.inner.kill_switch.activate();
            }
            Action::ChangePlaylist(name) => self.change_playlist(&name),
            Action::VolumeUp => self.change_volume(|volume| {
                volume.step_up();
            }),
            Action::VolumeDown => self.change_volume(|volume| {
                volume.step_down();
            }),
            Action::ResetDevice => self.inner.lifecycle.reset(),
            Action::DeviceTimeChanged => {
                info!("🕰 device time changed, rescheduling playlist boundaries");
                self.inner.scheduler.restart_publisher();
            }
        }
    }

    /// Decode and handle a raw command code. Unknown codes still count as
    /// activity but are otherwise ignored.
    pub fn handle_command(&self, code: u8) {
        match Action::from_code(code) {
            Some(action) => self.handle_action(action),
            None => {
                self.record_activity();
                warn!("❓ unknown command code {}, ignoring", code);
            }
        }
    }

    /// Run the device until an interface closes, the stop token fires, or the
    /// output fails.
    pub async fn take_control(
        &self,
        interfaces: Vec<Box<dyn Interface>>,
        output: Box<dyn AudioOutput>,
    ) -> ControlExit {
        info!("🎛 taking control with {} interface(s)", interfaces.len());
        self.publish_full_state();

        let engine = self.inner.engine.clone();
        let mut feed = tokio::spawn(async move {
            let mut output = output;
            engine.run(output.as_mut()).await
        });

        // startup sound goes out before any interface can act
        self.play_system_sound("startup");
        self.record_activity();

        self.inner.scheduler.restart_publisher();

        let mut background = JoinSet::new();
        background.spawn(self.clone().monitor_inactivity());
        if let Some(gauge) = self.inner.battery.clone() {
            background.spawn(self.clone().publish_battery(gauge));
        }

        let mut listeners = JoinSet::new();
        for interface in interfaces {
            let sink = ActionSink::new(self.clone());
            listeners.spawn(async move {
                let name = interface.name().to_string();
                info!("👂 interface '{}' listening", name);
                let result = interface.listen(sink).await;
                (name, result)
            });
        }

        let exit = tokio::select! {
            _ = self.inner.stop.cancelled() => {
                info!("stop requested");
                ControlExit::StopRequested
            }
            Some(joined) = listeners.join_next() => {
                match joined {
                    Ok((name, Ok(()))) => info!("interface '{}' closed", name),
                    Ok((name, Err(e))) => error!("interface '{}' failed: {:#}", name, e),
                    Err(e) => error!("interface task died: {}", e),
                }
                ControlExit::InterfaceClosed
            }
            finished = &mut feed => {
                match finished {
                    Ok(Err(e)) => error!("💥 feed loop failed: {}", e),
                    Ok(Ok(())) => error!("💥 feed loop returned"),
                    Err(e) => error!("💥 feed loop died: {}", e),
                }
                ControlExit::OutputFailed
            }
        };

        listeners.abort_all();
        background.abort_all();
        self.inner.scheduler.stop_publisher();
        self.inner.kill_switch.stop_publisher();

        if exit == ControlExit::OutputFailed {
            // no heartbeat left to play anything on
            self.inner.engine.stop();
            self.inner.lifecycle.reset();
        } else {
            self.play_system_sound("shutdown");
            self.drain_playback().await;
            self.inner.engine.stop();
            feed.abort();
        }

        info!("🎛 control released ({:?})", exit);
        exit
    }

    fn play_song(&self) {
        if self.inner.kill_switch.is_active() {
            debug!("kill switch active, ignoring song request");
            return;
        }
        let mode = self.inner.scheduler.current_mode();
        let (name, path) = self.state().library.get_random_song(mode);
        self.play_file(&path, &format!("{} {}", SONG_MARKER, name));
    }

    fn play_animal_sound(&self) {
        if self.inner.kill_switch.is_active() {
            debug!("kill switch active, ignoring animal request");
            return;
        }
        let (name, path) = self.state().library.get_random_animal_sound();
        self.play_file(&path, &format!("{} {}", ANIMAL_MARKER, name));
    }

    fn play_system_sound(&self, name: &str) {
        let path = match self.state().library.get_sound_filename(name) {
            Ok(path) => path,
            Err(e) => {
                warn!("no {} sound: {}", name, e);
                return;
            }
        };
        self.play_file(&path, "");
    }

    fn play_file(&self, path: &std::path::Path, description: &str) {
        if let Err(e) = self.inner.engine.play(path, description) {
            warn!("can't play {}: {}", path.display(), e);
        }
    }

    /// Override today's playlist by name and switch to that mode's default
    /// volume. Unknown names are logged and change nothing.
    pub fn change_playlist(&self, name: &str) {
        let mode = match name.parse::<PlaylistMode>() {
            Ok(mode) => mode,
            Err(e) => {
                warn!("{}, keeping {}", e, self.current_mode());
                return;
            }
        };

        self.inner.scheduler.override_mode(mode);
        let level = default_volume(&self.inner.volume_defaults, mode);
        self.change_volume(|volume| volume.set_level(level));
    }

    fn change_volume(&self, adjust: impl FnOnce(&mut Volume)) {
        let volume = {
            let mut state = self.state();
            adjust(&mut state.volume);
            state.volume
        };

        self.inner.engine.set_gain(volume.gain());
        debug!("🔊 volume {}/{}", volume.level(), volume.max());
        self.inner
            .broadcaster
            .publish(ControllerStateUpdate::Volume(volume.percent()));
    }

    fn publish_full_state(&self) {
        self.inner.scheduler.publish_current();
        let volume = self.volume();
        self.inner
            .broadcaster
            .publish(ControllerStateUpdate::Volume(volume.percent()));
        self.inner.broadcaster.publish(ControllerStateUpdate::CurrentlyPlaying(
            self.inner.engine.current_description().unwrap_or_default(),
        ));
        self.inner.broadcaster.publish(ControllerStateUpdate::KillSwitchCounter(
            self.inner.kill_switch.remaining().as_secs(),
        ));
    }

    fn record_activity(&self) {
        self.state().last_activity = Instant::now();
    }

    async fn monitor_inactivity(self) {
        let threshold = self.inner.settings.inactivity_sleep_after();
        let mut ticker = tokio::time::interval(self.inner.settings.inactivity_check_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;

            // a song still playing is not a bored child
            if self.inner.engine.is_streaming() {
                self.record_activity();
                continue;
            }

            if self.idle_for() > threshold {
                info!("💤 idle for over {}s", threshold.as_secs());
                self.play_system_sound("shutdown");
                self.drain_playback().await;
                if self.idle_for() <= threshold {
                    debug!("button pressed during the shutdown sound, staying awake");
                    continue;
                }
                self.inner.lifecycle.sleep();
                self.record_activity();
            }
        }
    }

    async fn publish_battery(self, gauge: Arc<dyn BatteryGauge>) {
        let mut ticker = tokio::time::interval(self.inner.settings.battery_publish_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if let Some(level) = gauge.level_percent() {
                self.inner
                    .broadcaster
                    .publish(ControllerStateUpdate::Battery(level));
            }
        }
    }

    /// Let the shutdown sound finish, within the configured drain time.
    async fn drain_playback(&self) {
        let drain = self.inner.settings.shutdown_drain();
        let engine = &self.inner.engine;

        let drained = tokio::time::timeout(drain, async {
            while engine.is_streaming() {
                tokio::time::sleep(DRAIN_POLL).await;
            }
        })
        .await;

        if drained.is_err() {
            debug!("shutdown sound cut off after {}ms", drain.as_millis());
        }
    }

    fn state(&self) -> MutexGuard<'_, ControllerState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn default_volume(defaults: &VolumeConfig, mode: PlaylistMode) -> u8 {
    match mode {
        PlaylistMode::Daytime => defaults.daytime_default,
        PlaylistMode::Nighttime => defaults.nighttime_default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::library::SoundPool;
    use crate::device::ManualClock;
    use chrono::NaiveDate;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct CountingLifecycle {
        sleeps: AtomicU32,
        resets: AtomicU32,
    }

    impl DeviceLifecycle for CountingLifecycle {
        fn sleep(&self) {
            self.sleeps.fetch_add(1, Ordering::SeqCst);
        }

        fn reset(&self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn library() -> AudioLibrary {
        // files are never opened here: these tests only exercise state
        fn pool(name: &'static str, file: &str) -> SoundPool {
            SoundPool::new(name, vec![PathBuf::from(file)])
        }
        AudioLibrary::new(
            pool("daytime songs", "/nowhere/day.wav"),
            pool("nighttime songs", "/nowhere/night.wav"),
            pool("animal sounds", "/nowhere/cow.wav"),
            PathBuf::from("/nowhere/sounds"),
        )
        .unwrap()
    }

    type Updates = Arc<Mutex<Vec<ControllerStateUpdate>>>;

    fn june_first_at(hour: u32) -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            NaiveDate::from_ymd_opt(2024, 6, 1)
                .unwrap()
                .and_hms_opt(hour, 0, 0)
                .unwrap(),
        ))
    }

    fn build(clock: Arc<ManualClock>, battery: Option<Arc<dyn BatteryGauge>>) -> (Controller, Arc<CountingLifecycle>, Updates) {
        let lifecycle = Arc::new(CountingLifecycle::default());
        let controller = Controller::new(
            &Config::default(),
            library(),
            DevicePorts {
                lifecycle: lifecycle.clone(),
                clock,
                battery,
            },
            CancellationToken::new(),
        )
        .unwrap();

        let updates = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&updates);
        controller.subscribe(Arc::new(move |update: &ControllerStateUpdate| {
            sink.lock().unwrap().push(update.clone());
        }));
        (controller, lifecycle, updates)
    }

    fn controller_at(hour: u32) -> (Controller, Arc<CountingLifecycle>, Updates) {
        build(june_first_at(hour), None)
    }

    /// Reads a scripted series of levels, then nothing.
    struct ScriptedGauge {
        readings: Mutex<Vec<Option<u8>>>,
    }

    impl BatteryGauge for ScriptedGauge {
        fn level_percent(&self) -> Option<u8> {
            let mut readings = self.readings.lock().unwrap();
            if readings.is_empty() {
                None
            } else {
                readings.remove(0)
            }
        }
    }

    #[test]
    fn test_starts_at_the_mode_default_volume() {
        let (day, _, _) = controller_at(10);
        assert_eq!(day.volume().level(), 7);
        let (night, _, _) = controller_at(21);
        assert_eq!(night.volume().level(), 4);
        assert_eq!(night.current_mode(), PlaylistMode::Nighttime);
    }

    #[test]
    fn test_volume_steps_publish_percent_and_set_gain() {
        let (controller, _, updates) = controller_at(10);

        controller.handle_action(Action::VolumeUp);
        assert_eq!(controller.volume().level(), 8);
        assert_eq!(controller.engine().gain(), crate::audio::Gain::Unity);

        controller.handle_action(Action::VolumeDown);
        assert_eq!(
            *updates.lock().unwrap(),
            vec![ControllerStateUpdate::Volume(100), ControllerStateUpdate::Volume(87)]
        );
    }

    #[test]
    fn test_change_playlist_applies_mode_default_volume() {
        let (controller, _, updates) = controller_at(10);

        controller.handle_action(Action::ChangePlaylist("nighttime".into()));
        assert_eq!(controller.current_mode(), PlaylistMode::Nighttime);
        assert_eq!(controller.volume().level(), 4);
        assert_eq!(
            *updates.lock().unwrap(),
            vec![
                ControllerStateUpdate::PlaylistMode(PlaylistMode::Nighttime),
                ControllerStateUpdate::Volume(50),
            ]
        );
    }

    #[test]
    fn test_unknown_playlist_changes_nothing() {
        let (controller, _, updates) = controller_at(10);
        controller.handle_action(Action::ChangePlaylist("disco".into()));
        assert_eq!(controller.current_mode(), PlaylistMode::Daytime);
        assert_eq!(controller.volume().level(), 7);
        assert!(updates.lock().unwrap().is_empty());
    }

    #[test]
    fn test_reset_goes_to_the_lifecycle() {
        let (controller, lifecycle, _) = controller_at(10);
        controller.handle_action(Action::ResetDevice);
        controller.handle_command(20);
        assert_eq!(lifecycle.resets.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unreadable_song_is_logged_not_raised() {
        let (controller, _, updates) = controller_at(10);
        controller.handle_action(Action::PlaySong);
        assert!(!controller.engine().is_streaming());
        assert!(updates.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_any_command_counts_as_activity() {
        let (controller, _, _) = controller_at(10);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(controller.idle_for(), Duration::from_secs(30));

        controller.handle_command(99);
        assert_eq!(controller.idle_for(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactivity_puts_device_to_sleep() {
        let (controller, lifecycle, _) = controller_at(10);
        let monitor = tokio::spawn(controller.clone().monitor_inactivity());

        // default: sleep after 600s idle, checked every 10s
        tokio::time::sleep(Duration::from_secs(590)).await;
        assert_eq!(lifecycle.sleeps.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(lifecycle.sleeps.load(Ordering::SeqCst), 1);

        // waking is activity, so no immediate second sleep
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(lifecycle.sleeps.load(Ordering::SeqCst), 1);

        monitor.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_time_change_republishes_the_mode() {
        let clock = june_first_at(10);
        let (controller, _, updates) = build(clock.clone(), None);

        controller.handle_action(Action::DeviceTimeChanged);
        tokio::task::yield_now().await;
        assert_eq!(
            *updates.lock().unwrap(),
            vec![ControllerStateUpdate::PlaylistMode(PlaylistMode::Daytime)]
        );

        // the clock jumps into the evening: the restarted publisher reports it at once
        clock.set(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap().and_hms_opt(21, 0, 0).unwrap());
        controller.handle_action(Action::DeviceTimeChanged);
        tokio::task::yield_now().await;
        assert_eq!(
            updates.lock().unwrap().last(),
            Some(&ControllerStateUpdate::PlaylistMode(PlaylistMode::Nighttime))
        );
        assert_eq!(updates.lock().unwrap().len(), 2);

        controller.scheduler().stop_publisher();
    }

    #[tokio::test(start_paused = true)]
    async fn test_battery_published_every_interval_when_readable() {
        let gauge: Arc<dyn BatteryGauge> = Arc::new(ScriptedGauge {
            readings: Mutex::new(vec![Some(80), None, Some(79)]),
        });
        let (controller, _, updates) = build(june_first_at(10), Some(gauge.clone()));
        let battery = |updates: &Updates| -> Vec<u8> {
            updates
                .lock()
                .unwrap()
                .iter()
                .filter_map(|update| match update {
                    ControllerStateUpdate::Battery(level) => Some(*level),
                    _ => None,
                })
                .collect()
        };
        let publisher = tokio::spawn(controller.clone().publish_battery(gauge));

        // default interval is 60s and the first reading is immediate
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(battery(&updates), vec![80]);

        // unreadable gauge: nothing published for that tick
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(battery(&updates), vec![80]);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(battery(&updates), vec![80, 79]);
        assert_eq!(updates.lock().unwrap().len(), 2);

        publisher.abort();
    }
}
