// Configuration management for SweetYaar
// Handles loading/saving settings, with sensible defaults when config is missing

use crate::audio::PcmFormat;
use crate::control::DaytimeRange;
use crate::error::ConfigError;
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub audio: AudioConfig,
    pub library: LibraryConfig,
    pub playlists: PlaylistConfig,
    pub volume: VolumeConfig,
    pub controller: ControllerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub buffer_length_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    pub daytime_songs: Vec<PathBuf>,
    pub nighttime_songs: Vec<PathBuf>,
    pub animal_sounds: Vec<PathBuf>,
    pub sounds_dir: PathBuf, // startup.wav, shutdown.wav
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistConfig {
    /// ["HH:MM", "HH:MM"] - daytime from the first, up to but excluding the second
    pub daytime_range: [String; 2],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeConfig {
    pub max: u8,
    pub daytime_default: u8,
    pub nighttime_default: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub kill_switch_secs: u64,
    pub inactivity_sleep_secs: u64,
    pub inactivity_check_secs: u64,
    pub battery_publish_secs: u64,
    pub shutdown_drain_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        let sd_root = dirs::audio_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sweetyaar");

        Self {
            audio: AudioConfig::default(),
            library: LibraryConfig {
                daytime_songs: vec![sd_root.join("songs").join("daytime")],
                nighttime_songs: vec![sd_root.join("songs").join("nighttime")],
                animal_sounds: vec![sd_root.join("animals")],
                sounds_dir: sd_root.join("sounds"),
            },
            playlists: PlaylistConfig {
                daytime_range: ["06:00".to_string(), "18:00".to_string()],
            },
            volume: VolumeConfig {
                max: 8,
                daytime_default: 7,
                nighttime_default: 4,
            },
            controller: ControllerConfig {
                kill_switch_secs: 300,
                inactivity_sleep_secs: 600,
                inactivity_check_secs: 10,
                battery_publish_secs: 60,
                shutdown_drain_ms: 1500,
            },
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        let format = PcmFormat::default();
        Self {
            sample_rate: format.sample_rate,
            channels: format.channels,
            bits_per_sample: format.bits_per_sample,
            buffer_length_bytes: 10000,
        }
    }
}

impl AudioConfig {
    pub fn format(&self) -> PcmFormat {
        PcmFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
            bits_per_sample: self.bits_per_sample,
        }
    }
}

impl ControllerConfig {
    pub fn kill_switch_window(&self) -> Duration {
        Duration::from_secs(self.kill_switch_secs)
    }

    pub fn inactivity_sleep_after(&self) -> Duration {
        Duration::from_secs(self.inactivity_sleep_secs)
    }

    pub fn inactivity_check_interval(&self) -> Duration {
        Duration::from_secs(self.inactivity_check_secs.max(1))
    }

    pub fn battery_publish_interval(&self) -> Duration {
        Duration::from_secs(self.battery_publish_secs.max(1))
    }

    pub fn shutdown_drain(&self) -> Duration {
        Duration::from_millis(self.shutdown_drain_ms)
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let write_error = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_error)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).map_err(write_error)?;

        Ok(())
    }

    /// Everything that can be checked before touching the SD card
    pub fn validate(&self) -> Result<(), ConfigError> {
        let format = self.audio.format();
        if !format.is_supported_depth() {
            return Err(ConfigError::Audio(format!(
                "{} bits per sample is not a PCM depth the feed loop handles",
                format.bits_per_sample
            )));
        }
        if format.sample_rate == 0 || format.channels == 0 {
            return Err(ConfigError::Audio("sample rate and channels must be non-zero".to_string()));
        }
        if self.audio.buffer_length_bytes < format.bytes_per_sample() * usize::from(format.channels) {
            return Err(ConfigError::Audio("buffer must hold at least one frame".to_string()));
        }

        let volume = &self.volume;
        if volume.max == 0 {
            return Err(ConfigError::Volume("max must be at least 1".to_string()));
        }
        if volume.daytime_default > volume.max || volume.nighttime_default > volume.max {
            return Err(ConfigError::Volume(format!(
                "defaults ({} / {}) exceed max {}",
                volume.daytime_default, volume.nighttime_default, volume.max
            )));
        }

        DaytimeRange::parse(&self.playlists.daytime_range[0], &self.playlists.daytime_range[1])?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = config_dir().ok_or(ConfigError::NoConfigDir)?.join("sweetyaar");

        Ok(config_dir.join("config.toml"))
    }
}
