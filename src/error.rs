// Error types for the control core
// Startup problems are fatal, everything that happens at runtime is contained per call

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Malformed or unusable configuration. Always aborts startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid time of day '{0}', expected HH:MM")]
    InvalidTime(String),

    #[error("daytime range starts and ends at {0}, the range would be ambiguous")]
    EmptyRange(String),

    #[error("no .wav files found for {pool} in {dirs:?}")]
    EmptyPool { pool: &'static str, dirs: Vec<PathBuf> },

    #[error("invalid volume settings: {0}")]
    Volume(String),

    #[error("invalid audio settings: {0}")]
    Audio(String),

    #[error("could not find a config directory")]
    NoConfigDir,

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to write default config to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Failures of the playback engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The file does not match the device's fixed PCM format. Engine state is untouched.
    #[error("unsupported audio file {path}: {reason}")]
    UnsupportedFormat { path: PathBuf, reason: String },

    #[error("failed to open {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The output device refused a buffer. The feed loop cannot continue.
    #[error("audio output write failed: {0}")]
    OutputWrite(#[source] io::Error),
}

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("unknown sound '{0}'")]
    UnknownSound(String),
}
