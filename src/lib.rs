// SweetYaar - control core for a battery-powered audio toy
// Streams PCM to a fixed-format output and turns buttons, remote commands and timers into one state machine

pub mod audio;   // playback engine, sound library, output devices
pub mod config;  // settings with defaults written on first run
pub mod control; // controller, kill switch, playlist scheduling, volume
pub mod device;  // clock, power and battery ports
pub mod error;   // error taxonomy
pub mod ui;      // terminal remote and headless console

pub use audio::{AudioLibrary, AudioOutput, NullOutput, PlaybackEngine};
pub use config::Config;
pub use control::{Action, ControlExit, Controller, ControllerStateUpdate, DevicePorts, PlaylistMode};
pub use error::{ConfigError, EngineError, LibraryError};
