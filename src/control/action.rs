use std::fmt;

/// Everything a user (or the remote) can ask the toy to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    PlaySong,
    PlayAnimalSound,
    StopPlaying,
    ActivateKillSwitch,
    /// Playlist name as received - validated by the controller
    ChangePlaylist(String),
    VolumeUp,
    VolumeDown,
    ResetDevice,
    DeviceTimeChanged,
}

impl Action {
    /// Decode a command byte from the wireless remote.
    ///
    /// `DeviceTimeChanged` has no code: the remote raises it by writing the
    /// time characteristic, not through the command channel.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Action::PlaySong),
            2 => Some(Action::PlayAnimalSound),
            3 => Some(Action::StopPlaying),
            4 => Some(Action::ActivateKillSwitch),
            10 => Some(Action::ChangePlaylist("daytime".to_string())),
            11 => Some(Action::ChangePlaylist("nighttime".to_string())),
            12 => Some(Action::VolumeUp),
            13 => Some(Action::VolumeDown),
            20 => Some(Action::ResetDevice),
            _ => None,
        }
    }

    /// Command names as the remote's buttons call them, for text consoles
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "play_song" | "song" => Some(Action::PlaySong),
            "play_animal" | "animal" => Some(Action::PlayAnimalSound),
            "stop" => Some(Action::StopPlaying),
            "kill_switch" => Some(Action::ActivateKillSwitch),
            "volume_up" | "+" => Some(Action::VolumeUp),
            "volume_down" | "-" => Some(Action::VolumeDown),
            "reset_device" => Some(Action::ResetDevice),
            "time_changed" => Some(Action::DeviceTimeChanged),
            other => other
                .strip_prefix("playlist ")
                .map(|playlist| Action::ChangePlaylist(playlist.trim().to_string()))
                .or_else(|| match other {
                    "daytime" | "nighttime" => Some(Action::ChangePlaylist(other.to_string())),
                    _ => None,
                }),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::PlaySong => write!(f, "play song"),
            Action::PlayAnimalSound => write!(f, "play animal sound"),
            Action::StopPlaying => write!(f, "stop playing"),
            Action::ActivateKillSwitch => write!(f, "kill switch"),
            Action::ChangePlaylist(name) => write!(f, "change playlist to '{}'", name),
            Action::VolumeUp => write!(f, "volume up"),
            Action::VolumeDown => write!(f, "volume down"),
            Action::ResetDevice => write!(f, "reset device"),
            Action::DeviceTimeChanged => write!(f, "device time changed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_codes() {
        assert_eq!(Action::from_code(1), Some(Action::PlaySong));
        assert_eq!(Action::from_code(2), Some(Action::PlayAnimalSound));
        assert_eq!(Action::from_code(3), Some(Action::StopPlaying));
        assert_eq!(Action::from_code(4), Some(Action::ActivateKillSwitch));
        assert_eq!(Action::from_code(10), Some(Action::ChangePlaylist("daytime".into())));
        assert_eq!(Action::from_code(11), Some(Action::ChangePlaylist("nighttime".into())));
        assert_eq!(Action::from_code(12), Some(Action::VolumeUp));
        assert_eq!(Action::from_code(13), Some(Action::VolumeDown));
        assert_eq!(Action::from_code(20), Some(Action::ResetDevice));

        for unknown in [0, 5, 9, 14, 21, 255] {
            assert_eq!(Action::from_code(unknown), None);
        }
    }

    #[test]
    fn test_console_names() {
        assert_eq!(Action::from_name(" Play_Song "), Some(Action::PlaySong));
        assert_eq!(Action::from_name("nighttime"), Some(Action::ChangePlaylist("nighttime".into())));
        assert_eq!(Action::from_name("playlist weekend"), Some(Action::ChangePlaylist("weekend".into())));
        assert_eq!(Action::from_name("time_changed"), Some(Action::DeviceTimeChanged));
        assert_eq!(Action::from_name("dance"), None);
    }
}
