use crate::config::LibraryConfig;
use crate::control::PlaylistMode;
use crate::error::{ConfigError, LibraryError};
use rand::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use super::is_wav_path;

/// A set of interchangeable sounds, picked at random without immediate repeats.
#[derive(Debug)]
pub struct SoundPool {
    name: &'static str,
    files: Vec<PathBuf>,
    last_picked: Option<usize>,
}

impl SoundPool {
    pub fn new(name: &'static str, mut files: Vec<PathBuf>) -> Self {
        files.sort();
        Self {
            name,
            files,
            last_picked: None,
        }
    }

    pub fn scan(name: &'static str, dirs: &[PathBuf]) -> Result<Self, ConfigError> {
        let files = scan_wav_files(dirs);
        if files.is_empty() {
            return Err(ConfigError::EmptyPool {
                pool: name,
                dirs: dirs.to_vec(),
            });
        }
        info!("📁 {} pool: {} sounds", name, files.len());
        Ok(Self::new(name, files))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Random pick that never returns the previous pick when there is a choice.
    /// Returns (display name, path). Callers guarantee the pool is not empty.
    pub fn pick<R: Rng + ?Sized>(&mut self, rng: &mut R) -> (String, PathBuf) {
        let index = match (self.files.len(), self.last_picked) {
            (1, _) => 0,
            (n, None) => rng.gen_range(0..n),
            (n, Some(last)) => {
                // draw from the other n-1 slots and step over the last pick
                let index = rng.gen_range(0..n - 1);
                if index >= last {
                    index + 1
                } else {
                    index
                }
            }
        };
        self.last_picked = Some(index);

        let path = self.files[index].clone();
        debug!("{} pick: {}", self.name, path.display());
        (display_name(&path), path)
    }
}

/// Resolves logical sound requests to files on the SD card.
#[derive(Debug)]
pub struct AudioLibrary {
    daytime_songs: SoundPool,
    nighttime_songs: SoundPool,
    animal_sounds: SoundPool,
    sounds_dir: PathBuf,
    rng: StdRng,
}

impl AudioLibrary {
    pub fn new(
        daytime_songs: SoundPool,
        nighttime_songs: SoundPool,
        animal_sounds: SoundPool,
        sounds_dir: PathBuf,
    ) -> Result<Self, ConfigError> {
        for pool in [&daytime_songs, &nighttime_songs, &animal_sounds] {
            if pool.is_empty() {
                return Err(ConfigError::EmptyPool {
                    pool: pool.name,
                    dirs: Vec::new(),
                });
            }
        }

        Ok(Self {
            daytime_songs,
            nighttime_songs,
            animal_sounds,
            sounds_dir,
            rng: StdRng::from_entropy(),
        })
    }

    pub fn from_config(config: &LibraryConfig) -> Result<Self, ConfigError> {
        Self::new(
            SoundPool::scan("daytime songs", &config.daytime_songs)?,
            SoundPool::scan("nighttime songs", &config.nighttime_songs)?,
            SoundPool::scan("animal sounds", &config.animal_sounds)?,
            config.sounds_dir.clone(),
        )
    }

    /// Named system sound (`startup`, `shutdown`, ...) from the sounds directory
    pub fn get_sound_filename(&self, name: &str) -> Result<PathBuf, LibraryError> {
        let path = self.sounds_dir.join(format!("{}.wav", name));
        if path.is_file() {
            Ok(path)
        } else {
            Err(LibraryError::UnknownSound(name.to_string()))
        }
    }

    pub fn get_random_song(&mut self, mode: PlaylistMode) -> (String, PathBuf) {
        let pool = match mode {
            PlaylistMode::Daytime => &mut self.daytime_songs,
            PlaylistMode::Nighttime => &mut self.nighttime_songs,
        };
        pool.pick(&mut self.rng)
    }

    pub fn get_random_animal_sound(&mut self) -> (String, PathBuf) {
        self.animal_sounds.pick(&mut self.rng)
    }
}

fn scan_wav_files(dirs: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for dir in dirs {
        for entry in WalkDir::new(dir).follow_links(true).into_iter().filter_map(Result::ok) {
            let path = entry.path();
            if !entry.file_type().is_file() {
                continue;
            }
            // Skip hidden files (dotfiles, macOS resource forks on the SD card)
            if path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.starts_with('.'))
            {
                continue;
            }
            if is_wav_path(path) {
                files.push(path.to_path_buf());
            }
        }
    }

    files
}

fn display_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.replace('_', " "))
        .unwrap_or_else(|| path.display().to_string())
}
