//! Stepped volume control
//!
//! Volume is an integer in `0..=max`. `max` is the unattenuated baseline and
//! every step below it halves the amplitude; `0` mutes outright.

use crate::audio::Gain;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Volume {
    level: u8,
    max: u8,
}

impl Volume {
    pub fn new(level: u8, max: u8) -> Self {
        let max = max.max(1);
        Self {
            level: level.min(max),
            max,
        }
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn max(&self) -> u8 {
        self.max
    }

    pub fn set_level(&mut self, level: u8) {
        self.level = level.min(self.max);
    }

    /// One step louder, clamped at max. Returns whether anything changed.
    pub fn step_up(&mut self) -> bool {
        let before = self.level;
        self.level = self.level.saturating_add(1).min(self.max);
        before != self.level
    }

    /// One step quieter, clamped at 0 (mute). Returns whether anything changed.
    pub fn step_down(&mut self) -> bool {
        let before = self.level;
        self.level = self.level.saturating_sub(1);
        before != self.level
    }

    pub fn is_muted(&self) -> bool {
        self.level == 0
    }

    /// `100 * level / max`, what the remote shows
    pub fn percent(&self) -> u8 {
        (u16::from(self.level) * 100 / u16::from(self.max)) as u8
    }

    pub fn gain(&self) -> Gain {
        if self.level == 0 {
            Gain::Mute
        } else if self.level == self.max {
            Gain::Unity
        } else {
            Gain::Shift(u32::from(self.max - self.level))
        }
    }
}
