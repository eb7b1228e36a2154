pub mod engine;
pub mod library;
pub mod output;

pub use engine::{ActivityEvent, ActivityListener, PlaybackEngine};
pub use library::AudioLibrary;
pub use output::{AudioOutput, NullOutput};

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Every asset starts with a canonical RIFF/WAVE header of this size, skipped on open.
pub const WAV_HEADER_LEN: u64 = 44;

/// The one PCM layout the output device is configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self {
            sample_rate: 16000, // what the asset conversion script produces
            channels: 1,
            bits_per_sample: 16,
        }
    }
}

impl PcmFormat {
    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.bits_per_sample).div_ceil(8)
    }

    pub fn bytes_per_second(&self) -> u64 {
        u64::from(self.sample_rate) * u64::from(self.channels) * self.bytes_per_sample() as u64
    }

    /// 8-bit PCM is unsigned, everything wider is signed
    pub fn silence_byte(&self) -> u8 {
        if self.bits_per_sample == 8 {
            0x80
        } else {
            0
        }
    }

    pub fn is_supported_depth(&self) -> bool {
        matches!(self.bits_per_sample, 8 | 16 | 24 | 32)
    }
}

pub fn is_wav_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("wav"))
        .unwrap_or(false)
}

/// Attenuation applied to outgoing samples by the feed loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gain {
    /// Output silence no matter what is streaming
    Mute,
    /// Samples pass through untouched
    Unity,
    /// Arithmetic right shift per sample, -6 dB per step
    Shift(u32),
}

impl Gain {
    /// Apply in place. `Mute` is handled by the caller substituting the silence buffer.
    pub fn apply(self, samples: &mut [u8], format: &PcmFormat) {
        let shift = match self {
            Gain::Mute => {
                samples.fill(format.silence_byte());
                return;
            }
            Gain::Unity | Gain::Shift(0) => return,
            Gain::Shift(shift) => shift.min(u32::from(format.bits_per_sample) - 1),
        };

        match format.bits_per_sample {
            8 => {
                for byte in samples.iter_mut() {
                    let centered = i16::from(*byte) - 128;
                    *byte = ((centered >> shift) + 128) as u8;
                }
            }
            16 => {
                for chunk in samples.chunks_exact_mut(2) {
                    let sample = i16::from_le_bytes([chunk[0], chunk[1]]) >> shift;
                    chunk.copy_from_slice(&sample.to_le_bytes());
                }
            }
            24 => {
                for chunk in samples.chunks_exact_mut(3) {
                    // sign-extend through the top byte of an i32
                    let sample = (i32::from_le_bytes([0, chunk[0], chunk[1], chunk[2]]) >> 8) >> shift;
                    chunk.copy_from_slice(&sample.to_le_bytes()[..3]);
                }
            }
            32 => {
                for chunk in samples.chunks_exact_mut(4) {
                    let sample = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) >> shift;
                    chunk.copy_from_slice(&sample.to_le_bytes());
                }
            }
            _ => {}
        }
    }
}
