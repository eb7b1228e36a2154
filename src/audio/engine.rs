// Playback engine - the device's heartbeat
// Owns the one open stream and keeps the output device fed, with samples or with silence

use super::output::AudioOutput;
use super::{is_wav_path, Gain, PcmFormat, WAV_HEADER_LEN};
use crate::error::EngineError;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityEvent {
    Started(String),
    Finished,
}

pub type ActivityListener = Arc<dyn Fn(&ActivityEvent) + Send + Sync>;

enum EngineState {
    Idle,
    Streaming {
        stream: Box<dyn Read + Send>,
        description: String,
    },
}

struct Shared {
    state: EngineState,
    gain: Gain,
}

struct Inner {
    format: PcmFormat,
    chunk_len: usize,
    shared: Mutex<Shared>,
    listeners: Mutex<Vec<ActivityListener>>,
}

/// What the feed loop should hand to the device next
enum Chunk {
    Silence,
    Samples(usize),
    Muted(usize),
    EndOfStream,
}

/// Cheap to clone - every clone drives the same stream.
#[derive(Clone)]
pub struct PlaybackEngine {
    inner: Arc<Inner>,
}

impl PlaybackEngine {
    pub fn new(format: PcmFormat, buffer_length_bytes: usize) -> Self {
        // whole frames only, so gain never sees a split sample
        let frame = format.bytes_per_sample() * usize::from(format.channels.max(1));
        let chunk_len = (buffer_length_bytes / frame).max(1) * frame;

        Self {
            inner: Arc::new(Inner {
                format,
                chunk_len,
                shared: Mutex::new(Shared {
                    state: EngineState::Idle,
                    gain: Gain::Unity,
                }),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn format(&self) -> PcmFormat {
        self.inner.format
    }

    pub fn subscribe(&self, listener: ActivityListener) {
        lock(&self.inner.listeners).push(listener);
    }

    /// Validate `path` against the device format and start streaming it.
    ///
    /// A rejected file leaves whatever is playing untouched. An accepted one
    /// stops the current stream first, so two handles are never open at once.
    pub fn play(&self, path: &Path, description: &str) -> Result<(), EngineError> {
        self.check_format(path)?;

        self.stop();

        let mut file = File::open(path).map_err(|source| EngineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        file.seek(SeekFrom::Start(WAV_HEADER_LEN))
            .map_err(|source| EngineError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        info!("▶ streaming {} ({})", path.display(), description);
        self.start_stream(Box::new(file), description);
        Ok(())
    }

    /// Hand an already positioned PCM reader to the feed loop.
    pub(crate) fn start_stream(&self, stream: Box<dyn Read + Send>, description: &str) {
        lock(&self.inner.shared).state = EngineState::Streaming {
            stream,
            description: description.to_string(),
        };
        self.notify(&ActivityEvent::Started(description.to_string()));
    }

    /// Close the open stream, if any. Always reports `Finished`.
    pub fn stop(&self) {
        let previous = {
            let mut shared = lock(&self.inner.shared);
            std::mem::replace(&mut shared.state, EngineState::Idle)
        };

        if let EngineState::Streaming { description, .. } = previous {
            debug!("■ stopped '{}'", description);
        }
        self.notify(&ActivityEvent::Finished);
    }

    pub fn set_gain(&self, gain: Gain) {
        lock(&self.inner.shared).gain = gain;
    }

    pub fn gain(&self) -> Gain {
        lock(&self.inner.shared).gain
    }

    pub fn is_streaming(&self) -> bool {
        matches!(lock(&self.inner.shared).state, EngineState::Streaming { .. })
    }

    pub fn current_description(&self) -> Option<String> {
        match &lock(&self.inner.shared).state {
            EngineState::Streaming { description, .. } => Some(description.clone()),
            EngineState::Idle => None,
        }
    }

    /// The feed loop. Only returns when the output device fails.
    ///
    /// Both buffers are allocated here once; the read buffer stays borrowed by
    /// the write until the device has accepted it, so the next read can never
    /// overwrite samples still in flight.
    pub async fn run<O>(&self, output: &mut O) -> Result<(), EngineError>
    where
        O: AudioOutput + ?Sized,
    {
        let mut buffer = vec![0u8; self.inner.chunk_len].into_boxed_slice();
        let silence = vec![self.inner.format.silence_byte(); self.inner.chunk_len].into_boxed_slice();

        info!(
            "feed loop running: {} Hz, {} ch, {} bit, {} byte chunks",
            self.inner.format.sample_rate,
            self.inner.format.channels,
            self.inner.format.bits_per_sample,
            self.inner.chunk_len
        );

        loop {
            let written = match self.fill(&mut buffer) {
                Chunk::Silence => output.write(&silence).await,
                Chunk::Samples(n) => output.write(&buffer[..n]).await,
                Chunk::Muted(n) => output.write(&silence[..n]).await,
                Chunk::EndOfStream => {
                    // already closed inside fill(), next pass emits silence
                    self.notify(&ActivityEvent::Finished);
                    continue;
                }
            };
            written.map_err(EngineError::OutputWrite)?;
        }
    }

    fn fill(&self, buffer: &mut [u8]) -> Chunk {
        let mut shared = lock(&self.inner.shared);
        let gain = shared.gain;

        let EngineState::Streaming { stream, description } = &mut shared.state else {
            return Chunk::Silence;
        };

        let result = loop {
            match stream.read(buffer) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => break other,
            }
        };

        match result {
            Ok(0) => {
                debug!("end of stream '{}'", description);
            }
            Ok(n) if gain == Gain::Mute => return Chunk::Muted(n),
            Ok(n) => {
                gain.apply(&mut buffer[..n], &self.inner.format);
                return Chunk::Samples(n);
            }
            Err(e) => {
                warn!("read failed on '{}', treating as end of stream: {}", description, e);
            }
        }

        // close under the same lock so a concurrent play() can't be clobbered
        shared.state = EngineState::Idle;
        Chunk::EndOfStream
    }

    fn check_format(&self, path: &Path) -> Result<(), EngineError> {
        let unsupported = |reason: String| EngineError::UnsupportedFormat {
            path: path.to_path_buf(),
            reason,
        };

        if !is_wav_path(path) {
            return Err(unsupported("only .wav files are supported".to_string()));
        }

        // the probe handle is dropped before any stream is touched
        let spec = hound::WavReader::open(path)
            .map_err(|e| unsupported(format!("unreadable header: {}", e)))?
            .spec();

        let expected = self.inner.format;
        if spec.sample_format != hound::SampleFormat::Int
            || spec.sample_rate != expected.sample_rate
            || spec.channels != expected.channels
            || spec.bits_per_sample != expected.bits_per_sample
        {
            return Err(unsupported(format!(
                "{} Hz, {} ch, {} bit {:?} (device wants {} Hz, {} ch, {} bit)",
                spec.sample_rate,
                spec.channels,
                spec.bits_per_sample,
                spec.sample_format,
                expected.sample_rate,
                expected.channels,
                expected.bits_per_sample
            )));
        }

        Ok(())
    }

    fn notify(&self, event: &ActivityEvent) {
        // snapshot first: listeners may call straight back into the engine
        let listeners: Vec<ActivityListener> = lock(&self.inner.listeners).clone();
        for listener in listeners {
            listener(event);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
