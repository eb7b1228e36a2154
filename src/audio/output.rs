// Output devices the feed loop can drive
// On the toy this is the I2S DAC; on a desktop it's the sound card or a paced null sink

use super::PcmFormat;
use async_trait::async_trait;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// A streaming DAC. `write` suspends until the device has taken the buffer.
#[async_trait]
pub trait AudioOutput: Send {
    async fn write(&mut self, samples: &[u8]) -> io::Result<()>;
}

/// Accepts samples at exactly the rate a real DAC would consume them.
///
/// Used for headless runs and tests - keeps the feed loop's timing honest
/// without any sound hardware.
pub struct NullOutput {
    bytes_per_second: u64,
    next_due: Option<Instant>,
    bytes_written: Arc<AtomicU64>,
}

impl NullOutput {
    pub fn new(format: PcmFormat) -> Self {
        Self {
            bytes_per_second: format.bytes_per_second().max(1),
            next_due: None,
            bytes_written: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Running total of accepted bytes, readable from other tasks
    pub fn bytes_written(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.bytes_written)
    }
}

#[async_trait]
impl AudioOutput for NullOutput {
    async fn write(&mut self, samples: &[u8]) -> io::Result<()> {
        let play_time = Duration::from_nanos(samples.len() as u64 * 1_000_000_000 / self.bytes_per_second);
        // deadline based so sleep jitter doesn't accumulate, but never bursts to catch up
        let now = Instant::now();
        let base = match self.next_due {
            Some(due) if due >= now => due,
            _ => now,
        };
        let due = base + play_time;
        tokio::time::sleep_until(due).await;
        self.next_due = Some(due);
        self.bytes_written.fetch_add(samples.len() as u64, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(feature = "audio")]
pub use host::RodioOutput;

#[cfg(feature = "audio")]
mod host {
    use super::{AudioOutput, PcmFormat};
    use async_trait::async_trait;
    use rodio::{OutputStream, Sink, Source};
    use std::io;
    use std::sync::mpsc as pool;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tracing::{error, info};

    // buffers queued in the sink before write() starts pushing back
    const QUEUE_DEPTH: usize = 2;

    /// Sound card output through rodio.
    ///
    /// rodio's stream must stay on the thread that opened it, so a dedicated
    /// thread owns it and the feed loop hands buffers over a bounded channel.
    /// Played buffers come back through `spare`, so once the queue is full
    /// no write allocates.
    pub struct RodioOutput {
        format: PcmFormat,
        tx: mpsc::Sender<Vec<i16>>,
        spare: pool::Receiver<Vec<i16>>,
    }

    impl RodioOutput {
        pub fn open(format: PcmFormat) -> io::Result<Self> {
            let (tx, mut rx) = mpsc::channel::<Vec<i16>>(1);
            let (spare_tx, spare) = pool::channel::<Vec<i16>>();
            let (ready_tx, ready_rx) = pool::channel::<Result<(), String>>();
            let channels = format.channels;
            let sample_rate = format.sample_rate;

            std::thread::Builder::new()
                .name("sweetyaar-output".to_string())
                .spawn(move || {
                    let (_stream, handle) = match OutputStream::try_default() {
                        Ok(pair) => pair,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e.to_string()));
                            return;
                        }
                    };
                    let sink = match Sink::try_new(&handle) {
                        Ok(sink) => sink,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e.to_string()));
                            return;
                        }
                    };
                    let _ = ready_tx.send(Ok(()));

                    while let Some(samples) = rx.blocking_recv() {
                        while sink.len() >= QUEUE_DEPTH {
                            std::thread::sleep(Duration::from_millis(2));
                        }
                        sink.append(PooledBuffer::new(samples, channels, sample_rate, spare_tx.clone()));
                    }
                    info!("output thread exiting");
                })?;

            match ready_rx.recv() {
                Ok(Ok(())) => {
                    info!("🔊 sound card output open ({} Hz, {} ch)", sample_rate, channels);
                    Ok(Self { format, tx, spare })
                }
                Ok(Err(e)) => {
                    error!("could not open sound card: {}", e);
                    Err(io::Error::new(io::ErrorKind::NotFound, e))
                }
                Err(_) => Err(io::Error::new(io::ErrorKind::BrokenPipe, "output thread died during init")),
            }
        }
    }

    #[async_trait]
    impl AudioOutput for RodioOutput {
        async fn write(&mut self, samples: &[u8]) -> io::Result<()> {
            let mut buffer = self.spare.try_recv().unwrap_or_default();
            convert_into(self.format.bits_per_sample, samples, &mut buffer);
            self.tx
                .send(buffer)
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "sound card output thread stopped"))
        }
    }

    /// Little-endian PCM bytes to rodio's i16 samples, keeping the top 16 bits.
    fn convert_into(bits_per_sample: u16, samples: &[u8], out: &mut Vec<i16>) {
        out.clear();
        match bits_per_sample {
            8 => out.extend(samples.iter().map(|&b| (i16::from(b) - 128) << 8)),
            16 => out.extend(samples.chunks_exact(2).map(|c| i16::from_le_bytes([c[0], c[1]]))),
            24 => out.extend(samples.chunks_exact(3).map(|c| i16::from_le_bytes([c[1], c[2]]))),
            _ => out.extend(samples.chunks_exact(4).map(|c| i16::from_le_bytes([c[2], c[3]]))),
        }
    }

    /// One queued buffer. Hands its storage back to the writer when rodio
    /// drops it.
    struct PooledBuffer {
        samples: Vec<i16>,
        next: usize,
        channels: u16,
        sample_rate: u32,
        spare: pool::Sender<Vec<i16>>,
    }

    impl PooledBuffer {
        fn new(samples: Vec<i16>, channels: u16, sample_rate: u32, spare: pool::Sender<Vec<i16>>) -> Self {
            Self {
                samples,
                next: 0,
                channels,
                sample_rate,
                spare,
            }
        }
    }

    impl Iterator for PooledBuffer {
        type Item = i16;

        fn next(&mut self) -> Option<i16> {
            let sample = *self.samples.get(self.next)?;
            self.next += 1;
            Some(sample)
        }
    }

    impl Source for PooledBuffer {
        fn current_frame_len(&self) -> Option<usize> {
            Some(self.samples.len() - self.next)
        }

        fn channels(&self) -> u16 {
            self.channels
        }

        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }

        fn total_duration(&self) -> Option<Duration> {
            None
        }
    }

    impl Drop for PooledBuffer {
        fn drop(&mut self) {
            // the writer may already be gone
            let _ = self.spare.send(std::mem::take(&mut self.samples));
        }
    }

}
