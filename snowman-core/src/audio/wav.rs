//! WAV file replay as an alternative to a live microphone.
//!
//! The file is decoded up front with `hound`, downmixed to mono `f32`, then
//! replayed on a dedicated thread through the same [`CaptureChain`] a cpal
//! callback would use. With `realtime` set, playback is paced to wall-clock
//! time so the control stage sees the same cadence as a device.
//!
//! When playback ends the chain and its sender are dropped, which the control
//! loop observes as a disconnected channel.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::{downmix_into, CaptureChain};
use crate::capture::CaptureStage;
use crate::error::{Result, SnowmanError};

/// A decoded mono WAV file.
#[derive(Debug, Clone)]
pub struct WavSource {
    path: PathBuf,
    samples: Vec<f32>,
    sample_rate: u32,
}

impl WavSource {
    /// Decode `path` into mono `f32`.
    ///
    /// # Errors
    /// `SnowmanError::Wav` if the file cannot be opened or decoded.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let wav_err = |e: hound::Error| SnowmanError::Wav(format!("{}: {e}", path.display()));

        let mut reader = hound::WavReader::open(path).map_err(wav_err)?;
        let spec = reader.spec();
        let channels = usize::from(spec.channels.max(1));

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(wav_err)?,
            hound::SampleFormat::Int => {
                let scale = (1_i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(wav_err)?
            }
        };

        let mut samples = Vec::with_capacity(interleaved.len() / channels);
        downmix_into(&interleaved, channels, &mut samples, |s| s);

        info!(
            path = %path.display(),
            sample_rate = spec.sample_rate,
            channels,
            bits = spec.bits_per_sample,
            secs = samples.len() as f32 / spec.sample_rate.max(1) as f32,
            "wav source loaded"
        );

        Ok(Self {
            path: path.to_path_buf(),
            samples,
            sample_rate: spec.sample_rate,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Mono samples at [`sample_rate`](Self::sample_rate).
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate.max(1) as f64)
    }

    /// Start replaying into `stage` on a new thread.
    ///
    /// Playback ends at end of file, when `running` is cleared, or when the
    /// control stage goes away. A trailing partial quantum is not delivered.
    ///
    /// # Errors
    /// `AudioDevice` if the resampler cannot be built, `Io` if the thread
    /// cannot be spawned.
    pub fn play(
        self,
        target_rate: u32,
        quantum: usize,
        stage: CaptureStage,
        realtime: bool,
        running: Arc<AtomicBool>,
    ) -> Result<JoinHandle<u64>> {
        let mut chain = CaptureChain::new(self.sample_rate, target_rate, quantum, stage)?;
        // 10 ms of file audio per feed, mirroring a device callback.
        let period = (self.sample_rate as usize / 100).max(1);
        let rate = self.sample_rate.max(1) as f64;

        let handle = thread::Builder::new()
            .name("snowman-wav".into())
            .spawn(move || {
                let started = Instant::now();
                let mut fed = 0u64;

                for chunk in self.samples.chunks(period) {
                    if !running.load(Ordering::Acquire) {
                        debug!(fed, "wav playback stopped");
                        break;
                    }
                    if !chain.feed(chunk) {
                        warn!(fed, "control stage gone, ending wav playback");
                        break;
                    }
                    fed += chunk.len() as u64;

                    if realtime {
                        let due = started + Duration::from_secs_f64(fed as f64 / rate);
                        if let Some(wait) = due.checked_duration_since(Instant::now()) {
                            thread::sleep(wait);
                        }
                    }
                }

                info!(
                    fed,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "wav playback finished"
                );
                fed
            })?;

        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::{create_block_channel, OverflowPolicy};
    use crate::capture::ConversionMode;

    fn write_wav(path: &Path, rate: u32, channels: u16, frames: usize, value: i16) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for _ in 0..frames * channels as usize {
            writer.write_sample(value).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn open_downmixes_and_normalizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        write_wav(&path, 16_000, 2, 1_600, 16_384);

        let wav = WavSource::open(&path).unwrap();
        assert_eq!(wav.sample_rate(), 16_000);
        assert_eq!(wav.samples().len(), 1_600);
        approx::assert_abs_diff_eq!(wav.samples()[0], 0.5, epsilon = 1e-6);
        assert_eq!(wav.duration(), Duration::from_millis(100));
    }

    #[test]
    fn missing_file_is_wav_error() {
        let err = WavSource::open("/nonexistent/snowman.wav").unwrap_err();
        assert!(matches!(err, SnowmanError::Wav(_)));
    }

    #[test]
    fn playback_delivers_whole_quanta_then_disconnects() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mono.wav");
        write_wav(&path, 16_000, 1, 1_000, 0);

        let (tx, rx) = create_block_channel(64, OverflowPolicy::DropNewest);
        let stage = CaptureStage::new(ConversionMode::FixedPoint, tx);
        let running = Arc::new(AtomicBool::new(true));

        let handle = WavSource::open(&path)
            .unwrap()
            .play(16_000, 128, stage, false, running)
            .unwrap();
        assert_eq!(handle.join().unwrap(), 1_000);

        // 1000 / 128 = 7 whole quanta.
        let mut blocks = 0;
        while rx.try_recv().is_some() {
            blocks += 1;
        }
        assert_eq!(blocks, 7);
    }
}
