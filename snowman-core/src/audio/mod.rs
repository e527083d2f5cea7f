//! Audio capture via the cpal backend.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It **must not** block on a mutex, perform I/O or allocate per call. The
//! whole capture path (downmix → [`RateConverter`] → [`QuantumFramer`] →
//! [`CaptureStage`]) therefore lives inside the callback as one owned
//! [`CaptureChain`] whose buffers are sized up front.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). `AudioCapture` must be created and dropped on the same thread; the
//! engine does this inside `spawn_blocking`.

pub mod device;
pub mod resample;
pub mod wav;

pub use device::{list_input_devices, DeviceInfo};
pub use resample::RateConverter;
pub use wav::WavSource;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    SampleFormat, SampleRate, Stream, SupportedStreamConfig,
};

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

use crate::buffering::framer::QuantumFramer;
use crate::capture::CaptureStage;
use crate::error::{Result, SnowmanError};

/// Device-rate mono audio in, detector-rate quanta out to the capture stage.
pub struct CaptureChain {
    converter: RateConverter,
    framer: QuantumFramer,
    stage: CaptureStage,
    /// Cleared once the capture stage reports the control side gone.
    alive: bool,
}

impl CaptureChain {
    /// # Errors
    /// `SnowmanError::AudioDevice` if the resampler cannot be built.
    pub fn new(
        capture_rate: u32,
        target_rate: u32,
        quantum: usize,
        stage: CaptureStage,
    ) -> Result<Self> {
        // 10 ms of device audio per rubato call.
        let chunk = (capture_rate as usize / 100).max(1);
        Ok(Self {
            converter: RateConverter::new(capture_rate, target_rate, chunk)?,
            framer: QuantumFramer::new(quantum),
            stage,
            alive: true,
        })
    }

    /// Push mono samples at the capture rate. A callback with no frames is
    /// reported to the capture stage as an absent block. Returns `false` once
    /// the control stage has gone away.
    pub fn feed(&mut self, mono: &[f32]) -> bool {
        if mono.is_empty() {
            return self.idle();
        }
        let Self {
            converter,
            framer,
            stage,
            alive,
        } = self;
        if !*alive {
            return false;
        }
        converter.process_into(mono, |resampled| {
            framer.push(resampled, |quantum| {
                if *alive {
                    *alive = stage.on_audio_block(Some(quantum));
                }
            });
        });
        *alive
    }

    fn idle(&mut self) -> bool {
        if self.alive {
            self.alive = self.stage.on_audio_block(None);
        }
        self.alive
    }

    pub fn stage(&self) -> &CaptureStage {
        &self.stage
    }
}

/// Average interleaved frames into `out`, converting each sample with `to_f32`.
pub fn downmix_into<T: Copy>(
    data: &[T],
    channels: usize,
    out: &mut Vec<f32>,
    to_f32: impl Fn(T) -> f32,
) {
    let channels = channels.max(1);
    let frames = data.len() / channels;
    out.resize(frames, 0.0);
    if channels == 1 {
        for (dst, &s) in out.iter_mut().zip(data) {
            *dst = to_f32(s);
        }
        return;
    }
    for (dst, frame) in out.iter_mut().zip(data.chunks_exact(channels)) {
        let sum: f32 = frame.iter().map(|&s| to_f32(s)).sum();
        *dst = sum / channels as f32;
    }
}

/// Handle to an active audio capture stream.
///
/// **Not `Send`**: create and drop this type on the same OS thread.
pub struct AudioCapture {
    /// Kept alive so the stream is not dropped prematurely.
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    /// Set to `false` to make the callback no-op.
    running: Arc<AtomicBool>,
    /// Actual capture sample rate reported by the device (Hz).
    pub sample_rate: u32,
    pub device_name: String,
}

#[cfg(feature = "audio-cpal")]
impl AudioCapture {
    /// Open an input device by preferred name, falling back to the default
    /// input device and then the first available one, and start feeding
    /// `stage` with `quantum`-frame blocks at `target_rate`.
    ///
    /// # Errors
    /// `NoDefaultInputDevice` when no input exists, `AudioDevice` when the
    /// device cannot be queried, `AudioStream` when cpal fails to build or
    /// start the stream.
    pub fn open(
        preferred_device: Option<&str>,
        target_rate: u32,
        quantum: usize,
        stage: CaptureStage,
        running: Arc<AtomicBool>,
    ) -> Result<Self> {
        let device = select_device(preferred_device)?;
        let device_name = device.name().unwrap_or_default();
        info!(device = device_name.as_str(), "opening input device");

        let supported = choose_config(&device, target_rate)?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels() as usize;
        let format = supported.sample_format();
        info!(sample_rate, channels, ?format, "audio config selected");

        let config = supported.config();
        let mut chain = CaptureChain::new(sample_rate, target_rate, quantum, stage)?;
        let mut mono: Vec<f32> = Vec::new();
        let flag = Arc::clone(&running);

        let stream = match format {
            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _info| {
                    if !flag.load(Ordering::Relaxed) {
                        return;
                    }
                    downmix_into(data, channels, &mut mono, |s| s);
                    if !chain.feed(&mono) {
                        flag.store(false, Ordering::Relaxed);
                    }
                },
                |err| error!("audio stream error: {err}"),
                None,
            ),

            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _info| {
                    if !flag.load(Ordering::Relaxed) {
                        return;
                    }
                    downmix_into(data, channels, &mut mono, |s| s as f32 / 32768.0);
                    if !chain.feed(&mono) {
                        flag.store(false, Ordering::Relaxed);
                    }
                },
                |err| error!("audio stream error: {err}"),
                None,
            ),

            SampleFormat::U8 => device.build_input_stream(
                &config,
                move |data: &[u8], _info| {
                    if !flag.load(Ordering::Relaxed) {
                        return;
                    }
                    downmix_into(data, channels, &mut mono, |s| (s as f32 - 128.0) / 128.0);
                    if !chain.feed(&mono) {
                        flag.store(false, Ordering::Relaxed);
                    }
                },
                |err| error!("audio stream error: {err}"),
                None,
            ),

            fmt => {
                return Err(SnowmanError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| SnowmanError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| SnowmanError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            running,
            sample_rate,
            device_name,
        })
    }
}

#[cfg(feature = "audio-cpal")]
fn select_device(preferred: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();

    if let Some(preferred_name) = preferred {
        match host.input_devices() {
            Ok(mut devices) => {
                let found = devices.find(|device| {
                    device
                        .name()
                        .map(|name| name == preferred_name)
                        .unwrap_or(false)
                });
                if let Some(device) = found {
                    return Ok(device);
                }
                warn!("preferred input device '{preferred_name}' not found, falling back");
            }
            Err(e) => warn!("failed to list input devices while resolving preference: {e}"),
        }
    }

    if let Some(default) = host.default_input_device() {
        return Ok(default);
    }

    let mut devices = host
        .input_devices()
        .map_err(|e| SnowmanError::AudioDevice(e.to_string()))?;
    let fallback = devices.next().ok_or(SnowmanError::NoDefaultInputDevice)?;
    warn!("no default input device, falling back to first available input");
    Ok(fallback)
}

/// Prefer a config that runs natively at `target_rate` in a supported sample
/// format, fewest channels first; otherwise use the device default.
#[cfg(feature = "audio-cpal")]
fn choose_config(device: &cpal::Device, target_rate: u32) -> Result<SupportedStreamConfig> {
    let usable = |f: SampleFormat| matches!(f, SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U8);

    let native = device.supported_input_configs().ok().and_then(|configs| {
        configs
            .filter(|c| usable(c.sample_format()))
            .filter(|c| c.min_sample_rate().0 <= target_rate && c.max_sample_rate().0 >= target_rate)
            .min_by_key(|c| (c.channels(), c.sample_format() != SampleFormat::F32))
            .map(|c| c.with_sample_rate(SampleRate(target_rate)))
    });

    match native {
        Some(config) => Ok(config),
        None => device
            .default_input_config()
            .map_err(|e| SnowmanError::AudioDevice(e.to_string())),
    }
}

impl AudioCapture {
    /// Make the callback no-op from its next invocation.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl AudioCapture {
    pub fn open(
        _preferred_device: Option<&str>,
        _target_rate: u32,
        _quantum: usize,
        _stage: CaptureStage,
        _running: Arc<AtomicBool>,
    ) -> Result<Self> {
        Err(SnowmanError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }
}
