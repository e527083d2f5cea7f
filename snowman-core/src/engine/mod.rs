//! `SnowmanEngine`: top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! SnowmanEngine::new(config, detector)      status = Idle
//!     └─► start(source)   → detector configured, source open, status = Listening
//!         └─► stop()      → running=false, queue drained, stage closed, status = Stopped
//! ```
//!
//! A session consumes the detector: the control stage discards it on
//! teardown, so a second `start()` fails with `StageClosed`. Source
//! exhaustion (end of a WAV file) ends the session the same way `stop()` does.
//!
//! ## Threading
//!
//! `cpal::Stream` is `!Send` on Windows/macOS. The source is therefore opened
//! *inside* the `spawn_blocking` closure that also runs the control loop, and a
//! sync oneshot channel reports open success or failure back to `start()`.

pub mod pipeline;

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::{
    audio::{AudioCapture, WavSource},
    buffering::{create_block_channel, OverflowPolicy, DEFAULT_QUEUE_CAPACITY},
    capture::{CaptureStage, ConversionMode},
    control::ControlStage,
    detector::{DetectorHandle, DetectorInfo},
    error::{Result, SnowmanError},
    ipc::events::{DetectionEvent, EngineStatus, EngineStatusEvent},
};

pub use pipeline::{DiagnosticsSnapshot, ExitReason};

/// Per-block detection events buffered for slow consumers. A file replay
/// outruns any printer, so subscribers that must not miss a hotword use
/// [`SnowmanEngine::subscribe_hotwords`] instead.
const DETECTION_CAP: usize = 1024;
/// Hotword and status events are rare; this never lags in practice.
const EVENT_CAP: usize = 256;

/// Configuration for `SnowmanEngine`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Frames per rendering quantum. Default: 128.
    pub quantum_frames: usize,
    /// How the capture stage encodes blocks. Default: fixed point.
    pub conversion: ConversionMode,
    /// Blocks held between capture and control. Default: 64.
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
    /// Detector sensitivity string; `None` keeps the detector's own.
    pub sensitivity: Option<String>,
    pub audio_gain: f32,
    pub apply_frontend: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            quantum_frames: 128,
            conversion: ConversionMode::FixedPoint,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            overflow: OverflowPolicy::DropOldest,
            sensitivity: None,
            audio_gain: 1.0,
            apply_frontend: false,
        }
    }
}

/// Where audio comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// A live input device; `None` selects the default.
    Microphone { preferred_device: Option<String> },
    /// Replay of a WAV file, optionally paced in real time.
    Wav { path: PathBuf, realtime: bool },
}

impl Default for AudioSource {
    fn default() -> Self {
        AudioSource::Microphone {
            preferred_device: None,
        }
    }
}

/// A source opened on the control thread. Dropping it releases the device.
enum OpenSource {
    Device(AudioCapture),
    File(std::thread::JoinHandle<u64>),
}

impl OpenSource {
    fn close(self) {
        match self {
            OpenSource::Device(capture) => capture.stop(),
            OpenSource::File(handle) => {
                if handle.join().is_err() {
                    warn!("wav playback thread panicked");
                }
            }
        }
    }
}

/// The top-level engine handle.
///
/// `SnowmanEngine` is `Send + Sync`: all fields use interior mutability.
pub struct SnowmanEngine {
    config: EngineConfig,
    /// Present until a session takes it.
    detector: Arc<Mutex<Option<DetectorHandle>>>,
    info: DetectorInfo,
    /// `true` while a session is active.
    running: Arc<AtomicBool>,
    status: Arc<Mutex<EngineStatus>>,
    detection_tx: broadcast::Sender<DetectionEvent>,
    hotword_tx: broadcast::Sender<DetectionEvent>,
    status_tx: broadcast::Sender<EngineStatusEvent>,
    seq: Arc<AtomicU64>,
    diagnostics: Arc<pipeline::PipelineDiagnostics>,
    session: Mutex<Option<JoinHandle<ExitReason>>>,
}

impl SnowmanEngine {
    /// Create an engine. Does not start capturing.
    pub fn new(config: EngineConfig, detector: DetectorHandle) -> Self {
        let (detection_tx, _) = broadcast::channel(DETECTION_CAP);
        let (hotword_tx, _) = broadcast::channel(EVENT_CAP);
        let (status_tx, _) = broadcast::channel(EVENT_CAP);

        Self {
            info: detector.info(),
            config,
            detector: Arc::new(Mutex::new(Some(detector))),
            running: Arc::new(AtomicBool::new(false)),
            status: Arc::new(Mutex::new(EngineStatus::Idle)),
            detection_tx,
            hotword_tx,
            status_tx,
            seq: Arc::new(AtomicU64::new(0)),
            diagnostics: Arc::new(pipeline::PipelineDiagnostics::default()),
            session: Mutex::new(None),
        }
    }

    /// Configure the detector, open `source` and start the control loop.
    ///
    /// Blocks until the source is confirmed open (or fails), then returns.
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// - `AlreadyRunning` if a session is active.
    /// - `StageClosed` if a previous session already consumed the detector.
    /// - `Detector` if the configured sensitivity is rejected.
    /// - Device / WAV errors from opening the source.
    pub fn start(&self, source: AudioSource) -> Result<()> {
        // Claim the session before touching the detector slot so a concurrent
        // start() sees AlreadyRunning, not an empty slot.
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SnowmanError::AlreadyRunning);
        }

        let Some(mut detector) = self.detector.lock().take() else {
            self.running.store(false, Ordering::SeqCst);
            return Err(SnowmanError::StageClosed);
        };

        if let Err(e) = self.configure(&mut detector) {
            *self.detector.lock() = Some(detector);
            self.running.store(false, Ordering::SeqCst);
            return Err(e);
        }

        self.diagnostics.reset();
        self.set_status(EngineStatus::Listening, None);

        let config = self.config.clone();
        let target_rate = detector.engine().sample_rate();
        let slot = Arc::clone(&self.detector);
        let running = Arc::clone(&self.running);
        let detection_tx = self.detection_tx.clone();
        let hotword_tx = self.hotword_tx.clone();
        let status_tx = self.status_tx.clone();
        let status = Arc::clone(&self.status);
        let seq = Arc::clone(&self.seq);
        let diagnostics = Arc::clone(&self.diagnostics);

        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<String>>();

        let handle = tokio::task::spawn_blocking(move || {
            let (sender, receiver) = create_block_channel(config.queue_capacity, config.overflow);
            // Unpaced file replay is not bound to a device clock: it waits for
            // the detector rather than losing blocks.
            let sender = match &source {
                AudioSource::Wav {
                    realtime: false, ..
                } => sender.with_backpressure(),
                _ => sender,
            };
            let stage = CaptureStage::new(config.conversion, sender);

            // Open on THIS thread: cpal::Stream is !Send.
            let opened = match source {
                AudioSource::Microphone { preferred_device } => AudioCapture::open(
                    preferred_device.as_deref(),
                    target_rate,
                    config.quantum_frames,
                    stage,
                    Arc::clone(&running),
                )
                .map(|c| (format!("{} @ {} Hz", c.device_name, c.sample_rate), OpenSource::Device(c))),
                AudioSource::Wav { path, realtime } => WavSource::open(&path).and_then(|wav| {
                    let label = format!("{} @ {} Hz", path.display(), wav.sample_rate());
                    wav.play(
                        target_rate,
                        config.quantum_frames,
                        stage,
                        realtime,
                        Arc::clone(&running),
                    )
                    .map(|h| (label, OpenSource::File(h)))
                }),
            };

            let source = match opened {
                Ok((label, source)) => {
                    let _ = open_tx.send(Ok(label));
                    source
                }
                Err(e) => {
                    // Hand the detector back so a later start() can retry.
                    *slot.lock() = Some(detector);
                    running.store(false, Ordering::SeqCst);
                    let _ = open_tx.send(Err(e));
                    return ExitReason::Fatal;
                }
            };

            let reason = pipeline::run(pipeline::PipelineContext {
                control: ControlStage::new(detector),
                receiver,
                running: Arc::clone(&running),
                detection_tx,
                hotword_tx,
                status_tx,
                status,
                seq,
                diagnostics,
            });

            // The device is released here, on the thread that opened it.
            source.close();
            reason
        });

        match open_rx.recv() {
            Ok(Ok(source)) => {
                *self.session.lock() = Some(handle);
                info!(source = source.as_str(), "engine started, listening");
                Ok(())
            }
            Ok(Err(e)) => {
                self.set_status(EngineStatus::Error, Some(e.to_string()));
                Err(e)
            }
            Err(_) => {
                // Closed before a message was sent: the blocking task panicked.
                self.running.store(false, Ordering::SeqCst);
                self.set_status(EngineStatus::Error, Some("control loop failed to start".into()));
                Err(SnowmanError::Other(anyhow::anyhow!(
                    "control task died unexpectedly"
                )))
            }
        }
    }

    /// Ask the control loop to drain, tear down and stop.
    ///
    /// # Errors
    /// `NotRunning` if no session is active.
    pub fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(SnowmanError::NotRunning);
        }
        info!("engine stop requested");
        Ok(())
    }

    /// Wait for the current session to end. Returns `None` if none was started.
    pub async fn wait(&self) -> Option<ExitReason> {
        let handle = self.session.lock().take()?;
        match handle.await {
            Ok(reason) => Some(reason),
            Err(e) => {
                warn!("control task failed: {e}");
                Some(ExitReason::Fatal)
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current engine status (snapshot).
    pub fn status(&self) -> EngineStatus {
        *self.status.lock()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Detector format as reported when the engine was created.
    pub fn detector_info(&self) -> &DetectorInfo {
        &self.info
    }

    /// Subscribe to per-block detection results.
    pub fn subscribe_detections(&self) -> broadcast::Receiver<DetectionEvent> {
        self.detection_tx.subscribe()
    }

    /// Subscribe to hotword detections only. Unlike the per-block stream this
    /// does not lag behind a fast file replay.
    pub fn subscribe_hotwords(&self) -> broadcast::Receiver<DetectionEvent> {
        self.hotword_tx.subscribe()
    }

    /// Subscribe to status changes.
    pub fn subscribe_status(&self) -> broadcast::Receiver<EngineStatusEvent> {
        self.status_tx.subscribe()
    }

    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    fn configure(&self, detector: &mut DetectorHandle) -> Result<()> {
        let engine = detector.engine_mut();
        if let Some(sensitivity) = self.config.sensitivity.as_deref() {
            engine.set_sensitivity(sensitivity)?;
        }
        engine.set_audio_gain(self.config.audio_gain);
        engine.apply_frontend(self.config.apply_frontend);

        let info = detector.info();
        info!(
            sample_rate = info.sample_rate,
            channels = info.num_channels,
            bits = info.bits_per_sample,
            sensitivity = info.sensitivity.as_str(),
            hotwords = info.num_hotwords,
            "detector configured"
        );
        Ok(())
    }

    fn set_status(&self, new_status: EngineStatus, detail: Option<String>) {
        *self.status.lock() = new_status;
        let _ = self.status_tx.send(EngineStatusEvent {
            status: new_status,
            detail,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{StubConfig, StubDetector};

    fn engine(config: EngineConfig) -> SnowmanEngine {
        SnowmanEngine::new(config, DetectorHandle::new(StubDetector::default()))
    }

    #[test]
    fn config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.quantum_frames, 128);
        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.overflow, OverflowPolicy::DropOldest);
        assert_eq!(config.conversion, ConversionMode::FixedPoint);
        assert!(config.sensitivity.is_none());
    }

    #[test]
    fn config_deserializes_partial_json() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"conversion":"passthrough","overflow":"drop-newest"}"#).unwrap();
        assert_eq!(config.conversion, ConversionMode::Passthrough);
        assert_eq!(config.overflow, OverflowPolicy::DropNewest);
        assert_eq!(config.quantum_frames, 128);
    }

    #[test]
    fn new_engine_is_idle() {
        let engine = engine(EngineConfig::default());
        assert_eq!(engine.status(), EngineStatus::Idle);
        assert!(!engine.is_running());
        assert_eq!(engine.detector_info().sample_rate, 16_000);
        assert!(matches!(engine.stop(), Err(SnowmanError::NotRunning)));
    }

    #[tokio::test]
    async fn missing_wav_returns_detector_for_retry() {
        let engine = engine(EngineConfig::default());
        let err = engine
            .start(AudioSource::Wav {
                path: "/nonexistent/snowman.wav".into(),
                realtime: false,
            })
            .unwrap_err();
        assert!(matches!(err, SnowmanError::Wav(_)));
        assert_eq!(engine.status(), EngineStatus::Error);
        assert!(!engine.is_running());

        // The detector went back to its slot, so the next failure is the
        // same WAV error rather than StageClosed.
        let err = engine
            .start(AudioSource::Wav {
                path: "/nonexistent/snowman.wav".into(),
                realtime: false,
            })
            .unwrap_err();
        assert!(matches!(err, SnowmanError::Wav(_)));
    }

    #[tokio::test]
    async fn rejected_sensitivity_keeps_detector() {
        let engine = SnowmanEngine::new(
            EngineConfig {
                sensitivity: Some("loud".into()),
                ..EngineConfig::default()
            },
            DetectorHandle::new(StubDetector::new(StubConfig::default())),
        );
        let err = engine.start(AudioSource::default()).unwrap_err();
        assert!(matches!(err, SnowmanError::Detector(_)));
        assert_eq!(engine.status(), EngineStatus::Idle);
    }
}
