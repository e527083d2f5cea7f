//! # snowman-core
//!
//! Streaming hotword detection: realtime capture, sample format conversion,
//! cross-thread delivery and detector invocation.
//!
//! ## Architecture
//!
//! ```text
//! Microphone / WAV → downmix → RateConverter → QuantumFramer
//!                                                   │  (realtime thread)
//!                                             CaptureStage::on_audio_block
//!                                                   │
//!                              bounded BlockSender ──► BlockReceiver
//!                                                   │  (control thread, spawn_blocking)
//!                                         ControlStage::on_buffer_received
//!                                                   │
//!                             staging buffer → DetectionEngine::run_detection_*
//!                                                   │
//!                                      broadcast::Sender<DetectionEvent>
//! ```
//!
//! In steady state the realtime side neither blocks nor allocates; buffers
//! cycle between the two threads through a recycle queue.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod capture;
pub mod control;
pub mod detector;
pub mod engine;
pub mod error;
pub mod ipc;

// Convenience re-exports for downstream crates
pub use buffering::{chunk::ElementType, chunk::SampleBuffer, OverflowPolicy};
pub use capture::{CaptureStage, ConversionMode};
pub use control::ControlStage;
pub use detector::{
    DetectionEngine, DetectionResult, DetectorHandle, DetectorInfo, EngineMemory, NativePtr,
    StubConfig, StubDetector,
};
pub use engine::{AudioSource, DiagnosticsSnapshot, EngineConfig, ExitReason, SnowmanEngine};
pub use error::{Result, SnowmanError};
pub use ipc::events::{DetectionEvent, EngineStatus, EngineStatusEvent};
pub use ipc::messages::CaptureMessage;
