//! Control stage: owns the detector and the staging buffer.
//!
//! Runs on a single control thread and handles one buffer at a time, in
//! arrival order. Nothing here is shared, so nothing here is locked: the
//! channel hand-off is the only synchronisation with the capture side.

pub mod staging;

use tracing::{debug, info, warn};

use crate::buffering::chunk::SampleBuffer;
use crate::detector::{DetectionResult, DetectorHandle};
use crate::error::{Result, SnowmanError};

pub use staging::StagingBuffer;

/// Streaming detection: blocks are never marked as the end of an utterance.
pub const END_OF_UTTERANCE: bool = false;

pub struct ControlStage {
    /// `None` after teardown.
    detector: Option<DetectorHandle>,
    staging: StagingBuffer,
    detections: u64,
}

impl ControlStage {
    pub fn new(detector: DetectorHandle) -> Self {
        Self {
            detector: Some(detector),
            staging: StagingBuffer::new(),
            detections: 0,
        }
    }

    /// Stage `buffer` in detector memory and run detection on it.
    ///
    /// # Errors
    /// - `StageClosed` after [`close`](Self::close).
    /// - `InvalidInputType` for element types other than int16 / int32 /
    ///   float32; nothing is allocated and no detection runs.
    /// - `AllocationFailure` when the staging buffer cannot be (re)allocated.
    pub fn on_buffer_received(&mut self, buffer: &SampleBuffer) -> Result<DetectionResult> {
        let detector = self.detector.as_mut().ok_or(SnowmanError::StageClosed)?;

        let element_type = buffer.element_type();
        if !element_type.is_admissible() {
            warn!(%element_type, samples = buffer.len(), "rejecting buffer");
            return Err(SnowmanError::InvalidInputType(element_type));
        }
        if buffer.is_empty() {
            debug!(%element_type, "empty buffer, nothing to detect");
            return Ok(DetectionResult::NoEvent);
        }

        let engine = detector.engine_mut();
        let ptr = self.staging.acquire(&mut *engine, buffer.byte_len())?;

        let code = match buffer {
            SampleBuffer::Int16(samples) => {
                engine.write_i16(ptr, samples)?;
                engine.run_detection_i16(ptr, samples.len(), END_OF_UTTERANCE)
            }
            SampleBuffer::Int32(samples) => {
                engine.write_i32(ptr, samples)?;
                engine.run_detection_i32(ptr, samples.len(), END_OF_UTTERANCE)
            }
            SampleBuffer::Float32(samples) => {
                engine.write_f32(ptr, samples)?;
                engine.run_detection_f32(ptr, samples.len(), END_OF_UTTERANCE)
            }
            _ => unreachable!("admissibility checked above"),
        };
        self.detections += 1;

        Ok(DetectionResult::from_code(code))
    }

    /// Release the staging buffer and discard the detector. Idempotent.
    pub fn close(&mut self) {
        if let Some(mut detector) = self.detector.take() {
            self.staging.release(detector.engine_mut());
            info!(
                detections = self.detections,
                allocations = self.staging.allocations(),
                releases = self.staging.releases(),
                "control stage closed"
            );
        }
    }

    pub fn is_closed(&self) -> bool {
        self.detector.is_none()
    }

    pub fn staging(&self) -> &StagingBuffer {
        &self.staging
    }

    /// Detection calls made so far.
    pub fn detections(&self) -> u64 {
        self.detections
    }

    pub fn detector(&self) -> Option<&DetectorHandle> {
        self.detector.as_ref()
    }
}

impl Drop for ControlStage {
    fn drop(&mut self) {
        self.close();
    }
}
