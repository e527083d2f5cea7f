//! Detection engine boundary.
//!
//! The engine is an external collaborator: it owns its own address space,
//! hands out raw allocations in it, and exposes one detection entry point per
//! admissible sample type. The control stage talks to it only through
//! [`DetectionEngine`], so the acoustic matching itself stays a black box.
//!
//! `&mut self` on every entry point expresses that detectors are stateful:
//! they keep rolling acoustic context between calls and must never be invoked
//! concurrently.

pub mod memory;
pub mod stub;

pub use memory::LinearMemory;
pub use stub::{StubConfig, StubDetector};

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Offset into a detection engine's address space. `0` is null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NativePtr(pub u32);

impl NativePtr {
    pub const NULL: NativePtr = NativePtr(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for NativePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Typed view of a detector result code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionResult {
    /// `-2`
    Silence,
    /// `-1`
    Error,
    /// `0`
    NoEvent,
    /// `n > 0`: hotword `n` (1-based) matched.
    Hotword(u32),
    /// Any other negative code.
    Other(i32),
}

impl DetectionResult {
    pub fn from_code(code: i32) -> Self {
        match code {
            -2 => DetectionResult::Silence,
            -1 => DetectionResult::Error,
            0 => DetectionResult::NoEvent,
            n if n > 0 => DetectionResult::Hotword(n as u32),
            n => DetectionResult::Other(n),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            DetectionResult::Silence => -2,
            DetectionResult::Error => -1,
            DetectionResult::NoEvent => 0,
            DetectionResult::Hotword(n) => n as i32,
            DetectionResult::Other(n) => n,
        }
    }

    pub fn hotword(self) -> Option<u32> {
        match self {
            DetectionResult::Hotword(n) => Some(n),
            _ => None,
        }
    }

    pub fn is_hotword(self) -> bool {
        self.hotword().is_some()
    }
}

/// Raw memory services of the engine's address space.
pub trait EngineMemory {
    /// Allocate `size` bytes.
    ///
    /// # Errors
    /// `SnowmanError::AllocationFailure` when the engine heap is exhausted.
    fn malloc(&mut self, size: usize) -> Result<NativePtr>;

    /// Release an allocation made by `malloc`. Unknown pointers are ignored.
    fn free(&mut self, ptr: NativePtr);

    /// Copy through the 16-bit view starting at `ptr`.
    fn write_i16(&mut self, ptr: NativePtr, data: &[i16]) -> Result<()>;

    /// Copy through the 32-bit integer view starting at `ptr`.
    fn write_i32(&mut self, ptr: NativePtr, data: &[i32]) -> Result<()>;

    /// Copy through the 32-bit float view starting at `ptr`.
    fn write_f32(&mut self, ptr: NativePtr, data: &[f32]) -> Result<()>;
}

/// Contract for hotword detection backends.
pub trait DetectionEngine: EngineMemory + Send + 'static {
    /// Sample rate the engine expects, in Hz.
    fn sample_rate(&self) -> u32;

    fn num_channels(&self) -> u16;

    fn bits_per_sample(&self) -> u16;

    /// Number of hotwords loaded.
    fn num_hotwords(&self) -> usize;

    /// Comma-separated sensitivity per hotword.
    fn sensitivity(&self) -> String;

    /// # Errors
    /// `SnowmanError::Detector` if the string cannot be applied.
    fn set_sensitivity(&mut self, sensitivity: &str) -> Result<()>;

    fn set_audio_gain(&mut self, gain: f32);

    /// Enable or disable the engine's own front-end processing.
    fn apply_frontend(&mut self, enabled: bool);

    /// Drop all rolling acoustic context.
    fn reset(&mut self);

    /// Run detection on `len` 16-bit samples at `ptr`.
    ///
    /// Returns `-2` silence, `-1` error, `0` no event, `n > 0` hotword `n`.
    fn run_detection_i16(&mut self, ptr: NativePtr, len: usize, is_end: bool) -> i32;

    /// As [`run_detection_i16`](Self::run_detection_i16), for 32-bit samples.
    fn run_detection_i32(&mut self, ptr: NativePtr, len: usize, is_end: bool) -> i32;

    /// As [`run_detection_i16`](Self::run_detection_i16), for float samples.
    fn run_detection_f32(&mut self, ptr: NativePtr, len: usize, is_end: bool) -> i32;
}

/// Format and configuration a detector reports once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectorInfo {
    pub sample_rate: u32,
    pub num_channels: u16,
    pub bits_per_sample: u16,
    pub sensitivity: String,
    pub num_hotwords: usize,
}

/// Owned handle to any `DetectionEngine` implementor.
///
/// Unlike a shared model handle this is deliberately not `Clone`: exactly one
/// control stage owns the detector for the whole session.
pub struct DetectorHandle(Box<dyn DetectionEngine>);

impl DetectorHandle {
    pub fn new<D: DetectionEngine>(detector: D) -> Self {
        Self(Box::new(detector))
    }

    pub fn info(&self) -> DetectorInfo {
        DetectorInfo {
            sample_rate: self.0.sample_rate(),
            num_channels: self.0.num_channels(),
            bits_per_sample: self.0.bits_per_sample(),
            sensitivity: self.0.sensitivity(),
            num_hotwords: self.0.num_hotwords(),
        }
    }

    pub fn engine(&self) -> &dyn DetectionEngine {
        self.0.as_ref()
    }

    pub fn engine_mut(&mut self) -> &mut dyn DetectionEngine {
        self.0.as_mut()
    }
}

impl fmt::Debug for DetectorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetectorHandle").finish_non_exhaustive()
    }
}
