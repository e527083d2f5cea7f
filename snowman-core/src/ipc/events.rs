//! Events published by `SnowmanEngine`.
//!
//! | Event | Subscription |
//! |-------|--------------|
//! | `DetectionEvent` | `subscribe_detections()` |
//! | `EngineStatusEvent` | `subscribe_status()` |

use serde::{Deserialize, Serialize};

use crate::buffering::chunk::ElementType;
use crate::detector::DetectionResult;

// ---------------------------------------------------------------------------
// Detection events
// ---------------------------------------------------------------------------

/// One per processed block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// Raw detector result code.
    pub code: i32,
    /// Index of the matched hotword (1-based), if any.
    pub hotword: Option<u32>,
    /// Samples in the block that produced this result.
    pub samples: usize,
    pub element_type: ElementType,
}

impl DetectionEvent {
    pub fn new(seq: u64, result: DetectionResult, samples: usize, element_type: ElementType) -> Self {
        Self {
            seq,
            code: result.code(),
            hotword: result.hotword(),
            samples,
            element_type,
        }
    }

    pub fn result(&self) -> DetectionResult {
        DetectionResult::from_code(self.code)
    }
}

// ---------------------------------------------------------------------------
// Engine status events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatusEvent {
    pub status: EngineStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Current state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    /// Created, `start()` not yet called.
    Idle,
    /// Capturing audio and running detection.
    Listening,
    /// Session ended; the detector has been discarded.
    Stopped,
    /// Session aborted on a fatal error.
    Error,
}
