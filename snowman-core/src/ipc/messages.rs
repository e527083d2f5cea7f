//! Messages carried by the block channel.
//!
//! Wire form (JSON):
//!
//! ```text
//! {"action":"detect","buffer":{"type":"int16","data":[-32768,0,32767]}}
//! ```

use serde::{Deserialize, Serialize};

use crate::buffering::chunk::SampleBuffer;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum CaptureMessage {
    /// Run detection on one rendering quantum.
    Detect { buffer: SampleBuffer },
}

impl CaptureMessage {
    pub fn detect(buffer: SampleBuffer) -> Self {
        CaptureMessage::Detect { buffer }
    }

    pub fn buffer(&self) -> &SampleBuffer {
        match self {
            CaptureMessage::Detect { buffer } => buffer,
        }
    }

    pub fn into_buffer(self) -> SampleBuffer {
        match self {
            CaptureMessage::Detect { buffer } => buffer,
        }
    }
}
