//! Typed sample buffers passed from the capture stage to the control stage.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Element type of a [`SampleBuffer`], named after the typed-array family the
/// wire format was designed around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
    Float64,
}

impl ElementType {
    pub fn bytes_per_element(self) -> usize {
        match self {
            ElementType::Int8 | ElementType::Uint8 => 1,
            ElementType::Int16 | ElementType::Uint16 => 2,
            ElementType::Int32 | ElementType::Uint32 | ElementType::Float32 => 4,
            ElementType::Float64 => 8,
        }
    }

    /// Whether the detector has an entry point for this element type.
    pub fn is_admissible(self) -> bool {
        matches!(
            self,
            ElementType::Int16 | ElementType::Int32 | ElementType::Float32
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ElementType::Int8 => "int8",
            ElementType::Uint8 => "uint8",
            ElementType::Int16 => "int16",
            ElementType::Uint16 => "uint16",
            ElementType::Int32 => "int32",
            ElementType::Uint32 => "uint32",
            ElementType::Float32 => "float32",
            ElementType::Float64 => "float64",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A block of mono samples in one of the typed representations.
///
/// Ownership of a `SampleBuffer` moves through the block channel: the capture
/// stage gives it up on send and never touches it again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum SampleBuffer {
    Int8(Vec<i8>),
    Uint8(Vec<u8>),
    Int16(Vec<i16>),
    Uint16(Vec<u16>),
    Int32(Vec<i32>),
    Uint32(Vec<u32>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
}

impl SampleBuffer {
    pub fn element_type(&self) -> ElementType {
        match self {
            SampleBuffer::Int8(_) => ElementType::Int8,
            SampleBuffer::Uint8(_) => ElementType::Uint8,
            SampleBuffer::Int16(_) => ElementType::Int16,
            SampleBuffer::Uint16(_) => ElementType::Uint16,
            SampleBuffer::Int32(_) => ElementType::Int32,
            SampleBuffer::Uint32(_) => ElementType::Uint32,
            SampleBuffer::Float32(_) => ElementType::Float32,
            SampleBuffer::Float64(_) => ElementType::Float64,
        }
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        match self {
            SampleBuffer::Int8(v) => v.len(),
            SampleBuffer::Uint8(v) => v.len(),
            SampleBuffer::Int16(v) => v.len(),
            SampleBuffer::Uint16(v) => v.len(),
            SampleBuffer::Int32(v) => v.len(),
            SampleBuffer::Uint32(v) => v.len(),
            SampleBuffer::Float32(v) => v.len(),
            SampleBuffer::Float64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `len() * bytes_per_element`, the size the staging buffer must have.
    pub fn byte_len(&self) -> usize {
        self.len() * self.element_type().bytes_per_element()
    }

    /// Empties the buffer while keeping its allocation for reuse.
    pub fn clear(&mut self) {
        match self {
            SampleBuffer::Int8(v) => v.clear(),
            SampleBuffer::Uint8(v) => v.clear(),
            SampleBuffer::Int16(v) => v.clear(),
            SampleBuffer::Uint16(v) => v.clear(),
            SampleBuffer::Int32(v) => v.clear(),
            SampleBuffer::Uint32(v) => v.clear(),
            SampleBuffer::Float32(v) => v.clear(),
            SampleBuffer::Float64(v) => v.clear(),
        }
    }

    /// Duration of this block in seconds at `sample_rate`.
    pub fn duration_secs(&self, sample_rate: u32) -> f64 {
        self.len() as f64 / sample_rate as f64
    }
}
