//! Float → detector sample format conversion.
//!
//! Fixed point scales asymmetrically because `i16` is asymmetric:
//! negative samples by `0x8000`, non-negative ones by `0x7FFF`. Both ends of
//! [-1.0, 1.0] therefore land exactly on `i16::MIN` / `i16::MAX`.

use serde::{Deserialize, Serialize};

use crate::buffering::chunk::{ElementType, SampleBuffer};

/// How the capture stage encodes blocks. Chosen once, at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConversionMode {
    /// Scale to 16-bit signed fixed point.
    #[default]
    FixedPoint,
    /// Forward `f32` samples unchanged.
    Passthrough,
}

impl ConversionMode {
    pub fn element_type(self) -> ElementType {
        match self {
            ConversionMode::FixedPoint => ElementType::Int16,
            ConversionMode::Passthrough => ElementType::Float32,
        }
    }

    /// An empty buffer of this mode's variant with room for `capacity` samples.
    pub fn empty_buffer(self, capacity: usize) -> SampleBuffer {
        match self {
            ConversionMode::FixedPoint => SampleBuffer::Int16(Vec::with_capacity(capacity)),
            ConversionMode::Passthrough => SampleBuffer::Float32(Vec::with_capacity(capacity)),
        }
    }
}

/// Convert one normalized sample to fixed point.
///
/// Out-of-range input is clamped; NaN becomes 0.
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    let scaled = if s < 0.0 {
        s * 0x8000 as f32
    } else {
        s * 0x7FFF as f32
    };
    // `as` saturates and maps NaN to 0.
    scaled.round() as i16
}

/// Refill `out` with `block` encoded per `mode`, reusing its allocation when
/// the variant already matches.
pub fn convert_into(mode: ConversionMode, block: &[f32], out: &mut SampleBuffer) {
    if out.element_type() != mode.element_type() {
        *out = mode.empty_buffer(block.len());
    }
    match out {
        SampleBuffer::Int16(v) => {
            v.clear();
            v.extend(block.iter().copied().map(f32_to_i16));
        }
        SampleBuffer::Float32(v) => {
            v.clear();
            v.extend_from_slice(block);
        }
        // `empty_buffer` only produces the two variants above.
        _ => unreachable!("conversion target is always int16 or float32"),
    }
}

pub fn convert(mode: ConversionMode, block: &[f32]) -> SampleBuffer {
    let mut out = mode.empty_buffer(block.len());
    convert_into(mode, block, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_block_in_fixed_point() {
        let out = convert(ConversionMode::FixedPoint, &[-1.0, 0.0, 1.0, 0.5]);
        assert_eq!(out, SampleBuffer::Int16(vec![-32768, 0, 32767, 16384]));
    }

    #[test]
    fn extremes_do_not_overflow() {
        assert_eq!(f32_to_i16(-1.0), i16::MIN);
        assert_eq!(f32_to_i16(1.0), i16::MAX);
        assert_eq!(f32_to_i16(3.0), i16::MAX);
        assert_eq!(f32_to_i16(-7.5), i16::MIN);
        assert_eq!(f32_to_i16(f32::NAN), 0);
    }

    #[test]
    fn scaling_is_asymmetric_over_the_range() {
        for i in -1000..=1000 {
            let s = i as f32 / 1000.0;
            let out = f32_to_i16(s) as i32;
            if s < 0.0 {
                assert_eq!(out, (s * 32768.0).round() as i32, "s={s}");
                assert!((-32768..=0).contains(&out));
            } else {
                assert_eq!(out, (s * 32767.0).round() as i32, "s={s}");
                assert!((0..=32767).contains(&out));
            }
        }
    }

    #[test]
    fn passthrough_keeps_floats() {
        let block = [0.25, -0.75, 1.0];
        assert_eq!(
            convert(ConversionMode::Passthrough, &block),
            SampleBuffer::Float32(block.to_vec())
        );
    }

    #[test]
    fn convert_into_replaces_mismatched_variant() {
        let mut out = SampleBuffer::Float32(vec![9.0; 8]);
        convert_into(ConversionMode::FixedPoint, &[0.0, -1.0], &mut out);
        assert_eq!(out, SampleBuffer::Int16(vec![0, -32768]));
    }

    #[test]
    fn convert_into_reuses_allocation() {
        let mut out = ConversionMode::FixedPoint.empty_buffer(128);
        let before = match &out {
            SampleBuffer::Int16(v) => v.capacity(),
            _ => unreachable!(),
        };
        convert_into(ConversionMode::FixedPoint, &[0.1; 128], &mut out);
        match &out {
            SampleBuffer::Int16(v) => assert_eq!(v.capacity(), before),
            other => panic!("unexpected {other:?}"),
        }
    }
}
