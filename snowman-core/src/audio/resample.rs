//! Sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! Devices usually run at 44.1 or 48 kHz while detectors want 16 kHz mono.
//! `RateConverter` sits between the device callback and the framer, so it
//! runs on the realtime thread: every buffer it touches is sized once in
//! [`RateConverter::new`] and only reused afterwards.
//!
//! When capture rate == target rate no rubato session is created and input
//! is handed straight through.
//!
//! ```ignore
//! let mut rc = RateConverter::new(48_000, 16_000, 480)?;
//! rc.process_into(&raw, |resampled| framer.push(resampled, |q| stage.on_audio_block(Some(q))));
//! ```

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::{error, info};

use crate::error::{Result, SnowmanError};

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when capture rate == target rate (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    /// Holds partial input chunks between calls. Never grows past
    /// `2 * chunk_size`.
    input_buf: Vec<f32>,
    chunk_size: usize,
    /// `[1][output_frames_max]`
    output_buf: Vec<Vec<f32>>,
    capture_rate: u32,
    target_rate: u32,
}

impl RateConverter {
    /// # Parameters
    /// - `capture_rate`: rate of the incoming audio (Hz).
    /// - `target_rate`: rate expected by the detector (Hz).
    /// - `chunk_size`: input frames per rubato call.
    ///
    /// # Errors
    /// `SnowmanError::AudioDevice` if rubato fails to initialise.
    pub fn new(capture_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        let chunk_size = chunk_size.max(1);
        if capture_rate == target_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
                capture_rate,
                target_rate,
            });
        }

        let ratio = target_rate as f64 / capture_rate as f64;

        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio
            PolynomialDegree::Cubic,
            chunk_size,
            1, // mono
        )
        .map_err(|e| SnowmanError::AudioDevice(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();

        info!(capture_rate, target_rate, chunk_size, max_out, "resampling enabled");

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::with_capacity(chunk_size * 2),
            chunk_size,
            output_buf: vec![vec![0f32; max_out]; 1],
            capture_rate,
            target_rate,
        })
    }

    /// Feed `samples` and call `emit` with each run of converted output.
    ///
    /// Input is accumulated until a full `chunk_size` block is available for
    /// rubato; the remainder waits for the next call. In passthrough mode
    /// `emit` receives `samples` itself.
    pub fn process_into(&mut self, samples: &[f32], mut emit: impl FnMut(&[f32])) {
        let Some(resampler) = self.resampler.as_mut() else {
            if !samples.is_empty() {
                emit(samples);
            }
            return;
        };

        let mut rest = samples;
        while !rest.is_empty() {
            let room = self.chunk_size - self.input_buf.len();
            let take = room.min(rest.len());
            self.input_buf.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.input_buf.len() < self.chunk_size {
                break;
            }

            match resampler.process_into_buffer(&[&self.input_buf[..]], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    if produced > 0 {
                        emit(&self.output_buf[0][..produced]);
                    }
                }
                Err(e) => error!("resampler process error: {e}"),
            }
            self.input_buf.clear();
        }
    }

    /// Collecting variant of [`process_into`](Self::process_into). Allocates.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let mut out = Vec::new();
        self.process_into(samples, |chunk| out.extend_from_slice(chunk));
        out
    }

    /// Returns `true` when capture rate == target rate.
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }

    pub fn capture_rate(&self) -> u32 {
        self.capture_rate
    }

    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }
}
