//! `StubDetector`: demonstration engine with an energy trigger.
//!
//! Used until a real keyword-spotting engine is linked in, so the capture →
//! control → detection pipeline can be exercised end to end. It honours the
//! full engine contract (own address space, typed entry points, result codes):
//!
//! - RMS below the silence floor → `-2`
//! - RMS above a hotword's threshold for `trigger_secs` → that hotword's index,
//!   then `refractory_secs` of `0`
//! - null pointer or unreadable range → `-1`
//!
//! The threshold for a hotword falls linearly as its sensitivity rises.

use std::path::Path;

use tracing::{debug, error, info, warn};

use super::memory::{LinearMemory, MemoryStats, DEFAULT_MEMORY_LIMIT};
use super::{DetectionEngine, EngineMemory, NativePtr};
use crate::error::{Result, SnowmanError};

#[derive(Debug, Clone)]
pub struct StubConfig {
    pub sample_rate: u32,
    pub num_hotwords: usize,
    /// Initial sensitivity in [0, 1], applied to every hotword.
    pub sensitivity: f32,
    /// RMS below this is reported as silence.
    pub silence_floor: f32,
    /// Sustained loud audio needed to trigger.
    pub trigger_secs: f32,
    /// Quiet period after a trigger.
    pub refractory_secs: f32,
    pub memory_limit: usize,
}

impl Default for StubConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            num_hotwords: 1,
            sensitivity: 0.5,
            silence_floor: 0.005,
            trigger_secs: 0.25,
            refractory_secs: 1.0,
            memory_limit: DEFAULT_MEMORY_LIMIT,
        }
    }
}

pub struct StubDetector {
    memory: LinearMemory,
    config: StubConfig,
    sensitivities: Vec<f32>,
    audio_gain: f32,
    frontend: bool,
    /// Consecutive samples above threshold and the hotword they point at.
    active_samples: usize,
    active_hotword: usize,
    refractory_left: usize,
}

impl StubDetector {
    pub fn new(config: StubConfig) -> Self {
        let hotwords = config.num_hotwords.max(1);
        let sensitivity = config.sensitivity.clamp(0.0, 1.0);
        Self {
            memory: LinearMemory::with_limit(config.memory_limit),
            sensitivities: vec![sensitivity; hotwords],
            config: StubConfig {
                num_hotwords: hotwords,
                ..config
            },
            audio_gain: 1.0,
            frontend: false,
            active_samples: 0,
            active_hotword: 0,
            refractory_left: 0,
        }
    }

    /// Create a detector from a resource file and a model file.
    ///
    /// The stub only checks both files exist; their content is not parsed.
    ///
    /// # Errors
    /// `SnowmanError::ModelNotFound` if either path is missing.
    pub fn create(resource_path: &Path, model_path: &Path, config: StubConfig) -> Result<Self> {
        for path in [resource_path, model_path] {
            if !path.exists() {
                return Err(SnowmanError::ModelNotFound {
                    path: path.to_path_buf(),
                });
            }
        }
        info!(
            resource = %resource_path.display(),
            model = %model_path.display(),
            "stub detector created"
        );
        Ok(Self::new(config))
    }

    pub fn memory_stats(&self) -> MemoryStats {
        self.memory.stats()
    }

    pub fn frontend_enabled(&self) -> bool {
        self.frontend
    }

    fn threshold(sensitivity: f32) -> f32 {
        0.02 + (1.0 - sensitivity) * 0.3
    }

    fn samples_for(&self, secs: f32) -> usize {
        (secs.max(0.0) * self.config.sample_rate as f32) as usize
    }

    /// Decide on one block given its RMS level.
    fn decide(&mut self, rms: f32, len: usize) -> i32 {
        if len == 0 {
            return 0;
        }
        if self.refractory_left > 0 {
            self.refractory_left = self.refractory_left.saturating_sub(len);
            return 0;
        }
        if rms < self.config.silence_floor {
            self.active_samples = 0;
            return -2;
        }

        let Some(hotword) = self
            .sensitivities
            .iter()
            .position(|&s| rms >= Self::threshold(s))
        else {
            self.active_samples = 0;
            return 0;
        };

        if hotword != self.active_hotword {
            self.active_hotword = hotword;
            self.active_samples = 0;
        }
        self.active_samples += len;

        if self.active_samples >= self.samples_for(self.config.trigger_secs).max(1) {
            debug!(hotword = hotword + 1, rms, "stub trigger");
            self.active_samples = 0;
            self.refractory_left = self.samples_for(self.config.refractory_secs);
            return hotword as i32 + 1;
        }
        0
    }

    fn scored(&mut self, level: Result<f32>, ptr: NativePtr, len: usize) -> i32 {
        match level {
            Ok(rms) => self.decide(rms * self.audio_gain, len),
            Err(e) => {
                error!(%ptr, len, error = %e, "stub detector could not read samples");
                -1
            }
        }
    }
}

impl Default for StubDetector {
    fn default() -> Self {
        Self::new(StubConfig::default())
    }
}

fn rms(samples: impl Iterator<Item = f32>) -> f32 {
    let (sum_sq, n) = samples.fold((0f64, 0usize), |(acc, n), s| {
        (acc + (s as f64) * (s as f64), n + 1)
    });
    if n == 0 {
        return 0.0;
    }
    (sum_sq / n as f64).sqrt() as f32
}

impl EngineMemory for StubDetector {
    fn malloc(&mut self, size: usize) -> Result<NativePtr> {
        self.memory.malloc(size)
    }

    fn free(&mut self, ptr: NativePtr) {
        self.memory.free(ptr)
    }

    fn write_i16(&mut self, ptr: NativePtr, data: &[i16]) -> Result<()> {
        self.memory.write_i16(ptr, data)
    }

    fn write_i32(&mut self, ptr: NativePtr, data: &[i32]) -> Result<()> {
        self.memory.write_i32(ptr, data)
    }

    fn write_f32(&mut self, ptr: NativePtr, data: &[f32]) -> Result<()> {
        self.memory.write_f32(ptr, data)
    }
}

impl DetectionEngine for StubDetector {
    fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    fn num_channels(&self) -> u16 {
        1
    }

    fn bits_per_sample(&self) -> u16 {
        16
    }

    fn num_hotwords(&self) -> usize {
        self.config.num_hotwords
    }

    fn sensitivity(&self) -> String {
        self.sensitivities
            .iter()
            .map(|s| format!("{s}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    fn set_sensitivity(&mut self, sensitivity: &str) -> Result<()> {
        let values = sensitivity
            .split(',')
            .map(|v| {
                v.trim()
                    .parse::<f32>()
                    .ok()
                    .filter(|s| (0.0..=1.0).contains(s))
                    .ok_or_else(|| {
                        SnowmanError::Detector(format!("invalid sensitivity value '{}'", v.trim()))
                    })
            })
            .collect::<Result<Vec<f32>>>()?;

        self.sensitivities = match values.len() {
            1 => vec![values[0]; self.config.num_hotwords],
            n if n == self.config.num_hotwords => values,
            n => {
                return Err(SnowmanError::Detector(format!(
                    "{n} sensitivities given for {} hotwords",
                    self.config.num_hotwords
                )))
            }
        };
        Ok(())
    }

    fn set_audio_gain(&mut self, gain: f32) {
        if gain <= 0.0 || !gain.is_finite() {
            warn!(gain, "ignoring non-positive audio gain");
            return;
        }
        self.audio_gain = gain;
    }

    fn apply_frontend(&mut self, enabled: bool) {
        self.frontend = enabled;
    }

    fn reset(&mut self) {
        self.active_samples = 0;
        self.active_hotword = 0;
        self.refractory_left = 0;
    }

    fn run_detection_i16(&mut self, ptr: NativePtr, len: usize, _is_end: bool) -> i32 {
        if ptr.is_null() {
            error!("stub detector: data is null");
            return -1;
        }
        let level = self
            .memory
            .read_i16(ptr, len)
            .map(|it| rms(it.map(|s| s as f32 / 32768.0)));
        self.scored(level, ptr, len)
    }

    fn run_detection_i32(&mut self, ptr: NativePtr, len: usize, _is_end: bool) -> i32 {
        if ptr.is_null() {
            error!("stub detector: data is null");
            return -1;
        }
        let level = self
            .memory
            .read_i32(ptr, len)
            .map(|it| rms(it.map(|s| s as f32 / 2_147_483_648.0)));
        self.scored(level, ptr, len)
    }

    fn run_detection_f32(&mut self, ptr: NativePtr, len: usize, _is_end: bool) -> i32 {
        if ptr.is_null() {
            error!("stub detector: data is null");
            return -1;
        }
        let level = self.memory.read_f32(ptr, len).map(|it| rms(it));
        self.scored(level, ptr, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> StubDetector {
        StubDetector::new(StubConfig {
            trigger_secs: 0.016, // 2 quanta of 128 at 16 kHz
            refractory_secs: 0.016,
            ..StubConfig::default()
        })
    }

    fn run_i16(det: &mut StubDetector, samples: &[i16]) -> i32 {
        let ptr = det.malloc(samples.len() * 2).unwrap();
        det.write_i16(ptr, samples).unwrap();
        let code = det.run_detection_i16(ptr, samples.len(), false);
        det.free(ptr);
        code
    }

    #[test]
    fn silence_reports_minus_two() {
        let mut det = detector();
        assert_eq!(run_i16(&mut det, &[0; 128]), -2);
    }

    #[test]
    fn sustained_loud_audio_triggers_hotword_one() {
        let mut det = detector();
        let loud = [16_000i16; 128];
        assert_eq!(run_i16(&mut det, &loud), 0);
        assert_eq!(run_i16(&mut det, &loud), 1);
        // Refractory period swallows the next two blocks.
        assert_eq!(run_i16(&mut det, &loud), 0);
        assert_eq!(run_i16(&mut det, &loud), 0);
    }

    #[test]
    fn reset_forgets_partial_trigger() {
        let mut det = StubDetector::new(StubConfig {
            num_hotwords: 2,
            trigger_secs: 0.016,
            ..StubConfig::default()
        });
        det.set_sensitivity("0.0,1.0").unwrap();

        // Loud enough only for the second hotword's threshold.
        assert_eq!(run_i16(&mut det, &[6_000; 128]), 0);
        assert_eq!(det.active_hotword, 1);
        assert_eq!(det.active_samples, 128);

        det.reset();
        assert_eq!(det.active_hotword, 0);
        assert_eq!(det.active_samples, 0);
        assert_eq!(det.refractory_left, 0);

        // A fresh trigger needs the full duration again.
        assert_eq!(run_i16(&mut det, &[6_000; 128]), 0);
        assert_eq!(run_i16(&mut det, &[6_000; 128]), 2);
    }

    #[test]
    fn moderate_audio_is_no_event() {
        let mut det = detector();
        assert_eq!(run_i16(&mut det, &[1_000; 128]), 0);
    }

    #[test]
    fn float_and_int32_views_agree() {
        let mut det = detector();
        let ptr = det.malloc(128 * 4).unwrap();
        det.write_f32(ptr, &[0.0; 128]).unwrap();
        assert_eq!(det.run_detection_f32(ptr, 128, false), -2);
        det.write_i32(ptr, &[0; 128]).unwrap();
        assert_eq!(det.run_detection_i32(ptr, 128, false), -2);
    }

    #[test]
    fn null_or_unallocated_pointer_is_error() {
        let mut det = detector();
        assert_eq!(det.run_detection_i16(NativePtr::NULL, 128, false), -1);
        assert_eq!(det.run_detection_f32(NativePtr(4096), 128, false), -1);
    }

    #[test]
    fn sensitivity_string_per_hotword() {
        let mut det = StubDetector::new(StubConfig {
            num_hotwords: 2,
            ..StubConfig::default()
        });
        det.set_sensitivity("0.4,0.6").unwrap();
        assert_eq!(det.sensitivity(), "0.4,0.6");
        det.set_sensitivity("0.5").unwrap();
        assert_eq!(det.sensitivity(), "0.5,0.5");
        assert!(det.set_sensitivity("0.1,0.2,0.3").is_err());
        assert!(det.set_sensitivity("loud").is_err());
        assert!(det.set_sensitivity("1.5").is_err());
    }

    #[test]
    fn create_requires_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let res = dir.path().join("common.res");
        let model = dir.path().join("snowboy.umdl");
        std::fs::write(&res, b"res").unwrap();

        let err = StubDetector::create(&res, &model, StubConfig::default())
            .err()
            .expect("missing model should fail");
        assert!(matches!(err, SnowmanError::ModelNotFound { .. }));

        std::fs::write(&model, b"model").unwrap();
        assert!(StubDetector::create(&res, &model, StubConfig::default()).is_ok());
    }
}
