//! Persistent application settings (JSON file in app data directory).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use snowman_core::{ConversionMode, EngineConfig, OverflowPolicy};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub preferred_input_device: Option<String>,
    pub resource_path: PathBuf,
    pub model_path: PathBuf,
    /// Comma-separated, one value per hotword.
    pub sensitivity: String,
    pub audio_gain: f32,
    pub apply_frontend: bool,
    pub conversion: ConversionMode,
    pub quantum_frames: usize,
    pub queue_capacity: usize,
    pub overflow_policy: OverflowPolicy,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            preferred_input_device: None,
            resource_path: PathBuf::from("resources/common.res"),
            model_path: PathBuf::from("resources/snowboy.umdl"),
            sensitivity: "0.5".into(),
            audio_gain: 1.0,
            apply_frontend: false,
            conversion: ConversionMode::FixedPoint,
            quantum_frames: 128,
            queue_capacity: 64,
            overflow_policy: OverflowPolicy::DropOldest,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.preferred_input_device = self
            .preferred_input_device
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        self.sensitivity = normalize_sensitivity(&self.sensitivity);
        self.audio_gain = if self.audio_gain.is_finite() {
            self.audio_gain.clamp(0.1, 10.0)
        } else {
            1.0
        };
        self.quantum_frames = self.quantum_frames.clamp(32, 4096);
        self.queue_capacity = self.queue_capacity.clamp(1, 4096);
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            quantum_frames: self.quantum_frames,
            conversion: self.conversion,
            queue_capacity: self.queue_capacity,
            overflow: self.overflow_policy,
            sensitivity: Some(self.sensitivity.clone()),
            audio_gain: self.audio_gain,
            apply_frontend: self.apply_frontend,
        }
    }
}

/// Trim and clamp each comma-separated value to [0, 1]; unparsable entries
/// fall back to 0.5.
pub fn normalize_sensitivity(raw: &str) -> String {
    let values: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| {
            let s = v.parse::<f32>().ok().filter(|s| s.is_finite()).unwrap_or(0.5);
            format!("{}", s.clamp(0.0, 1.0))
        })
        .collect();
    if values.is_empty() {
        "0.5".into()
    } else {
        values.join(",")
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Snowman")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("snowman")
            .join("settings.json")
    }
}

/// Missing or unreadable files yield defaults.
pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings(&dir.path().join("nope.json"));
        assert_eq!(settings, AppSettings::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{"sensitivity":" 0.4 , 2 ","overflowPolicy":"drop-newest","preferredInputDevice":"  "}"#,
        )
        .unwrap();

        let settings = load_settings(&path);
        assert_eq!(settings.sensitivity, "0.4,1");
        assert_eq!(settings.overflow_policy, OverflowPolicy::DropNewest);
        assert_eq!(settings.preferred_input_device, None);
        assert_eq!(settings.queue_capacity, 64);
    }

    #[test]
    fn corrupt_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{not json").unwrap();
        assert_eq!(load_settings(&path), AppSettings::default());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = AppSettings {
            conversion: ConversionMode::Passthrough,
            audio_gain: 2.0,
            ..AppSettings::default()
        };
        save_settings(&path, &settings).unwrap();
        assert_eq!(load_settings(&path), settings);
    }

    #[test]
    fn normalize_clamps_numbers() {
        let mut settings = AppSettings {
            audio_gain: f32::NAN,
            quantum_frames: 1,
            queue_capacity: 0,
            sensitivity: "abc".into(),
            ..AppSettings::default()
        };
        settings.normalize();
        assert_eq!(settings.audio_gain, 1.0);
        assert_eq!(settings.quantum_frames, 32);
        assert_eq!(settings.queue_capacity, 1);
        assert_eq!(settings.sensitivity, "0.5");
    }

    #[test]
    fn engine_config_carries_settings() {
        let config = AppSettings::default().engine_config();
        assert_eq!(config.sensitivity.as_deref(), Some("0.5"));
        assert_eq!(config.quantum_frames, 128);
        assert_eq!(config.overflow, OverflowPolicy::DropOldest);
    }
}
