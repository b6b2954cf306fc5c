//! Host configuration file
//!
//! JSON at `<config-dir>/unit-host/config.json`. Every field has a default,
//! so a partial file (or none at all) is fine. CLI flags override it.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::audio::device::AudioConfig;
use crate::audio::engine::EngineOptions;
use crate::audio::midi::ArpSettings;
use crate::error::ConfigError;

pub const MIN_TUNER_REFERENCE: f32 = 430.0;
pub const MAX_TUNER_REFERENCE: f32 = 450.0;
pub const MAX_FRAMES_PER_PERIOD: u16 = 4096;
/// Lowest rate the pitch detector still covers its full frequency range at
pub const MIN_SAMPLE_RATE: u32 = 8_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub audio: AudioConfig,
    pub output_device: Option<String>,
    pub input_device: Option<String>,
    pub queue_capacity: usize,
    pub pitch_interval_periods: u32,
    /// A4 frequency for tuner readings
    pub tuner_reference_hz: f32,
    pub arpeggiator: ArpSettings,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            output_device: None,
            input_device: None,
            queue_capacity: 64,
            pitch_interval_periods: 8,
            tuner_reference_hz: 440.0,
            arpeggiator: ArpSettings::default(),
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("unit-host").join("config.json"))
}

impl HostConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: HostConfig = serde_json::from_str(&text)?;
        config.normalize();
        config.validate()?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// The default config file when it exists, built-in defaults otherwise
    pub fn load_or_default() -> Result<Self, ConfigError> {
        match default_config_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                log::debug!("No config file, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(io_err)
    }

    /// Clamp soft settings into range
    pub fn normalize(&mut self) {
        self.tuner_reference_hz = if self.tuner_reference_hz.is_finite() {
            self.tuner_reference_hz
                .clamp(MIN_TUNER_REFERENCE, MAX_TUNER_REFERENCE)
        } else {
            440.0
        };
        self.pitch_interval_periods = self.pitch_interval_periods.max(1);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let audio = &self.audio;
        if audio.sample_rate < MIN_SAMPLE_RATE {
            return Err(ConfigError::Invalid(format!(
                "sample rate {} below {}",
                audio.sample_rate, MIN_SAMPLE_RATE
            )));
        }
        if audio.frames_per_period == 0 || audio.frames_per_period > MAX_FRAMES_PER_PERIOD {
            return Err(ConfigError::Invalid(format!(
                "frames per period {} outside 1..={}",
                audio.frames_per_period, MAX_FRAMES_PER_PERIOD
            )));
        }
        if !(1..=2).contains(&audio.output_channels) {
            return Err(ConfigError::Invalid(format!(
                "output channels {} outside 1..=2",
                audio.output_channels
            )));
        }
        if audio.input_channels > 2 {
            return Err(ConfigError::Invalid(format!(
                "input channels {} above 2",
                audio.input_channels
            )));
        }
        if self.queue_capacity < 2 || !self.queue_capacity.is_power_of_two() {
            return Err(ConfigError::Invalid(format!(
                "queue capacity {} is not a power of two",
                self.queue_capacity
            )));
        }
        if !(0.0..=1.0).contains(&audio.master_volume) {
            return Err(ConfigError::Invalid(format!(
                "master volume {} outside 0..=1",
                audio.master_volume
            )));
        }
        Ok(())
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            audio: self.audio.clone(),
            output_device: self.output_device.clone(),
            input_device: self.input_device.clone(),
            queue_capacity: self.queue_capacity,
            pitch_interval: self.pitch_interval_periods,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::midi::{ArpPattern, StepDivision};

    #[test]
    fn test_defaults() {
        let config = HostConfig::default();
        assert_eq!(config.audio.sample_rate, 48_000);
        assert_eq!(config.audio.frames_per_period, 128);
        assert_eq!(config.audio.output_channels, 2);
        assert_eq!(config.audio.input_channels, 0);
        assert_eq!(config.audio.master_volume, 0.5);
        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.arpeggiator.division, StepDivision::Sixteenth);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{ "audio": { "sample_rate": 44100 }, "tuner_reference_hz": 470.0,
                 "arpeggiator": { "pattern": "up_down", "bpm": 90.0 } }"#,
        )
        .unwrap();

        let config = HostConfig::load(&path).unwrap();
        assert_eq!(config.audio.sample_rate, 44_100);
        assert_eq!(config.audio.frames_per_period, 128);
        assert_eq!(config.tuner_reference_hz, MAX_TUNER_REFERENCE);
        assert_eq!(config.arpeggiator.pattern, ArpPattern::UpDown);
        assert_eq!(config.arpeggiator.bpm, 90.0);
        assert_eq!(config.arpeggiator.gate_length, 80.0);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("config.json");
        let mut config = HostConfig::default();
        config.output_device = Some("Speakers".into());
        config.arpeggiator.enabled = true;

        config.save(&path).unwrap();
        assert_eq!(HostConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let cases: [fn(&mut HostConfig); 9] = [
            |c| c.audio.sample_rate = 0,
            |c| c.audio.sample_rate = 50,
            |c| c.audio.frames_per_period = 0,
            |c| c.audio.frames_per_period = 8192,
            |c| c.audio.output_channels = 0,
            |c| c.audio.output_channels = 3,
            |c| c.audio.input_channels = 4,
            |c| c.queue_capacity = 48,
            |c| c.audio.master_volume = 1.5,
        ];
        for mutate in cases {
            let mut config = HostConfig::default();
            mutate(&mut config);
            assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        }
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(matches!(HostConfig::load(&missing), Err(ConfigError::Io { .. })));

        let broken = dir.path().join("broken.json");
        fs::write(&broken, "{ not json").unwrap();
        assert!(matches!(HostConfig::load(&broken), Err(ConfigError::Parse(_))));
    }
}
