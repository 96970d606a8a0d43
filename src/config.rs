//! Configuration for audiometry sessions
//!
//! A single immutable `AppConfig` is built (defaults or JSON file), validated
//! once, and passed into the session at construction. Nothing here is
//! process-wide state.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::audio::{StreamRequest, ToneSettings};
use crate::calibration::CalibrationTable;
use crate::ear::Ear;
use crate::error::SessionError;

/// Complete application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub session: SessionConfig,
    pub tone: ToneConfig,
    pub calibration: CalibrationTable,
}

/// Standard frequency lists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrequencyPreset {
    /// All calibrated frequencies, 125 Hz to 8 kHz
    Full,
    /// Screening order: 1, 2, 4 kHz then 500 Hz
    Quick,
    /// 1 kHz and 4 kHz only
    Mini,
}

impl FrequencyPreset {
    pub fn frequencies(self) -> Vec<u32> {
        match self {
            FrequencyPreset::Full => vec![
                125, 250, 500, 750, 1000, 1500, 2000, 3000, 4000, 6000, 8000,
            ],
            FrequencyPreset::Quick => vec![1000, 2000, 4000, 500],
            FrequencyPreset::Mini => vec![1000, 4000],
        }
    }
}

/// Tone shaping and output stream parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToneConfig {
    /// Fade-in time in milliseconds
    pub attack_ms: f32,
    /// Fade-out time in milliseconds
    pub release_ms: f32,
    pub sample_rate: u32,
    /// Output channels requested from the device (at least 2)
    pub channels: u16,
    /// Fixed frames per callback, if the backend supports it
    pub block_size: Option<u32>,
    /// Output device name, matched as a substring
    pub device: Option<String>,
}

impl Default for ToneConfig {
    fn default() -> Self {
        Self {
            attack_ms: 30.0,
            release_ms: 40.0,
            sample_rate: 44_100,
            channels: 2,
            block_size: None,
            device: None,
        }
    }
}

impl ToneConfig {
    pub fn settings(&self) -> ToneSettings {
        ToneSettings {
            attack_ms: self.attack_ms,
            release_ms: self.release_ms,
        }
    }

    pub fn stream_request(&self) -> StreamRequest {
        StreamRequest {
            device: self.device.clone(),
            sample_rate: self.sample_rate,
            channels: self.channels,
            block_size: self.block_size,
        }
    }
}

/// Test procedure parameters. Levels in dBHL, durations in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Test order of frequencies (Hz)
    pub frequencies: Vec<u32>,
    /// Ears to test; order is shuffled once per session when `shuffle_ears`
    pub ears: Vec<Ear>,
    pub familiarization_start_dbhl: f32,
    /// Highest level presented while searching for an audible tone
    pub familiarization_ceiling_dbhl: f32,
    pub small_increment_db: f32,
    pub large_increment_db: f32,
    pub small_decrement_db: f32,
    pub large_decrement_db: f32,
    /// Safety floor; the staircase never presents below it
    pub floor_dbhl: f32,
    /// Safety ceiling; the staircase never presents above it
    pub ceiling_dbhl: f32,
    pub tone_duration_ms: u64,
    /// How long after the tone stops a held button must be released
    pub release_tolerance_ms: u64,
    /// Inter-trial pause range [min, max]
    pub pause_ms: [u64; 2],
    pub familiarization_pause_ms: u64,
    pub familiarization_release_timeout_ms: u64,
    /// Wait for the press of the acknowledgement gesture
    pub acknowledgement_timeout_ms: u64,
    /// Extra time allowed for the acknowledgement release
    pub acknowledgement_grace_ms: u64,
    /// Pause between two frequencies
    pub combination_pause_ms: u64,
    /// Pause before switching to the other ear
    pub ear_switch_pause_ms: u64,
    /// Bracket cycles before the best-effort fallback
    pub max_confirmation_cycles: u32,
    /// Sleep chunk between cancellation checks
    pub cancel_poll_ms: u64,
    pub shuffle_ears: bool,
    /// Seed for ear order and pause randomization
    pub seed: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            frequencies: FrequencyPreset::Quick.frequencies(),
            ears: vec![Ear::Right, Ear::Left],
            familiarization_start_dbhl: 40.0,
            familiarization_ceiling_dbhl: 80.0,
            small_increment_db: 5.0,
            large_increment_db: 10.0,
            small_decrement_db: 10.0,
            large_decrement_db: 20.0,
            floor_dbhl: -10.0,
            ceiling_dbhl: 100.0,
            tone_duration_ms: 2000,
            release_tolerance_ms: 1500,
            pause_ms: [2000, 3000],
            familiarization_pause_ms: 500,
            familiarization_release_timeout_ms: 2000,
            acknowledgement_timeout_ms: 30_000,
            acknowledgement_grace_ms: 1000,
            combination_pause_ms: 300,
            ear_switch_pause_ms: 500,
            max_confirmation_cycles: 5,
            cancel_poll_ms: 50,
            shuffle_ears: true,
            seed: None,
        }
    }
}

impl SessionConfig {
    pub fn with_preset(preset: FrequencyPreset) -> Self {
        Self {
            frequencies: preset.frequencies(),
            ..Self::default()
        }
    }

    pub fn combination_pause(&self) -> Duration {
        Duration::from_millis(self.combination_pause_ms)
    }

    pub fn ear_switch_pause(&self) -> Duration {
        Duration::from_millis(self.ear_switch_pause_ms)
    }

    pub fn cancel_poll(&self) -> Duration {
        Duration::from_millis(self.cancel_poll_ms)
    }

    pub fn total_steps(&self) -> usize {
        self.frequencies.len() * self.ears.len()
    }

    fn validate(&self) -> Result<(), SessionError> {
        let invalid = |reason: String| Err(SessionError::InvalidConfig { reason });

        if self.frequencies.is_empty() {
            return invalid("frequency list is empty".to_string());
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.frequencies.iter().find(|f| !seen.insert(**f)) {
            return invalid(format!("frequency {} Hz listed twice", dup));
        }

        if self.ears.is_empty() {
            return invalid("ear list is empty".to_string());
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.ears.iter().find(|e| !seen.insert(**e)) {
            return invalid(format!("ear {} listed twice", dup));
        }

        let steps = [
            ("small_increment_db", self.small_increment_db),
            ("large_increment_db", self.large_increment_db),
            ("small_decrement_db", self.small_decrement_db),
            ("large_decrement_db", self.large_decrement_db),
        ];
        for (name, step) in steps {
            if !step.is_finite() || step <= 0.0 {
                return invalid(format!("{} must be positive, got {}", name, step));
            }
        }

        let levels = [
            ("familiarization_start_dbhl", self.familiarization_start_dbhl),
            ("familiarization_ceiling_dbhl", self.familiarization_ceiling_dbhl),
            ("floor_dbhl", self.floor_dbhl),
            ("ceiling_dbhl", self.ceiling_dbhl),
        ];
        for (name, level) in levels {
            if !level.is_finite() {
                return invalid(format!("{} must be finite", name));
            }
        }
        if self.floor_dbhl >= self.ceiling_dbhl {
            return invalid(format!(
                "floor {} dBHL must be below ceiling {} dBHL",
                self.floor_dbhl, self.ceiling_dbhl
            ));
        }
        if self.familiarization_ceiling_dbhl > self.ceiling_dbhl {
            return invalid(format!(
                "familiarization ceiling {} dBHL above safety ceiling {} dBHL",
                self.familiarization_ceiling_dbhl, self.ceiling_dbhl
            ));
        }
        if self.familiarization_start_dbhl < self.floor_dbhl
            || self.familiarization_start_dbhl > self.ceiling_dbhl
        {
            return invalid(format!(
                "familiarization start {} dBHL outside [{}, {}]",
                self.familiarization_start_dbhl, self.floor_dbhl, self.ceiling_dbhl
            ));
        }

        if self.pause_ms[0] > self.pause_ms[1] {
            return invalid(format!(
                "pause range [{}, {}] ms is inverted",
                self.pause_ms[0], self.pause_ms[1]
            ));
        }
        if self.tone_duration_ms == 0 {
            return invalid("tone_duration_ms must be positive".to_string());
        }
        if self.cancel_poll_ms == 0 {
            return invalid("cancel_poll_ms must be positive".to_string());
        }
        if self.max_confirmation_cycles == 0 {
            return invalid("max_confirmation_cycles must be at least 1".to_string());
        }
        Ok(())
    }
}

impl AppConfig {
    pub fn with_preset(preset: FrequencyPreset) -> Self {
        Self {
            session: SessionConfig::with_preset(preset),
            ..Self::default()
        }
    }

    /// Reject configurations a session cannot run with.
    ///
    /// Every configured frequency must be in the calibration table.
    pub fn validate(&self) -> Result<(), SessionError> {
        self.session.validate()?;

        for &frequency in &self.session.frequencies {
            self.calibration.entry(frequency)?;
        }

        self.tone.settings().validate()?;
        if self.tone.channels < 2 {
            return Err(SessionError::InvalidConfig {
                reason: format!(
                    "{} output channel(s) cannot isolate two ears",
                    self.tone.channels
                ),
            });
        }
        if self.tone.sample_rate == 0 {
            return Err(SessionError::InvalidConfig {
                reason: "sample_rate must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Load and validate a JSON configuration file
    pub fn try_load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, SessionError> {
        let contents = fs::read_to_string(&path).map_err(|e| SessionError::InvalidConfig {
            reason: format!("failed to read {:?}: {}", path.as_ref(), e),
        })?;
        let config: AppConfig =
            serde_json::from_str(&contents).map_err(|e| SessionError::InvalidConfig {
                reason: format!("failed to parse {:?}: {}", path.as_ref(), e),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from JSON file
    ///
    /// Falls back to the defaults (with a warning) if the file is missing,
    /// unparsable or invalid.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match Self::try_load_from_file(&path) {
            Ok(config) => {
                log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                config
            }
            Err(err) => {
                log::warn!("[Config] {}. Using defaults.", err);
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationEntry;
    use crate::error::CalibrationError;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.session.frequencies, vec![1000, 2000, 4000, 500]);
        assert_eq!(config.session.ears, vec![Ear::Right, Ear::Left]);
        assert_eq!(config.session.familiarization_start_dbhl, 40.0);
        assert_eq!(config.session.pause_ms, [2000, 3000]);
        assert_eq!(config.session.max_confirmation_cycles, 5);
        assert_eq!(config.tone.attack_ms, 30.0);
        assert_eq!(config.tone.release_ms, 40.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets() {
        assert_eq!(FrequencyPreset::Mini.frequencies(), vec![1000, 4000]);
        let full = AppConfig::with_preset(FrequencyPreset::Full);
        assert_eq!(full.session.frequencies.len(), 11);
        assert!(full.validate().is_ok());
    }

    #[test]
    fn test_json_roundtrip() {
        let config = AppConfig::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let parsed: AppConfig =
            serde_json::from_str(r#"{"session": {"frequencies": [1000]}}"#).unwrap();
        assert_eq!(parsed.session.frequencies, vec![1000]);
        assert_eq!(parsed.session.tone_duration_ms, 2000);
        assert_eq!(parsed.tone, ToneConfig::default());
    }

    #[test]
    fn test_uncalibrated_frequency_rejected() {
        let mut config = AppConfig::default();
        config.session.frequencies = vec![1000, 1250];
        assert_eq!(
            config.validate(),
            Err(SessionError::Calibration(CalibrationError::Missing {
                frequency: 1250
            }))
        );
    }

    #[test]
    fn test_invalid_values_rejected() {
        let cases: Vec<Box<dyn Fn(&mut AppConfig)>> = vec![
            Box::new(|c| c.session.frequencies.clear()),
            Box::new(|c| c.session.ears = vec![Ear::Left, Ear::Left]),
            Box::new(|c| c.session.small_increment_db = 0.0),
            Box::new(|c| c.session.pause_ms = [3000, 2000]),
            Box::new(|c| c.session.floor_dbhl = 100.0),
            Box::new(|c| c.session.cancel_poll_ms = 0),
            Box::new(|c| c.tone.channels = 1),
        ];
        for mutate in cases {
            let mut config = AppConfig::default();
            mutate(&mut config);
            assert!(matches!(
                config.validate(),
                Err(SessionError::InvalidConfig { .. })
            ));
        }

        let mut config = AppConfig::default();
        config.tone.attack_ms = 0.0;
        assert!(matches!(config.validate(), Err(SessionError::Audio(_))));
    }

    #[test]
    fn test_familiarization_ceiling_above_safety_ceiling_rejected() {
        let mut config = AppConfig::default();
        config.session.ceiling_dbhl = 60.0;
        config.session.familiarization_ceiling_dbhl = 90.0;
        assert!(matches!(
            config.validate(),
            Err(SessionError::InvalidConfig { reason }) if reason.contains("safety ceiling")
        ));

        config.session.familiarization_ceiling_dbhl = 60.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_custom_calibration_in_json() {
        let mut config = AppConfig::default();
        config.calibration =
            CalibrationTable::from_entries(vec![CalibrationEntry::new(1000, -80.0, 0.0)]).unwrap();
        config.session.frequencies = vec![1000];
        let json = serde_json::to_string(&config).unwrap();
        let parsed: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.calibration.len(), 1);
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_load_from_missing_file_falls_back() {
        let config = AppConfig::load_from_file("/nonexistent/audiometer.json");
        assert_eq!(config, AppConfig::default());
        assert!(AppConfig::try_load_from_file("/nonexistent/audiometer.json").is_err());
    }
}
