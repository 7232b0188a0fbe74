//! Synthesis parameters fixed when a session is loaded.

use crate::error::{Result, SessionError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Sample rate for audio synthesis (44.1 kHz standard).
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Maximum simultaneous voices per synthesizer.
pub const DEFAULT_POLYPHONY: usize = 32;

/// Frames rendered per audio period.
/// Smaller = lower latency but higher CPU usage.
pub const DEFAULT_PERIOD_SIZE: usize = 64;

/// Number of periods in the device buffer.
pub const DEFAULT_PERIODS: usize = 4;

/// Scheduling priority requested for the audio thread.
pub const DEFAULT_REALTIME_PRIORITY: u8 = 99;

/// Linear output gain.
pub const DEFAULT_GAIN: f32 = 1.0;

/// Immutable configuration of one session.
///
/// Every field has a default, so a JSON file only needs to name the
/// values it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Voice limit of the synthesizer.
    pub polyphony: usize,
    /// Frames per render block.
    pub period_size: usize,
    /// Periods of buffering between the renderer and the device.
    pub periods: usize,
    /// Priority hint for the real-time audio thread.
    pub realtime_priority: u8,
    /// Linear gain applied to the rendered signal.
    pub gain: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            polyphony: DEFAULT_POLYPHONY,
            period_size: DEFAULT_PERIOD_SIZE,
            periods: DEFAULT_PERIODS,
            realtime_priority: DEFAULT_REALTIME_PRIORITY,
            gain: DEFAULT_GAIN,
        }
    }
}

impl SessionConfig {
    /// Reads a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, is not valid JSON, or
    /// fails [`SessionConfig::validate`].
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            SessionError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            SessionError::InvalidConfig(format!("cannot parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the values against the ranges the synthesizer accepts.
    pub fn validate(&self) -> Result<()> {
        if !(16_000..=192_000).contains(&self.sample_rate) {
            return Err(SessionError::InvalidConfig(format!(
                "sample rate {} Hz outside 16000-192000",
                self.sample_rate
            )));
        }
        if !(8..=256).contains(&self.polyphony) {
            return Err(SessionError::InvalidConfig(format!(
                "polyphony {} outside 8-256",
                self.polyphony
            )));
        }
        if !(8..=1024).contains(&self.period_size) {
            return Err(SessionError::InvalidConfig(format!(
                "period size {} outside 8-1024",
                self.period_size
            )));
        }
        if self.periods == 0 {
            return Err(SessionError::InvalidConfig(
                "periods must be at least 1".to_string(),
            ));
        }
        if !self.gain.is_finite() || self.gain < 0.0 {
            return Err(SessionError::InvalidConfig(format!(
                "gain {} must be a finite, non-negative number",
                self.gain
            )));
        }
        Ok(())
    }

    /// Buffering latency implied by the period settings, in milliseconds.
    pub fn latency_ms(&self) -> f64 {
        (self.period_size * self.periods) as f64 * 1000.0 / self.sample_rate as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_fixed_constants() {
        let config = SessionConfig::default();
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.polyphony, 32);
        assert_eq!(config.period_size, 64);
        assert_eq!(config.periods, 4);
        assert_eq!(config.realtime_priority, 99);
        assert_eq!(config.gain, 1.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_latency() {
        let config = SessionConfig::default();
        // 256 frames at 44.1 kHz
        assert!((config.latency_ms() - 5.805).abs() < 0.01);
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let config = SessionConfig {
            polyphony: 2,
            ..SessionConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SessionError::InvalidConfig(_))
        ));

        let config = SessionConfig {
            gain: f32::NAN,
            ..SessionConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "sample_rate": 48000, "gain": 0.5 }}"#).unwrap();

        let config = SessionConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.gain, 0.5);
        assert_eq!(config.polyphony, DEFAULT_POLYPHONY);
    }
}
