use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::backend::DEFAULT_DEVICE;
use crate::{Result, SonifierError};

/// Top-level tuning for one sonifier instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SonifierConfig {
    /// Grid width in pixels.
    pub columns: usize,
    /// Grid height in pixels; the pitch-stereo strategy allocates one row
    /// voice per row.
    pub rows: usize,
    /// Lowest oscillator frequency in Hz.
    pub low_freq: f32,
    /// Highest oscillator frequency in Hz; must be above `low_freq`.
    pub high_freq: f32,
    /// Logical output device name.
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default)]
    pub sweep: SweepConfig,
}

fn default_device() -> String {
    DEFAULT_DEVICE.to_string()
}

impl Default for SonifierConfig {
    fn default() -> Self {
        Self {
            columns: 80,
            rows: 32,
            low_freq: 500.0,
            high_freq: 5000.0,
            device: default_device(),
            sweep: SweepConfig::default(),
        }
    }
}

impl SonifierConfig {
    /// Defaults for the ambient HSV strategy, which sits in a wider and
    /// lower band than the row-voice bank.
    pub fn ambient_defaults() -> Self {
        Self {
            low_freq: 90.0,
            high_freq: 4000.0,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.columns == 0 || self.rows == 0 {
            return Err(SonifierError::InvalidDimensions {
                width: self.columns,
                height: self.rows,
            });
        }
        if !(self.high_freq > self.low_freq) || self.low_freq <= 0.0 {
            return Err(SonifierError::InvalidFrequencyRange {
                low: self.low_freq,
                high: self.high_freq,
            });
        }
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw)?;
        Ok(())
    }
}

/// Timing of the detailed (sweep) playback mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Seconds between a whole-image mix and its automatic sweep.
    pub delay_secs: f32,
    /// Seconds one left-to-right sweep takes.
    pub duration_secs: f32,
    /// Number of back-to-back sweep repetitions.
    pub count: usize,
    /// Treat dark pixels as loud, for light-on-dark content.
    pub reverse_brightness: bool,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            delay_secs: 0.5,
            duration_secs: 4.0,
            count: 4,
            reverse_brightness: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        SonifierConfig::default().validate().unwrap();
        SonifierConfig::ambient_defaults().validate().unwrap();
    }

    #[test]
    fn rejects_zero_dimensions() {
        let config = SonifierConfig {
            rows: 0,
            ..SonifierConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SonifierError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn rejects_inverted_frequency_band() {
        let config = SonifierConfig {
            low_freq: 5000.0,
            high_freq: 500.0,
            ..SonifierConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SonifierError::InvalidFrequencyRange { .. })
        ));
    }

    #[test]
    fn round_trips_through_json() {
        let path = std::env::temp_dir().join(format!(
            "pixel-sonifier-config-{}.json",
            std::process::id()
        ));
        let config = SonifierConfig {
            columns: 12,
            rows: 7,
            ..SonifierConfig::default()
        };
        config.save(&path).unwrap();
        let loaded = SonifierConfig::load(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(loaded.columns, 12);
        assert_eq!(loaded.rows, 7);
        assert_eq!(loaded.device, DEFAULT_DEVICE);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let raw = r#"{"columns": 4, "rows": 4, "low_freq": 100.0, "high_freq": 200.0}"#;
        let config: SonifierConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.device, DEFAULT_DEVICE);
        assert_eq!(config.sweep.count, 4);
    }
}
