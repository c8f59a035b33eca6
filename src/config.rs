// Engine configuration - Scheduling and metronome settings loaded from RON

use std::path::Path;

use ron::ser::PrettyConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("RON parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),

    #[error("RON error: {0}")]
    Ron(#[from] ron::Error),
}

/// A click sound to try: one resource for the accent, optionally another for the other beats
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClickSoundCandidate {
    pub accent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regular: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetronomeConfig {
    pub enabled: bool,
    /// 0.0 to 1.0
    pub volume: f32,
    /// Tried in order; when all fail, clicks are synthesized
    pub click_sounds: Vec<ClickSoundCandidate>,
    pub accent_frequency: f32,
    pub regular_frequency: f32,
    pub click_duration_ms: f64,
}

impl Default for MetronomeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            volume: 0.5,
            click_sounds: Vec::new(),
            accent_frequency: 1200.0,
            regular_frequency: 800.0,
            click_duration_ms: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How far ahead of the audio clock each tick schedules
    pub lookahead_seconds: f64,
    /// Timer period of the scheduling loop
    pub scheduling_period_ms: u64,
    /// Loop wraps handled in one tick before the rest is left for the next
    pub max_loop_wraps_per_tick: u32,
    pub metronome: MetronomeConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lookahead_seconds: 0.1,
            scheduling_period_ms: 25,
            max_loop_wraps_per_tick: 16,
            metronome: MetronomeConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_ron_str(source: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = ron::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path.as_ref())?;
        Self::from_ron_str(&source)
    }

    pub fn to_ron_string(&self) -> Result<String, ConfigError> {
        Ok(ron::ser::to_string_pretty(self, PrettyConfig::default())?)
    }

    pub fn scheduling_period(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.scheduling_period_ms)
    }

    /// The lookahead must cover at least one timer period or the audio thread starves
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.lookahead_seconds > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "lookahead_seconds must be positive, got {}",
                self.lookahead_seconds
            )));
        }
        if self.scheduling_period_ms == 0 {
            return Err(ConfigError::Invalid(
                "scheduling_period_ms must be positive".to_string(),
            ));
        }
        if self.lookahead_seconds <= self.scheduling_period().as_secs_f64() {
            return Err(ConfigError::Invalid(format!(
                "lookahead of {}s does not cover the {}ms scheduling period",
                self.lookahead_seconds, self.scheduling_period_ms
            )));
        }
        if self.max_loop_wraps_per_tick == 0 {
            return Err(ConfigError::Invalid(
                "max_loop_wraps_per_tick must be at least 1".to_string(),
            ));
        }

        let metronome = &self.metronome;
        if !(0.0..=1.0).contains(&metronome.volume) {
            return Err(ConfigError::Invalid(format!(
                "metronome volume must be within 0.0..=1.0, got {}",
                metronome.volume
            )));
        }
        if !(metronome.accent_frequency > 0.0 && metronome.regular_frequency > 0.0) {
            return Err(ConfigError::Invalid(
                "metronome click frequencies must be positive".to_string(),
            ));
        }
        if !(metronome.click_duration_ms > 0.0) {
            return Err(ConfigError::Invalid(
                "metronome click_duration_ms must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
