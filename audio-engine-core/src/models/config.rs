use serde::{Deserialize, Serialize};

use super::error::EngineError;
use super::format::AudioFormat;

/// Engine-wide settings.
///
/// Every field has a default, so partial JSON documents are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How often the device watchdog re-enumerates devices (default: 100).
    pub device_enumeration_period_ms: u64,

    /// Length of one render cycle (default: 10). Valid range: 1..=1000.
    pub render_chunk_ms: u32,

    /// Upper bound handed to blocking backend waits and reads (default: 200).
    pub stream_timeout_ms: u64,

    /// Format requested when `initialize_render` is called without one.
    pub default_render_format: AudioFormat,

    /// Format requested when `initialize_capture` is called without one.
    pub default_capture_format: AudioFormat,

    /// Reopen a stream on the new default device when its device disappears (default: true).
    pub auto_failover: bool,
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| EngineError::Configuration(format!("invalid engine config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.device_enumeration_period_ms == 0 {
            return Err(EngineError::Configuration(
                "device enumeration period must be positive".into(),
            ));
        }
        if !(1..=1000).contains(&self.render_chunk_ms) {
            return Err(EngineError::Configuration(format!(
                "render chunk of {} ms is out of range",
                self.render_chunk_ms
            )));
        }
        if self.stream_timeout_ms == 0 {
            return Err(EngineError::Configuration("stream timeout must be positive".into()));
        }
        self.default_render_format.validate()?;
        self.default_capture_format.validate()?;
        Ok(())
    }

    /// Frames mixed per render cycle at `sample_rate`.
    pub fn render_chunk_frames(&self, sample_rate: u32) -> usize {
        ((sample_rate as u64 * self.render_chunk_ms as u64) / 1000).max(1) as usize
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device_enumeration_period_ms: 100,
            render_chunk_ms: 10,
            stream_timeout_ms: 200,
            default_render_format: AudioFormat::default(),
            default_capture_format: AudioFormat::default(),
            auto_failover: true,
        }
    }
}
