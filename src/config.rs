use std::path::Path;
use std::sync::{LazyLock, OnceLock};

use serde::Deserialize;

use crate::error::TranscodeError;

/// Tunables for a transcode run.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    /// Capacity of every stage-to-stage queue.
    pub decoded_queue_depth: usize,
    /// Chunks held per track before the oldest is written.
    pub reorder_window: usize,
    /// Video chunks scanned when estimating frame rate from arrival times.
    pub scan_chunk_count: usize,
    pub default_video_bitrate: u64,
    pub default_audio_bitrate: u64,
    pub audio_sample_rate: u32,
    pub audio_channels: u16,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            decoded_queue_depth: 4,
            reorder_window: 8,
            scan_chunk_count: 120,
            default_video_bitrate: 2_000_000,
            default_audio_bitrate: 128_000,
            audio_sample_rate: 48_000,
            audio_channels: 2,
        }
    }
}

impl TranscodeConfig {
    pub fn from_toml(text: &str) -> Result<Self, TranscodeError> {
        let config: Self = toml::from_str(text)
            .map_err(|e| TranscodeError::Parse(format!("config: {}", e)))?;
        if config.decoded_queue_depth == 0 {
            return Err(TranscodeError::Parse(
                "config: decoded_queue_depth must be at least 1".into(),
            ));
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, TranscodeError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }
}

static INSTALLED: OnceLock<TranscodeConfig> = OnceLock::new();

/// Replaces the built-in defaults for the rest of the process. Only the
/// first call has an effect.
pub fn install(config: TranscodeConfig) -> bool {
    INSTALLED.set(config).is_ok()
}

pub fn config() -> &'static TranscodeConfig {
    static DEFAULT: LazyLock<TranscodeConfig> = LazyLock::new(TranscodeConfig::default);
    INSTALLED.get().unwrap_or(&DEFAULT)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
