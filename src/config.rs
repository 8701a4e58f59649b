//! Configuration management
//!
//! Loads the YAML configuration (MIDI port patterns plus saxophone
//! protocol tuning) once at startup.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub midi: MidiConfig,
    #[serde(default)]
    pub sax: SaxConfig,
}

/// MIDI port configuration (substring patterns, case-insensitive)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MidiConfig {
    pub input_port: String,
    pub output_port: String,
}

/// Saxophone protocol tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SaxConfig {
    /// Pause between bulk-load entry queries, in milliseconds. Flow
    /// control against USB-MIDI input buffers that have no backpressure
    /// signal of their own.
    #[serde(default = "default_pacing_ms")]
    pub entry_pacing_ms: u64,

    /// What to do with recognized saxophone frames carrying an unknown
    /// command code. They are claimed either way so the shared bus does
    /// not reprocess them.
    #[serde(default)]
    pub unknown_frames: UnknownFramePolicy,
}

/// Policy for recognized-but-unhandled command codes
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UnknownFramePolicy {
    /// Discard quietly (trace-level log only)
    #[default]
    Absorb,
    /// Discard but log loudly
    Warn,
}

fn default_pacing_ms() -> u64 {
    5
}

impl Default for SaxConfig {
    fn default() -> Self {
        Self {
            entry_pacing_ms: default_pacing_ms(),
            unknown_frames: UnknownFramePolicy::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: AppConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sax_section_is_optional() {
        let yaml = "midi:\n  input_port: \"OpenDeck\"\n  output_port: \"OpenDeck\"\n";
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.sax.entry_pacing_ms, 5);
        assert_eq!(config.sax.unknown_frames, UnknownFramePolicy::Absorb);
    }

    #[test]
    fn unknown_frame_policy_parses_lowercase() {
        let yaml = concat!(
            "midi:\n  input_port: \"a\"\n  output_port: \"b\"\n",
            "sax:\n  entry_pacing_ms: 10\n  unknown_frames: warn\n",
        );
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.sax.entry_pacing_ms, 10);
        assert_eq!(config.sax.unknown_frames, UnknownFramePolicy::Warn);
    }
}
