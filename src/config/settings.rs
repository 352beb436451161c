//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across tasks.
//! Every section is `#[serde(default)]`, so a partial `settings.toml` only
//! overrides the keys it names.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;

// ---------------------------------------------------------------------------
// ApiConfig
// ---------------------------------------------------------------------------

/// Connection settings for the progress service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the assessment backend, without a trailing slash.
    pub base_url: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// First back-off delay when a stage cannot load its units.
    pub retry_initial_ms: u64,
    /// Upper bound for the exponential back-off delay.
    pub retry_max_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".into(),
            timeout_secs: 30,
            retry_initial_ms: 1_000,
            retry_max_ms: 30_000,
        }
    }
}

impl ApiConfig {
    /// Back-off delay before retry number `attempt` (0-based), doubling from
    /// `retry_initial_ms` and capped at `retry_max_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(16)).unwrap_or(u64::MAX);
        let ms = self
            .retry_initial_ms
            .saturating_mul(factor)
            .min(self.retry_max_ms);
        Duration::from_millis(ms)
    }
}

// ---------------------------------------------------------------------------
// TimerConfig
// ---------------------------------------------------------------------------

/// Countdown durations, in whole seconds.
///
/// | Stage       | Unit timer              | Stage / session timer          |
/// |-------------|-------------------------|--------------------------------|
/// | listening   | `listening_unit_secs`   | `listening_session_secs` (cap) |
/// | speech      | `interview_unit_secs`   | `interview_session_secs` (cap) |
/// | written     | —                       | `written_secs`                 |
/// | personality | —                       | `personality_secs`             |
/// | typing      | —                       | `typing_secs`                  |
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    pub listening_unit_secs: u32,
    pub listening_session_secs: u32,
    pub interview_unit_secs: u32,
    pub interview_session_secs: u32,
    pub written_secs: u32,
    pub personality_secs: u32,
    pub typing_secs: u32,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            listening_unit_secs: 60,
            listening_session_secs: 600,
            interview_unit_secs: 60,
            interview_session_secs: 900,
            written_secs: 600,
            personality_secs: 900,
            typing_secs: 60,
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingConfig
// ---------------------------------------------------------------------------

/// Settings for microphone capture, encoding and the live waveform.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Sample rate of the encoded upload in Hz.
    pub target_sample_rate: u32,
    /// Number of bars in each waveform frame.
    pub waveform_bars: usize,
    /// Interval between waveform frames (~30 fps by default).
    pub frame_interval_ms: u64,
    /// How much of the most recent audio each waveform frame summarises.
    pub waveform_window_ms: u64,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16_000,
            waveform_bars: 32,
            frame_interval_ms: 33,
            waveform_window_ms: 500,
        }
    }
}

// ---------------------------------------------------------------------------
// PipelineConfig
// ---------------------------------------------------------------------------

/// Which stages the pipeline runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Append the personality form after the typing test.
    pub include_personality: bool,
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub timers: TimerConfig,
    pub recording: RecordingConfig,
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_missing_returns_default() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("nonexistent.toml");

        let config = AppConfig::load_from(&path).expect("should not error");
        assert_eq!(config.api.base_url, ApiConfig::default().base_url);
        assert_eq!(config.timers.typing_secs, 60);
    }

    #[test]
    fn default_values() {
        let cfg = AppConfig::default();

        assert_eq!(cfg.api.base_url, "http://localhost:5000");
        assert_eq!(cfg.timers.listening_session_secs, 600);
        assert_eq!(cfg.timers.interview_unit_secs, 60);
        assert_eq!(cfg.timers.interview_session_secs, 900);
        assert_eq!(cfg.timers.written_secs, 600);
        assert_eq!(cfg.timers.personality_secs, 900);
        assert_eq!(cfg.recording.target_sample_rate, 16_000);
        assert!(!cfg.pipeline.include_personality);
    }

    #[test]
    fn round_trip_modified_values() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("modified.toml");

        let mut cfg = AppConfig::default();
        cfg.api.base_url = "https://assess.example.com".into();
        cfg.timers.interview_session_secs = 1_200;
        cfg.recording.waveform_bars = 64;
        cfg.pipeline.include_personality = true;

        cfg.save_to(&path).expect("save");
        let loaded = AppConfig::load_from(&path).expect("load");

        assert_eq!(loaded.api.base_url, "https://assess.example.com");
        assert_eq!(loaded.timers.interview_session_secs, 1_200);
        assert_eq!(loaded.recording.waveform_bars, 64);
        assert!(loaded.pipeline.include_personality);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[timers]\ntyping_secs = 90\n").unwrap();

        let loaded = AppConfig::load_from(&path).expect("load");
        assert_eq!(loaded.timers.typing_secs, 90);
        assert_eq!(loaded.timers.written_secs, 600);
        assert_eq!(loaded.api.timeout_secs, 30);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let api = ApiConfig {
            retry_initial_ms: 500,
            retry_max_ms: 3_000,
            ..ApiConfig::default()
        };
        assert_eq!(api.backoff(0), Duration::from_millis(500));
        assert_eq!(api.backoff(1), Duration::from_millis(1_000));
        assert_eq!(api.backoff(2), Duration::from_millis(2_000));
        assert_eq!(api.backoff(3), Duration::from_millis(3_000));
        assert_eq!(api.backoff(40), Duration::from_millis(3_000));
    }
}
