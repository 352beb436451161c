//! Configuration module.
//!
//! Provides `AppConfig` (top-level settings), sub-configs for the backend
//! connection, timers, recording and pipeline composition, `AppPaths` for
//! cross-platform data directories, and TOML persistence via
//! `AppConfig::load` / `AppConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{ApiConfig, AppConfig, PipelineConfig, RecordingConfig, TimerConfig};
