//! Where the runner keeps its two files on disk.
//!
//! Both live side by side in one per-user directory named after the app:
//! `settings.toml` holds [`AppConfig`](super::AppConfig) and `session.json`
//! holds the in-progress assessment so a restart can resume it. The platform
//! directory comes from `dirs::config_dir()` (e.g. `~/.config` on Linux,
//! `%APPDATA%` on Windows); without one, the working directory is used.

use std::path::{Path, PathBuf};

const APP_DIR: &str = "assessment-runner";
const SETTINGS_FILE: &str = "settings.toml";
const SESSION_FILE: &str = "session.json";

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    pub settings_file: PathBuf,
    /// Persisted session; removed once the assessment is finalized.
    pub session_file: PathBuf,
}

impl AppPaths {
    /// The per-user location.
    pub fn new() -> Self {
        let base = dirs::config_dir().unwrap_or_else(|| {
            log::warn!("no platform config directory; keeping files in the working directory");
            PathBuf::from(".")
        });
        Self::under(&base)
    }

    /// Lay the files out in `<base>/assessment-runner/`.
    pub fn under(base: &Path) -> Self {
        let config_dir = base.join(APP_DIR);
        Self {
            settings_file: config_dir.join(SETTINGS_FILE),
            session_file: config_dir.join(SESSION_FILE),
            config_dir,
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_and_session_share_the_app_directory() {
        let paths = AppPaths::under(Path::new("/srv/kiosk"));
        assert_eq!(paths.config_dir, Path::new("/srv/kiosk/assessment-runner"));
        assert_eq!(paths.settings_file.parent(), Some(paths.config_dir.as_path()));
        assert_eq!(paths.session_file.parent(), Some(paths.config_dir.as_path()));
        assert_ne!(paths.settings_file, paths.session_file);
    }

    #[test]
    fn platform_location_ends_in_the_app_directory() {
        let paths = AppPaths::new();
        assert!(paths.config_dir.ends_with(APP_DIR));
        assert!(paths.session_file.ends_with("assessment-runner/session.json"));
    }
}
