use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct TutorbookConfig {
    pub scheduling: SchedulingConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SchedulingConfig {
    pub min_session_minutes: i64,
    pub min_window_minutes: i64,
    /// Attempts at a read-plan-commit cycle before giving up on a contended calendar.
    pub max_commit_attempts: u32,
    pub reject_past_sessions: bool,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            min_session_minutes: 60,
            min_window_minutes: 60,
            max_commit_attempts: 5,
            reject_past_sessions: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub wal_file: String,
    /// Appends since the last compaction that trigger the next one.
    pub compact_threshold: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            wal_file: "tutorbook.wal".to_string(),
            compact_threshold: 1000,
        }
    }
}

impl StorageConfig {
    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(&self.wal_file)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing-subscriber` env-filter directive.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl TutorbookConfig {
    /// Defaults, overlaid by the TOML file at `path` (if given and present), overlaid by
    /// `TUTORBOOK__<SECTION>__<KEY>` environment variables.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(false));
        }
        builder
            .add_source(Environment::with_prefix("TUTORBOOK").separator("__"))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_without_sources() {
        let cfg = TutorbookConfig::load(None).unwrap();
        assert_eq!(cfg.scheduling.min_session_minutes, 60);
        assert_eq!(cfg.scheduling.max_commit_attempts, 5);
        assert!(cfg.scheduling.reject_past_sessions);
        assert_eq!(cfg.storage.wal_path(), PathBuf::from("./data/tutorbook.wal"));
        assert_eq!(cfg.logging.filter, "info");
    }

    #[test]
    fn file_overrides_selected_keys() {
        let dir = std::env::temp_dir().join("tutorbook_test_config");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("{}.toml", ulid::Ulid::new()));
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            "[scheduling]\nmin_session_minutes = 120\n\n[storage]\ncompact_threshold = 50"
        )
        .unwrap();

        let cfg = TutorbookConfig::load(path.to_str()).unwrap();
        assert_eq!(cfg.scheduling.min_session_minutes, 120);
        assert_eq!(cfg.scheduling.min_window_minutes, 60);
        assert_eq!(cfg.storage.compact_threshold, 50);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = TutorbookConfig::load(Some("/nonexistent/tutorbook.toml")).unwrap();
        assert_eq!(cfg.storage.compact_threshold, 1000);
    }
}
