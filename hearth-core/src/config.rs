#![forbid(unsafe_code)]

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::proposal::{SubjectRules, SubjectType};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    pub db_filename: String,
    /// Expiry sweep cadence in seconds.
    pub scan_interval_secs: u64,
    /// Per-subject deadline overrides; subjects absent here use the
    /// built-in table.
    #[serde(default)]
    pub rules: HashMap<SubjectType, SubjectRules>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir().unwrap_or_else(|_| {
                let fallback = std::env::temp_dir().join("hearth");
                tracing::warn!(
                    path = %fallback.display(),
                    "Could not determine platform data directory; using ephemeral temp directory"
                );
                fallback
            }),
            db_filename: "hearth.db".to_string(),
            scan_interval_secs: 300,
            rules: HashMap::new(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            data_dir: default_data_dir()?,
            ..Self::default()
        })
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("failed to read config file: {}", e)))?;
        let config: Self = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(&self.db_filename)
    }

    pub fn with_data_dir(mut self, path: PathBuf) -> Self {
        self.data_dir = path;
        self
    }

    pub fn scan_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.scan_interval_secs)
    }

    pub fn rules_for(&self, subject: SubjectType) -> SubjectRules {
        self.rules
            .get(&subject)
            .cloned()
            .unwrap_or_else(|| SubjectRules::for_subject(subject))
    }

    pub fn ensure_data_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)
    }
}

fn default_data_dir() -> Result<PathBuf, Error> {
    ProjectDirs::from("app", "hearth", "hearth")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_else(|| {
            Error::Config(
                "Could not determine platform data directory; \
                 please specify a data dir or set $HOME"
                    .to_string(),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.db_filename, "hearth.db");
        assert_eq!(config.scan_interval_secs, 300);
        assert!(config.rules.is_empty());
    }

    #[test]
    fn test_db_path() {
        let config = EngineConfig::default().with_data_dir(PathBuf::from("/tmp/test"));
        assert_eq!(config.db_path(), PathBuf::from("/tmp/test/hearth.db"));
    }

    #[test]
    fn test_rules_fall_back_to_builtin_table() {
        let config = EngineConfig::default();
        let rules = config.rules_for(SubjectType::SafetySetting);
        assert_eq!(rules.pending_lifetime, Some(Duration::hours(72)));
    }

    #[test]
    fn test_load_overrides_from_yaml() {
        let yaml = r#"
data_dir: /tmp/hearth-test
db_filename: consent.db
scan_interval_secs: 60
rules:
  safety_setting:
    pending_lifetime: 3600
    cooling_period: 600
    review_window: 1200
    decline_cooldown: 86400
    multi_party: false
"#;
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.db_filename, "consent.db");

        let rules = config.rules_for(SubjectType::SafetySetting);
        assert_eq!(rules.pending_lifetime, Some(Duration::hours(1)));
        assert_eq!(rules.cooling_period, Duration::minutes(10));

        // Untouched subjects keep their defaults.
        let dissolution = config.rules_for(SubjectType::Dissolution);
        assert_eq!(dissolution.cooling_period, Duration::days(30));
    }
}
