use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};
use crate::watch::DEFAULT_WATCH_HISTORY;

/// Settings for the in-memory provider and the command line tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// JSON file the store is loaded from and persisted to, if any.
    pub store_file: Option<String>,
    /// Minimum interval between automatic store saves.
    pub save_interval_millis: u64,
    /// How long a hold reserves an address.
    pub hold_duration_seconds: u32,
    /// Lease duration used when the effective configuration sets no `lease-time`.
    pub default_lease_seconds: u32,
    /// Past events kept per scope for watchers resuming from a revision.
    pub watch_history: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_file: None,
            save_interval_millis: 5000,
            hold_duration_seconds: 3600,
            default_lease_seconds: 86400,
            watch_history: DEFAULT_WATCH_HISTORY,
        }
    }
}

impl Config {
    pub async fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: Config = serde_json::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path).await?;
            Ok(config)
        }
    }

    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.store_file.as_deref() == Some("") {
            return Err(Error::InvalidConfig(
                "store_file must not be empty when set".to_string(),
            ));
        }

        if self.hold_duration_seconds == 0 {
            return Err(Error::InvalidConfig(
                "hold_duration_seconds must be greater than 0".to_string(),
            ));
        }

        if self.default_lease_seconds == 0 {
            return Err(Error::InvalidConfig(
                "default_lease_seconds must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestGuard(String);
    impl Drop for TestGuard {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_hold_duration() {
        let config = Config {
            hold_duration_seconds: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_lease_duration() {
        let config = Config {
            default_lease_seconds: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_store_file() {
        let config = Config {
            store_file: Some(String::new()),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"hold_duration_seconds": 90}"#).unwrap();
        assert_eq!(config.hold_duration_seconds, 90);
        assert_eq!(config.default_lease_seconds, 86400);
        assert_eq!(config.store_file, None);
    }

    #[tokio::test]
    async fn test_load_or_create_writes_default() {
        let path = "test_config_create.json".to_string();
        let _guard = TestGuard(path.clone());

        let created = Config::load_or_create(&path).await.unwrap();
        assert!(Path::new(&path).exists());

        let loaded = Config::load_or_create(&path).await.unwrap();
        assert_eq!(loaded.hold_duration_seconds, created.hold_duration_seconds);
    }
}
