//! Run configuration.
//!
//! Optional JSON file via serde; every key has a default. Command-line
//! flags are applied on top in main.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::process::ForkRetry;
use crate::stressor::Settings;
use crate::{FORK_RETRIES, MAX_DEPTH, MAX_FAILURES};

const MAX_CONFIG_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Number of worker processes.
    pub workers: u32,
    /// Bogo-op limit per worker, 0 = unbounded.
    pub ops: u64,
    /// Wall-clock limit per worker in seconds, 0 = none.
    pub timeout_secs: u64,
    /// Directory holding the scratch files.
    pub temp_path: PathBuf,
    pub explore: bool,
    pub explorer_root: PathBuf,
    pub max_depth: u32,
    pub failure_threshold: u32,
    pub fork_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: 1,
            ops: 0,
            timeout_secs: 60,
            temp_path: std::env::temp_dir(),
            explore: true,
            explorer_root: PathBuf::from("/"),
            max_depth: MAX_DEPTH,
            failure_threshold: MAX_FAILURES,
            fork_retries: FORK_RETRIES,
        }
    }
}

impl Config {
    /// Load from `path`, or defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let content = fs::read_to_string(path)?;
        if content.len() > MAX_CONFIG_BYTES {
            return Err(Error::Config(format!(
                "{} is larger than {} bytes",
                path.display(),
                MAX_CONFIG_BYTES
            )));
        }
        Ok(serde_json::from_str(&content)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("workers must be at least 1".into()));
        }
        if self.failure_threshold == 0 {
            return Err(Error::Config("failure_threshold must be at least 1".into()));
        }
        if !self.temp_path.is_dir() {
            return Err(Error::Config(format!(
                "temp path {} is not a directory",
                self.temp_path.display()
            )));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    /// Stressor settings with the scratch directory canonicalized.
    pub fn settings(&self) -> Settings {
        let temp_dir = fs::canonicalize(&self.temp_path).unwrap_or_else(|_| self.temp_path.clone());
        Settings {
            temp_dir,
            explorer_root: self.explore.then(|| self.explorer_root.clone()),
            max_depth: self.max_depth,
            failure_threshold: self.failure_threshold,
            fork_retry: ForkRetry {
                max_attempts: self.fork_retries,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_stressor_constants() {
        let config = Config::default();
        assert_eq!(config.max_depth, 30);
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.explorer_root, PathBuf::from("/"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_file_means_defaults() {
        assert_eq!(Config::load(None).unwrap(), Config::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("landlock.json");
        fs::write(&path, r#"{ "workers": 4, "explore": false, "ops": 10 }"#).unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.ops, 10);
        assert!(!config.explore);
        assert_eq!(config.failure_threshold, 5);
        assert!(config.settings().explorer_root.is_none());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("landlock.json");
        fs::write(&path, r#"{ "wokers": 4 }"#).unwrap();
        assert!(matches!(Config::load(Some(&path)), Err(Error::Json(_))));
    }

    #[test]
    fn validation_catches_bad_values() {
        let mut config = Config {
            workers: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.workers = 1;
        config.failure_threshold = 0;
        assert!(config.validate().is_err());

        config.failure_threshold = 5;
        config.temp_path = PathBuf::from("/nonexistent/landlock-stress");
        assert!(config.validate().is_err());
    }

    #[test]
    fn settings_canonicalize_temp_path() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            temp_path: dir.path().join("."),
            timeout_secs: 0,
            ..Config::default()
        };
        assert_eq!(config.settings().temp_dir, dir.path().canonicalize().unwrap());
        assert!(config.timeout().is_none());
    }
}
