use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Tunables for an [`crate::ImageStore`]. Every field has a default, so a
/// config file only needs the keys it wants to change.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Log file backing the store; `None` keeps everything in memory
    pub data_path: Option<PathBuf>,
    /// true = fsync every append and clear, false = leave it to the OS buffer
    pub strict_durability: bool,
    /// Width of a timestamp-index bucket
    pub time_bucket_secs: u64,
    pub filter_expected_items: usize,
    pub filter_false_positive_rate: f64,
    /// Above this many stored bytes snapshots raise `storage_warning`
    pub storage_warning_bytes: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_path: None,
            strict_durability: true,
            time_bucket_secs: 3600,
            filter_expected_items: 100_000,
            filter_false_positive_rate: 0.01,
            storage_warning_bytes: 100 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn durable(path: impl Into<PathBuf>) -> Self {
        Self {
            data_path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| StoreError::Config(format!("{}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| StoreError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.time_bucket_secs == 0 {
            return Err(StoreError::Config("time_bucket_secs must be positive".into()));
        }
        if self.filter_expected_items == 0 {
            return Err(StoreError::Config("filter_expected_items must be positive".into()));
        }
        if !(self.filter_false_positive_rate > 0.0 && self.filter_false_positive_rate < 1.0) {
            return Err(StoreError::Config(format!(
                "filter_false_positive_rate {} outside (0, 1)",
                self.filter_false_positive_rate
            )));
        }
        Ok(())
    }
}
