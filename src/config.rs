use crate::catalog::Catalog;
use crate::coerce::{Coercer, TruncationPolicy};
use crate::decompose::{BatchDriver, Decomposer};
use crate::sink::CommitMode;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for an import run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImportConfig {
    /// What to do with text longer than its column allows
    pub truncate_policy: TruncationPolicy,

    /// Log progress every N records (0 = never)
    pub progress_interval: usize,

    /// Stop once more than this many records have failed
    pub failure_tolerance: Option<usize>,

    /// Process at most this many records in total
    pub max_records: Option<usize>,

    /// Take at most this many records from each input file
    pub max_records_per_file: Option<usize>,

    /// Read at most this many input files
    pub max_files: Option<usize>,

    /// Descend into subdirectories of input directories
    pub recursive: bool,

    /// Worker threads; 1 processes records in order on the calling thread
    pub jobs: usize,

    /// Drop repeated values within one enum array
    pub dedupe_enum_values: bool,

    pub commit_mode: CommitMode,
}

impl Default for ImportConfig {
    fn default() -> Self {
        ImportConfig {
            truncate_policy: TruncationPolicy::Warn,
            progress_interval: 100,
            failure_tolerance: None,
            max_records: None,
            max_records_per_file: None,
            max_files: None,
            recursive: false,
            jobs: 1,
            dedupe_enum_values: false,
            commit_mode: CommitMode::PerRecord,
        }
    }
}

impl ImportConfig {
    /// Load a config from a JSON file; missing keys take their defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn coercer(&self) -> Coercer {
        Coercer::new(self.truncate_policy)
    }

    pub fn decomposer<'c>(&self, catalog: &'c Catalog) -> Decomposer<'c> {
        Decomposer::new(catalog, self.coercer()).with_enum_dedupe(self.dedupe_enum_values)
    }

    pub fn batch_driver<'c>(&self, catalog: &'c Catalog) -> BatchDriver<'c> {
        BatchDriver::new(self.decomposer(catalog))
            .with_progress_interval(self.progress_interval)
            .with_max_records(self.max_records)
            .with_failure_tolerance(self.failure_tolerance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("import.json");
        std::fs::write(
            &path,
            r#"{"truncate_policy": "both", "jobs": 4, "commit_mode": "per_batch", "failure_tolerance": 10,
               "max_records_per_file": 50}"#,
        )
        .unwrap();

        let config = ImportConfig::from_json_file(&path).unwrap();
        assert_eq!(config.truncate_policy, TruncationPolicy::Both);
        assert_eq!(config.jobs, 4);
        assert_eq!(config.commit_mode, CommitMode::PerBatch);
        assert_eq!(config.failure_tolerance, Some(10));
        assert_eq!(config.max_records_per_file, Some(50));
        assert_eq!(config.max_records, None);
        assert_eq!(config.progress_interval, 100);
        assert!(!config.recursive);
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("import.json");
        std::fs::write(&path, r#"{"truncate": "both"}"#).unwrap();
        assert!(ImportConfig::from_json_file(&path).is_err());
    }
}
