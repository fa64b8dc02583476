//! Aggregated ensemble configuration.
//!
//! Loaded from TOML, then optionally overridden by `ENSEMBLE_*` environment
//! variables. Every section falls back to its defaults when omitted.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::checkpoint::CHECKPOINT_DIR;
use crate::context_pack::CacheConfig;
use crate::contribution::ContributionWeights;
use crate::error::ErrorKind;
use crate::estimate::EstimateBudget;
use crate::merger::MergeConfig;
use crate::observability::EarlyStopConfig;
use crate::synthesis::SynthesisConfig;

pub const ENV_CHECKPOINT_DIR: &str = "ENSEMBLE_CHECKPOINT_DIR";
pub const ENV_CACHE_DIR: &str = "ENSEMBLE_CACHE_DIR";
pub const ENV_DEDUP_THRESHOLD: &str = "ENSEMBLE_DEDUP_THRESHOLD";
pub const ENV_MIN_CONFIDENCE: &str = "ENSEMBLE_MIN_CONFIDENCE";
pub const ENV_EARLY_STOP: &str = "ENSEMBLE_EARLY_STOP";
pub const ENV_TOTAL_BUDGET: &str = "ENSEMBLE_TOTAL_BUDGET";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { source, .. } if source.kind() == io::ErrorKind::NotFound => ErrorKind::NotFound,
            Self::Io { .. } => ErrorKind::Io,
            Self::Parse(_) => ErrorKind::Parse,
            Self::Invalid(_) => ErrorKind::Invalid,
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    /// Parent of the `ensemble-checkpoints` directory.
    pub checkpoint_dir: PathBuf,
    /// Context pack cache directory.
    pub cache_dir: PathBuf,
    pub merge: MergeConfig,
    pub synthesis: SynthesisConfig,
    pub early_stop: EarlyStopConfig,
    pub budget: EstimateBudget,
    pub contribution_weights: ContributionWeights,
    pub cache: CacheConfig,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: PathBuf::from("."),
            cache_dir: std::env::temp_dir().join("ensemble-context-cache"),
            merge: MergeConfig::default(),
            synthesis: SynthesisConfig::default(),
            early_stop: EarlyStopConfig::default(),
            budget: EstimateBudget::default(),
            contribution_weights: ContributionWeights::default(),
            cache: CacheConfig::default(),
        }
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

impl EnsembleConfig {
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Read and parse a TOML file, then validate it.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        let issues = config.validate();
        if !issues.is_empty() {
            return Err(ConfigError::Invalid(issues));
        }
        debug!(path = %path.display(), "Loaded ensemble config");
        Ok(config)
    }

    /// Defaults with `ENSEMBLE_*` environment overrides applied.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`. Unparseable values are logged and skipped.
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(dir) = lookup(ENV_CHECKPOINT_DIR).filter(|v| !v.trim().is_empty()) {
            self.checkpoint_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup(ENV_CACHE_DIR).filter(|v| !v.trim().is_empty()) {
            self.cache_dir = PathBuf::from(dir);
        }
        if let Some(v) = lookup(ENV_DEDUP_THRESHOLD) {
            match v.trim().parse() {
                Ok(threshold) => self.merge.dedup_threshold = threshold,
                Err(_) => warn!(var = ENV_DEDUP_THRESHOLD, value = %v, "Ignoring unparseable override"),
            }
        }
        if let Some(v) = lookup(ENV_MIN_CONFIDENCE) {
            match v.trim().parse::<f64>() {
                Ok(min) => {
                    self.merge.min_confidence = min;
                    self.synthesis.min_confidence = min;
                }
                Err(_) => warn!(var = ENV_MIN_CONFIDENCE, value = %v, "Ignoring unparseable override"),
            }
        }
        if let Some(v) = lookup(ENV_EARLY_STOP) {
            self.early_stop.enabled = parse_bool(&v);
        }
        if let Some(v) = lookup(ENV_TOTAL_BUDGET) {
            match v.trim().parse() {
                Ok(total) => self.budget.total = total,
                Err(_) => warn!(var = ENV_TOTAL_BUDGET, value = %v, "Ignoring unparseable override"),
            }
        }
        self
    }

    /// Human-readable issues across every section; empty when usable.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = self.merge.validate();
        if !(0.0..=1.0).contains(&self.synthesis.min_confidence) {
            issues.push(format!(
                "synthesis.min_confidence must be in [0, 1], got {}",
                self.synthesis.min_confidence
            ));
        }
        if self.synthesis.max_findings == 0 {
            issues.push("synthesis.max_findings must be greater than zero".to_string());
        }
        issues.extend(self.early_stop.validate());
        if let Err(e) = self.budget.validate() {
            issues.push(format!("budget: {}", e));
        }
        issues.extend(self.contribution_weights.validate());
        if self.cache.max_entries == 0 {
            issues.push("cache.max_entries must be greater than zero".to_string());
        }
        issues
    }

    /// Root of the on-disk checkpoint layout.
    pub fn checkpoint_root(&self) -> PathBuf {
        self.checkpoint_dir.join(CHECKPOINT_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        assert!(EnsembleConfig::default().validate().is_empty());
    }

    #[test]
    fn test_partial_toml() {
        let config = EnsembleConfig::from_toml_str(
            r#"
checkpoint_dir = "/var/ensemble"

[merge]
dedup_threshold = 0.6
max_findings = 10

[early_stop]
window_size = 5
"#,
        )
        .unwrap();
        assert_eq!(config.merge.dedup_threshold, 0.6);
        assert_eq!(config.merge.max_findings, 10);
        assert_eq!(config.merge.max_risks, 10);
        assert_eq!(config.early_stop.window_size, 5);
        assert!(config.early_stop.enabled);
        assert_eq!(config.checkpoint_root(), PathBuf::from("/var/ensemble/ensemble-checkpoints"));
    }

    #[test]
    fn test_load_rejects_invalid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ensemble.toml");
        std::fs::write(&path, "[contribution_weights]\nfindings = 0.9\n").unwrap();
        let err = EnsembleConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert_eq!(err.kind(), ErrorKind::Invalid);

        let missing = EnsembleConfig::load(&dir.path().join("missing.toml")).unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_parse_error_kind() {
        let err = EnsembleConfig::from_toml_str("merge = [").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_CHECKPOINT_DIR, "/tmp/ck"),
            (ENV_DEDUP_THRESHOLD, "0.55"),
            (ENV_MIN_CONFIDENCE, "0.4"),
            (ENV_EARLY_STOP, "off"),
            (ENV_TOTAL_BUDGET, "not-a-number"),
        ]);
        let config = EnsembleConfig::default().with_env_overrides(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.checkpoint_dir, PathBuf::from("/tmp/ck"));
        assert_eq!(config.merge.dedup_threshold, 0.55);
        assert_eq!(config.synthesis.min_confidence, 0.4);
        assert!(!config.early_stop.enabled);
        assert_eq!(config.budget.total, EstimateBudget::default().total);
    }
}
