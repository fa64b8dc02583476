//! Context pack schema, content hash, and an on-disk TTL cache.
//!
//! Packs are produced elsewhere; this module only reads, hashes, and caches
//! them so repeated runs over the same project skip regeneration.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::ErrorKind;
use crate::fsutil;
use crate::similarity::short_hash;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectStructure {
    pub entry_points: Vec<String>,
    pub core_packages: Vec<String>,
    pub total_files: u64,
    pub total_lines: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitSummary {
    pub hash: String,
    pub author: String,
    pub summary: String,
    pub date: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectBrief {
    pub name: String,
    pub description: String,
    pub languages: Vec<String>,
    pub frameworks: Vec<String>,
    pub structure: ProjectStructure,
    pub recent_activity: Vec<CommitSummary>,
    pub open_issues: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserContext {
    pub problem_statement: String,
    pub focus_areas: Vec<String>,
    pub constraints: Vec<String>,
    pub stakeholders: Vec<String>,
    pub decisions: Vec<String>,
    pub history: Vec<String>,
    pub success_criteria: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextPack {
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub project_brief: ProjectBrief,
    #[serde(default)]
    pub user_context: UserContext,
    #[serde(default)]
    pub questions: Vec<String>,
    #[serde(default)]
    pub token_estimate: u32,
    #[serde(default)]
    pub hash: String,
}

impl Default for ContextPack {
    fn default() -> Self {
        Self {
            generated_at: Utc::now(),
            project_brief: ProjectBrief::default(),
            user_context: UserContext::default(),
            questions: Vec::new(),
            token_estimate: 0,
            hash: String::new(),
        }
    }
}

impl ContextPack {
    /// 16-hex SHA-256 over the pack with `hash` emptied and `generated_at`
    /// zeroed, so regenerating identical content yields the same hash.
    pub fn compute_hash(&self) -> String {
        let mut canonical = self.clone();
        canonical.hash = String::new();
        canonical.generated_at = DateTime::<Utc>::default();
        match serde_json::to_vec(&canonical) {
            Ok(bytes) => short_hash(&bytes),
            Err(_) => String::new(),
        }
    }

    pub fn with_hash(mut self) -> Self {
        self.hash = self.compute_hash();
        self
    }

    /// Whether the stored hash matches the content.
    pub fn verify_hash(&self) -> bool {
        !self.hash.is_empty() && self.hash == self.compute_hash()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            max_entries: 32,
        }
    }
}

/// Error type for the context pack cache
#[derive(Debug, thiserror::Error)]
pub enum ContextPackError {
    #[error("invalid cache key: {0}")]
    InvalidKey(String),

    #[error("{context} ({}): {source}", path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ContextPackError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidKey(_) => ErrorKind::Invalid,
            Self::Io { .. } => ErrorKind::Io,
        }
    }
}

pub type ContextPackResult<T> = Result<T, ContextPackError>;

/// Cache key for a project directory and question.
pub fn cache_key(project_dir: &str, question: &str) -> String {
    short_hash(format!("{}|{}", project_dir.trim(), question.trim()).as_bytes())
}

/// Directory of `<key>.json` packs with a TTL and an entry cap.
/// Writes and pruning are serialized by an internal mutex.
#[derive(Debug)]
pub struct ContextPackCache {
    dir: PathBuf,
    ttl: Duration,
    max_entries: usize,
    lock: Mutex<()>,
}

impl ContextPackCache {
    pub fn new(dir: impl Into<PathBuf>, config: &CacheConfig) -> Self {
        Self {
            dir: dir.into(),
            ttl: Duration::from_secs(config.ttl_secs),
            max_entries: config.max_entries,
            lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> ContextPackResult<PathBuf> {
        fsutil::validate_component(key).map_err(ContextPackError::InvalidKey)?;
        Ok(self.dir.join(format!("{}.json", key)))
    }

    fn is_stale(&self, modified: SystemTime) -> bool {
        if self.ttl.is_zero() {
            return true;
        }
        SystemTime::now()
            .duration_since(modified)
            .map(|age| age > self.ttl)
            .unwrap_or(false)
    }

    /// Fresh pack for `key`, if any. Stale or unreadable files are removed.
    pub fn get(&self, key: &str) -> ContextPackResult<Option<ContextPack>> {
        let path = self.path_for(key)?;
        let modified = match fs::metadata(&path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(key, "Context pack cache miss");
                return Ok(None);
            }
            Err(source) => {
                return Err(ContextPackError::Io {
                    context: "stat cached pack",
                    path,
                    source,
                })
            }
        };

        if self.is_stale(modified) {
            debug!(key, "Context pack cache entry expired");
            self.discard(&path);
            return Ok(None);
        }

        let content = fs::read_to_string(&path).map_err(|source| ContextPackError::Io {
            context: "read cached pack",
            path: path.clone(),
            source,
        })?;
        match serde_json::from_str::<ContextPack>(&content) {
            Ok(pack) => {
                debug!(key, "Context pack cache hit");
                Ok(Some(pack))
            }
            Err(e) => {
                debug!(key, error = %e, "Discarding corrupt cached pack");
                self.discard(&path);
                Ok(None)
            }
        }
    }

    fn discard(&self, path: &Path) {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove cached pack"),
        }
    }

    /// Store `pack` under `key`, then prune beyond the entry cap.
    pub fn put(&self, key: &str, pack: &ContextPack) -> ContextPackResult<PathBuf> {
        let path = self.path_for(key)?;
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        fsutil::create_dir_all(&self.dir).map_err(|source| ContextPackError::Io {
            context: "create cache directory",
            path: self.dir.clone(),
            source,
        })?;
        fsutil::write_json_atomic(&path, pack).map_err(|source| ContextPackError::Io {
            context: "write cached pack",
            path: path.clone(),
            source,
        })?;
        self.prune_locked()?;
        Ok(path)
    }

    /// Remove expired entries and the oldest entries beyond the cap.
    pub fn prune(&self) -> ContextPackResult<usize> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.prune_locked()
    }

    fn prune_locked(&self) -> ContextPackResult<usize> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(source) => {
                return Err(ContextPackError::Io {
                    context: "list cache directory",
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let mut files: Vec<(SystemTime, String, PathBuf)> = entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                if name.starts_with('.') || !name.ends_with(".json") {
                    return None;
                }
                let modified = entry.metadata().and_then(|m| m.modified()).ok()?;
                Some((modified, name, entry.path()))
            })
            .collect();
        files.sort();

        let mut removed = 0;
        let mut remaining = files.len();
        for (modified, _, path) in &files {
            if remaining > self.max_entries || self.is_stale(*modified) {
                match fs::remove_file(path) {
                    Ok(()) => removed += 1,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Failed to prune cached pack")
                    }
                }
                remaining -= 1;
            }
        }
        if removed > 0 {
            info!(removed, kept = remaining, "Pruned context pack cache");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn pack(name: &str) -> ContextPack {
        ContextPack {
            project_brief: ProjectBrief {
                name: name.to_string(),
                languages: vec!["rust".to_string()],
                ..ProjectBrief::default()
            },
            questions: vec!["Is the pool safe?".to_string()],
            token_estimate: 900,
            ..ContextPack::default()
        }
    }

    #[test]
    fn test_hash_ignores_generated_at_and_hash() {
        let a = pack("svc").with_hash();
        let mut b = pack("svc");
        b.generated_at = Utc::now() + chrono::Duration::days(1);
        b.hash = "stale".to_string();
        assert_eq!(a.hash, b.compute_hash());
        assert_eq!(a.hash.len(), 16);
        assert!(a.verify_hash());
        assert_ne!(a.hash, pack("other").compute_hash());
    }

    #[test]
    fn test_cache_round_trip() {
        let dir = tempdir().unwrap();
        let cache = ContextPackCache::new(dir.path(), &CacheConfig::default());
        assert!(cache.get("k1").unwrap().is_none());
        let stored = pack("svc").with_hash();
        cache.put("k1", &stored).unwrap();
        assert_eq!(cache.get("k1").unwrap(), Some(stored));
    }

    #[test]
    fn test_zero_ttl_expires() {
        let dir = tempdir().unwrap();
        let cache = ContextPackCache::new(
            dir.path(),
            &CacheConfig {
                ttl_secs: 0,
                max_entries: 32,
            },
        );
        let key = cache_key("/repo", "q");
        cache.put(&key, &pack("svc")).unwrap();
        assert!(cache.get(&key).unwrap().is_none());
    }

    #[test]
    fn test_prune_keeps_newest() {
        let dir = tempdir().unwrap();
        let cache = ContextPackCache::new(
            dir.path(),
            &CacheConfig {
                ttl_secs: 3600,
                max_entries: 2,
            },
        );
        for key in ["a", "b", "c"] {
            cache.put(key, &pack(key)).unwrap();
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(cache.get("a").unwrap().is_none());
        assert!(cache.get("b").unwrap().is_some());
        assert!(cache.get("c").unwrap().is_some());
    }

    #[test]
    fn test_corrupt_entry_is_removed() {
        let dir = tempdir().unwrap();
        let cache = ContextPackCache::new(dir.path(), &CacheConfig::default());
        let path = cache.path_for("k1").unwrap();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{not json").unwrap();

        assert!(cache.get("k1").unwrap().is_none());
        assert!(!path.exists());
    }

    #[test]
    fn test_failed_removal_is_not_fatal() {
        let dir = tempdir().unwrap();
        let cache = ContextPackCache::new(
            dir.path(),
            &CacheConfig {
                ttl_secs: 0,
                max_entries: 32,
            },
        );
        // A directory in the entry's place cannot be removed with remove_file.
        let path = cache.path_for("k1").unwrap();
        fs::create_dir_all(&path).unwrap();

        assert!(cache.get("k1").unwrap().is_none());
        assert!(path.is_dir());
    }

    #[test]
    fn test_rejects_path_keys() {
        let dir = tempdir().unwrap();
        let cache = ContextPackCache::new(dir.path(), &CacheConfig::default());
        assert!(matches!(cache.get("../x"), Err(ContextPackError::InvalidKey(_))));
    }
}
