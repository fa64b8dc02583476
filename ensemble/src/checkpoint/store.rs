//! Filesystem-backed checkpoint store.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::types::*;
use super::{CheckpointError, CheckpointResult};
use crate::fsutil;
use crate::schema::ModeOutput;

/// Directory created under the base path.
pub const CHECKPOINT_DIR: &str = "ensemble-checkpoints";
pub const META_FILE: &str = "_meta.json";
pub const SYNTHESIS_FILE: &str = "synthesis.json";

/// Shared reference to CheckpointStore
pub type SharedCheckpointStore = Arc<CheckpointStore>;

/// Per-run JSON files with atomic replacement. Metadata read-modify-write
/// cycles are serialized by an internal lock.
#[derive(Debug)]
pub struct CheckpointStore {
    root: PathBuf,
    meta_lock: Mutex<()>,
}

impl CheckpointStore {
    /// Store rooted at `<base>/ensemble-checkpoints`. Nothing is created
    /// until the first write.
    pub fn new(base: impl AsRef<Path>) -> Self {
        Self {
            root: base.as_ref().join(CHECKPOINT_DIR),
            meta_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run_dir(&self, run_id: &str) -> CheckpointResult<PathBuf> {
        fsutil::validate_component(run_id)
            .map_err(|e| CheckpointError::InvalidArgument(format!("run_id {}", e)))?;
        Ok(self.root.join(run_id))
    }

    fn mode_path(&self, run_id: &str, mode_id: &str) -> CheckpointResult<PathBuf> {
        fsutil::validate_component(mode_id)
            .map_err(|e| CheckpointError::InvalidArgument(format!("mode_id {}", e)))?;
        let file = format!("{}.json", mode_id);
        if file == META_FILE || file == SYNTHESIS_FILE {
            return Err(CheckpointError::InvalidArgument(format!(
                "mode_id is reserved: {}",
                mode_id
            )));
        }
        Ok(self.run_dir(run_id)?.join(file))
    }

    fn write<T: Serialize>(&self, run_id: &str, path: &Path, value: &T) -> CheckpointResult<()> {
        let dir = self.run_dir(run_id)?;
        fsutil::create_dir_all(&dir).map_err(|source| CheckpointError::Io {
            context: "create run directory",
            path: dir.clone(),
            source,
        })?;
        fsutil::write_json_atomic(path, value).map_err(|source| CheckpointError::Io {
            context: "write checkpoint",
            path: path.to_path_buf(),
            source,
        })?;
        debug!(run_id, path = %path.display(), "Checkpoint written");
        Ok(())
    }

    fn read<T: DeserializeOwned>(&self, what: &'static str, path: &Path) -> CheckpointResult<T> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CheckpointError::NotFound {
                    what,
                    path: path.to_path_buf(),
                })
            }
            Err(source) => {
                return Err(CheckpointError::Io {
                    context: "read checkpoint",
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&content).map_err(|source| CheckpointError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
    }

    // ---- metadata -------------------------------------------------------

    /// Persist metadata, stamping `updated_at`.
    pub fn save_metadata(&self, metadata: &CheckpointMetadata) -> CheckpointResult<()> {
        let mut stamped = metadata.clone();
        stamped.updated_at = Utc::now();
        let path = self.run_dir(&metadata.run_id)?.join(META_FILE);
        self.write(&metadata.run_id, &path, &stamped)
    }

    pub fn load_metadata(&self, run_id: &str) -> CheckpointResult<CheckpointMetadata> {
        let path = self.run_dir(run_id)?.join(META_FILE);
        self.read("metadata", &path)
    }

    /// Create the run directory and an all-pending metadata record.
    pub fn init_run(
        &self,
        run_id: &str,
        session_name: &str,
        question: &str,
        mode_ids: &[String],
        context_hash: &str,
    ) -> CheckpointResult<CheckpointMetadata> {
        if mode_ids.is_empty() {
            return Err(CheckpointError::InvalidArgument(
                "a run needs at least one mode".to_string(),
            ));
        }
        let metadata = CheckpointMetadata::new(run_id, session_name, question, mode_ids, context_hash);
        let _guard = self.meta_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.save_metadata(&metadata)?;
        info!(run_id, modes = mode_ids.len(), "Checkpoint run initialized");
        Ok(metadata)
    }

    /// Atomically move `mode_id` between the pending/completed/error lists.
    pub fn update_mode_status(
        &self,
        run_id: &str,
        mode_id: &str,
        status: ModeStatus,
    ) -> CheckpointResult<CheckpointMetadata> {
        if mode_id.trim().is_empty() {
            return Err(CheckpointError::InvalidArgument("mode_id must not be empty".to_string()));
        }
        let _guard = self.meta_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut metadata = self.load_metadata(run_id)?;
        if !metadata.set_mode_status(mode_id, status) {
            return Err(unknown_mode(run_id, mode_id));
        }
        self.save_metadata(&metadata)?;
        Ok(metadata)
    }

    /// Set the run-level status.
    pub fn mark_status(&self, run_id: &str, status: RunStatus) -> CheckpointResult<()> {
        let _guard = self.meta_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut metadata = self.load_metadata(run_id)?;
        metadata.status = status;
        self.save_metadata(&metadata)
    }

    // ---- per-mode -------------------------------------------------------

    pub fn save_mode(&self, run_id: &str, checkpoint: &ModeCheckpoint) -> CheckpointResult<()> {
        let path = self.mode_path(run_id, &checkpoint.mode_id)?;
        self.write(run_id, &path, checkpoint)
    }

    pub fn load_mode(&self, run_id: &str, mode_id: &str) -> CheckpointResult<ModeCheckpoint> {
        let path = self.mode_path(run_id, mode_id)?;
        self.read("mode checkpoint", &path)
    }

    /// Persist a finished mode and mark it completed.
    pub fn record_output(
        &self,
        run_id: &str,
        output: &ModeOutput,
        tokens_used: u64,
    ) -> CheckpointResult<()> {
        let metadata = self.load_metadata(run_id)?;
        if !metadata.has_mode(&output.mode_id) {
            return Err(unknown_mode(run_id, &output.mode_id));
        }
        let checkpoint = ModeCheckpoint::done(output.clone(), &metadata.context_hash, tokens_used);
        self.save_mode(run_id, &checkpoint)?;
        self.update_mode_status(run_id, &output.mode_id, ModeStatus::Done)?;
        Ok(())
    }

    /// Persist a failed mode and move it to the error list.
    pub fn record_error(&self, run_id: &str, mode_id: &str, error: &str) -> CheckpointResult<()> {
        let metadata = self.load_metadata(run_id)?;
        if !metadata.has_mode(mode_id) {
            return Err(unknown_mode(run_id, mode_id));
        }
        self.save_mode(run_id, &ModeCheckpoint::failed(mode_id, &metadata.context_hash, error))?;
        self.update_mode_status(run_id, mode_id, ModeStatus::Error)?;
        warn!(run_id, mode_id, error, "Mode recorded as failed");
        Ok(())
    }

    /// Every per-mode checkpoint in the run, sorted by mode id.
    pub fn load_all_mode_checkpoints(&self, run_id: &str) -> CheckpointResult<Vec<ModeCheckpoint>> {
        let dir = self.run_dir(run_id)?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CheckpointError::NotFound { what: "run", path: dir })
            }
            Err(source) => {
                return Err(CheckpointError::Io {
                    context: "list run directory",
                    path: dir,
                    source,
                })
            }
        };

        let mut checkpoints = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.')
                || !name.ends_with(".json")
                || name == META_FILE
                || name == SYNTHESIS_FILE
            {
                continue;
            }
            match self.read::<ModeCheckpoint>("mode checkpoint", &entry.path()) {
                Ok(checkpoint) => checkpoints.push(checkpoint),
                Err(e) => warn!(run_id, file = %name, error = %e, "Skipping unreadable mode checkpoint"),
            }
        }
        checkpoints.sort_by(|a, b| a.mode_id.cmp(&b.mode_id));
        Ok(checkpoints)
    }

    // ---- synthesis ------------------------------------------------------

    pub fn save_synthesis(&self, checkpoint: &SynthesisCheckpoint) -> CheckpointResult<()> {
        let mut stamped = checkpoint.clone();
        stamped.updated_at = Utc::now();
        let path = self.run_dir(&checkpoint.run_id)?.join(SYNTHESIS_FILE);
        self.write(&checkpoint.run_id, &path, &stamped)
    }

    pub fn load_synthesis(&self, run_id: &str) -> CheckpointResult<SynthesisCheckpoint> {
        let path = self.run_dir(run_id)?.join(SYNTHESIS_FILE);
        self.read("synthesis checkpoint", &path)
    }

    // ---- resume ---------------------------------------------------------

    pub fn is_resumable(&self, run_id: &str) -> CheckpointResult<bool> {
        Ok(self.load_metadata(run_id)?.is_resumable())
    }

    /// Metadata plus the outputs of every completed mode.
    pub fn get_resume_state(&self, run_id: &str) -> CheckpointResult<ResumeState> {
        let metadata = self.load_metadata(run_id)?;
        let mut completed = Vec::with_capacity(metadata.completed_ids.len());
        for mode_id in &metadata.completed_ids {
            match self.load_mode(run_id, mode_id) {
                Ok(ModeCheckpoint {
                    output: Some(output),
                    ..
                }) => completed.push(output),
                Ok(_) => warn!(run_id, mode_id = %mode_id, "Completed mode has no output"),
                Err(e) if e.is_not_found() => {
                    warn!(run_id, mode_id = %mode_id, "Completed mode checkpoint missing")
                }
                Err(e) => return Err(e),
            }
        }
        let synthesis = match self.load_synthesis(run_id) {
            Ok(checkpoint) => Some(checkpoint),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };
        debug!(
            run_id,
            completed = completed.len(),
            pending = metadata.pending_ids.len(),
            "Loaded resume state"
        );
        Ok(ResumeState {
            metadata,
            completed,
            synthesis,
        })
    }

    // ---- listing and cleanup --------------------------------------------

    /// Every run, newest first. Runs without metadata fall back to the
    /// directory mtime.
    pub fn list_runs(&self) -> CheckpointResult<Vec<RunInfo>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(CheckpointError::Io {
                    context: "list checkpoint root",
                    path: self.root.clone(),
                    source,
                })
            }
        };

        let mut runs = Vec::new();
        for entry in entries.flatten() {
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let run_id = entry.file_name().to_string_lossy().to_string();
            match self.load_metadata(&run_id) {
                Ok(metadata) => runs.push(RunInfo {
                    run_id,
                    created_at: metadata.created_at,
                    updated_at: metadata.last_activity(),
                    metadata: Some(metadata),
                }),
                Err(e) => {
                    if !e.is_not_found() {
                        warn!(run_id = %run_id, error = %e, "Unreadable run metadata");
                    }
                    let mtime = entry
                        .metadata()
                        .and_then(|m| m.modified())
                        .map(DateTime::<Utc>::from)
                        .unwrap_or_default();
                    runs.push(RunInfo {
                        run_id,
                        created_at: mtime,
                        updated_at: mtime,
                        metadata: None,
                    });
                }
            }
        }
        runs.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.run_id.cmp(&b.run_id))
        });
        Ok(runs)
    }

    pub fn delete_run(&self, run_id: &str) -> CheckpointResult<()> {
        let dir = self.run_dir(run_id)?;
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(CheckpointError::NotFound { what: "run", path: dir })
            }
            Err(source) => Err(CheckpointError::Io {
                context: "delete run",
                path: dir,
                source,
            }),
        }
    }

    /// Delete runs idle for longer than `age`. Returns the removed run ids.
    pub fn clean_old(&self, age: Duration) -> CheckpointResult<Vec<String>> {
        self.clean_older_than(Utc::now() - age)
    }

    /// Delete runs whose last activity is strictly before `cutoff`.
    pub fn clean_older_than(&self, cutoff: DateTime<Utc>) -> CheckpointResult<Vec<String>> {
        let mut removed = Vec::new();
        for run in self.list_runs()? {
            if run.updated_at < cutoff {
                self.delete_run(&run.run_id)?;
                removed.push(run.run_id);
            }
        }
        if !removed.is_empty() {
            info!(count = removed.len(), cutoff = %cutoff, "Removed old checkpoint runs");
        }
        Ok(removed)
    }
}

fn unknown_mode(run_id: &str, mode_id: &str) -> CheckpointError {
    warn!(run_id, mode_id, "Rejected status update for mode outside the run");
    CheckpointError::InvalidArgument(format!("mode {} is not part of run {}", mode_id, run_id))
}
