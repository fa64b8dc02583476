//! Persisted checkpoint records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::schema::ModeOutput;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Active,
    Complete,
    Failed,
    Canceled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeStatus {
    Pending,
    Running,
    Done,
    Error,
}

/// Run-level record stored as `_meta.json`. Its id lists are the
/// authoritative completed/pending/error partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub session_name: String,
    pub question: String,
    pub run_id: String,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub context_hash: String,
    #[serde(default)]
    pub completed_ids: Vec<String>,
    #[serde(default)]
    pub pending_ids: Vec<String>,
    #[serde(default)]
    pub error_ids: Vec<String>,
    pub total_modes: usize,
}

impl CheckpointMetadata {
    /// Active run with every mode pending.
    pub fn new(
        run_id: &str,
        session_name: &str,
        question: &str,
        mode_ids: &[String],
        context_hash: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_name: session_name.to_string(),
            question: question.to_string(),
            run_id: run_id.to_string(),
            status: RunStatus::Active,
            created_at: now,
            updated_at: now,
            context_hash: context_hash.to_string(),
            completed_ids: Vec::new(),
            pending_ids: mode_ids.to_vec(),
            error_ids: Vec::new(),
            total_modes: mode_ids.len(),
        }
    }

    /// Whether `mode_id` belongs to this run.
    pub fn has_mode(&self, mode_id: &str) -> bool {
        self.pending_ids
            .iter()
            .chain(&self.completed_ids)
            .chain(&self.error_ids)
            .any(|id| id == mode_id)
    }

    /// Move `mode_id` into the list matching `status`. Returns false and
    /// leaves the lists untouched when the mode is not part of the run.
    pub fn set_mode_status(&mut self, mode_id: &str, status: ModeStatus) -> bool {
        if !self.has_mode(mode_id) {
            return false;
        }
        self.completed_ids.retain(|id| id != mode_id);
        self.pending_ids.retain(|id| id != mode_id);
        self.error_ids.retain(|id| id != mode_id);
        let target = match status {
            ModeStatus::Pending | ModeStatus::Running => &mut self.pending_ids,
            ModeStatus::Done => &mut self.completed_ids,
            ModeStatus::Error => &mut self.error_ids,
        };
        target.push(mode_id.to_string());
        true
    }

    pub fn is_resumable(&self) -> bool {
        !self.pending_ids.is_empty() || !self.error_ids.is_empty()
    }

    /// Timestamp used for age-based cleanup: `updated_at`, or `created_at`
    /// when `updated_at` was never set.
    pub fn last_activity(&self) -> DateTime<Utc> {
        if self.updated_at.timestamp() == 0 {
            self.created_at
        } else {
            self.updated_at
        }
    }
}

/// Per-mode record stored as `<mode_id>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeCheckpoint {
    pub mode_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<ModeOutput>,
    pub status: ModeStatus,
    pub captured_at: DateTime<Utc>,
    pub context_hash: String,
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ModeCheckpoint {
    pub fn done(output: ModeOutput, context_hash: &str, tokens_used: u64) -> Self {
        Self {
            mode_id: output.mode_id.clone(),
            output: Some(output),
            status: ModeStatus::Done,
            captured_at: Utc::now(),
            context_hash: context_hash.to_string(),
            tokens_used,
            error: None,
        }
    }

    pub fn failed(mode_id: &str, context_hash: &str, error: &str) -> Self {
        Self {
            mode_id: mode_id.to_string(),
            output: None,
            status: ModeStatus::Error,
            captured_at: Utc::now(),
            context_hash: context_hash.to_string(),
            tokens_used: 0,
            error: Some(error.to_string()),
        }
    }
}

/// Streaming watermark stored as `synthesis.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisCheckpoint {
    pub run_id: String,
    pub session_name: String,
    pub last_emitted_index: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One entry of [`CheckpointStore::list_runs`](super::CheckpointStore::list_runs).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<CheckpointMetadata>,
}

/// Everything needed to continue an interrupted run.
#[derive(Debug, Clone, PartialEq)]
pub struct ResumeState {
    pub metadata: CheckpointMetadata,
    /// Outputs of completed modes, in completion order.
    pub completed: Vec<ModeOutput>,
    pub synthesis: Option<SynthesisCheckpoint>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn modes() -> Vec<String> {
        vec!["mode-1".to_string(), "mode-2".to_string()]
    }

    #[test]
    fn test_set_mode_status_moves_between_lists() {
        let mut meta = CheckpointMetadata::new("r1", "s", "q", &modes(), "hash");
        assert!(meta.is_resumable());
        meta.set_mode_status("mode-1", ModeStatus::Done);
        meta.set_mode_status("mode-2", ModeStatus::Error);
        assert_eq!(meta.completed_ids, vec!["mode-1"]);
        assert_eq!(meta.error_ids, vec!["mode-2"]);
        assert!(meta.pending_ids.is_empty());
        assert!(meta.is_resumable());
        meta.set_mode_status("mode-2", ModeStatus::Done);
        assert!(!meta.is_resumable());
    }

    #[test]
    fn test_set_mode_status_ignores_unknown_mode() {
        let mut meta = CheckpointMetadata::new("r1", "s", "q", &modes(), "hash");
        assert!(!meta.set_mode_status("mode-9", ModeStatus::Done));
        assert!(meta.completed_ids.is_empty());
        assert_eq!(meta.pending_ids, modes());
        assert!(!meta.has_mode("mode-9"));
        assert!(meta.set_mode_status("mode-1", ModeStatus::Running));
        assert_eq!(meta.pending_ids.len(), 2);
    }

    #[test]
    fn test_last_activity_falls_back_to_created() {
        let mut meta = CheckpointMetadata::new("r1", "s", "q", &modes(), "hash");
        meta.updated_at = DateTime::<Utc>::default();
        assert_eq!(meta.last_activity(), meta.created_at);
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_string(&RunStatus::Canceled).unwrap(), "\"canceled\"");
        assert_eq!(serde_json::to_string(&ModeStatus::Done).unwrap(), "\"done\"");
    }
}
