//! `file[:line]` evidence pointers and their proximity scale.

use serde::{Deserialize, Serialize};

/// Parsed form of an evidence pointer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EvidencePointer {
    pub file: String,
    pub line: Option<u32>,
}

impl EvidencePointer {
    /// Parse `path/to/file.rs:42` or `path/to/file.rs`.
    ///
    /// A trailing `:<digits>` is the line; anything else stays in the path.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        if let Some((file, line)) = trimmed.rsplit_once(':') {
            if let Ok(line) = line.trim().parse::<u32>() {
                if !file.trim().is_empty() {
                    return Some(Self {
                        file: file.trim().to_string(),
                        line: Some(line),
                    });
                }
            }
        }

        Some(Self {
            file: trimmed.to_string(),
            line: None,
        })
    }

    /// Proximity on the fixed scale: 1.0 equal, 0.9/0.7/0.5 same file within
    /// 5/10/20 lines, 0.3 same file further away, 0.0 different file.
    pub fn proximity(&self, other: &EvidencePointer) -> f64 {
        if self == other {
            return 1.0;
        }
        if self.file != other.file {
            return 0.0;
        }

        match (self.line, other.line) {
            (Some(a), Some(b)) => {
                let distance = a.abs_diff(b);
                if distance <= 5 {
                    0.9
                } else if distance <= 10 {
                    0.7
                } else if distance <= 20 {
                    0.5
                } else {
                    0.3
                }
            }
            _ => 0.3,
        }
    }
}

impl std::fmt::Display for EvidencePointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{}", self.file, line),
            None => write!(f, "{}", self.file),
        }
    }
}

/// Proximity between two raw pointers; unparseable pointers score 0.
pub fn evidence_proximity(a: &str, b: &str) -> f64 {
    match (EvidencePointer::parse(a), EvidencePointer::parse(b)) {
        (Some(a), Some(b)) => a.proximity(&b),
        _ => 0.0,
    }
}
