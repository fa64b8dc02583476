//! Streaming synthesis over a bounded channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Fusion, SynthesisError, SynthesisInput, Synthesizer};
use crate::checkpoint::SynthesisCheckpoint;

/// Capacity of the chunk channel.
pub const DEFAULT_STREAM_CAPACITY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    Status,
    Finding,
    Risk,
    Recommendation,
    Question,
    Explanation,
    Complete,
}

/// One streamed unit. `index` is 1-based and contiguous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisChunk {
    #[serde(rename = "type")]
    pub chunk_type: ChunkType,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode_id: Option<String>,
    pub index: u64,
    pub timestamp: DateTime<Utc>,
}

/// Receiving side of a running synthesis stream.
///
/// `chunks` closes when the producer finishes or stops. A stop for any
/// reason other than normal completion is reported on `errors`.
#[derive(Debug)]
pub struct SynthesisStream {
    pub chunks: mpsc::Receiver<SynthesisChunk>,
    pub errors: mpsc::Receiver<SynthesisError>,
    handle: JoinHandle<()>,
}

impl SynthesisStream {
    /// Drain both channels to completion.
    pub async fn collect(mut self) -> (Vec<SynthesisChunk>, Vec<SynthesisError>) {
        let mut chunks = Vec::new();
        while let Some(chunk) = self.chunks.recv().await {
            chunks.push(chunk);
        }
        let mut errors = Vec::new();
        while let Some(err) = self.errors.recv().await {
            errors.push(err);
        }
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Synthesis producer task failed");
        }
        (chunks, errors)
    }
}

struct Emitter {
    tx: mpsc::Sender<SynthesisChunk>,
    cancel: CancellationToken,
    next_index: u64,
}

impl Emitter {
    async fn emit(
        &mut self,
        chunk_type: ChunkType,
        content: String,
        mode_id: Option<String>,
    ) -> Result<(), SynthesisError> {
        if self.cancel.is_cancelled() {
            return Err(SynthesisError::Cancelled);
        }
        let chunk = SynthesisChunk {
            chunk_type,
            content,
            mode_id,
            index: self.next_index,
            timestamp: Utc::now(),
        };
        let sent = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SynthesisError::Cancelled),
            res = self.tx.send(chunk) => res.map_err(|_| SynthesisError::ChannelClosed),
        };
        sent?;
        self.next_index += 1;
        Ok(())
    }

    async fn emit_json<T: Serialize>(
        &mut self,
        chunk_type: ChunkType,
        value: &T,
        mode_id: Option<String>,
    ) -> Result<(), SynthesisError> {
        let content =
            serde_json::to_string(value).map_err(|e| SynthesisError::Encode(e.to_string()))?;
        self.emit(chunk_type, content, mode_id).await
    }
}

impl Synthesizer {
    /// Run synthesis on a background task, streaming chunks in order:
    /// `started`, `merged`, findings, risks, recommendations, questions, the
    /// optional explanation, then `complete`.
    ///
    /// The token is checked before every send. On cancellation the chunk
    /// channel closes and [`SynthesisError::Cancelled`] is published on the
    /// error channel.
    pub fn stream(&self, input: SynthesisInput, cancel: CancellationToken) -> SynthesisStream {
        self.stream_with_capacity(input, cancel, DEFAULT_STREAM_CAPACITY)
    }

    pub fn stream_with_capacity(
        &self,
        input: SynthesisInput,
        cancel: CancellationToken,
        capacity: usize,
    ) -> SynthesisStream {
        let (tx, chunks) = mpsc::channel(capacity.max(1));
        let (err_tx, errors) = mpsc::channel(1);
        let synthesizer = self.clone();

        let handle = tokio::spawn(async move {
            let mut emitter = Emitter {
                tx,
                cancel,
                next_index: 1,
            };
            match produce(&synthesizer, &input, &mut emitter).await {
                Ok(()) => info!(chunks = emitter.next_index - 1, "Synthesis stream complete"),
                Err(e) => {
                    debug!(error = %e, emitted = emitter.next_index - 1, "Synthesis stream stopped");
                    drop(emitter);
                    let _ = err_tx.send(e).await;
                }
            }
        });

        SynthesisStream {
            chunks,
            errors,
            handle,
        }
    }
}

async fn produce(
    synthesizer: &Synthesizer,
    input: &SynthesisInput,
    emitter: &mut Emitter,
) -> Result<(), SynthesisError> {
    emitter.emit(ChunkType::Status, "started".to_string(), None).await?;

    let Fusion { result, merged } = synthesizer.fuse(input)?;
    emitter
        .emit(
            ChunkType::Status,
            format!(
                "merged {} findings from {} modes",
                merged.findings.len(),
                merged.source_modes.len()
            ),
            None,
        )
        .await?;

    for finding in &merged.findings {
        let mode = finding.source_modes.first().cloned();
        emitter.emit_json(ChunkType::Finding, &finding.finding, mode).await?;
    }
    for risk in &merged.risks {
        let mode = risk.source_modes.first().cloned();
        emitter.emit_json(ChunkType::Risk, &risk.risk, mode).await?;
    }
    for rec in &merged.recommendations {
        let mode = rec.source_modes.first().cloned();
        emitter
            .emit_json(ChunkType::Recommendation, &rec.recommendation, mode)
            .await?;
    }
    for question in &result.questions_for_user {
        emitter.emit(ChunkType::Question, question.clone(), None).await?;
    }
    if let Some(explanation) = &result.explanation {
        emitter.emit_json(ChunkType::Explanation, explanation, None).await?;
    }
    emitter
        .emit(ChunkType::Complete, result.thesis.clone(), result.thesis_mode.clone())
        .await
}

/// Monotonic watermark for replaying a stream after a crash.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResumeCursor {
    last_emitted_index: u64,
}

impl ResumeCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_checkpoint(checkpoint: &SynthesisCheckpoint) -> Self {
        Self {
            last_emitted_index: checkpoint.last_emitted_index,
        }
    }

    pub fn last_emitted_index(&self) -> u64 {
        self.last_emitted_index
    }

    /// False for chunks at or below the watermark; otherwise advances it.
    pub fn accept(&mut self, chunk: &SynthesisChunk) -> bool {
        if chunk.index <= self.last_emitted_index {
            return false;
        }
        self.last_emitted_index = chunk.index;
        true
    }

    pub fn to_checkpoint(&self, run_id: &str, session_name: &str) -> SynthesisCheckpoint {
        let now = Utc::now();
        SynthesisCheckpoint {
            run_id: run_id.to_string(),
            session_name: session_name.to_string(),
            last_emitted_index: self.last_emitted_index,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Confidence, Finding, ImpactLevel, ModeOutput, Recommendation, Risk};

    fn conf(v: f64) -> Confidence {
        Confidence::new(v).unwrap()
    }

    fn input() -> SynthesisInput {
        let a = ModeOutput::new("a", "thesis a", conf(0.7))
            .with_finding(Finding::new("first finding here", ImpactLevel::High, conf(0.9)))
            .with_finding(Finding::new("second distinct item", ImpactLevel::Low, conf(0.8)))
            .with_risk(Risk::new("deploy outage", ImpactLevel::High, conf(0.4)))
            .with_recommendation(Recommendation::new("Add canary stage", ImpactLevel::Medium))
            .with_question("Who approves?");
        let b = ModeOutput::new("b", "thesis b", conf(0.6))
            .with_finding(Finding::new("unrelated observation", ImpactLevel::Medium, conf(0.7)));
        SynthesisInput::new("q", vec![a, b])
    }

    #[tokio::test]
    async fn test_stream_order_and_indices() {
        let stream = Synthesizer::default().stream(input(), CancellationToken::new());
        let (chunks, errors) = stream.collect().await;
        assert!(errors.is_empty());

        let types: Vec<ChunkType> = chunks.iter().map(|c| c.chunk_type).collect();
        assert_eq!(
            types,
            vec![
                ChunkType::Status,
                ChunkType::Status,
                ChunkType::Finding,
                ChunkType::Finding,
                ChunkType::Finding,
                ChunkType::Risk,
                ChunkType::Recommendation,
                ChunkType::Question,
                ChunkType::Explanation,
                ChunkType::Complete,
            ]
        );
        assert_eq!(chunks[0].content, "started");
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i as u64 + 1);
        }
        assert_eq!(chunks.last().unwrap().content, "thesis a");
    }

    #[tokio::test]
    async fn test_stream_cancel_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (chunks, errors) = Synthesizer::default().stream(input(), cancel).collect().await;
        assert!(chunks.is_empty());
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], SynthesisError::Cancelled));
    }

    #[tokio::test]
    async fn test_stream_cancel_mid_stream_keeps_prefix() {
        let cancel = CancellationToken::new();
        let mut stream = Synthesizer::default().stream_with_capacity(input(), cancel.clone(), 1);
        let first = stream.chunks.recv().await.unwrap();
        assert_eq!(first.index, 1);
        cancel.cancel();

        let mut seen = vec![first];
        while let Some(chunk) = stream.chunks.recv().await {
            seen.push(chunk);
        }
        for (i, chunk) in seen.iter().enumerate() {
            assert_eq!(chunk.index, i as u64 + 1);
        }
        assert!(seen.iter().all(|c| c.chunk_type != ChunkType::Complete));
        let err = stream.errors.recv().await.unwrap();
        assert!(matches!(err, SynthesisError::Cancelled));
    }

    #[tokio::test]
    async fn test_stream_reports_empty_input() {
        let (chunks, errors) = Synthesizer::default()
            .stream(SynthesisInput::new("q", vec![]), CancellationToken::new())
            .collect()
            .await;
        assert_eq!(chunks.len(), 1);
        assert!(matches!(errors[0], SynthesisError::NoOutputs));
    }

    #[test]
    fn test_resume_cursor_skips_seen() {
        let now = Utc::now();
        let checkpoint = SynthesisCheckpoint {
            run_id: "r".into(),
            session_name: "s".into(),
            last_emitted_index: 2,
            error: None,
            created_at: now,
            updated_at: now,
        };
        let mut cursor = ResumeCursor::from_checkpoint(&checkpoint);
        let chunk = |index| SynthesisChunk {
            chunk_type: ChunkType::Finding,
            content: String::new(),
            mode_id: None,
            index,
            timestamp: now,
        };
        assert!(!cursor.accept(&chunk(1)));
        assert!(!cursor.accept(&chunk(2)));
        assert!(cursor.accept(&chunk(3)));
        assert!(!cursor.accept(&chunk(3)));
        assert_eq!(cursor.to_checkpoint("r", "s").last_emitted_index, 3);
    }

    #[test]
    fn test_chunk_wire_form() {
        let chunk = SynthesisChunk {
            chunk_type: ChunkType::Status,
            content: "started".into(),
            mode_id: None,
            index: 1,
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&chunk).unwrap();
        assert_eq!(value["type"], "status");
        assert!(value.get("mode_id").is_none());
    }
}
