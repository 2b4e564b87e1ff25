use std::time::Duration;
use thiserror::Error;

/// Top-level error type returned across decoder-pipeline component boundaries.
///
/// Mirrors the error-kind taxonomy of the decoding core: end-of-stream and
/// cancellation are handled locally by worker tasks and never reach this
/// type; what remains are validation and resource-exhaustion failures that
/// must be inspected by the host.
#[derive(Error, Debug)]
pub enum DecoderError {
    #[error(transparent)]
    SyncSeq(#[from] SyncSeqError),

    #[error(transparent)]
    FeatureBuffer(#[from] FeatureBufferError),

    #[error(transparent)]
    Scorer(#[from] ScorerError),

    #[error(transparent)]
    Bptbl(#[from] BptblError),

    #[error(transparent)]
    ArcBuffer(#[from] ArcBufferError),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("component failed health check: {component}")]
    HealthCheckFailed { component: String },

    #[error("shutdown requested")]
    ShutdownRequested,

    #[error("fatal error, cannot recover: {0}")]
    Fatal(String),

    #[error("transient error, will retry: {0}")]
    Transient(String),
}

impl From<tokio::task::JoinError> for DecoderError {
    fn from(err: tokio::task::JoinError) -> Self {
        DecoderError::Transient(format!("worker task join failed: {err}"))
    }
}

/// Errors from the sync-sequence (C1): the append-only, refcounted shared
/// sequence of fixed-size elements underlying the feature buffer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncSeqError {
    #[error("index {idx} is out of window [{base}, {next})")]
    OutOfWindow { idx: u64, base: u64, next: u64 },

    #[error("append to finalized sequence (final_next_idx = {final_next_idx})")]
    Finalized { final_next_idx: u64 },

    #[error("sequence already finalized at {final_next_idx}")]
    AlreadyFinalized { final_next_idx: u64 },

    #[error("wait on index {idx} timed out")]
    Timeout { idx: u64 },

    #[error("end of utterance reached at index {idx} (final_next_idx = {final_next_idx})")]
    EndOfUtterance { idx: u64, final_next_idx: u64 },

    #[error("refcount would exceed the maximum of {max} consumers")]
    TooManyConsumers { max: u8 },

    #[error("reset attempted while a consumer is still waiting")]
    ResetWhileWaiting,
}

/// Errors from the feature buffer (C2).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FeatureBufferError {
    #[error(transparent)]
    SyncSeq(#[from] SyncSeqError),

    #[error("utterance canceled")]
    Canceled,

    #[error("feature dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("producer_end_utt called with no utterance started")]
    NoUtteranceStarted,
}

/// Errors from the acoustic scorer (C3).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScorerError {
    #[error(transparent)]
    FeatureBuffer(#[from] FeatureBufferError),

    #[error("end of utterance")]
    EndOfUtterance,

    #[error("no active senones to score")]
    NoActiveSenones,
}

/// Errors from the back-pointer table (C4).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BptblError {
    #[error("bp index {idx} out of range (n_ent = {n_ent})")]
    IndexOutOfRange { idx: u32, n_ent: u32 },

    #[error("no bp exits for finish word {wid}")]
    NoFinishWord { wid: i32 },

    #[error("table is empty, nothing to finalize")]
    EmptyTable,
}

/// Errors from the arc buffer (C5).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ArcBufferError {
    #[error("frame {frame} not yet committed")]
    NotCommitted { frame: i32 },

    #[error("frame {frame} already released")]
    Released { frame: i32 },

    #[error("producer has shut down")]
    ShutDown,

    #[error("end of utterance reached at frame {frame}")]
    EndOfUtterance { frame: i32 },

    #[error("wait on frame {frame} timed out")]
    Timeout { frame: i32 },
}

/// Errors from a search stage (C6).
#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    FeatureBuffer(#[from] FeatureBufferError),

    #[error(transparent)]
    ArcBuffer(#[from] ArcBufferError),

    #[error(transparent)]
    Bptbl(#[from] BptblError),

    #[error("decode canceled")]
    Canceled,

    #[error("backend error: {0}")]
    Backend(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Errors from pipeline construction and wiring (C7).
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unknown stage kind: {0}")]
    UnknownStageKind(String),

    #[error("template stage {0} not found")]
    TemplateNotFound(String),

    #[error("feature dimension {0} is invalid (must be > 0)")]
    InvalidFeatureDimension(usize),

    #[error("stage {0} already linked as a producer for this arc buffer")]
    AlreadyLinked(String),

    #[error("stage {0} has no back-pointer table to link from")]
    NoBptbl(String),

    #[error(transparent)]
    Search(#[from] SearchError),
}

#[derive(Debug, Clone)]
pub enum RecoveryStrategy {
    Retry { max_attempts: u32, delay: Duration },
    Restart,
    Ignore,
    Fatal,
}

impl DecoderError {
    pub fn recovery_strategy(&self) -> RecoveryStrategy {
        match self {
            DecoderError::SyncSeq(SyncSeqError::Timeout { .. }) => RecoveryStrategy::Retry {
                max_attempts: 3,
                delay: Duration::from_millis(50),
            },
            DecoderError::SyncSeq(SyncSeqError::EndOfUtterance { .. }) => RecoveryStrategy::Ignore,
            DecoderError::ArcBuffer(ArcBufferError::EndOfUtterance { .. }) => RecoveryStrategy::Ignore,
            DecoderError::FeatureBuffer(FeatureBufferError::Canceled) => RecoveryStrategy::Restart,
            DecoderError::Fatal(_) | DecoderError::ShutdownRequested => RecoveryStrategy::Fatal,
            _ => RecoveryStrategy::Restart,
        }
    }
}
