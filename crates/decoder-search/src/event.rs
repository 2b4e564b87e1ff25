//! Events a [`crate::worker::Stage`] emits over the course of one
//! utterance, matching the life-cycle the pipeline spec names: a single
//! `Start`, zero or more `Partial`s, an `End`, then `Finish`'s `Final`.

use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum StageEvent {
    Start { utt_id: u64 },
    Partial { utt_id: u64, hyp: String, score: i32 },
    End { utt_id: u64 },
    Final { utt_id: u64, hyp: String, score: i32 },
}

/// Invoked on the worker's blocking-pool thread; keep it cheap.
pub type EventCallback = Arc<dyn Fn(StageEvent) + Send + Sync>;
