//! Worker-task host: runs any [`SearchStage`] through one utterance's
//! life-cycle and reports [`StageEvent`]s.
//!
//! Per the pipeline's concurrency split, a stage's own waits are plain
//! OS-thread blocking calls (mutex + condvar, same as C1-C5); this host
//! is the seam where that blocking work is handed to
//! [`tokio::task::spawn_blocking`] so a pipeline can schedule several
//! stages on the async runtime without tying up its worker threads.

use crate::event::{EventCallback, StageEvent};
use crate::stage::{SearchStage, StepOutcome};
use decoder_foundation::error::{DecoderError, SearchError};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub struct Stage {
    utt_id: u64,
    inner: Mutex<Box<dyn SearchStage>>,
    cb: Option<EventCallback>,
}

impl Stage {
    pub fn new(utt_id: u64, stage: Box<dyn SearchStage>) -> Self {
        Self {
            utt_id,
            inner: Mutex::new(stage),
            cb: None,
        }
    }

    pub fn with_callback(utt_id: u64, stage: Box<dyn SearchStage>, cb: EventCallback) -> Self {
        Self {
            utt_id,
            inner: Mutex::new(stage),
            cb: Some(cb),
        }
    }

    /// Runs the life-cycle on the blocking pool and returns a handle the
    /// caller can `await` alongside other stages.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<Result<(), DecoderError>> {
        tokio::task::spawn_blocking(move || self.run_blocking())
    }

    fn emit(&self, event: StageEvent) {
        if let Some(cb) = &self.cb {
            cb(event);
        }
    }

    fn run_blocking(&self) -> Result<(), DecoderError> {
        let mut stage = self.inner.lock();

        if let Err(e) = stage.start_utt() {
            shutdown_output(stage.as_ref());
            return Err(e.into());
        }
        self.emit(StageEvent::Start { utt_id: self.utt_id });

        let canceled = loop {
            match stage.decode() {
                Ok(StepOutcome::Frames(0)) => break false,
                Ok(StepOutcome::Frames(_)) => {
                    let (hyp, score) = stage.hyp();
                    self.emit(StageEvent::Partial {
                        utt_id: self.utt_id,
                        hyp,
                        score,
                    });
                }
                Err(SearchError::Canceled) => break true,
                Err(e) => {
                    shutdown_output(stage.as_ref());
                    return Err(e.into());
                }
            }
        };

        if canceled {
            shutdown_output(stage.as_ref());
            return Err(SearchError::Canceled.into());
        }

        self.emit(StageEvent::End { utt_id: self.utt_id });

        if let Err(e) = stage.finish() {
            shutdown_output(stage.as_ref());
            return Err(e.into());
        }

        let (hyp, score) = stage.hyp();
        self.emit(StageEvent::Final {
            utt_id: self.utt_id,
            hyp,
            score,
        });
        shutdown_output(stage.as_ref());
        Ok(())
    }
}

/// A stage's output arc buffer is shut down unconditionally on loop
/// exit, success or cancellation, so a downstream stage blocked in
/// `consumer_wait` is never left waiting on a producer that is gone.
fn shutdown_output(stage: &dyn SearchStage) {
    if let Some(ab) = stage.output_arc_buffer() {
        ab.producer_shutdown();
    }
}
