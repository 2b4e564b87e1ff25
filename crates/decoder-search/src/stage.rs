//! Search stage trait (C6): the capability set a worker task drives.
//!
//! Grounded in the `fwdtree`/`fwdflat`/`latgen`/`state_align` search
//! objects of the retrieved source, which the spec collapses into one
//! contract since their Viterbi internals are out of scope here. Every
//! concrete stage owns its own bptbl and scorer and, optionally, an
//! upstream/downstream arc buffer; nothing here is shared across stages
//! except through those buffers.

use decoder_bptbl::{BackPointerTable, Segment};
use decoder_foundation::error::SearchError;

/// Result of one `decode` step. `Frames(0)` signals clean end-of-stream:
/// the worker task should move on to `finish`. Cancellation is reported
/// as `Err(SearchError::Canceled)`, not as a zero count, so the worker
/// can tell "nothing left to do" from "the source was force-quit" apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Frames(u32),
}

/// A single search pass. Implementations are driven exclusively by the
/// generic worker-task host in [`crate::worker`]; nothing here spawns
/// its own thread.
pub trait SearchStage: Send {
    /// Blocks until this stage's source (feature buffer or upstream arc
    /// buffer) signals utterance start, and resets per-utterance state
    /// (bptbl, scorer counters, any owned output arc buffer).
    fn start_utt(&mut self) -> Result<(), SearchError>;

    /// Processes whatever has newly become available from this stage's
    /// source. Returns `Frames(0)` at clean end-of-utterance, a positive
    /// count while there is more to do, or `Err(Canceled)` if the source
    /// was force-quit.
    fn decode(&mut self) -> Result<StepOutcome, SearchError>;

    /// Runs once after a clean (non-canceled) `decode` loop exit:
    /// retires the bptbl, selects the best final exit, and runs a final
    /// sweep on the output arc buffer if one exists.
    fn finish(&mut self) -> Result<(), SearchError>;

    /// Latest hypothesis, partial or final, as `(text, score)`.
    fn hyp(&self) -> (String, i32);

    /// Latest segmentation, in forward (chronological) order.
    fn seg_iter(&self) -> Vec<Segment>;

    /// This stage's own back-pointer table, if it keeps one.
    fn bptbl(&self) -> Option<&BackPointerTable>;

    /// This stage's output arc buffer, if it produces one for a
    /// downstream stage. The worker-task host shuts this down
    /// unconditionally on `decode` loop exit so downstream stages never
    /// block forever on a producer that has gone away.
    fn output_arc_buffer(&self) -> Option<&decoder_arcbuf::ArcBuffer>;
}
