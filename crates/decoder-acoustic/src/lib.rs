//! Acoustic scorer (C3): per-consumer scoring state over a shared,
//! pluggable acoustic model.
//!
//! The actual Gaussian/neural scoring math is out of scope; the real
//! work this crate owns is the active-senone bookkeeping a search stage
//! uses to ask for exactly the distributions it needs scored, and the
//! lossy delta-compaction that keeps that request compact even when the
//! active set is sparse and spread out.
//!
//! Grounded in `acmod.c` (`acmod_clear_active`, `acmod_activate_hmm`,
//! `acmod_flags2list`) from the retrieved multisphinx source.

use decoder_features::{FeatureBuffer, Frame};
use decoder_foundation::error::ScorerError;
use decoder_syncseq::{SyncSeq, WaitTimeout};
use decoder_telemetry::PipelineMetrics;
use std::sync::Arc;
use tracing::debug;

/// Per-frame senone scores, one entry per distribution in the model.
pub type SenoneScores = Vec<i32>;

/// The pluggable scoring backend. A real implementation evaluates a GMM
/// or neural acoustic model against a feature frame; this trait is the
/// seam that keeps that out of scope here.
pub trait AcousticBackend: Send + Sync {
    /// Total number of senones (tied-state distributions) in the model.
    fn n_senones(&self) -> usize;

    /// Scores `frame` for every senone named in `active` (or every
    /// senone, if `active` is empty and the backend interprets that as
    /// "compute all"), writing into `out` which is pre-sized to
    /// `n_senones()`. Entries not requested are left untouched.
    fn score_frame(&self, frame: &Frame, active: &[usize], out: &mut SenoneScores);
}

/// Maximum value a single compacted delta entry can carry; a gap wider
/// than this is bridged with zero-weight filler entries, matching
/// `acmod_flags2list`'s `while (delta > 255)` loop exactly.
pub const MAX_DELTA: u32 = 255;

/// Active-senone bitset plus its compacted, delta-encoded active list.
#[derive(Debug, Default)]
pub struct ActiveSenones {
    flags: Vec<bool>,
    /// Encoded as consecutive `(delta, is_real)` pairs where `is_real`
    /// distinguishes a genuine active senone from a zero-weight filler
    /// inserted purely to bridge a gap wider than [`MAX_DELTA`].
    compacted: Vec<(u32, bool)>,
    compute_all: bool,
}

impl ActiveSenones {
    pub fn new(n_senones: usize) -> Self {
        Self {
            flags: vec![false; n_senones],
            compacted: Vec::new(),
            compute_all: false,
        }
    }

    /// When set, `activate_hmm`/`clear` are no-ops and `flags_to_list`
    /// reports every senone active, matching `acmod->compallsen`.
    pub fn set_compute_all(&mut self, compute_all: bool) {
        self.compute_all = compute_all;
    }

    pub fn clear(&mut self) {
        if self.compute_all {
            return;
        }
        self.flags.iter_mut().for_each(|f| *f = false);
        self.compacted.clear();
    }

    /// Marks a single senone id active. A real driver calls this once
    /// per emitting HMM state per active model (`acmod_activate_hmm`
    /// loops over up to five states per call); the per-state fan-out is
    /// the search stage's concern, not this crate's.
    pub fn activate(&mut self, senone_id: usize) {
        if self.compute_all {
            return;
        }
        if let Some(flag) = self.flags.get_mut(senone_id) {
            *flag = true;
        }
    }

    /// Compacts the bitset into a sorted delta list, caching the result,
    /// and returns the count of genuine (non-filler) active senones.
    pub fn flags_to_list(&mut self) -> usize {
        if self.compute_all {
            return self.flags.len();
        }
        self.compacted.clear();
        let mut last = 0u32;
        let mut n_active = 0usize;
        for (sen, &active) in self.flags.iter().enumerate() {
            if !active {
                continue;
            }
            let sen = sen as u32;
            let mut delta = sen - last;
            while delta > MAX_DELTA {
                self.compacted.push((MAX_DELTA, false));
                delta -= MAX_DELTA;
            }
            self.compacted.push((delta, true));
            last = sen;
            n_active += 1;
        }
        n_active
    }

    /// Expands the cached compacted list back into absolute senone ids,
    /// skipping filler entries.
    pub fn active_ids(&self) -> Vec<usize> {
        if self.compute_all {
            return (0..self.flags.len()).collect();
        }
        let mut ids = Vec::new();
        let mut acc = 0u32;
        for &(delta, is_real) in &self.compacted {
            acc += delta;
            if is_real {
                ids.push(acc as usize);
            }
        }
        ids
    }

    pub fn compacted_len(&self) -> usize {
        if self.compute_all {
            self.flags.len()
        } else {
            self.compacted.len()
        }
    }
}

/// A backend that scores nothing and reports a single senone, for stages
/// or demos that need to drive a [`Scorer`] without a real acoustic
/// model wired in. `compute_all` on the scorer's active-senone list
/// makes this work without any per-frame activation bookkeeping.
pub struct NullAcousticBackend;

impl AcousticBackend for NullAcousticBackend {
    fn n_senones(&self) -> usize {
        1
    }

    fn score_frame(&self, _frame: &Frame, active: &[usize], out: &mut SenoneScores) {
        for &id in active {
            if let Some(slot) = out.get_mut(id) {
                *slot = 0;
            }
        }
    }
}

/// One consumer's private scoring cursor over the shared feature buffer.
pub struct Scorer {
    backend: Arc<dyn AcousticBackend>,
    consumer: SyncSeq<Frame>,
    active: ActiveSenones,
    scores: SenoneScores,
    output_frame: u64,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl Scorer {
    pub fn new(backend: Arc<dyn AcousticBackend>, consumer: SyncSeq<Frame>) -> Self {
        Self::with_metrics(backend, consumer, None)
    }

    pub fn with_metrics(
        backend: Arc<dyn AcousticBackend>,
        consumer: SyncSeq<Frame>,
        metrics: Option<Arc<PipelineMetrics>>,
    ) -> Self {
        let n_senones = backend.n_senones();
        Self {
            scores: vec![0; n_senones],
            active: ActiveSenones::new(n_senones),
            backend,
            consumer,
            output_frame: 0,
            metrics,
        }
    }

    pub fn consumer_start_utt(&mut self, buffer: &FeatureBuffer) -> Result<(), ScorerError> {
        buffer.consumer_start_utt().map_err(ScorerError::from)?;
        self.output_frame = 0;
        self.active.clear();
        Ok(())
    }

    pub fn active_mut(&mut self) -> &mut ActiveSenones {
        &mut self.active
    }

    /// Waits for the next frame, scores the senones currently marked
    /// active (via [`ActiveSenones::activate`] calls made by the
    /// caller), and returns a view of this frame's scores.
    pub fn score(
        &mut self,
        buffer: &FeatureBuffer,
        timeout: WaitTimeout,
    ) -> Result<&SenoneScores, ScorerError> {
        let frame = buffer
            .consumer_wait(&self.consumer, self.output_frame, timeout)
            .map_err(ScorerError::from)?;
        let n_active = self.active.flags_to_list();
        if n_active == 0 && !self.active.compute_all {
            return Err(ScorerError::NoActiveSenones);
        }
        let active_ids = self.active.active_ids();
        self.backend.score_frame(&frame, &active_ids, &mut self.scores);
        self.output_frame += 1;
        if let Some(m) = &self.metrics {
            m.record_score(n_active);
        }
        debug!(frame = self.output_frame - 1, n_active, "scored frame");
        Ok(&self.scores)
    }

    pub fn consumer_release(&self, buffer: &FeatureBuffer, start: u64, end: Option<u64>) -> u64 {
        buffer.consumer_release(&self.consumer, start, end)
    }

    pub fn consumer_end_utt(&mut self, buffer: &FeatureBuffer, start: u64) {
        buffer.consumer_end_utt(&self.consumer, start);
    }

    pub fn output_frame(&self) -> u64 {
        self.output_frame
    }
}
