use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Shared, cross-thread counters for one decoding pipeline.
///
/// Every field is independently atomic so any stage's worker task can
/// update it without coordinating with others; there is no invariant
/// that ties fields together, they're observational only.
#[derive(Clone)]
pub struct PipelineMetrics {
    // Sync-sequence / feature buffer
    pub frames_appended: Arc<AtomicU64>,
    pub frames_released: Arc<AtomicU64>,
    pub sync_seq_base: Arc<AtomicU64>,
    pub sync_seq_next: Arc<AtomicU64>,

    // Acoustic scorer, aggregated across all consumers of a pipeline
    pub frames_scored: Arc<AtomicU64>,
    pub senones_activated: Arc<AtomicU64>,
    pub delta_overflow_count: Arc<AtomicU64>,

    // Back-pointer table
    pub bps_entered: Arc<AtomicU64>,
    pub bps_retired: Arc<AtomicU64>,
    pub gc_runs: Arc<AtomicU64>,

    // Arc buffer
    pub arcs_produced: Arc<AtomicU64>,
    pub arcs_consumed: Arc<AtomicU64>,
    pub frames_committed: Arc<AtomicU64>,

    // Search stage lifecycle
    pub stages_running: Arc<AtomicUsize>,
    pub partial_events: Arc<AtomicU64>,
    pub utterances_completed: Arc<AtomicU64>,
    pub last_final_hyp_time: Arc<RwLock<Option<Instant>>>,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self {
            frames_appended: Arc::new(AtomicU64::new(0)),
            frames_released: Arc::new(AtomicU64::new(0)),
            sync_seq_base: Arc::new(AtomicU64::new(0)),
            sync_seq_next: Arc::new(AtomicU64::new(0)),

            frames_scored: Arc::new(AtomicU64::new(0)),
            senones_activated: Arc::new(AtomicU64::new(0)),
            delta_overflow_count: Arc::new(AtomicU64::new(0)),

            bps_entered: Arc::new(AtomicU64::new(0)),
            bps_retired: Arc::new(AtomicU64::new(0)),
            gc_runs: Arc::new(AtomicU64::new(0)),

            arcs_produced: Arc::new(AtomicU64::new(0)),
            arcs_consumed: Arc::new(AtomicU64::new(0)),
            frames_committed: Arc::new(AtomicU64::new(0)),

            stages_running: Arc::new(AtomicUsize::new(0)),
            partial_events: Arc::new(AtomicU64::new(0)),
            utterances_completed: Arc::new(AtomicU64::new(0)),
            last_final_hyp_time: Arc::new(RwLock::new(None)),
        }
    }
}

impl PipelineMetrics {
    pub fn record_append(&self, next_idx: u64) {
        self.frames_appended.fetch_add(1, Ordering::Relaxed);
        self.sync_seq_next.store(next_idx, Ordering::Relaxed);
    }

    pub fn record_release(&self, count: u64, new_base: u64) {
        self.frames_released.fetch_add(count, Ordering::Relaxed);
        self.sync_seq_base.store(new_base, Ordering::Relaxed);
    }

    pub fn record_score(&self, n_senones: u64) {
        self.frames_scored.fetch_add(1, Ordering::Relaxed);
        self.senones_activated.fetch_add(n_senones, Ordering::Relaxed);
    }

    pub fn record_delta_overflow(&self) {
        self.delta_overflow_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bp_entered(&self) {
        self.bps_entered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_gc(&self, n_retired: u64) {
        self.gc_runs.fetch_add(1, Ordering::Relaxed);
        self.bps_retired.fetch_add(n_retired, Ordering::Relaxed);
    }

    pub fn record_sweep(&self, n_arcs: u64, n_committed_frames: u64) {
        self.arcs_produced.fetch_add(n_arcs, Ordering::Relaxed);
        self.frames_committed
            .fetch_add(n_committed_frames, Ordering::Relaxed);
    }

    pub fn record_arc_consumed(&self) {
        self.arcs_consumed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stage_started(&self) {
        self.stages_running.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stage_stopped(&self) {
        self.stages_running.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_partial(&self) {
        self.partial_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_final(&self) {
        self.utterances_completed.fetch_add(1, Ordering::Relaxed);
        *self.last_final_hyp_time.write() = Some(Instant::now());
    }
}
