//! Feature buffer (C2): the shared, frame-synchronized stream every
//! search stage pulls from.
//!
//! Wraps a [`decoder_syncseq::SyncSeq`] of feature frames with the
//! producer-side utterance life-cycle (`producer_start_utt`,
//! `producer_process_raw`/`producer_process_cep`, `producer_end_utt`,
//! `producer_shutdown`) and the consumer-side rendez-vous
//! (`consumer_start_utt`, `consumer_wait`, `consumer_release`,
//! `consumer_end_utt`).
//!
//! The signal-processing internals (framing, cepstra, CMN/AGC, dynamic
//! features) are out of scope per the core contract; they are exposed
//! here as the [`SignalPipeline`] trait so a real front end can be
//! plugged in without touching the buffer's concurrency model.

pub mod pipeline;

pub use pipeline::{Frame, SignalPipeline, WindowedMeanPipeline};

use decoder_foundation::error::FeatureBufferError;
use decoder_syncseq::{SyncSeq, WaitTimeout};
use decoder_telemetry::PipelineMetrics;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

struct Semaphore {
    count: Mutex<i64>,
    cv: Condvar,
}

impl Semaphore {
    fn new() -> Self {
        Self {
            count: Mutex::new(0),
            cv: Condvar::new(),
        }
    }

    fn set(&self, n: i64) {
        let mut count = self.count.lock();
        *count = n;
        self.cv.notify_all();
    }

    fn increment(&self, n: i64) {
        let mut count = self.count.lock();
        *count += n;
        self.cv.notify_all();
    }

    /// Blocks until `count > 0` or `canceled` becomes true, then
    /// decrements and returns `Ok`. Uses the same polling discipline as
    /// sync-seq so a cancellation racing with the wait is never missed.
    fn acquire(&self, canceled: &AtomicBool) -> Result<(), FeatureBufferError> {
        let mut count = self.count.lock();
        loop {
            if canceled.load(Ordering::SeqCst) {
                return Err(FeatureBufferError::Canceled);
            }
            if *count > 0 {
                *count -= 1;
                return Ok(());
            }
            self.cv.wait_for(&mut count, Duration::from_micros(50));
        }
    }

    /// Blocks until `count >= target`. Used by `producer_end_utt` to
    /// wait for every consumer's `consumer_end_utt`.
    fn wait_at_least(&self, target: i64) {
        let mut count = self.count.lock();
        while *count < target {
            self.cv.wait_for(&mut count, Duration::from_micros(50));
        }
    }
}

pub struct FeatureBuffer {
    seq: SyncSeq<Frame>,
    feature_dim: usize,
    pipeline: Mutex<Box<dyn SignalPipeline>>,
    canceled: AtomicBool,
    start_sem: Semaphore,
    end_sem: Semaphore,
    expected_consumers: Mutex<i64>,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl FeatureBuffer {
    pub fn new(feature_dim: usize, pipeline: Box<dyn SignalPipeline>) -> Arc<Self> {
        Self::with_metrics(feature_dim, pipeline, None)
    }

    pub fn with_metrics(
        feature_dim: usize,
        pipeline: Box<dyn SignalPipeline>,
        metrics: Option<Arc<PipelineMetrics>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            seq: SyncSeq::init(),
            feature_dim,
            pipeline: Mutex::new(pipeline),
            canceled: AtomicBool::new(false),
            start_sem: Semaphore::new(),
            end_sem: Semaphore::new(),
            expected_consumers: Mutex::new(0),
            metrics,
        })
    }

    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    /// Registers a new consumer against the underlying sync-seq.
    pub fn retain_consumer(&self) -> Result<SyncSeq<Frame>, FeatureBufferError> {
        Ok(self.seq.retain()?)
    }

    pub fn producer_start_utt(&self) {
        self.seq.reset();
        self.pipeline.lock().reset();
        self.canceled.store(false, Ordering::SeqCst);
        let n_consumers = (self.seq.refcount() - 1) as i64;
        *self.expected_consumers.lock() = n_consumers;
        self.end_sem.set(0);
        self.start_sem.set(n_consumers);
        debug!(n_consumers, "producer_start_utt");
    }

    pub fn consumer_start_utt(&self) -> Result<(), FeatureBufferError> {
        self.start_sem.acquire(&self.canceled)
    }

    fn append_frame(&self, frame: Frame) -> Result<(), FeatureBufferError> {
        if frame.len() != self.feature_dim {
            return Err(FeatureBufferError::DimensionMismatch {
                expected: self.feature_dim,
                actual: frame.len(),
            });
        }
        let idx = self.seq.append(frame)?;
        if let Some(m) = &self.metrics {
            m.record_append(idx + 1);
        }
        Ok(())
    }

    /// Pushes raw PCM samples through the signal pipeline, appending any
    /// completed frames. Never blocks on consumers.
    pub fn producer_process_raw(
        &self,
        samples: &[i16],
        full_utt: bool,
    ) -> Result<usize, FeatureBufferError> {
        let frames = self.pipeline.lock().process_raw(samples, full_utt);
        let n = frames.len();
        for frame in frames {
            self.append_frame(frame)?;
        }
        Ok(n)
    }

    /// Pushes pre-computed cepstra through the dynamic-feature stage of
    /// the signal pipeline.
    pub fn producer_process_cep(
        &self,
        cepstra: &[Vec<f32>],
        full_utt: bool,
    ) -> Result<usize, FeatureBufferError> {
        let frames = self.pipeline.lock().process_cep(cepstra, full_utt);
        let n = frames.len();
        for frame in frames {
            self.append_frame(frame)?;
        }
        Ok(n)
    }

    /// Drains the pipeline, finalizes the sync-seq, and blocks until
    /// every consumer has called `consumer_end_utt`.
    pub fn producer_end_utt(&self) -> Result<(), FeatureBufferError> {
        let tail_frames = self.pipeline.lock().drain();
        for frame in tail_frames {
            self.append_frame(frame)?;
        }
        self.seq.finalize()?;
        let expected = *self.expected_consumers.lock();
        self.end_sem.wait_at_least(expected);
        Ok(())
    }

    /// Force-quits the sync-seq and releases any consumer blocked in
    /// `consumer_start_utt`.
    pub fn producer_shutdown(&self) {
        self.canceled.store(true, Ordering::SeqCst);
        self.seq.force_quit();
        self.start_sem.increment(i64::MAX / 2);
    }

    pub fn consumer_wait(
        &self,
        consumer: &SyncSeq<Frame>,
        frame_idx: u64,
        timeout: WaitTimeout,
    ) -> Result<Frame, FeatureBufferError> {
        consumer.wait(frame_idx, timeout)?;
        Ok(consumer.get(frame_idx)?)
    }

    /// `end == None` means "release everything up to the current tail".
    pub fn consumer_release(&self, consumer: &SyncSeq<Frame>, start: u64, end: Option<u64>) -> u64 {
        let end = end.unwrap_or_else(|| consumer.next_idx());
        let new_base = consumer.release_range(start, end);
        if let Some(m) = &self.metrics {
            m.record_release(end.saturating_sub(start), new_base);
        }
        new_base
    }

    pub fn consumer_end_utt(&self, consumer: &SyncSeq<Frame>, start: u64) {
        let tail = consumer.next_idx();
        self.consumer_release(consumer, start, Some(tail));
        self.end_sem.increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use decoder_syncseq::WaitTimeout;
    use std::thread;

    fn passthrough_buffer(dim: usize) -> Arc<FeatureBuffer> {
        FeatureBuffer::new(dim, Box::new(WindowedMeanPipeline::new(dim)))
    }

    #[test]
    fn clean_utterance_round_trip() {
        let fb = passthrough_buffer(4);
        let consumer = fb.retain_consumer().unwrap();

        fb.producer_start_utt();
        let handle = {
            let fb = fb.clone();
            let consumer = consumer.clone();
            thread::spawn(move || {
                fb.consumer_start_utt().unwrap();
                let mut frames = Vec::new();
                let mut i = 0u64;
                loop {
                    match fb.consumer_wait(&consumer, i, WaitTimeout::Forever) {
                        Ok(frame) => {
                            frames.push(frame);
                            fb.consumer_release(&consumer, i, Some(i + 1));
                            i += 1;
                        }
                        Err(_) => {
                            fb.consumer_end_utt(&consumer, i);
                            break;
                        }
                    }
                }
                frames
            })
        };

        for _ in 0..8 {
            fb.producer_process_raw(&[100; 16], false).unwrap();
        }
        fb.producer_end_utt().unwrap();

        let frames = handle.join().unwrap();
        assert_eq!(frames.len(), 8);
        assert!(frames.iter().all(|f| f.len() == 4));
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let fb = passthrough_buffer(4);
        fb.producer_start_utt();
        let result = fb.append_frame(vec![0.0; 3]);
        assert!(matches!(
            result,
            Err(FeatureBufferError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn shutdown_unblocks_consumer_start() {
        let fb = passthrough_buffer(4);
        let consumer = fb.retain_consumer().unwrap();
        let _ = consumer;

        let fb2 = fb.clone();
        let handle = thread::spawn(move || fb2.consumer_start_utt());
        thread::sleep(std::time::Duration::from_millis(20));
        fb.producer_shutdown();
        let result = handle.join().unwrap();
        assert!(matches!(result, Err(FeatureBufferError::Canceled)));
    }
}
