//! Append-only, reference-counted shared sequence (C1).
//!
//! A `SyncSeq<T>` is shared by one producer thread and any number of
//! consumer threads. The producer appends elements at the tail; each
//! consumer observes a strictly increasing window of indices and
//! releases indices it no longer needs, advancing a shared base once
//! every live consumer has released.
//!
//! Grounded in `sync_array.c` from the retrieved multisphinx source:
//! the refcount is an 8-bit field with the producer holding an implicit
//! reference, so at most 254 consumers may additionally `retain` before
//! a 255th retain would overflow the byte. The wait/signal discipline
//! (mutex + condvar, polling even in the "forever" case) matches
//! `sync_array_wait` exactly, to close the race between a waiter
//! observing "not finalized, no data yet" and a finalizing producer's
//! signal arriving microseconds later.

use decoder_foundation::error::SyncSeqError;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Producer holds one implicit reference; `retain` may be called by up
/// to this many additional consumers before it fails.
pub const MAX_CONSUMERS: u8 = 254;

/// Polling interval used while waiting "forever", mirroring the 50
/// microsecond interval in `sync_array_wait`.
const FOREVER_POLL_INTERVAL: Duration = Duration::from_micros(50);

#[derive(Debug, Clone, Copy)]
pub enum WaitTimeout {
    Forever,
    Duration(Duration),
}

struct State<T> {
    data: VecDeque<T>,
    counts: VecDeque<u8>,
    base: u64,
    refcount: u8,
    /// `None` until `finalize`/`force_quit` is called.
    final_next_idx: Option<u64>,
}

impl<T> State<T> {
    fn next_idx(&self) -> u64 {
        self.base + self.data.len() as u64
    }
}

struct Inner<T> {
    state: Mutex<State<T>>,
    cv: Condvar,
}

/// A handle onto a shared sync-sequence. Producer and consumers use the
/// same type; which operations are appropriate for which role is a
/// matter of calling discipline, exactly as in the source (`append` is
/// producer-only by convention, not by the type system).
pub struct SyncSeq<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for SyncSeq<T> {
    /// A raw `Clone` does not affect the logical refcount; use
    /// [`SyncSeq::retain`] when a new consumer is registering.
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone> SyncSeq<T> {
    /// Creates a new sequence; the returned handle is the producer's,
    /// with the logical refcount starting at 1.
    pub fn init() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    data: VecDeque::new(),
                    counts: VecDeque::new(),
                    base: 0,
                    refcount: 1,
                    final_next_idx: None,
                }),
                cv: Condvar::new(),
            }),
        }
    }

    /// Registers a new consumer, failing once the refcount would exceed
    /// the 8-bit field (producer + [`MAX_CONSUMERS`] consumers).
    pub fn retain(&self) -> Result<Self, SyncSeqError> {
        let mut state = self.inner.state.lock();
        if state.refcount == u8::MAX {
            return Err(SyncSeqError::TooManyConsumers { max: MAX_CONSUMERS });
        }
        state.refcount += 1;
        drop(state);
        Ok(Self {
            inner: self.inner.clone(),
        })
    }

    /// Drops this handle's logical reference. Storage itself is freed
    /// when the last `Arc` clone is dropped, as usual in Rust; this call
    /// only decrements the count consulted by `release_range`.
    pub fn release(self) {
        let mut state = self.inner.state.lock();
        state.refcount = state.refcount.saturating_sub(1);
    }

    pub fn next_idx(&self) -> u64 {
        self.inner.state.lock().next_idx()
    }

    pub fn base(&self) -> u64 {
        self.inner.state.lock().base
    }

    /// Producer-only: appends an element at the tail.
    pub fn append(&self, elem: T) -> Result<u64, SyncSeqError> {
        let mut state = self.inner.state.lock();
        if let Some(final_next_idx) = state.final_next_idx {
            return Err(SyncSeqError::Finalized { final_next_idx });
        }
        state.data.push_back(elem);
        state.counts.push_back(0);
        let idx = state.next_idx() - 1;
        drop(state);
        self.inner.cv.notify_all();
        Ok(idx)
    }

    /// Blocks until `idx < next_idx` or the sequence is finalized at or
    /// before `idx`. Must not be called from the producer's thread.
    pub fn wait(&self, idx: u64, timeout: WaitTimeout) -> Result<(), SyncSeqError> {
        let mut state = self.inner.state.lock();
        let mut attempted_finite_wait = false;
        loop {
            if idx < state.next_idx() {
                return Ok(());
            }
            if let Some(final_next_idx) = state.final_next_idx {
                if idx >= final_next_idx {
                    return Err(SyncSeqError::EndOfUtterance {
                        idx,
                        final_next_idx,
                    });
                }
            }
            match timeout {
                WaitTimeout::Forever => {
                    self.inner.cv.wait_for(&mut state, FOREVER_POLL_INTERVAL);
                }
                WaitTimeout::Duration(d) => {
                    if attempted_finite_wait {
                        return Err(SyncSeqError::Timeout { idx });
                    }
                    self.inner.cv.wait_for(&mut state, d);
                    attempted_finite_wait = true;
                }
            }
        }
    }

    /// Copies element `idx` out; fails if outside `[base, next_idx)`.
    pub fn get(&self, idx: u64) -> Result<T, SyncSeqError> {
        let state = self.inner.state.lock();
        let next = state.next_idx();
        if idx < state.base || idx >= next {
            return Err(SyncSeqError::OutOfWindow {
                idx,
                base: state.base,
                next,
            });
        }
        let offset = (idx - state.base) as usize;
        Ok(state.data[offset].clone())
    }

    /// Increments the refcount for every index in `[start, end)`, then
    /// advances `base` past every leading index whose count indicates
    /// every live consumer (refcount - 1, excluding the producer's
    /// implicit reference) has released it. Returns the new base.
    pub fn release_range(&self, start: u64, end: u64) -> u64 {
        let mut state = self.inner.state.lock();
        let base = state.base;
        let next = state.next_idx();
        let lo = start.max(base);
        let hi = end.min(next);
        let mut i = lo;
        while i < hi {
            let offset = (i - base) as usize;
            if let Some(c) = state.counts.get_mut(offset) {
                *c = c.saturating_add(1);
            }
            i += 1;
        }

        let needed = state.refcount.saturating_sub(1);
        while let Some(&front) = state.counts.front() {
            if front < needed {
                break;
            }
            state.counts.pop_front();
            state.data.pop_front();
            state.base += 1;
        }
        state.base
    }

    /// Producer-only, idempotent-hostile: marks the sequence finalized
    /// at its current tail.
    pub fn finalize(&self) -> Result<u64, SyncSeqError> {
        let mut state = self.inner.state.lock();
        if let Some(final_next_idx) = state.final_next_idx {
            return Err(SyncSeqError::AlreadyFinalized { final_next_idx });
        }
        let final_next_idx = state.next_idx();
        state.final_next_idx = Some(final_next_idx);
        drop(state);
        self.inner.cv.notify_all();
        Ok(final_next_idx)
    }

    /// Producer-only: unblocks every waiter immediately, regardless of
    /// how far the tail has advanced.
    pub fn force_quit(&self) {
        let mut state = self.inner.state.lock();
        state.final_next_idx = Some(0);
        drop(state);
        self.inner.cv.notify_all();
    }

    /// Producer-only: clears contents and unfinalizes. The caller must
    /// ensure no consumer is currently waiting.
    pub fn reset(&self) {
        let mut state = self.inner.state.lock();
        state.data.clear();
        state.counts.clear();
        state.base = 0;
        state.final_next_idx = None;
    }

    pub fn refcount(&self) -> u8 {
        self.inner.state.lock().refcount
    }

    pub fn is_finalized(&self) -> bool {
        self.inner.state.lock().final_next_idx.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn single_producer_many_consumers_clean_end() {
        let producer = SyncSeq::<i32>::init();
        let consumers: Vec<_> = (0..4).map(|_| producer.retain().unwrap()).collect();
        assert_eq!(producer.refcount(), 5);

        let barrier = Arc::new(Barrier::new(5));
        let handles: Vec<_> = consumers
            .into_iter()
            .map(|c| {
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    let mut seen = Vec::new();
                    let mut i = 0u64;
                    loop {
                        match c.wait(i, WaitTimeout::Forever) {
                            Ok(()) => {
                                seen.push(c.get(i).unwrap());
                                c.release_range(i, i + 1);
                                i += 1;
                            }
                            Err(_) => break,
                        }
                    }
                    seen
                })
            })
            .collect();

        barrier.wait();
        for i in 0..100 {
            producer.append(i).unwrap();
        }
        producer.finalize().unwrap();

        for h in handles {
            let seen = h.join().unwrap();
            assert_eq!(seen, (0..100).collect::<Vec<_>>());
        }
        assert_eq!(producer.base(), 100);
    }

    #[test]
    fn finalize_then_reset_restores_initial_state() {
        let seq = SyncSeq::<i32>::init();
        seq.append(1).unwrap();
        seq.append(2).unwrap();
        seq.finalize().unwrap();
        seq.reset();
        assert_eq!(seq.base(), 0);
        assert_eq!(seq.next_idx(), 0);
        assert!(!seq.is_finalized());
        assert_eq!(seq.refcount(), 1);
    }

    #[test]
    fn wait_on_finalized_index_returns_eos_regardless_of_timeout() {
        let seq = SyncSeq::<i32>::init();
        seq.append(1).unwrap();
        seq.finalize().unwrap();
        let result = seq.wait(5, WaitTimeout::Duration(Duration::from_secs(60)));
        assert!(matches!(result, Err(SyncSeqError::EndOfUtterance { .. })));
    }

    #[test]
    fn append_to_finalized_fails_without_mutating_state() {
        let seq = SyncSeq::<i32>::init();
        seq.append(1).unwrap();
        seq.finalize().unwrap();
        let before = seq.next_idx();
        let result = seq.append(2);
        assert!(matches!(result, Err(SyncSeqError::Finalized { .. })));
        assert_eq!(seq.next_idx(), before);
    }

    #[test]
    fn force_quit_unblocks_in_progress_wait() {
        let seq = SyncSeq::<i32>::init();
        let consumer = seq.retain().unwrap();
        let waiter = thread::spawn(move || consumer.wait(0, WaitTimeout::Forever));
        thread::sleep(Duration::from_millis(20));
        seq.force_quit();
        let result = waiter.join().unwrap();
        assert!(matches!(result, Err(SyncSeqError::EndOfUtterance { .. })));
    }

    #[test]
    fn retain_fails_past_max_consumers() {
        let seq = SyncSeq::<i32>::init();
        let mut handles = Vec::new();
        for _ in 0..MAX_CONSUMERS {
            handles.push(seq.retain().unwrap());
        }
        assert_eq!(seq.refcount(), 255);
        assert!(matches!(
            seq.retain(),
            Err(SyncSeqError::TooManyConsumers { max: MAX_CONSUMERS })
        ));
    }

    #[test]
    fn gc_no_op_when_nothing_to_release() {
        let seq = SyncSeq::<i32>::init();
        seq.append(1).unwrap();
        let new_base = seq.release_range(0, 0);
        assert_eq!(new_base, 0);
    }

    #[test]
    fn finite_timeout_returns_timeout_not_forever_blocked() {
        let seq = SyncSeq::<i32>::init();
        let result = seq.wait(0, WaitTimeout::Duration(Duration::from_millis(5)));
        assert!(matches!(result, Err(SyncSeqError::Timeout { .. })));
    }
}
