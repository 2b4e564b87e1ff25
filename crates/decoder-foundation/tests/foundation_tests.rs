//! Foundation crate tests
//!
//! Tests cover:
//! - Clock abstraction (RealClock, TestClock, SharedClock)
//! - Error types (DecoderError and the per-component error enums)
//! - Pipeline state transitions
//! - Shutdown propagation

use decoder_foundation::clock::{real_clock, test_clock, Clock, RealClock, TestClock};
use decoder_foundation::error::{
    ArcBufferError, BptblError, DecoderError, FeatureBufferError, SyncSeqError,
};
use decoder_foundation::state::{PipelineState, StateManager};
use std::time::{Duration, Instant};

// ─── RealClock Tests ────────────────────────────────────────────────

#[test]
fn real_clock_now_returns_current_time() {
    let clock = RealClock::new();
    let before = Instant::now();
    let clock_time = clock.now();
    let after = Instant::now();
    assert!(clock_time >= before);
    assert!(clock_time <= after);
}

#[test]
fn real_clock_factory_function() {
    let clock = real_clock();
    let t = clock.now();
    assert!(t.elapsed() < Duration::from_secs(1));
}

// ─── TestClock Tests ────────────────────────────────────────────────

#[test]
fn test_clock_advance() {
    let clock = TestClock::new();
    let t0 = clock.now();
    clock.advance(Duration::from_secs(5));
    let t1 = clock.now();
    assert_eq!(t1.duration_since(t0), Duration::from_secs(5));
}

#[test]
fn test_clock_advance_accumulates() {
    let clock = TestClock::new();
    let start = clock.now();
    clock.advance(Duration::from_millis(100));
    clock.advance(Duration::from_millis(200));
    clock.advance(Duration::from_millis(300));
    let elapsed = clock.now().duration_since(start);
    assert_eq!(elapsed, Duration::from_millis(600));
}

#[test]
fn test_clock_sleep_advances_time() {
    let clock = TestClock::new();
    let t0 = clock.now();
    clock.sleep(Duration::from_secs(10));
    let t1 = clock.now();
    assert_eq!(t1.duration_since(t0), Duration::from_secs(10));
}

#[test]
fn test_clock_factory_function() {
    let clock = test_clock();
    let t = clock.now();
    clock.sleep(Duration::from_secs(1));
    let t2 = clock.now();
    assert_eq!(t2.duration_since(t), Duration::from_secs(1));
}

// ─── Error Type Tests ───────────────────────────────────────────────

#[test]
fn sync_seq_error_out_of_window_message() {
    let err = SyncSeqError::OutOfWindow {
        idx: 10,
        base: 20,
        next: 30,
    };
    let msg = format!("{err}");
    assert!(msg.contains("10"));
    assert!(msg.contains("20"));
}

#[test]
fn sync_seq_error_too_many_consumers() {
    let err = SyncSeqError::TooManyConsumers { max: 254 };
    assert!(format!("{err}").contains("254"));
}

#[test]
fn feature_buffer_error_wraps_sync_seq_error() {
    let inner = SyncSeqError::Timeout { idx: 7 };
    let err: FeatureBufferError = inner.clone().into();
    assert!(matches!(err, FeatureBufferError::SyncSeq(e) if e == inner));
}

#[test]
fn bptbl_error_no_finish_word() {
    let err = BptblError::NoFinishWord { wid: 42 };
    assert!(format!("{err}").contains("42"));
}

#[test]
fn arc_buffer_error_not_committed() {
    let err = ArcBufferError::NotCommitted { frame: 3 };
    assert!(format!("{err}").contains('3'));
}

#[test]
fn decoder_error_from_sync_seq_error() {
    let inner = SyncSeqError::AlreadyFinalized {
        final_next_idx: 100,
    };
    let err: DecoderError = FeatureBufferError::from(inner).into();
    assert!(matches!(err, DecoderError::FeatureBuffer(_)));
}

#[test]
fn decoder_error_shutdown() {
    let err = DecoderError::ShutdownRequested;
    assert!(format!("{err}").contains("Shutdown") || format!("{err}").contains("shutdown"));
}

#[test]
fn decoder_error_fatal() {
    let err = DecoderError::Fatal("corrupt bptbl".to_string());
    assert!(format!("{err}").contains("corrupt bptbl"));
}

// ─── Pipeline state machine ─────────────────────────────────────────

#[test]
fn state_manager_allows_forward_transitions() {
    let mgr = StateManager::new();
    assert_eq!(mgr.current(), PipelineState::Initializing);
    mgr.transition(PipelineState::Running).unwrap();
    mgr.transition(PipelineState::Draining).unwrap();
    mgr.transition(PipelineState::Stopped).unwrap();
    assert_eq!(mgr.current(), PipelineState::Stopped);
}

#[test]
fn state_manager_rejects_illegal_transition() {
    let mgr = StateManager::new();
    let result = mgr.transition(PipelineState::Stopped);
    assert!(result.is_err());
    assert_eq!(mgr.current(), PipelineState::Initializing);
}

#[test]
fn state_manager_broadcasts_transitions() {
    let mgr = StateManager::new();
    let rx = mgr.subscribe();
    mgr.transition(PipelineState::Running).unwrap();
    let received = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(received, PipelineState::Running);
}
