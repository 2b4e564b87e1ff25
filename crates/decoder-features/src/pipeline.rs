//! Pluggable signal-processing front end.
//!
//! The real cepstral/CMN/dynamic-feature computation is out of scope;
//! this module defines the seam [`SignalPipeline`] that a production
//! front end would implement, plus a small deterministic stand-in used
//! in tests.

/// A single fixed-dimension feature vector.
pub type Frame = Vec<f32>;

/// Converts raw or pre-computed cepstral input into feature frames.
///
/// Implementations may buffer internally (e.g. to accumulate context for
/// a windowed dynamic-feature computation); `full_utt` tells the
/// implementation whether more input for this utterance may still
/// arrive, mirroring the "whole utterance at once" vs. "streaming chunk"
/// distinction the source signal-processing layer makes.
pub trait SignalPipeline: Send {
    /// Clears any buffered state ahead of a new utterance.
    fn reset(&mut self);

    /// Consumes raw PCM samples, returning zero or more completed
    /// frames.
    fn process_raw(&mut self, samples: &[i16], full_utt: bool) -> Vec<Frame>;

    /// Consumes pre-computed cepstra, returning zero or more completed
    /// frames.
    fn process_cep(&mut self, cepstra: &[Vec<f32>], full_utt: bool) -> Vec<Frame>;

    /// Flushes any frames still held back by windowing, called once at
    /// `producer_end_utt`.
    fn drain(&mut self) -> Vec<Frame>;
}

/// A deterministic test pipeline: each output frame is the windowed mean
/// of the last `window` raw samples (cast to `f32`, replicated across
/// `feature_dim`), with cepstra passed through unchanged. Not meant to
/// resemble a real front end; only to exercise the buffer's concurrency
/// model with predictable data.
pub struct WindowedMeanPipeline {
    feature_dim: usize,
    window: usize,
    carry: Vec<i16>,
}

impl WindowedMeanPipeline {
    pub fn new(feature_dim: usize) -> Self {
        Self {
            feature_dim,
            window: 8,
            carry: Vec::new(),
        }
    }

    pub fn with_window(feature_dim: usize, window: usize) -> Self {
        Self {
            feature_dim,
            window,
            carry: Vec::new(),
        }
    }

    fn frame_from(&self, samples: &[i16]) -> Frame {
        let mean = samples.iter().map(|&s| s as f64).sum::<f64>() / samples.len().max(1) as f64;
        vec![mean as f32; self.feature_dim]
    }
}

impl SignalPipeline for WindowedMeanPipeline {
    fn reset(&mut self) {
        self.carry.clear();
    }

    fn process_raw(&mut self, samples: &[i16], full_utt: bool) -> Vec<Frame> {
        self.carry.extend_from_slice(samples);
        let mut frames = Vec::new();
        while self.carry.len() >= self.window {
            let chunk: Vec<i16> = self.carry.drain(..self.window).collect();
            frames.push(self.frame_from(&chunk));
        }
        if full_utt && !self.carry.is_empty() {
            frames.push(self.frame_from(&self.carry));
            self.carry.clear();
        }
        frames
    }

    fn process_cep(&mut self, cepstra: &[Vec<f32>], _full_utt: bool) -> Vec<Frame> {
        cepstra
            .iter()
            .map(|c| {
                let mut frame = c.clone();
                frame.resize(self.feature_dim, 0.0);
                frame
            })
            .collect()
    }

    fn drain(&mut self) -> Vec<Frame> {
        if self.carry.is_empty() {
            Vec::new()
        } else {
            let frame = self.frame_from(&self.carry);
            self.carry.clear();
            vec![frame]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windowed_mean_emits_once_per_window() {
        let mut p = WindowedMeanPipeline::with_window(2, 4);
        let frames = p.process_raw(&[0, 0, 0, 0, 10, 10, 10, 10], false);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], vec![0.0, 0.0]);
        assert_eq!(frames[1], vec![10.0, 10.0]);
    }

    #[test]
    fn partial_window_flushed_on_full_utt() {
        let mut p = WindowedMeanPipeline::with_window(2, 4);
        let frames = p.process_raw(&[5, 5], true);
        assert_eq!(frames, vec![vec![5.0, 5.0]]);
    }

    #[test]
    fn drain_flushes_remaining_carry() {
        let mut p = WindowedMeanPipeline::with_window(2, 4);
        p.process_raw(&[2, 2], false);
        let frames = p.drain();
        assert_eq!(frames, vec![vec![2.0, 2.0]]);
        assert!(p.drain().is_empty());
    }
}
