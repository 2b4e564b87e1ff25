//! A scripted, deterministic [`SearchStage`] used in place of a real
//! acoustic search for tests and demos.
//!
//! Two sources are supported: scoring a [`FeatureBuffer`] directly
//! (first-pass shape, via a [`Scorer`] driven with
//! [`decoder_acoustic::NullAcousticBackend`] and `compute_all` so no
//! per-frame activation bookkeeping is needed), or consuming an
//! upstream [`ArcBuffer`] (second-pass shape). Either way the stage
//! walks a fixed script of word exits rather than running any real
//! search, which is what makes its output predictable enough to assert
//! on in a test.

use crate::stage::{SearchStage, StepOutcome};
use decoder_acoustic::Scorer;
use decoder_arcbuf::ArcBuffer;
use decoder_bptbl::{BackPointerTable, BpIdx, Segment};
use decoder_features::FeatureBuffer;
use decoder_foundation::error::{
    ArcBufferError, FeatureBufferError, ScorerError, SearchError, SyncSeqError,
};
use decoder_syncseq::WaitTimeout;
use std::collections::HashMap;
use std::sync::Arc;

/// One word this stage will "discover" after the given number of
/// frames have been consumed since the previous word's exit.
#[derive(Debug, Clone)]
pub struct ScriptedWord {
    pub word_id: i32,
    pub text: String,
    pub frame_span: u32,
    pub ac_score: i32,
    pub lm_score: i32,
}

pub enum StageSource {
    Features { fb: Arc<FeatureBuffer>, scorer: Scorer },
    Arcs { input: ArcBuffer },
}

/// Mutable state threaded through one `decode` step, split out from
/// `source` so the step functions below can borrow it independently of
/// whichever arm of `source` is live.
struct Cursor {
    bptbl: BackPointerTable,
    last_bp: Option<BpIdx>,
    frame_idx: u64,
    script_idx: usize,
    frames_remaining: u32,
    hyp: (String, i32),
}

impl Cursor {
    fn push_word(&mut self, text: &str, score: i32) {
        if !self.hyp.0.is_empty() {
            self.hyp.0.push(' ');
        }
        self.hyp.0.push_str(text);
        self.hyp.1 += score;
    }
}

pub struct ScriptedStage {
    source: StageSource,
    script: Vec<ScriptedWord>,
    word_text: HashMap<i32, String>,
    finish_word_id: Option<i32>,
    output: Option<ArcBuffer>,
    cursor: Cursor,
}

impl ScriptedStage {
    pub fn new(source: StageSource, script: Vec<ScriptedWord>, output: Option<ArcBuffer>) -> Self {
        let word_text = script.iter().map(|w| (w.word_id, w.text.clone())).collect();
        let finish_word_id = script.last().map(|w| w.word_id);
        let frames_remaining = script.first().map(|w| w.frame_span).unwrap_or(0);
        Self {
            source,
            script,
            word_text,
            finish_word_id,
            output,
            cursor: Cursor {
                bptbl: BackPointerTable::new(),
                last_bp: None,
                frame_idx: 0,
                script_idx: 0,
                frames_remaining,
                hyp: (String::new(), 0),
            },
        }
    }
}

/// Scores one frame from `fb`/`scorer`, then advances the script and
/// sweeps `output` if the frame budget for the current word ran out.
fn decode_features(
    cursor: &mut Cursor,
    script: &[ScriptedWord],
    output: &Option<ArcBuffer>,
    fb: &Arc<FeatureBuffer>,
    scorer: &mut Scorer,
) -> Result<StepOutcome, SearchError> {
    match scorer.score(fb, WaitTimeout::Forever) {
        Ok(_) => {}
        Err(ScorerError::FeatureBuffer(FeatureBufferError::Canceled)) => {
            return Err(SearchError::Canceled);
        }
        Err(ScorerError::FeatureBuffer(FeatureBufferError::SyncSeq(
            SyncSeqError::EndOfUtterance { final_next_idx, .. },
        ))) => {
            return if final_next_idx == 0 {
                Err(SearchError::Canceled)
            } else {
                Ok(StepOutcome::Frames(0))
            };
        }
        Err(ScorerError::FeatureBuffer(fe)) => return Err(SearchError::FeatureBuffer(fe)),
        Err(e) => return Err(SearchError::Backend(Box::new(e))),
    }

    let frame = scorer.output_frame() - 1;
    scorer.consumer_release(fb, frame, Some(frame + 1));
    cursor.bptbl.push_frame(None)?;
    cursor.frame_idx += 1;
    if cursor.frames_remaining > 0 {
        cursor.frames_remaining -= 1;
    }
    if cursor.frames_remaining == 0 {
        if let Some(word) = script.get(cursor.script_idx) {
            let idx = cursor
                .bptbl
                .enter(word.word_id, cursor.last_bp, word.ac_score, word.lm_score, 0)?;
            cursor.last_bp = Some(idx);
            cursor.push_word(&word.text, word.ac_score + word.lm_score);
            cursor.script_idx += 1;
            cursor.frames_remaining = script.get(cursor.script_idx).map(|w| w.frame_span).unwrap_or(0);
        }
    }
    if let Some(out) = output {
        out.producer_sweep(&cursor.bptbl, false)?;
    }
    Ok(StepOutcome::Frames(1))
}

/// Drains every arc currently committed on `input` starting at
/// `cursor.frame_idx`, entering each as a pass-through word exit.
fn decode_arcs(
    cursor: &mut Cursor,
    word_text: &HashMap<i32, String>,
    output: &Option<ArcBuffer>,
    input: &ArcBuffer,
) -> Result<StepOutcome, SearchError> {
    let mut arc_cursor = match input.consumer_wait(cursor.frame_idx as i32, WaitTimeout::Forever) {
        Ok(c) => c,
        Err(ArcBufferError::EndOfUtterance { .. }) => return Ok(StepOutcome::Frames(0)),
        Err(ArcBufferError::ShutDown) => return Err(SearchError::Canceled),
        Err(e) => return Err(e.into()),
    };

    cursor.bptbl.push_frame(None)?;
    let mut n = 0u32;
    let mut last_frame = arc_cursor.frame();
    while let Some(arc) = arc_cursor.next() {
        last_frame = arc.start_frame;
        let idx = cursor
            .bptbl
            .enter(arc.word_id, cursor.last_bp, arc.score.unwrap_or(0), 0, 0)?;
        cursor.last_bp = Some(idx);
        if let Some(text) = word_text.get(&arc.word_id) {
            cursor.push_word(text, arc.score.unwrap_or(0));
        }
        n += 1;
    }
    cursor.frame_idx = (last_frame + 1) as u64;
    if let Some(out) = output {
        out.producer_sweep(&cursor.bptbl, false)?;
    }
    Ok(StepOutcome::Frames(n.max(1)))
}

impl SearchStage for ScriptedStage {
    fn start_utt(&mut self) -> Result<(), SearchError> {
        self.cursor.bptbl.reset();
        self.cursor.last_bp = None;
        self.cursor.frame_idx = 0;
        self.cursor.script_idx = 0;
        self.cursor.frames_remaining = self.script.first().map(|w| w.frame_span).unwrap_or(0);
        self.cursor.hyp = (String::new(), 0);
        if let Some(out) = &self.output {
            out.reset();
        }
        match &mut self.source {
            StageSource::Features { fb, scorer } => {
                scorer.consumer_start_utt(fb).map_err(|e| match e {
                    ScorerError::FeatureBuffer(FeatureBufferError::Canceled) => {
                        SearchError::Canceled
                    }
                    ScorerError::FeatureBuffer(fe) => SearchError::FeatureBuffer(fe),
                    other => SearchError::Backend(Box::new(other)),
                })?;
                scorer.active_mut().set_compute_all(true);
            }
            StageSource::Arcs { .. } => {}
        }
        Ok(())
    }

    fn decode(&mut self) -> Result<StepOutcome, SearchError> {
        match &mut self.source {
            StageSource::Features { fb, scorer } => {
                decode_features(&mut self.cursor, &self.script, &self.output, fb, scorer)
            }
            StageSource::Arcs { input } => {
                decode_arcs(&mut self.cursor, &self.word_text, &self.output, input)
            }
        }
    }

    fn finish(&mut self) -> Result<(), SearchError> {
        match &mut self.source {
            StageSource::Features { fb, scorer } => {
                scorer.consumer_end_utt(fb, self.cursor.frame_idx);
            }
            StageSource::Arcs { .. } => {}
        }
        if self.cursor.bptbl.n_ent() > 0 {
            self.cursor.bptbl.finalize(self.finish_word_id)?;
        }
        if let Some(out) = &self.output {
            out.producer_sweep(&self.cursor.bptbl, true)?;
        }
        Ok(())
    }

    fn hyp(&self) -> (String, i32) {
        self.cursor.hyp.clone()
    }

    fn seg_iter(&self) -> Vec<Segment> {
        self.cursor
            .bptbl
            .seg_iter(self.finish_word_id)
            .unwrap_or_default()
    }

    fn bptbl(&self) -> Option<&BackPointerTable> {
        Some(&self.cursor.bptbl)
    }

    fn output_arc_buffer(&self) -> Option<&ArcBuffer> {
        self.output.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use decoder_acoustic::NullAcousticBackend;
    use decoder_features::WindowedMeanPipeline;
    use std::thread;

    fn two_word_script() -> Vec<ScriptedWord> {
        vec![
            ScriptedWord {
                word_id: 1,
                text: "one".into(),
                frame_span: 1,
                ac_score: 5,
                lm_score: 0,
            },
            ScriptedWord {
                word_id: 2,
                text: "two".into(),
                frame_span: 1,
                ac_score: 7,
                lm_score: 0,
            },
        ]
    }

    #[test]
    fn features_source_produces_scripted_hypothesis() {
        let fb = FeatureBuffer::new(1, Box::new(WindowedMeanPipeline::new(1)));
        let consumer = fb.retain_consumer().unwrap();
        let backend = Arc::new(NullAcousticBackend);
        let scorer = Scorer::new(backend, consumer);
        let mut stage = ScriptedStage::new(
            StageSource::Features {
                fb: fb.clone(),
                scorer,
            },
            two_word_script(),
            None,
        );

        let handle = {
            let fb = fb.clone();
            thread::spawn(move || {
                fb.producer_start_utt();
                fb.producer_process_raw(&[1, 1], false).unwrap();
                fb.producer_end_utt().unwrap();
            })
        };

        stage.start_utt().unwrap();
        loop {
            match stage.decode().unwrap() {
                StepOutcome::Frames(0) => break,
                StepOutcome::Frames(_) => {}
            }
        }
        stage.finish().unwrap();
        handle.join().unwrap();

        assert_eq!(stage.hyp(), ("one two".to_string(), 12));
        let segs = stage.seg_iter();
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[0].word_id, 1);
        assert_eq!(segs[1].word_id, 2);
    }

    #[test]
    fn seg_iter_yields_words_in_order_with_monotonic_frames() {
        let fb = FeatureBuffer::new(1, Box::new(WindowedMeanPipeline::new(1)));
        let consumer = fb.retain_consumer().unwrap();
        let backend = Arc::new(NullAcousticBackend);
        let scorer = Scorer::new(backend, consumer);
        let script = vec![
            ScriptedWord {
                word_id: 1,
                text: "alpha".into(),
                frame_span: 2,
                ac_score: 1,
                lm_score: 0,
            },
            ScriptedWord {
                word_id: 2,
                text: "bravo".into(),
                frame_span: 3,
                ac_score: 2,
                lm_score: 0,
            },
            ScriptedWord {
                word_id: 3,
                text: "charlie".into(),
                frame_span: 1,
                ac_score: 3,
                lm_score: 0,
            },
        ];
        let mut stage = ScriptedStage::new(
            StageSource::Features {
                fb: fb.clone(),
                scorer,
            },
            script,
            None,
        );

        let handle = {
            let fb = fb.clone();
            thread::spawn(move || {
                fb.producer_start_utt();
                fb.producer_process_raw(&[1, 1, 1, 1, 1, 1], false).unwrap();
                fb.producer_end_utt().unwrap();
            })
        };

        stage.start_utt().unwrap();
        loop {
            match stage.decode().unwrap() {
                StepOutcome::Frames(0) => break,
                StepOutcome::Frames(_) => {}
            }
        }
        stage.finish().unwrap();
        handle.join().unwrap();

        let segs = stage.seg_iter();
        assert_eq!(
            segs.iter().map(|s| s.word_id).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        for pair in segs.windows(2) {
            assert!(pair[0].start_frame <= pair[1].start_frame);
            assert!(pair[0].end_frame < pair[1].end_frame);
        }
    }

    #[test]
    fn arcs_source_passes_through_upstream_words() {
        let upstream_bp = {
            let mut bp = BackPointerTable::new();
            bp.push_frame(None).unwrap();
            bp.enter(1, None, 5, 0, 0).unwrap();
            bp
        };
        let input = ArcBuffer::init("first-pass", true);
        input.producer_sweep(&upstream_bp, true).unwrap();

        let mut stage = ScriptedStage::new(
            StageSource::Arcs {
                input: input.clone(),
            },
            vec![ScriptedWord {
                word_id: 1,
                text: "one".into(),
                frame_span: 1,
                ac_score: 0,
                lm_score: 0,
            }],
            None,
        );

        stage.start_utt().unwrap();
        loop {
            match stage.decode().unwrap() {
                StepOutcome::Frames(0) => break,
                StepOutcome::Frames(_) => {}
            }
        }
        stage.finish().unwrap();

        assert_eq!(stage.hyp().0, "one");
    }
}
