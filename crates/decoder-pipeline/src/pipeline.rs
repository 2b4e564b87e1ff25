//! Pipeline / search factory (C7): owns the shared immutable model
//! handles and the shared feature buffer, and instantiates stages from
//! named templates.
//!
//! The four named search variants (`fwdtree`, `fwdflat`, `latgen`,
//! `state_align`) are out of scope as Viterbi implementations; every
//! stage this factory creates is a [`ScriptedStage`], parameterized by
//! a template's script. A real front end would add a `StageKind` per
//! variant and a matching branch in [`Pipeline::create`] without
//! touching the shared-resource or wiring logic here.

use crate::models::{Dictionary, LanguageModel, NullDictionary, NullLanguageModel, PhoneticContextMap};
use decoder_acoustic::{AcousticBackend, NullAcousticBackend, Scorer};
use decoder_arcbuf::ArcBuffer;
use decoder_features::{FeatureBuffer, SignalPipeline, WindowedMeanPipeline};
use decoder_foundation::error::{PipelineError, SearchError};
use decoder_search::{
    EventCallback, ScriptedStage, ScriptedWord, SearchStage, Stage as WorkerStage, StageSource,
};
use decoder_telemetry::PipelineMetrics;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Features,
    Arcs,
}

/// Where a created stage reads from: the shared feature buffer, or an
/// upstream stage's committed arcs.
pub enum StageInput {
    Features,
    Arcs(ArcBuffer),
}

/// Per-stage configuration a template fixes and `create`'s overrides
/// may patch.
#[derive(Debug, Clone)]
pub struct StageTemplate {
    pub script: Vec<ScriptedWord>,
    pub keep_scores: bool,
    pub produces_output: bool,
}

impl Default for StageTemplate {
    fn default() -> Self {
        Self {
            script: Vec::new(),
            keep_scores: false,
            produces_output: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StageOverrides {
    pub script: Option<Vec<ScriptedWord>>,
    pub keep_scores: Option<bool>,
    pub produces_output: Option<bool>,
}

/// A freshly-built stage, still owned by the caller. `output` is kept
/// alongside (rather than only reachable through the trait object) so
/// the caller can hand it to the next stage's `create` call before
/// moving `stage` into a [`WorkerStage`].
pub struct CreatedStage {
    pub stage: Box<dyn SearchStage>,
    pub output: Option<ArcBuffer>,
}

impl CreatedStage {
    pub fn into_worker(self, utt_id: u64) -> Arc<WorkerStage> {
        Arc::new(WorkerStage::new(utt_id, self.stage))
    }

    pub fn into_worker_with_callback(self, utt_id: u64, cb: EventCallback) -> Arc<WorkerStage> {
        Arc::new(WorkerStage::with_callback(utt_id, self.stage, cb))
    }
}

pub struct Pipeline {
    feature_buffer: Arc<FeatureBuffer>,
    acoustic_backend: Arc<dyn AcousticBackend>,
    language_model: Arc<dyn LanguageModel>,
    dictionary: Arc<dyn Dictionary>,
    phonetic_context: Arc<PhoneticContextMap>,
    templates: Mutex<HashMap<String, StageTemplate>>,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl Pipeline {
    pub fn builder(feature_dim: usize) -> PipelineBuilder {
        PipelineBuilder::new(feature_dim)
    }

    pub fn feature_buffer(&self) -> &Arc<FeatureBuffer> {
        &self.feature_buffer
    }

    pub fn acoustic_backend(&self) -> &Arc<dyn AcousticBackend> {
        &self.acoustic_backend
    }

    pub fn language_model(&self) -> &Arc<dyn LanguageModel> {
        &self.language_model
    }

    pub fn dictionary(&self) -> &Arc<dyn Dictionary> {
        &self.dictionary
    }

    pub fn phonetic_context(&self) -> &Arc<PhoneticContextMap> {
        &self.phonetic_context
    }

    pub fn register_template(&self, name: impl Into<String>, template: StageTemplate) {
        self.templates.lock().insert(name.into(), template);
    }

    /// Creates a fresh arc buffer to carry one stage's output to the
    /// next stage's input.
    pub fn link(&self, name: impl Into<String>, keep_scores: bool) -> ArcBuffer {
        ArcBuffer::init(name, keep_scores)
    }

    /// Instantiates a stage of `stage_kind`, reading from `input`,
    /// starting from the named template and patched by `overrides`.
    pub fn create(
        &self,
        template: &str,
        stage_kind: StageKind,
        input: StageInput,
        overrides: StageOverrides,
    ) -> Result<CreatedStage, PipelineError> {
        let base = self
            .templates
            .lock()
            .get(template)
            .cloned()
            .ok_or_else(|| PipelineError::TemplateNotFound(template.to_string()))?;
        let script = overrides.script.unwrap_or(base.script);
        let keep_scores = overrides.keep_scores.unwrap_or(base.keep_scores);
        let produces_output = overrides.produces_output.unwrap_or(base.produces_output);

        let source = match (stage_kind, input) {
            (StageKind::Features, StageInput::Features) => {
                let consumer = self
                    .feature_buffer
                    .retain_consumer()
                    .map_err(|e| PipelineError::Search(SearchError::FeatureBuffer(e)))?;
                let scorer = Scorer::with_metrics(
                    self.acoustic_backend.clone(),
                    consumer,
                    self.metrics.clone(),
                );
                StageSource::Features {
                    fb: self.feature_buffer.clone(),
                    scorer,
                }
            }
            (StageKind::Arcs, StageInput::Arcs(input)) => StageSource::Arcs { input },
            (kind, _) => {
                return Err(PipelineError::UnknownStageKind(format!(
                    "{kind:?} stage requires a matching input source"
                )));
            }
        };

        let output = produces_output.then(|| self.link(format!("{template}-out"), keep_scores));
        let stage = ScriptedStage::new(source, script, output.clone());
        Ok(CreatedStage {
            stage: Box::new(stage),
            output,
        })
    }
}

pub struct PipelineBuilder {
    feature_dim: usize,
    signal_pipeline: Option<Box<dyn SignalPipeline>>,
    acoustic_backend: Option<Arc<dyn AcousticBackend>>,
    language_model: Option<Arc<dyn LanguageModel>>,
    dictionary: Option<Arc<dyn Dictionary>>,
    phonetic_context: PhoneticContextMap,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl PipelineBuilder {
    pub fn new(feature_dim: usize) -> Self {
        Self {
            feature_dim,
            signal_pipeline: None,
            acoustic_backend: None,
            language_model: None,
            dictionary: None,
            phonetic_context: PhoneticContextMap::new(),
            metrics: None,
        }
    }

    pub fn signal_pipeline(mut self, pipeline: Box<dyn SignalPipeline>) -> Self {
        self.signal_pipeline = Some(pipeline);
        self
    }

    pub fn acoustic_backend(mut self, backend: Arc<dyn AcousticBackend>) -> Self {
        self.acoustic_backend = Some(backend);
        self
    }

    pub fn language_model(mut self, lm: Arc<dyn LanguageModel>) -> Self {
        self.language_model = Some(lm);
        self
    }

    pub fn dictionary(mut self, dictionary: Arc<dyn Dictionary>) -> Self {
        self.dictionary = Some(dictionary);
        self
    }

    pub fn phonetic_context(mut self, context: PhoneticContextMap) -> Self {
        self.phonetic_context = context;
        self
    }

    pub fn metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Result<Pipeline, PipelineError> {
        if self.feature_dim == 0 {
            return Err(PipelineError::InvalidFeatureDimension(self.feature_dim));
        }
        let signal_pipeline = self
            .signal_pipeline
            .unwrap_or_else(|| Box::new(WindowedMeanPipeline::new(self.feature_dim)));
        let feature_buffer =
            FeatureBuffer::with_metrics(self.feature_dim, signal_pipeline, self.metrics.clone());
        Ok(Pipeline {
            feature_buffer,
            acoustic_backend: self
                .acoustic_backend
                .unwrap_or_else(|| Arc::new(NullAcousticBackend)),
            language_model: self
                .language_model
                .unwrap_or_else(|| Arc::new(NullLanguageModel)),
            dictionary: self.dictionary.unwrap_or_else(|| Arc::new(NullDictionary)),
            phonetic_context: Arc::new(self.phonetic_context),
            templates: Mutex::new(HashMap::new()),
            metrics: self.metrics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use decoder_foundation::error::DecoderError;
    use decoder_search::StageEvent;
    use std::thread;

    fn word(id: i32, text: &str, ac_score: i32) -> ScriptedWord {
        ScriptedWord {
            word_id: id,
            text: text.to_string(),
            frame_span: 1,
            ac_score,
            lm_score: 0,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn two_pass_pipeline_runs_to_clean_completion() {
        let pipeline = Pipeline::builder(1)
            .signal_pipeline(Box::new(WindowedMeanPipeline::with_window(1, 1)))
            .build()
            .unwrap();
        pipeline.register_template(
            "pass1",
            StageTemplate {
                script: vec![word(1, "hello", 5), word(2, "world", 7)],
                keep_scores: true,
                produces_output: true,
            },
        );
        pipeline.register_template(
            "pass2",
            StageTemplate {
                // In `Arcs` mode a script only supplies the word-id to
                // text lookup for pass-through entries; `frame_span`
                // plays no role since timing comes from the upstream
                // arc buffer.
                script: vec![word(1, "hello", 0), word(2, "world", 0)],
                keep_scores: false,
                produces_output: false,
            },
        );

        let first = pipeline
            .create("pass1", StageKind::Features, StageInput::Features, StageOverrides::default())
            .unwrap();
        let first_output = first.output.clone().unwrap();

        let second = pipeline
            .create(
                "pass2",
                StageKind::Arcs,
                StageInput::Arcs(first_output),
                StageOverrides::default(),
            )
            .unwrap();

        let final_hyp: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let final_hyp_cb = final_hyp.clone();
        let cb: EventCallback = Arc::new(move |e| {
            if let StageEvent::Final { hyp, .. } = e {
                *final_hyp_cb.lock() = Some(hyp);
            }
        });

        let first_worker = first.into_worker(1);
        let second_worker = second.into_worker_with_callback(1, cb);
        let first_handle = first_worker.spawn();
        let second_handle = second_worker.spawn();

        // window = 1, so each sample completes a frame; the two
        // frame_span: 1 words only need 2 scored frames between them,
        // so 4 pushed samples leaves a couple of frames of margin
        // before end-of-utterance.
        let fb = pipeline.feature_buffer().clone();
        let feeder = thread::spawn(move || {
            fb.producer_start_utt();
            fb.producer_process_raw(&[1, 1, 1, 1], false).unwrap();
            fb.producer_end_utt().unwrap();
        });

        first_handle.await.unwrap().unwrap();
        second_handle.await.unwrap().unwrap();
        feeder.join().unwrap();

        assert_eq!(final_hyp.lock().as_deref(), Some("hello world"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn mid_utterance_shutdown_cancels_the_running_stage() {
        let pipeline = Pipeline::builder(1).build().unwrap();
        pipeline.register_template(
            "pass1",
            StageTemplate {
                script: vec![word(1, "hello", 5)],
                keep_scores: false,
                produces_output: true,
            },
        );

        let created = pipeline
            .create("pass1", StageKind::Features, StageInput::Features, StageOverrides::default())
            .unwrap();
        let output = created.output.clone().unwrap();
        let worker = created.into_worker(1);
        let handle = worker.spawn();

        let fb = pipeline.feature_buffer().clone();
        fb.producer_start_utt();
        thread::sleep(std::time::Duration::from_millis(20));
        fb.producer_shutdown();

        let result = handle.await.unwrap();
        assert!(matches!(
            result,
            Err(DecoderError::Search(SearchError::Canceled))
        ));
        assert!(output.is_shut_down());
    }
}
