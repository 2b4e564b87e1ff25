//! Drives a two-pass pipeline (features -> arcs) over a single wav file
//! and prints the final hypothesis. Demonstrates the wiring a real front
//! end would do; the search itself is a fixed [`ScriptedWord`] script
//! since no real acoustic model or language model is in scope.

mod logging;
mod settings;

use clap::Parser;
use decoder_foundation::shutdown::ShutdownHandler;
use decoder_pipeline::{Pipeline, StageInput, StageKind, StageOverrides, StageTemplate};
use decoder_search::{ScriptedWord, StageEvent};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use settings::PipelineSettings;

#[derive(Parser, Debug)]
#[command(name = "decoder-demo", author, version, about = "Two-pass decoder pipeline demo")]
struct Cli {
    /// Optional TOML settings file, layered under defaults and over by
    /// DECODER_DEMO_* environment variables.
    #[arg(long)]
    config: Option<PathBuf>,

    /// 16-bit PCM wav file to decode.
    #[arg(long)]
    input: PathBuf,
}

fn demo_script() -> Vec<ScriptedWord> {
    vec![
        ScriptedWord {
            word_id: 1,
            text: "speech".to_string(),
            frame_span: 4,
            ac_score: 5,
            lm_score: 0,
        },
        ScriptedWord {
            word_id: 2,
            text: "detected".to_string(),
            frame_span: 4,
            ac_score: 7,
            lm_score: 0,
        },
    ]
}

fn read_wav_samples(path: &std::path::Path) -> Result<Vec<i16>, anyhow::Error> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let samples: Result<Vec<i16>, hound::Error> = match spec.sample_format {
        hound::SampleFormat::Int if spec.bits_per_sample == 16 => {
            reader.samples::<i16>().collect()
        }
        _ => anyhow::bail!(
            "unsupported wav format: {:?} {} bits",
            spec.sample_format,
            spec.bits_per_sample
        ),
    };
    Ok(samples?)
}

fn event_logger(role: &'static str) -> decoder_search::EventCallback {
    Arc::new(move |event| match event {
        StageEvent::Start { utt_id } => tracing::info!(role, utt_id, "stage started"),
        StageEvent::Partial { utt_id, hyp, score } => {
            tracing::debug!(role, utt_id, hyp = %hyp, score, "partial hypothesis")
        }
        StageEvent::End { utt_id } => tracing::info!(role, utt_id, "stage reached end of input"),
        StageEvent::Final { utt_id, hyp, score } => {
            tracing::info!(role, utt_id, hyp = %hyp, score, "final hypothesis")
        }
    })
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let _log_guard = logging::init_logging()?;
    let cli = Cli::parse();
    let settings = PipelineSettings::load(cli.config.as_deref()).unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to load settings, using defaults");
        PipelineSettings::default()
    });
    logging::prune_old_logs(settings.log_retention_days);

    let shutdown = ShutdownHandler::install().await;
    let shutdown_guard = shutdown.guard();

    let samples = read_wav_samples(&cli.input)?;
    tracing::info!(path = %cli.input.display(), samples = samples.len(), "loaded wav input");

    let pipeline = Pipeline::builder(settings.feature_dim)
        .signal_pipeline(Box::new(decoder_features::WindowedMeanPipeline::with_window(
            settings.feature_dim,
            settings.window,
        )))
        .build()?;

    pipeline.register_template(
        "pass1",
        StageTemplate {
            script: demo_script(),
            keep_scores: true,
            produces_output: true,
        },
    );
    pipeline.register_template(
        "pass2",
        StageTemplate {
            script: demo_script(),
            keep_scores: false,
            produces_output: false,
        },
    );

    let first = pipeline.create("pass1", StageKind::Features, StageInput::Features, StageOverrides::default())?;
    let first_output = first
        .output
        .clone()
        .expect("pass1 template produces output");
    let second = pipeline.create(
        "pass2",
        StageKind::Arcs,
        StageInput::Arcs(first_output),
        StageOverrides::default(),
    )?;

    let final_hyp: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let final_hyp_cb = final_hyp.clone();
    let pass2_cb = event_logger("pass2");
    let capture_cb: decoder_search::EventCallback = Arc::new(move |event| {
        if let StageEvent::Final { hyp, .. } = &event {
            *final_hyp_cb.lock() = Some(hyp.clone());
        }
        pass2_cb(event);
    });

    let utt_id = 1;
    let first_worker = first.into_worker_with_callback(utt_id, event_logger("pass1"));
    let second_worker = second.into_worker_with_callback(utt_id, capture_cb);
    let first_handle = first_worker.spawn();
    let second_handle = second_worker.spawn();

    let fb = pipeline.feature_buffer().clone();
    let feeder = tokio::task::spawn_blocking(move || {
        fb.producer_start_utt();
        fb.producer_process_raw(&samples, true)?;
        fb.producer_end_utt()
    });

    tokio::select! {
        _ = shutdown_guard.wait() => {
            tracing::warn!("shutdown requested, force-quitting the pipeline");
            pipeline.feature_buffer().producer_shutdown();
        }
        result = async {
            let (first_res, second_res, feed_res) = tokio::join!(first_handle, second_handle, feeder);
            first_res??;
            second_res??;
            feed_res??;
            Ok::<(), anyhow::Error>(())
        } => {
            result?;
        }
    }

    match final_hyp.lock().clone() {
        Some(hyp) => println!("{hyp}"),
        None => tracing::warn!("no final hypothesis produced"),
    }

    Ok(())
}
