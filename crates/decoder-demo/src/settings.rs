//! Layered configuration for the demo binary: defaults, an optional
//! TOML file, then environment variables, in that order, the way the
//! teacher's own `Settings::new()` layers its sources.

use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Cepstral feature dimension the windowed-mean signal pipeline
    /// produces. Must be non-zero or `PipelineBuilder::build` rejects it.
    pub feature_dim: usize,
    /// Raw samples averaged per feature frame (see
    /// `WindowedMeanPipeline::with_window`).
    pub window: usize,
    /// Days of rotated log files to keep; 0 disables pruning.
    pub log_retention_days: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            feature_dim: 13,
            window: 8,
            log_retention_days: 7,
        }
    }
}

impl PipelineSettings {
    /// Loads defaults, layers `path` if given and present on disk, then
    /// layers `DECODER_DEMO_*` environment variables over the result.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("feature_dim", 13i64)?
            .set_default("window", 8i64)?
            .set_default("log_retention_days", 7i64)?;

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        builder = builder.add_source(config::Environment::with_prefix("DECODER_DEMO"));
        builder.build()?.try_deserialize()
    }
}
