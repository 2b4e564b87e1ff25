//! Pipeline / search factory (C7).
//!
//! Owns the shared immutable model handles and feature buffer, and
//! instantiates the [`decoder_search::SearchStage`] implementations a
//! host wires into a multi-pass decode. See [`pipeline::Pipeline`] for
//! the entry point.

pub mod models;
pub mod pipeline;

pub use models::{Dictionary, LanguageModel, NullDictionary, NullLanguageModel, PhoneticContextMap};
pub use pipeline::{
    CreatedStage, Pipeline, PipelineBuilder, StageInput, StageKind, StageOverrides, StageTemplate,
};
