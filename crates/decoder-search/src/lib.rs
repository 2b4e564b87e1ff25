//! Search stage (C6): the pluggable decoding pass a
//! [`worker::Stage`] drives through one utterance's life-cycle.
//!
//! This crate owns none of the search math itself — per the spec the
//! Viterbi/lattice internals are out of scope — it owns the contract a
//! pass must satisfy ([`stage::SearchStage`]), the generic worker-task
//! host that runs any implementation of it ([`worker::Stage`]), and one
//! concrete, deterministic implementation used in tests and demos in
//! place of a real acoustic search ([`scripted::ScriptedStage`]).

pub mod event;
pub mod scripted;
pub mod stage;
pub mod worker;

pub use event::{EventCallback, StageEvent};
pub use scripted::{ScriptedStage, ScriptedWord, StageSource};
pub use stage::{SearchStage, StepOutcome};
pub use worker::Stage;
