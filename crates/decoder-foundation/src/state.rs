use crate::error::DecoderError;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::RwLock;
use std::sync::Arc;

/// Lifecycle state of a pipeline (C7), distinct from the per-utterance
/// state tracked inside the feature buffer. A pipeline moves through this
/// machine once per process; utterances cycle many times while it stays
/// `Running`.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineState {
    Initializing,
    Running,
    Draining,
    Stopped,
}

pub struct StateManager {
    state: Arc<RwLock<PipelineState>>,
    state_tx: Sender<PipelineState>,
    state_rx: Receiver<PipelineState>,
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StateManager {
    pub fn new() -> Self {
        let (state_tx, state_rx) = crossbeam_channel::unbounded();
        Self {
            state: Arc::new(RwLock::new(PipelineState::Initializing)),
            state_tx,
            state_rx,
        }
    }

    pub fn transition(&self, new_state: PipelineState) -> Result<(), DecoderError> {
        let mut current = self.state.write();

        let valid = matches!(
            (&*current, &new_state),
            (PipelineState::Initializing, PipelineState::Running)
                | (PipelineState::Running, PipelineState::Draining)
                | (PipelineState::Draining, PipelineState::Running)
                | (PipelineState::Draining, PipelineState::Stopped)
        );

        if !valid {
            return Err(DecoderError::Fatal(format!(
                "invalid pipeline state transition: {:?} -> {:?}",
                *current, new_state
            )));
        }

        tracing::info!(?current, ?new_state, "pipeline state transition");
        *current = new_state.clone();
        let _ = self.state_tx.send(new_state);
        Ok(())
    }

    pub fn current(&self) -> PipelineState {
        self.state.read().clone()
    }

    pub fn subscribe(&self) -> Receiver<PipelineState> {
        self.state_rx.clone()
    }
}
