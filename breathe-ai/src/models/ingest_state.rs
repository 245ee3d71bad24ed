//! Ingestion request state machine
//!
//! Each upload progresses through:
//! RECEIVED → STORED → CLASSIFIED → PARSED → RECORDED → RESPONDED
//!
//! `Failed` is terminal and reachable from every non-terminal state. It
//! records the stage that was being attempted when the failure occurred.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Pipeline stage names as reported to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IngestStage {
    Received,
    Stored,
    Classified,
    Parsed,
    Recorded,
    Responded,
}

impl IngestStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestStage::Received => "Received",
            IngestStage::Stored => "Stored",
            IngestStage::Classified => "Classified",
            IngestStage::Parsed => "Parsed",
            IngestStage::Recorded => "Recorded",
            IngestStage::Responded => "Responded",
        }
    }

    /// Stage that follows this one on the success path
    pub fn next(&self) -> Option<IngestStage> {
        match self {
            IngestStage::Received => Some(IngestStage::Stored),
            IngestStage::Stored => Some(IngestStage::Classified),
            IngestStage::Classified => Some(IngestStage::Parsed),
            IngestStage::Parsed => Some(IngestStage::Recorded),
            IngestStage::Recorded => Some(IngestStage::Responded),
            IngestStage::Responded => None,
        }
    }
}

/// Current state of one ingestion request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestState {
    At(IngestStage),
    Failed {
        stage: IngestStage,
        kind: &'static str,
    },
}

impl IngestState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IngestState::Failed { .. } | IngestState::At(IngestStage::Responded)
        )
    }

    /// Stage reported to clients: the last stage reached, or the failing stage
    pub fn stage(&self) -> IngestStage {
        match self {
            IngestState::At(stage) => *stage,
            IngestState::Failed { stage, .. } => *stage,
        }
    }
}

/// State transition event
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub request_id: Uuid,
    pub old_state: IngestState,
    pub new_state: IngestState,
    pub transitioned_at: DateTime<Utc>,
}

/// State machine for a single request
///
/// Keeps every transition so the outcome can report how the request moved
/// through the pipeline.
#[derive(Debug)]
pub struct IngestRun {
    pub request_id: Uuid,
    state: IngestState,
    started_at: DateTime<Utc>,
    transitions: Vec<StateTransition>,
}

impl IngestRun {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            state: IngestState::At(IngestStage::Received),
            started_at: Utc::now(),
            transitions: Vec::new(),
        }
    }

    pub fn state(&self) -> &IngestState {
        &self.state
    }

    pub fn transitions(&self) -> &[StateTransition] {
        &self.transitions
    }

    /// Milliseconds since the request was received
    pub fn elapsed_ms(&self) -> i64 {
        (Utc::now() - self.started_at).num_milliseconds()
    }

    /// Advance along the success path
    ///
    /// Returns false (and leaves the state unchanged) when the run is terminal
    /// or `stage` is not the immediate successor of the current stage.
    pub fn advance(&mut self, stage: IngestStage) -> bool {
        match self.state {
            IngestState::At(current) if current.next() == Some(stage) => {
                self.transition(IngestState::At(stage));
                true
            }
            _ => false,
        }
    }

    /// Move to `Failed` while attempting `stage`
    pub fn fail(&mut self, stage: IngestStage, kind: &'static str) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.transition(IngestState::Failed { stage, kind });
        true
    }

    /// Final state and transition history
    pub fn finish(self) -> (IngestState, Vec<StateTransition>) {
        (self.state, self.transitions)
    }

    fn transition(&mut self, new_state: IngestState) {
        let transition = StateTransition {
            request_id: self.request_id,
            old_state: self.state.clone(),
            new_state: new_state.clone(),
            transitioned_at: Utc::now(),
        };
        tracing::debug!(
            request_id = %self.request_id,
            from = ?transition.old_state,
            to = ?transition.new_state,
            "Ingest state transition"
        );
        self.state = new_state;
        self.transitions.push(transition);
    }
}

impl Default for IngestRun {
    fn default() -> Self {
        Self::new()
    }
}
