//! Request and outcome types for submitting work to a game instance.
use serde_json::{Map, Value};

use engine_core::{
    MalformedOperation, Operation, PreconditionReport, RenderedMessages, StateTree,
    parse_operations,
};

/// One mutation batch for a game instance.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BatchRequest {
    #[serde(default)]
    pub operations: Vec<Operation>,
    /// Template variables, also visible to transition guards.
    #[serde(default)]
    pub variables: Map<String, Value>,
    /// Fixed rng seed; falls back to the runtime's configured seed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl BatchRequest {
    pub fn new(operations: Vec<Operation>) -> Self {
        Self {
            operations,
            ..Self::default()
        }
    }

    /// Builds a request from raw JSON operations.
    pub fn from_json(raw: &[Value]) -> Result<Self, Vec<MalformedOperation>> {
        parse_operations(raw).map(Self::new)
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Precondition results for one outgoing transition.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct TransitionCheck {
    pub transition: String,
    pub report: PreconditionReport,
}

/// Messages produced by one applied instruction body.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct EmittedMessages {
    /// Phase name or transition id the instructions belong to.
    pub source: String,
    pub messages: RenderedMessages,
}

/// Result of a committed batch.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct BatchOutcome {
    pub state: StateTree,
    /// Phase after automatic transitions.
    pub phase: String,
    /// Transition ids fired, in order.
    pub fired: Vec<String>,
    /// Every transition check performed, in order.
    pub checks: Vec<TransitionCheck>,
    pub messages: Vec<EmittedMessages>,
}
