//! Mutation errors.
//!
//! Validation errors reject a whole batch before any effect; application
//! errors halt the batch at the failing operation.

use serde_json::{Number, Value};

use super::Operation;
use crate::error::{EngineError, ErrorSeverity};
use crate::state::StateTree;

// ============================================================================
// Per-Operation Errors
// ============================================================================

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum OperationError {
    // ----- structural (validation) -----
    #[error("invalid path `{path}`")]
    InvalidPath { path: String },

    #[error("transfer source and destination are both `{path}`")]
    SelfTransfer { path: String },

    #[error("transfer from `{path}` has negative amount {amount}")]
    NegativeAmount { path: String, amount: Number },

    #[error("rng at `{path}` has no choices")]
    EmptyChoices { path: String },

    #[error("rng at `{path}` has {choices} choices but {probabilities} probabilities")]
    ProbabilityCountMismatch {
        path: String,
        choices: usize,
        probabilities: usize,
    },

    #[error("rng at `{path}` has invalid probability {value}")]
    InvalidProbability { path: String, value: f64 },

    // ----- type / precondition (application) -----
    #[error("no value at `{path}`")]
    MissingValue { path: String },

    #[error("value at `{path}` is {found}, expected number")]
    NotNumeric { path: String, found: &'static str },

    #[error("amount for `{path}` is an unresolved template `{template}`")]
    UnresolvedAmount { path: String, template: String },

    #[error("value at `{path}` is {found}, expected array")]
    NotArray { path: String, found: &'static str },

    #[error("value at `{path}` is {found}, expected object")]
    NotObject { path: String, found: &'static str },

    #[error("cannot transfer {requested} from `{path}`: only {available} available")]
    InsufficientBalance {
        path: String,
        available: Number,
        requested: Number,
    },

    #[error("arithmetic on `{path}` overflowed")]
    Overflow { path: String },

    #[error("rng operation at `{path}` reached the interpreter unresolved")]
    UnresolvedRng { path: String },
}

impl EngineError for OperationError {
    fn severity(&self) -> ErrorSeverity {
        use OperationError::*;
        match self {
            InvalidPath { .. }
            | SelfTransfer { .. }
            | NegativeAmount { .. }
            | EmptyChoices { .. }
            | ProbabilityCountMismatch { .. }
            | InvalidProbability { .. } => ErrorSeverity::Validation,
            MissingValue { .. }
            | NotNumeric { .. }
            | UnresolvedAmount { .. }
            | NotArray { .. }
            | NotObject { .. }
            | InsufficientBalance { .. }
            | Overflow { .. }
            | UnresolvedRng { .. } => ErrorSeverity::Recoverable,
        }
    }

    fn error_code(&self) -> &'static str {
        use OperationError::*;
        match self {
            InvalidPath { .. } => "MUTATION_INVALID_PATH",
            SelfTransfer { .. } => "MUTATION_SELF_TRANSFER",
            NegativeAmount { .. } => "MUTATION_NEGATIVE_AMOUNT",
            EmptyChoices { .. } => "MUTATION_EMPTY_CHOICES",
            ProbabilityCountMismatch { .. } => "MUTATION_PROBABILITY_COUNT_MISMATCH",
            InvalidProbability { .. } => "MUTATION_INVALID_PROBABILITY",
            MissingValue { .. } => "MUTATION_MISSING_VALUE",
            NotNumeric { .. } => "MUTATION_NOT_NUMERIC",
            UnresolvedAmount { .. } => "MUTATION_UNRESOLVED_AMOUNT",
            NotArray { .. } => "MUTATION_NOT_ARRAY",
            NotObject { .. } => "MUTATION_NOT_OBJECT",
            InsufficientBalance { .. } => "MUTATION_INSUFFICIENT_BALANCE",
            Overflow { .. } => "MUTATION_OVERFLOW",
            UnresolvedRng { .. } => "MUTATION_UNRESOLVED_RNG",
        }
    }
}

/// An operation paired with the error it produced.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("operation #{index} ({kind}) failed: {error}", kind = .operation.kind())]
pub struct OperationFailure {
    pub index: usize,
    pub operation: Operation,
    #[source]
    pub error: OperationError,
}

/// A raw batch entry that could not be deserialized into an [`Operation`].
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("operation #{index} is malformed: {reason}")]
pub struct MalformedOperation {
    pub index: usize,
    pub raw: Value,
    pub reason: String,
}

// ============================================================================
// Batch Errors
// ============================================================================

/// Failure of a whole mutation batch.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum MutationError {
    /// Structural validation failed; nothing was applied.
    #[error("batch rejected: {} invalid operation(s)", .failures.len())]
    Invalid { failures: Vec<OperationFailure> },

    /// Application stopped at `failure`. `applied` lists the operations that
    /// succeeded before it and `partial` is the state at that point.
    #[error("batch halted after {} operation(s): {failure}", .applied.len())]
    Halted {
        applied: Vec<Operation>,
        failure: OperationFailure,
        partial: Box<StateTree>,
    },
}

impl MutationError {
    /// Every (operation, error) pair carried by this error.
    pub fn failures(&self) -> &[OperationFailure] {
        match self {
            MutationError::Invalid { failures } => failures,
            MutationError::Halted { failure, .. } => std::slice::from_ref(failure),
        }
    }
}

impl EngineError for MutationError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            MutationError::Invalid { .. } => ErrorSeverity::Validation,
            MutationError::Halted { failure, .. } => failure.error.severity(),
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            MutationError::Invalid { .. } => "MUTATION_BATCH_INVALID",
            MutationError::Halted { failure, .. } => failure.error.error_code(),
        }
    }
}
