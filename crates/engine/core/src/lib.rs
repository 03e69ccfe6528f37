//! Deterministic execution core for rule-driven games.
//!
//! `engine-core` evaluates transition guards, applies mutation batches,
//! resolves weighted random choices and analyzes the phase graph. Everything
//! here is synchronous and free of shared mutable state; the runtime crate
//! serializes access per game instance and caches derived graphs.
pub mod artifacts;
pub mod config;
pub mod error;
pub mod graph;
pub mod guard;
pub mod mutation;
pub mod rng;
pub mod state;
pub mod template;

pub use artifacts::{
    Fingerprint, GameArtifacts, InstructionSet, Instructions, Phase, Precondition,
    RenderedMessages, Transition,
};
pub use config::EngineConfig;
pub use error::{EngineError, ErrorSeverity};
pub use graph::{GraphDiagnostic, GraphError, GraphIssue, PhasePath, TransitionGraph, audit};
pub use guard::{
    GuardContext, GuardDiagnostic, GuardEvaluation, GuardExpr, GuardOp, PreconditionOutcome,
    PreconditionReport, PreconditionStatus, evaluate, evaluate_preconditions,
    evaluate_preconditions_with, evaluate_value, evaluate_with_config, truthy,
    validate_expression,
};
pub use mutation::{
    Amount, MalformedOperation, MutationError, Operation, OperationError, OperationFailure,
    OperationKind, apply_operations, parse_operations,
};
pub use rng::{RandomSource, SeededLcg, ThreadRandom, resolve_randomness, select_weighted};
pub use state::{PlayerId, StateShapeError, StateTree};
pub use template::{render, resolve_operations, resolve_value};
