//! Common error infrastructure for engine-core.
//!
//! Domain-specific errors (`OperationError`, `GraphIssue`, guard diagnostics)
//! live next to the component that produces them. This module provides the
//! shared classification every one of them implements.
//!
//! # Design Principles
//!
//! - **Nothing is thrown across the API**: validation, precondition and
//!   unresolved-reference failures are returned as data
//! - **Complete lists**: validation reports every problem, not only the first
//! - **Stable codes**: every variant maps to a fixed string for callers that
//!   build their own messaging

/// Severity level of an error, used for categorization and recovery strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorSeverity {
    /// Malformed input detected before any effect. Fix the input, do not retry.
    ///
    /// Examples: unknown guard operator, operation with an empty path
    Validation,

    /// Wrong-typed or missing target found while applying. The same batch may
    /// succeed against a different state.
    ///
    /// Examples: increment of a string, transfer exceeding the balance
    Recoverable,

    /// Internal invariant violation. Indicates a bug.
    Internal,
}

impl ErrorSeverity {
    /// Returns a human-readable description of this severity level.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Recoverable => "recoverable",
            Self::Internal => "internal",
        }
    }

    /// Returns true if this error is potentially recoverable.
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Recoverable)
    }
}

/// Common trait for all engine-core errors.
///
/// - Use `#[derive(thiserror::Error)]` for the Display/Error impl
/// - Classify severity based on when the failure is detected, not its impact
pub trait EngineError: core::fmt::Display + core::fmt::Debug {
    /// Returns the severity level of this error.
    fn severity(&self) -> ErrorSeverity;

    /// Returns a static string identifier for this error variant.
    fn error_code(&self) -> &'static str {
        core::any::type_name::<Self>()
    }
}
