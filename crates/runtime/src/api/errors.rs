//! Unified error types surfaced by the runtime API.
//!
//! Wraps failures from the action queue, graph construction and mutation
//! batches so callers can bubble them up with consistent context.
use thiserror::Error;
use tokio::sync::oneshot;

use engine_core::{EngineError, ErrorSeverity, GraphError, MutationError};

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Failures of the per-key action queue itself. Errors produced by a unit of
/// work are returned inside the unit's own output.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("action queue is shut down")]
    ShutDown,

    #[error("key worker command channel closed")]
    CommandChannelClosed,

    #[error("key worker reply channel closed")]
    ReplyChannelClosed(#[source] oneshot::error::RecvError),

    #[error("unit of work panicked: {message}")]
    UnitPanicked { message: String },

    #[error("unit of work was cancelled")]
    UnitCancelled,

    #[error("key worker join failed")]
    WorkerJoin(#[source] tokio::task::JoinError),
}

impl EngineError for QueueError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            QueueError::UnitPanicked { .. } | QueueError::UnitCancelled => {
                ErrorSeverity::Recoverable
            }
            _ => ErrorSeverity::Internal,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            QueueError::ShutDown => "QUEUE_SHUT_DOWN",
            QueueError::CommandChannelClosed => "QUEUE_COMMAND_CHANNEL_CLOSED",
            QueueError::ReplyChannelClosed(_) => "QUEUE_REPLY_CHANNEL_CLOSED",
            QueueError::UnitPanicked { .. } => "QUEUE_UNIT_PANICKED",
            QueueError::UnitCancelled => "QUEUE_UNIT_CANCELLED",
            QueueError::WorkerJoin(_) => "QUEUE_WORKER_JOIN",
        }
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("game `{game_id}` is not registered")]
    UnknownGame { game_id: String },

    #[error("game `{game_id}` is already registered")]
    GameExists { game_id: String },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Mutation(#[from] MutationError),

    #[error("instructions of transition `{transition}` failed")]
    Transition {
        transition: String,
        #[source]
        source: MutationError,
    },

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl EngineError for RuntimeError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            RuntimeError::UnknownGame { .. } | RuntimeError::GameExists { .. } => {
                ErrorSeverity::Validation
            }
            RuntimeError::Graph(err) => err.severity(),
            RuntimeError::Mutation(err) => err.severity(),
            RuntimeError::Transition { source, .. } => source.severity(),
            RuntimeError::Queue(err) => err.severity(),
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            RuntimeError::UnknownGame { .. } => "RUNTIME_UNKNOWN_GAME",
            RuntimeError::GameExists { .. } => "RUNTIME_GAME_EXISTS",
            RuntimeError::Graph(err) => err.error_code(),
            RuntimeError::Mutation(err) => err.error_code(),
            RuntimeError::Transition { source, .. } => source.error_code(),
            RuntimeError::Queue(err) => err.error_code(),
        }
    }
}
