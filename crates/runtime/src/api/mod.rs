//! Public runtime API surface.
//!
//! This module gathers the types exposed to consumers of the runtime crate so
//! other layers can stay focused on orchestration and workers.

pub mod batch;
pub mod errors;
pub mod queue;

pub use batch::{BatchOutcome, BatchRequest, EmittedMessages, TransitionCheck};
pub use errors::{QueueError, Result, RuntimeError};
pub use queue::ActionQueue;
