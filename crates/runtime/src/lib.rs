//! Runtime orchestration for rule-driven game instances.
//!
//! This crate wires the synchronous `engine-core` pieces into a concurrent
//! runtime. Consumers embed [`Runtime`] to register games, submit mutation
//! batches and let automatic transitions fire, with every game's work
//! serialized through its own [`ActionQueue`] key.
//!
//! Modules are organized by responsibility:
//! - [`runtime`] hosts the orchestrator and builder
//! - [`api`] exposes the types downstream clients interact with
//! - [`cache`] keeps built transition graphs per game
//! - `workers` keeps background tasks internal to the crate
pub mod api;
pub mod cache;
pub mod runtime;

mod workers;

pub use api::{
    ActionQueue, BatchOutcome, BatchRequest, EmittedMessages, QueueError, Result, RuntimeError,
    TransitionCheck,
};
pub use cache::GraphCache;
pub use runtime::{GameId, QueueConfig, Runtime, RuntimeBuilder, RuntimeConfig};
