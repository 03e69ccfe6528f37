//! High-level runtime orchestrator.
//!
//! The runtime owns the game registry, the graph cache and the action queue,
//! and exposes a builder-based API. Every state-changing call for a game is
//! funneled through that game's queue key, so batches for one game never
//! interleave while different games proceed concurrently.

use std::collections::HashMap;
use std::env;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use engine_core::rng::{self, RandomSource};
use engine_core::state::fields;
use engine_core::{
    EngineConfig, GameArtifacts, GuardContext, Instructions, Operation, RenderedMessages,
    StateTree, Transition, TransitionGraph, apply_operations, evaluate_preconditions_with,
    template,
};

use crate::api::{
    ActionQueue, BatchOutcome, BatchRequest, EmittedMessages, Result, RuntimeError,
    TransitionCheck,
};
use crate::cache::GraphCache;

/// Identifier of a registered game instance.
pub type GameId = String;

/// Action queue tuning.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Pending units buffered per key before `enqueue` waits.
    pub buffer_size: usize,
}

impl QueueConfig {
    pub const DEFAULT_BUFFER_SIZE: usize = 32;
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            buffer_size: Self::DEFAULT_BUFFER_SIZE,
        }
    }
}

/// Runtime configuration shared across the orchestrator and workers.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    pub engine: EngineConfig,
    pub queue: QueueConfig,
    /// Seed applied to batches that do not carry their own.
    pub default_seed: Option<u64>,
}

impl RuntimeConfig {
    /// Construct runtime configuration from environment variables.
    ///
    /// Environment variables:
    /// - `ENGINE_QUEUE_BUFFER` - Pending units per game queue (default: 32)
    /// - `ENGINE_RNG_SEED` - Fixed rng seed for unseeded batches (default: none)
    /// - `ENGINE_PROBABILITY_TOLERANCE` - Weight-sum deviation before warning (default: 0.01)
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(buffer) = read_env::<usize>("ENGINE_QUEUE_BUFFER") {
            config.queue.buffer_size = buffer.max(1);
        }
        if let Some(seed) = read_env::<u64>("ENGINE_RNG_SEED") {
            config.default_seed = Some(seed);
        }
        if let Some(tolerance) = read_env::<f64>("ENGINE_PROBABILITY_TOLERANCE") {
            config.engine.probability_tolerance = tolerance.abs();
        }

        config
    }
}

fn read_env<T>(key: &str) -> Option<T>
where
    T: std::str::FromStr,
{
    env::var(key).ok()?.parse().ok()
}

struct GameInstance {
    artifacts: Arc<GameArtifacts>,
    state: StateTree,
    phase: String,
}

/// What a queued unit applies before transitions are evaluated.
enum Work {
    Batch(BatchRequest),
    /// Instructions attached to the game's current phase.
    PhaseAction {
        variables: Map<String, Value>,
        seed: Option<u64>,
    },
}

struct Inner {
    config: RuntimeConfig,
    games: RwLock<HashMap<GameId, GameInstance>>,
    cache: GraphCache,
    queue: ActionQueue<GameId>,
}

/// Main runtime that orchestrates game instances.
///
/// Cheap to clone; clones share the registry, cache and queue.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<Inner>,
}

impl Runtime {
    /// Create a new runtime builder
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> &GraphCache {
        &self.inner.cache
    }

    pub fn queue(&self) -> &ActionQueue<GameId> {
        &self.inner.queue
    }

    /// Registers a game instance in the entry phase and builds its graph.
    pub fn register_game(
        &self,
        game_id: impl Into<GameId>,
        artifacts: GameArtifacts,
        state: StateTree,
    ) -> Result<Arc<TransitionGraph>> {
        let game_id = game_id.into();
        if self.inner.games_read().contains_key(&game_id) {
            return Err(RuntimeError::GameExists { game_id });
        }

        let graph = self.inner.cache.get_or_build(&game_id, &artifacts)?;
        let missing = state.missing_bookkeeping();
        if !missing.is_empty() {
            warn!(%game_id, ?missing, "registered state lacks bookkeeping fields");
        }

        let mut games = self.inner.games_write();
        if games.contains_key(&game_id) {
            return Err(RuntimeError::GameExists { game_id });
        }
        info!(
            %game_id,
            phases = graph.phases().len(),
            transitions = graph.transitions().len(),
            "registered game"
        );
        games.insert(
            game_id,
            GameInstance {
                artifacts: Arc::new(artifacts),
                state,
                phase: EngineConfig::ENTRY_PHASE.to_owned(),
            },
        );
        Ok(graph)
    }

    /// Replaces a game's artifacts after its queued work has run. The cached
    /// graph is invalidated and rebuilt; on a build error the old artifacts
    /// stay in place.
    pub async fn update_artifacts(
        &self,
        game_id: &str,
        artifacts: GameArtifacts,
    ) -> Result<Arc<TransitionGraph>> {
        self.ensure_registered(game_id)?;
        let inner = Arc::clone(&self.inner);
        let id = game_id.to_owned();

        self.inner
            .queue
            .enqueue(game_id.to_owned(), move || async move {
                inner.replace_artifacts(&id, artifacts)
            })
            .await?
    }

    /// Applies a batch, then fires any automatic transitions it enables.
    pub async fn submit(&self, game_id: &str, request: BatchRequest) -> Result<BatchOutcome> {
        self.run(game_id, Work::Batch(request)).await
    }

    /// Applies the instructions attached to the game's current phase.
    pub async fn act(
        &self,
        game_id: &str,
        variables: Map<String, Value>,
        seed: Option<u64>,
    ) -> Result<BatchOutcome> {
        self.run(game_id, Work::PhaseAction { variables, seed })
            .await
    }

    /// Evaluates automatic transitions without applying any operations.
    pub async fn advance(&self, game_id: &str) -> Result<BatchOutcome> {
        self.submit(game_id, BatchRequest::default()).await
    }

    /// Snapshot of the committed state.
    pub fn state(&self, game_id: &str) -> Result<StateTree> {
        self.inner.with_game(game_id, |game| game.state.clone())
    }

    pub fn phase(&self, game_id: &str) -> Result<String> {
        self.inner.with_game(game_id, |game| game.phase.clone())
    }

    pub fn graph(&self, game_id: &str) -> Result<Arc<TransitionGraph>> {
        let artifacts = self.inner.with_game(game_id, |game| Arc::clone(&game.artifacts))?;
        Ok(self.inner.cache.get_or_build(game_id, &artifacts)?)
    }

    pub fn game_ids(&self) -> Vec<GameId> {
        self.inner.games_read().keys().cloned().collect()
    }

    /// Removes a game after its queued work has run and returns its final
    /// state.
    pub async fn remove_game(&self, game_id: &str) -> Result<StateTree> {
        self.ensure_registered(game_id)?;
        let inner = Arc::clone(&self.inner);
        let id = game_id.to_owned();

        let removed = self
            .inner
            .queue
            .enqueue(game_id.to_owned(), move || async move {
                inner.games_write().remove(&id)
            })
            .await?;

        self.inner.queue.release(&game_id.to_owned());
        self.inner.cache.invalidate(game_id);

        let game = removed.ok_or_else(|| RuntimeError::UnknownGame {
            game_id: game_id.to_owned(),
        })?;
        info!(game_id, phase = %game.phase, "removed game");
        Ok(game.state)
    }

    /// Shutdown the runtime gracefully, draining every game queue.
    pub async fn shutdown(self) -> Result<()> {
        self.inner.queue.shutdown().await?;
        Ok(())
    }

    async fn run(&self, game_id: &str, work: Work) -> Result<BatchOutcome> {
        self.ensure_registered(game_id)?;
        let inner = Arc::clone(&self.inner);
        let id = game_id.to_owned();

        self.inner
            .queue
            .enqueue(game_id.to_owned(), move || async move { inner.process(&id, work) })
            .await?
    }

    fn ensure_registered(&self, game_id: &str) -> Result<()> {
        self.inner.with_game(game_id, |_| ())
    }
}

impl Inner {
    /// One serialized unit: rng, templates and mutations, then automatic
    /// transitions. State is committed after the batch and after every fired
    /// transition.
    fn process(&self, game_id: &str, work: Work) -> Result<BatchOutcome> {
        let (artifacts, state, mut phase) = self.with_game(game_id, |game| {
            (
                Arc::clone(&game.artifacts),
                game.state.clone(),
                game.phase.clone(),
            )
        })?;
        let graph = self.cache.get_or_build(game_id, &artifacts)?;
        let mut messages = Vec::new();

        let (mut state, variables, mut random) = match work {
            Work::Batch(request) => {
                let mut random = rng::source_for(request.seed.or(self.config.default_seed));
                let state = self.apply_batch(
                    &state,
                    request.operations,
                    &request.variables,
                    random.as_mut(),
                )?;
                (state, request.variables, random)
            }
            Work::PhaseAction { variables, seed } => {
                let mut random = rng::source_for(seed.or(self.config.default_seed));
                let state = match artifacts.instructions.for_phase(&phase) {
                    Some(body) => {
                        let (state, rendered) =
                            self.apply_instructions(&state, body, &variables, random.as_mut())?;
                        messages.push(EmittedMessages {
                            source: phase.clone(),
                            messages: rendered,
                        });
                        state
                    }
                    None => {
                        debug!(game_id, %phase, "phase has no instructions");
                        state
                    }
                };
                (state, variables, random)
            }
        };
        self.commit(game_id, &state, &phase);

        let mut fired: Vec<String> = Vec::new();
        let mut checks = Vec::new();
        while let Some(transition) = next_transition(
            &graph,
            &phase,
            &state,
            &variables,
            &fired,
            &mut checks,
            &self.config.engine,
        ) {
            if let Some(body) = artifacts.instructions.for_transition(&transition.id) {
                let (next, rendered) = self
                    .apply_instructions(&state, body, &variables, random.as_mut())
                    .map_err(|source| RuntimeError::Transition {
                        transition: transition.id.clone(),
                        source,
                    })?;
                state = next;
                messages.push(EmittedMessages {
                    source: transition.id.clone(),
                    messages: rendered,
                });
            }

            debug!(
                game_id,
                transition = %transition.id,
                from = %phase,
                to = %transition.to,
                "fired transition"
            );
            phase = transition.to.clone();
            fired.push(transition.id.clone());
            self.commit(game_id, &state, &phase);

            let awaits_input = graph.phase(&phase).is_some_and(|p| p.requires_player_input);
            if awaits_input || phase == graph.terminal_phase() {
                break;
            }
        }

        Ok(BatchOutcome {
            state,
            phase,
            fired,
            checks,
            messages,
        })
    }

    /// rng resolution, template pre-pass, then the interpreter.
    fn apply_batch(
        &self,
        state: &StateTree,
        mut operations: Vec<Operation>,
        variables: &Map<String, Value>,
        source: &mut dyn RandomSource,
    ) -> std::result::Result<StateTree, engine_core::MutationError> {
        rng::resolve_randomness_with(&mut operations, source, &self.config.engine);
        let operations = template::resolve_operations(&operations, variables);
        for path in operations.iter().flat_map(Operation::target_paths) {
            if template::has_placeholder(path) {
                warn!(%path, "operation path still holds a placeholder");
            }
        }
        apply_operations(state, &operations)
    }

    /// Applies an instruction body. A rendered public message is written to
    /// `game.publicMessage` as part of the same batch.
    fn apply_instructions(
        &self,
        state: &StateTree,
        body: &Instructions,
        variables: &Map<String, Value>,
        source: &mut dyn RandomSource,
    ) -> std::result::Result<(StateTree, RenderedMessages), engine_core::MutationError> {
        let rendered = body.render_messages(variables);
        let mut operations = body.operations.clone();
        if let Some(message) = &rendered.public {
            operations.push(Operation::set(
                format!("{}.{}", fields::GAME, fields::PUBLIC_MESSAGE),
                Value::String(message.clone()),
            ));
        }

        let state = self.apply_batch(state, operations, variables, source)?;
        Ok((state, rendered))
    }

    fn replace_artifacts(
        &self,
        game_id: &str,
        artifacts: GameArtifacts,
    ) -> Result<Arc<TransitionGraph>> {
        let graph = self.cache.rebuild(game_id, &artifacts)?;

        let mut games = self.games_write();
        let game = games
            .get_mut(game_id)
            .ok_or_else(|| RuntimeError::UnknownGame {
                game_id: game_id.to_owned(),
            })?;
        if graph.phase(&game.phase).is_none() {
            warn!(game_id, phase = %game.phase, "current phase missing from new artifacts");
        }
        game.artifacts = Arc::new(artifacts);

        info!(game_id, "replaced game artifacts");
        Ok(graph)
    }

    fn commit(&self, game_id: &str, state: &StateTree, phase: &str) {
        if let Some(game) = self.games_write().get_mut(game_id) {
            game.state = state.clone();
            game.phase = phase.to_owned();
        }
    }

    fn with_game<R>(&self, game_id: &str, read: impl FnOnce(&GameInstance) -> R) -> Result<R> {
        self.games_read()
            .get(game_id)
            .map(read)
            .ok_or_else(|| RuntimeError::UnknownGame {
                game_id: game_id.to_owned(),
            })
    }

    fn games_read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<GameId, GameInstance>> {
        self.games.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn games_write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<GameId, GameInstance>> {
        self.games.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// First outgoing transition of `phase`, in declaration order, whose
/// preconditions all hold. Each transition fires at most once per unit, and
/// deferred preconditions never hold here.
fn next_transition<'g>(
    graph: &'g TransitionGraph,
    phase: &str,
    state: &StateTree,
    variables: &Map<String, Value>,
    fired: &[String],
    checks: &mut Vec<TransitionCheck>,
    config: &EngineConfig,
) -> Option<&'g Transition> {
    let mut context = GuardContext::from_state(state);
    context.variables = variables.clone();

    for transition in graph.transitions_from(phase) {
        if fired.contains(&transition.id) {
            continue;
        }
        let report = evaluate_preconditions_with(&transition.preconditions, &context, config);
        let satisfied = report.all_satisfied();
        checks.push(TransitionCheck {
            transition: transition.id.clone(),
            report,
        });
        if satisfied {
            return Some(transition);
        }
    }
    None
}

/// Builder for [`Runtime`] with flexible configuration.
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    cache: Option<GraphCache>,
}

impl RuntimeBuilder {
    fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
            cache: None,
        }
    }

    /// Override runtime configuration
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Share an existing graph cache instead of creating one.
    pub fn graph_cache(mut self, cache: GraphCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Build the runtime. Queue workers are spawned lazily, per game.
    pub fn build(self) -> Runtime {
        let queue = ActionQueue::new(self.config.queue.clone());
        Runtime {
            inner: Arc::new(Inner {
                config: self.config,
                games: RwLock::new(HashMap::new()),
                cache: self.cache.unwrap_or_default(),
                queue,
            }),
        }
    }
}
