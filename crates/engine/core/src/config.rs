/// Engine configuration constants and tunable parameters.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Accepted deviation of rng probability weights from 1.0 before a
    /// warning is logged.
    pub probability_tolerance: f64,

    /// Deepest guard expression nesting the evaluator will descend into.
    pub max_guard_depth: usize,
}

impl EngineConfig {
    // ===== fixed conventions =====
    /// Entry phase every game starts in.
    pub const ENTRY_PHASE: &'static str = "init";
    /// Terminal phase that ends a game.
    pub const TERMINAL_PHASE: &'static str = "finished";

    // ===== runtime-tunable defaults =====
    pub const PROBABILITY_TOLERANCE: f64 = 0.01;
    pub const MAX_GUARD_DEPTH: usize = 64;

    pub fn new() -> Self {
        Self {
            probability_tolerance: Self::PROBABILITY_TOLERANCE,
            max_guard_depth: Self::MAX_GUARD_DEPTH,
        }
    }

    pub fn with_probability_tolerance(mut self, tolerance: f64) -> Self {
        self.probability_tolerance = tolerance;
        self
    }

    pub fn with_max_guard_depth(mut self, depth: usize) -> Self {
        self.max_guard_depth = depth;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}
