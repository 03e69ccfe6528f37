//! Randomness resolution.
//!
//! `rng` operations are rewritten into plain `set` operations before a batch
//! reaches the interpreter. With a seed every draw comes from one
//! [`SeededLcg`] stream, so the same seed and batch always pick the same
//! outcomes. Without one, [`ThreadRandom`] is used.

use rand::Rng;
use serde_json::Value;
use tracing::{trace, warn};

use crate::config::EngineConfig;
use crate::mutation::Operation;

/// Source of uniform draws in `[0, 1)`.
pub trait RandomSource {
    fn next_f64(&mut self) -> f64;
}

/// 64-bit linear congruential generator.
///
/// Uses the same constants as PCG's underlying LCG. The top 53 bits of each
/// state become the mantissa of the draw.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeededLcg {
    state: u64,
}

impl SeededLcg {
    const MULTIPLIER: u64 = 6364136223846793005;
    const INCREMENT: u64 = 1442695040888963407;

    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(Self::MULTIPLIER)
            .wrapping_add(Self::INCREMENT);
        self.state
    }
}

impl RandomSource for SeededLcg {
    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }
}

/// Non-deterministic source backed by the thread-local generator.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_f64(&mut self) -> f64 {
        rand::thread_rng().r#gen::<f64>()
    }
}

/// Seeded LCG when `seed` is given, thread randomness otherwise.
pub fn source_for(seed: Option<u64>) -> Box<dyn RandomSource + Send> {
    match seed {
        Some(seed) => Box::new(SeededLcg::new(seed)),
        None => Box::new(ThreadRandom),
    }
}

/// Picks one of `choices` with the given weights.
///
/// Walks cumulative weights against a single draw; floating-point shortfall
/// falls through to the last choice. Returns `None` only for empty input.
pub fn select_weighted<'a>(
    choices: &'a [Value],
    probabilities: &[f64],
    source: &mut dyn RandomSource,
) -> Option<&'a Value> {
    let draw = source.next_f64();
    let mut cumulative = 0.0;

    for (choice, weight) in choices.iter().zip(probabilities) {
        cumulative += weight;
        if draw < cumulative {
            return Some(choice);
        }
    }
    choices.last()
}

/// Rewrites every `rng` operation in place into a `set` of the chosen value.
/// Other operations are untouched. Returns the number of rewrites.
pub fn resolve_randomness(operations: &mut [Operation], seed: Option<u64>) -> usize {
    let mut source = source_for(seed);
    resolve_randomness_with(operations, source.as_mut(), &EngineConfig::default())
}

/// [`resolve_randomness`] with an explicit source and tolerance.
pub fn resolve_randomness_with(
    operations: &mut [Operation],
    source: &mut dyn RandomSource,
    config: &EngineConfig,
) -> usize {
    let mut rewritten = 0;

    for operation in operations.iter_mut() {
        let Operation::Rng {
            path,
            choices,
            probabilities,
        } = operation
        else {
            continue;
        };

        if choices.is_empty() || choices.len() != probabilities.len() {
            warn!(
                %path,
                choices = choices.len(),
                probabilities = probabilities.len(),
                "leaving malformed rng operation unresolved"
            );
            continue;
        }

        let total: f64 = probabilities.iter().sum();
        if (total - 1.0).abs() > config.probability_tolerance {
            warn!(%path, total, "rng probabilities do not sum to 1.0");
        }

        let Some(choice) = select_weighted(choices, probabilities, source).cloned() else {
            continue;
        };

        trace!(%path, %choice, "resolved rng");
        *operation = Operation::Set {
            path: std::mem::take(path),
            value: choice,
        };
        rewritten += 1;
    }

    rewritten
}
