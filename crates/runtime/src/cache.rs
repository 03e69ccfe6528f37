//! Transition-graph cache keyed by game instance.
//!
//! Entries remember the artifact fingerprint they were built from, so a
//! lookup with changed artifacts rebuilds instead of serving a stale graph.
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use engine_core::{Fingerprint, GameArtifacts, GraphError, TransitionGraph};

struct CacheEntry {
    fingerprint: Fingerprint,
    graph: Arc<TransitionGraph>,
}

/// Shared, read-mostly map of built graphs.
#[derive(Clone, Default)]
pub struct GraphCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl GraphCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached graph for `game_id` when it was built from
    /// structurally identical artifacts, otherwise builds and publishes one.
    ///
    /// Building happens outside the lock; when two callers race on the same
    /// inputs the first published graph wins and both get it.
    pub fn get_or_build(
        &self,
        game_id: &str,
        artifacts: &GameArtifacts,
    ) -> Result<Arc<TransitionGraph>, GraphError> {
        let fingerprint = artifacts.fingerprint();

        if let Some(entry) = self.read().get(game_id)
            && entry.fingerprint == fingerprint
        {
            debug!(game_id, fingerprint = %fingerprint.short(), "graph cache hit");
            return Ok(Arc::clone(&entry.graph));
        }

        let graph = Arc::new(TransitionGraph::from_artifacts(artifacts)?);

        let mut entries = self.write();
        match entries.entry(game_id.to_owned()) {
            Entry::Occupied(existing) if existing.get().fingerprint == fingerprint => {
                Ok(Arc::clone(&existing.get().graph))
            }
            Entry::Occupied(mut stale) => {
                debug!(game_id, fingerprint = %fingerprint.short(), "replaced stale graph");
                stale.insert(CacheEntry {
                    fingerprint,
                    graph: Arc::clone(&graph),
                });
                Ok(graph)
            }
            Entry::Vacant(slot) => {
                debug!(game_id, fingerprint = %fingerprint.short(), "cached new graph");
                slot.insert(CacheEntry {
                    fingerprint,
                    graph: Arc::clone(&graph),
                });
                Ok(graph)
            }
        }
    }

    /// Builds a graph from `artifacts` and replaces whatever is cached for
    /// `game_id`. On a build error the existing entry is kept.
    pub fn rebuild(
        &self,
        game_id: &str,
        artifacts: &GameArtifacts,
    ) -> Result<Arc<TransitionGraph>, GraphError> {
        let fingerprint = artifacts.fingerprint();
        let graph = Arc::new(TransitionGraph::from_artifacts(artifacts)?);

        self.write().insert(
            game_id.to_owned(),
            CacheEntry {
                fingerprint,
                graph: Arc::clone(&graph),
            },
        );
        debug!(game_id, fingerprint = %fingerprint.short(), "rebuilt graph");
        Ok(graph)
    }

    /// Cached graph for `game_id`, whatever it was built from.
    pub fn get(&self, game_id: &str) -> Option<Arc<TransitionGraph>> {
        self.read().get(game_id).map(|entry| Arc::clone(&entry.graph))
    }

    /// Drops the entry for `game_id`. Returns whether one existed.
    pub fn invalidate(&self, game_id: &str) -> bool {
        self.write().remove(game_id).is_some()
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_core::{Phase, Transition};

    fn artifacts(to: &str) -> GameArtifacts {
        GameArtifacts::new(
            vec![Phase::new("init"), Phase::new("play"), Phase::new("finished")],
            vec![Transition::new("go", "init", to)],
        )
    }

    #[test]
    fn unchanged_artifacts_share_one_graph() {
        let cache = GraphCache::new();
        let first = cache.get_or_build("g1", &artifacts("play")).unwrap();
        let second = cache.get_or_build("g1", &artifacts("play")).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn changed_artifacts_rebuild() {
        let cache = GraphCache::new();
        let first = cache.get_or_build("g1", &artifacts("play")).unwrap();
        let second = cache.get_or_build("g1", &artifacts("finished")).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(second.is_reachable_from_init("finished"));
    }

    #[test]
    fn games_are_cached_independently() {
        let cache = GraphCache::new();
        let a = cache.get_or_build("a", &artifacts("play")).unwrap();
        let b = cache.get_or_build("b", &artifacts("play")).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));

        assert!(cache.invalidate("a"));
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn build_errors_are_not_cached() {
        let cache = GraphCache::new();
        let broken = GameArtifacts::new(
            vec![Phase::new("init")],
            vec![Transition::new("x", "init", "nowhere")],
        );
        assert!(cache.get_or_build("g", &broken).is_err());
        assert!(cache.is_empty());

        let kept = cache.get_or_build("g", &artifacts("play")).unwrap();
        assert!(cache.rebuild("g", &broken).is_err());
        assert!(Arc::ptr_eq(&kept, &cache.get("g").unwrap()));
    }
}
