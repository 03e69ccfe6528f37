//! Transition graph analysis.
//!
//! A [`TransitionGraph`] is built once from a game's phases, transitions and
//! instructions and is read-only afterwards. Queries never modify the inputs
//! it was built from.

mod audit;
mod fields;

pub use audit::{GraphDiagnostic, audit};

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::OnceLock;

use tracing::debug;

use crate::artifacts::{GameArtifacts, InstructionSet, Phase, Transition};
use crate::config::EngineConfig;
use crate::error::{EngineError, ErrorSeverity};

// ============================================================================
// Errors
// ============================================================================

/// One structural problem in graph input.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum GraphIssue {
    #[error("phase `{name}` is declared more than once")]
    DuplicatePhase { name: String },

    #[error("transition id `{id}` is declared more than once")]
    DuplicateTransition { id: String },

    #[error("transition `{transition}` references unknown phase `{phase}`")]
    UnknownPhase { transition: String, phase: String },
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("malformed transition graph: {} issue(s)", .issues.len())]
    Invalid { issues: Vec<GraphIssue> },
}

impl GraphError {
    pub fn issues(&self) -> &[GraphIssue] {
        match self {
            GraphError::Invalid { issues } => issues,
        }
    }
}

impl EngineError for GraphError {
    fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::Validation
    }

    fn error_code(&self) -> &'static str {
        "GRAPH_INVALID"
    }
}

// ============================================================================
// Graph
// ============================================================================

/// One route through the graph: the phases visited and the transitions taken
/// between them (`transitions.len() + 1 == phases.len()`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, serde::Serialize)]
pub struct PhasePath {
    pub phases: Vec<String>,
    pub transitions: Vec<String>,
}

#[derive(Debug)]
pub struct TransitionGraph {
    phases: Vec<Phase>,
    transitions: Vec<Transition>,
    phase_index: HashMap<String, usize>,
    /// Outgoing transition indices per phase, in declaration order.
    outgoing: HashMap<String, Vec<usize>>,
    /// Fields written by each transition's instructions, by transition index.
    writes: Vec<Vec<String>>,
    reachable: OnceLock<HashSet<String>>,
}

impl TransitionGraph {
    /// Builds the graph, reporting every structural issue at once.
    pub fn build(
        phases: &[Phase],
        transitions: &[Transition],
        instructions: Option<&InstructionSet>,
    ) -> Result<Self, GraphError> {
        let mut issues = Vec::new();

        let mut phase_index = HashMap::with_capacity(phases.len());
        for (index, phase) in phases.iter().enumerate() {
            if phase_index.insert(phase.name.clone(), index).is_some() {
                issues.push(GraphIssue::DuplicatePhase {
                    name: phase.name.clone(),
                });
            }
        }

        let mut seen_ids = HashSet::with_capacity(transitions.len());
        let mut outgoing: HashMap<String, Vec<usize>> = HashMap::new();
        for (index, transition) in transitions.iter().enumerate() {
            if !seen_ids.insert(transition.id.as_str()) {
                issues.push(GraphIssue::DuplicateTransition {
                    id: transition.id.clone(),
                });
            }
            for end in [&transition.from, &transition.to] {
                if !phase_index.contains_key(end) {
                    issues.push(GraphIssue::UnknownPhase {
                        transition: transition.id.clone(),
                        phase: end.clone(),
                    });
                }
            }
            outgoing
                .entry(transition.from.clone())
                .or_default()
                .push(index);
        }

        if !issues.is_empty() {
            return Err(GraphError::Invalid { issues });
        }

        let writes = transitions
            .iter()
            .map(|transition| {
                instructions
                    .and_then(|set| set.for_transition(&transition.id))
                    .map(|body| fields::written_fields(&body.operations))
                    .unwrap_or_default()
            })
            .collect();

        debug!(
            phases = phases.len(),
            transitions = transitions.len(),
            "built transition graph"
        );

        Ok(Self {
            phases: phases.to_vec(),
            transitions: transitions.to_vec(),
            phase_index,
            outgoing,
            writes,
            reachable: OnceLock::new(),
        })
    }

    pub fn from_artifacts(artifacts: &GameArtifacts) -> Result<Self, GraphError> {
        Self::build(
            &artifacts.phases,
            &artifacts.transitions,
            Some(&artifacts.instructions),
        )
    }

    pub fn entry_phase(&self) -> &'static str {
        EngineConfig::ENTRY_PHASE
    }

    pub fn terminal_phase(&self) -> &'static str {
        EngineConfig::TERMINAL_PHASE
    }

    pub fn phase(&self, name: &str) -> Option<&Phase> {
        self.phase_index.get(name).map(|&index| &self.phases[index])
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn transition(&self, id: &str) -> Option<&Transition> {
        self.transitions.iter().find(|t| t.id == id)
    }

    /// Outgoing transitions of `phase` in declaration order.
    pub fn transitions_from(&self, phase: &str) -> impl Iterator<Item = &Transition> {
        self.outgoing
            .get(phase)
            .into_iter()
            .flatten()
            .map(|&index| &self.transitions[index])
    }

    /// Every simple path from `source` to `destination`.
    ///
    /// The visited set is scoped to the current path, so a phase may appear
    /// on many paths but never twice on one.
    pub fn all_paths(&self, source: &str, destination: &str) -> Vec<PhasePath> {
        if self.phase(source).is_none() || self.phase(destination).is_none() {
            return Vec::new();
        }
        if source == destination {
            return vec![PhasePath {
                phases: vec![source.to_owned()],
                transitions: Vec::new(),
            }];
        }

        let mut walk = PathWalk {
            destination,
            phases: vec![source],
            taken: Vec::new(),
            on_path: HashSet::from([source]),
            found: Vec::new(),
        };
        self.walk(source, &mut walk);
        walk.found
    }

    fn walk<'a>(&'a self, current: &'a str, walk: &mut PathWalk<'a>) {
        for transition in self.transitions_from(current) {
            let next = transition.to.as_str();

            if next == walk.destination {
                let mut phases: Vec<String> = walk.phases.iter().map(|p| (*p).to_owned()).collect();
                phases.push(next.to_owned());
                let mut transitions: Vec<String> =
                    walk.taken.iter().map(|t| (*t).to_owned()).collect();
                transitions.push(transition.id.clone());
                walk.found.push(PhasePath {
                    phases,
                    transitions,
                });
                continue;
            }
            if !walk.on_path.insert(next) {
                continue;
            }

            walk.phases.push(next);
            walk.taken.push(&transition.id);
            self.walk(next, walk);
            walk.taken.pop();
            walk.phases.pop();
            walk.on_path.remove(next);
        }
    }

    /// Transitions whose instructions write `field`.
    pub fn field_setters(&self, field: &str) -> Vec<&Transition> {
        self.transitions
            .iter()
            .zip(&self.writes)
            .filter(|(_, writes)| writes.iter().any(|w| fields::fields_match(w, field)))
            .map(|(transition, _)| transition)
            .collect()
    }

    /// Whether any transition on `path` writes `field`.
    pub fn path_sets_field(&self, path: &PhasePath, field: &str) -> bool {
        path.transitions.iter().any(|id| self.transition_sets_field(id, field))
    }

    fn transition_sets_field(&self, id: &str, field: &str) -> bool {
        self.transitions
            .iter()
            .zip(&self.writes)
            .filter(|(transition, _)| transition.id == id)
            .any(|(_, writes)| writes.iter().any(|w| fields::fields_match(w, field)))
    }

    /// Whether `phase` can be reached from the entry phase. The reachable set
    /// is computed on first use and shared afterwards.
    pub fn is_reachable_from_init(&self, phase: &str) -> bool {
        self.reachable_set().contains(phase)
    }

    /// Declared phases not reachable from the entry phase, in declaration
    /// order.
    pub fn unreachable_phases(&self) -> Vec<&str> {
        let reachable = self.reachable_set();
        self.phases
            .iter()
            .map(|phase| phase.name.as_str())
            .filter(|name| !reachable.contains(*name))
            .collect()
    }

    fn reachable_set(&self) -> &HashSet<String> {
        self.reachable.get_or_init(|| {
            let entry = self.entry_phase();
            let mut reachable = HashSet::new();
            if self.phase(entry).is_none() {
                return reachable;
            }

            let mut queue = VecDeque::from([entry]);
            reachable.insert(entry.to_owned());
            while let Some(current) = queue.pop_front() {
                for transition in self.transitions_from(current) {
                    if reachable.insert(transition.to.clone()) {
                        queue.push_back(&transition.to);
                    }
                }
            }
            reachable
        })
    }
}

struct PathWalk<'a> {
    destination: &'a str,
    phases: Vec<&'a str>,
    taken: Vec<&'a str>,
    on_path: HashSet<&'a str>,
    found: Vec<PhasePath>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::Instructions;
    use crate::mutation::Operation;
    use serde_json::json;

    fn phases(names: &[&str]) -> Vec<Phase> {
        names.iter().map(|name| Phase::new(*name)).collect()
    }

    #[test]
    fn paths_use_path_scoped_visited_set() {
        let graph = TransitionGraph::build(
            &phases(&["a", "b", "c"]),
            &[
                Transition::new("ab", "a", "b"),
                Transition::new("ba", "b", "a"),
                Transition::new("bc", "b", "c"),
            ],
            None,
        )
        .unwrap();

        let paths = graph.all_paths("a", "c");
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].phases, vec!["a", "b", "c"]);
        assert_eq!(paths[0].transitions, vec!["ab", "bc"]);

        assert!(graph.all_paths("c", "a").is_empty());
        assert_eq!(graph.all_paths("b", "b")[0].phases, vec!["b"]);
        assert!(graph.all_paths("a", "zzz").is_empty());
    }

    #[test]
    fn diamond_yields_every_route() {
        let graph = TransitionGraph::build(
            &phases(&["init", "left", "right", "finished"]),
            &[
                Transition::new("l", "init", "left"),
                Transition::new("r", "init", "right"),
                Transition::new("lf", "left", "finished"),
                Transition::new("rf", "right", "finished"),
                Transition::new("lr", "left", "right"),
            ],
            None,
        )
        .unwrap();

        let routes: Vec<Vec<String>> = graph
            .all_paths("init", "finished")
            .into_iter()
            .map(|p| p.transitions)
            .collect();
        assert_eq!(routes.len(), 3);
        assert!(routes.contains(&vec!["l".into(), "lr".into(), "rf".into()]));
    }

    #[test]
    fn reachability_requires_incoming_edges() {
        let graph = TransitionGraph::build(
            &phases(&["init", "play", "orphan", "finished"]),
            &[
                Transition::new("start", "init", "play"),
                Transition::new("end", "play", "finished"),
                Transition::new("stray", "orphan", "finished"),
            ],
            None,
        )
        .unwrap();

        assert!(graph.is_reachable_from_init("init"));
        assert!(graph.is_reachable_from_init("finished"));
        assert!(!graph.is_reachable_from_init("orphan"));
        assert!(!graph.is_reachable_from_init("unknown"));
        assert_eq!(graph.unreachable_phases(), vec!["orphan"]);
    }

    #[test]
    fn build_reports_every_issue() {
        let err = TransitionGraph::build(
            &phases(&["init", "init", "finished"]),
            &[
                Transition::new("t", "init", "finished"),
                Transition::new("t", "init", "nowhere"),
                Transition::new("u", "ghost", "finished"),
            ],
            None,
        )
        .unwrap_err();

        assert_eq!(
            err.issues(),
            &[
                GraphIssue::DuplicatePhase {
                    name: "init".into()
                },
                GraphIssue::DuplicateTransition { id: "t".into() },
                GraphIssue::UnknownPhase {
                    transition: "t".into(),
                    phase: "nowhere".into()
                },
                GraphIssue::UnknownPhase {
                    transition: "u".into(),
                    phase: "ghost".into()
                },
            ]
        );
    }

    #[test]
    fn init_play_finished_scenario() {
        let mut instructions = InstructionSet::default();
        instructions.transitions.insert(
            "start".into(),
            Instructions::new(vec![Operation::set("game.round", json!(1))]),
        );
        instructions.transitions.insert(
            "end".into(),
            Instructions::new(vec![Operation::set("game.winner", json!("{{pid}}"))]),
        );

        let graph = TransitionGraph::build(
            &[
                Phase::new("init"),
                Phase::new("play").with_player_input(),
                Phase::new("finished"),
            ],
            &[
                Transition::new("start", "init", "play"),
                Transition::new("end", "play", "finished"),
            ],
            Some(&instructions),
        )
        .unwrap();

        let setters: Vec<&str> = graph
            .field_setters("game.winner")
            .into_iter()
            .map(|t| t.id.as_str())
            .collect();
        assert_eq!(setters, vec!["end"]);

        let paths = graph.all_paths(graph.entry_phase(), graph.terminal_phase());
        assert_eq!(paths.len(), 1);
        assert!(graph.path_sets_field(&paths[0], "game.winner"));
        assert!(graph.path_sets_field(&paths[0], "game.round"));
        assert!(!graph.path_sets_field(&paths[0], "game.loser"));
        assert_eq!(
            graph
                .transitions_from("play")
                .map(|t| t.id.as_str())
                .collect::<Vec<_>>(),
            vec!["end"]
        );
    }
}
