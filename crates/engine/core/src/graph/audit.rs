//! Soundness audit over a built graph.

use super::{PhasePath, TransitionGraph};

/// A soundness finding. Findings are advisory; the graph stays usable.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GraphDiagnostic {
    #[error("entry phase `{phase}` is not declared")]
    MissingEntryPhase { phase: String },

    #[error("terminal phase `{phase}` is not declared")]
    MissingTerminalPhase { phase: String },

    #[error("phase `{phase}` is unreachable from the entry phase")]
    UnreachablePhase { phase: String },

    #[error("no path leads from the entry phase to the terminal phase")]
    NoTerminalPath,

    #[error("field `{field}` is not set along {}", .path.transitions.join(" -> "))]
    FieldNotSetOnPath { field: String, path: PhasePath },
}

/// Certifies that the entry and terminal phases exist, every phase is
/// reachable, the terminal phase can be reached and each of
/// `required_fields` is written on every entry-to-terminal path.
pub fn audit(graph: &TransitionGraph, required_fields: &[&str]) -> Vec<GraphDiagnostic> {
    let mut diagnostics = Vec::new();
    let entry = graph.entry_phase();
    let terminal = graph.terminal_phase();

    if graph.phase(entry).is_none() {
        diagnostics.push(GraphDiagnostic::MissingEntryPhase {
            phase: entry.to_owned(),
        });
    }
    if graph.phase(terminal).is_none() {
        diagnostics.push(GraphDiagnostic::MissingTerminalPhase {
            phase: terminal.to_owned(),
        });
    }
    if !diagnostics.is_empty() {
        return diagnostics;
    }

    diagnostics.extend(
        graph
            .unreachable_phases()
            .into_iter()
            .map(|phase| GraphDiagnostic::UnreachablePhase {
                phase: phase.to_owned(),
            }),
    );

    let paths = graph.all_paths(entry, terminal);
    if paths.is_empty() {
        diagnostics.push(GraphDiagnostic::NoTerminalPath);
        return diagnostics;
    }

    for field in required_fields {
        for path in &paths {
            if !graph.path_sets_field(path, field) {
                diagnostics.push(GraphDiagnostic::FieldNotSetOnPath {
                    field: (*field).to_owned(),
                    path: path.clone(),
                });
            }
        }
    }

    tracing::debug!(
        findings = diagnostics.len(),
        paths = paths.len(),
        "audited transition graph"
    );
    diagnostics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{InstructionSet, Instructions, Phase, Transition};
    use crate::mutation::Operation;
    use serde_json::json;

    fn graph(with_winner_on_forfeit: bool) -> TransitionGraph {
        let mut instructions = InstructionSet::default();
        instructions.transitions.insert(
            "win".into(),
            Instructions::new(vec![Operation::set("game.winner", json!("p1"))]),
        );
        if with_winner_on_forfeit {
            instructions.transitions.insert(
                "forfeit".into(),
                Instructions::new(vec![Operation::set("game.winner", json!("p2"))]),
            );
        }

        TransitionGraph::build(
            &[Phase::new("init"), Phase::new("play"), Phase::new("finished")],
            &[
                Transition::new("start", "init", "play"),
                Transition::new("win", "play", "finished"),
                Transition::new("forfeit", "play", "finished"),
            ],
            Some(&instructions),
        )
        .unwrap()
    }

    #[test]
    fn sound_graph_has_no_findings() {
        assert!(audit(&graph(true), &["game.winner"]).is_empty());
    }

    #[test]
    fn reports_paths_missing_a_required_field() {
        let findings = audit(&graph(false), &["game.winner"]);
        assert_eq!(findings.len(), 1);
        let GraphDiagnostic::FieldNotSetOnPath { field, path } = &findings[0] else {
            panic!("unexpected finding {:?}", findings[0]);
        };
        assert_eq!(field, "game.winner");
        assert_eq!(path.transitions, vec!["start", "forfeit"]);
    }

    #[test]
    fn reports_missing_conventional_phases() {
        let graph = TransitionGraph::build(&[Phase::new("lobby")], &[], None).unwrap();
        let findings = audit(&graph, &[]);
        assert!(matches!(findings[0], GraphDiagnostic::MissingEntryPhase { .. }));
        assert!(matches!(findings[1], GraphDiagnostic::MissingTerminalPhase { .. }));
    }

    #[test]
    fn reports_unreachable_and_dead_ends() {
        let graph = TransitionGraph::build(
            &[Phase::new("init"), Phase::new("island"), Phase::new("finished")],
            &[],
            None,
        )
        .unwrap();
        let findings = audit(&graph, &[]);
        assert!(findings.contains(&GraphDiagnostic::UnreachablePhase {
            phase: "island".into()
        }));
        assert!(findings.contains(&GraphDiagnostic::NoTerminalPath));
    }
}
