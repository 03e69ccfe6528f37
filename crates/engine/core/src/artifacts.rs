//! Game artifacts: phases, transitions and the instructions attached to them.
//!
//! Artifacts are produced ahead of time and are immutable once handed to the
//! engine. [`GameArtifacts::fingerprint`] gives a structural identity used to
//! detect when a game's artifacts change.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Value};

use crate::mutation::Operation;
use crate::template;

/// A node of the transition graph.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Phase {
    pub name: String,
    #[serde(default)]
    pub requires_player_input: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Phase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            requires_player_input: false,
            description: None,
        }
    }

    pub fn with_player_input(mut self) -> Self {
        self.requires_player_input = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

fn deterministic_default() -> bool {
    true
}

/// A named guard on a transition.
///
/// Deterministic preconditions carry JSON-logic in `logic`. Non-deterministic
/// ones need an outside judgement and only carry an explanation.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Precondition {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logic: Option<Value>,
    #[serde(default = "deterministic_default")]
    pub deterministic: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

impl Precondition {
    pub fn deterministic(id: impl Into<String>, logic: Value) -> Self {
        Self {
            id: id.into(),
            logic: Some(logic),
            deterministic: true,
            explanation: None,
        }
    }

    pub fn judged(id: impl Into<String>, explanation: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            logic: None,
            deterministic: false,
            explanation: Some(explanation.into()),
        }
    }
}

/// A directed edge between two phases.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    pub id: String,
    pub from: String,
    pub to: String,
    /// State fields the preconditions read.
    #[serde(default)]
    pub checked_fields: Vec<String>,
    #[serde(default)]
    pub preconditions: Vec<Precondition>,
}

impl Transition {
    pub fn new(id: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            from: from.into(),
            to: to.into(),
            checked_fields: Vec::new(),
            preconditions: Vec::new(),
        }
    }

    pub fn with_precondition(mut self, precondition: Precondition) -> Self {
        self.preconditions.push(precondition);
        self
    }

    pub fn with_checked_field(mut self, field: impl Into<String>) -> Self {
        self.checked_fields.push(field.into());
        self
    }
}

/// Operations and messages attached to a phase or a transition.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instructions {
    #[serde(default)]
    pub operations: Vec<Operation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_message: Option<String>,
    /// Per-player message template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_message: Option<String>,
}

/// Messages after template rendering.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct RenderedMessages {
    pub public: Option<String>,
    pub private: Option<String>,
}

impl Instructions {
    pub fn new(operations: Vec<Operation>) -> Self {
        Self {
            operations,
            ..Self::default()
        }
    }

    pub fn with_public_message(mut self, message: impl Into<String>) -> Self {
        self.public_message = Some(message.into());
        self
    }

    pub fn with_private_message(mut self, message: impl Into<String>) -> Self {
        self.private_message = Some(message.into());
        self
    }

    pub fn render_messages(&self, variables: &Map<String, Value>) -> RenderedMessages {
        RenderedMessages {
            public: self
                .public_message
                .as_deref()
                .map(|m| template::render(m, variables)),
            private: self
                .private_message
                .as_deref()
                .map(|m| template::render(m, variables)),
        }
    }
}

/// Instructions keyed by phase name (player actions) and transition id
/// (automatic effects).
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct InstructionSet {
    #[serde(default)]
    pub phases: BTreeMap<String, Instructions>,
    #[serde(default)]
    pub transitions: BTreeMap<String, Instructions>,
}

impl InstructionSet {
    pub fn for_phase(&self, phase: &str) -> Option<&Instructions> {
        self.phases.get(phase)
    }

    pub fn for_transition(&self, id: &str) -> Option<&Instructions> {
        self.transitions.get(id)
    }
}

/// Everything the engine needs to run one game.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GameArtifacts {
    pub phases: Vec<Phase>,
    pub transitions: Vec<Transition>,
    #[serde(default)]
    pub instructions: InstructionSet,
}

impl GameArtifacts {
    pub fn new(phases: Vec<Phase>, transitions: Vec<Transition>) -> Self {
        Self {
            phases,
            transitions,
            instructions: InstructionSet::default(),
        }
    }

    pub fn with_instructions(mut self, instructions: InstructionSet) -> Self {
        self.instructions = instructions;
        self
    }

    /// SHA-256 over the canonical JSON form.
    ///
    /// Object keys serialize in sorted order, so equal artifacts always hash
    /// equal regardless of how they were built.
    pub fn fingerprint(&self) -> Fingerprint {
        use sha2::{Digest, Sha256};

        let bytes = serde_json::to_vec(self).expect("artifact serialization should not fail");
        Fingerprint(Sha256::digest(&bytes).into())
    }
}

/// Structural identity of a [`GameArtifacts`] value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First 8 hex characters, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> GameArtifacts {
        GameArtifacts::new(
            vec![Phase::new("init"), Phase::new("play").with_player_input(), Phase::new("finished")],
            vec![
                Transition::new("start", "init", "play"),
                Transition::new("end", "play", "finished").with_precondition(
                    Precondition::deterministic("over", json!({"var": "game.gameEnded"})),
                ),
            ],
        )
    }

    #[test]
    fn fingerprint_is_structural() {
        let a = sample();
        let b = sample();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().to_string().len(), 64);
        assert_eq!(a.fingerprint().short().len(), 8);

        let mut changed = sample();
        changed.transitions[0].to = "finished".into();
        assert_ne!(a.fingerprint(), changed.fingerprint());
    }

    #[test]
    fn deserializes_authored_artifacts() {
        let artifacts: GameArtifacts = serde_json::from_value(json!({
            "phases": [{"name": "init"}, {"name": "play", "requiresPlayerInput": true}],
            "transitions": [{
                "id": "start", "from": "init", "to": "play",
                "checkedFields": ["game.round"],
                "preconditions": [
                    {"id": "fresh", "logic": {"==": [{"var": "game.round"}, 0]}},
                    {"id": "vibe", "deterministic": false, "explanation": "players are ready"}
                ]
            }],
            "instructions": {
                "transitions": {"start": {
                    "operations": [{"op": "set", "path": "game.round", "value": 1}],
                    "publicMessage": "Round {{round}} begins"
                }}
            }
        }))
        .unwrap();

        assert!(artifacts.phases[1].requires_player_input);
        let preconditions = &artifacts.transitions[0].preconditions;
        assert!(preconditions[0].deterministic);
        assert!(!preconditions[1].deterministic);

        let instructions = artifacts.instructions.for_transition("start").unwrap();
        let mut variables = Map::new();
        variables.insert("round".into(), json!(1));
        assert_eq!(
            instructions.render_messages(&variables).public.as_deref(),
            Some("Round 1 begins")
        );
    }
}
