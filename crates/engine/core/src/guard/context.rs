use std::collections::BTreeMap;

use serde_json::{Map, Value};

use super::GuardDiagnostic;
use crate::state::{PlayerId, StateTree, fields, value_kind};

/// Typed evaluation context for guards.
///
/// Expressions see it as `{"game": .., "players": .., ..variables}`; extra
/// variables never shadow the two sections.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GuardContext {
    pub game: Map<String, Value>,
    pub players: BTreeMap<PlayerId, Map<String, Value>>,
    pub variables: Map<String, Value>,
}

impl GuardContext {
    /// Builds a context from a state tree. Non-object player records are
    /// skipped; use [`GuardContext::from_value`] to have them reported.
    pub fn from_state(state: &StateTree) -> Self {
        let game = state.game().cloned().unwrap_or_default();
        let players = state
            .players()
            .map(|players| {
                players
                    .iter()
                    .filter_map(|(id, record)| Some((id.clone(), record.as_object()?.clone())))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            game,
            players,
            variables: Map::new(),
        }
    }

    /// Builds a context from a raw value, reporting every structural problem.
    pub fn from_value(value: &Value) -> Result<Self, Vec<GuardDiagnostic>> {
        let Value::Object(root) = value else {
            return Err(vec![GuardDiagnostic::Context {
                field: "$".into(),
                reason: format!("expected object, got {}", value_kind(value)),
            }]);
        };

        let mut diagnostics = Vec::new();
        let mut context = GuardContext::default();

        match root.get(fields::GAME) {
            None => {}
            Some(Value::Object(game)) => context.game = game.clone(),
            Some(other) => diagnostics.push(GuardDiagnostic::Context {
                field: fields::GAME.into(),
                reason: format!("expected object, got {}", value_kind(other)),
            }),
        }

        match root.get(fields::PLAYERS) {
            None => {}
            Some(Value::Object(players)) => {
                for (id, record) in players {
                    match record {
                        Value::Object(record) => {
                            context.players.insert(id.clone(), record.clone());
                        }
                        other => diagnostics.push(GuardDiagnostic::Context {
                            field: format!("{}.{id}", fields::PLAYERS),
                            reason: format!("expected object, got {}", value_kind(other)),
                        }),
                    }
                }
            }
            Some(other) => diagnostics.push(GuardDiagnostic::Context {
                field: fields::PLAYERS.into(),
                reason: format!("expected object, got {}", value_kind(other)),
            }),
        }

        context.variables = root
            .iter()
            .filter(|(key, _)| key.as_str() != fields::GAME && key.as_str() != fields::PLAYERS)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        if diagnostics.is_empty() {
            Ok(context)
        } else {
            Err(diagnostics)
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    /// JSON view of the context used as the root data scope.
    pub(crate) fn to_data(&self) -> Value {
        let mut root = self.variables.clone();
        root.insert(fields::GAME.into(), Value::Object(self.game.clone()));
        root.insert(
            fields::PLAYERS.into(),
            Value::Object(
                self.players
                    .iter()
                    .map(|(id, record)| (id.clone(), Value::Object(record.clone())))
                    .collect(),
            ),
        );
        Value::Object(root)
    }
}
