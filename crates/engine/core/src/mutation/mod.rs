//! State mutation operations.
//!
//! An [`Operation`] is one atomic, typed change to a [`crate::StateTree`].
//! The kind set is closed and dispatched by exhaustive match in
//! [`apply_operations`]:
//!
//! | kind        | target requirement                    |
//! |-------------|----------------------------------------|
//! | `set`       | none; creates intermediate objects     |
//! | `increment` | existing number, resolved delta        |
//! | `append`    | existing array                         |
//! | `delete`    | none; no-op when the parent is absent  |
//! | `transfer`  | numeric source with enough balance     |
//! | `merge`     | absent or a non-array object           |
//! | `rng`       | never applied; resolve it first        |

mod apply;
mod error;

pub use apply::apply_operations;
pub use error::{MalformedOperation, MutationError, OperationError, OperationFailure};

use serde_json::{Map, Number, Value};

use crate::state::path;

/// Numeric amount as authored: either a number or a `{{placeholder}}` string
/// that template resolution is expected to replace.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum Amount {
    Number(Number),
    Template(String),
}

impl Amount {
    pub fn as_number(&self) -> Option<&Number> {
        match self {
            Amount::Number(n) => Some(n),
            Amount::Template(_) => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Amount::Number(_))
    }
}

impl From<i64> for Amount {
    fn from(value: i64) -> Self {
        Amount::Number(value.into())
    }
}

/// Operation kinds, used for logging and error codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum OperationKind {
    Set,
    Increment,
    Append,
    Delete,
    Transfer,
    Merge,
    Rng,
}

/// One atomic state change.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Operation {
    Set {
        path: String,
        value: Value,
    },
    Increment {
        path: String,
        value: Amount,
    },
    Append {
        path: String,
        value: Value,
    },
    Delete {
        path: String,
    },
    Transfer {
        from: String,
        to: String,
        /// Defaults to the whole source balance.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        amount: Option<Amount>,
    },
    Merge {
        path: String,
        value: Map<String, Value>,
    },
    /// Weighted random choice, rewritten into `set` before application.
    Rng {
        path: String,
        choices: Vec<Value>,
        probabilities: Vec<f64>,
    },
}

impl Operation {
    pub fn set(path: impl Into<String>, value: Value) -> Self {
        Operation::Set {
            path: path.into(),
            value,
        }
    }

    pub fn increment(path: impl Into<String>, value: impl Into<Amount>) -> Self {
        Operation::Increment {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn append(path: impl Into<String>, value: Value) -> Self {
        Operation::Append {
            path: path.into(),
            value,
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Operation::Delete { path: path.into() }
    }

    pub fn transfer(from: impl Into<String>, to: impl Into<String>, amount: Option<Amount>) -> Self {
        Operation::Transfer {
            from: from.into(),
            to: to.into(),
            amount,
        }
    }

    pub fn merge(path: impl Into<String>, value: Map<String, Value>) -> Self {
        Operation::Merge {
            path: path.into(),
            value,
        }
    }

    pub fn rng(path: impl Into<String>, choices: Vec<Value>, probabilities: Vec<f64>) -> Self {
        Operation::Rng {
            path: path.into(),
            choices,
            probabilities,
        }
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Set { .. } => OperationKind::Set,
            Operation::Increment { .. } => OperationKind::Increment,
            Operation::Append { .. } => OperationKind::Append,
            Operation::Delete { .. } => OperationKind::Delete,
            Operation::Transfer { .. } => OperationKind::Transfer,
            Operation::Merge { .. } => OperationKind::Merge,
            Operation::Rng { .. } => OperationKind::Rng,
        }
    }

    /// Every state path this operation writes. `transfer` writes both ends.
    pub fn target_paths(&self) -> Vec<&str> {
        match self {
            Operation::Set { path, .. }
            | Operation::Increment { path, .. }
            | Operation::Append { path, .. }
            | Operation::Delete { path }
            | Operation::Merge { path, .. }
            | Operation::Rng { path, .. } => vec![path.as_str()],
            Operation::Transfer { from, to, .. } => vec![from.as_str(), to.as_str()],
        }
    }

    /// Structural validation, independent of any state.
    pub fn validate(&self) -> Result<(), OperationError> {
        if let Some(bad) = self.target_paths().into_iter().find(|p| !path::is_valid(p)) {
            return Err(OperationError::InvalidPath { path: bad.to_owned() });
        }

        match self {
            Operation::Transfer { from, to, amount } => {
                if from == to {
                    return Err(OperationError::SelfTransfer { path: from.clone() });
                }
                if let Some(n) = amount.as_ref().and_then(Amount::as_number)
                    && n.as_f64().is_some_and(|n| n < 0.0)
                {
                    return Err(OperationError::NegativeAmount {
                        path: from.clone(),
                        amount: n.clone(),
                    });
                }
                Ok(())
            }
            Operation::Rng {
                path,
                choices,
                probabilities,
            } => {
                if choices.is_empty() {
                    return Err(OperationError::EmptyChoices { path: path.clone() });
                }
                if choices.len() != probabilities.len() {
                    return Err(OperationError::ProbabilityCountMismatch {
                        path: path.clone(),
                        choices: choices.len(),
                        probabilities: probabilities.len(),
                    });
                }
                if let Some(bad) = probabilities.iter().find(|p| !p.is_finite() || **p < 0.0) {
                    return Err(OperationError::InvalidProbability {
                        path: path.clone(),
                        value: *bad,
                    });
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Parses a raw JSON batch, reporting every malformed entry.
pub fn parse_operations(raw: &[Value]) -> Result<Vec<Operation>, Vec<MalformedOperation>> {
    let mut operations = Vec::with_capacity(raw.len());
    let mut malformed = Vec::new();

    for (index, value) in raw.iter().enumerate() {
        match serde_json::from_value::<Operation>(value.clone()) {
            Ok(operation) => operations.push(operation),
            Err(err) => malformed.push(MalformedOperation {
                index,
                raw: value.clone(),
                reason: err.to_string(),
            }),
        }
    }

    if malformed.is_empty() {
        Ok(operations)
    } else {
        Err(malformed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_tagged_operations() {
        let ops = parse_operations(&[
            json!({"op": "set", "path": "game.round", "value": 1}),
            json!({"op": "increment", "path": "players.{{pid}}.score", "value": "{{amt}}"}),
            json!({"op": "transfer", "from": "players.p1.chips", "to": "game.pot"}),
            json!({"op": "rng", "path": "game.die", "choices": [1, 2], "probabilities": [0.5, 0.5]}),
        ])
        .unwrap();

        assert_eq!(ops[0], Operation::set("game.round", json!(1)));
        assert_eq!(
            ops[1],
            Operation::Increment {
                path: "players.{{pid}}.score".into(),
                value: Amount::Template("{{amt}}".into()),
            }
        );
        assert_eq!(ops[2].kind(), OperationKind::Transfer);
        assert_eq!(ops[3].kind().to_string(), "rng");
    }

    #[test]
    fn parse_reports_every_malformed_entry() {
        let malformed = parse_operations(&[
            json!({"op": "explode", "path": "a"}),
            json!({"op": "set", "path": "a", "value": 1}),
            json!({"op": "merge", "path": "a", "value": [1]}),
        ])
        .unwrap_err();

        let indices: Vec<_> = malformed.iter().map(|m| m.index).collect();
        assert_eq!(indices, vec![0, 2]);
    }

    #[test]
    fn validation_catches_structural_problems() {
        assert!(matches!(
            Operation::set("game..x", json!(1)).validate(),
            Err(OperationError::InvalidPath { .. })
        ));
        assert!(matches!(
            Operation::transfer("a", "a", None).validate(),
            Err(OperationError::SelfTransfer { .. })
        ));
        assert!(matches!(
            Operation::transfer("a", "b", Some(Amount::from(-1))).validate(),
            Err(OperationError::NegativeAmount { .. })
        ));
        assert!(matches!(
            Operation::rng("a", vec![json!(1)], vec![0.5, 0.5]).validate(),
            Err(OperationError::ProbabilityCountMismatch { .. })
        ));
        assert!(Operation::rng("a", vec![json!(1)], vec![1.0]).validate().is_ok());
    }
}
