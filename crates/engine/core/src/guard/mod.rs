//! Guard expression language.
//!
//! Guards are JSON-logic trees gating whether a transition fires. The
//! operator vocabulary is closed: [`GuardExpr::parse`] rejects any operator
//! outside [`GuardOp`] and reports *every* offending key in one pass, so
//! upstream authoring can fix all problems at once.
//!
//! Evaluation ([`evaluate`]) never fails. Structural problems, missing
//! context fields and runtime errors all come back as diagnostics on a
//! [`GuardEvaluation`], with a safe negative value.
//!
//! ```ignore
//! let expr = GuardExpr::parse(&json!({"allPlayers": ["score", ">=", 3]}))?;
//! let outcome = evaluate(&expr, &GuardContext::from_state(&state));
//! if outcome.is_satisfied() { /* fire transition */ }
//! ```

mod context;
mod evaluate;
mod value;

pub use context::GuardContext;
pub use evaluate::{
    GuardEvaluation, PreconditionOutcome, PreconditionReport, PreconditionStatus, evaluate,
    evaluate_preconditions, evaluate_preconditions_with, evaluate_value, evaluate_with_config,
};
pub use value::truthy;

use std::str::FromStr;

use serde_json::Value;

use crate::config::EngineConfig;
use crate::error::{EngineError, ErrorSeverity};

// ============================================================================
// Operator Vocabulary
// ============================================================================

/// Whitelisted guard operators.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    strum::EnumString,
    strum::IntoStaticStr,
    strum::Display,
    strum::EnumIter,
)]
pub enum GuardOp {
    // comparison
    #[strum(to_string = "==")]
    Eq,
    #[strum(to_string = "===")]
    StrictEq,
    #[strum(to_string = "!=")]
    NotEq,
    #[strum(to_string = "!==")]
    StrictNotEq,
    #[strum(to_string = ">")]
    Gt,
    #[strum(to_string = ">=")]
    Gte,
    #[strum(to_string = "<")]
    Lt,
    #[strum(to_string = "<=")]
    Lte,

    // boolean
    #[strum(to_string = "!")]
    Not,
    #[strum(to_string = "!!")]
    Truthy,
    #[strum(to_string = "and")]
    And,
    #[strum(to_string = "or")]
    Or,
    #[strum(to_string = "if", serialize = "?:")]
    If,

    // arithmetic
    #[strum(to_string = "+")]
    Add,
    #[strum(to_string = "-")]
    Sub,
    #[strum(to_string = "*")]
    Mul,
    #[strum(to_string = "/")]
    Div,
    #[strum(to_string = "%")]
    Mod,
    #[strum(to_string = "min")]
    Min,
    #[strum(to_string = "max")]
    Max,

    // string
    #[strum(to_string = "cat")]
    Cat,
    #[strum(to_string = "substr")]
    Substr,
    #[strum(to_string = "in")]
    In,

    // array
    #[strum(to_string = "all")]
    All,
    #[strum(to_string = "some")]
    Any,
    #[strum(to_string = "none")]
    NoneOf,
    #[strum(to_string = "merge")]
    Merge,
    #[strum(to_string = "count")]
    Count,

    // data
    #[strum(to_string = "var")]
    Var,
    #[strum(to_string = "missing")]
    Missing,

    // custom
    #[strum(to_string = "allPlayers")]
    AllPlayers,
    #[strum(to_string = "anyPlayer")]
    AnyPlayer,
    #[strum(to_string = "lookup")]
    Lookup,
}

impl GuardOp {
    /// Inclusive argument count bounds; `None` means unbounded.
    pub const fn arity(&self) -> (usize, Option<usize>) {
        use GuardOp::*;
        match self {
            Eq | StrictEq | NotEq | StrictNotEq | Gt | Gte => (2, Some(2)),
            Lt | Lte => (2, Some(3)),
            Not | Truthy => (1, Some(1)),
            And | Or | If => (1, None),
            Add | Mul | Cat | Merge => (0, None),
            Sub => (1, Some(2)),
            Div | Mod => (2, Some(2)),
            Min | Max => (1, None),
            Substr => (2, Some(3)),
            In => (2, Some(2)),
            All | Any | NoneOf => (2, Some(2)),
            Count => (1, Some(1)),
            Var => (1, Some(2)),
            Missing => (1, None),
            AllPlayers | AnyPlayer => (3, Some(3)),
            Lookup => (2, Some(2)),
        }
    }

    /// Comparators accepted as the symbol argument of player quantifiers.
    pub const fn is_comparison(&self) -> bool {
        use GuardOp::*;
        matches!(
            self,
            Eq | StrictEq | NotEq | StrictNotEq | Gt | Gte | Lt | Lte
        )
    }

    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

// ============================================================================
// Expression Tree
// ============================================================================

/// Parsed, validated guard expression.
#[derive(Clone, Debug, PartialEq)]
pub enum GuardExpr {
    /// Constant JSON value.
    Literal(Value),

    /// Array whose elements may themselves be expressions.
    List(Vec<GuardExpr>),

    /// Read of a dotted path from the current data scope.
    Var { path: String, default: Option<Value> },

    /// Operator applied to ordered sub-expressions.
    Op { op: GuardOp, args: Vec<GuardExpr> },
}

impl GuardExpr {
    /// Parses and validates a JSON-logic expression with the default depth
    /// limit.
    pub fn parse(value: &Value) -> Result<Self, Vec<GuardDiagnostic>> {
        Self::parse_with_limit(value, EngineConfig::MAX_GUARD_DEPTH)
    }

    pub fn parse_with_config(
        value: &Value,
        config: &EngineConfig,
    ) -> Result<Self, Vec<GuardDiagnostic>> {
        Self::parse_with_limit(value, config.max_guard_depth)
    }

    fn parse_with_limit(value: &Value, max_depth: usize) -> Result<Self, Vec<GuardDiagnostic>> {
        let mut parser = Parser {
            diagnostics: Vec::new(),
            max_depth,
        };
        let expr = parser.parse(value, "$", 0);
        if parser.diagnostics.is_empty() {
            Ok(expr)
        } else {
            Err(parser.diagnostics)
        }
    }

    /// Builds `{op: [{"var": field}, value]}`, the comparison the player
    /// quantifiers evaluate once per player.
    pub(crate) fn comparison(op: GuardOp, field: &str, value: Value) -> Self {
        GuardExpr::Op {
            op,
            args: vec![
                GuardExpr::Var {
                    path: field.to_owned(),
                    default: None,
                },
                GuardExpr::Literal(value),
            ],
        }
    }
}

/// Validates an expression, returning every diagnostic (empty when valid).
pub fn validate_expression(value: &Value) -> Vec<GuardDiagnostic> {
    GuardExpr::parse(value).err().unwrap_or_default()
}

struct Parser {
    diagnostics: Vec<GuardDiagnostic>,
    max_depth: usize,
}

impl Parser {
    fn parse(&mut self, value: &Value, location: &str, depth: usize) -> GuardExpr {
        if depth > self.max_depth {
            self.diagnostics.push(GuardDiagnostic::TooDeep {
                limit: self.max_depth,
            });
            return GuardExpr::Literal(Value::Null);
        }

        match value {
            Value::Object(map) => {
                if map.is_empty() {
                    self.diagnostics.push(GuardDiagnostic::EmptyNode {
                        location: location.to_owned(),
                    });
                    return GuardExpr::Literal(Value::Null);
                }
                if map.len() > 1 {
                    self.diagnostics.push(GuardDiagnostic::MultipleKeys {
                        location: location.to_owned(),
                        keys: map.keys().cloned().collect(),
                    });
                }

                // Every key is checked so all disallowed operators surface.
                let mut parsed = None;
                for (key, args) in map {
                    let node_location = format!("{location}.{key}");
                    let op = GuardOp::from_str(key).ok();
                    if op.is_none() {
                        self.diagnostics.push(GuardDiagnostic::DisallowedOperator {
                            key: key.clone(),
                            location: location.to_owned(),
                        });
                    }
                    let node = self.parse_node(op, args, &node_location, depth);
                    parsed.get_or_insert(node);
                }
                parsed.unwrap_or(GuardExpr::Literal(Value::Null))
            }
            Value::Array(items) => {
                let elements = items
                    .iter()
                    .enumerate()
                    .map(|(index, item)| self.parse(item, &format!("{location}[{index}]"), depth + 1))
                    .collect::<Vec<_>>();
                if elements.iter().all(|e| matches!(e, GuardExpr::Literal(_))) {
                    GuardExpr::Literal(value.clone())
                } else {
                    GuardExpr::List(elements)
                }
            }
            scalar => GuardExpr::Literal(scalar.clone()),
        }
    }

    fn parse_node(
        &mut self,
        op: Option<GuardOp>,
        args: &Value,
        location: &str,
        depth: usize,
    ) -> GuardExpr {
        // JSON-logic allows a bare argument in place of a one-element list.
        let raw_args: Vec<&Value> = match args {
            Value::Array(items) => items.iter().collect(),
            single => vec![single],
        };

        let Some(op) = op else {
            // Still walk the arguments so nested disallowed keys are reported.
            for (index, arg) in raw_args.iter().enumerate() {
                self.parse(arg, &format!("{location}[{index}]"), depth + 1);
            }
            return GuardExpr::Literal(Value::Null);
        };

        let (min, max) = op.arity();
        if raw_args.len() < min || max.is_some_and(|max| raw_args.len() > max) {
            self.diagnostics.push(GuardDiagnostic::Arity {
                op: op.to_string(),
                location: location.to_owned(),
                expected: match max {
                    Some(max) if max == min => format!("{min}"),
                    Some(max) => format!("{min}..={max}"),
                    None => format!("at least {min}"),
                },
                found: raw_args.len(),
            });
        }

        match op {
            GuardOp::Var => self.parse_var(&raw_args, location),
            GuardOp::AllPlayers | GuardOp::AnyPlayer => {
                self.parse_quantifier(op, &raw_args, location, depth)
            }
            _ => GuardExpr::Op {
                op,
                args: raw_args
                    .iter()
                    .enumerate()
                    .map(|(index, arg)| self.parse(arg, &format!("{location}[{index}]"), depth + 1))
                    .collect(),
            },
        }
    }

    fn parse_var(&mut self, args: &[&Value], location: &str) -> GuardExpr {
        let path = match args.first() {
            Some(Value::String(path)) => path.clone(),
            Some(Value::Number(index)) => index.to_string(),
            Some(Value::Null) | None => String::new(),
            Some(other) => {
                self.diagnostics.push(GuardDiagnostic::MalformedArgument {
                    op: GuardOp::Var.to_string(),
                    location: location.to_owned(),
                    reason: format!(
                        "path must be a string or number, got {}",
                        crate::state::value_kind(other)
                    ),
                });
                String::new()
            }
        };
        GuardExpr::Var {
            path,
            default: args.get(1).map(|value| (*value).clone()),
        }
    }

    fn parse_quantifier(
        &mut self,
        op: GuardOp,
        args: &[&Value],
        location: &str,
        depth: usize,
    ) -> GuardExpr {
        let field = match args.first() {
            Some(Value::String(field)) if !field.is_empty() => Some(field.clone()),
            _ => {
                self.diagnostics.push(GuardDiagnostic::MalformedArgument {
                    op: op.to_string(),
                    location: location.to_owned(),
                    reason: "first argument must be a non-empty field name".into(),
                });
                None
            }
        };

        let comparator = match args.get(1) {
            Some(Value::String(symbol)) => match GuardOp::from_str(symbol) {
                Ok(cmp) if cmp.is_comparison() => Some(cmp),
                _ => {
                    self.diagnostics.push(GuardDiagnostic::MalformedArgument {
                        op: op.to_string(),
                        location: location.to_owned(),
                        reason: format!("`{symbol}` is not a comparison operator"),
                    });
                    None
                }
            },
            _ => {
                self.diagnostics.push(GuardDiagnostic::MalformedArgument {
                    op: op.to_string(),
                    location: location.to_owned(),
                    reason: "second argument must be a comparator symbol".into(),
                });
                None
            }
        };

        let value = args
            .get(2)
            .map(|value| self.parse(value, &format!("{location}[2]"), depth + 1))
            .unwrap_or(GuardExpr::Literal(Value::Null));

        match (field, comparator) {
            (Some(field), Some(comparator)) => GuardExpr::Op {
                op,
                args: vec![
                    GuardExpr::Literal(Value::String(field)),
                    GuardExpr::Literal(Value::String(comparator.to_string())),
                    value,
                ],
            },
            _ => GuardExpr::Literal(Value::Null),
        }
    }
}

// ============================================================================
// Diagnostics
// ============================================================================

/// Structured problem found while validating or evaluating a guard.
#[derive(Clone, Debug, PartialEq, thiserror::Error, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GuardDiagnostic {
    #[error("operator `{key}` is not allowed (at {location})")]
    DisallowedOperator { key: String, location: String },

    #[error("operator node at {location} has keys {keys:?}; expected exactly one")]
    MultipleKeys { location: String, keys: Vec<String> },

    #[error("empty operator node at {location}")]
    EmptyNode { location: String },

    #[error("`{op}` at {location} expects {expected} arguments, got {found}")]
    Arity {
        op: String,
        location: String,
        expected: String,
        found: usize,
    },

    #[error("`{op}` at {location}: {reason}")]
    MalformedArgument {
        op: String,
        location: String,
        reason: String,
    },

    #[error("expression nesting exceeds depth {limit}")]
    TooDeep { limit: usize },

    #[error("context field `{field}`: {reason}")]
    Context { field: String, reason: String },

    #[error("`{op}` failed: {reason}")]
    Evaluation { op: String, reason: String },
}

impl EngineError for GuardDiagnostic {
    fn severity(&self) -> ErrorSeverity {
        match self {
            GuardDiagnostic::Evaluation { .. } => ErrorSeverity::Recoverable,
            _ => ErrorSeverity::Validation,
        }
    }

    fn error_code(&self) -> &'static str {
        use GuardDiagnostic::*;
        match self {
            DisallowedOperator { .. } => "GUARD_DISALLOWED_OPERATOR",
            MultipleKeys { .. } => "GUARD_MULTIPLE_KEYS",
            EmptyNode { .. } => "GUARD_EMPTY_NODE",
            Arity { .. } => "GUARD_ARITY",
            MalformedArgument { .. } => "GUARD_MALFORMED_ARGUMENT",
            TooDeep { .. } => "GUARD_TOO_DEEP",
            Context { .. } => "GUARD_CONTEXT",
            Evaluation { .. } => "GUARD_EVALUATION",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strum::IntoEnumIterator;

    #[test]
    fn operator_names_round_trip_through_whitelist() {
        for op in GuardOp::iter() {
            assert_eq!(GuardOp::from_str(op.as_str()), Ok(op));
        }
        assert_eq!(GuardOp::from_str("?:"), Ok(GuardOp::If));
        assert!(GuardOp::from_str("eval").is_err());
    }

    #[test]
    fn single_disallowed_key_is_named() {
        let diagnostics = validate_expression(&json!({"exec": ["rm", "-rf"]}));

        assert_eq!(
            diagnostics,
            vec![GuardDiagnostic::DisallowedOperator {
                key: "exec".into(),
                location: "$".into(),
            }]
        );
    }

    #[test]
    fn every_disallowed_key_is_collected() {
        let diagnostics = validate_expression(&json!({
            "and": [
                {"eval": "x"},
                {"or": [{"shell": 1}, {"==": [1, 1]}]},
                {"!": {"import": "os"}}
            ]
        }));

        let keys: Vec<_> = diagnostics
            .iter()
            .filter_map(|d| match d {
                GuardDiagnostic::DisallowedOperator { key, .. } => Some(key.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(keys, vec!["eval", "shell", "import"]);
    }

    #[test]
    fn multi_key_node_reports_each_disallowed_key() {
        let diagnostics = validate_expression(&json!({"==": [1, 1], "hack": 1, "pwn": 2}));

        assert!(diagnostics
            .iter()
            .any(|d| matches!(d, GuardDiagnostic::MultipleKeys { keys, .. } if keys.len() == 3)));
        let disallowed = diagnostics
            .iter()
            .filter(|d| matches!(d, GuardDiagnostic::DisallowedOperator { .. }))
            .count();
        assert_eq!(disallowed, 2);
    }

    #[test]
    fn quantifier_rejects_unknown_comparator() {
        let diagnostics = validate_expression(&json!({"allPlayers": ["score", "~=", 3]}));
        assert!(matches!(
            diagnostics.as_slice(),
            [GuardDiagnostic::MalformedArgument { op, .. }] if op == "allPlayers"
        ));
    }

    #[test]
    fn arity_is_checked() {
        let diagnostics = validate_expression(&json!({"lookup": [{"var": "game.board"}]}));
        assert!(matches!(
            diagnostics.as_slice(),
            [GuardDiagnostic::Arity { found: 1, .. }]
        ));
    }

    #[test]
    fn bare_argument_is_accepted() {
        let expr = GuardExpr::parse(&json!({"var": "game.round"})).unwrap();
        assert_eq!(
            expr,
            GuardExpr::Var {
                path: "game.round".into(),
                default: None
            }
        );
    }

    #[test]
    fn depth_limit_is_enforced() {
        let mut value = json!(true);
        for _ in 0..10 {
            value = json!({"!": [value]});
        }
        let config = EngineConfig::default().with_max_guard_depth(4);
        let diagnostics = GuardExpr::parse_with_config(&value, &config).unwrap_err();
        assert!(diagnostics.contains(&GuardDiagnostic::TooDeep { limit: 4 }));
    }
}
