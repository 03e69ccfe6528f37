//! Guard evaluation.
//!
//! Evaluation is total: every failure is recorded as a [`GuardDiagnostic`]
//! and the offending node evaluates to `null`, so the caller always gets a
//! usable answer.

use std::str::FromStr;

use serde_json::Value;

use super::value::{compare, from_number, loose_eq, strict_eq, to_number, to_text, truthy};
use super::{GuardContext, GuardDiagnostic, GuardExpr, GuardOp};
use crate::artifacts::Precondition;
use crate::config::EngineConfig;
use crate::state::{path, value_kind};

// ============================================================================
// Results
// ============================================================================

/// Outcome of evaluating one guard expression.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct GuardEvaluation {
    pub value: Value,
    pub diagnostics: Vec<GuardDiagnostic>,
}

impl GuardEvaluation {
    fn rejected(diagnostics: Vec<GuardDiagnostic>) -> Self {
        Self {
            value: Value::Bool(false),
            diagnostics,
        }
    }

    /// True when the value is truthy and evaluation produced no diagnostics.
    pub fn is_satisfied(&self) -> bool {
        self.diagnostics.is_empty() && truthy(&self.value)
    }
}

/// Status of one transition precondition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PreconditionStatus {
    Satisfied,
    Unsatisfied,
    /// Non-deterministic precondition; judged outside this engine.
    Deferred,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct PreconditionOutcome {
    pub id: String,
    pub status: PreconditionStatus,
    pub value: Value,
    pub diagnostics: Vec<GuardDiagnostic>,
}

/// Ordered per-precondition results for one transition.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize)]
pub struct PreconditionReport {
    pub outcomes: Vec<PreconditionOutcome>,
}

impl PreconditionReport {
    /// True when every precondition is satisfied. Deferred preconditions
    /// block, since this engine cannot judge them.
    pub fn all_satisfied(&self) -> bool {
        self.outcomes
            .iter()
            .all(|outcome| outcome.status == PreconditionStatus::Satisfied)
    }

    pub fn has_deferred(&self) -> bool {
        self.outcomes
            .iter()
            .any(|outcome| outcome.status == PreconditionStatus::Deferred)
    }

    pub fn unsatisfied(&self) -> impl Iterator<Item = &PreconditionOutcome> {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status == PreconditionStatus::Unsatisfied)
    }
}

// ============================================================================
// Entry Points
// ============================================================================

/// Evaluates a validated expression against a context.
pub fn evaluate(expr: &GuardExpr, context: &GuardContext) -> GuardEvaluation {
    evaluate_with_config(expr, context, &EngineConfig::default())
}

/// Like [`evaluate`], but nodes nested deeper than
/// `config.max_guard_depth` evaluate to `null` with a
/// [`GuardDiagnostic::TooDeep`].
pub fn evaluate_with_config(
    expr: &GuardExpr,
    context: &GuardContext,
    config: &EngineConfig,
) -> GuardEvaluation {
    let data = context.to_data();
    let mut evaluator = Evaluator {
        context,
        diagnostics: Vec::new(),
        depth: 0,
        max_depth: config.max_guard_depth,
    };
    let value = evaluator.eval(expr, &data);
    GuardEvaluation {
        value,
        diagnostics: evaluator.diagnostics,
    }
}

/// Validates and evaluates raw JSON in one call. Structural failures of
/// either the expression or the context come back as diagnostics with a
/// `false` value.
pub fn evaluate_value(expression: &Value, context: &Value) -> GuardEvaluation {
    let parsed = GuardExpr::parse(expression);
    let context = GuardContext::from_value(context);

    match (parsed, context) {
        (Ok(expr), Ok(context)) => evaluate(&expr, &context),
        (parsed, context) => {
            let mut diagnostics = parsed.err().unwrap_or_default();
            diagnostics.extend(context.err().unwrap_or_default());
            GuardEvaluation::rejected(diagnostics)
        }
    }
}

/// Evaluates a transition's preconditions in declaration order.
pub fn evaluate_preconditions(
    preconditions: &[Precondition],
    context: &GuardContext,
) -> PreconditionReport {
    evaluate_preconditions_with(preconditions, context, &EngineConfig::default())
}

/// [`evaluate_preconditions`] under an explicit engine configuration.
pub fn evaluate_preconditions_with(
    preconditions: &[Precondition],
    context: &GuardContext,
    config: &EngineConfig,
) -> PreconditionReport {
    let outcomes = preconditions
        .iter()
        .map(|precondition| {
            let (status, evaluation) = match (&precondition.logic, precondition.deterministic) {
                (Some(logic), true) => {
                    let evaluation = match GuardExpr::parse_with_config(logic, config) {
                        Ok(expr) => evaluate_with_config(&expr, context, config),
                        Err(diagnostics) => GuardEvaluation::rejected(diagnostics),
                    };
                    let status = if evaluation.is_satisfied() {
                        PreconditionStatus::Satisfied
                    } else {
                        PreconditionStatus::Unsatisfied
                    };
                    (status, evaluation)
                }
                _ => (
                    PreconditionStatus::Deferred,
                    GuardEvaluation {
                        value: Value::Null,
                        diagnostics: Vec::new(),
                    },
                ),
            };

            PreconditionOutcome {
                id: precondition.id.clone(),
                status,
                value: evaluation.value,
                diagnostics: evaluation.diagnostics,
            }
        })
        .collect();

    PreconditionReport { outcomes }
}

// ============================================================================
// Evaluator
// ============================================================================

struct Evaluator<'c> {
    context: &'c GuardContext,
    diagnostics: Vec<GuardDiagnostic>,
    depth: usize,
    max_depth: usize,
}

impl Evaluator<'_> {
    fn eval(&mut self, expr: &GuardExpr, data: &Value) -> Value {
        if self.depth > self.max_depth {
            let diagnostic = GuardDiagnostic::TooDeep {
                limit: self.max_depth,
            };
            if !self.diagnostics.contains(&diagnostic) {
                self.diagnostics.push(diagnostic);
            }
            return Value::Null;
        }

        self.depth += 1;
        let value = match expr {
            GuardExpr::Literal(value) => value.clone(),
            GuardExpr::List(items) => {
                Value::Array(items.iter().map(|item| self.eval(item, data)).collect())
            }
            GuardExpr::Var { path, default } => read_var(data, path, default.as_ref()),
            GuardExpr::Op { op, args } => self.apply(*op, args, data),
        };
        self.depth -= 1;
        value
    }

    fn arg(&mut self, args: &[GuardExpr], index: usize, data: &Value) -> Value {
        match args.get(index) {
            Some(expr) => self.eval(expr, data),
            None => Value::Null,
        }
    }

    fn fail(&mut self, op: GuardOp, reason: impl Into<String>) -> Value {
        self.diagnostics.push(GuardDiagnostic::Evaluation {
            op: op.to_string(),
            reason: reason.into(),
        });
        Value::Null
    }

    fn apply(&mut self, op: GuardOp, args: &[GuardExpr], data: &Value) -> Value {
        use GuardOp::*;
        match op {
            Eq | NotEq | StrictEq | StrictNotEq => {
                let a = self.arg(args, 0, data);
                let b = self.arg(args, 1, data);
                let equal = match op {
                    Eq | NotEq => loose_eq(&a, &b),
                    _ => strict_eq(&a, &b),
                };
                Value::Bool(if matches!(op, Eq | StrictEq) { equal } else { !equal })
            }
            Gt | Gte | Lt | Lte => self.ordering(op, args, data),

            Not => Value::Bool(!truthy(&self.arg(args, 0, data))),
            Truthy => Value::Bool(truthy(&self.arg(args, 0, data))),
            And => {
                let mut last = Value::Bool(true);
                for arg in args {
                    last = self.eval(arg, data);
                    if !truthy(&last) {
                        break;
                    }
                }
                last
            }
            Or => {
                let mut last = Value::Bool(false);
                for arg in args {
                    last = self.eval(arg, data);
                    if truthy(&last) {
                        break;
                    }
                }
                last
            }
            If => {
                for pair in args.chunks(2) {
                    match pair {
                        [condition, then] => {
                            if truthy(&self.eval(condition, data)) {
                                return self.eval(then, data);
                            }
                        }
                        [otherwise] => return self.eval(otherwise, data),
                        _ => {}
                    }
                }
                Value::Null
            }

            Add | Sub | Mul | Div | Mod | Min | Max => self.arithmetic(op, args, data),

            Cat => {
                let mut out = String::new();
                for arg in args {
                    out.push_str(&to_text(&self.eval(arg, data)));
                }
                Value::String(out)
            }
            Substr => {
                let source = to_text(&self.arg(args, 0, data));
                let start = to_number(&self.arg(args, 1, data)).unwrap_or(0.0) as i64;
                let length = match args.get(2) {
                    Some(expr) => to_number(&self.eval(expr, data)).map(|n| n as i64),
                    None => None,
                };
                Value::String(substr(&source, start, length))
            }
            In => {
                let needle = self.arg(args, 0, data);
                match self.arg(args, 1, data) {
                    Value::String(haystack) => Value::Bool(haystack.contains(&to_text(&needle))),
                    Value::Array(items) => {
                        Value::Bool(items.iter().any(|item| strict_eq(item, &needle)))
                    }
                    _ => Value::Bool(false),
                }
            }

            All | Any | NoneOf => self.array_predicate(op, args, data),
            Merge => {
                let mut merged = Vec::new();
                for arg in args {
                    match self.eval(arg, data) {
                        Value::Array(items) => merged.extend(items),
                        other => merged.push(other),
                    }
                }
                Value::Array(merged)
            }
            Count => match self.arg(args, 0, data) {
                Value::Array(items) => Value::from(items.len()),
                Value::Null => Value::from(0),
                other => self.fail(op, format!("expected array, got {}", value_kind(&other))),
            },

            Var => {
                let path = match self.arg(args, 0, data) {
                    Value::Null => String::new(),
                    other => to_text(&other),
                };
                let default = args.get(1).map(|expr| self.eval(expr, data));
                read_var(data, &path, default.as_ref())
            }
            Missing => {
                let mut paths = Vec::new();
                for arg in args {
                    match self.eval(arg, data) {
                        Value::Array(items) => paths.extend(items),
                        other => paths.push(other),
                    }
                }
                Value::Array(
                    paths
                        .into_iter()
                        .filter(|p| match path::get_in(data, &to_text(p)) {
                            None | Some(Value::Null) => true,
                            Some(Value::String(s)) => s.is_empty(),
                            Some(_) => false,
                        })
                        .collect(),
                )
            }

            AllPlayers | AnyPlayer => self.quantify(op, args, data),
            Lookup => {
                let collection = self.arg(args, 0, data);
                let key = self.arg(args, 1, data);
                lookup(&collection, &key)
            }
        }
    }

    fn ordering(&mut self, op: GuardOp, args: &[GuardExpr], data: &Value) -> Value {
        use std::cmp::Ordering;

        let values: Vec<Value> = args.iter().map(|arg| self.eval(arg, data)).collect();
        let holds = |a: &Value, b: &Value| match compare(a, b) {
            Some(ordering) => match op {
                GuardOp::Gt => ordering == Ordering::Greater,
                GuardOp::Gte => ordering != Ordering::Less,
                GuardOp::Lt => ordering == Ordering::Less,
                _ => ordering != Ordering::Greater,
            },
            None => false,
        };

        // `<` and `<=` with three operands test `a < b < c`.
        Value::Bool(values.windows(2).all(|pair| holds(&pair[0], &pair[1])) && values.len() >= 2)
    }

    fn arithmetic(&mut self, op: GuardOp, args: &[GuardExpr], data: &Value) -> Value {
        let mut numbers = Vec::with_capacity(args.len());
        for arg in args {
            let value = self.eval(arg, data);
            match to_number(&value) {
                Some(n) => numbers.push(n),
                None => {
                    return self.fail(op, format!("non-numeric operand ({})", value_kind(&value)));
                }
            }
        }

        let result = match (op, numbers.as_slice()) {
            (GuardOp::Add, ns) => ns.iter().sum(),
            (GuardOp::Mul, ns) => ns.iter().product(),
            (GuardOp::Sub, [n]) => -n,
            (GuardOp::Sub, [a, b]) => a - b,
            (GuardOp::Div | GuardOp::Mod, [_, b]) if *b == 0.0 => {
                return self.fail(op, "division by zero");
            }
            (GuardOp::Div, [a, b]) => a / b,
            (GuardOp::Mod, [a, b]) => a % b,
            (GuardOp::Min, ns) if !ns.is_empty() => ns.iter().copied().fold(f64::INFINITY, f64::min),
            (GuardOp::Max, ns) if !ns.is_empty() => {
                ns.iter().copied().fold(f64::NEG_INFINITY, f64::max)
            }
            _ => return self.fail(op, format!("unexpected operand count {}", numbers.len())),
        };

        match from_number(result) {
            Some(value) => value,
            None => self.fail(op, "result is not a finite number"),
        }
    }

    fn array_predicate(&mut self, op: GuardOp, args: &[GuardExpr], data: &Value) -> Value {
        let items = match self.arg(args, 0, data) {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => return self.fail(op, format!("expected array, got {}", value_kind(&other))),
        };
        let Some(predicate) = args.get(1) else {
            return self.fail(op, "missing predicate");
        };

        let mut matched = 0;
        for item in &items {
            if truthy(&self.eval(predicate, item)) {
                matched += 1;
            }
        }

        Value::Bool(match op {
            GuardOp::All => !items.is_empty() && matched == items.len(),
            GuardOp::Any => matched > 0,
            _ => matched == 0,
        })
    }

    /// `allPlayers` / `anyPlayer`: evaluates `{cmp: [{"var": field}, value]}`
    /// once per player record. Zero players: for-all is true, exists is false.
    fn quantify(&mut self, op: GuardOp, args: &[GuardExpr], data: &Value) -> Value {
        let field = match args.first() {
            Some(GuardExpr::Literal(Value::String(field))) => field.clone(),
            _ => return self.fail(op, "missing field name"),
        };
        let comparator = match args.get(1) {
            Some(GuardExpr::Literal(Value::String(symbol))) => GuardOp::from_str(symbol)
                .ok()
                .filter(GuardOp::is_comparison),
            _ => None,
        };
        let Some(comparator) = comparator else {
            return self.fail(op, "missing comparator");
        };

        let target = self.arg(args, 2, data);
        let comparison = GuardExpr::comparison(comparator, &field, target);

        let context = self.context;
        let mut any = false;
        let mut all = true;
        for record in context.players.values() {
            let scope = Value::Object(record.clone());
            if truthy(&self.eval(&comparison, &scope)) {
                any = true;
            } else {
                all = false;
            }
        }

        Value::Bool(if op == GuardOp::AllPlayers { all } else { any })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn read_var(data: &Value, path: &str, default: Option<&Value>) -> Value {
    match path::get_in(data, path) {
        Some(Value::Null) | None => default.cloned().unwrap_or(Value::Null),
        Some(value) => value.clone(),
    }
}

/// Indexes `collection` by `key`; absent collections and entries yield `null`.
fn lookup(collection: &Value, key: &Value) -> Value {
    match collection {
        Value::Object(map) => map.get(&to_text(key)).cloned().unwrap_or(Value::Null),
        Value::Array(items) => to_number(key)
            .filter(|n| *n >= 0.0 && n.fract() == 0.0)
            .and_then(|n| items.get(n as usize))
            .cloned()
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

/// Character-based substring with negative start/length counted from the end.
/// Out-of-range offsets clamp to the string bounds.
fn substr(source: &str, start: i64, length: Option<i64>) -> String {
    let chars: Vec<char> = source.chars().collect();
    let len = chars.len() as i64;

    let start = if start < 0 {
        len.saturating_add(start).max(0)
    } else {
        start.min(len)
    };
    let end = match length {
        None => len,
        Some(length) if length < 0 => len.saturating_add(length).max(start),
        Some(length) => start.saturating_add(length).min(len),
    };

    chars[start as usize..end as usize].iter().collect()
}
