//! `{{name}}` placeholder substitution.
//!
//! A string that is exactly one placeholder is replaced by the variable's
//! value with its JSON type intact, so `"{{amt}}"` with `amt = 5` becomes the
//! number `5`. Placeholders embedded in longer strings are rendered as text.
//! Unknown names are left in place verbatim. Dotted names (`{{player.id}}`)
//! address nested variables.

use serde_json::{Map, Number, Value};

use crate::mutation::{Amount, Operation};
use crate::state::path;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Renders every placeholder in `input` as text.
pub fn render(input: &str, variables: &Map<String, Value>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find(OPEN) {
        let body = &rest[start + OPEN.len()..];
        let Some(len) = body.find(CLOSE) else {
            break;
        };
        let end = start + OPEN.len() + len + CLOSE.len();

        out.push_str(&rest[..start]);
        match lookup(variables, &body[..len]) {
            Some(value) => out.push_str(&as_text(value)),
            None => out.push_str(&rest[start..end]),
        }
        rest = &rest[end..];
    }

    out.push_str(rest);
    out
}

/// Resolves placeholders inside any JSON value, recursing into arrays and
/// object values. Object keys are left untouched.
pub fn resolve_value(value: &Value, variables: &Map<String, Value>) -> Value {
    match value {
        Value::String(s) => resolve_str(s, variables),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| resolve_value(item, variables))
                .collect(),
        ),
        Value::Object(map) => Value::Object(resolve_map(map, variables)),
        other => other.clone(),
    }
}

/// Returns a copy of `operation` with every path and value resolved.
pub fn resolve_operation(operation: &Operation, variables: &Map<String, Value>) -> Operation {
    let text = |s: &String| render(s, variables);
    let value = |v: &Value| resolve_value(v, variables);

    match operation {
        Operation::Set { path, value: v } => Operation::Set {
            path: text(path),
            value: value(v),
        },
        Operation::Increment { path, value: amount } => Operation::Increment {
            path: text(path),
            value: resolve_amount(amount, variables),
        },
        Operation::Append { path, value: v } => Operation::Append {
            path: text(path),
            value: value(v),
        },
        Operation::Delete { path } => Operation::Delete { path: text(path) },
        Operation::Transfer { from, to, amount } => Operation::Transfer {
            from: text(from),
            to: text(to),
            amount: amount.as_ref().map(|a| resolve_amount(a, variables)),
        },
        Operation::Merge { path, value: map } => Operation::Merge {
            path: text(path),
            value: resolve_map(map, variables),
        },
        Operation::Rng {
            path,
            choices,
            probabilities,
        } => Operation::Rng {
            path: text(path),
            choices: choices.iter().map(value).collect(),
            probabilities: probabilities.clone(),
        },
    }
}

pub fn resolve_operations(operations: &[Operation], variables: &Map<String, Value>) -> Vec<Operation> {
    operations
        .iter()
        .map(|operation| resolve_operation(operation, variables))
        .collect()
}

/// True when `input` still contains a `{{...}}` placeholder.
pub fn has_placeholder(input: &str) -> bool {
    input
        .find(OPEN)
        .is_some_and(|start| input[start + OPEN.len()..].contains(CLOSE))
}

fn resolve_str(input: &str, variables: &Map<String, Value>) -> Value {
    if let Some(name) = whole_placeholder(input)
        && let Some(value) = lookup(variables, name)
    {
        return value.clone();
    }
    Value::String(render(input, variables))
}

fn resolve_map(map: &Map<String, Value>, variables: &Map<String, Value>) -> Map<String, Value> {
    map.iter()
        .map(|(key, value)| (key.clone(), resolve_value(value, variables)))
        .collect()
}

fn resolve_amount(amount: &Amount, variables: &Map<String, Value>) -> Amount {
    match amount {
        Amount::Number(_) => amount.clone(),
        Amount::Template(template) => match resolve_str(template, variables) {
            Value::Number(n) => Amount::Number(n),
            Value::String(s) => Amount::Template(s),
            other => Amount::Template(other.to_string()),
        },
    }
}

fn whole_placeholder(input: &str) -> Option<&str> {
    let inner = input.strip_prefix(OPEN)?.strip_suffix(CLOSE)?;
    if inner.contains(OPEN) || inner.contains(CLOSE) {
        return None;
    }
    Some(inner.trim())
}

fn lookup<'a>(variables: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    variables.get(name).or_else(|| path::get(variables, name))
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n
            .as_i64()
            .map(|i| i.to_string())
            .or_else(|| n.as_f64().and_then(Number::from_f64).map(|n| n.to_string()))
            .unwrap_or_else(|| n.to_string()),
        other => other.to_string(),
    }
}
