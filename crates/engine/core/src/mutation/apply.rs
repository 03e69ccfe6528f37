//! Two-phase batch application: validate everything, then apply in order on
//! a private copy.

use serde_json::{Map, Number, Value};
use tracing::{debug, trace};

use super::{Amount, MutationError, Operation, OperationError, OperationFailure};
use crate::state::{StateTree, path, value_kind};

/// Applies `operations` to a copy of `state`.
///
/// The input state is never modified. If any operation fails validation the
/// batch is rejected with every failure; otherwise operations run in order
/// and the first application failure halts the batch.
pub fn apply_operations(
    state: &StateTree,
    operations: &[Operation],
) -> Result<StateTree, MutationError> {
    let failures: Vec<OperationFailure> = operations
        .iter()
        .enumerate()
        .filter_map(|(index, operation)| {
            operation.validate().err().map(|error| OperationFailure {
                index,
                operation: operation.clone(),
                error,
            })
        })
        .collect();

    if !failures.is_empty() {
        debug!(
            count = failures.len(),
            batch = operations.len(),
            "mutation batch rejected by validation"
        );
        return Err(MutationError::Invalid { failures });
    }

    let mut next = state.clone();
    for (index, operation) in operations.iter().enumerate() {
        if let Err(error) = apply_one(next.as_map_mut(), operation) {
            debug!(
                index,
                kind = %operation.kind(),
                code = crate::EngineError::error_code(&error),
                "mutation batch halted"
            );
            return Err(MutationError::Halted {
                applied: operations[..index].to_vec(),
                failure: OperationFailure {
                    index,
                    operation: operation.clone(),
                    error,
                },
                partial: Box::new(next),
            });
        }
        trace!(index, kind = %operation.kind(), "applied operation");
    }

    debug!(count = operations.len(), "applied mutation batch");
    Ok(next)
}

fn apply_one(root: &mut Map<String, Value>, operation: &Operation) -> Result<(), OperationError> {
    match operation {
        Operation::Set { path, value } => {
            path::set(root, path, value.clone());
            Ok(())
        }
        Operation::Increment { path, value } => {
            let delta = resolved(path, value)?;
            let current = match path::get_mut(root, path) {
                Some(Value::Number(n)) => n,
                Some(other) => {
                    return Err(OperationError::NotNumeric {
                        path: path.clone(),
                        found: value_kind(other),
                    });
                }
                None => return Err(OperationError::MissingValue { path: path.clone() }),
            };
            *current = add(current, delta).ok_or_else(|| OperationError::Overflow { path: path.clone() })?;
            Ok(())
        }
        Operation::Append { path, value } => match path::get_mut(root, path) {
            Some(Value::Array(items)) => {
                items.push(value.clone());
                Ok(())
            }
            Some(other) => Err(OperationError::NotArray {
                path: path.clone(),
                found: value_kind(other),
            }),
            None => Err(OperationError::MissingValue { path: path.clone() }),
        },
        Operation::Delete { path } => {
            path::remove(root, path);
            Ok(())
        }
        Operation::Transfer { from, to, amount } => transfer(root, from, to, amount.as_ref()),
        Operation::Merge { path, value } => match path::get_mut(root, path) {
            Some(Value::Object(existing)) => {
                for (key, entry) in value {
                    existing.insert(key.clone(), entry.clone());
                }
                Ok(())
            }
            None | Some(Value::Null) => {
                path::set(root, path, Value::Object(value.clone()));
                Ok(())
            }
            Some(other) => Err(OperationError::NotObject {
                path: path.clone(),
                found: value_kind(other),
            }),
        },
        Operation::Rng { path, .. } => Err(OperationError::UnresolvedRng { path: path.clone() }),
    }
}

/// Moves `amount` (default: the whole balance) from `from` to `to`. All checks
/// run before either side is written.
fn transfer(
    root: &mut Map<String, Value>,
    from: &str,
    to: &str,
    amount: Option<&Amount>,
) -> Result<(), OperationError> {
    let available = numeric_at(root, from)?.ok_or_else(|| OperationError::MissingValue {
        path: from.to_owned(),
    })?;
    let destination = numeric_at(root, to)?.unwrap_or_else(|| Number::from(0));
    let requested = match amount {
        Some(amount) => resolved(from, amount)?.clone(),
        None => available.clone(),
    };

    if as_f64(&requested) > as_f64(&available) {
        return Err(OperationError::InsufficientBalance {
            path: from.to_owned(),
            available,
            requested,
        });
    }

    let overflow = || OperationError::Overflow { path: from.to_owned() };
    let remaining = sub(&available, &requested).ok_or_else(overflow)?;
    let received = add(&destination, &requested).ok_or_else(overflow)?;

    path::set(root, from, Value::Number(remaining));
    path::set(root, to, Value::Number(received));
    Ok(())
}

/// Number at `path`; `Ok(None)` when absent or null.
fn numeric_at(root: &Map<String, Value>, path: &str) -> Result<Option<Number>, OperationError> {
    match path::get(root, path) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(Some(n.clone())),
        Some(other) => Err(OperationError::NotNumeric {
            path: path.to_owned(),
            found: value_kind(other),
        }),
    }
}

fn resolved<'a>(path: &str, amount: &'a Amount) -> Result<&'a Number, OperationError> {
    match amount {
        Amount::Number(n) => Ok(n),
        Amount::Template(template) => Err(OperationError::UnresolvedAmount {
            path: path.to_owned(),
            template: template.clone(),
        }),
    }
}

fn as_f64(n: &Number) -> f64 {
    n.as_f64().unwrap_or(0.0)
}

/// Integer arithmetic when both sides are integers, float otherwise.
fn add(a: &Number, b: &Number) -> Option<Number> {
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => x.checked_add(y).map(Number::from),
        _ => Number::from_f64(as_f64(a) + as_f64(b)),
    }
}

fn sub(a: &Number, b: &Number) -> Option<Number> {
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => x.checked_sub(y).map(Number::from),
        _ => Number::from_f64(as_f64(a) - as_f64(b)),
    }
}
