//! Dot-separated path addressing into JSON trees.
//!
//! Segments address object keys; a segment that parses as an in-bounds index
//! addresses an array element instead.

use serde_json::{Map, Value};

pub const SEPARATOR: char = '.';

/// Returns true when the path is non-empty and has no empty segments.
pub fn is_valid(path: &str) -> bool {
    !path.is_empty() && path.split(SEPARATOR).all(|segment| !segment.is_empty())
}

pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split(SEPARATOR)
}

fn array_index(segment: &str, len: usize) -> Option<usize> {
    segment.parse::<usize>().ok().filter(|index| *index < len)
}

/// Immutable child lookup for a single segment.
pub fn child<'a>(node: &'a Value, segment: &str) -> Option<&'a Value> {
    match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => array_index(segment, items.len()).map(|index| &items[index]),
        _ => None,
    }
}

fn child_mut<'a>(node: &'a mut Value, segment: &str) -> Option<&'a mut Value> {
    match node {
        Value::Object(map) => map.get_mut(segment),
        Value::Array(items) => {
            let index = array_index(segment, items.len())?;
            items.get_mut(index)
        }
        _ => None,
    }
}

/// Descends one segment, creating the entry when absent and replacing scalar
/// intermediates with an object.
fn child_or_create<'a>(node: &'a mut Value, segment: &str) -> &'a mut Value {
    let index = match &*node {
        Value::Array(items) => array_index(segment, items.len()),
        _ => None,
    };

    match (node, index) {
        (Value::Array(items), Some(index)) => &mut items[index],
        (node, _) => {
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            &mut node[segment]
        }
    }
}

/// Resolves a path against a root object.
pub fn get<'a>(root: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = segments(path);
    let mut current = root.get(segments.next()?)?;
    for segment in segments {
        current = child(current, segment)?;
    }
    Some(current)
}

/// Resolves a path against an arbitrary value (used for guard data scopes).
pub fn get_in<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(root);
    }
    segments(path).try_fold(root, child)
}

pub fn get_mut<'a>(root: &'a mut Map<String, Value>, path: &str) -> Option<&'a mut Value> {
    let mut segments = segments(path);
    let mut current = root.get_mut(segments.next()?)?;
    for segment in segments {
        current = child_mut(current, segment)?;
    }
    Some(current)
}

/// Assigns `value` at `path`, creating intermediate objects as needed.
pub fn set(root: &mut Map<String, Value>, path: &str, value: Value) {
    let segments: Vec<&str> = segments(path).collect();
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    let Some((first, rest)) = parents.split_first() else {
        root.insert((*last).to_owned(), value);
        return;
    };

    let mut node = root
        .entry((*first).to_owned())
        .or_insert_with(|| Value::Object(Map::new()));
    for segment in rest {
        node = child_or_create(node, segment);
    }
    assign(node, last, value);
}

fn assign(node: &mut Value, segment: &str, value: Value) {
    if let Value::Array(items) = node
        && let Some(index) = array_index(segment, items.len())
    {
        items[index] = value;
        return;
    }
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        map.insert(segment.to_owned(), value);
    }
}

/// Removes the terminal segment of `path`. Returns the removed value, or
/// `None` when the parent or the entry is absent.
pub fn remove(root: &mut Map<String, Value>, path: &str) -> Option<Value> {
    let (parent, last) = match path.rsplit_once(SEPARATOR) {
        Some((parent, last)) => (Some(parent), last),
        None => (None, path),
    };

    let Some(parent) = parent else {
        return root.remove(last);
    };
    match get_mut(root, parent)? {
        Value::Object(map) => map.remove(last),
        Value::Array(items) => {
            let index = array_index(last, items.len())?;
            Some(items.remove(index))
        }
        _ => None,
    }
}
