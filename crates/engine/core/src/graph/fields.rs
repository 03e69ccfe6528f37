//! Which state fields an instruction body writes.

use serde_json::{Map, Value};

use crate::mutation::Operation;
use crate::state::path::{self, SEPARATOR};

const WILDCARD: &str = "*";

/// Every field `operations` write, as dotted paths. Object-valued `set` and
/// `merge` also contribute the paths of their (nested) keys.
pub(crate) fn written_fields(operations: &[Operation]) -> Vec<String> {
    let mut fields = Vec::new();

    for operation in operations {
        fields.extend(operation.target_paths().into_iter().map(str::to_owned));
        match operation {
            Operation::Set {
                path,
                value: Value::Object(map),
            } => object_keys(path, map, &mut fields),
            Operation::Merge { path, value } => object_keys(path, value, &mut fields),
            _ => {}
        }
    }

    fields.sort();
    fields.dedup();
    fields
}

fn object_keys(prefix: &str, map: &Map<String, Value>, out: &mut Vec<String>) {
    for (key, value) in map {
        let field = format!("{prefix}{SEPARATOR}{key}");
        if let Value::Object(nested) = value {
            object_keys(&field, nested, out);
        }
        out.push(field);
    }
}

/// Segment-wise match where `*` and `{{...}}` on either side match any
/// single segment.
pub(crate) fn fields_match(written: &str, query: &str) -> bool {
    let written: Vec<&str> = path::segments(written).collect();
    let query: Vec<&str> = path::segments(query).collect();

    written.len() == query.len()
        && written
            .iter()
            .zip(&query)
            .all(|(w, q)| w == q || is_wildcard(w) || is_wildcard(q))
}

fn is_wildcard(segment: &str) -> bool {
    segment == WILDCARD || (segment.starts_with("{{") && segment.ends_with("}}"))
}
