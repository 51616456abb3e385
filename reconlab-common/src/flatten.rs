//! Nested document flattening
//!
//! Registry responses arrive as nested JSON objects; tasks compare and merge
//! single-level records. `flatten` bridges the two by joining the path of
//! enclosing keys with `.`.

use serde_json::{Map, Value};

/// Single-level record: field name → leaf value
pub type FlatRecord = Map<String, Value>;

const SEPARATOR: char = '.';

/// Flatten a nested document into a single-level record
///
/// Objects are descended into; every other value (including arrays) is a leaf.
/// An empty nested object contributes no keys. Already-flat input comes back
/// unchanged.
pub fn flatten(document: &Map<String, Value>) -> FlatRecord {
    let mut out = FlatRecord::new();
    flatten_into(document, None, &mut out);
    out
}

fn flatten_into(document: &Map<String, Value>, prefix: Option<&str>, out: &mut FlatRecord) {
    for (key, value) in document {
        let path = match prefix {
            Some(parent) => format!("{}{}{}", parent, SEPARATOR, key),
            None => key.clone(),
        };

        match value {
            Value::Object(inner) => flatten_into(inner, Some(&path), out),
            leaf => {
                out.insert(path, leaf.clone());
            }
        }
    }
}
