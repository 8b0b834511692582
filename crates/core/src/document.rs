//! Canonical form and object indexing for floor documents.
//!
//! A floor document is a JSON object whose optional `objects` array holds
//! rooms, devices and other items, each carrying an `id`. `serde_json` keeps
//! object keys in sorted order, so compact serialization is canonical.

use std::collections::BTreeMap;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::errors::VcsError;

/// Key of the object collection inside a document.
pub const OBJECTS_KEY: &str = "objects";

/// Canonical bytes of a document: compact JSON with sorted keys.
pub fn canonical_bytes(document: &Value) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(document)
}

/// Lowercase hex SHA-256 of the given bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Hash of a document's canonical serialization.
pub fn hash_document(document: &Value) -> Result<String, serde_json::Error> {
    Ok(content_hash(&canonical_bytes(document)?))
}

/// The string key an object is indexed by.
///
/// String ids are used as-is; integer ids are rendered in decimal, so
/// `7` and `"7"` name the same object and a document holding both is
/// /// rejected by [`validate`] as a duplicate. Keys compare as strings,
/// which puts `"10"` before `"9"` when conflicts are detected.
pub fn object_key(object: &Value) -> Option<String> {
    match object.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

/// Check the shape the engine relies on before a document is committed.
pub fn validate(document: &Value) -> Result<(), VcsError> {
    let Some(root) = document.as_object() else {
        return Err(VcsError::validation("document", "must be a JSON object"));
    };
    let Some(objects) = root.get(OBJECTS_KEY) else {
        return Ok(());
    };
    let Some(items) = objects.as_array() else {
        return Err(VcsError::validation(OBJECTS_KEY, "must be an array"));
    };

    let mut seen = std::collections::HashSet::new();
    for (index, item) in items.iter().enumerate() {
        if !item.is_object() {
            return Err(VcsError::validation(
                format!("{OBJECTS_KEY}[{index}]"),
                "must be a JSON object",
            ));
        }
        let key = object_key(item).ok_or_else(|| {
            VcsError::validation(
                format!("{OBJECTS_KEY}[{index}].id"),
                "must be a non-empty string or an integer",
            )
        })?;
        if !seen.insert(key.clone()) {
            return Err(VcsError::validation(
                format!("{OBJECTS_KEY}[{index}].id"),
                format!("duplicate object id '{key}'"),
            ));
        }
    }
    Ok(())
}

/// The document's objects in their stored order, with their keys.
///
/// Entries without a usable id are skipped; committed documents never
/// contain such entries.
pub fn ordered_objects(document: &Value) -> Vec<(String, &Value)> {
    document
        .get(OBJECTS_KEY)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| object_key(item).map(|k| (k, item)))
                .collect()
        })
        .unwrap_or_default()
}

/// The document's objects keyed by id, iterated in ascending id order.
pub fn object_map(document: &Value) -> BTreeMap<String, &Value> {
    ordered_objects(document).into_iter().collect()
}
