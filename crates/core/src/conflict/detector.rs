//! Object-level conflict detection between two floor documents.
//!
//! Documents are compared through their `objects` collections, keyed by
//! object id. Output is always ordered by ascending object id, then by
//! property name, so detection is reproducible.

use std::collections::BTreeSet;

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::document;
use crate::models::ConflictType;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A divergence found by the detector, before it is persisted as a
/// [`crate::models::Conflict`] owned by a merge request.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectConflict {
    pub conflict_type: ConflictType,
    pub object_id: String,
    /// Set only for [`ConflictType::PropertyConflict`].
    pub property_name: Option<String>,
    pub source_value: Option<Value>,
    pub target_value: Option<Value>,
}

impl ObjectConflict {
    fn object(
        conflict_type: ConflictType,
        object_id: &str,
        source: Option<&Value>,
        target: Option<&Value>,
    ) -> Self {
        Self {
            conflict_type,
            object_id: object_id.to_string(),
            property_name: None,
            source_value: source.cloned(),
            target_value: target.cloned(),
        }
    }

    fn property(
        object_id: &str,
        property: &str,
        source: Option<&Value>,
        target: Option<&Value>,
    ) -> Self {
        Self {
            conflict_type: ConflictType::PropertyConflict,
            object_id: object_id.to_string(),
            property_name: Some(property.to_string()),
            source_value: source.cloned(),
            target_value: target.cloned(),
        }
    }
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

/// Stateless detector over document snapshots.
pub struct ConflictDetector;

impl ConflictDetector {
    /// Compare two heads directly.
    ///
    /// Every object whose value differs is reported: `object_modified` when
    /// present on both sides, `object_added` when only in `source`,
    /// `object_deleted` when only in `target`.
    pub fn two_way(source: &Value, target: &Value) -> Vec<ObjectConflict> {
        let source_objects = document::object_map(source);
        let target_objects = document::object_map(target);
        info!(
            source_count = source_objects.len(),
            target_count = target_objects.len(),
            "detecting conflicts (two-way)"
        );

        let ids: BTreeSet<&String> = source_objects.keys().chain(target_objects.keys()).collect();
        let mut conflicts = Vec::new();

        for id in ids {
            let s = source_objects.get(id).copied();
            let t = target_objects.get(id).copied();
            let conflict_type = match (s, t) {
                (Some(a), Some(b)) if a == b => continue,
                (Some(_), Some(_)) => ConflictType::ObjectModified,
                (Some(_), None) => ConflictType::ObjectAdded,
                (None, Some(_)) => ConflictType::ObjectDeleted,
                (None, None) => continue,
            };
            debug!(object_id = %id, %conflict_type, "conflict detected");
            conflicts.push(ObjectConflict::object(conflict_type, id, s, t));
        }

        info!(count = conflicts.len(), "conflict detection complete");
        conflicts
    }

    /// Compare both heads against their merge base.
    ///
    /// Changes made on one side only are not conflicts. An object changed
    /// differently on both sides is broken down into per-property conflicts
    /// when all three versions are JSON objects; properties changed on one
    /// side only are left to the merger.
    pub fn three_way(base: &Value, source: &Value, target: &Value) -> Vec<ObjectConflict> {
        let base_objects = document::object_map(base);
        let source_objects = document::object_map(source);
        let target_objects = document::object_map(target);
        info!(
            base_count = base_objects.len(),
            source_count = source_objects.len(),
            target_count = target_objects.len(),
            "detecting conflicts (three-way)"
        );

        let ids: BTreeSet<&String> = base_objects
            .keys()
            .chain(source_objects.keys())
            .chain(target_objects.keys())
            .collect();
        let mut conflicts = Vec::new();

        for id in ids {
            let b = base_objects.get(id).copied();
            let s = source_objects.get(id).copied();
            let t = target_objects.get(id).copied();

            if s == t || s == b || t == b {
                continue;
            }

            match (b, s, t) {
                (Some(Value::Object(bo)), Some(Value::Object(so)), Some(Value::Object(to))) => {
                    let found = property_conflicts(id, bo, so, to);
                    debug!(object_id = %id, count = found.len(), "property conflicts detected");
                    conflicts.extend(found);
                }
                (_, Some(_), Some(_)) => {
                    conflicts.push(ObjectConflict::object(ConflictType::ObjectModified, id, s, t));
                }
                (_, Some(_), None) => {
                    conflicts.push(ObjectConflict::object(ConflictType::ObjectAdded, id, s, t));
                }
                (_, None, Some(_)) => {
                    conflicts.push(ObjectConflict::object(ConflictType::ObjectDeleted, id, s, t));
                }
                (_, None, None) => {}
            }
        }

        info!(count = conflicts.len(), "conflict detection complete");
        conflicts
    }
}

fn property_conflicts(
    object_id: &str,
    base: &Map<String, Value>,
    source: &Map<String, Value>,
    target: &Map<String, Value>,
) -> Vec<ObjectConflict> {
    let keys: BTreeSet<&String> = base.keys().chain(source.keys()).chain(target.keys()).collect();
    keys.into_iter()
        .filter_map(|key| {
            let pb = base.get(key);
            let ps = source.get(key);
            let pt = target.get(key);
            if ps == pt || ps == pb || pt == pb {
                None
            } else {
                Some(ObjectConflict::property(object_id, key, ps, pt))
            }
        })
        .collect()
}
