//! Builds the merged document for a merge request from both heads, the
//! optional merge base, and the recorded conflict resolutions.

use std::collections::{BTreeSet, HashMap};

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::conflict::resolver::{ConflictResolver, Resolution};
use crate::document::{self, OBJECTS_KEY};
use crate::models::Conflict;

/// Snapshots taking part in a merge.
#[derive(Debug, Clone, Copy)]
pub struct MergeInputs<'a> {
    /// Common ancestor. `None` means the heads were compared two-way.
    pub base: Option<&'a Value>,
    pub source: &'a Value,
    pub target: &'a Value,
}

/// Stateless document merger.
pub struct Merger;

impl Merger {
    /// Produce the merged document.
    ///
    /// Objects keep the source's order, followed by target-only objects in
    /// the target's order. An object with a conflict takes the value its
    /// resolution selects; any other object is merged automatically. An
    /// unresolved conflict keeps the target value.
    pub fn materialize(inputs: MergeInputs<'_>, conflicts: &[Conflict]) -> Value {
        let mut object_resolutions: HashMap<&str, (&Conflict, Resolution)> = HashMap::new();
        let mut property_resolutions: HashMap<(&str, &str), (&Conflict, Resolution)> =
            HashMap::new();
        for conflict in conflicts {
            let Some(label) = conflict.resolution.as_deref() else {
                warn!(conflict_id = %conflict.conflict_id, "materializing with unresolved conflict");
                continue;
            };
            let resolution = Resolution::parse(label);
            match conflict.property_name.as_deref() {
                Some(property) => {
                    property_resolutions
                        .insert((conflict.object_id.as_str(), property), (conflict, resolution));
                }
                None => {
                    object_resolutions.insert(conflict.object_id.as_str(), (conflict, resolution));
                }
            }
        }

        let base_objects = inputs.base.map(document::object_map).unwrap_or_default();
        let source_objects = document::object_map(inputs.source);
        let target_objects = document::object_map(inputs.target);

        let mut order: Vec<String> = document::ordered_objects(inputs.source)
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        order.extend(
            document::ordered_objects(inputs.target)
                .into_iter()
                .map(|(id, _)| id)
                .filter(|id| !source_objects.contains_key(id)),
        );

        let mut merged_objects = Vec::with_capacity(order.len());
        for id in &order {
            let b = base_objects.get(id).copied();
            let s = source_objects.get(id).copied();
            let t = target_objects.get(id).copied();

            let merged = if let Some((conflict, resolution)) = object_resolutions.get(id.as_str())
            {
                debug!(object_id = %id, resolution = %resolution, "applying object resolution");
                ConflictResolver::resolve_object(
                    resolution,
                    id,
                    conflict.source_value.as_ref().or(s),
                    conflict.target_value.as_ref().or(t),
                )
            } else if inputs.base.is_some() {
                merge_object(id, b, s, t, &property_resolutions)
            } else if s == t {
                s.cloned()
            } else {
                warn!(object_id = %id, "objects differ without a recorded conflict, keeping target");
                t.cloned()
            };

            if let Some(value) = merged {
                merged_objects.push(value);
            }
        }

        let mut root = match inputs.base {
            Some(base) => merge_top_level(base, inputs.source, inputs.target),
            None => inputs.source.as_object().cloned().unwrap_or_default(),
        };
        let had_objects = inputs.source.get(OBJECTS_KEY).is_some()
            || inputs.target.get(OBJECTS_KEY).is_some();
        if had_objects {
            root.insert(OBJECTS_KEY.to_string(), Value::Array(merged_objects));
        } else {
            root.remove(OBJECTS_KEY);
        }

        info!(
            objects = order.len(),
            resolutions = object_resolutions.len() + property_resolutions.len(),
            three_way = inputs.base.is_some(),
            "materialized merged document"
        );
        Value::Object(root)
    }
}

/// Three-way merge of one object with no object-level conflict.
fn merge_object(
    id: &str,
    base: Option<&Value>,
    source: Option<&Value>,
    target: Option<&Value>,
    property_resolutions: &HashMap<(&str, &str), (&Conflict, Resolution)>,
) -> Option<Value> {
    if source == target || source == base {
        return target.cloned();
    }
    if target == base {
        return source.cloned();
    }

    let (Some(Value::Object(bo)), Some(Value::Object(so)), Some(Value::Object(to))) =
        (base, source, target)
    else {
        warn!(object_id = id, "object changed on both sides without a recorded conflict, keeping target");
        return target.cloned();
    };

    let keys: BTreeSet<&String> = bo.keys().chain(so.keys()).chain(to.keys()).collect();
    let mut merged = Map::new();
    for key in keys {
        let pb = bo.get(key);
        let ps = so.get(key);
        let pt = to.get(key);
        let value = if ps == pt || ps == pb {
            pt.cloned()
        } else if pt == pb {
            ps.cloned()
        } else if let Some((_, resolution)) = property_resolutions.get(&(id, key.as_str())) {
            ConflictResolver::resolve_property(resolution, id, key, ps, pt)
        } else {
            warn!(object_id = id, property = %key, "unresolved property conflict, keeping target");
            pt.cloned()
        };
        if let Some(value) = value {
            merged.insert(key.clone(), value);
        }
    }
    Some(Value::Object(merged))
}

/// Three-way merge of the keys outside `objects`; the source wins when
/// both sides changed a key differently.
fn merge_top_level(base: &Value, source: &Value, target: &Value) -> Map<String, Value> {
    let empty = Map::new();
    let bo = base.as_object().unwrap_or(&empty);
    let so = source.as_object().unwrap_or(&empty);
    let to = target.as_object().unwrap_or(&empty);

    let keys: BTreeSet<&String> = bo
        .keys()
        .chain(so.keys())
        .chain(to.keys())
        .filter(|k| k.as_str() != OBJECTS_KEY)
        .collect();
    let mut merged = Map::new();
    for key in keys {
        let pb = bo.get(key);
        let ps = so.get(key);
        let pt = to.get(key);
        let value = if ps == pb { pt } else { ps };
        if let Some(value) = value {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConflictType;
    use chrono::Utc;
    use serde_json::json;

    fn resolved(
        object_id: &str,
        property: Option<&str>,
        conflict_type: ConflictType,
        source: Option<Value>,
        target: Option<Value>,
        resolution: &str,
    ) -> Conflict {
        Conflict {
            conflict_id: format!("c-{object_id}"),
            merge_id: "m1".into(),
            conflict_type,
            object_id: object_id.into(),
            property_name: property.map(str::to_string),
            source_value: source,
            target_value: target,
            resolution: Some(resolution.into()),
            resolved_by: Some("ann".into()),
            resolved_at: Some(Utc::now()),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_two_way_source_wins_equals_source() {
        let source = json!({"name": "L1", "objects": [{"id": "r1", "x": 2}]});
        let target = json!({"name": "L1", "objects": [{"id": "r1", "x": 1}]});
        let conflicts = vec![resolved(
            "r1",
            None,
            ConflictType::ObjectModified,
            Some(json!({"id": "r1", "x": 2})),
            Some(json!({"id": "r1", "x": 1})),
            "source_wins",
        )];
        let merged = Merger::materialize(
            MergeInputs {
                base: None,
                source: &source,
                target: &target,
            },
            &conflicts,
        );
        assert_eq!(merged, source);
    }

    #[test]
    fn test_two_way_mixed_resolutions_keep_source_order() {
        let source = json!({"objects": [{"id": "r2"}, {"id": "r1", "x": 2}]});
        let target = json!({"objects": [{"id": "r1", "x": 1}, {"id": "r3"}]});
        let conflicts = vec![
            resolved(
                "r1",
                None,
                ConflictType::ObjectModified,
                Some(json!({"id": "r1", "x": 2})),
                Some(json!({"id": "r1", "x": 1})),
                "target_wins",
            ),
            resolved("r2", None, ConflictType::ObjectAdded, Some(json!({"id": "r2"})), None, "source_wins"),
            resolved("r3", None, ConflictType::ObjectDeleted, None, Some(json!({"id": "r3"})), "source_wins"),
        ];
        let merged = Merger::materialize(
            MergeInputs {
                base: None,
                source: &source,
                target: &target,
            },
            &conflicts,
        );
        assert_eq!(
            merged,
            json!({"objects": [{"id": "r2"}, {"id": "r1", "x": 1}]})
        );
    }

    #[test]
    fn test_three_way_keeps_both_sides_changes() {
        let base = json!({"title": "A", "objects": [{"id": "r1", "x": 1, "y": 1}, {"id": "r2"}]});
        let source = json!({"title": "A", "objects": [{"id": "r1", "x": 2, "y": 1}, {"id": "r2"}, {"id": "d1"}]});
        let target = json!({"title": "B", "objects": [{"id": "r1", "x": 1, "y": 7}]});
        let merged = Merger::materialize(
            MergeInputs {
                base: Some(&base),
                source: &source,
                target: &target,
            },
            &[],
        );
        assert_eq!(
            merged,
            json!({"title": "B", "objects": [{"id": "r1", "x": 2, "y": 7}, {"id": "d1"}]})
        );
    }

    #[test]
    fn test_three_way_property_resolution() {
        let base = json!({"objects": [{"id": "r1", "x": 1, "y": 1}]});
        let source = json!({"objects": [{"id": "r1", "x": 2, "y": 5}]});
        let target = json!({"objects": [{"id": "r1", "x": 3, "y": 1}]});
        let conflicts = vec![resolved(
            "r1",
            Some("x"),
            ConflictType::PropertyConflict,
            Some(json!(2)),
            Some(json!(3)),
            "10",
        )];
        let merged = Merger::materialize(
            MergeInputs {
                base: Some(&base),
                source: &source,
                target: &target,
            },
            &conflicts,
        );
        assert_eq!(merged, json!({"objects": [{"id": "r1", "x": 10, "y": 5}]}));
    }

    #[test]
    fn test_document_without_objects_stays_without() {
        let source = json!({"name": "L1"});
        let target = json!({"name": "L0"});
        let merged = Merger::materialize(
            MergeInputs {
                base: None,
                source: &source,
                target: &target,
            },
            &[],
        );
        assert_eq!(merged, source);
    }
}
