//! Conflict resolution labels and how each one settles a value.
//!
//! A resolution is recorded as a free-form label. The well-known labels
//! `source_wins`, `target_wins` and `merge` map to fixed behaviour; any other
//! label is a custom resolution whose text may carry a JSON replacement.

use std::fmt;

use serde_json::Value;
use tracing::warn;

/// Parsed form of a recorded resolution label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Keep the source branch's value.
    SourceWins,
    /// Keep the target branch's value.
    TargetWins,
    /// Start from the source object and overlay the target's properties.
    Merge,
    /// Caller-supplied text; JSON content is used as the replacement value.
    Custom(String),
}

impl Resolution {
    pub fn parse(label: &str) -> Self {
        match label.trim() {
            "source_wins" => Self::SourceWins,
            "target_wins" => Self::TargetWins,
            "merge" => Self::Merge,
            _ => Self::Custom(label.to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::SourceWins => "source_wins",
            Self::TargetWins => "target_wins",
            Self::Merge => "merge",
            Self::Custom(text) => text,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Stateless helpers that apply a [`Resolution`] to conflicting values.
///
/// `None` stands for "absent on that side"; returning `None` removes the
/// object or property from the merged document.
pub struct ConflictResolver;

impl ConflictResolver {
    /// Settle a whole-object conflict.
    pub fn resolve_object(
        resolution: &Resolution,
        object_id: &str,
        source: Option<&Value>,
        target: Option<&Value>,
    ) -> Option<Value> {
        match resolution {
            Resolution::SourceWins => source.cloned(),
            Resolution::TargetWins => target.cloned(),
            Resolution::Merge => overlay(source, target),
            Resolution::Custom(text) => match serde_json::from_str::<Value>(text) {
                Ok(Value::Null) => None,
                Ok(Value::Object(mut replacement)) => {
                    // The replacement keeps the id it is indexed under.
                    if let Some(id) = source.or(target).and_then(|v| v.get("id")) {
                        replacement.insert("id".to_string(), id.clone());
                    }
                    Some(Value::Object(replacement))
                }
                _ => {
                    warn!(
                        object_id,
                        resolution = %text,
                        "custom resolution is not a JSON object, keeping target value"
                    );
                    target.cloned()
                }
            },
        }
    }

    /// Settle a single-property conflict.
    pub fn resolve_property(
        resolution: &Resolution,
        object_id: &str,
        property: &str,
        source: Option<&Value>,
        target: Option<&Value>,
    ) -> Option<Value> {
        match resolution {
            Resolution::SourceWins => source.cloned(),
            Resolution::TargetWins => target.cloned(),
            Resolution::Merge => match (source, target) {
                (Some(Value::Object(_)), Some(Value::Object(_))) => overlay(source, target),
                (Some(s), _) => Some(s.clone()),
                (None, t) => t.cloned(),
            },
            Resolution::Custom(text) => match serde_json::from_str::<Value>(text) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(
                        object_id,
                        property,
                        resolution = %text,
                        "custom resolution is not valid JSON, keeping target value"
                    );
                    target.cloned()
                }
            },
        }
    }
}

/// Source object with the target's properties written over it. When only
/// one side is an object, that side is returned.
fn overlay(source: Option<&Value>, target: Option<&Value>) -> Option<Value> {
    match (source, target) {
        (Some(Value::Object(s)), Some(Value::Object(t))) => {
            let mut merged = s.clone();
            for (key, value) in t {
                merged.insert(key.clone(), value.clone());
            }
            Some(Value::Object(merged))
        }
        (Some(s), None) => Some(s.clone()),
        (_, Some(t)) => Some(t.clone()),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_labels() {
        assert_eq!(Resolution::parse("source_wins"), Resolution::SourceWins);
        assert_eq!(Resolution::parse("target_wins"), Resolution::TargetWins);
        assert_eq!(Resolution::parse(" merge "), Resolution::Merge);
        assert_eq!(
            Resolution::parse("keep the bigger room"),
            Resolution::Custom("keep the bigger room".into())
        );
        assert_eq!(Resolution::Merge.to_string(), "merge");
    }

    #[test]
    fn test_resolve_object_sides() {
        let s = json!({"id": "r1", "x": 2});
        let t = json!({"id": "r1", "x": 1});
        assert_eq!(
            ConflictResolver::resolve_object(&Resolution::SourceWins, "r1", Some(&s), Some(&t)),
            Some(s.clone())
        );
        assert_eq!(
            ConflictResolver::resolve_object(&Resolution::TargetWins, "r1", Some(&s), Some(&t)),
            Some(t.clone())
        );
        assert_eq!(
            ConflictResolver::resolve_object(&Resolution::SourceWins, "r1", None, Some(&t)),
            None
        );
    }

    #[test]
    fn test_merge_overlays_target_properties() {
        let s = json!({"id": "r1", "x": 2, "label": "lab"});
        let t = json!({"id": "r1", "x": 1, "area": 20});
        let merged =
            ConflictResolver::resolve_object(&Resolution::Merge, "r1", Some(&s), Some(&t)).unwrap();
        assert_eq!(merged, json!({"id": "r1", "x": 1, "label": "lab", "area": 20}));

        let only_source =
            ConflictResolver::resolve_object(&Resolution::Merge, "r1", Some(&s), None).unwrap();
        assert_eq!(only_source, s);
    }

    #[test]
    fn test_custom_object_resolution() {
        let s = json!({"id": "r1", "x": 2});
        let t = json!({"id": "r1", "x": 1});
        let custom = Resolution::parse(r#"{"x": 7}"#);
        assert_eq!(
            ConflictResolver::resolve_object(&custom, "r1", Some(&s), Some(&t)),
            Some(json!({"id": "r1", "x": 7}))
        );
        assert_eq!(
            ConflictResolver::resolve_object(&Resolution::parse("null"), "r1", Some(&s), Some(&t)),
            None
        );
        assert_eq!(
            ConflictResolver::resolve_object(
                &Resolution::parse("looks fine"),
                "r1",
                Some(&s),
                Some(&t)
            ),
            Some(t)
        );
    }

    #[test]
    fn test_resolve_property() {
        let custom = Resolution::parse("42");
        assert_eq!(
            ConflictResolver::resolve_property(&custom, "r1", "x", Some(&json!(2)), Some(&json!(1))),
            Some(json!(42))
        );
        assert_eq!(
            ConflictResolver::resolve_property(
                &Resolution::Merge,
                "r1",
                "x",
                Some(&json!(2)),
                Some(&json!(1))
            ),
            Some(json!(2))
        );
        assert_eq!(
            ConflictResolver::resolve_property(
                &Resolution::parse("not json"),
                "r1",
                "x",
                Some(&json!(2)),
                Some(&json!(1))
            ),
            Some(json!(1))
        );
    }
}
