//! Domain model types used throughout floorvc.
//!
//! These types bridge the components, the database layer and callers such as
//! the CLI. Enums are stored as their snake_case string form.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// A string column did not hold a known enum value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Implements `Display` and `FromStr` over a fixed set of snake_case labels.
macro_rules! string_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $label:literal),+ $(,)? }) => {
        impl $ty {
            /// The stored / wire label of this value.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $label,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($label => Ok(Self::$variant),)+
                    other => Err(ParseEnumError {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Document scope
// ---------------------------------------------------------------------------

/// Composite document scope: one floor of one building.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId {
    pub building_id: String,
    pub floor_id: String,
}

impl DocumentId {
    pub fn new(building_id: impl Into<String>, floor_id: impl Into<String>) -> Self {
        Self {
            building_id: building_id.into(),
            floor_id: floor_id.into(),
        }
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.building_id, self.floor_id)
    }
}

/// Parses the `building/floor` form produced by `Display`.
impl FromStr for DocumentId {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((building, floor)) if !building.is_empty() && !floor.is_empty() => {
                Ok(Self::new(building, floor))
            }
            _ => Err(ParseEnumError {
                kind: "document id",
                value: s.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Versions
// ---------------------------------------------------------------------------

/// Kind of change a version represents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionType {
    Major,
    #[default]
    Minor,
    Patch,
    Branch,
}

string_enum!(VersionType, "version type", {
    Major => "major",
    Minor => "minor",
    Patch => "patch",
    Branch => "branch",
});

/// Immutable snapshot record. Content lives in the blob area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub version_id: String,
    pub document_id: DocumentId,
    pub branch_name: String,
    pub parent_version_id: Option<String>,
    pub version_type: VersionType,
    /// Cosmetic `{branch}-{type}-{timestamp}` label, not an ordering key.
    pub version_number: String,
    /// Strictly monotonic position within the branch, starting at 1.
    pub branch_seq: i64,
    pub commit_message: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub content_hash: String,
    pub content_size: i64,
    pub metadata: Map<String, Value>,
}

/// Input for [`crate::version_store::VersionStore::create_version`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewVersion {
    pub document_id: DocumentId,
    pub branch_name: String,
    pub commit_message: String,
    pub author: String,
    /// Head the caller committed on top of. Checked against the branch head.
    pub parent_version_id: Option<String>,
    pub version_type: VersionType,
    pub metadata: Map<String, Value>,
}

impl NewVersion {
    pub fn new(
        document_id: DocumentId,
        branch_name: impl Into<String>,
        commit_message: impl Into<String>,
        author: impl Into<String>,
    ) -> Self {
        Self {
            document_id,
            branch_name: branch_name.into(),
            commit_message: commit_message.into(),
            author: author.into(),
            parent_version_id: None,
            version_type: VersionType::default(),
            metadata: Map::new(),
        }
    }

    pub fn parent(mut self, version_id: impl Into<String>) -> Self {
        self.parent_version_id = Some(version_id.into());
        self
    }

    pub fn version_type(mut self, version_type: VersionType) -> Self {
        self.version_type = version_type;
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Result of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReceipt {
    pub version_id: String,
    pub version_number: String,
    pub content_hash: String,
}

// ---------------------------------------------------------------------------
// Branches
// ---------------------------------------------------------------------------

/// Lifecycle status of a branch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchStatus {
    #[default]
    Active,
    Merged,
    Deleted,
    Conflict,
}

string_enum!(BranchStatus, "branch status", {
    Active => "active",
    Merged => "merged",
    Deleted => "deleted",
    Conflict => "conflict",
});

/// Mutable head pointer, unique per `(branch_name, document_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub branch_name: String,
    pub document_id: DocumentId,
    pub base_version_id: String,
    pub current_version_id: String,
    pub status: BranchStatus,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub description: String,
}

// ---------------------------------------------------------------------------
// Merge requests
// ---------------------------------------------------------------------------

/// Merge request state machine.
///
/// `pending -> completed`, `pending -> conflict -> completed`, or any
/// non-terminal state `-> failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Conflict,
}

string_enum!(MergeStatus, "merge status", {
    Pending => "pending",
    InProgress => "in_progress",
    Completed => "completed",
    Failed => "failed",
    Conflict => "conflict",
});

impl MergeStatus {
    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// A proposal to integrate one branch's head into another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeRequest {
    pub merge_id: String,
    pub source_branch: String,
    pub target_branch: String,
    pub document_id: DocumentId,
    pub status: MergeStatus,
    /// Ids of the conflicts owned by this request, ascending by object id.
    pub conflicts: Vec<String>,
    pub resolution_strategy: String,
    /// Source head at the time the request was opened.
    pub source_version_id: String,
    /// Target head at the time the request was opened.
    pub target_version_id: String,
    /// Common ancestor used by three-way detection.
    pub base_version_id: Option<String>,
    /// Head the target branch moved to when the merge completed.
    pub result_version_id: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub merged_by: Option<String>,
    pub merged_at: Option<DateTime<Utc>>,
    pub description: String,
}

/// Result of opening a merge request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeRequestReceipt {
    pub merge_id: String,
    pub status: MergeStatus,
    pub conflicts: Vec<Conflict>,
    pub has_conflicts: bool,
}

/// A merge request together with its conflict records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeRequestDetails {
    pub request: MergeRequest,
    /// Ascending by object id, then property name.
    pub conflicts: Vec<Conflict>,
}

impl MergeRequestDetails {
    pub fn unresolved(&self) -> usize {
        self.conflicts.iter().filter(|c| !c.is_resolved()).count()
    }
}

/// Result of executing a merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub merge_id: String,
    /// The target branch head after the merge.
    pub head_version_id: String,
    /// Whether a new merge version had to be committed.
    pub created_version: bool,
}

// ---------------------------------------------------------------------------
// Conflicts
// ---------------------------------------------------------------------------

/// Categorisation of a detected divergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// The object exists on both sides with different content.
    ObjectModified,
    /// The object exists only on the source side.
    ObjectAdded,
    /// The object exists only on the target side.
    ObjectDeleted,
    /// One property of an object was changed differently on both sides.
    PropertyConflict,
}

string_enum!(ConflictType, "conflict type", {
    ObjectModified => "object_modified",
    ObjectAdded => "object_added",
    ObjectDeleted => "object_deleted",
    PropertyConflict => "property_conflict",
});

/// A persisted conflict, owned by exactly one merge request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub conflict_id: String,
    pub merge_id: String,
    pub conflict_type: ConflictType,
    pub object_id: String,
    /// Set only for `property_conflict`.
    pub property_name: Option<String>,
    pub source_value: Option<Value>,
    pub target_value: Option<Value>,
    pub resolution: Option<String>,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Conflict {
    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }
}

// ---------------------------------------------------------------------------
// Annotations and comments
// ---------------------------------------------------------------------------

/// A note attached to a version, optionally to one object and a 2-D position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub annotation_id: String,
    pub version_id: String,
    pub document_id: DocumentId,
    pub object_id: Option<String>,
    pub position_x: Option<f64>,
    pub position_y: Option<f64>,
    pub annotation_type: String,
    pub title: String,
    pub content: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for [`crate::annotations::AnnotationStore::add_annotation`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewAnnotation {
    pub version_id: String,
    pub document_id: DocumentId,
    pub title: String,
    pub content: String,
    pub author: String,
    pub object_id: Option<String>,
    pub position_x: Option<f64>,
    pub position_y: Option<f64>,
    pub annotation_type: String,
}

impl NewAnnotation {
    /// A plain `note` annotation with no object or position.
    pub fn note(
        version_id: impl Into<String>,
        document_id: DocumentId,
        title: impl Into<String>,
        content: impl Into<String>,
        author: impl Into<String>,
    ) -> Self {
        Self {
            version_id: version_id.into(),
            document_id,
            title: title.into(),
            content: content.into(),
            author: author.into(),
            object_id: None,
            position_x: None,
            position_y: None,
            annotation_type: "note".to_string(),
        }
    }

    pub fn on_object(mut self, object_id: impl Into<String>) -> Self {
        self.object_id = Some(object_id.into());
        self
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.position_x = Some(x);
        self.position_y = Some(y);
        self
    }
}

/// What a comment is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParentType {
    Version,
    Annotation,
}

string_enum!(ParentType, "comment parent type", {
    Version => "version",
    Annotation => "annotation",
});

/// Free-text discussion attached to a version or an annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub comment_id: String,
    pub parent_id: String,
    pub parent_type: ParentType,
    pub author: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_labels_round_trip() {
        for status in [
            MergeStatus::Pending,
            MergeStatus::InProgress,
            MergeStatus::Completed,
            MergeStatus::Failed,
            MergeStatus::Conflict,
        ] {
            assert_eq!(status.as_str().parse::<MergeStatus>().unwrap(), status);
        }
        assert_eq!(
            "property_conflict".parse::<ConflictType>().unwrap(),
            ConflictType::PropertyConflict
        );
        assert_eq!(VersionType::default(), VersionType::Minor);
    }

    #[test]
    fn test_unknown_label_is_rejected() {
        let err = "merged_ish".parse::<BranchStatus>().unwrap_err();
        assert_eq!(err.kind, "branch status");
        assert_eq!(err.to_string(), "unknown branch status 'merged_ish'");
    }

    #[test]
    fn test_terminal_merge_states() {
        assert!(MergeStatus::Completed.is_terminal());
        assert!(MergeStatus::Failed.is_terminal());
        assert!(!MergeStatus::Conflict.is_terminal());
        assert!(!MergeStatus::Pending.is_terminal());
    }

    #[test]
    fn test_document_id_display_and_parse() {
        let doc = DocumentId::new("hq", "level-2");
        assert_eq!(doc.to_string(), "hq/level-2");
        assert_eq!("hq/level-2".parse::<DocumentId>().unwrap(), doc);
        assert!("no-slash".parse::<DocumentId>().is_err());
        assert!("/floor".parse::<DocumentId>().is_err());
    }

    #[test]
    fn test_new_annotation_builder() {
        let a = NewAnnotation::note("v1", DocumentId::new("b", "f"), "t", "c", "ann")
            .on_object("r1")
            .at(1.5, 2.0);
        assert_eq!(a.object_id.as_deref(), Some("r1"));
        assert_eq!(a.position_x, Some(1.5));
        assert_eq!(a.annotation_type, "note");
    }
}
