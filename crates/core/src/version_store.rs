//! Immutable document snapshots: canonical blobs plus metadata rows.
//!
//! A commit writes the blob first, then inserts the metadata row and moves
//! the branch head inside one transaction. If the transaction fails the blob
//! is discarded, so a blob without a row never becomes visible.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::blob::BlobStore;
use crate::branch::{self, advance_head};
use crate::db::{queries, Database};
use crate::document;
use crate::errors::{StorageError, VcsError};
use crate::models::{Branch, BranchStatus, CommitReceipt, DocumentId, NewVersion, Version, VersionType};

/// A serialized document whose blob has been written but whose metadata row
/// is not yet committed.
pub(crate) struct PreparedVersion {
    pub version_id: String,
    pub created_at: DateTime<Utc>,
    pub content_hash: String,
    pub content_size: i64,
}

/// Cosmetic `{branch}-{type}-{YYYYMMDD.HHMMSS}` label.
pub fn version_number(branch_name: &str, version_type: VersionType, at: &DateTime<Utc>) -> String {
    format!("{branch_name}-{version_type}-{}", at.format("%Y%m%d.%H%M%S"))
}

/// Insert the metadata row for a prepared version and move the branch head
/// to it. Must run inside a transaction.
///
/// The expected head is the request's parent when given, else the head read
/// here. A branch that does not exist yet is created with the new version
/// as its head.
pub(crate) fn record_version(
    conn: &Connection,
    request: &NewVersion,
    prepared: &PreparedVersion,
) -> Result<Version, VcsError> {
    if let Some(parent_id) = request.parent_version_id.as_deref() {
        let parent = queries::get_version(conn, parent_id)?
            .ok_or_else(|| VcsError::not_found("version", parent_id))?;
        if parent.document_id != request.document_id {
            return Err(VcsError::validation(
                "parent_version_id",
                format!("version {parent_id} belongs to {}", parent.document_id),
            ));
        }
    }

    let existing = queries::get_branch(conn, &request.branch_name, &request.document_id)?;
    let parent_version_id = match (&existing, &request.parent_version_id) {
        (Some(branch), Some(parent)) if branch.current_version_id != *parent => {
            return Err(VcsError::ConcurrentModification {
                branch: request.branch_name.clone(),
                expected: parent.clone(),
                actual: branch.current_version_id.clone(),
            });
        }
        (_, Some(parent)) => Some(parent.clone()),
        (Some(branch), None) => Some(branch.current_version_id.clone()),
        (None, None) => None,
    };

    let version = Version {
        version_id: prepared.version_id.clone(),
        document_id: request.document_id.clone(),
        branch_name: request.branch_name.clone(),
        parent_version_id: parent_version_id.clone(),
        version_type: request.version_type,
        version_number: version_number(
            &request.branch_name,
            request.version_type,
            &prepared.created_at,
        ),
        branch_seq: queries::next_branch_seq(conn, &request.document_id, &request.branch_name)?,
        commit_message: request.commit_message.clone(),
        author: request.author.clone(),
        created_at: prepared.created_at,
        content_hash: prepared.content_hash.clone(),
        content_size: prepared.content_size,
        metadata: request.metadata.clone(),
    };
    queries::insert_version(conn, &version)?;

    match existing {
        Some(branch) => advance_head(
            conn,
            &request.branch_name,
            &request.document_id,
            &branch.current_version_id,
            &version.version_id,
            BranchStatus::Active,
        )?,
        None => {
            let branch = Branch {
                branch_name: request.branch_name.clone(),
                document_id: request.document_id.clone(),
                base_version_id: parent_version_id.unwrap_or_else(|| version.version_id.clone()),
                current_version_id: version.version_id.clone(),
                status: BranchStatus::Active,
                created_by: request.author.clone(),
                created_at: prepared.created_at,
                last_updated: prepared.created_at,
                description: String::new(),
            };
            queries::insert_branch(conn, &branch)?;
            debug!(branch = %branch.branch_name, "branch created by first commit");
        }
    }

    Ok(version)
}

/// Lowest common ancestor of two versions over their parent chains.
pub(crate) fn find_merge_base(
    conn: &Connection,
    version_a: &str,
    version_b: &str,
) -> Result<Option<String>, VcsError> {
    let ancestors_a = ancestry(conn, version_a)?;
    let seen: HashSet<&str> = ancestors_a.iter().map(String::as_str).collect();
    let base = ancestry(conn, version_b)?
        .into_iter()
        .find(|id| seen.contains(id.as_str()));
    debug!(version_a, version_b, base = ?base, "merge base computed");
    Ok(base)
}

/// The version itself followed by its ancestors, nearest first.
fn ancestry(conn: &Connection, version_id: &str) -> Result<Vec<String>, VcsError> {
    let mut chain = Vec::new();
    let mut visited = HashSet::new();
    let mut cursor = Some(version_id.to_string());
    while let Some(id) = cursor {
        if !visited.insert(id.clone()) {
            break;
        }
        let parent = queries::get_parent_id(conn, &id)?
            .ok_or_else(|| VcsError::not_found("version", id.as_str()))?;
        chain.push(id);
        cursor = parent;
    }
    Ok(chain)
}

/// Persistent store of versions and their content.
#[derive(Clone)]
pub struct VersionStore {
    db: Arc<Database>,
    blobs: BlobStore,
}

impl VersionStore {
    pub fn new(db: Arc<Database>, blobs: BlobStore) -> Self {
        Self { db, blobs }
    }

    /// Serialize and hash a document, then write its blob under a fresh id.
    pub(crate) fn prepare(&self, document: &Value) -> Result<PreparedVersion, VcsError> {
        let bytes = document::canonical_bytes(document).map_err(StorageError::from)?;
        let prepared = PreparedVersion {
            version_id: Uuid::new_v4().to_string(),
            created_at: queries::now(),
            content_hash: document::content_hash(&bytes),
            content_size: i64::try_from(bytes.len()).unwrap_or(i64::MAX),
        };
        self.blobs.write(&prepared.version_id, &bytes)?;
        Ok(prepared)
    }

    /// Drop the blob of a version whose row was never committed.
    pub(crate) fn discard(&self, prepared: &PreparedVersion) {
        self.blobs.discard(&prepared.version_id);
    }

    /// Commit `document` to a branch and advance the branch head.
    pub fn create_version(
        &self,
        document: &Value,
        request: &NewVersion,
    ) -> Result<CommitReceipt, VcsError> {
        branch::require_document_id(&request.document_id)?;
        branch::require_branch_name(&request.branch_name)?;
        document::validate(document)?;

        let prepared = self.prepare(document)?;
        let result = self
            .db
            .transaction(|tx| record_version(tx, request, &prepared));
        let version = match result {
            Ok(version) => version,
            Err(e) => {
                self.discard(&prepared);
                return Err(e);
            }
        };

        info!(
            version_id = %version.version_id,
            document = %version.document_id,
            branch = %version.branch_name,
            branch_seq = version.branch_seq,
            content_hash = %version.content_hash,
            author = %version.author,
            "version created"
        );
        Ok(CommitReceipt {
            version_id: version.version_id,
            version_number: version.version_number,
            content_hash: version.content_hash,
        })
    }

    /// The stored document of a version.
    pub fn get_version_data(&self, version_id: &str) -> Result<Value, VcsError> {
        let bytes = self
            .blobs
            .read(version_id)?
            .ok_or_else(|| VcsError::not_found("version content", version_id))?;
        let document = serde_json::from_slice(&bytes).map_err(StorageError::from)?;
        Ok(document)
    }

    pub fn get_version(&self, version_id: &str) -> Result<Version, VcsError> {
        queries::get_version(&self.db.conn(), version_id)?
            .ok_or_else(|| VcsError::not_found("version", version_id))
    }

    /// Versions of a document, newest first, optionally for one branch.
    pub fn get_version_history(
        &self,
        document_id: &DocumentId,
        branch_name: Option<&str>,
    ) -> Result<Vec<Version>, VcsError> {
        Ok(queries::list_versions(
            &self.db.conn(),
            document_id,
            branch_name,
        )?)
    }

    /// Whether the stored blob still hashes to the recorded `content_hash`.
    pub fn verify_version(&self, version_id: &str) -> Result<bool, VcsError> {
        let version = self.get_version(version_id)?;
        let bytes = self
            .blobs
            .read(version_id)?
            .ok_or_else(|| VcsError::not_found("version content", version_id))?;
        let ok = document::content_hash(&bytes) == version.content_hash;
        if !ok {
            warn!(version_id, "stored content does not match its hash");
        }
        Ok(ok)
    }

    /// Commit the content of an earlier version as the new head of
    /// `branch_name`.
    pub fn restore_version(
        &self,
        version_id: &str,
        branch_name: &str,
        author: &str,
        commit_message: Option<&str>,
    ) -> Result<CommitReceipt, VcsError> {
        let source = self.get_version(version_id)?;
        let document = self.get_version_data(version_id)?;
        let message = commit_message
            .map(str::to_string)
            .unwrap_or_else(|| format!("Revert to version {}", source.version_number));
        let request = NewVersion::new(source.document_id.clone(), branch_name, message, author)
            .version_type(VersionType::Patch)
            .meta("restored_from", source.version_id.as_str());

        let receipt = self.create_version(&document, &request)?;
        info!(
            restored_from = version_id,
            version_id = %receipt.version_id,
            branch = branch_name,
            "version restored"
        );
        Ok(receipt)
    }

    /// Nearest version reachable from both through parent links.
    pub fn merge_base(&self, version_a: &str, version_b: &str) -> Result<Option<String>, VcsError> {
        find_merge_base(&self.db.conn(), version_a, version_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> DocumentId {
        DocumentId::new("hq", "l1")
    }

    fn setup() -> (VersionStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::in_memory().unwrap());
        db.initialize().unwrap();
        let blobs = BlobStore::open(dir.path().join("versions")).unwrap();
        (VersionStore::new(db, blobs), dir)
    }

    fn commit(store: &VersionStore, document: Value, branch: &str) -> CommitReceipt {
        store
            .create_version(&document, &NewVersion::new(doc(), branch, "msg", "ann"))
            .unwrap()
    }

    #[test]
    fn test_round_trip_and_hash() {
        let (store, _dir) = setup();
        let document = json!({"name": "L1", "objects": [{"id": "r1", "x": 1}]});
        let receipt = commit(&store, document.clone(), "main");

        assert_eq!(store.get_version_data(&receipt.version_id).unwrap(), document);
        assert_eq!(
            receipt.content_hash,
            document::hash_document(&document).unwrap()
        );
        assert!(receipt.version_number.starts_with("main-minor-"));
        assert!(store.verify_version(&receipt.version_id).unwrap());
    }

    #[test]
    fn test_first_commit_creates_branch_and_chains_parents() {
        let (store, _dir) = setup();
        let v0 = commit(&store, json!({"objects": []}), "main");
        let v1 = commit(&store, json!({"objects": [{"id": "r1"}]}), "main");

        let first = store.get_version(&v0.version_id).unwrap();
        let second = store.get_version(&v1.version_id).unwrap();
        assert_eq!(first.parent_version_id, None);
        assert_eq!(first.branch_seq, 1);
        assert_eq!(second.parent_version_id.as_deref(), Some(v0.version_id.as_str()));
        assert_eq!(second.branch_seq, 2);

        let history: Vec<_> = store
            .get_version_history(&doc(), Some("main"))
            .unwrap()
            .into_iter()
            .map(|v| v.version_id)
            .collect();
        assert_eq!(history, vec![v1.version_id, v0.version_id]);
    }

    #[test]
    fn test_stale_parent_is_rejected_and_blob_discarded() {
        let (store, dir) = setup();
        let v0 = commit(&store, json!({}), "main");
        commit(&store, json!({"a": 1}), "main");

        let err = store
            .create_version(
                &json!({"a": 2}),
                &NewVersion::new(doc(), "main", "late", "bob").parent(v0.version_id.as_str()),
            )
            .unwrap_err();
        assert!(err.is_retryable());

        let blobs = std::fs::read_dir(dir.path().join("versions")).unwrap().count();
        assert_eq!(blobs, 2);
        assert_eq!(store.get_version_history(&doc(), None).unwrap().len(), 2);
    }

    #[test]
    fn test_invalid_documents_and_parents() {
        let (store, _dir) = setup();
        let err = store
            .create_version(&json!([1]), &NewVersion::new(doc(), "main", "m", "a"))
            .unwrap_err();
        assert!(matches!(err, VcsError::Validation { .. }));

        let err = store
            .create_version(&json!({}), &NewVersion::new(doc(), "", "m", "a"))
            .unwrap_err();
        assert!(matches!(err, VcsError::Validation { ref field, .. } if field == "branch_name"));

        let err = store
            .create_version(
                &json!({}),
                &NewVersion::new(doc(), "main", "m", "a").parent("missing"),
            )
            .unwrap_err();
        assert!(matches!(err, VcsError::NotFound { entity: "version", .. }));
    }

    #[test]
    fn test_missing_version_data_is_not_found() {
        let (store, _dir) = setup();
        let err = store.get_version_data("nope").unwrap_err();
        assert!(matches!(err, VcsError::NotFound { .. }));
    }

    #[test]
    fn test_restore_commits_old_content() {
        let (store, _dir) = setup();
        let original = json!({"objects": [{"id": "r1", "x": 1}]});
        let v0 = commit(&store, original.clone(), "main");
        commit(&store, json!({"objects": []}), "main");

        let restored = store
            .restore_version(&v0.version_id, "main", "ann", None)
            .unwrap();
        assert_eq!(restored.content_hash, v0.content_hash);
        assert_ne!(restored.version_id, v0.version_id);
        assert_eq!(store.get_version_data(&restored.version_id).unwrap(), original);

        let version = store.get_version(&restored.version_id).unwrap();
        assert_eq!(version.version_type, VersionType::Patch);
        assert_eq!(version.metadata["restored_from"], json!(v0.version_id));
        assert!(version.commit_message.starts_with("Revert to version main-minor-"));
    }

    #[test]
    fn test_merge_base() {
        let (store, _dir) = setup();
        let v0 = commit(&store, json!({"n": 0}), "main");
        let v1 = commit(&store, json!({"n": 1}), "main");
        let f1 = store
            .create_version(
                &json!({"n": 2}),
                &NewVersion::new(doc(), "feat", "m", "a").parent(v0.version_id.as_str()),
            )
            .unwrap();
        let other = commit(&store, json!({"n": 3}), "island");

        assert_eq!(
            store.merge_base(&v1.version_id, &f1.version_id).unwrap(),
            Some(v0.version_id.clone())
        );
        assert_eq!(
            store.merge_base(&v1.version_id, &v0.version_id).unwrap(),
            Some(v0.version_id.clone())
        );
        assert_eq!(
            store.merge_base(&v1.version_id, &other.version_id).unwrap(),
            None
        );
    }
}
