//! The engine facade: one value wiring the stores together, constructed
//! once and shared by every caller.

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::annotations::{AnnotationStore, CommentStore};
use crate::blob::BlobStore;
use crate::branch::BranchRegistry;
use crate::config::{EngineConfig, MergeConfig};
use crate::conflict::ObjectConflict;
use crate::db::Database;
use crate::errors::{DatabaseError, VcsError};
use crate::merge::MergeCoordinator;
use crate::models::{
    Annotation, Branch, Comment, CommitReceipt, Conflict, DocumentId, MergeOutcome, MergeRequest,
    MergeRequestDetails, MergeRequestReceipt, MergeStatus, NewAnnotation, NewVersion, ParentType,
    Version,
};
use crate::version_store::VersionStore;

/// Floor-plan version control engine.
///
/// Cheap to share behind an `Arc`; every operation is synchronous and
/// returns a typed [`VcsError`] on failure.
pub struct VersionControl {
    db: Arc<Database>,
    versions: VersionStore,
    branches: BranchRegistry,
    merges: MergeCoordinator,
    annotations: AnnotationStore,
    comments: CommentStore,
}

impl VersionControl {
    /// Open the database and blob area named by `config`, running any
    /// pending migrations.
    pub fn open(config: &EngineConfig) -> Result<Self, VcsError> {
        let storage = &config.storage;
        std::fs::create_dir_all(&storage.data_dir).map_err(DatabaseError::from)?;

        let db = Database::new(storage.database_path())?;
        db.initialize()?;
        let blobs = BlobStore::open(storage.blob_path())?;

        let mut engine = Self::new(Arc::new(db), blobs, config.merge);
        engine.annotations = engine
            .annotations
            .with_search_limit(config.annotations.search_limit);

        info!(
            data_dir = %storage.data_dir.display(),
            detection = ?config.merge.detection,
            strategy = config.merge.strategy.as_str(),
            "version control engine ready"
        );
        Ok(engine)
    }

    /// Wire the engine over an already-initialized database.
    pub fn new(db: Arc<Database>, blobs: BlobStore, merge: MergeConfig) -> Self {
        let versions = VersionStore::new(db.clone(), blobs);
        Self {
            branches: BranchRegistry::new(db.clone()),
            merges: MergeCoordinator::new(db.clone(), versions.clone(), merge),
            annotations: AnnotationStore::new(db.clone()),
            comments: CommentStore::new(db.clone()),
            versions,
            db,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn versions(&self) -> &VersionStore {
        &self.versions
    }

    pub fn branches(&self) -> &BranchRegistry {
        &self.branches
    }

    pub fn merges(&self) -> &MergeCoordinator {
        &self.merges
    }

    pub fn annotations(&self) -> &AnnotationStore {
        &self.annotations
    }

    pub fn comments(&self) -> &CommentStore {
        &self.comments
    }

    // -----------------------------------------------------------------------
    // Versions
    // -----------------------------------------------------------------------

    pub fn create_version(
        &self,
        document: &Value,
        request: &NewVersion,
    ) -> Result<CommitReceipt, VcsError> {
        self.versions.create_version(document, request)
    }

    pub fn get_version_data(&self, version_id: &str) -> Result<Value, VcsError> {
        self.versions.get_version_data(version_id)
    }

    pub fn get_version(&self, version_id: &str) -> Result<Version, VcsError> {
        self.versions.get_version(version_id)
    }

    pub fn get_version_history(
        &self,
        document_id: &DocumentId,
        branch_name: Option<&str>,
    ) -> Result<Vec<Version>, VcsError> {
        self.versions.get_version_history(document_id, branch_name)
    }

    pub fn verify_version(&self, version_id: &str) -> Result<bool, VcsError> {
        self.versions.verify_version(version_id)
    }

    pub fn restore_version(
        &self,
        version_id: &str,
        branch_name: &str,
        author: &str,
        commit_message: Option<&str>,
    ) -> Result<CommitReceipt, VcsError> {
        self.versions
            .restore_version(version_id, branch_name, author, commit_message)
    }

    pub fn merge_base(&self, version_a: &str, version_b: &str) -> Result<Option<String>, VcsError> {
        self.versions.merge_base(version_a, version_b)
    }

    // -----------------------------------------------------------------------
    // Branches
    // -----------------------------------------------------------------------

    pub fn create_branch(
        &self,
        branch_name: &str,
        document_id: &DocumentId,
        base_version_id: &str,
        created_by: &str,
        description: Option<&str>,
    ) -> Result<Branch, VcsError> {
        self.branches
            .create_branch(branch_name, document_id, base_version_id, created_by, description)
    }

    pub fn get_branches(&self, document_id: &DocumentId) -> Result<Vec<Branch>, VcsError> {
        self.branches.get_branches(document_id)
    }

    pub fn get_branch(
        &self,
        branch_name: &str,
        document_id: &DocumentId,
    ) -> Result<Branch, VcsError> {
        self.branches.get_branch(branch_name, document_id)
    }

    pub fn update_head(
        &self,
        branch_name: &str,
        document_id: &DocumentId,
        expected: &str,
        new_version_id: &str,
    ) -> Result<(), VcsError> {
        self.branches
            .update_head(branch_name, document_id, expected, new_version_id)
    }

    // -----------------------------------------------------------------------
    // Merges
    // -----------------------------------------------------------------------

    pub fn detect_conflicts(
        &self,
        version_a: &str,
        version_b: &str,
    ) -> Result<Vec<ObjectConflict>, VcsError> {
        self.merges.detect_conflicts(version_a, version_b)
    }

    pub fn create_merge_request(
        &self,
        source_branch: &str,
        target_branch: &str,
        document_id: &DocumentId,
        created_by: &str,
        description: Option<&str>,
    ) -> Result<MergeRequestReceipt, VcsError> {
        self.merges.create_merge_request(
            source_branch,
            target_branch,
            document_id,
            created_by,
            description,
        )
    }

    pub fn resolve_conflict(
        &self,
        conflict_id: &str,
        resolution: &str,
        resolved_by: &str,
    ) -> Result<String, VcsError> {
        self.merges
            .resolve_conflict(conflict_id, resolution, resolved_by)
    }

    pub fn execute_merge(&self, merge_id: &str, executed_by: &str) -> Result<MergeOutcome, VcsError> {
        self.merges.execute_merge(merge_id, executed_by)
    }

    pub fn get_merge_request(&self, merge_id: &str) -> Result<MergeRequestDetails, VcsError> {
        self.merges.get_merge_request(merge_id)
    }

    pub fn list_merge_requests(
        &self,
        document_id: &DocumentId,
        status: Option<MergeStatus>,
    ) -> Result<Vec<MergeRequest>, VcsError> {
        self.merges.list_merge_requests(document_id, status)
    }

    pub fn get_conflict(&self, conflict_id: &str) -> Result<Conflict, VcsError> {
        self.merges.get_conflict(conflict_id)
    }

    // -----------------------------------------------------------------------
    // Annotations & comments
    // -----------------------------------------------------------------------

    pub fn add_annotation(&self, annotation: &NewAnnotation) -> Result<String, VcsError> {
        self.annotations.add_annotation(annotation)
    }

    pub fn get_annotations(&self, version_id: &str) -> Result<Vec<Annotation>, VcsError> {
        self.annotations.get_annotations(version_id)
    }

    pub fn search_annotations(
        &self,
        document_id: &DocumentId,
        query: &str,
    ) -> Result<Vec<Annotation>, VcsError> {
        self.annotations.search_annotations(document_id, query)
    }

    pub fn add_comment(
        &self,
        parent_id: &str,
        parent_type: ParentType,
        content: &str,
        author: &str,
    ) -> Result<String, VcsError> {
        self.comments
            .add_comment(parent_id, parent_type, content, author)
    }

    pub fn get_comments(
        &self,
        parent_id: &str,
        parent_type: ParentType,
    ) -> Result<Vec<Comment>, VcsError> {
        self.comments.get_comments(parent_id, parent_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_storage_layout() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::default();
        config.storage.data_dir = dir.path().join("data");

        let engine = VersionControl::open(&config).unwrap();
        assert!(dir.path().join("data").join("floorvc.db").exists());
        assert!(dir.path().join("data").join("versions").is_dir());
        assert!(engine
            .get_branches(&DocumentId::new("hq", "l1"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_reopen_sees_committed_versions() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::default();
        config.storage.data_dir = dir.path().to_path_buf();
        let document = serde_json::json!({"objects": [{"id": "r1"}]});
        let doc_id = DocumentId::new("hq", "l1");

        let receipt = {
            let engine = VersionControl::open(&config).unwrap();
            engine
                .create_version(&document, &NewVersion::new(doc_id.clone(), "main", "m", "ann"))
                .unwrap()
        };

        let engine = VersionControl::open(&config).unwrap();
        assert_eq!(engine.get_version_data(&receipt.version_id).unwrap(), document);
        assert_eq!(
            engine.get_branch("main", &doc_id).unwrap().current_version_id,
            receipt.version_id
        );
    }
}
