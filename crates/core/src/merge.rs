//! Merge requests: opening them with detected conflicts, recording
//! resolutions, and executing them against the target branch.

use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::branch::{self, advance_head, load_branch};
use crate::config::{DetectionMode, MergeConfig, MergeStrategy};
use crate::conflict::{ConflictDetector, MergeInputs, Merger, ObjectConflict};
use crate::db::{queries, Database};
use crate::document;
use crate::errors::{StorageError, VcsError};
use crate::models::{
    BranchStatus, Conflict, DocumentId, MergeOutcome, MergeRequest, MergeRequestDetails,
    MergeRequestReceipt, MergeStatus, NewVersion, VersionType,
};
use crate::version_store::{find_merge_base, record_version, PreparedVersion, VersionStore};

/// What executing a merge will do to the target head.
enum MergePlan {
    /// Move the target head to an existing version.
    MoveHead(String),
    /// The merged content equals the target head; nothing to move.
    KeepHead,
    /// Commit a new merge version whose blob is already written.
    Commit(NewVersion, PreparedVersion),
}

/// Orchestrates merge requests between branches of one document.
#[derive(Clone)]
pub struct MergeCoordinator {
    db: Arc<Database>,
    versions: VersionStore,
    config: MergeConfig,
}

impl MergeCoordinator {
    pub fn new(db: Arc<Database>, versions: VersionStore, config: MergeConfig) -> Self {
        Self {
            db,
            versions,
            config,
        }
    }

    /// Compare two arbitrary versions two-way.
    pub fn detect_conflicts(
        &self,
        version_a: &str,
        version_b: &str,
    ) -> Result<Vec<ObjectConflict>, VcsError> {
        let a = self.versions.get_version_data(version_a)?;
        let b = self.versions.get_version_data(version_b)?;
        Ok(ConflictDetector::two_way(&a, &b))
    }

    /// Open a merge request from `source_branch` into `target_branch`,
    /// persisting one conflict row per detected divergence.
    pub fn create_merge_request(
        &self,
        source_branch: &str,
        target_branch: &str,
        document_id: &DocumentId,
        created_by: &str,
        description: Option<&str>,
    ) -> Result<MergeRequestReceipt, VcsError> {
        branch::require_branch_name(source_branch)?;
        branch::require_branch_name(target_branch)?;
        branch::require_document_id(document_id)?;
        if source_branch == target_branch {
            return Err(VcsError::validation(
                "target_branch",
                "source and target branch must differ",
            ));
        }

        let (source_head, target_head, base) = {
            let conn = self.db.conn();
            let source = load_branch(&conn, source_branch, document_id)?;
            let target = load_branch(&conn, target_branch, document_id)?;
            let base = match self.config.detection {
                DetectionMode::ThreeWay => find_merge_base(
                    &conn,
                    &source.current_version_id,
                    &target.current_version_id,
                )?,
                DetectionMode::TwoWay => None,
            };
            (source.current_version_id, target.current_version_id, base)
        };

        let source_doc = self.versions.get_version_data(&source_head)?;
        let target_doc = self.versions.get_version_data(&target_head)?;
        let detected = match base.as_deref() {
            Some(base_id) => {
                let base_doc = self.versions.get_version_data(base_id)?;
                ConflictDetector::three_way(&base_doc, &source_doc, &target_doc)
            }
            None => ConflictDetector::two_way(&source_doc, &target_doc),
        };

        let merge_id = Uuid::new_v4().to_string();
        let now = queries::now();
        let conflicts: Vec<Conflict> = detected
            .into_iter()
            .map(|c| Conflict {
                conflict_id: Uuid::new_v4().to_string(),
                merge_id: merge_id.clone(),
                conflict_type: c.conflict_type,
                object_id: c.object_id,
                property_name: c.property_name,
                source_value: c.source_value,
                target_value: c.target_value,
                resolution: None,
                resolved_by: None,
                resolved_at: None,
                created_at: now,
            })
            .collect();
        let status = if conflicts.is_empty() {
            MergeStatus::Pending
        } else {
            MergeStatus::Conflict
        };

        let request = MergeRequest {
            merge_id: merge_id.clone(),
            source_branch: source_branch.to_string(),
            target_branch: target_branch.to_string(),
            document_id: document_id.clone(),
            status,
            conflicts: conflicts.iter().map(|c| c.conflict_id.clone()).collect(),
            resolution_strategy: self.config.strategy.as_str().to_string(),
            source_version_id: source_head,
            target_version_id: target_head,
            base_version_id: base,
            result_version_id: None,
            created_by: created_by.to_string(),
            created_at: now,
            merged_by: None,
            merged_at: None,
            description: description.unwrap_or_default().to_string(),
        };

        self.db.transaction(|tx| {
            queries::insert_merge_request(tx, &request)?;
            for conflict in &conflicts {
                queries::insert_conflict(tx, conflict)?;
            }
            Ok::<_, VcsError>(())
        })?;

        info!(
            merge_id = %merge_id,
            source = source_branch,
            target = target_branch,
            document = %document_id,
            conflicts = conflicts.len(),
            %status,
            "merge request created"
        );
        Ok(MergeRequestReceipt {
            merge_id,
            status,
            has_conflicts: !conflicts.is_empty(),
            conflicts,
        })
    }

    /// Record a reviewer's resolution on a conflict.
    ///
    /// Only the label is stored. Repeating the same label is accepted;
    /// changing an existing resolution is not.
    pub fn resolve_conflict(
        &self,
        conflict_id: &str,
        resolution: &str,
        resolved_by: &str,
    ) -> Result<String, VcsError> {
        if resolution.trim().is_empty() {
            return Err(VcsError::validation("resolution", "must not be empty"));
        }

        self.db.transaction(|tx| {
            let conflict = queries::get_conflict(tx, conflict_id)?
                .ok_or_else(|| VcsError::not_found("conflict", conflict_id))?;
            let request = queries::get_merge_request(tx, &conflict.merge_id)?
                .ok_or_else(|| VcsError::not_found("merge request", conflict.merge_id.as_str()))?;
            if request.status.is_terminal() {
                return Err(VcsError::InvalidState {
                    entity: "merge request",
                    id: request.merge_id,
                    detail: format!("already {}", request.status),
                });
            }

            match conflict.resolution.as_deref() {
                Some(existing) if existing == resolution => Ok(()),
                Some(existing) => Err(VcsError::InvalidState {
                    entity: "conflict",
                    id: conflict_id.to_string(),
                    detail: format!("already resolved as '{existing}'"),
                }),
                None => {
                    let changed = queries::resolve_conflict(tx, conflict_id, resolution, resolved_by)?;
                    if changed == 0 {
                        return Err(VcsError::InvalidState {
                            entity: "conflict",
                            id: conflict_id.to_string(),
                            detail: "resolved concurrently".into(),
                        });
                    }
                    Ok(())
                }
            }
        })?;

        info!(conflict_id, resolution, resolved_by, "conflict resolved");
        Ok(conflict_id.to_string())
    }

    /// Execute a merge request whose conflicts are all resolved.
    ///
    /// The target head is compare-and-swapped against the head recorded when
    /// the request was opened. Only unexpected storage failures move the
    /// request to `failed`; precondition failures leave it retryable.
    pub fn execute_merge(&self, merge_id: &str, executed_by: &str) -> Result<MergeOutcome, VcsError> {
        let details = self.get_merge_request(merge_id)?;
        let request = &details.request;
        if request.status.is_terminal() {
            return Err(VcsError::InvalidState {
                entity: "merge request",
                id: merge_id.to_string(),
                detail: format!("already {}", request.status),
            });
        }
        let unresolved = details.unresolved() as u64;
        if unresolved > 0 {
            return Err(VcsError::Conflict {
                merge_id: merge_id.to_string(),
                unresolved,
            });
        }

        let result = self
            .plan(&details, executed_by)
            .and_then(|plan| self.apply(request, plan, executed_by));

        match result {
            Ok(outcome) => {
                info!(
                    merge_id,
                    head = %outcome.head_version_id,
                    created_version = outcome.created_version,
                    executed_by,
                    "merge executed"
                );
                Ok(outcome)
            }
            Err(e @ VcsError::Storage(_)) => {
                error!(merge_id, error = %e, "merge failed, marking request failed");
                if let Err(mark_err) =
                    queries::set_merge_status(&self.db.conn(), merge_id, MergeStatus::Failed)
                {
                    warn!(merge_id, error = %mark_err, "could not mark merge request failed");
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    fn plan(&self, details: &MergeRequestDetails, executed_by: &str) -> Result<MergePlan, VcsError> {
        let request = &details.request;
        if request.resolution_strategy == MergeStrategy::FastForward.as_str() {
            let source = load_branch(&self.db.conn(), &request.source_branch, &request.document_id)?;
            return Ok(MergePlan::MoveHead(source.current_version_id));
        }

        let source_doc = self.versions.get_version_data(&request.source_version_id)?;
        let target_doc = self.versions.get_version_data(&request.target_version_id)?;
        let base_doc: Option<Value> = request
            .base_version_id
            .as_deref()
            .map(|id| self.versions.get_version_data(id))
            .transpose()?;

        let merged = Merger::materialize(
            MergeInputs {
                base: base_doc.as_ref(),
                source: &source_doc,
                target: &target_doc,
            },
            &details.conflicts,
        );
        let merged_hash = document::hash_document(&merged).map_err(StorageError::from)?;

        if merged_hash == document::hash_document(&source_doc).map_err(StorageError::from)? {
            return Ok(MergePlan::MoveHead(request.source_version_id.clone()));
        }
        if merged_hash == document::hash_document(&target_doc).map_err(StorageError::from)? {
            return Ok(MergePlan::KeepHead);
        }

        document::validate(&merged)?;
        let new_version = NewVersion::new(
            request.document_id.clone(),
            request.target_branch.as_str(),
            format!(
                "Merge branch '{}' into '{}'",
                request.source_branch, request.target_branch
            ),
            executed_by,
        )
        .parent(request.target_version_id.as_str())
        .version_type(VersionType::Minor)
        .meta("merge_id", request.merge_id.as_str())
        .meta("merged_from", request.source_version_id.as_str());
        let prepared = self.versions.prepare(&merged)?;
        Ok(MergePlan::Commit(new_version, prepared))
    }

    fn apply(
        &self,
        request: &MergeRequest,
        plan: MergePlan,
        executed_by: &str,
    ) -> Result<MergeOutcome, VcsError> {
        let result = self.db.transaction(|tx| {
            let unresolved = queries::count_unresolved(tx, &request.merge_id)?;
            if unresolved > 0 {
                return Err(VcsError::Conflict {
                    merge_id: request.merge_id.clone(),
                    unresolved,
                });
            }

            let (head, created_version) = match &plan {
                MergePlan::MoveHead(new_head) => {
                    let target = load_branch(tx, &request.target_branch, &request.document_id)?;
                    advance_head(
                        tx,
                        &request.target_branch,
                        &request.document_id,
                        &request.target_version_id,
                        new_head,
                        target.status,
                    )?;
                    (new_head.clone(), false)
                }
                MergePlan::KeepHead => {
                    let target = load_branch(tx, &request.target_branch, &request.document_id)?;
                    if target.current_version_id != request.target_version_id {
                        return Err(VcsError::ConcurrentModification {
                            branch: request.target_branch.clone(),
                            expected: request.target_version_id.clone(),
                            actual: target.current_version_id,
                        });
                    }
                    (target.current_version_id, false)
                }
                MergePlan::Commit(new_version, prepared) => {
                    let version = record_version(tx, new_version, prepared)?;
                    (version.version_id, true)
                }
            };

            queries::complete_merge_request(tx, &request.merge_id, executed_by, &head)?;
            queries::set_branch_status(
                tx,
                &request.source_branch,
                &request.document_id,
                BranchStatus::Merged,
            )?;
            Ok(MergeOutcome {
                merge_id: request.merge_id.clone(),
                head_version_id: head,
                created_version,
            })
        });

        if result.is_err() {
            if let MergePlan::Commit(_, prepared) = &plan {
                self.versions.discard(prepared);
            }
        }
        result
    }

    /// A merge request with its conflicts, ascending by object id.
    pub fn get_merge_request(&self, merge_id: &str) -> Result<MergeRequestDetails, VcsError> {
        let conn = self.db.conn();
        let request = queries::get_merge_request(&conn, merge_id)?
            .ok_or_else(|| VcsError::not_found("merge request", merge_id))?;
        let conflicts = queries::list_conflicts(&conn, merge_id)?;
        Ok(MergeRequestDetails { request, conflicts })
    }

    /// Merge requests of a document, newest first.
    pub fn list_merge_requests(
        &self,
        document_id: &DocumentId,
        status: Option<MergeStatus>,
    ) -> Result<Vec<MergeRequest>, VcsError> {
        Ok(queries::list_merge_requests(
            &self.db.conn(),
            document_id,
            status,
        )?)
    }

    pub fn get_conflict(&self, conflict_id: &str) -> Result<Conflict, VcsError> {
        queries::get_conflict(&self.db.conn(), conflict_id)?
            .ok_or_else(|| VcsError::not_found("conflict", conflict_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::BlobStore;
    use crate::branch::BranchRegistry;
    use serde_json::json;

    fn doc() -> DocumentId {
        DocumentId::new("hq", "l1")
    }

    struct Fixture {
        versions: VersionStore,
        branches: BranchRegistry,
        merges: MergeCoordinator,
        _dir: tempfile::TempDir,
    }

    fn setup(config: MergeConfig) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::in_memory().unwrap());
        db.initialize().unwrap();
        let versions = VersionStore::new(db.clone(), BlobStore::open(dir.path()).unwrap());
        Fixture {
            branches: BranchRegistry::new(db.clone()),
            merges: MergeCoordinator::new(db, versions.clone(), config),
            versions,
            _dir: dir,
        }
    }

    fn commit(f: &Fixture, document: Value, branch: &str) -> String {
        f.versions
            .create_version(&document, &NewVersion::new(doc(), branch, "m", "ann"))
            .unwrap()
            .version_id
    }

    /// main: r1.x=1 ; feat: r1.x=2
    fn diverged(f: &Fixture) -> (String, String) {
        let v0 = commit(f, json!({"objects": [{"id": "r1", "x": 1}]}), "main");
        f.branches.create_branch("feat", &doc(), &v0, "ann", None).unwrap();
        let v1 = commit(f, json!({"objects": [{"id": "r1", "x": 2}]}), "feat");
        (v0, v1)
    }

    #[test]
    fn test_same_branch_is_rejected() {
        let f = setup(MergeConfig::default());
        let err = f
            .merges
            .create_merge_request("main", "main", &doc(), "ann", None)
            .unwrap_err();
        assert!(matches!(err, VcsError::Validation { .. }));
    }

    #[test]
    fn test_missing_branch_is_not_found() {
        let f = setup(MergeConfig::default());
        commit(&f, json!({}), "main");
        let err = f
            .merges
            .create_merge_request("ghost", "main", &doc(), "ann", None)
            .unwrap_err();
        assert!(matches!(err, VcsError::NotFound { entity: "branch", .. }));
    }

    #[test]
    fn test_resolution_is_written_once() {
        let f = setup(MergeConfig::default());
        diverged(&f);
        let receipt = f
            .merges
            .create_merge_request("feat", "main", &doc(), "ann", None)
            .unwrap();
        let conflict_id = receipt.conflicts[0].conflict_id.clone();

        let err = f.merges.resolve_conflict(&conflict_id, "  ", "bob").unwrap_err();
        assert!(matches!(err, VcsError::Validation { .. }));

        f.merges.resolve_conflict(&conflict_id, "source_wins", "bob").unwrap();
        f.merges.resolve_conflict(&conflict_id, "source_wins", "bob").unwrap();
        let err = f
            .merges
            .resolve_conflict(&conflict_id, "target_wins", "bob")
            .unwrap_err();
        assert!(matches!(err, VcsError::InvalidState { entity: "conflict", .. }));

        let conflict = f.merges.get_conflict(&conflict_id).unwrap();
        assert_eq!(conflict.resolved_by.as_deref(), Some("bob"));
        assert!(conflict.resolved_at.is_some());

        let err = f.merges.resolve_conflict("nope", "merge", "bob").unwrap_err();
        assert!(matches!(err, VcsError::NotFound { entity: "conflict", .. }));
    }

    #[test]
    fn test_completed_request_cannot_run_twice() {
        let f = setup(MergeConfig::default());
        let (_, v1) = diverged(&f);
        let receipt = f
            .merges
            .create_merge_request("feat", "main", &doc(), "ann", None)
            .unwrap();
        f.merges
            .resolve_conflict(&receipt.conflicts[0].conflict_id, "source_wins", "bob")
            .unwrap();
        let outcome = f.merges.execute_merge(&receipt.merge_id, "bob").unwrap();
        assert_eq!(outcome.head_version_id, v1);
        assert!(!outcome.created_version);

        let err = f.merges.execute_merge(&receipt.merge_id, "bob").unwrap_err();
        assert!(matches!(err, VcsError::InvalidState { .. }));
        let err = f
            .merges
            .resolve_conflict(&receipt.conflicts[0].conflict_id, "source_wins", "bob")
            .unwrap_err();
        assert!(matches!(err, VcsError::InvalidState { entity: "merge request", .. }));

        let details = f.merges.get_merge_request(&receipt.merge_id).unwrap();
        assert_eq!(details.request.status, MergeStatus::Completed);
        assert_eq!(details.request.merged_by.as_deref(), Some("bob"));
        assert_eq!(details.request.result_version_id.as_deref(), Some(v1.as_str()));
        assert_eq!(
            f.branches.get_branch("feat", &doc()).unwrap().status,
            BranchStatus::Merged
        );
    }

    #[test]
    fn test_execute_unknown_merge_is_not_found() {
        let f = setup(MergeConfig::default());
        let err = f.merges.execute_merge("nope", "bob").unwrap_err();
        assert!(matches!(err, VcsError::NotFound { entity: "merge request", .. }));
    }

    #[test]
    fn test_unreadable_source_marks_request_failed() {
        let f = setup(MergeConfig::default());
        let (v0, v1) = diverged(&f);
        let receipt = f
            .merges
            .create_merge_request("feat", "main", &doc(), "ann", None)
            .unwrap();
        let conflict_id = receipt.conflicts[0].conflict_id.clone();
        f.merges.resolve_conflict(&conflict_id, "source_wins", "bob").unwrap();

        std::fs::write(f._dir.path().join(format!("{v1}.json")), "{corrupt").unwrap();

        let err = f.merges.execute_merge(&receipt.merge_id, "bob").unwrap_err();
        assert!(matches!(err, VcsError::Storage(_)));
        assert!(!err.is_retryable());

        let details = f.merges.get_merge_request(&receipt.merge_id).unwrap();
        assert_eq!(details.request.status, MergeStatus::Failed);
        assert!(details.request.merged_at.is_none());
        assert_eq!(f.branches.get_branch("main", &doc()).unwrap().current_version_id, v0);

        let err = f
            .merges
            .resolve_conflict(&conflict_id, "source_wins", "bob")
            .unwrap_err();
        assert!(matches!(err, VcsError::InvalidState { entity: "merge request", .. }));
        let err = f.merges.execute_merge(&receipt.merge_id, "bob").unwrap_err();
        assert!(matches!(err, VcsError::InvalidState { .. }));
    }

    #[test]
    fn test_target_moved_after_request_opened() {
        let f = setup(MergeConfig::default());
        diverged(&f);
        let receipt = f
            .merges
            .create_merge_request("feat", "main", &doc(), "ann", None)
            .unwrap();
        f.merges
            .resolve_conflict(&receipt.conflicts[0].conflict_id, "source_wins", "bob")
            .unwrap();
        commit(&f, json!({"objects": [{"id": "r1", "x": 5}]}), "main");

        let err = f.merges.execute_merge(&receipt.merge_id, "bob").unwrap_err();
        assert!(err.is_retryable());
        let details = f.merges.get_merge_request(&receipt.merge_id).unwrap();
        assert_eq!(details.request.status, MergeStatus::Conflict);
    }

    #[test]
    fn test_list_merge_requests_by_status() {
        let f = setup(MergeConfig::default());
        diverged(&f);
        let main_head = f.branches.get_branch("main", &doc()).unwrap().current_version_id;
        f.branches
            .create_branch("twin", &doc(), &main_head, "ann", None)
            .unwrap();
        f.merges
            .create_merge_request("feat", "main", &doc(), "ann", None)
            .unwrap();
        f.merges
            .create_merge_request("twin", "main", &doc(), "ann", None)
            .unwrap();

        assert_eq!(f.merges.list_merge_requests(&doc(), None).unwrap().len(), 2);
        let pending = f
            .merges
            .list_merge_requests(&doc(), Some(MergeStatus::Pending))
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].source_branch, "twin");
    }

    #[test]
    fn test_detect_conflicts_between_versions() {
        let f = setup(MergeConfig::default());
        let (v0, v1) = diverged(&f);
        let conflicts = f.merges.detect_conflicts(&v1, &v0).unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].object_id, "r1");
    }
}
