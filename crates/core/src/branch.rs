//! Named branch heads, one set per document.

use std::sync::Arc;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::db::{queries, Database};
use crate::errors::VcsError;
use crate::models::{Branch, BranchStatus, DocumentId};

/// Error id for a branch: `name@building/floor`.
pub(crate) fn branch_key(branch_name: &str, document_id: &DocumentId) -> String {
    format!("{branch_name}@{document_id}")
}

pub(crate) fn require_document_id(document_id: &DocumentId) -> Result<(), VcsError> {
    if document_id.building_id.trim().is_empty() {
        return Err(VcsError::validation(
            "document_id.building_id",
            "must not be empty",
        ));
    }
    if document_id.floor_id.trim().is_empty() {
        return Err(VcsError::validation("document_id.floor_id", "must not be empty"));
    }
    Ok(())
}

pub(crate) fn require_branch_name(branch_name: &str) -> Result<(), VcsError> {
    if branch_name.trim().is_empty() {
        return Err(VcsError::validation("branch_name", "must not be empty"));
    }
    Ok(())
}

/// Load a branch or fail with `NotFound`.
pub(crate) fn load_branch(
    conn: &Connection,
    branch_name: &str,
    document_id: &DocumentId,
) -> Result<Branch, VcsError> {
    queries::get_branch(conn, branch_name, document_id)?
        .ok_or_else(|| VcsError::not_found("branch", branch_key(branch_name, document_id)))
}

/// Compare-and-swap a branch head from `expected` to `new_head`.
///
/// Fails with `ConcurrentModification` if the stored head is no longer
/// `expected`, and with `NotFound` if the branch or the new head is absent.
pub(crate) fn advance_head(
    conn: &Connection,
    branch_name: &str,
    document_id: &DocumentId,
    expected: &str,
    new_head: &str,
    status: BranchStatus,
) -> Result<(), VcsError> {
    let version = queries::get_version(conn, new_head)?
        .ok_or_else(|| VcsError::not_found("version", new_head))?;
    if &version.document_id != document_id {
        return Err(VcsError::validation(
            "new_version_id",
            format!("version {new_head} belongs to {}", version.document_id),
        ));
    }

    let changed =
        queries::compare_and_swap_head(conn, branch_name, document_id, expected, new_head, status)?;
    if changed == 0 {
        let branch = load_branch(conn, branch_name, document_id)?;
        return Err(VcsError::ConcurrentModification {
            branch: branch_name.to_string(),
            expected: expected.to_string(),
            actual: branch.current_version_id,
        });
    }
    debug!(branch = branch_name, %document_id, expected, new_head, "branch head advanced");
    Ok(())
}

/// Registry of branches and their head pointers.
#[derive(Clone)]
pub struct BranchRegistry {
    db: Arc<Database>,
}

impl BranchRegistry {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Create a branch whose base and head are `base_version_id`.
    pub fn create_branch(
        &self,
        branch_name: &str,
        document_id: &DocumentId,
        base_version_id: &str,
        created_by: &str,
        description: Option<&str>,
    ) -> Result<Branch, VcsError> {
        require_branch_name(branch_name)?;
        require_document_id(document_id)?;

        let branch = self.db.transaction(|tx| {
            let base = queries::get_version(tx, base_version_id)?
                .ok_or_else(|| VcsError::not_found("version", base_version_id))?;
            if &base.document_id != document_id {
                return Err(VcsError::validation(
                    "base_version_id",
                    format!("version {base_version_id} belongs to {}", base.document_id),
                ));
            }
            if queries::get_branch(tx, branch_name, document_id)?.is_some() {
                return Err(VcsError::Duplicate {
                    entity: "branch",
                    id: branch_key(branch_name, document_id),
                });
            }

            let now = queries::now();
            let branch = Branch {
                branch_name: branch_name.to_string(),
                document_id: document_id.clone(),
                base_version_id: base_version_id.to_string(),
                current_version_id: base_version_id.to_string(),
                status: BranchStatus::Active,
                created_by: created_by.to_string(),
                created_at: now,
                last_updated: now,
                description: description.unwrap_or_default().to_string(),
            };
            queries::insert_branch(tx, &branch)?;
            Ok::<_, VcsError>(branch)
        })?;

        info!(
            branch = %branch.branch_name,
            document = %branch.document_id,
            base = %branch.base_version_id,
            created_by,
            "branch created"
        );
        Ok(branch)
    }

    /// All branches of a document, newest first.
    pub fn get_branches(&self, document_id: &DocumentId) -> Result<Vec<Branch>, VcsError> {
        Ok(queries::list_branches(&self.db.conn(), document_id)?)
    }

    pub fn get_branch(
        &self,
        branch_name: &str,
        document_id: &DocumentId,
    ) -> Result<Branch, VcsError> {
        load_branch(&self.db.conn(), branch_name, document_id)
    }

    /// Move a branch head from the caller's last-known head `expected` to
    /// `new_version_id`.
    pub fn update_head(
        &self,
        branch_name: &str,
        document_id: &DocumentId,
        expected: &str,
        new_version_id: &str,
    ) -> Result<(), VcsError> {
        self.db.transaction(|tx| {
            let branch = load_branch(tx, branch_name, document_id)?;
            advance_head(
                tx,
                branch_name,
                document_id,
                expected,
                new_version_id,
                branch.status,
            )
        })?;
        info!(branch = branch_name, %document_id, expected, new_version_id, "branch head updated");
        Ok(())
    }
}
