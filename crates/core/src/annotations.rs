//! Free-text notes on versions and discussion threads on versions or notes.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::db::{queries, Database};
use crate::errors::VcsError;
use crate::models::{Annotation, Comment, DocumentId, NewAnnotation, ParentType};

const DEFAULT_SEARCH_LIMIT: usize = 200;

/// Annotations attached to versions and, optionally, to objects in them.
#[derive(Clone)]
pub struct AnnotationStore {
    db: Arc<Database>,
    search_limit: usize,
}

impl AnnotationStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            search_limit: DEFAULT_SEARCH_LIMIT,
        }
    }

    pub fn with_search_limit(mut self, limit: usize) -> Self {
        self.search_limit = limit.max(1);
        self
    }

    /// Attach an annotation to a version of `annotation.document_id`.
    pub fn add_annotation(&self, annotation: &NewAnnotation) -> Result<String, VcsError> {
        if annotation.annotation_type.trim().is_empty() {
            return Err(VcsError::validation("annotation_type", "must not be empty"));
        }

        let annotation_id = Uuid::new_v4().to_string();
        self.db.transaction(|tx| {
            let version = queries::get_version(tx, &annotation.version_id)?
                .ok_or_else(|| VcsError::not_found("version", annotation.version_id.as_str()))?;
            if version.document_id != annotation.document_id {
                return Err(VcsError::validation(
                    "document_id",
                    format!(
                        "version {} belongs to {}",
                        annotation.version_id, version.document_id
                    ),
                ));
            }

            let now = queries::now();
            queries::insert_annotation(
                tx,
                &Annotation {
                    annotation_id: annotation_id.clone(),
                    version_id: annotation.version_id.clone(),
                    document_id: annotation.document_id.clone(),
                    object_id: annotation.object_id.clone(),
                    position_x: annotation.position_x,
                    position_y: annotation.position_y,
                    annotation_type: annotation.annotation_type.clone(),
                    title: annotation.title.clone(),
                    content: annotation.content.clone(),
                    author: annotation.author.clone(),
                    created_at: now,
                    updated_at: now,
                },
            )?;
            Ok::<_, VcsError>(())
        })?;

        info!(
            annotation_id = %annotation_id,
            version_id = %annotation.version_id,
            object_id = ?annotation.object_id,
            author = %annotation.author,
            "annotation added"
        );
        Ok(annotation_id)
    }

    /// Annotations of one version in creation order.
    pub fn get_annotations(&self, version_id: &str) -> Result<Vec<Annotation>, VcsError> {
        Ok(queries::list_annotations(&self.db.conn(), version_id)?)
    }

    /// Case-insensitive substring search over title and content, newest
    /// first.
    pub fn search_annotations(
        &self,
        document_id: &DocumentId,
        query: &str,
    ) -> Result<Vec<Annotation>, VcsError> {
        let needle = query.to_lowercase();
        let hits = queries::list_document_annotations(&self.db.conn(), document_id)?
            .into_iter()
            .filter(|a| {
                a.title.to_lowercase().contains(&needle)
                    || a.content.to_lowercase().contains(&needle)
            })
            .take(self.search_limit)
            .collect();
        Ok(hits)
    }
}

/// Comment threads on versions and annotations.
#[derive(Clone)]
pub struct CommentStore {
    db: Arc<Database>,
}

impl CommentStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn add_comment(
        &self,
        parent_id: &str,
        parent_type: ParentType,
        content: &str,
        author: &str,
    ) -> Result<String, VcsError> {
        if content.trim().is_empty() {
            return Err(VcsError::validation("content", "must not be empty"));
        }

        let comment_id = Uuid::new_v4().to_string();
        self.db.transaction(|tx| {
            let exists = match parent_type {
                ParentType::Version => queries::get_version(tx, parent_id)?.is_some(),
                ParentType::Annotation => queries::annotation_exists(tx, parent_id)?,
            };
            if !exists {
                return Err(VcsError::not_found(parent_type.as_str(), parent_id));
            }

            let now = queries::now();
            queries::insert_comment(
                tx,
                &Comment {
                    comment_id: comment_id.clone(),
                    parent_id: parent_id.to_string(),
                    parent_type,
                    author: author.to_string(),
                    content: content.to_string(),
                    created_at: now,
                    updated_at: now,
                },
            )?;
            Ok(())
        })?;

        info!(comment_id = %comment_id, parent_id, %parent_type, author, "comment added");
        Ok(comment_id)
    }

    /// Comments on one parent, oldest first.
    pub fn get_comments(
        &self,
        parent_id: &str,
        parent_type: ParentType,
    ) -> Result<Vec<Comment>, VcsError> {
        Ok(queries::list_comments(&self.db.conn(), parent_id, parent_type)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Version, VersionType};
    use serde_json::Map;

    fn doc() -> DocumentId {
        DocumentId::new("hq", "l1")
    }

    fn setup() -> (AnnotationStore, CommentStore) {
        let db = Arc::new(Database::in_memory().unwrap());
        db.initialize().unwrap();
        queries::insert_version(
            &db.conn(),
            &Version {
                version_id: "v1".into(),
                document_id: doc(),
                branch_name: "main".into(),
                parent_version_id: None,
                version_type: VersionType::Minor,
                version_number: "main-minor-20250101.000000".into(),
                branch_seq: 1,
                commit_message: String::new(),
                author: "ann".into(),
                created_at: queries::now(),
                content_hash: "h".into(),
                content_size: 2,
                metadata: Map::new(),
            },
        )
        .unwrap();
        (AnnotationStore::new(db.clone()), CommentStore::new(db))
    }

    #[test]
    fn test_add_and_list_annotations() {
        let (annotations, _) = setup();
        let first = annotations
            .add_annotation(
                &NewAnnotation::note("v1", doc(), "Door", "Swing conflicts with desk", "ann")
                    .on_object("r1")
                    .at(3.0, 4.5),
            )
            .unwrap();
        annotations
            .add_annotation(&NewAnnotation::note("v1", doc(), "Window", "ok", "bob"))
            .unwrap();

        let listed = annotations.get_annotations("v1").unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].annotation_id, first);
        assert_eq!(listed[0].object_id.as_deref(), Some("r1"));
        assert_eq!(listed[0].position_y, Some(4.5));
        assert!(annotations.get_annotations("v2").unwrap().is_empty());
    }

    #[test]
    fn test_annotation_requires_matching_version() {
        let (annotations, _) = setup();
        let err = annotations
            .add_annotation(&NewAnnotation::note("v9", doc(), "t", "c", "ann"))
            .unwrap_err();
        assert!(matches!(err, VcsError::NotFound { entity: "version", .. }));

        let err = annotations
            .add_annotation(&NewAnnotation::note("v1", DocumentId::new("hq", "l2"), "t", "c", "ann"))
            .unwrap_err();
        assert!(matches!(err, VcsError::Validation { .. }));
    }

    #[test]
    fn test_search_is_case_insensitive() {
        let (annotations, _) = setup();
        annotations
            .add_annotation(&NewAnnotation::note("v1", doc(), "Fire EXIT", "check width", "ann"))
            .unwrap();
        annotations
            .add_annotation(&NewAnnotation::note("v1", doc(), "Lobby", "exit signage missing", "ann"))
            .unwrap();
        annotations
            .add_annotation(&NewAnnotation::note("v1", doc(), "Stairs", "fine", "ann"))
            .unwrap();

        let hits = annotations.search_annotations(&doc(), "exit").unwrap();
        let titles: Vec<_> = hits.iter().map(|a| a.title.as_str()).collect();
        assert_eq!(titles, vec!["Lobby", "Fire EXIT"]);

        let limited = annotations
            .clone()
            .with_search_limit(1)
            .search_annotations(&doc(), "EXIT")
            .unwrap();
        assert_eq!(limited.len(), 1);
        assert!(annotations
            .search_annotations(&DocumentId::new("hq", "l2"), "exit")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_comments_on_versions_and_annotations() {
        let (annotations, comments) = setup();
        let note = annotations
            .add_annotation(&NewAnnotation::note("v1", doc(), "t", "c", "ann"))
            .unwrap();

        comments.add_comment("v1", ParentType::Version, "first", "ann").unwrap();
        comments.add_comment("v1", ParentType::Version, "second", "bob").unwrap();
        comments
            .add_comment(&note, ParentType::Annotation, "on the note", "bob")
            .unwrap();

        let thread: Vec<_> = comments
            .get_comments("v1", ParentType::Version)
            .unwrap()
            .into_iter()
            .map(|c| c.content)
            .collect();
        assert_eq!(thread, vec!["first", "second"]);
        assert_eq!(
            comments.get_comments(&note, ParentType::Annotation).unwrap().len(),
            1
        );

        let err = comments
            .add_comment("v1", ParentType::Annotation, "wrong parent", "bob")
            .unwrap_err();
        assert!(matches!(err, VcsError::NotFound { entity: "annotation", .. }));

        let err = comments
            .add_comment("v1", ParentType::Version, " ", "bob")
            .unwrap_err();
        assert!(matches!(err, VcsError::Validation { .. }));
    }
}
