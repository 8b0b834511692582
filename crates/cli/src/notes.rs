//! Annotation and comment subcommands.

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::Cell;

use floorvc_core::models::{Annotation, NewAnnotation, ParentType};
use floorvc_core::{DocumentId, VersionControl};

use crate::style;

#[derive(Subcommand, Debug)]
pub enum AnnotateAction {
    /// Attach an annotation to a version.
    Add {
        version_id: String,

        #[arg(short, long)]
        doc: DocumentId,

        #[arg(short, long)]
        title: String,

        #[arg(long, default_value = "")]
        content: String,

        /// Object the note refers to.
        #[arg(long)]
        object: Option<String>,

        /// Position as X,Y in plan coordinates.
        #[arg(long, value_parser = parse_position)]
        at: Option<(f64, f64)>,

        #[arg(long = "type", default_value = "note")]
        annotation_type: String,
    },
    /// List annotations of a version.
    List { version_id: String },
    /// Case-insensitive search over titles and contents of a document's notes.
    Search {
        query: String,

        #[arg(short, long)]
        doc: DocumentId,
    },
}

#[derive(Subcommand, Debug)]
pub enum CommentAction {
    /// Comment on a version or an annotation.
    Add {
        parent_id: String,

        content: String,

        /// version or annotation.
        #[arg(long = "on", default_value = "version")]
        parent_type: ParentType,
    },
    /// List the comment thread of a version or an annotation.
    List {
        parent_id: String,

        #[arg(long = "on", default_value = "version")]
        parent_type: ParentType,
    },
}

pub fn run_annotate(engine: &VersionControl, action: AnnotateAction, author: &str) -> Result<()> {
    match action {
        AnnotateAction::Add {
            version_id,
            doc,
            title,
            content,
            object,
            at,
            annotation_type,
        } => {
            let mut note = NewAnnotation::note(version_id, doc, title, content, author);
            note.annotation_type = annotation_type;
            if let Some(object) = object {
                note = note.on_object(object);
            }
            if let Some((x, y)) = at {
                note = note.at(x, y);
            }
            let id = engine
                .add_annotation(&note)
                .context("failed to add annotation")?;
            println!("{}", style::success(&format!("Annotation {} added", id)));
            Ok(())
        }
        AnnotateAction::List { version_id } => {
            let notes = engine
                .get_annotations(&version_id)
                .context("failed to list annotations")?;
            print_annotations(&notes, &format!("No annotations on {}.", version_id));
            Ok(())
        }
        AnnotateAction::Search { query, doc } => {
            let notes = engine
                .search_annotations(&doc, &query)
                .context("failed to search annotations")?;
            print_annotations(&notes, &format!("No annotations match '{}'.", query));
            Ok(())
        }
    }
}

pub fn run_comment(engine: &VersionControl, action: CommentAction, author: &str) -> Result<()> {
    match action {
        CommentAction::Add {
            parent_id,
            content,
            parent_type,
        } => {
            let id = engine
                .add_comment(&parent_id, parent_type, &content, author)
                .context("failed to add comment")?;
            println!("{}", style::success(&format!("Comment {} added", id)));
            Ok(())
        }
        CommentAction::List {
            parent_id,
            parent_type,
        } => {
            let comments = engine
                .get_comments(&parent_id, parent_type)
                .context("failed to list comments")?;
            if comments.is_empty() {
                println!("No comments on {} {}.", parent_type, parent_id);
                return Ok(());
            }
            for c in &comments {
                println!(
                    "{} {}",
                    style::header(&c.author),
                    style::dim(&c.created_at.format("%Y-%m-%d %H:%M").to_string())
                );
                println!("  {}", c.content);
            }
            Ok(())
        }
    }
}

fn print_annotations(notes: &[Annotation], empty: &str) {
    if notes.is_empty() {
        println!("{}", empty);
        return;
    }
    let mut table = style::table(vec!["ID", "Type", "Title", "Object", "Position", "Author"]);
    for a in notes {
        let position = match (a.position_x, a.position_y) {
            (Some(x), Some(y)) => format!("{x}, {y}"),
            _ => String::new(),
        };
        table.add_row(vec![
            Cell::new(&a.annotation_id),
            Cell::new(&a.annotation_type),
            Cell::new(&a.title),
            Cell::new(a.object_id.as_deref().unwrap_or("")),
            Cell::new(position),
            Cell::new(&a.author),
        ]);
    }
    println!("{}", table);
}

fn parse_position(value: &str) -> Result<(f64, f64), String> {
    let (x, y) = value
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y but got '{}'", value))?;
    let parse = |s: &str| {
        s.trim()
            .parse::<f64>()
            .map_err(|e| format!("invalid coordinate '{}': {}", s.trim(), e))
    };
    Ok((parse(x)?, parse(y)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_position() {
        assert_eq!(parse_position("1.5, -2").unwrap(), (1.5, -2.0));
        assert!(parse_position("3").is_err());
        assert!(parse_position("a,1").is_err());
    }
}
