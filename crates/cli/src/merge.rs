//! Merge request subcommands.

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::Cell;

use floorvc_core::errors::VcsError;
use floorvc_core::models::{Conflict, MergeStatus};
use floorvc_core::{DocumentId, VersionControl};

use crate::style;

#[derive(Subcommand, Debug)]
pub enum MergeAction {
    /// Open a merge request from one branch into another.
    Open {
        source: String,
        target: String,

        #[arg(short, long)]
        doc: DocumentId,

        #[arg(long)]
        description: Option<String>,
    },
    /// Show a merge request and its conflicts.
    Show { merge_id: String },
    /// List merge requests of a document, newest first.
    List {
        #[arg(short, long)]
        doc: DocumentId,

        /// pending, in_progress, completed, failed or conflict.
        #[arg(short, long)]
        status: Option<MergeStatus>,
    },
    /// Record a resolution for one conflict.
    Resolve {
        conflict_id: String,

        /// source_wins, target_wins, merge, or custom text / JSON.
        resolution: String,
    },
    /// Execute a merge request whose conflicts are all resolved.
    Execute { merge_id: String },
}

pub fn run(engine: &VersionControl, action: MergeAction, author: &str) -> Result<()> {
    match action {
        MergeAction::Open {
            source,
            target,
            doc,
            description,
        } => cmd_open(engine, &source, &target, &doc, author, description.as_deref()),
        MergeAction::Show { merge_id } => cmd_show(engine, &merge_id),
        MergeAction::List { doc, status } => cmd_list(engine, &doc, status),
        MergeAction::Resolve {
            conflict_id,
            resolution,
        } => {
            engine
                .resolve_conflict(&conflict_id, &resolution, author)
                .context("failed to resolve conflict")?;
            let merge_id = engine.get_conflict(&conflict_id)?.merge_id;
            println!(
                "{}",
                style::success(&format!("Conflict {} resolved ({})", conflict_id, resolution))
            );
            let remaining = engine.get_merge_request(&merge_id)?.unresolved();
            if remaining > 0 {
                println!("  {} unresolved conflict(s) left", remaining);
            } else {
                println!("  Ready: floorvc merge execute {}", merge_id);
            }
            Ok(())
        }
        MergeAction::Execute { merge_id } => cmd_execute(engine, &merge_id, author),
    }
}

fn cmd_open(
    engine: &VersionControl,
    source: &str,
    target: &str,
    doc: &DocumentId,
    author: &str,
    description: Option<&str>,
) -> Result<()> {
    let receipt = engine
        .create_merge_request(source, target, doc, author, description)
        .context("failed to open merge request")?;

    println!(
        "{}",
        style::success(&format!(
            "Merge request {} opened ({} → {})",
            receipt.merge_id, source, target
        ))
    );
    if receipt.has_conflicts {
        println!();
        println!(
            "{}",
            style::warn(&format!("{} conflict(s) need a resolution", receipt.conflicts.len()))
        );
        println!("{}", conflict_table(&receipt.conflicts));
    }
    Ok(())
}

fn cmd_show(engine: &VersionControl, merge_id: &str) -> Result<()> {
    let details = engine
        .get_merge_request(merge_id)
        .context("failed to load merge request")?;
    let mr = &details.request;

    println!("{}", style::header(&format!("Merge request {}", mr.merge_id)));
    println!();
    println!("  Document    : {}", mr.document_id);
    println!("  Branches    : {} → {}", mr.source_branch, mr.target_branch);
    println!("  Status      : {}", style::merge_status(mr.status));
    println!("  Strategy    : {}", mr.resolution_strategy);
    println!("  Source head : {}", mr.source_version_id);
    println!("  Target head : {}", mr.target_version_id);
    println!(
        "  Base        : {}",
        mr.base_version_id.as_deref().unwrap_or("-")
    );
    println!("  Opened by   : {} at {}", mr.created_by, mr.created_at.to_rfc3339());
    if let (Some(by), Some(at)) = (&mr.merged_by, &mr.merged_at) {
        println!("  Merged by   : {} at {}", by, at.to_rfc3339());
    }
    if let Some(result) = &mr.result_version_id {
        println!("  Result      : {}", result);
    }
    if !mr.description.is_empty() {
        println!("  Description : {}", mr.description);
    }

    if details.conflicts.is_empty() {
        return Ok(());
    }
    println!();
    println!(
        "{}",
        style::header(&format!(
            "Conflicts ({} unresolved of {})",
            details.unresolved(),
            details.conflicts.len()
        ))
    );
    println!("{}", conflict_table(&details.conflicts));
    Ok(())
}

fn cmd_list(engine: &VersionControl, doc: &DocumentId, status: Option<MergeStatus>) -> Result<()> {
    let requests = engine
        .list_merge_requests(doc, status)
        .context("failed to list merge requests")?;
    if requests.is_empty() {
        println!("No merge requests found for {}.", doc);
        return Ok(());
    }

    let mut table = style::table(vec![
        "ID",
        "Source",
        "Target",
        "Status",
        "Conflicts",
        "Opened by",
        "Created",
    ]);
    for mr in &requests {
        table.add_row(vec![
            Cell::new(&mr.merge_id),
            Cell::new(&mr.source_branch),
            Cell::new(&mr.target_branch),
            Cell::new(style::merge_status(mr.status)),
            Cell::new(mr.conflicts.len()),
            Cell::new(&mr.created_by),
            Cell::new(mr.created_at.format("%Y-%m-%d %H:%M")),
        ]);
    }
    println!("{}", table);
    Ok(())
}

fn cmd_execute(engine: &VersionControl, merge_id: &str, author: &str) -> Result<()> {
    match engine.execute_merge(merge_id, author) {
        Ok(outcome) => {
            let how = if outcome.created_version {
                "new merge version"
            } else {
                "no new version"
            };
            println!(
                "{}",
                style::success(&format!(
                    "Merge {} executed, target head is {} ({})",
                    merge_id, outcome.head_version_id, how
                ))
            );
            Ok(())
        }
        Err(e @ VcsError::ConcurrentModification { .. }) => Err(anyhow::Error::new(e).context(
            "target branch moved since the merge request was opened; open a new merge request",
        )),
        Err(e) => Err(anyhow::Error::new(e).context("failed to execute merge")),
    }
}

// ---------------------------------------------------------------------------
// Rendering helpers
// ---------------------------------------------------------------------------

fn conflict_table(conflicts: &[Conflict]) -> comfy_table::Table {
    let mut table = style::table(vec!["ID", "Object", "Property", "Type", "Resolution"]);
    for c in conflicts {
        let resolution = match &c.resolution {
            Some(r) => format!("{} ({})", r, c.resolved_by.as_deref().unwrap_or("-")),
            None => "—".to_string(),
        };
        table.add_row(vec![
            Cell::new(&c.conflict_id),
            Cell::new(&c.object_id),
            Cell::new(c.property_name.as_deref().unwrap_or("")),
            Cell::new(c.conflict_type),
            Cell::new(resolution),
        ]);
    }
    table
}
