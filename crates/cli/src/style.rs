//! Shared styling utilities for CLI output.

use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use console::Style;

use floorvc_core::models::{BranchStatus, MergeStatus};

/// Create a success-styled string (green with checkmark).
pub fn success(msg: &str) -> String {
    let style = Style::new().green();
    format!("{} {}", style.apply_to("✓"), msg)
}

/// Create a warning-styled string (yellow).
pub fn warn(msg: &str) -> String {
    let style = Style::new().yellow();
    format!("{} {}", style.apply_to("⚠"), msg)
}

/// Create a header-styled string (bold, white).
pub fn header(msg: &str) -> String {
    let style = Style::new().bold();
    style.apply_to(msg).to_string()
}

/// Create a dim-styled string.
pub fn dim(msg: &str) -> String {
    let style = Style::new().dim();
    style.apply_to(msg).to_string()
}

/// Coloured dot plus label for a merge request status.
pub fn merge_status(status: MergeStatus) -> String {
    let style = match status {
        MergeStatus::Pending | MergeStatus::InProgress => Style::new().cyan(),
        MergeStatus::Conflict => Style::new().yellow(),
        MergeStatus::Completed => Style::new().green(),
        MergeStatus::Failed => Style::new().red(),
    };
    format!("{} {}", style.apply_to("●"), status)
}

/// Coloured dot plus label for a branch status.
pub fn branch_status(status: BranchStatus) -> String {
    match status {
        BranchStatus::Active => format!("{} {}", Style::new().green().apply_to("●"), status),
        _ => format!("{} {}", Style::new().dim().apply_to("○"), status),
    }
}

/// An empty table with the house preset applied.
pub fn table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(header);
    table
}
