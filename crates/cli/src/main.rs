//! floorvc command-line tool.
//!
//! Commits floor-plan documents, manages branches, opens and executes merge
//! requests, and attaches annotations and comments. Every subcommand opens
//! the engine once from the TOML configuration and calls one operation.

mod merge;
mod notes;
mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::Cell;
use serde_json::Value;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use floorvc_core::config::{EngineConfig, DEFAULT_CONFIG_TOML};
use floorvc_core::models::{BranchStatus, NewVersion, VersionType};
use floorvc_core::{DocumentId, VersionControl};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// floorvc command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "floorvc",
    version,
    about = "Version, branch and merge floor-plan documents"
)]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when it is absent.
    #[arg(short, long, global = true, default_value = "./floorvc.toml")]
    config: PathBuf,

    /// Override the configured log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Name recorded as author / actor. Defaults to $USER.
    #[arg(long, global = true)]
    author: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./floorvc.toml")]
        output: PathBuf,
    },

    /// Commit a JSON document as a new version on a branch.
    Commit {
        /// Document scope as building/floor.
        #[arg(short, long)]
        doc: DocumentId,

        /// Path to the JSON document, or `-` for stdin.
        file: PathBuf,

        #[arg(short, long, default_value = "main")]
        branch: String,

        #[arg(short, long, default_value = "")]
        message: String,

        /// Expected current head of the branch.
        #[arg(long)]
        parent: Option<String>,

        /// major, minor, patch or branch.
        #[arg(long = "type", default_value = "minor")]
        version_type: VersionType,
    },

    /// Show version history, newest first.
    Log {
        #[arg(short, long)]
        doc: DocumentId,

        /// Only versions committed to this branch.
        #[arg(short, long)]
        branch: Option<String>,

        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show the metadata of one version.
    Show { version_id: String },

    /// Print the document content of one version.
    Cat {
        version_id: String,

        /// Pretty-print the JSON.
        #[arg(long)]
        pretty: bool,
    },

    /// Recompute a version's content hash and compare it with the stored one.
    Verify { version_id: String },

    /// Commit the content of an earlier version as the new head of a branch.
    Restore {
        version_id: String,

        #[arg(short, long, default_value = "main")]
        branch: String,

        #[arg(short, long)]
        message: Option<String>,
    },

    /// Manage branches.
    Branch {
        #[command(subcommand)]
        action: BranchAction,
    },

    /// Open, review, resolve and execute merge requests.
    Merge {
        #[command(subcommand)]
        action: merge::MergeAction,
    },

    /// Attach and search annotations.
    Annotate {
        #[command(subcommand)]
        action: notes::AnnotateAction,
    },

    /// Comment on versions and annotations.
    Comment {
        #[command(subcommand)]
        action: notes::CommentAction,
    },
}

#[derive(Subcommand, Debug)]
enum BranchAction {
    /// Create a branch whose head starts at an existing version.
    Create {
        name: String,

        #[arg(short, long)]
        doc: DocumentId,

        /// Base version id.
        #[arg(long)]
        from: String,

        #[arg(long)]
        description: Option<String>,
    },
    /// List branches of a document, newest first.
    List {
        #[arg(short, long)]
        doc: DocumentId,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    if let Commands::Init { output } = &cli.command {
        init_tracing(cli.log_level.as_deref().unwrap_or("warn"));
        return cmd_init(output);
    }

    let config = load_config(&cli.config)?;
    init_tracing(cli.log_level.as_deref().unwrap_or(&config.logging.level));
    debug!(
        config = %cli.config.display(),
        data_dir = %config.storage.data_dir.display(),
        "configuration loaded"
    );
    let engine = VersionControl::open(&config).context("failed to open version store")?;
    let author = cli.author.clone().unwrap_or_else(default_author);

    match cli.command {
        Commands::Init { .. } => unreachable!(),
        Commands::Commit {
            doc,
            file,
            branch,
            message,
            parent,
            version_type,
        } => {
            let mut request =
                NewVersion::new(doc, branch, message, author).version_type(version_type);
            if let Some(parent) = parent {
                request = request.parent(parent);
            }
            cmd_commit(&engine, &file, &request)
        }
        Commands::Log { doc, branch, limit } => cmd_log(&engine, &doc, branch.as_deref(), limit),
        Commands::Show { version_id } => cmd_show(&engine, &version_id),
        Commands::Cat { version_id, pretty } => cmd_cat(&engine, &version_id, pretty),
        Commands::Verify { version_id } => cmd_verify(&engine, &version_id),
        Commands::Restore {
            version_id,
            branch,
            message,
        } => cmd_restore(&engine, &version_id, &branch, &author, message.as_deref()),
        Commands::Branch { action } => cmd_branch(&engine, action, &author),
        Commands::Merge { action } => merge::run(&engine, action, &author),
        Commands::Annotate { action } => notes::run_annotate(&engine, action, &author),
        Commands::Comment { action } => notes::run_comment(&engine, action, &author),
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        return Ok(EngineConfig::default());
    }
    EngineConfig::load_and_validate(path)
        .with_context(|| format!("failed to load configuration file {}", path.display()))
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

fn default_author() -> String {
    std::env::var("USER").unwrap_or_else(|_| "cli".to_string())
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, DEFAULT_CONFIG_TOML).context("failed to write config file")?;

    println!("{}", style::success(&format!("Configuration written to {}", output.display())));
    println!();
    println!("Next steps:");
    println!("  1. Adjust [storage] data_dir and the [merge] mode if needed");
    println!(
        "  2. Commit a first version: floorvc --config {} commit --doc <building>/<floor> plan.json",
        output.display()
    );

    Ok(())
}

fn cmd_commit(engine: &VersionControl, file: &Path, request: &NewVersion) -> Result<()> {
    let text = if file == Path::new("-") {
        std::io::read_to_string(std::io::stdin()).context("failed to read document from stdin")?
    } else {
        std::fs::read_to_string(file)
            .with_context(|| format!("failed to read {}", file.display()))?
    };
    debug!(file = %file.display(), bytes = text.len(), "read document");
    let document: Value = serde_json::from_str(&text).context("document is not valid JSON")?;

    let receipt = engine
        .create_version(&document, request)
        .context("failed to commit version")?;

    println!(
        "{}",
        style::success(&format!(
            "Committed {} on {} ({})",
            receipt.version_id, request.branch_name, receipt.version_number
        ))
    );
    println!("  {}", style::dim(&format!("sha256 {}", receipt.content_hash)));
    Ok(())
}

fn cmd_log(
    engine: &VersionControl,
    doc: &DocumentId,
    branch: Option<&str>,
    limit: usize,
) -> Result<()> {
    let versions = engine
        .get_version_history(doc, branch)
        .context("failed to read version history")?;

    if versions.is_empty() {
        println!("No versions found for {}.", doc);
        return Ok(());
    }

    let mut table = style::table(vec!["ID", "Number", "Branch", "Author", "Message", "Created"]);
    for v in versions.iter().take(limit) {
        table.add_row(vec![
            Cell::new(&v.version_id),
            Cell::new(&v.version_number),
            Cell::new(&v.branch_name),
            Cell::new(&v.author),
            Cell::new(truncate(&v.commit_message, 48)),
            Cell::new(v.created_at.format("%Y-%m-%d %H:%M:%S")),
        ]);
    }

    println!();
    println!("{}", style::header(&format!("History of {}", doc)));
    println!("{}", table);
    println!("{} of {} version(s) shown", versions.len().min(limit), versions.len());
    Ok(())
}

fn cmd_show(engine: &VersionControl, version_id: &str) -> Result<()> {
    let v = engine
        .get_version(version_id)
        .context("failed to load version")?;

    println!("{}", style::header(&format!("Version {}", v.version_id)));
    println!();
    println!("  Number     : {}", v.version_number);
    println!("  Document   : {}", v.document_id);
    println!("  Branch     : {} (#{})", v.branch_name, v.branch_seq);
    println!("  Type       : {}", v.version_type);
    println!(
        "  Parent     : {}",
        v.parent_version_id.as_deref().unwrap_or("-")
    );
    println!("  Author     : {}", v.author);
    println!("  Created at : {}", v.created_at.to_rfc3339());
    println!("  Hash       : {}", v.content_hash);
    println!("  Size       : {} bytes", v.content_size);
    if !v.commit_message.is_empty() {
        println!("  Message    : {}", v.commit_message);
    }
    if !v.metadata.is_empty() {
        println!("  Metadata   : {}", Value::Object(v.metadata.clone()));
    }
    Ok(())
}

fn cmd_cat(engine: &VersionControl, version_id: &str, pretty: bool) -> Result<()> {
    let document = engine
        .get_version_data(version_id)
        .context("failed to load version content")?;
    let text = if pretty {
        serde_json::to_string_pretty(&document)?
    } else {
        serde_json::to_string(&document)?
    };
    println!("{}", text);
    Ok(())
}

fn cmd_verify(engine: &VersionControl, version_id: &str) -> Result<()> {
    let intact = engine
        .verify_version(version_id)
        .context("failed to verify version")?;
    if !intact {
        anyhow::bail!("content of version {} does not match its recorded hash", version_id);
    }
    println!("{}", style::success(&format!("Version {} is intact", version_id)));
    Ok(())
}

fn cmd_restore(
    engine: &VersionControl,
    version_id: &str,
    branch: &str,
    author: &str,
    message: Option<&str>,
) -> Result<()> {
    let receipt = engine
        .restore_version(version_id, branch, author, message)
        .context("failed to restore version")?;
    println!(
        "{}",
        style::success(&format!(
            "Restored {} onto {} as {}",
            version_id, branch, receipt.version_id
        ))
    );
    Ok(())
}

fn cmd_branch(engine: &VersionControl, action: BranchAction, author: &str) -> Result<()> {
    match action {
        BranchAction::Create {
            name,
            doc,
            from,
            description,
        } => {
            let branch = engine
                .create_branch(&name, &doc, &from, author, description.as_deref())
                .context("failed to create branch")?;
            println!(
                "{}",
                style::success(&format!(
                    "Branch {} created at {}",
                    branch.branch_name, branch.current_version_id
                ))
            );
            Ok(())
        }

        BranchAction::List { doc } => {
            let branches = engine
                .get_branches(&doc)
                .context("failed to list branches")?;
            if branches.is_empty() {
                println!("No branches found for {}.", doc);
                return Ok(());
            }

            let mut table = style::table(vec![
                "Branch",
                "Status",
                "Head",
                "Base",
                "Created by",
                "Updated",
            ]);
            for b in &branches {
                table.add_row(vec![
                    Cell::new(&b.branch_name),
                    Cell::new(style::branch_status(b.status)),
                    Cell::new(&b.current_version_id),
                    Cell::new(&b.base_version_id),
                    Cell::new(&b.created_by),
                    Cell::new(b.last_updated.format("%Y-%m-%d %H:%M:%S")),
                ]);
            }
            println!("{}", table);

            let merged = branches
                .iter()
                .filter(|b| b.status == BranchStatus::Merged)
                .count();
            if merged > 0 {
                println!("{}", style::dim(&format!("{} merged branch(es)", merged)));
            }
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Utilities
// ---------------------------------------------------------------------------

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
