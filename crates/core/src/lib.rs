//! floorvc core library.
//!
//! Version control for structured floor-plan documents: immutable hashed
//! snapshots, named branch heads with compare-and-swap updates, object-level
//! conflict detection, merge requests with recorded resolutions, and
//! annotation/comment overlays. Persistence is SQLite for metadata plus a
//! file-backed blob area for document content.

pub mod annotations;
pub mod blob;
pub mod branch;
pub mod config;
pub mod conflict;
pub mod db;
pub mod document;
pub mod engine;
pub mod errors;
pub mod merge;
pub mod models;
pub mod version_store;

// Re-exports for convenience.
pub use config::EngineConfig;
pub use db::Database;
pub use engine::VersionControl;
pub use errors::VcsError;
pub use models::{DocumentId, NewAnnotation, NewVersion};
