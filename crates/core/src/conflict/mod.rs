//! Conflict detection, document merging, and resolution handling.
//!
//! The conflict subsystem is responsible for:
//! 1. **Detection** -- comparing two document snapshots object by object,
//!    either directly (two-way) or against their merge base (three-way).
//! 2. **Resolution** -- interpreting the labels reviewers record on conflicts.
//! 3. **Merging** -- materializing a merged document from both heads and the
//!    chosen resolutions.

pub mod detector;
pub mod merger;
pub mod resolver;

pub use detector::{ConflictDetector, ObjectConflict};
pub use merger::{MergeInputs, Merger};
pub use resolver::{ConflictResolver, Resolution};
