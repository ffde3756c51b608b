//! conveyor-core: script analysis and per-system derived state.
//!
//! Turns the components fetched from one system into an immutable
//! [`Snapshot`] carrying a [`DependencyIndex`]:
//!
//! - [`ScriptAnalyzer`] -- single-pass scan for definitions and calls
//! - [`build_index`] -- template, library and pipeline maps
//! - [`SnapshotCell`] -- rebuild-then-swap holder of the current snapshot
//! - [`CoreError`] -- snapshot build errors

pub mod error;
pub mod index;
pub mod lexer;
pub mod snapshot;

// ── Convenience re-exports ───────────────────────────────────────────

pub use error::CoreError;
pub use index::{build_index, pipeline_script_text, DependencyIndex};
pub use lexer::{FunctionSpan, ScriptAnalysis, ScriptAnalyzer};
pub use snapshot::{Snapshot, SnapshotCell, SnapshotParts};
