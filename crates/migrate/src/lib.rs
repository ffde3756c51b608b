//! conveyor-migrate: moving components between systems.
//!
//! - [`IdentityResolver`] -- decides the destination id of every component
//! - [`VersionAdapter`] -- converts payloads between engine schema versions
//! - [`MigrationOrchestrator`] -- pushes leaves and reconciles satellites
//! - [`Engine`] -- named systems and the operations front ends call

pub mod adapter;
pub mod diff;
pub mod engine;
pub mod error;
pub mod identity;
pub mod orchestrator;
pub mod satellites;

// ── Convenience re-exports ───────────────────────────────────────────

pub use adapter::{Delta, VersionAdapter, CATALOGUE};
pub use diff::{diff_components, ComponentDiff, FieldDiff};
pub use engine::{
    ComponentConflicts, ComponentDetail, ComponentTree, Engine, ExistingComponent, ReloadSummary,
    SystemHandle, SystemSpec, TreeNode, VersionMismatch, DEFAULT_GROUP,
};
pub use error::EngineError;
pub use identity::{IdMap, IdentityAction, IdentityResolver, Remap};
pub use orchestrator::{
    expand_refs, referenced_templates, Event, LeafOutcome, LeafStatus, MigrationOptions,
    MigrationOrchestrator, MigrationReport, SatelliteOutcome, SatelliteStatus,
};
pub use satellites::{MigratedLeaf, Reconciliation};
