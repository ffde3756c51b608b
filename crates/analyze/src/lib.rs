//! Conveyor static analysis -- reference validation and component metadata.
//!
//! Works on an immutable [`conveyor_core::Snapshot`]. The
//! [`ConflictDetector`] classifies every name a component references
//! (valid, missing library link, unknown) and reports functions defined
//! by more than one template. [`describe`] builds the summary record
//! shown for a single component.

pub mod conflicts;
pub mod report;

pub use conflicts::{
    ConflictDetector, ConflictReport, MissingReference, MultipleDefinition, OwnerCount,
    UnknownFunction, PATH_SEPARATOR,
};
pub use report::{describe, ComponentMetadata};
