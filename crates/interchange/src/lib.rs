//! conveyor-interchange: component model shared by every Conveyor crate.
//!
//! Provides the XML element tree used for all remote payloads, the
//! component kinds and summaries, engine schema versions, and typed
//! views over the satellite collections (libraries, groups, tags,
//! pruning metadata, dependencies).
//!
//! Consumers parse a payload once into an [`Element`] and then read or
//! edit it through these types; nothing here talks to a remote system.

pub mod error;
pub mod records;
pub mod types;
pub mod version;
pub mod xml;

pub use error::InterchangeError;
pub use records::{Dependency, Group, Library, PruningEntry, Tag};
pub use types::*;
pub use version::Version;
pub use xml::{Element, Node};
