//! Immutable per-system snapshots and the cell that publishes them.
//!
//! A [`Snapshot`] holds everything fetched from one system together with
//! the dependency index derived from it. Snapshots are never mutated; a
//! refresh builds a new one off to the side and swaps it in atomically, so
//! readers either see the previous snapshot or the complete new one.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwapOption;
use conveyor_interchange::{
    Component, ComponentKind, Dependency, Group, Library, PruningEntry, Tag, Version,
};
use tracing::debug;

use crate::error::CoreError;
use crate::index::{build_index, DependencyIndex};
use crate::lexer::ScriptAnalyzer;

/// Raw material for a snapshot, as fetched from a store.
#[derive(Debug, Clone, Default)]
pub struct SnapshotParts {
    pub version: Option<Version>,
    pub pipelines: Vec<Component>,
    pub templates: Vec<Component>,
    pub libraries: Vec<Library>,
    pub groups: Vec<Group>,
    pub tags: Vec<Tag>,
    pub pruning: Vec<PruningEntry>,
    pub dependencies: Vec<Dependency>,
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    version: Option<Version>,
    pipelines: Vec<Component>,
    templates: Vec<Component>,
    libraries: Vec<Library>,
    groups: Vec<Group>,
    tags: Vec<Tag>,
    pruning: Vec<PruningEntry>,
    dependencies: Vec<Dependency>,
    index: DependencyIndex,
}

impl Snapshot {
    pub fn build(parts: SnapshotParts, analyzer: &ScriptAnalyzer) -> Result<Self, CoreError> {
        let index = build_index(&parts.templates, &parts.libraries, &parts.pipelines, analyzer)?;
        Ok(Snapshot {
            version: parts.version,
            pipelines: parts.pipelines,
            templates: parts.templates,
            libraries: parts.libraries,
            groups: parts.groups,
            tags: parts.tags,
            pruning: parts.pruning,
            dependencies: parts.dependencies,
            index,
        })
    }

    pub fn version(&self) -> Option<Version> {
        self.version
    }

    pub fn index(&self) -> &DependencyIndex {
        &self.index
    }

    /// Leaf components of a kind; satellite kinds have none.
    pub fn leaves(&self, kind: ComponentKind) -> &[Component] {
        match kind {
            ComponentKind::Pipeline => &self.pipelines,
            ComponentKind::ScriptTemplate => &self.templates,
            _ => &[],
        }
    }

    pub fn component(&self, kind: ComponentKind, id: &str) -> Option<&Component> {
        self.leaves(kind).iter().find(|c| c.id == id)
    }

    /// First leaf with the given name. Names are the cross-system identity key.
    pub fn component_by_name(&self, kind: ComponentKind, name: &str) -> Option<&Component> {
        self.leaves(kind).iter().find(|c| c.name == name)
    }

    pub fn libraries(&self) -> &[Library] {
        &self.libraries
    }

    pub fn library(&self, id: &str) -> Option<&Library> {
        self.libraries.iter().find(|l| l.id == id)
    }

    pub fn library_by_name(&self, name: &str) -> Option<&Library> {
        self.libraries.iter().find(|l| l.name == name)
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn group_by_name(&self, name: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.name == name)
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    pub fn tag_by_name(&self, name: &str) -> Option<&Tag> {
        self.tags.iter().find(|t| t.name == name)
    }

    pub fn pruning(&self) -> &[PruningEntry] {
        &self.pruning
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    /// Every id in use for a kind.
    pub fn ids(&self, kind: ComponentKind) -> BTreeSet<String> {
        match kind {
            ComponentKind::Pipeline | ComponentKind::ScriptTemplate => {
                self.leaves(kind).iter().map(|c| c.id.clone()).collect()
            }
            ComponentKind::ScriptLibrary => self.libraries.iter().map(|l| l.id.clone()).collect(),
            ComponentKind::PipelineGroup => self.groups.iter().map(|g| g.id.clone()).collect(),
            ComponentKind::PipelineTag => self.tags.iter().map(|t| t.id.clone()).collect(),
            ComponentKind::PipelinePruningSetting => {
                self.pruning.iter().map(|p| p.pipeline_id.clone()).collect()
            }
            ComponentKind::InterPipelineDependency => BTreeSet::new(),
        }
    }

    /// Display name of any named component.
    pub fn name_of(&self, kind: ComponentKind, id: &str) -> Option<&str> {
        match kind {
            ComponentKind::Pipeline | ComponentKind::ScriptTemplate => {
                self.component(kind, id).map(|c| c.name.as_str())
            }
            ComponentKind::ScriptLibrary => self.library(id).map(|l| l.name.as_str()),
            ComponentKind::PipelineGroup => self
                .groups
                .iter()
                .find(|g| g.id == id)
                .map(|g| g.name.as_str()),
            ComponentKind::PipelineTag => {
                self.tags.iter().find(|t| t.id == id).map(|t| t.name.as_str())
            }
            _ => None,
        }
    }
}

/// Holder of the current snapshot of one system.
///
/// Reads are lock-free. Builds are serialized by a mutex so concurrent
/// callers do not fetch the same system twice; a failed build leaves the
/// previous snapshot in place.
#[derive(Debug, Default)]
pub struct SnapshotCell {
    current: ArcSwapOption<Snapshot>,
    build_lock: Mutex<()>,
}

impl SnapshotCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.current.load_full()
    }

    /// Return the current snapshot, building it on first access.
    pub fn get_or_build<E>(
        &self,
        build: impl FnOnce() -> Result<Snapshot, E>,
    ) -> Result<Arc<Snapshot>, E> {
        if let Some(snapshot) = self.current.load_full() {
            return Ok(snapshot);
        }
        let _guard = self.build_lock.lock().unwrap_or_else(|e| e.into_inner());
        // another caller may have finished the build while we waited
        if let Some(snapshot) = self.current.load_full() {
            return Ok(snapshot);
        }
        let snapshot = Arc::new(build()?);
        self.current.store(Some(Arc::clone(&snapshot)));
        debug!("snapshot published");
        Ok(snapshot)
    }

    /// Build a fresh snapshot and swap it in.
    pub fn rebuild<E>(
        &self,
        build: impl FnOnce() -> Result<Snapshot, E>,
    ) -> Result<Arc<Snapshot>, E> {
        let _guard = self.build_lock.lock().unwrap_or_else(|e| e.into_inner());
        let snapshot = Arc::new(build()?);
        self.current.store(Some(Arc::clone(&snapshot)));
        debug!("snapshot replaced");
        Ok(snapshot)
    }

    /// Drop the current snapshot; the next read rebuilds it.
    pub fn invalidate(&self) {
        self.current.store(None);
    }
}
