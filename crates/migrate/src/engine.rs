//! The engine service: named systems, their snapshots, and the
//! operations exposed to front ends.
//!
//! Each configured system gets a [`SystemHandle`] owning its store and
//! its snapshot cell. Snapshots are fetched on first use and kept until a
//! refresh, a migration into the system, or a configuration change.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use conveyor_analyze::{describe, ComponentMetadata, ConflictDetector, ConflictReport};
use conveyor_core::{ScriptAnalyzer, Snapshot, SnapshotCell, SnapshotParts};
use conveyor_interchange::records::{
    parse_collection, parse_dependencies, parse_groups, parse_libraries, parse_pruning,
    parse_tags,
};
use conveyor_interchange::{
    Component, ComponentKind, ComponentRef, InterchangeError, Version, VERSION_CONFLICT_ID,
};
use conveyor_storage::{ComponentStore, StoreError};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::diff::{diff_components, ComponentDiff};
use crate::error::EngineError;
use crate::orchestrator::{
    expand_refs, referenced_templates, MigrationOptions, MigrationOrchestrator, MigrationReport,
};

/// Name of the synthetic container holding ungrouped members.
pub const DEFAULT_GROUP: &str = "Default";

/// How to reach one system.
#[derive(Clone)]
pub struct SystemSpec {
    pub name: String,
    /// Digest of the settings the store was built from; a new digest on
    /// reload replaces the handle.
    pub fingerprint: String,
    pub store: Arc<dyn ComponentStore>,
}

pub struct SystemHandle {
    name: String,
    fingerprint: String,
    store: Arc<dyn ComponentStore>,
    cell: SnapshotCell,
}

impl SystemHandle {
    pub fn new(spec: SystemSpec) -> Self {
        SystemHandle {
            name: spec.name,
            fingerprint: spec.fingerprint,
            store: spec.store,
            cell: SnapshotCell::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn store(&self) -> &dyn ComponentStore {
        self.store.as_ref()
    }

    /// The current snapshot, fetched on first use.
    pub fn snapshot(&self, analyzer: &ScriptAnalyzer) -> Result<Arc<Snapshot>, EngineError> {
        self.cell.get_or_build(|| self.load(analyzer))
    }

    /// Fetch everything again and swap the new snapshot in. On failure
    /// the previous snapshot stays.
    pub fn refresh(&self, analyzer: &ScriptAnalyzer) -> Result<Arc<Snapshot>, EngineError> {
        self.cell.rebuild(|| self.load(analyzer))
    }

    pub fn invalidate(&self) {
        self.cell.invalidate();
    }

    fn store_error(&self, source: StoreError) -> EngineError {
        EngineError::Store {
            system: self.name.clone(),
            source,
        }
    }

    fn payload_error(&self, source: InterchangeError) -> EngineError {
        EngineError::Payload {
            system: self.name.clone(),
            source,
        }
    }

    fn fetch_all(&self, kind: ComponentKind) -> Result<String, EngineError> {
        self.store.fetch_all(kind).map_err(|e| self.store_error(e))
    }

    fn leaves(&self, kind: ComponentKind) -> Result<Vec<Component>, EngineError> {
        let raw = self.fetch_all(kind)?;
        parse_collection(&raw)
            .and_then(|items| {
                items
                    .into_iter()
                    .map(|el| Component::from_element(kind, el))
                    .collect()
            })
            .map_err(|e| self.payload_error(e))
    }

    fn load(&self, analyzer: &ScriptAnalyzer) -> Result<Snapshot, EngineError> {
        info!(system = %self.name, "loading system");
        let version = self
            .store
            .server_version()
            .map_err(|e| self.store_error(e))?;
        let parts = SnapshotParts {
            version: Some(version),
            pipelines: self.leaves(ComponentKind::Pipeline)?,
            templates: self.leaves(ComponentKind::ScriptTemplate)?,
            libraries: parse_libraries(&self.fetch_all(ComponentKind::ScriptLibrary)?)
                .map_err(|e| self.payload_error(e))?,
            groups: parse_groups(&self.fetch_all(ComponentKind::PipelineGroup)?)
                .map_err(|e| self.payload_error(e))?,
            tags: parse_tags(&self.fetch_all(ComponentKind::PipelineTag)?)
                .map_err(|e| self.payload_error(e))?,
            pruning: parse_pruning(&self.fetch_all(ComponentKind::PipelinePruningSetting)?)
                .map_err(|e| self.payload_error(e))?,
            dependencies: parse_dependencies(
                &self.fetch_all(ComponentKind::InterPipelineDependency)?,
            )
            .map_err(|e| self.payload_error(e))?,
        };
        debug!(
            system = %self.name,
            pipelines = parts.pipelines.len(),
            templates = parts.templates.len(),
            "components fetched"
        );
        Snapshot::build(parts, analyzer).map_err(|source| EngineError::Snapshot {
            system: self.name.clone(),
            source,
        })
    }
}

// ── Records returned by the engine ───────────────────────────────────

/// One container of a component tree with its members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeNode {
    pub container: ComponentRef,
    pub count: usize,
    pub members: Vec<ComponentRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentTree {
    pub system: String,
    pub container_kind: ComponentKind,
    pub nodes: Vec<TreeNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentDetail {
    pub metadata: ComponentMetadata,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionMismatch {
    pub source: String,
    pub destination: String,
}

/// The destination already holds a component of the same name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistingComponent {
    pub destination: ComponentRef,
    pub source_revision: i64,
    pub destination_revision: i64,
    pub content_differs: bool,
}

/// Everything worth knowing before migrating one component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentConflicts {
    pub component: ComponentRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_mismatch: Option<VersionMismatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub already_exists: Option<ExistingComponent>,
    #[serde(flatten)]
    pub issues: ConflictReport,
}

impl ComponentConflicts {
    fn new(component: ComponentRef) -> Self {
        ComponentConflicts {
            component,
            version_mismatch: None,
            already_exists: None,
            issues: ConflictReport::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.version_mismatch.is_none() && self.already_exists.is_none() && self.issues.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReloadSummary {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
    pub kept: Vec<String>,
}

// ── Engine ───────────────────────────────────────────────────────────

pub struct Engine {
    systems: BTreeMap<String, Arc<SystemHandle>>,
    excluded: BTreeSet<String>,
    analyzer: ScriptAnalyzer,
}

fn handles(specs: Vec<SystemSpec>) -> Result<BTreeMap<String, SystemSpec>, EngineError> {
    let mut out = BTreeMap::new();
    for spec in specs {
        if out.contains_key(&spec.name) {
            return Err(EngineError::Configuration(format!(
                "system '{}' is defined more than once",
                spec.name
            )));
        }
        out.insert(spec.name.clone(), spec);
    }
    Ok(out)
}

impl Engine {
    /// `excluded` names are never reported as function calls.
    pub fn new<I, S>(specs: Vec<SystemSpec>, excluded: I) -> Result<Self, EngineError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let excluded: BTreeSet<String> = excluded.into_iter().map(Into::into).collect();
        let systems = handles(specs)?
            .into_iter()
            .map(|(name, spec)| (name, Arc::new(SystemHandle::new(spec))))
            .collect();
        Ok(Engine {
            systems,
            analyzer: ScriptAnalyzer::new(excluded.iter().cloned()),
            excluded,
        })
    }

    pub fn system_names(&self) -> impl Iterator<Item = &str> {
        self.systems.keys().map(String::as_str)
    }

    pub fn system(&self, name: &str) -> Result<&Arc<SystemHandle>, EngineError> {
        self.systems
            .get(name)
            .ok_or_else(|| EngineError::UnknownSystem(name.to_string()))
    }

    fn snapshot(&self, name: &str) -> Result<Arc<Snapshot>, EngineError> {
        self.system(name)?.snapshot(&self.analyzer)
    }

    /// Pipelines by group, or templates by library. Members of no
    /// container are listed under [`DEFAULT_GROUP`].
    pub fn list_components(
        &self,
        system: &str,
        container_kind: ComponentKind,
    ) -> Result<ComponentTree, EngineError> {
        let snapshot = self.snapshot(system)?;
        let (leaf_kind, containers): (ComponentKind, Vec<(ComponentRef, &[String])>) =
            match container_kind {
                ComponentKind::PipelineGroup => (
                    ComponentKind::Pipeline,
                    snapshot
                        .groups()
                        .iter()
                        .map(|g| {
                            let r = ComponentRef::named(container_kind, g.id.clone(), g.name.clone());
                            (r, g.pipeline_ids.as_slice())
                        })
                        .collect(),
                ),
                ComponentKind::ScriptLibrary => (
                    ComponentKind::ScriptTemplate,
                    snapshot
                        .libraries()
                        .iter()
                        .map(|l| {
                            let r = ComponentRef::named(container_kind, l.id.clone(), l.name.clone());
                            (r, l.template_ids.as_slice())
                        })
                        .collect(),
                ),
                other => {
                    return Err(EngineError::Configuration(format!(
                        "{other} cannot be listed as a container; use channelGroup or codeTemplateLibrary"
                    )))
                }
            };

        let mut placed = BTreeSet::new();
        let mut nodes = Vec::new();
        for (container, ids) in containers {
            let members: Vec<ComponentRef> = ids
                .iter()
                .filter_map(|id| snapshot.component(leaf_kind, id))
                .map(Component::to_ref)
                .collect();
            placed.extend(members.iter().map(|m| m.id.clone()));
            nodes.push(TreeNode {
                container,
                count: members.len(),
                members,
            });
        }
        let loose: Vec<ComponentRef> = snapshot
            .leaves(leaf_kind)
            .iter()
            .filter(|c| !placed.contains(&c.id))
            .map(Component::to_ref)
            .collect();
        if !loose.is_empty() {
            nodes.push(TreeNode {
                container: ComponentRef::named(container_kind, DEFAULT_GROUP, DEFAULT_GROUP),
                count: loose.len(),
                members: loose,
            });
        }

        Ok(ComponentTree {
            system: system.to_string(),
            container_kind,
            nodes,
        })
    }

    pub fn component_detail(
        &self,
        system: &str,
        kind: ComponentKind,
        id: &str,
    ) -> Result<ComponentDetail, EngineError> {
        let snapshot = self.snapshot(system)?;
        let not_found = || EngineError::NotFound {
            system: system.to_string(),
            component: ComponentRef::new(kind, id),
        };
        let metadata = describe(&snapshot, kind, id).ok_or_else(not_found)?;
        let content = match kind {
            ComponentKind::Pipeline | ComponentKind::ScriptTemplate => {
                snapshot.component(kind, id).map(Component::content)
            }
            ComponentKind::ScriptLibrary => snapshot.library(id).map(|l| l.to_element().to_xml()),
            ComponentKind::PipelineGroup => snapshot
                .groups()
                .iter()
                .find(|g| g.id == id)
                .map(|g| g.to_element().to_xml()),
            ComponentKind::PipelineTag => snapshot
                .tags()
                .iter()
                .find(|t| t.id == id)
                .map(|t| t.to_element().to_xml()),
            _ => None,
        }
        .ok_or_else(not_found)?;
        Ok(ComponentDetail { metadata, content })
    }

    /// Compare a source leaf with the destination leaf of the same name.
    pub fn diff_component(
        &self,
        source: &str,
        target: &str,
        component: &ComponentRef,
    ) -> Result<ComponentDiff, EngineError> {
        let from = self.snapshot(source)?;
        let to = self.snapshot(target)?;
        let c = from
            .component(component.kind, &component.id)
            .ok_or_else(|| EngineError::NotFound {
                system: source.to_string(),
                component: component.clone(),
            })?;
        Ok(diff_components(c, to.component_by_name(c.kind, &c.name)))
    }

    /// Conflicts of migrating `refs` from `source` to `target`. Only
    /// components with something to report are returned; a differing
    /// server version comes first, under [`VERSION_CONFLICT_ID`].
    pub fn find_conflicts(
        &self,
        source: &str,
        target: &str,
        refs: &[ComponentRef],
    ) -> Result<Vec<ComponentConflicts>, EngineError> {
        let from = self.snapshot(source)?;
        let to = self.snapshot(target)?;
        let mut out = Vec::new();

        if let (Some(a), Some(b)) = (from.version(), to.version()) {
            if a != b {
                let mut entry = ComponentConflicts::new(ComponentRef::named(
                    ComponentKind::Pipeline,
                    VERSION_CONFLICT_ID,
                    "Server version",
                ));
                entry.version_mismatch = Some(VersionMismatch {
                    source: a.to_string(),
                    destination: b.to_string(),
                });
                out.push(entry);
            }
        }

        let detector = ConflictDetector::new(&from);
        let (leaves, _) = expand_refs(&from, refs);
        for c in leaves {
            let mut entry = ComponentConflicts::new(c.to_ref());
            if let Some(existing) = to.component_by_name(c.kind, &c.name) {
                let diff = diff_components(c, Some(existing));
                if existing.revision != c.revision || !diff.identical {
                    entry.already_exists = Some(ExistingComponent {
                        destination: existing.to_ref(),
                        source_revision: c.revision,
                        destination_revision: existing.revision,
                        content_differs: !diff.identical,
                    });
                }
            }
            entry.issues = match c.kind {
                ComponentKind::Pipeline => detector.validate_pipeline(&c.id),
                _ => detector.validate_template(&c.id),
            };
            if !entry.is_empty() {
                out.push(entry);
            }
        }
        Ok(out)
    }

    pub fn referenced_templates(
        &self,
        system: &str,
        pipelines: &[ComponentRef],
    ) -> Result<Vec<ComponentRef>, EngineError> {
        let snapshot = self.snapshot(system)?;
        let (leaves, _) = expand_refs(&snapshot, pipelines);
        let ids = leaves
            .iter()
            .filter(|c| c.kind == ComponentKind::Pipeline)
            .map(|c| c.id.as_str());
        Ok(referenced_templates(&snapshot, ids))
    }

    /// Migrate `refs` from `source` into `target`. The target snapshot is
    /// dropped afterwards, so the next read sees what was written.
    pub fn migrate(
        &self,
        source: &str,
        target: &str,
        refs: &[ComponentRef],
        options: MigrationOptions,
    ) -> Result<MigrationReport, EngineError> {
        if source == target {
            return Err(EngineError::Configuration(
                "source and target must be different systems".to_string(),
            ));
        }
        let from = self.snapshot(source)?;
        let handle = self.system(target)?;
        let to = handle.snapshot(&self.analyzer)?;
        info!(source, target, components = refs.len(), "migrating");

        let report = MigrationOrchestrator::new(&from, &to, handle.store(), options).run(refs);
        handle.invalidate();
        Ok(report)
    }

    pub fn refresh(&self, system: &str) -> Result<(), EngineError> {
        self.system(system)?.refresh(&self.analyzer)?;
        Ok(())
    }

    pub fn server_version(&self, system: &str) -> Result<Option<Version>, EngineError> {
        Ok(self.snapshot(system)?.version())
    }

    /// Replace the system set. Handles whose fingerprint is unchanged keep
    /// their snapshot unless the detection filter changed.
    pub fn reload<I, S>(
        &mut self,
        specs: Vec<SystemSpec>,
        excluded: I,
    ) -> Result<ReloadSummary, EngineError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut specs = handles(specs)?;
        let excluded: BTreeSet<String> = excluded.into_iter().map(Into::into).collect();
        let filter_changed = excluded != self.excluded;
        let mut summary = ReloadSummary::default();
        let mut systems = BTreeMap::new();

        for (name, handle) in std::mem::take(&mut self.systems) {
            match specs.remove(&name) {
                Some(spec) if spec.fingerprint == handle.fingerprint => {
                    if filter_changed {
                        handle.invalidate();
                    }
                    summary.kept.push(name.clone());
                    systems.insert(name, handle);
                }
                Some(spec) => {
                    if let Err(e) = handle.store().logout() {
                        warn!(system = %name, error = %e, "logout failed");
                    }
                    summary.changed.push(name.clone());
                    systems.insert(name, Arc::new(SystemHandle::new(spec)));
                }
                None => {
                    if let Err(e) = handle.store().logout() {
                        warn!(system = %name, error = %e, "logout failed");
                    }
                    summary.removed.push(name);
                }
            }
        }
        for (name, spec) in specs {
            summary.added.push(name.clone());
            systems.insert(name, Arc::new(SystemHandle::new(spec)));
        }

        self.systems = systems;
        if filter_changed {
            self.analyzer = ScriptAnalyzer::new(excluded.iter().cloned());
            self.excluded = excluded;
        }
        info!(
            added = summary.added.len(),
            removed = summary.removed.len(),
            changed = summary.changed.len(),
            "configuration reloaded"
        );
        Ok(summary)
    }

    pub fn logout_all(&self) {
        for handle in self.systems.values() {
            if let Err(e) = handle.store().logout() {
                warn!(system = %handle.name(), error = %e, "logout failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_storage::MemoryStore;

    fn store(version: Version) -> Arc<MemoryStore> {
        Arc::new(MemoryStore::new("test", version))
    }

    fn spec(name: &str, fingerprint: &str, store: Arc<MemoryStore>) -> SystemSpec {
        SystemSpec {
            name: name.into(),
            fingerprint: fingerprint.into(),
            store,
        }
    }

    #[test]
    fn ungrouped_pipelines_land_in_the_default_group() {
        let s = store(Version::new(3, 9, 1));
        s.seed(ComponentKind::Pipeline, "<channel><id>a</id><name>A</name></channel>").unwrap();
        s.seed(ComponentKind::Pipeline, "<channel><id>b</id><name>B</name></channel>").unwrap();
        s.seed(
            ComponentKind::PipelineGroup,
            "<list><channelGroup><id>g</id><name>G</name><channels><channel><id>a</id></channel></channels></channelGroup></list>",
        )
        .unwrap();
        let engine = Engine::new(vec![spec("dev", "f", s)], Vec::<String>::new()).unwrap();

        let tree = engine.list_components("dev", ComponentKind::PipelineGroup).unwrap();
        assert_eq!(tree.nodes.len(), 2);
        assert_eq!(tree.nodes[0].container.name, "G");
        assert_eq!(tree.nodes[0].count, 1);
        assert_eq!(tree.nodes[1].container.name, DEFAULT_GROUP);
        assert_eq!(tree.nodes[1].members[0].id, "b");
        assert!(engine.list_components("dev", ComponentKind::PipelineTag).is_err());
    }

    #[test]
    fn version_mismatch_is_reported_first() {
        let a = store(Version::new(3, 9, 1));
        a.seed(ComponentKind::Pipeline, "<channel><id>p</id><name>P</name><revision>2</revision></channel>").unwrap();
        let b = store(Version::new(3, 10, 0));
        b.seed(ComponentKind::Pipeline, "<channel><id>q</id><name>P</name><revision>1</revision></channel>").unwrap();
        let engine = Engine::new(vec![spec("a", "1", a), spec("b", "2", b)], Vec::<String>::new()).unwrap();

        let conflicts = engine
            .find_conflicts("a", "b", &[ComponentRef::new(ComponentKind::Pipeline, "p")])
            .unwrap();
        assert_eq!(conflicts.len(), 2);
        assert_eq!(conflicts[0].component.id, VERSION_CONFLICT_ID);
        let existing = conflicts[1].already_exists.as_ref().unwrap();
        assert_eq!(existing.destination.id, "q");
        assert_eq!((existing.source_revision, existing.destination_revision), (2, 1));
    }

    #[test]
    fn duplicate_system_names_are_rejected() {
        let s = store(Version::new(3, 9, 1));
        let err = Engine::new(
            vec![spec("dev", "1", s.clone()), spec("dev", "2", s)],
            Vec::<String>::new(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[test]
    fn reload_keeps_handles_with_the_same_fingerprint() {
        let s = store(Version::new(3, 9, 1));
        let mut engine = Engine::new(
            vec![spec("dev", "1", s.clone()), spec("prod", "1", s.clone())],
            Vec::<String>::new(),
        )
        .unwrap();
        let before = Arc::clone(engine.system("dev").unwrap());

        let summary = engine
            .reload(
                vec![spec("dev", "1", s.clone()), spec("qa", "1", s)],
                Vec::<String>::new(),
            )
            .unwrap();
        assert_eq!(summary.kept, vec!["dev"]);
        assert_eq!(summary.removed, vec!["prod"]);
        assert_eq!(summary.added, vec!["qa"]);
        assert!(Arc::ptr_eq(&before, engine.system("dev").unwrap()));
        assert!(engine.system("prod").is_err());
    }

    #[test]
    fn unreachable_system_surfaces_a_store_error() {
        let s = store(Version::new(3, 9, 1));
        s.set_available(false);
        let engine = Engine::new(vec![spec("dev", "1", s)], Vec::<String>::new()).unwrap();
        let err = engine.refresh("dev").unwrap_err();
        assert!(matches!(err, EngineError::Store { .. }));
    }
}
