//! Migration of a batch of components from one system to another.
//!
//! One ordered pass per batch:
//!
//! 1. partition the requested references into template and pipeline
//!    leaves (containers expand to their members);
//! 2. resolve the destination id of every leaf;
//! 3. push the templates;
//! 4. bootstrap the libraries, counting the pending pipelines as migrated
//!    so every pipeline finds its libraries linked when it is created;
//! 5. push the pipelines;
//! 6. reconcile groups, libraries, tags, pruning settings and
//!    dependencies from the leaves that made it.
//!
//! A failed push is recorded and the batch carries on. Nothing is rolled
//! back; satellite steps only ever reference leaves that were written.

use std::collections::BTreeSet;

use conveyor_core::Snapshot;
use conveyor_interchange::records::{
    dependencies_to_xml, groups_to_xml, libraries_to_xml, parse_dependencies, parse_groups,
    parse_libraries, parse_pruning, parse_tags, pruning_to_xml, tags_to_xml,
};
use conveyor_interchange::{
    Component, ComponentKind, ComponentRef, Element, InterchangeError, Version,
};
use conveyor_storage::{ComponentStore, PushRequest, PushResponse, StoreError};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::adapter::VersionAdapter;
use crate::identity::{IdMap, IdentityAction, IdentityResolver};
use crate::satellites::{
    reconcile_dependencies, reconcile_groups, reconcile_libraries, reconcile_pruning,
    reconcile_tags, MigratedLeaf, Reconciliation,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationOptions {
    /// Also migrate the templates the requested pipelines call.
    pub include_referenced_templates: bool,
}

/// One step of the batch, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum Event {
    #[serde(rename_all = "camelCase")]
    ContainerCreated {
        #[serde(rename = "type")]
        kind: ComponentKind,
        id: String,
        name: String,
    },
    #[serde(rename_all = "camelCase")]
    PipelineLinked {
        library_id: String,
        library_name: String,
        pipeline_id: String,
    },
    #[serde(rename_all = "camelCase")]
    LeafPushed {
        #[serde(rename = "type")]
        kind: ComponentKind,
        source_id: String,
        destination_id: String,
        name: String,
    },
    #[serde(rename_all = "camelCase")]
    LeafFailed {
        #[serde(rename = "type")]
        kind: ComponentKind,
        source_id: String,
        name: String,
        status: Option<u16>,
    },
    SatelliteApplied {
        #[serde(rename = "type")]
        kind: ComponentKind,
    },
    SatelliteUnchanged {
        #[serde(rename = "type")]
        kind: ComponentKind,
    },
    SatelliteFailed {
        #[serde(rename = "type")]
        kind: ComponentKind,
    },
}

impl Event {
    pub fn created(kind: ComponentKind, id: &str, name: &str) -> Self {
        Event::ContainerCreated {
            kind,
            id: id.to_string(),
            name: name.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LeafStatus {
    Migrated,
    Failed,
}

/// Terminal state of one leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeafOutcome {
    #[serde(rename = "type")]
    pub kind: ComponentKind,
    pub source_id: String,
    pub destination_id: Option<String>,
    pub name: String,
    pub action: Option<IdentityAction>,
    pub status: LeafStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<PushResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LeafOutcome {
    fn unresolved(reference: &ComponentRef, error: impl Into<String>) -> Self {
        LeafOutcome {
            kind: reference.kind,
            source_id: reference.id.clone(),
            destination_id: None,
            name: reference.name.clone(),
            action: None,
            status: LeafStatus::Failed,
            response: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SatelliteStatus {
    Applied,
    Unchanged,
    Failed,
}

/// Terminal state of one satellite step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SatelliteOutcome {
    #[serde(rename = "type")]
    pub kind: ComponentKind,
    pub status: SatelliteStatus,
    /// The library pass run before the pipelines are pushed.
    pub bootstrap: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<PushResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub success: Vec<LeafOutcome>,
    pub failure: Vec<LeafOutcome>,
    pub satellites: Vec<SatelliteOutcome>,
    pub events: Vec<Event>,
    /// `sourceId:destinationId` for every leaf stored under another id.
    pub remaps: Vec<String>,
}

impl MigrationReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_empty()
            && self
                .satellites
                .iter()
                .all(|s| s.status != SatelliteStatus::Failed)
    }
}

/// Templates reached by the calls of `pipeline_ids`, transitively.
pub fn referenced_templates<'a>(
    snapshot: &Snapshot,
    pipeline_ids: impl IntoIterator<Item = &'a str>,
) -> Vec<ComponentRef> {
    let mut ids = BTreeSet::new();
    for id in pipeline_ids {
        ids.extend(snapshot.index().pipeline_templates(id));
    }
    ids.into_iter()
        .filter_map(|id| snapshot.component(ComponentKind::ScriptTemplate, &id))
        .map(Component::to_ref)
        .collect()
}

/// Leaves named by `refs`, with groups, libraries and tags expanded to
/// their members and duplicates dropped. References that name nothing
/// migratable come back with the reason.
pub fn expand_refs<'s>(
    snapshot: &'s Snapshot,
    refs: &[ComponentRef],
) -> (Vec<&'s Component>, Vec<(ComponentRef, &'static str)>) {
    const NOT_FOUND: &str = "not found at the source";
    let mut leaves: Vec<&'s Component> = Vec::new();
    let mut unresolved = Vec::new();
    let add = |kind: ComponentKind, id: &str, leaves: &mut Vec<&'s Component>| {
        if let Some(c) = snapshot.component(kind, id) {
            if !leaves.iter().any(|l| l.kind == kind && l.id == c.id) {
                leaves.push(c);
            }
        }
    };

    for r in refs {
        let members: Option<(ComponentKind, &[String])> = match r.kind {
            ComponentKind::Pipeline | ComponentKind::ScriptTemplate => {
                if snapshot.component(r.kind, &r.id).is_none() {
                    unresolved.push((r.clone(), NOT_FOUND));
                }
                add(r.kind, &r.id, &mut leaves);
                continue;
            }
            ComponentKind::PipelineGroup => snapshot
                .groups()
                .iter()
                .find(|g| g.id == r.id)
                .map(|g| (ComponentKind::Pipeline, g.pipeline_ids.as_slice())),
            ComponentKind::ScriptLibrary => snapshot
                .library(&r.id)
                .map(|l| (ComponentKind::ScriptTemplate, l.template_ids.as_slice())),
            ComponentKind::PipelineTag => snapshot
                .tags()
                .iter()
                .find(|t| t.id == r.id)
                .map(|t| (ComponentKind::Pipeline, t.pipeline_ids.as_slice())),
            ComponentKind::PipelinePruningSetting | ComponentKind::InterPipelineDependency => {
                unresolved.push((r.clone(), "migrated along with its pipelines, not on its own"));
                continue;
            }
        };
        match members {
            Some((kind, ids)) => {
                for id in ids {
                    add(kind, id, &mut leaves);
                }
            }
            None => unresolved.push((r.clone(), NOT_FOUND)),
        }
    }
    (leaves, unresolved)
}

#[derive(Default)]
struct Batch<'s> {
    templates: Vec<&'s Component>,
    pipelines: Vec<&'s Component>,
}

impl<'s> Batch<'s> {
    fn add(&mut self, component: &'s Component) {
        let leaves = match component.kind {
            ComponentKind::ScriptTemplate => &mut self.templates,
            _ => &mut self.pipelines,
        };
        if !leaves.iter().any(|c| c.id == component.id) {
            leaves.push(component);
        }
    }
}

/// Satellite step failure: the fetch, the payload or the push.
#[derive(Debug, thiserror::Error)]
enum StepError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Payload(#[from] InterchangeError),
}

pub struct MigrationOrchestrator<'a> {
    source: &'a Snapshot,
    destination: &'a Snapshot,
    store: &'a dyn ComponentStore,
    options: MigrationOptions,
    adapter: VersionAdapter,
}

impl<'a> MigrationOrchestrator<'a> {
    pub fn new(
        source: &'a Snapshot,
        destination: &'a Snapshot,
        store: &'a dyn ComponentStore,
        options: MigrationOptions,
    ) -> Self {
        MigrationOrchestrator {
            source,
            destination,
            store,
            options,
            adapter: VersionAdapter,
        }
    }

    pub fn run(&self, refs: &[ComponentRef]) -> MigrationReport {
        let mut report = MigrationReport::default();
        let batch = self.partition(refs, &mut report);

        let mut resolver = IdentityResolver::new(self.destination);
        let mut ids = IdMap::default();
        for c in batch.templates.iter().chain(&batch.pipelines) {
            ids.insert(resolver.resolve(c.kind, &c.id, &c.name));
        }
        info!(
            templates = batch.templates.len(),
            pipelines = batch.pipelines.len(),
            "migration started"
        );

        let templates = self.push_leaves(&batch.templates, &ids, &mut report);

        let pending: Vec<MigratedLeaf> = batch
            .pipelines
            .iter()
            .filter_map(|c| migrated_leaf(c, &ids))
            .collect();
        let version = self.destination.version().map(|v| v.to_string());
        if !pending.is_empty() {
            let bootstrap = Reconciliation {
                source: self.source,
                destination: self.destination,
                templates: &templates,
                pipelines: &pending,
                failed_pipelines: &[],
                version: version.as_deref(),
            };
            let outcome = self.library_step(&bootstrap, &mut resolver, &mut report.events, true);
            report.satellites.push(outcome);
        }

        let pipelines = self.push_leaves(&batch.pipelines, &ids, &mut report);
        let failed: Vec<String> = pending
            .iter()
            .filter(|p| !pipelines.iter().any(|m| m.source_id == p.source_id))
            .map(|p| p.destination_id.clone())
            .collect();

        let ctx = Reconciliation {
            source: self.source,
            destination: self.destination,
            templates: &templates,
            pipelines: &pipelines,
            failed_pipelines: &failed,
            version: version.as_deref(),
        };
        self.reconcile_satellites(&ctx, &mut resolver, &mut report);

        report.remaps = ids.pairs();
        info!(
            migrated = report.success.len(),
            failed = report.failure.len(),
            "migration finished"
        );
        report
    }

    fn partition(&self, refs: &[ComponentRef], report: &mut MigrationReport) -> Batch<'a> {
        let source = self.source;
        let (leaves, unresolved) = expand_refs(source, refs);
        for (reference, reason) in unresolved {
            report.failure.push(LeafOutcome::unresolved(&reference, reason));
        }
        let mut batch = Batch::default();
        for leaf in leaves {
            batch.add(leaf);
        }

        if self.options.include_referenced_templates {
            let pipeline_ids: Vec<&str> = batch.pipelines.iter().map(|p| p.id.as_str()).collect();
            for reference in referenced_templates(source, pipeline_ids) {
                if let Some(c) = source.component(ComponentKind::ScriptTemplate, &reference.id) {
                    batch.add(c);
                }
            }
        }
        batch
    }

    /// The payload as it will be written: destination ids in place, then
    /// converted to the destination schema.
    fn prepare(&self, component: &Component, ids: &IdMap, destination_id: &str) -> Element {
        let mut element = component.element.clone();
        element.ensure_child("id").set_text(destination_id);
        if component.kind == ComponentKind::Pipeline {
            for list in ["exportData/dependentIds", "exportData/dependencyIds"] {
                if let Some(list) = element.find_mut(list) {
                    for entry in list.elements_mut() {
                        let mapped = ids
                            .destination_id(ComponentKind::Pipeline, entry.text().trim())
                            .map(str::to_string);
                        if let Some(mapped) = mapped {
                            entry.set_text(mapped);
                        }
                    }
                }
            }
        }

        let from = component
            .version
            .as_deref()
            .and_then(|v| v.parse::<Version>().ok())
            .or(self.source.version());
        match (from, self.destination.version()) {
            (Some(from), Some(to)) => self.adapter.convert(&element, component.kind, from, to),
            _ => element,
        }
    }

    fn push_leaves(
        &self,
        components: &[&Component],
        ids: &IdMap,
        report: &mut MigrationReport,
    ) -> Vec<MigratedLeaf> {
        let mut migrated = Vec::new();
        for component in components {
            let Some(remap) = ids.get(component.kind, &component.id) else {
                continue;
            };
            let content = self
                .prepare(component, ids, &remap.destination_id)
                .to_xml();
            let request = PushRequest::leaf(component.kind, remap.destination_id.clone(), content);

            let mut outcome = LeafOutcome {
                kind: component.kind,
                source_id: component.id.clone(),
                destination_id: Some(remap.destination_id.clone()),
                name: component.name.clone(),
                action: Some(remap.action),
                status: LeafStatus::Failed,
                response: None,
                error: None,
            };
            match self.store.put(&request) {
                Ok(response) if response.success => {
                    info!(
                        kind = %component.kind,
                        name = %component.name,
                        id = %remap.destination_id,
                        "component pushed"
                    );
                    report.events.push(Event::LeafPushed {
                        kind: component.kind,
                        source_id: component.id.clone(),
                        destination_id: remap.destination_id.clone(),
                        name: component.name.clone(),
                    });
                    outcome.status = LeafStatus::Migrated;
                    outcome.response = Some(response);
                    report.success.push(outcome);
                    if let Some(leaf) = migrated_leaf(component, ids) {
                        migrated.push(leaf);
                    }
                }
                Ok(response) => {
                    warn!(
                        kind = %component.kind,
                        name = %component.name,
                        status = response.status,
                        "component rejected"
                    );
                    report.events.push(Event::LeafFailed {
                        kind: component.kind,
                        source_id: component.id.clone(),
                        name: component.name.clone(),
                        status: Some(response.status),
                    });
                    outcome.response = Some(response);
                    report.failure.push(outcome);
                }
                Err(e) => {
                    warn!(kind = %component.kind, name = %component.name, error = %e, "push failed");
                    report.events.push(Event::LeafFailed {
                        kind: component.kind,
                        source_id: component.id.clone(),
                        name: component.name.clone(),
                        status: None,
                    });
                    outcome.error = Some(e.to_string());
                    report.failure.push(outcome);
                }
            }
        }
        migrated
    }

    fn reconcile_satellites(
        &self,
        ctx: &Reconciliation<'_>,
        resolver: &mut IdentityResolver,
        report: &mut MigrationReport,
    ) {
        let events = &mut report.events;
        let mut outcomes = Vec::with_capacity(5);

        outcomes.push(self.step(ComponentKind::PipelineGroup, events, |raw, events| {
            let mut groups = parse_groups(raw)?;
            observe(resolver, ComponentKind::PipelineGroup, groups.iter().map(|g| (&g.id, &g.name)));
            let before = groups.clone();
            reconcile_groups(ctx, resolver, &mut groups, events);
            Ok((groups != before).then(|| groups_to_xml(&groups)))
        }));
        outcomes.push(self.library_step(ctx, resolver, events, false));
        outcomes.push(self.step(ComponentKind::PipelineTag, events, |raw, events| {
            let mut tags = parse_tags(raw)?;
            observe(resolver, ComponentKind::PipelineTag, tags.iter().map(|t| (&t.id, &t.name)));
            let before = tags.clone();
            reconcile_tags(ctx, resolver, &mut tags, events);
            Ok((tags != before).then(|| tags_to_xml(&tags)))
        }));
        outcomes.push(self.step(ComponentKind::PipelinePruningSetting, events, |raw, _| {
            let mut entries = parse_pruning(raw)?;
            let before = entries.clone();
            reconcile_pruning(ctx, &mut entries);
            Ok((entries != before).then(|| pruning_to_xml(&entries)))
        }));
        outcomes.push(self.step(ComponentKind::InterPipelineDependency, events, |raw, _| {
            let mut dependencies = parse_dependencies(raw)?;
            let before: BTreeSet<_> = dependencies.iter().cloned().collect();
            reconcile_dependencies(ctx, &mut dependencies);
            let after: BTreeSet<_> = dependencies.iter().cloned().collect();
            Ok((after != before).then(|| dependencies_to_xml(&dependencies)))
        }));

        report.satellites.extend(outcomes);
    }

    fn library_step(
        &self,
        ctx: &Reconciliation<'_>,
        resolver: &mut IdentityResolver,
        events: &mut Vec<Event>,
        bootstrap: bool,
    ) -> SatelliteOutcome {
        let mut outcome = self.step(ComponentKind::ScriptLibrary, events, |raw, events| {
            let mut libraries = parse_libraries(raw)?;
            observe(
                resolver,
                ComponentKind::ScriptLibrary,
                libraries.iter().map(|l| (&l.id, &l.name)),
            );
            let before = libraries.clone();
            reconcile_libraries(ctx, resolver, &mut libraries, events);
            Ok((libraries != before).then(|| libraries_to_xml(&libraries)))
        });
        outcome.bootstrap = bootstrap;
        outcome
    }

    /// Fetch the destination collection, let `reconcile` rewrite it, and
    /// push the result unless it came back unchanged (`None`).
    fn step<F>(&self, kind: ComponentKind, events: &mut Vec<Event>, reconcile: F) -> SatelliteOutcome
    where
        F: FnOnce(&str, &mut Vec<Event>) -> Result<Option<String>, InterchangeError>,
    {
        let mut outcome = SatelliteOutcome {
            kind,
            status: SatelliteStatus::Failed,
            bootstrap: false,
            response: None,
            error: None,
        };
        match self.fetch_reconcile_push(kind, events, reconcile) {
            Ok(None) => {
                outcome.status = SatelliteStatus::Unchanged;
                events.push(Event::SatelliteUnchanged { kind });
            }
            Ok(Some(response)) if response.success => {
                info!(kind = %kind, "satellite applied");
                outcome.status = SatelliteStatus::Applied;
                outcome.response = Some(response);
                events.push(Event::SatelliteApplied { kind });
            }
            Ok(Some(response)) => {
                warn!(kind = %kind, status = response.status, "satellite rejected");
                outcome.response = Some(response);
                events.push(Event::SatelliteFailed { kind });
            }
            Err(e) => {
                warn!(kind = %kind, error = %e, "satellite step failed");
                outcome.error = Some(e.to_string());
                events.push(Event::SatelliteFailed { kind });
            }
        }
        outcome
    }

    fn fetch_reconcile_push<F>(
        &self,
        kind: ComponentKind,
        events: &mut Vec<Event>,
        reconcile: F,
    ) -> Result<Option<PushResponse>, StepError>
    where
        F: FnOnce(&str, &mut Vec<Event>) -> Result<Option<String>, InterchangeError>,
    {
        let raw = self.store.fetch_all(kind)?;
        let Some(content) = reconcile(&raw, events)? else {
            return Ok(None);
        };
        Ok(Some(self.store.put(&PushRequest::collection(kind, content))?))
    }
}

fn migrated_leaf(component: &Component, ids: &IdMap) -> Option<MigratedLeaf> {
    let remap = ids.get(component.kind, &component.id)?;
    Some(MigratedLeaf {
        kind: component.kind,
        source_id: component.id.clone(),
        destination_id: remap.destination_id.clone(),
        name: component.name.clone(),
    })
}

fn observe<'n>(
    resolver: &mut IdentityResolver,
    kind: ComponentKind,
    containers: impl Iterator<Item = (&'n String, &'n String)>,
) {
    for (id, name) in containers {
        resolver.observe(kind, id, name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::{ScriptAnalyzer, SnapshotParts};
    use conveyor_storage::MemoryStore;

    fn leaf(kind: ComponentKind, id: &str, name: &str, script: &str) -> Component {
        let mut el = Element::new(kind.element_name());
        el.push(Element::with_text("id", id));
        el.push(Element::with_text("name", name));
        el.push(Element::with_text("code", script));
        Component::from_element(kind, el).unwrap()
    }

    fn source() -> Snapshot {
        let parts = SnapshotParts {
            version: Some(Version::new(3, 9, 1)),
            pipelines: vec![
                leaf(ComponentKind::Pipeline, "p1", "A", "helper();"),
                leaf(ComponentKind::Pipeline, "p2", "B", ""),
            ],
            templates: vec![
                leaf(ComponentKind::ScriptTemplate, "t1", "Helpers", "function helper() { deep(); }"),
                leaf(ComponentKind::ScriptTemplate, "t2", "Deep", "function deep() {}"),
                leaf(ComponentKind::ScriptTemplate, "t3", "Unused", "function unused() {}"),
            ],
            libraries: parse_libraries(
                "<list><codeTemplateLibrary><id>lib</id><name>L</name>\
                 <codeTemplates><codeTemplate><id>t1</id></codeTemplate>\
                 <codeTemplate><id>t3</id></codeTemplate></codeTemplates>\
                 </codeTemplateLibrary></list>",
            )
            .unwrap(),
            groups: parse_groups(
                "<list><channelGroup><id>g1</id><name>G</name><channels>\
                 <channel><id>p1</id></channel><channel><id>p2</id></channel>\
                 </channels></channelGroup></list>",
            )
            .unwrap(),
            ..SnapshotParts::default()
        };
        Snapshot::build(parts, &ScriptAnalyzer::default()).unwrap()
    }

    fn ids(leaves: &[&Component]) -> Vec<String> {
        leaves.iter().map(|c| c.id.clone()).collect()
    }

    #[test]
    fn containers_expand_to_members_once() {
        let snapshot = source();
        let (leaves, unresolved) = expand_refs(
            &snapshot,
            &[
                ComponentRef::new(ComponentKind::Pipeline, "p2"),
                ComponentRef::new(ComponentKind::PipelineGroup, "g1"),
                ComponentRef::new(ComponentKind::ScriptLibrary, "lib"),
                ComponentRef::new(ComponentKind::PipelineGroup, "nope"),
                ComponentRef::new(ComponentKind::InterPipelineDependency, "d"),
            ],
        );
        assert_eq!(ids(&leaves), vec!["p2", "p1", "t1", "t3"]);
        let reasons: Vec<(&str, &str)> = unresolved.iter().map(|(r, why)| (r.id.as_str(), *why)).collect();
        assert_eq!(
            reasons,
            vec![
                ("nope", "not found at the source"),
                ("d", "migrated along with its pipelines, not on its own"),
            ]
        );
    }

    #[test]
    fn referenced_templates_follow_calls_transitively() {
        let snapshot = source();
        let refs = referenced_templates(&snapshot, ["p1"]);
        let names: Vec<&str> = refs.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Helpers", "Deep"]);
        assert!(referenced_templates(&snapshot, ["p2"]).is_empty());
    }

    #[test]
    fn rejected_template_is_recorded_and_batch_continues() {
        let snapshot = source();
        let destination =
            Snapshot::build(SnapshotParts::default(), &ScriptAnalyzer::default()).unwrap();
        let store = MemoryStore::new("destination", Version::new(3, 9, 1));
        store.reject(ComponentKind::ScriptTemplate, Some("t2"));

        let report = MigrationOrchestrator::new(
            &snapshot,
            &destination,
            &store,
            MigrationOptions::default(),
        )
        .run(&[
            ComponentRef::new(ComponentKind::ScriptTemplate, "t2"),
            ComponentRef::new(ComponentKind::ScriptTemplate, "t3"),
        ]);

        assert_eq!(report.failure.len(), 1);
        assert_eq!(report.failure[0].source_id, "t2");
        assert_eq!(report.success.len(), 1);
        assert_eq!(report.success[0].action, Some(IdentityAction::Create));
        assert!(!report.is_success());

        let json = serde_json::to_value(&report.events[0]).unwrap();
        assert_eq!(json["event"], "leafFailed");
        assert_eq!(json["type"], "codeTemplate");
        assert_eq!(json["sourceId"], "t2");
    }
}
