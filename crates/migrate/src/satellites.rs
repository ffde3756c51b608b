//! Satellite reconciliation.
//!
//! Satellites (groups, libraries, tags, pruning metadata, dependencies)
//! are replaced as whole collections. Each step starts from the freshly
//! fetched destination collection, drops the references it holds to the
//! leaves of the batch, and re-inserts the source references under their
//! destination ids. Memberships of components outside the batch are left
//! where they are, and an entry that is removed and re-added keeps its
//! position, so a batch that changes nothing yields an identical
//! collection.
//!
//! Containers the destination lacks are created under an id chosen by the
//! [`IdentityResolver`].

use std::collections::{BTreeMap, HashMap, HashSet};

use conveyor_core::Snapshot;
use conveyor_interchange::{
    ComponentKind, Dependency, Element, Group, Library, Node, PruningEntry, Tag,
};
use tracing::{debug, info};

use crate::identity::IdentityResolver;
use crate::orchestrator::Event;

/// A leaf of the batch and the destination id it was written under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigratedLeaf {
    pub kind: ComponentKind,
    pub source_id: String,
    pub destination_id: String,
    pub name: String,
}

/// Everything a satellite step reads.
pub struct Reconciliation<'a> {
    pub source: &'a Snapshot,
    /// Destination as it was before the batch.
    pub destination: &'a Snapshot,
    /// Templates written successfully.
    pub templates: &'a [MigratedLeaf],
    /// Pipelines written successfully (or about to be, during the library
    /// bootstrap).
    pub pipelines: &'a [MigratedLeaf],
    /// Destination ids of pipelines whose push failed. Library links made
    /// for them during the bootstrap are rolled back to what the
    /// destination had before the batch.
    pub failed_pipelines: &'a [String],
    /// Version attribute for newly created containers.
    pub version: Option<&'a str>,
}

impl Reconciliation<'_> {
    fn migrating_pipelines(&self) -> HashSet<String> {
        self.pipelines
            .iter()
            .map(|p| p.destination_id.clone())
            .collect()
    }

    fn migrated_template(&self, source_id: &str) -> Option<&MigratedLeaf> {
        self.templates.iter().find(|t| t.source_id == source_id)
    }
}

/// Drop migrating ids that are not wanted here, then append the wanted ids
/// that are missing. Kept ids stay where they were.
fn merge(ids: &mut Vec<String>, migrating: &HashSet<String>, wanted: Option<&Vec<String>>) {
    let wanted: &[String] = wanted.map(Vec::as_slice).unwrap_or(&[]);
    ids.retain(|id| !migrating.contains(id) || wanted.contains(id));
    for id in wanted {
        if !ids.contains(id) {
            ids.push(id.clone());
        }
    }
}

fn want(map: &mut BTreeMap<usize, Vec<String>>, at: usize, id: &str) {
    let ids = map.entry(at).or_default();
    if !ids.iter().any(|i| i == id) {
        ids.push(id.to_string());
    }
}

// ── Groups ───────────────────────────────────────────────────────────

pub fn reconcile_groups(
    ctx: &Reconciliation<'_>,
    resolver: &mut IdentityResolver,
    groups: &mut Vec<Group>,
    events: &mut Vec<Event>,
) {
    let mut wanted: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    for p in ctx.pipelines {
        let Some(source_group) = ctx
            .source
            .groups()
            .iter()
            .find(|g| g.pipeline_ids.contains(&p.source_id))
        else {
            continue;
        };
        let at = match groups.iter().position(|g| g.name == source_group.name) {
            Some(at) => at,
            None => {
                let remap =
                    resolver.resolve(ComponentKind::PipelineGroup, &source_group.id, &source_group.name);
                let mut group = Group::new(&remap.destination_id, &source_group.name, ctx.version);
                group.description = source_group.description.clone();
                events.push(Event::created(ComponentKind::PipelineGroup, &group.id, &group.name));
                info!(group = %group.name, id = %group.id, "creating pipeline group");
                groups.push(group);
                groups.len() - 1
            }
        };
        want(&mut wanted, at, &p.destination_id);
    }

    let migrating = ctx.migrating_pipelines();
    for (at, group) in groups.iter_mut().enumerate() {
        merge(&mut group.pipeline_ids, &migrating, wanted.get(&at));
    }
}

// ── Libraries ────────────────────────────────────────────────────────

fn ensure_library(
    ctx: &Reconciliation<'_>,
    resolver: &mut IdentityResolver,
    libraries: &mut Vec<Library>,
    source_library: &Library,
    events: &mut Vec<Event>,
) -> usize {
    if let Some(at) = libraries.iter().position(|l| l.name == source_library.name) {
        return at;
    }
    let remap = resolver.resolve(
        ComponentKind::ScriptLibrary,
        &source_library.id,
        &source_library.name,
    );
    let mut library = Library::new(&remap.destination_id, &source_library.name, ctx.version);
    library.description = source_library.description.clone();
    library.include_new_channels = source_library.include_new_channels;
    events.push(Event::created(ComponentKind::ScriptLibrary, &library.id, &library.name));
    info!(library = %library.name, id = %library.id, "creating script library");
    libraries.push(library);
    libraries.len() - 1
}

/// Libraries a migrated pipeline must be enabled in: the ones enabling it
/// at the source, plus the owner of every template it reaches. A template
/// of the batch brings its source library along; any other template is
/// looked up by name at the destination.
fn required_libraries(
    ctx: &Reconciliation<'_>,
    resolver: &mut IdentityResolver,
    libraries: &mut Vec<Library>,
    pipeline: &MigratedLeaf,
    events: &mut Vec<Event>,
) -> Vec<usize> {
    let source_index = ctx.source.index();
    let mut needed: Vec<&Library> = ctx
        .source
        .libraries()
        .iter()
        .filter(|l| l.is_enabled_for(&pipeline.source_id))
        .collect();
    let mut existing: Vec<String> = Vec::new();

    for template_id in source_index.pipeline_templates(&pipeline.source_id) {
        if ctx.migrated_template(&template_id).is_some() {
            if let Some(library) = source_index
                .template_library(&template_id)
                .and_then(|id| ctx.source.library(id))
            {
                needed.push(library);
            }
            continue;
        }
        let Some(name) = ctx.source.name_of(ComponentKind::ScriptTemplate, &template_id) else {
            continue;
        };
        let owner = ctx
            .destination
            .component_by_name(ComponentKind::ScriptTemplate, name)
            .and_then(|t| ctx.destination.index().template_library(&t.id));
        match owner {
            Some(library_id) => existing.push(library_id.to_string()),
            None => debug!(
                pipeline = %pipeline.name,
                template = name,
                "referenced template has no library at the destination"
            ),
        }
    }

    let mut positions = Vec::new();
    for library in needed {
        let at = ensure_library(ctx, resolver, libraries, library, events);
        if !positions.contains(&at) {
            positions.push(at);
        }
    }
    for id in existing {
        if let Some(at) = libraries.iter().position(|l| l.id == id) {
            if !positions.contains(&at) {
                positions.push(at);
            }
        }
    }
    positions
}

pub fn reconcile_libraries(
    ctx: &Reconciliation<'_>,
    resolver: &mut IdentityResolver,
    libraries: &mut Vec<Library>,
    events: &mut Vec<Event>,
) {
    let linked_before: HashMap<String, Vec<String>> = libraries
        .iter()
        .map(|l| (l.id.clone(), l.enabled_pipeline_ids.clone()))
        .collect();

    let mut templates: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    let mut enabled: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    let mut disabled: BTreeMap<usize, Vec<String>> = BTreeMap::new();

    for t in ctx.templates {
        let Some(source_library) = ctx
            .source
            .index()
            .template_library(&t.source_id)
            .and_then(|id| ctx.source.library(id))
        else {
            continue;
        };
        let at = ensure_library(ctx, resolver, libraries, source_library, events);
        want(&mut templates, at, &t.destination_id);
    }

    for p in ctx.pipelines {
        for at in required_libraries(ctx, resolver, libraries, p, events) {
            want(&mut enabled, at, &p.destination_id);
        }
        for source_library in ctx
            .source
            .libraries()
            .iter()
            .filter(|l| l.disabled_pipeline_ids.contains(&p.source_id))
        {
            if let Some(at) = libraries.iter().position(|l| l.name == source_library.name) {
                if !enabled.get(&at).is_some_and(|ids| ids.contains(&p.destination_id)) {
                    want(&mut disabled, at, &p.destination_id);
                }
            }
        }
    }

    // failed pipelines get their previous links back
    for id in ctx.failed_pipelines {
        for before in ctx.destination.libraries() {
            let Some(at) = libraries.iter().position(|l| l.id == before.id) else {
                continue;
            };
            if before.enabled_pipeline_ids.contains(id) {
                want(&mut enabled, at, id);
            }
            if before.disabled_pipeline_ids.contains(id) {
                want(&mut disabled, at, id);
            }
        }
    }

    let migrating_templates: HashSet<String> =
        ctx.templates.iter().map(|t| t.destination_id.clone()).collect();
    let mut migrating_pipelines = ctx.migrating_pipelines();
    migrating_pipelines.extend(ctx.failed_pipelines.iter().cloned());

    for (at, library) in libraries.iter_mut().enumerate() {
        merge(&mut library.template_ids, &migrating_templates, templates.get(&at));
        merge(&mut library.enabled_pipeline_ids, &migrating_pipelines, enabled.get(&at));
        merge(&mut library.disabled_pipeline_ids, &migrating_pipelines, disabled.get(&at));
    }

    for (at, ids) in &enabled {
        let library = &libraries[*at];
        for id in ids {
            let was_linked = linked_before
                .get(&library.id)
                .is_some_and(|before| before.contains(id));
            if !was_linked && !ctx.failed_pipelines.contains(id) {
                events.push(Event::PipelineLinked {
                    library_id: library.id.clone(),
                    library_name: library.name.clone(),
                    pipeline_id: id.clone(),
                });
            }
        }
    }
}

// ── Tags ─────────────────────────────────────────────────────────────

pub fn reconcile_tags(
    ctx: &Reconciliation<'_>,
    resolver: &mut IdentityResolver,
    tags: &mut Vec<Tag>,
    events: &mut Vec<Event>,
) {
    let mut wanted: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    for p in ctx.pipelines {
        for source_tag in ctx
            .source
            .tags()
            .iter()
            .filter(|t| t.pipeline_ids.contains(&p.source_id))
        {
            let at = match tags.iter().position(|t| t.name == source_tag.name) {
                Some(at) => at,
                None => {
                    let remap =
                        resolver.resolve(ComponentKind::PipelineTag, &source_tag.id, &source_tag.name);
                    let tag = Tag::derived_from(source_tag, &remap.destination_id);
                    events.push(Event::created(ComponentKind::PipelineTag, &tag.id, &tag.name));
                    info!(tag = %tag.name, id = %tag.id, "creating pipeline tag");
                    tags.push(tag);
                    tags.len() - 1
                }
            };
            want(&mut wanted, at, &p.destination_id);
        }
    }

    let migrating = ctx.migrating_pipelines();
    for (at, tag) in tags.iter_mut().enumerate() {
        merge(&mut tag.pipeline_ids, &migrating, wanted.get(&at));
    }
}

// ── Pruning settings ─────────────────────────────────────────────────

/// Replace (or append) the child of `parent` named like `child`.
fn replace_child(parent: &mut Element, child: Element) {
    let slot = parent
        .children
        .iter_mut()
        .find(|n| matches!(n, Node::Element(e) if e.name == child.name));
    match slot {
        Some(node) => *node = Node::Element(child),
        None => parent.push(child),
    }
}

pub fn reconcile_pruning(ctx: &Reconciliation<'_>, entries: &mut Vec<PruningEntry>) {
    for p in ctx.pipelines {
        let Some(source) = ctx
            .source
            .pruning()
            .iter()
            .find(|e| e.pipeline_id == p.source_id)
        else {
            continue;
        };
        match entries.iter_mut().find(|e| e.pipeline_id == p.destination_id) {
            Some(entry) => {
                if let Some(settings) = source.pruning_settings() {
                    replace_child(&mut entry.metadata, settings.clone());
                }
            }
            None => entries.push(PruningEntry {
                pipeline_id: p.destination_id.clone(),
                metadata: source.metadata.clone(),
            }),
        }
    }
}

// ── Dependencies ─────────────────────────────────────────────────────

/// Pairs touching a migrated pipeline are rebuilt from the source. The
/// other side of a pair is mapped through the batch or, failing that, by
/// name at the destination; pairs with no counterpart are dropped.
pub fn reconcile_dependencies(ctx: &Reconciliation<'_>, dependencies: &mut Vec<Dependency>) {
    let migrating = ctx.migrating_pipelines();
    let batch: HashMap<&str, &str> = ctx
        .pipelines
        .iter()
        .map(|p| (p.source_id.as_str(), p.destination_id.as_str()))
        .collect();
    let destination_id = |source_id: &str| -> Option<String> {
        if let Some(id) = batch.get(source_id) {
            return Some(id.to_string());
        }
        let name = ctx.source.name_of(ComponentKind::Pipeline, source_id)?;
        ctx.destination
            .component_by_name(ComponentKind::Pipeline, name)
            .map(|c| c.id.clone())
    };

    dependencies
        .retain(|d| !migrating.contains(&d.dependent_id) && !migrating.contains(&d.dependency_id));

    for d in ctx.source.dependencies() {
        if !batch.contains_key(d.dependent_id.as_str()) && !batch.contains_key(d.dependency_id.as_str())
        {
            continue;
        }
        let (Some(dependent_id), Some(dependency_id)) =
            (destination_id(&d.dependent_id), destination_id(&d.dependency_id))
        else {
            debug!(
                dependent = %d.dependent_id,
                dependency = %d.dependency_id,
                "dependency dropped, no destination counterpart"
            );
            continue;
        };
        let pair = Dependency {
            dependent_id,
            dependency_id,
        };
        if !dependencies.contains(&pair) {
            dependencies.push(pair);
        }
    }
}
