//! Identity resolution between a source and a destination system.
//!
//! Ids are only meaningful on the system that issued them, so components
//! are matched across systems by name. For every component about to be
//! written the resolver decides which destination id it will live under.

use std::collections::{BTreeMap, HashMap, HashSet};

use conveyor_core::Snapshot;
use conveyor_interchange::ComponentKind;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum IdentityAction {
    /// Same name, same id on both sides.
    Unchanged,
    /// Same name under another id: the destination component is replaced.
    UpdateInPlace,
    /// Different name but the source id is taken: a new id is minted.
    FreshId,
    /// Neither name nor id exists at the destination.
    Create,
}

/// Where one source component ends up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Remap {
    #[serde(rename = "type")]
    pub kind: ComponentKind,
    pub source_id: String,
    pub destination_id: String,
    pub action: IdentityAction,
}

impl Remap {
    pub fn is_remapped(&self) -> bool {
        self.source_id != self.destination_id
    }

    /// `sourceId:destinationId` form.
    pub fn pair(&self) -> String {
        format!("{}:{}", self.source_id, self.destination_id)
    }
}

/// Resolved remaps of one batch, looked up by kind and source id.
#[derive(Debug, Clone, Default)]
pub struct IdMap {
    remaps: BTreeMap<(ComponentKind, String), Remap>,
}

impl IdMap {
    pub fn insert(&mut self, remap: Remap) {
        self.remaps
            .insert((remap.kind, remap.source_id.clone()), remap);
    }

    pub fn get(&self, kind: ComponentKind, source_id: &str) -> Option<&Remap> {
        self.remaps.get(&(kind, source_id.to_string()))
    }

    /// Destination id of a source component, if it is part of the batch.
    pub fn destination_id(&self, kind: ComponentKind, source_id: &str) -> Option<&str> {
        self.get(kind, source_id).map(|r| r.destination_id.as_str())
    }

    /// Pairs that actually change the id.
    pub fn pairs(&self) -> Vec<String> {
        self.remaps
            .values()
            .filter(|r| r.is_remapped())
            .map(Remap::pair)
            .collect()
    }
}

/// Decides destination ids by name lookup.
///
/// Seeded from a destination snapshot; containers discovered later (for
/// example libraries created earlier in the same batch) are registered
/// with [`observe`](Self::observe) so lookups stay current.
#[derive(Debug, Default)]
pub struct IdentityResolver {
    by_name: HashMap<ComponentKind, HashMap<String, String>>,
    ids: HashMap<ComponentKind, HashSet<String>>,
    /// Every id in use at the destination or minted in this batch.
    taken: HashSet<String>,
}

impl IdentityResolver {
    pub fn new(destination: &Snapshot) -> Self {
        let mut resolver = IdentityResolver::default();
        for kind in [ComponentKind::Pipeline, ComponentKind::ScriptTemplate] {
            for c in destination.leaves(kind) {
                resolver.observe(kind, &c.id, &c.name);
            }
        }
        for l in destination.libraries() {
            resolver.observe(ComponentKind::ScriptLibrary, &l.id, &l.name);
        }
        for g in destination.groups() {
            resolver.observe(ComponentKind::PipelineGroup, &g.id, &g.name);
        }
        for t in destination.tags() {
            resolver.observe(ComponentKind::PipelineTag, &t.id, &t.name);
        }
        resolver
    }

    /// Register a destination component. The first component seen under a
    /// name wins the name lookup.
    pub fn observe(&mut self, kind: ComponentKind, id: &str, name: &str) {
        self.by_name
            .entry(kind)
            .or_default()
            .entry(name.to_string())
            .or_insert_with(|| id.to_string());
        self.ids.entry(kind).or_default().insert(id.to_string());
        self.taken.insert(id.to_string());
    }

    /// Destination id registered under `name`.
    pub fn lookup(&self, kind: ComponentKind, name: &str) -> Option<&str> {
        self.by_name
            .get(&kind)
            .and_then(|m| m.get(name))
            .map(String::as_str)
    }

    pub fn resolve(&mut self, kind: ComponentKind, source_id: &str, name: &str) -> Remap {
        let existing = self.lookup(kind, name).map(str::to_string);
        let (destination_id, action) = match existing {
            Some(existing) if existing == source_id => (existing, IdentityAction::Unchanged),
            Some(existing) => (existing, IdentityAction::UpdateInPlace),
            None if self.id_in_use(kind, source_id) => (self.mint(), IdentityAction::FreshId),
            None => (source_id.to_string(), IdentityAction::Create),
        };
        // later components of the batch must see this one
        self.observe(kind, &destination_id, name);
        Remap {
            kind,
            source_id: source_id.to_string(),
            destination_id,
            action,
        }
    }

    fn id_in_use(&self, kind: ComponentKind, id: &str) -> bool {
        self.ids.get(&kind).is_some_and(|ids| ids.contains(id))
    }

    fn mint(&mut self) -> String {
        loop {
            let id = uuid::Uuid::new_v4().to_string();
            if self.taken.insert(id.clone()) {
                return id;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::{ScriptAnalyzer, SnapshotParts};
    use conveyor_interchange::xml::Element;
    use conveyor_interchange::Component;

    fn destination(pipelines: &[(&str, &str)]) -> Snapshot {
        let pipelines = pipelines
            .iter()
            .map(|(id, name)| {
                let mut el = Element::new("channel");
                el.push(Element::with_text("id", *id));
                el.push(Element::with_text("name", *name));
                Component::from_element(ComponentKind::Pipeline, el).unwrap()
            })
            .collect();
        let parts = SnapshotParts {
            pipelines,
            ..SnapshotParts::default()
        };
        Snapshot::build(parts, &ScriptAnalyzer::default()).unwrap()
    }

    #[test]
    fn same_name_same_id_is_kept() {
        let mut r = IdentityResolver::new(&destination(&[("p1", "ADT")]));
        let remap = r.resolve(ComponentKind::Pipeline, "p1", "ADT");
        assert_eq!(remap.action, IdentityAction::Unchanged);
        assert!(!remap.is_remapped());
    }

    #[test]
    fn same_name_other_id_updates_in_place() {
        let dest = destination(&[("d-9", "ADT")]);
        let mut r = IdentityResolver::new(&dest);
        let remap = r.resolve(ComponentKind::Pipeline, "s-1", "ADT");
        assert_eq!(remap.action, IdentityAction::UpdateInPlace);
        assert_eq!(remap.destination_id, "d-9");
        assert_eq!(remap.pair(), "s-1:d-9");
        // never duplicated: the destination still has exactly one ADT
        assert_eq!(dest.leaves(ComponentKind::Pipeline).len(), 1);
    }

    #[test]
    fn id_collision_mints_a_fresh_distinct_id() {
        let dest = destination(&[("shared", "Other"), ("x", "X")]);
        let mut r = IdentityResolver::new(&dest);
        let remap = r.resolve(ComponentKind::Pipeline, "shared", "ADT");
        assert_eq!(remap.action, IdentityAction::FreshId);
        assert!(!dest.ids(ComponentKind::Pipeline).contains(&remap.destination_id));
        assert_ne!(remap.destination_id, "shared");
    }

    #[test]
    fn unknown_component_is_created_under_its_own_id() {
        let mut r = IdentityResolver::new(&destination(&[]));
        let remap = r.resolve(ComponentKind::Pipeline, "p7", "New");
        assert_eq!(remap.action, IdentityAction::Create);
        assert_eq!(remap.destination_id, "p7");
        // a second component with the same name in the batch reuses it
        let again = r.resolve(ComponentKind::Pipeline, "p8", "New");
        assert_eq!(again.destination_id, "p7");
    }

    #[test]
    fn id_map_reports_only_changed_pairs() {
        let mut map = IdMap::default();
        map.insert(Remap {
            kind: ComponentKind::Pipeline,
            source_id: "a".into(),
            destination_id: "a".into(),
            action: IdentityAction::Create,
        });
        map.insert(Remap {
            kind: ComponentKind::Pipeline,
            source_id: "b".into(),
            destination_id: "c".into(),
            action: IdentityAction::UpdateInPlace,
        });
        assert_eq!(map.pairs(), vec!["b:c"]);
        assert_eq!(map.destination_id(ComponentKind::Pipeline, "a"), Some("a"));
    }
}
