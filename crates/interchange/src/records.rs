//! Typed views of the satellite structures.
//!
//! Satellites are fetched and pushed as whole collections: a `<list>` of
//! libraries, a `<list>` of groups, a `<set>` of tags, a `<map>` of
//! per-pipeline metadata (pruning) and a `<set>` of dependency pairs.
//! Each view keeps the element it was read from so fields this crate does
//! not model survive a read-modify-write cycle untouched.

use serde::Serialize;

use crate::error::InterchangeError;
use crate::xml::{self, Element, Node};

/// Parse a collection payload and return its item elements.
///
/// An empty payload is an empty collection.
pub fn parse_collection(raw: &str) -> Result<Vec<Element>, InterchangeError> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    let root = xml::parse(raw)?;
    Ok(root.elements().cloned().collect())
}

/// Wrap items in a collection root (`list`, `set`, `map`).
pub fn collection_to_xml(root: &str, items: impl IntoIterator<Item = Element>) -> String {
    let mut el = Element::new(root);
    for item in items {
        el.push(item);
    }
    el.to_xml()
}

fn required_id(el: &Element, kind: &str) -> Result<String, InterchangeError> {
    el.child_text("id")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| InterchangeError::MissingElement {
            kind: kind.to_string(),
            element: "id".to_string(),
        })
}

fn string_list(el: Option<&Element>) -> Vec<String> {
    el.map(|list| {
        list.children_named("string")
            .map(|s| s.text().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

fn set_string_list(parent: &mut Element, name: &str, values: &[String]) {
    let list = parent.ensure_child(name);
    list.children.clear();
    for value in values {
        list.push(Element::with_text("string", value.clone()));
    }
}

fn fresh_container(element_name: &str, id: &str, name: &str, version: Option<&str>) -> Element {
    let mut el = Element::new(element_name);
    if let Some(v) = version {
        el.set_attr("version", v);
    }
    el.push(Element::with_text("id", id));
    el.push(Element::with_text("name", name));
    el.push(Element::with_text("revision", "1"));
    el.push(Element::new("description"));
    el
}

// ── Libraries ────────────────────────────────────────────────────────

/// A script library: ordered templates plus the pipelines it is enabled for.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Library {
    pub id: String,
    pub name: String,
    pub description: String,
    pub include_new_channels: bool,
    pub enabled_pipeline_ids: Vec<String>,
    pub disabled_pipeline_ids: Vec<String>,
    pub template_ids: Vec<String>,
    #[serde(skip)]
    element: Element,
}

impl Library {
    pub fn from_element(element: Element) -> Result<Self, InterchangeError> {
        let id = required_id(&element, "Code Template Library")?;
        let template_ids = element
            .child("codeTemplates")
            .map(|list| {
                list.children_named("codeTemplate")
                    .filter_map(|t| t.child_text("id"))
                    .map(|s| s.trim().to_string())
                    .collect()
            })
            .unwrap_or_default();
        Ok(Library {
            id,
            name: element.child_text("name").unwrap_or_default(),
            description: element.child_text("description").unwrap_or_default(),
            include_new_channels: element
                .child_text("includeNewChannels")
                .map(|v| v.trim() == "true")
                .unwrap_or(false),
            enabled_pipeline_ids: string_list(element.child("enabledChannelIds")),
            disabled_pipeline_ids: string_list(element.child("disabledChannelIds")),
            template_ids,
            element,
        })
    }

    /// A new, empty library.
    pub fn new(id: &str, name: &str, version: Option<&str>) -> Self {
        let mut element = fresh_container("codeTemplateLibrary", id, name, version);
        element.push(Element::with_text("includeNewChannels", "false"));
        Library {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            include_new_channels: false,
            enabled_pipeline_ids: Vec::new(),
            disabled_pipeline_ids: Vec::new(),
            template_ids: Vec::new(),
            element,
        }
    }

    pub fn version(&self) -> Option<&str> {
        self.element.attr("version")
    }

    /// Whether the library is switched on for a pipeline.
    pub fn is_enabled_for(&self, pipeline_id: &str) -> bool {
        if self.disabled_pipeline_ids.iter().any(|p| p == pipeline_id) {
            return false;
        }
        self.enabled_pipeline_ids.iter().any(|p| p == pipeline_id)
    }

    pub fn to_element(&self) -> Element {
        let mut el = self.element.clone();
        el.ensure_child("id").set_text(self.id.clone());
        el.ensure_child("name").set_text(self.name.clone());
        el.ensure_child("includeNewChannels")
            .set_text(self.include_new_channels.to_string());
        set_string_list(&mut el, "enabledChannelIds", &self.enabled_pipeline_ids);
        set_string_list(&mut el, "disabledChannelIds", &self.disabled_pipeline_ids);

        let version = el.attr("version").map(str::to_string);
        let previous: Vec<Element> = el
            .child("codeTemplates")
            .map(|l| l.children_named("codeTemplate").cloned().collect())
            .unwrap_or_default();
        let templates = el.ensure_child("codeTemplates");
        templates.children.clear();
        for id in &self.template_ids {
            let existing = previous
                .iter()
                .find(|t| t.child_text("id").as_deref().map(str::trim) == Some(id.as_str()));
            let stub = match existing {
                Some(t) => t.clone(),
                None => {
                    let mut t = Element::new("codeTemplate");
                    if let Some(v) = &version {
                        t.set_attr("version", v.clone());
                    }
                    t.push(Element::with_text("id", id.clone()));
                    t
                }
            };
            templates.push(stub);
        }
        el
    }
}

pub fn parse_libraries(raw: &str) -> Result<Vec<Library>, InterchangeError> {
    parse_collection(raw)?
        .into_iter()
        .map(Library::from_element)
        .collect()
}

pub fn libraries_to_xml(libraries: &[Library]) -> String {
    collection_to_xml("list", libraries.iter().map(Library::to_element))
}

// ── Groups ───────────────────────────────────────────────────────────

/// A pipeline group: an ordered set of pipeline ids.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub description: String,
    pub pipeline_ids: Vec<String>,
    #[serde(skip)]
    element: Element,
}

impl Group {
    pub fn from_element(element: Element) -> Result<Self, InterchangeError> {
        let id = required_id(&element, "Channel Group")?;
        let pipeline_ids = element
            .child("channels")
            .map(|list| {
                list.children_named("channel")
                    .filter_map(|c| c.child_text("id"))
                    .map(|s| s.trim().to_string())
                    .collect()
            })
            .unwrap_or_default();
        Ok(Group {
            id,
            name: element.child_text("name").unwrap_or_default(),
            description: element.child_text("description").unwrap_or_default(),
            pipeline_ids,
            element,
        })
    }

    pub fn new(id: &str, name: &str, version: Option<&str>) -> Self {
        Group {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            pipeline_ids: Vec::new(),
            element: fresh_container("channelGroup", id, name, version),
        }
    }

    pub fn to_element(&self) -> Element {
        let mut el = self.element.clone();
        el.ensure_child("id").set_text(self.id.clone());
        el.ensure_child("name").set_text(self.name.clone());
        let version = el.attr("version").map(str::to_string);
        let channels = el.ensure_child("channels");
        channels.children.clear();
        for id in &self.pipeline_ids {
            let mut c = Element::new("channel");
            if let Some(v) = &version {
                c.set_attr("version", v.clone());
            }
            c.push(Element::with_text("id", id.clone()));
            c.push(Element::with_text("revision", "0"));
            channels.push(c);
        }
        el
    }
}

pub fn parse_groups(raw: &str) -> Result<Vec<Group>, InterchangeError> {
    parse_collection(raw)?
        .into_iter()
        .map(Group::from_element)
        .collect()
}

pub fn groups_to_xml(groups: &[Group]) -> String {
    collection_to_xml("list", groups.iter().map(Group::to_element))
}

// ── Tags ─────────────────────────────────────────────────────────────

/// A pipeline tag and the pipelines carrying it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tag {
    pub id: String,
    pub name: String,
    pub pipeline_ids: Vec<String>,
    #[serde(skip)]
    element: Element,
}

impl Tag {
    pub fn from_element(element: Element) -> Result<Self, InterchangeError> {
        let id = required_id(&element, "Channel Tag")?;
        Ok(Tag {
            id,
            name: element.child_text("name").unwrap_or_default(),
            pipeline_ids: string_list(element.child("channelIds")),
            element,
        })
    }

    /// A copy of `template` (colour and all) under a new id, with no pipelines.
    pub fn derived_from(template: &Tag, id: &str) -> Self {
        Tag {
            id: id.to_string(),
            name: template.name.clone(),
            pipeline_ids: Vec::new(),
            element: template.element.clone(),
        }
    }

    pub fn to_element(&self) -> Element {
        let mut el = self.element.clone();
        el.ensure_child("id").set_text(self.id.clone());
        el.ensure_child("name").set_text(self.name.clone());
        set_string_list(&mut el, "channelIds", &self.pipeline_ids);
        el
    }
}

pub fn parse_tags(raw: &str) -> Result<Vec<Tag>, InterchangeError> {
    parse_collection(raw)?
        .into_iter()
        .map(Tag::from_element)
        .collect()
}

pub fn tags_to_xml(tags: &[Tag]) -> String {
    collection_to_xml("set", tags.iter().map(Tag::to_element))
}

// ── Pruning settings ─────────────────────────────────────────────────

/// Per-pipeline metadata entry holding the pruning settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PruningEntry {
    pub pipeline_id: String,
    pub metadata: Element,
}

impl PruningEntry {
    pub fn pruning_settings(&self) -> Option<&Element> {
        self.metadata.child("pruningSettings")
    }

    fn to_element(&self) -> Element {
        let mut entry = Element::new("entry");
        entry.push(Element::with_text("string", self.pipeline_id.clone()));
        entry.push(self.metadata.clone());
        entry
    }
}

pub fn parse_pruning(raw: &str) -> Result<Vec<PruningEntry>, InterchangeError> {
    let mut out = Vec::new();
    for entry in parse_collection(raw)? {
        let mut values = entry.elements();
        let key = values.next().map(|k| k.text().trim().to_string());
        let metadata = values.next().cloned();
        match (key, metadata) {
            (Some(pipeline_id), Some(metadata)) if !pipeline_id.is_empty() => {
                out.push(PruningEntry {
                    pipeline_id,
                    metadata,
                })
            }
            _ => {
                return Err(InterchangeError::MissingElement {
                    kind: "Pruning Setting".to_string(),
                    element: "entry key/value".to_string(),
                })
            }
        }
    }
    Ok(out)
}

pub fn pruning_to_xml(entries: &[PruningEntry]) -> String {
    collection_to_xml("map", entries.iter().map(PruningEntry::to_element))
}

// ── Dependencies ─────────────────────────────────────────────────────

/// `dependent` can only start once `dependency` is running.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Dependency {
    pub dependent_id: String,
    pub dependency_id: String,
}

pub fn parse_dependencies(raw: &str) -> Result<Vec<Dependency>, InterchangeError> {
    parse_collection(raw)?
        .into_iter()
        .map(|el| {
            let dependent_id = el.child_text("dependentId").map(|s| s.trim().to_string());
            let dependency_id = el.child_text("dependencyId").map(|s| s.trim().to_string());
            match (dependent_id, dependency_id) {
                (Some(dependent_id), Some(dependency_id)) => Ok(Dependency {
                    dependent_id,
                    dependency_id,
                }),
                _ => Err(InterchangeError::MissingElement {
                    kind: "Channel Dependency".to_string(),
                    element: "dependentId/dependencyId".to_string(),
                }),
            }
        })
        .collect()
}

pub fn dependencies_to_xml(dependencies: &[Dependency]) -> String {
    collection_to_xml(
        "set",
        dependencies.iter().map(|d| {
            let mut el = Element::new("channelDependency");
            el.push(Element::with_text("dependentId", d.dependent_id.clone()));
            el.push(Element::with_text("dependencyId", d.dependency_id.clone()));
            el
        }),
    )
}

/// Drop comment nodes from an element tree (used before comparing payloads).
pub fn strip_comments(el: &mut Element) {
    el.walk_mut(&mut |e| e.children.retain(|n| !matches!(n, Node::Comment(_))));
}
