//! Schema conversion between engine versions.
//!
//! Components are converted as parsed trees. The catalogue below lists
//! every structural change between supported versions, each as a pair of
//! forward/backward edits scoped to one component kind. Converting up
//! applies the forward edits of every delta in `(source, target]` in
//! ascending order; converting down applies the backward edits of every
//! delta in `(target, source]` in descending order. Every edit checks for
//! presence first, so applying it twice changes nothing.
//!
//! The catalogue is append-only: new deltas go at the end, ordered by
//! the version that introduced them.

use conveyor_interchange::xml::{Element, Node};
use conveyor_interchange::{ComponentKind, Version};
use tracing::debug;

const TEMPLATE_PROPERTIES_CLASS: &str = "com.mirth.connect.model.codetemplates.BasicCodeTemplateProperties";

/// One structural change introduced in `since`.
pub struct Delta {
    pub since: Version,
    pub kind: ComponentKind,
    pub summary: &'static str,
    forward: fn(&mut Element),
    backward: fn(&mut Element),
}

pub const CATALOGUE: &[Delta] = &[
    Delta {
        since: Version::new(3, 4, 0),
        kind: ComponentKind::Pipeline,
        summary: "export metadata container",
        forward: add_export_metadata,
        backward: strip_export_data,
    },
    Delta {
        since: Version::new(3, 5, 0),
        kind: ComponentKind::Pipeline,
        summary: "prune errored messages flag",
        forward: add_prune_errored,
        backward: strip_prune_errored,
    },
    Delta {
        since: Version::new(3, 7, 0),
        kind: ComponentKind::ScriptTemplate,
        summary: "template properties wrapper",
        forward: wrap_template_properties,
        backward: unwrap_template_properties,
    },
    Delta {
        since: Version::new(3, 9, 0),
        kind: ComponentKind::Pipeline,
        summary: "enabled flag on filter rules and transformer steps",
        forward: enable_rules_and_steps,
        backward: strip_rule_and_step_flags,
    },
    Delta {
        since: Version::new(3, 10, 0),
        kind: ComponentKind::Pipeline,
        summary: "export metadata user id",
        forward: add_metadata_user,
        backward: strip_metadata_user,
    },
    Delta {
        since: Version::new(3, 10, 0),
        kind: ComponentKind::Pipeline,
        summary: "encryption flags",
        forward: add_encryption_flags,
        backward: strip_encryption_flags,
    },
];

/// Converts component trees between engine versions.
#[derive(Debug, Clone, Copy, Default)]
pub struct VersionAdapter;

impl VersionAdapter {
    pub fn convert(
        &self,
        element: &Element,
        kind: ComponentKind,
        source: Version,
        target: Version,
    ) -> Element {
        let mut out = element.clone();
        if source < target {
            for delta in CATALOGUE
                .iter()
                .filter(|d| d.kind == kind && d.since > source && d.since <= target)
            {
                debug!(since = %delta.since, change = delta.summary, "forward delta");
                (delta.forward)(&mut out);
            }
        } else if source > target {
            for delta in CATALOGUE
                .iter()
                .rev()
                .filter(|d| d.kind == kind && d.since > target && d.since <= source)
            {
                debug!(since = %delta.since, change = delta.summary, "backward delta");
                (delta.backward)(&mut out);
            }
        }
        set_versions(&mut out, target);
        out
    }
}

/// Rewrite every `version` attribute in the tree.
fn set_versions(root: &mut Element, target: Version) {
    let version = target.to_string();
    root.walk_mut(&mut |e| {
        if e.attr("version").is_some() {
            e.set_attr("version", version.clone());
        }
    });
}

fn push_if_absent(parent: &mut Element, name: &str, value: &str) {
    if !parent.has_child(name) {
        parent.push(Element::with_text(name, value));
    }
}

// ── 3.4.0 ────────────────────────────────────────────────────────────

fn add_export_metadata(channel: &mut Element) {
    channel.ensure_path("exportData/metadata");
}

fn strip_export_data(channel: &mut Element) {
    channel.remove_children("exportData");
}

// ── 3.5.0 ────────────────────────────────────────────────────────────

fn add_prune_errored(channel: &mut Element) {
    let settings = channel.ensure_path("exportData/metadata/pruningSettings");
    push_if_absent(settings, "pruneErroredMessages", "false");
}

fn strip_prune_errored(channel: &mut Element) {
    let Some(metadata) = channel.find_mut("exportData/metadata") else {
        return;
    };
    let emptied = match metadata.child_mut("pruningSettings") {
        Some(settings) => {
            settings.remove_children("pruneErroredMessages");
            settings.elements().next().is_none() && settings.text().trim().is_empty()
        }
        None => false,
    };
    if emptied {
        metadata.remove_children("pruningSettings");
    }
}

// ── 3.7.0 ────────────────────────────────────────────────────────────

fn is_template_body(node: &Node) -> bool {
    matches!(node, Node::Element(e) if e.name == "type" || e.name == "code")
}

fn wrap_template_properties(template: &mut Element) {
    if template.has_child("properties") {
        return;
    }
    let Some(at) = template.children.iter().position(is_template_body) else {
        return;
    };
    let mut properties = Element::new("properties");
    properties.set_attr("class", TEMPLATE_PROPERTIES_CLASS);
    let mut rest = Vec::with_capacity(template.children.len());
    for node in template.children.drain(..) {
        if is_template_body(&node) {
            properties.children.push(node);
        } else {
            rest.push(node);
        }
    }
    rest.insert(at.min(rest.len()), Node::Element(properties));
    template.children = rest;
}

fn unwrap_template_properties(template: &mut Element) {
    let Some(at) = template
        .children
        .iter()
        .position(|n| matches!(n, Node::Element(e) if e.name == "properties"))
    else {
        return;
    };
    let Node::Element(properties) = template.children.remove(at) else {
        return;
    };
    let body: Vec<Node> = properties
        .children
        .into_iter()
        .filter(is_template_body)
        .collect();
    for (offset, node) in body.into_iter().enumerate() {
        template.children.insert(at + offset, node);
    }
}

// ── 3.9.0 ────────────────────────────────────────────────────────────

/// Filter rules and transformer steps, wherever a connector keeps them.
fn for_each_rule_and_step(channel: &mut Element, visit: fn(&mut Element)) {
    channel.walk_mut(&mut |e| {
        if e.name != "filter" && e.name != "transformer" {
            return;
        }
        for container in e.elements_mut() {
            if matches!(container.name.as_str(), "elements" | "rules" | "steps") {
                for item in container.elements_mut() {
                    visit(item);
                }
            }
        }
    });
}

fn enable_rules_and_steps(channel: &mut Element) {
    for_each_rule_and_step(channel, |item| push_if_absent(item, "enabled", "true"));
}

fn strip_rule_and_step_flags(channel: &mut Element) {
    for_each_rule_and_step(channel, |item| {
        item.remove_children("enabled");
    });
}

// ── 3.10.0 ───────────────────────────────────────────────────────────

fn add_metadata_user(channel: &mut Element) {
    if let Some(metadata) = channel.find_mut("exportData/metadata") {
        push_if_absent(metadata, "userId", "1");
    }
}

fn strip_metadata_user(channel: &mut Element) {
    if let Some(metadata) = channel.find_mut("exportData/metadata") {
        metadata.remove_children("userId");
    }
}

fn add_encryption_flags(channel: &mut Element) {
    if let Some(properties) = channel.child_mut("properties") {
        push_if_absent(properties, "encryptAttachments", "false");
        push_if_absent(properties, "encryptCustomMetaData", "false");
    }
}

fn strip_encryption_flags(channel: &mut Element) {
    if let Some(properties) = channel.child_mut("properties") {
        properties.remove_children("encryptAttachments");
        properties.remove_children("encryptCustomMetaData");
    }
}
