//! Side-by-side comparison of a source component with its destination
//! counterpart (the destination component of the same name).

use conveyor_interchange::records::strip_comments;
use conveyor_interchange::{Component, ComponentRef};
use serde::Serialize;

/// A single field-level difference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDiff {
    pub field: &'static str,
    pub source: Option<String>,
    pub destination: Option<String>,
    pub changed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDiff {
    pub component: ComponentRef,
    /// Destination component of the same name, if any.
    pub destination: Option<ComponentRef>,
    pub source_content: String,
    pub destination_content: Option<String>,
    pub fields: Vec<FieldDiff>,
    /// Payloads equal apart from comments and ids.
    pub identical: bool,
}

impl ComponentDiff {
    pub fn exists_at_destination(&self) -> bool {
        self.destination.is_some()
    }

    /// Fields whose values differ.
    pub fn changed_fields(&self) -> impl Iterator<Item = &FieldDiff> {
        self.fields.iter().filter(|f| f.changed)
    }

    /// Format the diff as human-readable text.
    pub fn to_text(&self) -> String {
        let mut lines = Vec::new();
        match &self.destination {
            None => lines.push(format!("+ {}", self.component)),
            Some(_) if self.identical => lines.push(format!("= {}", self.component)),
            Some(destination) => {
                lines.push(format!("~ {} -> {}", self.component, destination.id));
                for f in self.changed_fields() {
                    lines.push(format!(
                        "    {}: {} -> {}",
                        f.field,
                        f.source.as_deref().unwrap_or("-"),
                        f.destination.as_deref().unwrap_or("-")
                    ));
                }
            }
        }
        lines.join("\n")
    }
}

fn fields_of(c: &Component) -> [(&'static str, Option<String>); 5] {
    [
        ("name", Some(c.name.clone())),
        ("description", Some(c.description.clone())),
        ("revision", Some(c.revision.to_string())),
        ("version", c.version.clone()),
        ("lastModified", c.last_modified.map(|t| t.to_string())),
    ]
}

fn normalized(c: &Component) -> String {
    let mut element = c.element.clone();
    strip_comments(&mut element);
    element.remove_children("id");
    element.to_xml()
}

pub fn diff_components(source: &Component, destination: Option<&Component>) -> ComponentDiff {
    let source_fields = fields_of(source);
    let fields = match destination {
        Some(d) => source_fields
            .into_iter()
            .zip(fields_of(d))
            .map(|((field, source), (_, destination))| FieldDiff {
                field,
                changed: source != destination,
                source,
                destination,
            })
            .collect(),
        None => source_fields
            .into_iter()
            .map(|(field, source)| FieldDiff {
                field,
                source,
                destination: None,
                changed: true,
            })
            .collect(),
    };

    ComponentDiff {
        component: source.to_ref(),
        destination: destination.map(Component::to_ref),
        source_content: source.content(),
        destination_content: destination.map(Component::content),
        fields,
        identical: destination.is_some_and(|d| normalized(source) == normalized(d)),
    }
}
