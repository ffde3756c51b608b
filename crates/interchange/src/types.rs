//! Component kinds, references and the common component summary.
//!
//! Every payload exchanged with a remote system is one of seven kinds.
//! Pipelines and script templates are *leaf* components migrated
//! directly; the remaining kinds are *satellite* structures reconciled as a
//! side effect of leaf migration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::InterchangeError;
use crate::xml::Element;

/// The id of the synthetic version-mismatch conflict entry.
pub const VERSION_CONFLICT_ID: &str = "00000000-0000-0000-0000-000000000000";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ComponentKind {
    #[serde(rename = "channel")]
    Pipeline,
    #[serde(rename = "codeTemplate")]
    ScriptTemplate,
    #[serde(rename = "channelGroup")]
    PipelineGroup,
    #[serde(rename = "codeTemplateLibrary")]
    ScriptLibrary,
    #[serde(rename = "channelTag")]
    PipelineTag,
    #[serde(rename = "channelPruning")]
    PipelinePruningSetting,
    #[serde(rename = "channelDependency")]
    InterPipelineDependency,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 7] = [
        ComponentKind::Pipeline,
        ComponentKind::ScriptTemplate,
        ComponentKind::PipelineGroup,
        ComponentKind::ScriptLibrary,
        ComponentKind::PipelineTag,
        ComponentKind::PipelinePruningSetting,
        ComponentKind::InterPipelineDependency,
    ];

    /// Name used on the wire and on the command line.
    pub fn wire_name(self) -> &'static str {
        match self {
            ComponentKind::Pipeline => "channel",
            ComponentKind::ScriptTemplate => "codeTemplate",
            ComponentKind::PipelineGroup => "channelGroup",
            ComponentKind::ScriptLibrary => "codeTemplateLibrary",
            ComponentKind::PipelineTag => "channelTag",
            ComponentKind::PipelinePruningSetting => "channelPruning",
            ComponentKind::InterPipelineDependency => "channelDependency",
        }
    }

    /// Root element name of a single component of this kind.
    pub fn element_name(self) -> &'static str {
        match self {
            ComponentKind::Pipeline => "channel",
            ComponentKind::ScriptTemplate => "codeTemplate",
            ComponentKind::PipelineGroup => "channelGroup",
            ComponentKind::ScriptLibrary => "codeTemplateLibrary",
            ComponentKind::PipelineTag => "channelTag",
            ComponentKind::PipelinePruningSetting => "channelMetadata",
            ComponentKind::InterPipelineDependency => "channelDependency",
        }
    }

    /// Human readable label.
    pub fn display_name(self) -> &'static str {
        match self {
            ComponentKind::Pipeline => "Channel",
            ComponentKind::ScriptTemplate => "Code Template",
            ComponentKind::PipelineGroup => "Channel Group",
            ComponentKind::ScriptLibrary => "Code Template Library",
            ComponentKind::PipelineTag => "Channel Tag",
            ComponentKind::PipelinePruningSetting => "Pruning Setting",
            ComponentKind::InterPipelineDependency => "Channel Dependency",
        }
    }

    pub fn is_leaf(self) -> bool {
        matches!(self, ComponentKind::Pipeline | ComponentKind::ScriptTemplate)
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl FromStr for ComponentKind {
    type Err = InterchangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ComponentKind::ALL
            .into_iter()
            .find(|k| k.wire_name().eq_ignore_ascii_case(s))
            .ok_or_else(|| InterchangeError::UnknownKind(s.to_string()))
    }
}

/// A pointer to one component on one system.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ComponentRef {
    #[serde(rename = "type")]
    pub kind: ComponentKind,
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

impl ComponentRef {
    pub fn new(kind: ComponentKind, id: impl Into<String>) -> Self {
        ComponentRef {
            kind,
            id: id.into(),
            name: String::new(),
        }
    }

    pub fn named(kind: ComponentKind, id: impl Into<String>, name: impl Into<String>) -> Self {
        ComponentRef {
            kind,
            id: id.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ComponentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "{} {}", self.kind, self.id)
        } else {
            write!(f, "{} '{}' ({})", self.kind, self.name, self.id)
        }
    }
}

/// Summary of a fetched leaf or container component.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Component {
    #[serde(rename = "type")]
    pub kind: ComponentKind,
    pub id: String,
    pub name: String,
    pub description: String,
    pub revision: i64,
    /// Milliseconds since the epoch, when the payload carries it.
    #[serde(rename = "lastModified", skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<i64>,
    /// Schema version attribute of the root element.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip)]
    pub element: Element,
}

impl Component {
    /// Read the common fields from a component's root element.
    ///
    /// A missing `<id>` is a hard error: it means the remote payload is
    /// corrupt and must not be migrated.
    pub fn from_element(kind: ComponentKind, element: Element) -> Result<Self, InterchangeError> {
        if element.name != kind.element_name() {
            return Err(InterchangeError::UnexpectedRoot {
                expected: kind.element_name().to_string(),
                found: element.name.clone(),
            });
        }
        let id = element
            .child_text("id")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| InterchangeError::MissingElement {
                kind: kind.display_name().to_string(),
                element: "id".to_string(),
            })?;
        let name = element.child_text("name").unwrap_or_default();
        let description = element.child_text("description").unwrap_or_default();
        let revision = element
            .child_text("revision")
            .and_then(|r| r.trim().parse::<i64>().ok())
            .unwrap_or(0);
        let last_modified = element
            .find_text("lastModified/time")
            .or_else(|| element.find_text("exportData/metadata/lastModified/time"))
            .and_then(|t| t.trim().parse::<i64>().ok());
        let version = element.attr("version").map(str::to_string);

        Ok(Component {
            kind,
            id,
            name,
            description,
            revision,
            last_modified,
            version,
            element,
        })
    }

    pub fn to_ref(&self) -> ComponentRef {
        ComponentRef::named(self.kind, self.id.clone(), self.name.clone())
    }

    /// Serialized payload.
    pub fn content(&self) -> String {
        self.element.to_xml()
    }

    /// Script code of a script template, wherever the schema puts it.
    pub fn template_code(&self) -> Option<String> {
        self.element
            .find_text("properties/code")
            .or_else(|| self.element.child_text("code"))
    }
}
