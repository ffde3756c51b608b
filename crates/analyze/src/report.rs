//! ComponentMetadata -- the summary record shown for one component.
//!
//! Combines the component's own fields with what the dependency index
//! knows about it: which libraries it uses or belongs to, who references
//! it, which functions it defines or calls, and how many of its
//! references are invalid.

use std::collections::BTreeSet;

use conveyor_core::Snapshot;
use conveyor_interchange::{ComponentKind, Version};
use serde::Serialize;

use crate::conflicts::ConflictDetector;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentMetadata {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: Option<ComponentKind>,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<i64>,
    /// Functions defined (templates) or defined inline (pipelines).
    pub function_names: Vec<String>,
    pub referenced_libraries: Vec<String>,
    pub referenced_by_channels: Vec<String>,
    pub referenced_by_functions: Vec<String>,
    pub uses_functions: Vec<String>,
    pub number_of_references: usize,
    pub number_of_invalid_references: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number_of_channels: Option<usize>,
}

impl ComponentMetadata {
    /// Labelled rows for text display, skipping fields that do not apply.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        let mut rows = vec![
            ("Name", self.name.clone()),
            ("Id", self.id.clone()),
            (
                "Type",
                self.kind.map(|k| k.display_name().to_string()).unwrap_or_default(),
            ),
        ];
        if !self.description.is_empty() {
            rows.push(("Description", self.description.clone()));
        }
        if let Some(v) = &self.version {
            let display = v
                .parse::<Version>()
                .map(|v| v.to_string())
                .unwrap_or_else(|_| v.clone());
            rows.push(("Version", display));
        }
        if let Some(ms) = self.last_modified {
            rows.push(("Last modified (ms)", ms.to_string()));
        }
        let lists: [(&'static str, &Vec<String>); 5] = [
            ("Function Name", &self.function_names),
            ("Referenced Libraries", &self.referenced_libraries),
            ("Referenced by channels", &self.referenced_by_channels),
            ("Referenced by functions", &self.referenced_by_functions),
            ("Uses functions", &self.uses_functions),
        ];
        for (label, values) in lists {
            if !values.is_empty() {
                rows.push((label, values.join(", ")));
            }
        }
        if let Some(n) = self.number_of_channels {
            rows.push(("Number of channels", n.to_string()));
        }
        rows.push(("Number of references", self.number_of_references.to_string()));
        rows.push((
            "Number of invalid references",
            self.number_of_invalid_references.to_string(),
        ));
        rows
    }
}

/// Build the metadata record of one component, or `None` if the snapshot
/// has no component of that kind and id.
pub fn describe(snapshot: &Snapshot, kind: ComponentKind, id: &str) -> Option<ComponentMetadata> {
    match kind {
        ComponentKind::Pipeline => describe_pipeline(snapshot, id),
        ComponentKind::ScriptTemplate => describe_template(snapshot, id),
        ComponentKind::ScriptLibrary => describe_library(snapshot, id),
        ComponentKind::PipelineGroup => {
            let group = snapshot.groups().iter().find(|g| g.id == id)?;
            Some(ComponentMetadata {
                id: group.id.clone(),
                name: group.name.clone(),
                kind: Some(kind),
                description: group.description.clone(),
                number_of_channels: Some(group.pipeline_ids.len()),
                ..ComponentMetadata::default()
            })
        }
        ComponentKind::PipelineTag => {
            let tag = snapshot.tags().iter().find(|t| t.id == id)?;
            Some(ComponentMetadata {
                id: tag.id.clone(),
                name: tag.name.clone(),
                kind: Some(kind),
                number_of_channels: Some(tag.pipeline_ids.len()),
                ..ComponentMetadata::default()
            })
        }
        ComponentKind::PipelinePruningSetting | ComponentKind::InterPipelineDependency => None,
    }
}

fn library_names<'a>(snapshot: &Snapshot, ids: impl IntoIterator<Item = &'a String>) -> Vec<String> {
    ids.into_iter()
        .map(|id| {
            snapshot
                .name_of(ComponentKind::ScriptLibrary, id)
                .unwrap_or(id)
                .to_string()
        })
        .collect()
}

fn describe_pipeline(snapshot: &Snapshot, id: &str) -> Option<ComponentMetadata> {
    let pipeline = snapshot.component(ComponentKind::Pipeline, id)?;
    let index = snapshot.index();
    let calls: Vec<String> = index
        .pipeline_calls(id)
        .map(|c| c.iter().cloned().collect())
        .unwrap_or_default();
    let inline: Vec<String> = index
        .pipeline_functions(id)
        .map(|f| f.keys().cloned().collect())
        .unwrap_or_default();
    let linked = index.pipeline_libraries(id).cloned().unwrap_or_default();
    let report = ConflictDetector::new(snapshot).validate_pipeline(id);

    Some(ComponentMetadata {
        id: pipeline.id.clone(),
        name: pipeline.name.clone(),
        kind: Some(ComponentKind::Pipeline),
        description: pipeline.description.clone(),
        version: pipeline.version.clone(),
        last_modified: pipeline.last_modified,
        function_names: inline,
        referenced_libraries: library_names(snapshot, &linked),
        number_of_references: calls.len(),
        uses_functions: calls,
        number_of_invalid_references: report.invalid_count(),
        ..ComponentMetadata::default()
    })
}

fn describe_template(snapshot: &Snapshot, id: &str) -> Option<ComponentMetadata> {
    let template = snapshot.component(ComponentKind::ScriptTemplate, id)?;
    let index = snapshot.index();
    let functions = index.template_functions(id).to_vec();

    let mut channels = BTreeSet::new();
    let mut callers = BTreeSet::new();
    for f in &functions {
        if let Some(pipelines) = index.function_pipelines(f) {
            channels.extend(pipelines.iter().map(|p| {
                snapshot
                    .name_of(ComponentKind::Pipeline, p)
                    .unwrap_or(p)
                    .to_string()
            }));
        }
        if let Some(fs) = index.function_callers(f) {
            // calls between the template's own functions are not references
            callers.extend(fs.iter().filter(|c| !functions.contains(c)).cloned());
        }
    }
    let uses: Vec<String> = index
        .template_calls(id)
        .map(|c| c.iter().filter(|n| !functions.contains(n)).cloned().collect())
        .unwrap_or_default();
    let report = ConflictDetector::new(snapshot).validate_template(id);

    Some(ComponentMetadata {
        id: template.id.clone(),
        name: template.name.clone(),
        kind: Some(ComponentKind::ScriptTemplate),
        description: template.description.clone(),
        version: template.version.clone(),
        last_modified: template.last_modified,
        function_names: functions,
        referenced_libraries: library_names(snapshot, index.template_library(id).map(str::to_string).as_ref()),
        number_of_references: channels.len() + callers.len(),
        referenced_by_channels: channels.into_iter().collect(),
        referenced_by_functions: callers.into_iter().collect(),
        uses_functions: uses,
        number_of_invalid_references: report.invalid_count(),
        ..ComponentMetadata::default()
    })
}

fn describe_library(snapshot: &Snapshot, id: &str) -> Option<ComponentMetadata> {
    let library = snapshot.library(id)?;
    let channels: Vec<String> = library
        .enabled_pipeline_ids
        .iter()
        .map(|p| {
            snapshot
                .name_of(ComponentKind::Pipeline, p)
                .unwrap_or(p)
                .to_string()
        })
        .collect();
    Some(ComponentMetadata {
        id: library.id.clone(),
        name: library.name.clone(),
        kind: Some(ComponentKind::ScriptLibrary),
        description: library.description.clone(),
        version: library.version().map(str::to_string),
        number_of_channels: Some(channels.len()),
        number_of_references: channels.len(),
        referenced_by_channels: channels,
        ..ComponentMetadata::default()
    })
}
