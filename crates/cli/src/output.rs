//! Text rendering of engine records. JSON output serializes the records
//! directly.

use conveyor_interchange::ComponentRef;
use conveyor_migrate::{
    ComponentConflicts, ComponentDetail, ComponentTree, IdentityAction, LeafOutcome,
    MigrationReport, SatelliteStatus,
};

use serde::Serialize;

use crate::config::Config;

/// A configured system without its credentials.
#[derive(Debug, Serialize)]
pub struct SystemSummary<'a> {
    pub name: &'a str,
    pub description: &'a str,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<&'a str>,
}

pub fn system_summaries(config: &Config) -> Vec<SystemSummary<'_>> {
    config
        .systems
        .iter()
        .map(|s| SystemSummary {
            name: &s.name,
            description: &s.description,
            url: s.base_url(),
            environment: s
                .environment
                .and_then(|id| config.environment(id))
                .map(|e| e.name.as_str()),
        })
        .collect()
}

pub fn systems(config: &Config) -> String {
    let mut lines = Vec::new();
    for system in &config.systems {
        let environment = system
            .environment
            .and_then(|id| config.environment(id))
            .map(|e| format!(" [{}]", e.name))
            .unwrap_or_default();
        let mut line = format!("{}{}  {}", system.name, environment, system.base_url());
        if !system.description.is_empty() {
            line.push_str(&format!("  {}", system.description));
        }
        lines.push(line);
    }
    lines.join("\n")
}

pub fn tree(tree: &ComponentTree) -> String {
    let mut lines = vec![format!("{} by {}", tree.system, tree.container_kind)];
    for node in &tree.nodes {
        lines.push(format!("{}  [{}]", node.container, node.count));
        for member in &node.members {
            lines.push(format!("    {}", member));
        }
    }
    lines.join("\n")
}

pub fn detail(detail: &ComponentDetail) -> String {
    let m = &detail.metadata;
    let mut lines = vec![format!("{} ({})", m.name, m.id)];
    if let Some(kind) = m.kind {
        lines.push(format!("  type: {}", kind));
    }
    if !m.description.is_empty() {
        lines.push(format!("  description: {}", m.description));
    }
    if let Some(version) = &m.version {
        lines.push(format!("  version: {}", version));
    }
    let lists = [
        ("functions", &m.function_names),
        ("libraries", &m.referenced_libraries),
        ("used by channels", &m.referenced_by_channels),
        ("used by functions", &m.referenced_by_functions),
        ("uses", &m.uses_functions),
    ];
    for (label, values) in lists {
        if !values.is_empty() {
            lines.push(format!("  {}: {}", label, values.join(", ")));
        }
    }
    lines.push(format!(
        "  references: {} ({} invalid)",
        m.number_of_references, m.number_of_invalid_references
    ));
    lines.push(String::new());
    lines.push(detail.content.clone());
    lines.join("\n")
}

pub fn conflicts(entries: &[ComponentConflicts]) -> String {
    if entries.is_empty() {
        return "no conflicts".to_string();
    }
    let mut lines = Vec::new();
    for entry in entries {
        lines.push(entry.component.to_string());
        if let Some(v) = &entry.version_mismatch {
            lines.push(format!("    server version: {} -> {}", v.source, v.destination));
        }
        if let Some(existing) = &entry.already_exists {
            lines.push(format!(
                "    exists at destination as {} (revision {} -> {}{})",
                existing.destination.id,
                existing.source_revision,
                existing.destination_revision,
                if existing.content_differs {
                    ", content differs"
                } else {
                    ""
                }
            ));
        }
        for u in &entry.issues.unknown_functions {
            lines.push(format!("    unknown function {}: {}", u.function, u.path));
        }
        for m in &entry.issues.missing_references {
            let libraries: Vec<&str> = m.libraries.iter().map(|l| l.name.as_str()).collect();
            lines.push(format!(
                "    missing reference {}: {} (libraries: {})",
                m.function,
                m.path,
                if libraries.is_empty() {
                    "none".to_string()
                } else {
                    libraries.join(", ")
                }
            ));
        }
        for d in &entry.issues.multiple_definitions {
            let owners: Vec<String> = d
                .owners
                .iter()
                .map(|o| format!("{} ({})", o.name, o.count))
                .collect();
            lines.push(format!(
                "    multiple definitions of {}: {}",
                d.function,
                owners.join(", ")
            ));
        }
    }
    lines.join("\n")
}

pub fn references(refs: &[ComponentRef]) -> String {
    if refs.is_empty() {
        return "no referenced templates".to_string();
    }
    refs.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

fn action(action: Option<IdentityAction>) -> &'static str {
    match action {
        Some(IdentityAction::Unchanged) => "unchanged id",
        Some(IdentityAction::UpdateInPlace) => "updated in place",
        Some(IdentityAction::FreshId) => "fresh id",
        Some(IdentityAction::Create) => "created",
        None => "unresolved",
    }
}

fn leaf(outcome: &LeafOutcome) -> String {
    let destination = outcome.destination_id.as_deref().unwrap_or("-");
    format!(
        "{} '{}' {} -> {} ({})",
        outcome.kind,
        outcome.name,
        outcome.source_id,
        destination,
        action(outcome.action)
    )
}

pub fn migration(report: &MigrationReport) -> String {
    let mut lines = Vec::new();
    for outcome in &report.success {
        lines.push(format!("migrated {}", leaf(outcome)));
    }
    for outcome in &report.failure {
        let reason = outcome
            .error
            .clone()
            .or_else(|| {
                outcome
                    .response
                    .as_ref()
                    .map(|r| format!("HTTP {}", r.status))
            })
            .unwrap_or_default();
        lines.push(format!("FAILED   {}: {}", leaf(outcome), reason));
    }
    for satellite in &report.satellites {
        let status = match satellite.status {
            SatelliteStatus::Applied => "applied",
            SatelliteStatus::Unchanged => "unchanged",
            SatelliteStatus::Failed => "FAILED",
        };
        lines.push(format!(
            "{}{}: {}",
            satellite.kind,
            if satellite.bootstrap { " (bootstrap)" } else { "" },
            status
        ));
    }
    for remap in &report.remaps {
        lines.push(format!("remapped {}", remap));
    }
    lines.push(format!(
        "{} migrated, {} failed",
        report.success.len(),
        report.failure.len()
    ));
    lines.join("\n")
}

