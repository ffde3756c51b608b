//! Conflict detection over the dependency index.
//!
//! Starting from the names a root component references, the detector
//! walks the call graph depth first and classifies every name it reaches:
//!
//! - defined by the root itself, or by a library linked to it: valid;
//! - defined by a library the root is not linked to: a missing reference;
//! - defined nowhere: an unknown function.
//!
//! Each function is expanded at most once per query, so recursive call
//! chains terminate. When one issue is reached through several chains the
//! longest chain is reported.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use conveyor_core::{DependencyIndex, Snapshot};
use conveyor_interchange::{ComponentKind, ComponentRef};
use serde::Serialize;
use tracing::debug;

/// Separator of the call chain shown for an issue.
pub const PATH_SEPARATOR: &str = " ==> ";

/// A called name that no template or inline definition provides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnknownFunction {
    pub function: String,
    pub path: String,
}

/// A function provided by a library the root is not linked to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingReference {
    pub function: String,
    pub path: String,
    /// Libraries defining the function; empty when its template belongs
    /// to no library at all.
    pub libraries: Vec<ComponentRef>,
}

/// One owner of a multiply defined function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnerCount {
    pub id: String,
    pub name: String,
    pub count: usize,
}

/// A function name defined by more than one template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MultipleDefinition {
    pub function: String,
    pub owners: Vec<OwnerCount>,
}

impl MultipleDefinition {
    /// Definition counts keyed by owner name.
    pub fn counts_by_name(&self) -> BTreeMap<&str, usize> {
        self.owners
            .iter()
            .map(|o| (o.name.as_str(), o.count))
            .collect()
    }
}

/// Issues found for one root component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictReport {
    pub unknown_functions: Vec<UnknownFunction>,
    pub missing_references: Vec<MissingReference>,
    pub multiple_definitions: Vec<MultipleDefinition>,
}

impl ConflictReport {
    pub fn is_empty(&self) -> bool {
        self.unknown_functions.is_empty()
            && self.missing_references.is_empty()
            && self.multiple_definitions.is_empty()
    }

    /// Number of references that would fail or need attention at runtime.
    pub fn invalid_count(&self) -> usize {
        self.unknown_functions.len() + self.missing_references.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum IssueKey {
    Unknown(String),
    Missing(String),
}

enum Resolution<'i> {
    Valid(Option<&'i BTreeSet<String>>),
    Missing(BTreeSet<String>, Option<&'i BTreeSet<String>>),
    Unknown,
}

pub struct ConflictDetector<'s> {
    snapshot: &'s Snapshot,
    index: &'s DependencyIndex,
}

impl<'s> ConflictDetector<'s> {
    pub fn new(snapshot: &'s Snapshot) -> Self {
        ConflictDetector {
            snapshot,
            index: snapshot.index(),
        }
    }

    /// Validate the references of a pipeline against the libraries linked to it.
    pub fn validate_pipeline(&self, pipeline_id: &str) -> ConflictReport {
        let empty_calls = BTreeSet::new();
        let empty_own = BTreeMap::new();
        let empty_links = BTreeSet::new();
        let referenced = self.index.pipeline_calls(pipeline_id).unwrap_or(&empty_calls);
        let own = self.index.pipeline_functions(pipeline_id).unwrap_or(&empty_own);
        let linked = self
            .index
            .pipeline_libraries(pipeline_id)
            .unwrap_or(&empty_links);
        let root = ComponentRef::new(ComponentKind::Pipeline, pipeline_id);
        self.validate(&root, referenced, Some(linked), own, &[])
    }

    /// Validate a template: its calls must resolve, and none of the
    /// functions it defines may be defined elsewhere too.
    pub fn validate_template(&self, template_id: &str) -> ConflictReport {
        let empty_calls = BTreeSet::new();
        let referenced = self.index.template_calls(template_id).unwrap_or(&empty_calls);
        let own: BTreeMap<String, BTreeSet<String>> = self
            .index
            .template_functions(template_id)
            .iter()
            .map(|f| {
                let callees = self.index.function_calls(f).cloned().unwrap_or_default();
                (f.clone(), callees)
            })
            .collect();
        let root = ComponentRef::new(ComponentKind::ScriptTemplate, template_id);
        let mut report = self.validate(&root, referenced, None, &own, &[]);

        for function in self.index.template_functions(template_id) {
            if report.multiple_definitions.iter().any(|m| &m.function == function) {
                continue;
            }
            if let Some(issue) = self.multiple_definition(function) {
                report.multiple_definitions.push(issue);
            }
        }
        report
    }

    /// Classify `referenced` names for `root`.
    ///
    /// `linked_libraries` of `None` disables link checks (template roots).
    /// `own_functions` are definitions local to the root with their callees.
    /// `call_path` is the chain already leading to `root`; functions on it
    /// are not expanded again.
    pub fn validate(
        &self,
        root: &ComponentRef,
        referenced: &BTreeSet<String>,
        linked_libraries: Option<&BTreeSet<String>>,
        own_functions: &BTreeMap<String, BTreeSet<String>>,
        call_path: &[String],
    ) -> ConflictReport {
        let mut visited: HashSet<String> = call_path.iter().cloned().collect();
        let mut reached: BTreeSet<String> = BTreeSet::new();
        let mut issues: BTreeMap<IssueKey, (Vec<String>, BTreeSet<String>)> = BTreeMap::new();

        // reversed so names pop in ascending order
        let mut stack: Vec<(String, Vec<String>)> = referenced
            .iter()
            .rev()
            .map(|name| {
                let mut path = call_path.to_vec();
                path.push(name.clone());
                (name.clone(), path)
            })
            .collect();

        while let Some((name, path)) = stack.pop() {
            let callees = match self.resolve(&name, linked_libraries, own_functions) {
                Resolution::Valid(callees) => callees,
                Resolution::Missing(libraries, callees) => {
                    record(&mut issues, IssueKey::Missing(name.clone()), &path, libraries);
                    callees
                }
                Resolution::Unknown => {
                    record(&mut issues, IssueKey::Unknown(name.clone()), &path, BTreeSet::new());
                    None
                }
            };
            if !own_functions.contains_key(&name) && self.index.is_defined(&name) {
                reached.insert(name.clone());
            }

            if !visited.insert(name) {
                continue;
            }
            if let Some(callees) = callees {
                for callee in callees.iter().rev() {
                    let mut next = path.clone();
                    next.push(callee.clone());
                    stack.push((callee.clone(), next));
                }
            }
        }

        let mut report = ConflictReport::default();
        for (key, (path, libraries)) in issues {
            let path = path.join(PATH_SEPARATOR);
            match key {
                IssueKey::Unknown(function) => {
                    report
                        .unknown_functions
                        .push(UnknownFunction { function, path })
                }
                IssueKey::Missing(function) => report.missing_references.push(MissingReference {
                    function,
                    path,
                    libraries: libraries
                        .into_iter()
                        .map(|id| {
                            let name = self
                                .snapshot
                                .name_of(ComponentKind::ScriptLibrary, &id)
                                .unwrap_or_default()
                                .to_string();
                            ComponentRef::named(ComponentKind::ScriptLibrary, id, name)
                        })
                        .collect(),
                }),
            }
        }
        for name in &reached {
            if let Some(issue) = self.multiple_definition(name) {
                report.multiple_definitions.push(issue);
            }
        }

        debug!(
            root = %root,
            unknown = report.unknown_functions.len(),
            missing = report.missing_references.len(),
            multiple = report.multiple_definitions.len(),
            "references validated"
        );
        report
    }

    fn resolve<'a>(
        &'a self,
        name: &str,
        linked_libraries: Option<&BTreeSet<String>>,
        own_functions: &'a BTreeMap<String, BTreeSet<String>>,
    ) -> Resolution<'a> {
        if let Some(callees) = own_functions.get(name) {
            return Resolution::Valid(Some(callees));
        }
        if !self.index.is_defined(name) {
            return Resolution::Unknown;
        }
        let callees = self.index.function_calls(name);
        let Some(linked) = linked_libraries else {
            return Resolution::Valid(callees);
        };
        let libraries = self.index.function_libraries(name);
        if libraries.iter().any(|l| linked.contains(l)) {
            Resolution::Valid(callees)
        } else {
            Resolution::Missing(libraries, callees)
        }
    }

    fn multiple_definition(&self, function: &str) -> Option<MultipleDefinition> {
        let owners = self.index.function_owners(function)?;
        if owners.len() < 2 {
            return None;
        }
        Some(MultipleDefinition {
            function: function.to_string(),
            owners: owners
                .iter()
                .map(|(id, count)| OwnerCount {
                    id: id.clone(),
                    name: self
                        .snapshot
                        .name_of(ComponentKind::ScriptTemplate, id)
                        .unwrap_or_default()
                        .to_string(),
                    count: *count,
                })
                .collect(),
        })
    }
}

fn record(
    issues: &mut BTreeMap<IssueKey, (Vec<String>, BTreeSet<String>)>,
    key: IssueKey,
    path: &[String],
    libraries: BTreeSet<String>,
) {
    match issues.get_mut(&key) {
        Some((kept, _)) if kept.len() >= path.len() => {}
        Some(slot) => *slot = (path.to_vec(), libraries),
        None => {
            issues.insert(key, (path.to_vec(), libraries));
        }
    }
}
