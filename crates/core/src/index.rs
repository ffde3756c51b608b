//! Dependency index: bidirectional maps between script templates, the
//! functions they define, the libraries that own them and the pipelines
//! that call them.
//!
//! Built once per system snapshot in three passes: templates, then
//! libraries (which need the template ids), then pipelines. The build is
//! all-or-nothing; an inconsistent configuration aborts it with an error.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use conveyor_interchange::{Component, ComponentKind, Library};
use tracing::debug;

use crate::error::CoreError;
use crate::lexer::ScriptAnalyzer;

/// Lookup index over one system's scripts.
#[derive(Debug, Clone, Default)]
pub struct DependencyIndex {
    /// template id -> owning library id
    template_library: HashMap<String, String>,
    /// template id -> functions defined, in order of appearance
    template_functions: HashMap<String, Vec<String>>,
    /// template id -> every name the template's code calls
    template_calls: HashMap<String, BTreeSet<String>>,
    /// function name -> owning template id -> number of definitions
    function_owners: BTreeMap<String, BTreeMap<String, usize>>,
    /// function name -> names its bodies call (union over all definitions)
    function_calls: HashMap<String, BTreeSet<String>>,
    /// function name -> functions calling it
    function_callers: HashMap<String, BTreeSet<String>>,
    /// pipeline id -> names called anywhere in the pipeline
    pipeline_calls: HashMap<String, BTreeSet<String>>,
    /// pipeline id -> functions defined inside the pipeline and what they call
    pipeline_functions: HashMap<String, BTreeMap<String, BTreeSet<String>>>,
    /// function name -> pipelines calling it
    function_pipelines: HashMap<String, BTreeSet<String>>,
    /// pipeline id -> libraries enabled for it
    pipeline_libraries: HashMap<String, BTreeSet<String>>,
}

/// Script text of a pipeline: the whole export minus the embedded
/// export data, which may carry copies of library templates.
pub fn pipeline_script_text(pipeline: &Component) -> String {
    let mut element = pipeline.element.clone();
    element.remove_children("exportData");
    element.to_xml()
}

pub fn build_index(
    templates: &[Component],
    libraries: &[Library],
    pipelines: &[Component],
    analyzer: &ScriptAnalyzer,
) -> Result<DependencyIndex, CoreError> {
    let mut idx = DependencyIndex::default();

    // Pass 1: templates
    for template in templates {
        if idx.template_functions.contains_key(&template.id) {
            return Err(CoreError::DuplicateId {
                kind: ComponentKind::ScriptTemplate,
                id: template.id.clone(),
            });
        }
        let code = template.template_code().unwrap_or_default();
        let analysis = analyzer.analyze(&code, &template.name);

        let mut defined = Vec::new();
        for f in &analysis.functions {
            if !f.pseudo {
                *idx.function_owners
                    .entry(f.name.clone())
                    .or_default()
                    .entry(template.id.clone())
                    .or_insert(0) += 1;
                if !defined.contains(&f.name) {
                    defined.push(f.name.clone());
                }
                idx.function_calls
                    .entry(f.name.clone())
                    .or_default()
                    .extend(f.calls.iter().cloned());
                for callee in &f.calls {
                    idx.function_callers
                        .entry(callee.clone())
                        .or_default()
                        .insert(f.name.clone());
                }
            }
        }
        idx.template_calls
            .insert(template.id.clone(), analysis.all_calls());
        idx.template_functions.insert(template.id.clone(), defined);
    }

    // Pass 2: libraries
    for library in libraries {
        for template_id in &library.template_ids {
            if let Some(previous) = idx.template_library.get(template_id) {
                if previous != &library.id {
                    return Err(CoreError::TemplateInSeveralLibraries {
                        template_id: template_id.clone(),
                        first: previous.clone(),
                        second: library.id.clone(),
                    });
                }
            }
            idx.template_library
                .insert(template_id.clone(), library.id.clone());
        }
    }

    // Pass 3: pipelines
    for pipeline in pipelines {
        if idx.pipeline_calls.contains_key(&pipeline.id) {
            return Err(CoreError::DuplicateId {
                kind: ComponentKind::Pipeline,
                id: pipeline.id.clone(),
            });
        }
        let analysis = analyzer.analyze(&pipeline_script_text(pipeline), &pipeline.name);
        let calls = analysis.all_calls();
        for name in &calls {
            idx.function_pipelines
                .entry(name.clone())
                .or_default()
                .insert(pipeline.id.clone());
        }
        let internal: BTreeMap<String, BTreeSet<String>> = analysis
            .functions
            .iter()
            .filter(|f| !f.pseudo)
            .map(|f| (f.name.clone(), f.calls.clone()))
            .collect();
        idx.pipeline_calls.insert(pipeline.id.clone(), calls);
        idx.pipeline_functions.insert(pipeline.id.clone(), internal);

        let linked: BTreeSet<String> = libraries
            .iter()
            .filter(|l| l.is_enabled_for(&pipeline.id))
            .map(|l| l.id.clone())
            .collect();
        idx.pipeline_libraries.insert(pipeline.id.clone(), linked);
    }

    debug!(
        templates = templates.len(),
        libraries = libraries.len(),
        pipelines = pipelines.len(),
        functions = idx.function_owners.len(),
        "dependency index built"
    );
    Ok(idx)
}

impl DependencyIndex {
    /// Library owning a template, if the template is library-bound.
    pub fn template_library(&self, template_id: &str) -> Option<&str> {
        self.template_library.get(template_id).map(String::as_str)
    }

    /// Libraries owning any definition of `function`.
    pub fn function_libraries(&self, function: &str) -> BTreeSet<String> {
        self.function_owners
            .get(function)
            .into_iter()
            .flat_map(|owners| owners.keys())
            .filter_map(|template_id| self.template_library.get(template_id).cloned())
            .collect()
    }

    /// Whether some template defines `function`.
    pub fn is_defined(&self, function: &str) -> bool {
        self.function_owners.contains_key(function)
    }

    /// Functions defined by a template, in order of appearance.
    pub fn template_functions(&self, template_id: &str) -> &[String] {
        self.template_functions
            .get(template_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every name a template's code calls, including calls outside of
    /// any definition.
    pub fn template_calls(&self, template_id: &str) -> Option<&BTreeSet<String>> {
        self.template_calls.get(template_id)
    }

    /// Owning templates of a function with their definition counts.
    pub fn function_owners(&self, function: &str) -> Option<&BTreeMap<String, usize>> {
        self.function_owners.get(function)
    }

    /// Functions with more than one owning template.
    pub fn multiply_defined(&self) -> impl Iterator<Item = (&str, &BTreeMap<String, usize>)> {
        self.function_owners
            .iter()
            .filter(|(_, owners)| owners.len() > 1)
            .map(|(name, owners)| (name.as_str(), owners))
    }

    /// Names called by a template-defined function.
    pub fn function_calls(&self, function: &str) -> Option<&BTreeSet<String>> {
        self.function_calls.get(function)
    }

    /// Template functions calling `function`.
    pub fn function_callers(&self, function: &str) -> Option<&BTreeSet<String>> {
        self.function_callers.get(function)
    }

    /// Names called anywhere in a pipeline.
    pub fn pipeline_calls(&self, pipeline_id: &str) -> Option<&BTreeSet<String>> {
        self.pipeline_calls.get(pipeline_id)
    }

    /// Functions a pipeline defines for itself, with their callees.
    pub fn pipeline_functions(&self, pipeline_id: &str) -> Option<&BTreeMap<String, BTreeSet<String>>> {
        self.pipeline_functions.get(pipeline_id)
    }

    /// Pipelines calling `function`.
    pub fn function_pipelines(&self, function: &str) -> Option<&BTreeSet<String>> {
        self.function_pipelines.get(function)
    }

    /// Libraries enabled for a pipeline.
    pub fn pipeline_libraries(&self, pipeline_id: &str) -> Option<&BTreeSet<String>> {
        self.pipeline_libraries.get(pipeline_id)
    }

    /// Templates providing the functions reachable from `roots`, following
    /// calls between template functions.
    pub fn templates_reached_from<'a>(
        &self,
        roots: impl IntoIterator<Item = &'a String>,
    ) -> BTreeSet<String> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = roots.into_iter().map(String::as_str).collect();
        let mut templates = BTreeSet::new();
        while let Some(name) = stack.pop() {
            if !seen.insert(name) {
                continue;
            }
            if let Some(owners) = self.function_owners.get(name) {
                templates.extend(owners.keys().cloned());
            }
            if let Some(callees) = self.function_calls.get(name) {
                stack.extend(callees.iter().map(String::as_str));
            }
        }
        templates
    }

    /// Templates a pipeline depends on, directly or through other templates.
    pub fn pipeline_templates(&self, pipeline_id: &str) -> BTreeSet<String> {
        match self.pipeline_calls.get(pipeline_id) {
            Some(calls) => self.templates_reached_from(calls),
            None => BTreeSet::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_interchange::records::parse_libraries;
    use conveyor_interchange::xml::{self, Element};

    fn template(id: &str, name: &str, code: &str) -> Component {
        let mut el = Element::new("codeTemplate");
        el.push(Element::with_text("id", id));
        el.push(Element::with_text("name", name));
        let props = el.ensure_child("properties");
        props.push(Element::with_text("type", "FUNCTION"));
        props.push(Element::with_text("code", code));
        Component::from_element(ComponentKind::ScriptTemplate, el).unwrap()
    }

    fn pipeline(id: &str, script: &str) -> Component {
        let raw = format!(
            "<channel version=\"3.9.1\"><id>{id}</id><name>P {id}</name>\
             <sourceConnector><transformer><steps><step><script>{}</script></step></steps>\
             </transformer></sourceConnector></channel>",
            xml::escape_text(script)
        );
        Component::from_element(ComponentKind::Pipeline, xml::parse(&raw).unwrap()).unwrap()
    }

    fn libraries() -> Vec<Library> {
        parse_libraries(
            "<list><codeTemplateLibrary><id>lib-a</id><name>A</name>\
             <enabledChannelIds><string>p1</string></enabledChannelIds>\
             <codeTemplates><codeTemplate><id>t1</id></codeTemplate></codeTemplates>\
             </codeTemplateLibrary></list>",
        )
        .unwrap()
    }

    #[test]
    fn maps_templates_functions_and_pipelines() {
        let templates = vec![
            template("t1", "Strings", "function pad(s) { return trim(s); }\nfunction trim(s) { return s; }"),
            template("t2", "Loose", "function orphan() {}"),
        ];
        let pipelines = vec![pipeline("p1", "var v = pad(msg['x']);"), pipeline("p2", "orphan();")];
        let idx = build_index(&templates, &libraries(), &pipelines, &ScriptAnalyzer::default()).unwrap();

        assert_eq!(idx.template_library("t1"), Some("lib-a"));
        assert_eq!(idx.template_library("t2"), None);
        assert_eq!(idx.template_functions("t1"), ["pad", "trim"]);
        assert!(idx.function_calls("pad").unwrap().contains("trim"));
        assert!(idx.function_callers("trim").unwrap().contains("pad"));
        assert!(idx.pipeline_calls("p1").unwrap().contains("pad"));
        assert!(idx.function_pipelines("orphan").unwrap().contains("p2"));
        assert!(idx.pipeline_libraries("p1").unwrap().contains("lib-a"));
        assert!(idx.pipeline_libraries("p2").unwrap().is_empty());
        assert_eq!(
            idx.function_libraries("pad").into_iter().collect::<Vec<_>>(),
            vec!["lib-a".to_string()]
        );
    }

    #[test]
    fn pipeline_templates_follow_template_calls() {
        let templates = vec![
            template("t1", "Entry", "function entry() { deep(); }"),
            template("t2", "Deep", "function deep() { entry(); }"),
            template("t3", "Unused", "function unused() {}"),
        ];
        let pipelines = vec![pipeline("p1", "entry();")];
        let idx = build_index(&templates, &[], &pipelines, &ScriptAnalyzer::default()).unwrap();
        let reached: Vec<String> = idx.pipeline_templates("p1").into_iter().collect();
        assert_eq!(reached, vec!["t1", "t2"]);
        assert!(idx.pipeline_templates("missing").is_empty());
    }

    #[test]
    fn counts_definitions_per_owner() {
        let templates = vec![
            template("x", "X", "function foo() {}\nfunction foo() {}"),
            template("y", "Y", "function foo() {}"),
        ];
        let idx = build_index(&templates, &[], &[], &ScriptAnalyzer::default()).unwrap();
        let owners = idx.function_owners("foo").unwrap();
        assert_eq!(owners.get("x"), Some(&2));
        assert_eq!(owners.get("y"), Some(&1));
        assert_eq!(idx.multiply_defined().count(), 1);
    }

    #[test]
    fn pipeline_internal_functions_are_recorded() {
        let p = pipeline("p1", "function local() { helper(); }\nlocal();");
        let idx = build_index(&[], &[], &[p], &ScriptAnalyzer::default()).unwrap();
        let internal = idx.pipeline_functions("p1").unwrap();
        assert!(internal.get("local").unwrap().contains("helper"));
    }

    #[test]
    fn duplicate_template_ids_abort_the_build() {
        let templates = vec![template("t1", "A", ""), template("t1", "B", "")];
        let err = build_index(&templates, &[], &[], &ScriptAnalyzer::default()).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateId { .. }));
    }

    #[test]
    fn template_listed_by_two_libraries_is_rejected() {
        let libs = parse_libraries(
            "<list><codeTemplateLibrary><id>a</id><codeTemplates><codeTemplate><id>t</id></codeTemplate></codeTemplates></codeTemplateLibrary>\
             <codeTemplateLibrary><id>b</id><codeTemplates><codeTemplate><id>t</id></codeTemplate></codeTemplates></codeTemplateLibrary></list>",
        )
        .unwrap();
        let err = build_index(&[], &libs, &[], &ScriptAnalyzer::default()).unwrap_err();
        assert!(matches!(err, CoreError::TemplateInSeveralLibraries { .. }));
    }
}
