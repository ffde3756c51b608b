//! Integration tests for reference validation and component metadata.
//!
//! Each test builds a small snapshot by hand (templates, libraries and
//! pipelines as the remote system would export them) and checks the
//! detector's classification.

use conveyor_analyze::{describe, ComponentMetadata, ConflictDetector};
use conveyor_core::{ScriptAnalyzer, Snapshot, SnapshotParts};
use conveyor_interchange::xml::Element;
use conveyor_interchange::{Component, ComponentKind, Library};

fn template(id: &str, name: &str, code: &str) -> Component {
    let mut el = Element::new("codeTemplate");
    el.set_attr("version", "3.9.1");
    el.push(Element::with_text("id", id));
    el.push(Element::with_text("name", name));
    let props = el.ensure_child("properties");
    props.push(Element::with_text("type", "FUNCTION"));
    props.push(Element::with_text("code", code));
    Component::from_element(ComponentKind::ScriptTemplate, el).unwrap()
}

fn pipeline(id: &str, name: &str, script: &str) -> Component {
    let mut el = Element::new("channel");
    el.set_attr("version", "3.9.1");
    el.push(Element::with_text("id", id));
    el.push(Element::with_text("name", name));
    el.ensure_path("sourceConnector/transformer/elements/step")
        .push(Element::with_text("script", script));
    Component::from_element(ComponentKind::Pipeline, el).unwrap()
}

fn library(id: &str, name: &str, templates: &[&str], enabled: &[&str]) -> Library {
    let mut lib = Library::new(id, name, Some("3.9.1"));
    lib.template_ids = templates.iter().map(|s| s.to_string()).collect();
    lib.enabled_pipeline_ids = enabled.iter().map(|s| s.to_string()).collect();
    lib
}

fn snapshot(templates: Vec<Component>, libraries: Vec<Library>, pipelines: Vec<Component>) -> Snapshot {
    let parts = SnapshotParts {
        templates,
        libraries,
        pipelines,
        ..SnapshotParts::default()
    };
    Snapshot::build(parts, &ScriptAnalyzer::default()).unwrap()
}

// ──────────────────────────────────────────────
// Reference classification
// ──────────────────────────────────────────────

#[test]
fn mutual_recursion_terminates_and_reports_deep_issue() {
    let snap = snapshot(
        vec![
            template("t1", "A", "function a() { return b(); }"),
            template("t2", "B", "function b() { a(); return missing(); }"),
        ],
        vec![library("lib", "Lib", &["t1", "t2"], &["p"])],
        vec![pipeline("p", "P", "a();")],
    );
    let report = ConflictDetector::new(&snap).validate_pipeline("p");
    assert!(report.missing_references.is_empty());
    assert_eq!(report.unknown_functions.len(), 1);
    assert_eq!(report.unknown_functions[0].function, "missing");
    assert_eq!(report.unknown_functions[0].path, "a ==> b ==> missing");
}

#[test]
fn unlinked_library_yields_missing_reference() {
    let snap = snapshot(
        vec![template("t1", "Util", "function util() {}")],
        vec![library("lib-l", "L", &["t1"], &[])],
        vec![pipeline("p", "P", "util();")],
    );
    let report = ConflictDetector::new(&snap).validate_pipeline("p");
    assert!(report.unknown_functions.is_empty());
    assert_eq!(report.missing_references.len(), 1);
    let missing = &report.missing_references[0];
    assert_eq!(missing.function, "util");
    assert_eq!(missing.path, "util");
    assert_eq!(missing.libraries.len(), 1);
    assert_eq!(missing.libraries[0].id, "lib-l");
    assert_eq!(missing.libraries[0].name, "L");
}

#[test]
fn template_outside_any_library_is_a_missing_reference_for_pipelines() {
    let snap = snapshot(
        vec![template("t1", "Loose", "function loose() {}")],
        vec![],
        vec![pipeline("p", "P", "loose();")],
    );
    let report = ConflictDetector::new(&snap).validate_pipeline("p");
    assert_eq!(report.missing_references.len(), 1);
    assert!(report.missing_references[0].libraries.is_empty());
}

#[test]
fn inline_definitions_are_valid_and_followed() {
    let snap = snapshot(
        vec![template("t1", "H", "function helper() {}")],
        vec![library("lib", "Lib", &["t1"], &["p"])],
        vec![pipeline("p", "P", "function local() { helper(); nowhere(); }\nlocal();")],
    );
    let report = ConflictDetector::new(&snap).validate_pipeline("p");
    assert!(report.missing_references.is_empty());
    assert_eq!(report.unknown_functions.len(), 1);
    assert_eq!(report.unknown_functions[0].path, "local ==> nowhere");
}

#[test]
fn longest_path_is_kept_when_issue_is_reached_twice() {
    let snap = snapshot(
        vec![template(
            "t1",
            "Chain",
            "function a() { z(); }\nfunction y() { w(); }\nfunction w() { z(); }",
        )],
        vec![library("lib", "Lib", &["t1"], &["p"])],
        vec![pipeline("p", "P", "a(); y();")],
    );
    let report = ConflictDetector::new(&snap).validate_pipeline("p");
    assert_eq!(report.unknown_functions.len(), 1);
    assert_eq!(report.unknown_functions[0].path, "y ==> w ==> z");
}

#[test]
fn templates_are_not_link_checked() {
    let snap = snapshot(
        vec![
            template("t1", "Caller", "function caller() { util(); }"),
            template("t2", "Util", "function util() {}"),
        ],
        vec![library("lib", "Lib", &["t2"], &[])],
        vec![],
    );
    let report = ConflictDetector::new(&snap).validate_template("t1");
    assert!(report.is_empty());
}

// ──────────────────────────────────────────────
// Multiple definitions
// ──────────────────────────────────────────────

#[test]
fn every_owner_of_a_duplicated_function_is_flagged_with_counts() {
    let snap = snapshot(
        vec![
            template("x", "X", "function foo() {}\nfunction foo() {}"),
            template("y", "Y", "function foo() {}"),
        ],
        vec![library("lib", "Lib", &["x", "y"], &[])],
        vec![],
    );
    let detector = ConflictDetector::new(&snap);
    for owner in ["x", "y"] {
        let report = detector.validate_template(owner);
        assert_eq!(report.multiple_definitions.len(), 1, "owner {owner}");
        let counts = report.multiple_definitions[0].counts_by_name();
        assert_eq!(counts.get("X"), Some(&2));
        assert_eq!(counts.get("Y"), Some(&1));
    }
}

#[test]
fn pipelines_see_duplicates_of_functions_they_reach() {
    let snap = snapshot(
        vec![
            template("x", "X", "function foo() {}"),
            template("y", "Y", "function foo() {}"),
        ],
        vec![library("lib", "Lib", &["x", "y"], &["p"])],
        vec![pipeline("p", "P", "foo();")],
    );
    let report = ConflictDetector::new(&snap).validate_pipeline("p");
    assert_eq!(report.multiple_definitions.len(), 1);
    assert_eq!(report.multiple_definitions[0].function, "foo");
}

// ──────────────────────────────────────────────
// Owning library and metadata
// ──────────────────────────────────────────────

#[test]
fn owning_library_is_present_iff_template_is_library_bound() {
    let snap = snapshot(
        vec![
            template("bound", "Bound", "function b() {}"),
            template("free", "Free", "function f() {}"),
        ],
        vec![library("lib", "Lib", &["bound"], &[])],
        vec![],
    );
    assert_eq!(snap.index().template_library("bound"), Some("lib"));
    assert_eq!(snap.index().template_library("free"), None);
}

#[test]
fn template_metadata_lists_referrers() {
    let snap = snapshot(
        vec![
            template("t1", "Util", "function util() {}"),
            template("t2", "Other", "function other() { util(); }"),
        ],
        vec![library("lib", "Shared", &["t1", "t2"], &["p"])],
        vec![pipeline("p", "Inbound ADT", "util();")],
    );
    let meta = describe(&snap, ComponentKind::ScriptTemplate, "t1").unwrap();
    assert_eq!(meta.function_names, vec!["util"]);
    assert_eq!(meta.referenced_libraries, vec!["Shared"]);
    assert_eq!(meta.referenced_by_channels, vec!["Inbound ADT"]);
    assert_eq!(meta.referenced_by_functions, vec!["other"]);
    assert_eq!(meta.number_of_references, 2);
    assert_eq!(meta.number_of_invalid_references, 0);

    let json = serde_json::to_value(&meta).unwrap();
    assert_eq!(json["type"], "codeTemplate");
    assert_eq!(json["referencedByChannels"][0], "Inbound ADT");

    let rows = meta.fields();
    assert!(rows.iter().any(|(label, value)| *label == "Version" && value == "3.9.1"));

    let pmeta = describe(&snap, ComponentKind::Pipeline, "p").unwrap();
    assert_eq!(pmeta.uses_functions, vec!["util"]);
    assert_eq!(pmeta.referenced_libraries, vec!["Shared"]);
}

#[test]
fn modification_time_row_names_its_unit() {
    let meta = ComponentMetadata {
        id: "t1".to_string(),
        name: "Util".to_string(),
        last_modified: Some(1_700_000_000_000),
        ..ComponentMetadata::default()
    };
    let rows = meta.fields();
    assert!(rows
        .iter()
        .any(|(label, value)| *label == "Last modified (ms)" && value == "1700000000000"));
    assert!(!rows.iter().any(|(label, _)| label.contains("date")));

    let without = ComponentMetadata::default().fields();
    assert!(!without.iter().any(|(label, _)| label.starts_with("Last modified")));
}
