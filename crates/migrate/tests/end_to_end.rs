//! End-to-end migrations between two in-memory systems.
//!
//! The source system holds a pipeline `P` calling `util()`, defined by a
//! template that lives in library `L`. `L` is not enabled for `P` at the
//! source, so a naive copy would leave `P` with a missing reference.

use std::sync::Arc;

use conveyor_analyze::ConflictDetector;
use conveyor_interchange::{ComponentKind, ComponentRef, Version};
use conveyor_migrate::{
    Engine, EngineError, Event, IdentityAction, LeafStatus, MigrationOptions, SatelliteStatus,
    SystemSpec,
};
use conveyor_storage::{ComponentStore, MemoryStore};

const UTIL: &str = r#"<codeTemplate version="3.9.1">
  <id>t-util</id>
  <name>Util</name>
  <revision>1</revision>
  <lastModified><time>1700000000000</time></lastModified>
  <properties class="com.mirth.connect.model.codetemplates.BasicCodeTemplateProperties">
    <type>FUNCTION</type>
    <code>function util() { return 1; }</code>
  </properties>
</codeTemplate>"#;

const PIPELINE: &str = r#"<channel version="3.9.1">
  <id>p1</id>
  <name>P</name>
  <revision>4</revision>
  <sourceConnector version="3.9.1">
    <transformer>
      <elements>
        <step><name>map</name><script>var x = util();</script><enabled>true</enabled></step>
      </elements>
    </transformer>
  </sourceConnector>
  <properties><clearGlobalChannelMap>true</clearGlobalChannelMap></properties>
  <exportData><metadata><enabled>true</enabled></metadata></exportData>
</channel>"#;

const LIBRARIES: &str = r#"<list>
  <codeTemplateLibrary version="3.9.1">
    <id>lib-l</id>
    <name>L</name>
    <revision>1</revision>
    <description>shared helpers</description>
    <includeNewChannels>false</includeNewChannels>
    <enabledChannelIds/>
    <disabledChannelIds/>
    <codeTemplates><codeTemplate version="3.9.1"><id>t-util</id></codeTemplate></codeTemplates>
  </codeTemplateLibrary>
</list>"#;

fn source_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new("source", Version::new(3, 9, 1)));
    store.seed(ComponentKind::ScriptTemplate, UTIL).unwrap();
    store.seed(ComponentKind::Pipeline, PIPELINE).unwrap();
    store.seed(ComponentKind::ScriptLibrary, LIBRARIES).unwrap();
    store
}

fn engine(source: Arc<MemoryStore>, destination: Arc<MemoryStore>) -> Engine {
    Engine::new(
        vec![
            SystemSpec {
                name: "source".into(),
                fingerprint: "s".into(),
                store: source,
            },
            SystemSpec {
                name: "destination".into(),
                fingerprint: "d".into(),
                store: destination,
            },
        ],
        Vec::<String>::new(),
    )
    .unwrap()
}

fn p1() -> Vec<ComponentRef> {
    vec![ComponentRef::new(ComponentKind::Pipeline, "p1")]
}

fn position(events: &[Event], wanted: impl Fn(&Event) -> bool) -> usize {
    events.iter().position(|e| wanted(e)).unwrap()
}

const WITH_TEMPLATES: MigrationOptions = MigrationOptions {
    include_referenced_templates: true,
};

// ──────────────────────────────────────────────
// Library bootstrap
// ──────────────────────────────────────────────

#[test]
fn pipeline_with_unlinked_library_arrives_linked() {
    let destination = Arc::new(MemoryStore::new("destination", Version::new(3, 10, 0)));
    let engine = engine(source_store(), Arc::clone(&destination));

    let report = engine
        .migrate("source", "destination", &p1(), WITH_TEMPLATES)
        .unwrap();
    assert!(report.is_success(), "{report:?}");
    assert_eq!(report.success.len(), 2);
    assert!(report.remaps.is_empty());

    // template, then the library that links P, then P itself
    let kinds: Vec<ComponentKind> = destination.puts().iter().map(|p| p.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ComponentKind::ScriptTemplate,
            ComponentKind::ScriptLibrary,
            ComponentKind::Pipeline,
        ]
    );

    let created = position(&report.events, |e| {
        matches!(e, Event::ContainerCreated { kind: ComponentKind::ScriptLibrary, name, .. } if name == "L")
    });
    let linked = position(&report.events, |e| {
        matches!(e, Event::PipelineLinked { library_name, pipeline_id, .. } if library_name == "L" && pipeline_id == "p1")
    });
    let pushed = position(&report.events, |e| {
        matches!(e, Event::LeafPushed { kind: ComponentKind::Pipeline, .. })
    });
    assert!(created < linked && linked < pushed);

    // the pipeline was converted to the destination schema
    let puts = destination.puts();
    let pushed_pipeline = &puts[2].content;
    assert!(pushed_pipeline.contains(r#"version="3.10.0""#));
    assert!(pushed_pipeline.contains("<userId>1</userId>"));

    engine.refresh("destination").unwrap();
    let snapshot = engine.system("destination").unwrap().snapshot(&Default::default()).unwrap();
    let validation = ConflictDetector::new(&snapshot).validate_pipeline("p1");
    assert!(validation.missing_references.is_empty(), "{validation:?}");
    assert!(validation.unknown_functions.is_empty());
}

#[test]
fn second_run_changes_no_satellite() {
    let destination = Arc::new(MemoryStore::new("destination", Version::new(3, 9, 1)));
    let engine = engine(source_store(), Arc::clone(&destination));

    engine
        .migrate("source", "destination", &p1(), WITH_TEMPLATES)
        .unwrap();
    let again = engine
        .migrate("source", "destination", &p1(), WITH_TEMPLATES)
        .unwrap();

    assert!(again
        .satellites
        .iter()
        .all(|s| s.status == SatelliteStatus::Unchanged));
    assert!(again
        .success
        .iter()
        .all(|l| l.action == Some(IdentityAction::Unchanged)));
    assert_eq!(destination.leaf_ids(ComponentKind::Pipeline), vec!["p1"]);
}

// ──────────────────────────────────────────────
// Identity
// ──────────────────────────────────────────────

#[test]
fn same_name_is_updated_in_place() {
    let destination = Arc::new(MemoryStore::new("destination", Version::new(3, 9, 1)));
    destination
        .seed(
            ComponentKind::Pipeline,
            r#"<channel version="3.9.1"><id>d-p</id><name>P</name><revision>1</revision></channel>"#,
        )
        .unwrap();
    let engine = engine(source_store(), Arc::clone(&destination));

    let report = engine
        .migrate("source", "destination", &p1(), MigrationOptions::default())
        .unwrap();

    assert_eq!(report.remaps, vec!["p1:d-p"]);
    assert_eq!(report.success[0].action, Some(IdentityAction::UpdateInPlace));
    assert_eq!(destination.leaf_ids(ComponentKind::Pipeline), vec!["d-p"]);
    assert!(destination.fetch(ComponentKind::Pipeline, "d-p").unwrap().contains("util()"));
}

// ──────────────────────────────────────────────
// Failures
// ──────────────────────────────────────────────

#[test]
fn rejected_pipeline_is_unlinked_again() {
    let destination = Arc::new(MemoryStore::new("destination", Version::new(3, 9, 1)));
    destination.reject(ComponentKind::Pipeline, Some("p1"));
    let engine = engine(source_store(), Arc::clone(&destination));

    let report = engine
        .migrate("source", "destination", &p1(), WITH_TEMPLATES)
        .unwrap();

    assert_eq!(report.failure.len(), 1);
    let failed = &report.failure[0];
    assert_eq!(failed.status, LeafStatus::Failed);
    assert_eq!(failed.response.as_ref().map(|r| r.status), Some(500));

    let last_library_push = destination
        .puts()
        .into_iter()
        .filter(|p| p.kind == ComponentKind::ScriptLibrary)
        .last()
        .unwrap();
    assert!(last_library_push.content.contains("<id>t-util</id>"));
    assert!(!last_library_push.content.contains("<string>p1</string>"));
}

#[test]
fn unknown_reference_is_a_failed_leaf() {
    let destination = Arc::new(MemoryStore::new("destination", Version::new(3, 9, 1)));
    let engine = engine(source_store(), Arc::clone(&destination));

    let report = engine
        .migrate(
            "source",
            "destination",
            &[ComponentRef::new(ComponentKind::Pipeline, "nope")],
            MigrationOptions::default(),
        )
        .unwrap();
    assert_eq!(report.failure.len(), 1);
    assert!(report.success.is_empty());
    assert!(destination.puts().is_empty());
}

#[test]
fn unreachable_destination_aborts_before_any_push() {
    let destination = Arc::new(MemoryStore::new("destination", Version::new(3, 9, 1)));
    destination.set_available(false);
    let engine = engine(source_store(), Arc::clone(&destination));

    let err = engine
        .migrate("source", "destination", &p1(), MigrationOptions::default())
        .unwrap_err();
    assert!(matches!(err, EngineError::Store { ref system, .. } if system == "destination"));
}

// ──────────────────────────────────────────────
// Satellites
// ──────────────────────────────────────────────

#[test]
fn group_and_tag_memberships_follow_the_pipeline() {
    let source = source_store();
    source
        .seed(
            ComponentKind::PipelineGroup,
            "<list><channelGroup><id>g1</id><name>Inbound</name>\
             <channels><channel><id>p1</id></channel></channels></channelGroup></list>",
        )
        .unwrap();
    source
        .seed(
            ComponentKind::PipelineTag,
            "<set><channelTag><id>tag1</id><name>HL7</name>\
             <channelIds><string>p1</string></channelIds></channelTag></set>",
        )
        .unwrap();
    let destination = Arc::new(MemoryStore::new("destination", Version::new(3, 9, 1)));
    let engine = engine(source, Arc::clone(&destination));

    let report = engine
        .migrate("source", "destination", &p1(), MigrationOptions::default())
        .unwrap();

    let applied: Vec<ComponentKind> = report
        .satellites
        .iter()
        .filter(|s| s.status == SatelliteStatus::Applied && !s.bootstrap)
        .map(|s| s.kind)
        .collect();
    assert!(applied.contains(&ComponentKind::PipelineGroup));
    assert!(applied.contains(&ComponentKind::PipelineTag));

    let groups = destination.fetch_all(ComponentKind::PipelineGroup).unwrap();
    assert!(groups.contains("<name>Inbound</name>"));
    assert!(groups.contains("<id>p1</id>"));
    let tags = destination.fetch_all(ComponentKind::PipelineTag).unwrap();
    assert!(tags.contains("<string>p1</string>"));
}
