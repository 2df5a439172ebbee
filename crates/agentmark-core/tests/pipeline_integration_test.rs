//! Integration tests for the front end over real project directories
//!
//! Tests use temporary directories with real file fixtures to verify:
//! - Document enumeration and reporting order
//! - Validation findings for the documented failure scenarios
//! - Hazard warnings and strict mode
//! - Cross-agent findings

use agentmark_core::{Code, FsProject, analyze};
use tempfile::TempDir;

/// Helper to create a temporary project with `agents/` and `tools/`.
///
/// Returns a `TempDir` that automatically cleans up when dropped.
fn setup_project() -> TempDir {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("agents")).unwrap();
    std::fs::create_dir_all(dir.path().join("tools")).unwrap();
    std::fs::write(
        dir.path().join("agents/_project.amk"),
        r#"<project name="integration" spec_version="2.0">
  <config>
    <llm provider="anthropic" model="claude-sonnet"/>
    <env><var name="SEARCH_KEY" required="true"/></env>
  </config>
</project>"#,
    )
    .unwrap();
    dir
}

fn write_agent(dir: &TempDir, name: &str, text: &str) {
    std::fs::write(dir.path().join("agents").join(format!("{}.amk", name)), text).unwrap();
}

fn codes(dir: &TempDir) -> Vec<Code> {
    let project = FsProject::open(dir.path()).unwrap();
    analyze(&project, &project)
        .unwrap()
        .report
        .diagnostics
        .iter()
        .map(|d| d.code)
        .collect()
}

// =============================================================================
// Clean Projects
// =============================================================================

#[test]
fn test_complete_project_validates() {
    let dir = setup_project();
    std::fs::write(dir.path().join("tools/clean.py"), "def run(state):\n    return {}\n").unwrap();
    write_agent(
        &dir,
        "triage",
        r#"<agent name="triage" version="1.2.0">
  <state>
    <field name="ticket" type="string" required="true"/>
    <field name="tags" type="list[string]" reducer="append" default="[]"/>
    <field name="priority" type="enum" values="low, high" default="low"/>
    <field name="summary" type="string"/>
  </state>
  <tools>
    <tool id="search" type="api_call" max_retries="2">
      <endpoint url="https://search.example.com/v1/${ticket}" method="GET"/>
      <headers><header name="Authorization" value="Bearer ${env:SEARCH_KEY}"/></headers>
      <parameters><param name="ticket" type="string" in="path"/></parameters>
      <returns><map api_field="summary" state_field="summary"/></returns>
    </tool>
  </tools>
  <graph>
    <node id="clean" type="script" path="clean.py"/>
    <node id="lookup" type="action" tool_ref="search"/>
    <node id="classify" type="llm">
      <system_prompt>Classify ${ticket} given ${summary}. Answer "low" or "high" && nothing else.</system_prompt>
      <output_schema><field name="priority" type="enum" values="low, high"/></output_schema>
    </node>
    <edge source="__START__" target="clean"/>
    <edge source="clean" target="lookup"/>
    <edge source="lookup" target="classify"/>
    <edge source="classify" target="__END__"><condition>state["priority"] == "low"</condition></edge>
    <edge source="classify" target="__END__" default="true"/>
  </graph>
</agent>"#,
    );
    let project = FsProject::open(dir.path()).unwrap();
    let analysis = analyze(&project, &project).unwrap();
    assert!(analysis.is_success(true), "{:?}", analysis.report);
    assert_eq!(analysis.agent_names(), vec!["triage"]);
    assert_eq!(analysis.project.unwrap().env[0].name, "SEARCH_KEY");
}

// =============================================================================
// Failure Scenarios
// =============================================================================

#[test]
fn test_append_on_non_list_is_rejected() {
    let dir = setup_project();
    write_agent(
        &dir,
        "notes",
        r#"<agent name="notes">
  <state><field name="notes" type="string" reducer="append"/></state>
  <graph>
    <node id="n" type="llm"/>
    <edge source="__START__" target="n"/>
    <edge source="n" target="__END__"/>
  </graph>
</agent>"#,
    );
    assert_eq!(codes(&dir), vec![Code::InvalidMergePolicy]);
}

#[test]
fn test_mutual_subgraphs_form_a_cycle() {
    let dir = setup_project();
    for (name, other) in [("ping", "pong"), ("pong", "ping")] {
        write_agent(
            &dir,
            name,
            &format!(
                r#"<agent name="{}">
  <state/>
  <graph>
    <node id="call" type="subgraph" agent_ref="{}"/>
    <edge source="__START__" target="call"/>
    <edge source="call" target="__END__"/>
  </graph>
</agent>"#,
                name, other
            ),
        );
    }
    let project = FsProject::open(dir.path()).unwrap();
    let analysis = analyze(&project, &project).unwrap();
    let cycles = analysis.report.with_code(Code::SubgraphCycle);
    assert_eq!(cycles.len(), 1);
    assert!(cycles[0].message.contains("ping -> pong -> ping"));
    assert_eq!(analysis.report.diagnostics.len(), 1);
}

#[test]
fn test_errors_from_several_documents_are_batched_in_order() {
    let dir = setup_project();
    write_agent(
        &dir,
        "a_first",
        r#"<agent name="a_first"><state><field name="x" type="number"/></state><graph/></agent>"#,
    );
    write_agent(&dir, "b_second", r#"<agent name="b_second"><state/></agent>"#);
    write_agent(&dir, "c_third", r#"<workflow/>"#);
    assert_eq!(
        codes(&dir),
        vec![
            Code::InvalidType,
            Code::NoEntry,
            Code::MissingBlock,
            Code::RootElement,
        ]
    );
}

// =============================================================================
// Hazards and Strict Mode
// =============================================================================

#[test]
fn test_overwrite_race_is_a_warning_unless_strict() {
    let dir = setup_project();
    write_agent(
        &dir,
        "fan",
        r#"<agent name="fan">
  <state><field name="answer" type="string"/></state>
  <graph>
    <node id="left" type="llm"><output_schema><field name="answer" type="string"/></output_schema></node>
    <node id="right" type="llm"><output_schema><field name="answer" type="string"/></output_schema></node>
    <edge source="__START__" target="left"/>
    <edge source="__START__" target="right"/>
    <edge source="left" target="__END__"/>
    <edge source="right" target="__END__"/>
  </graph>
</agent>"#,
    );
    let project = FsProject::open(dir.path()).unwrap();
    let analysis = analyze(&project, &project).unwrap();
    assert_eq!(analysis.report.warnings().len(), 1);
    assert!(analysis.report.errors().is_empty());
    assert!(analysis.is_success(false));
    assert!(!analysis.is_success(true));
}
