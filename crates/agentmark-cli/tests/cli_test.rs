use std::fs;
use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

fn init(dir: &Path) {
    cargo_bin_cmd!("agentmark")
        .args(["init", dir.to_str().unwrap(), "--name", "demo"])
        .assert()
        .success();
}

#[test]
fn test_init_validate_and_build() {
    let root = tempfile::tempdir().unwrap();
    let project = root.path().join("demo");
    init(&project);

    assert!(project.join("agents/_project.amk").exists());
    assert!(project.join("agents/assistant.amk").exists());
    assert!(project.join("tools/example_tool.py").exists());
    assert!(project.join(".gitignore").exists());
    assert!(project.join(".env.example").exists());
    let project_doc = fs::read_to_string(project.join("agents/_project.amk")).unwrap();
    assert!(project_doc.contains("name=\"demo\""));

    cargo_bin_cmd!("agentmark")
        .args(["--project", project.to_str().unwrap(), "validate"])
        .assert()
        .success();

    cargo_bin_cmd!("agentmark")
        .args(["--project", project.to_str().unwrap(), "build"])
        .assert()
        .success();

    let build = project.join("build");
    let module = fs::read_to_string(build.join("compiled_assistant.py")).unwrap();
    assert!(module.contains("graph = graph_builder.compile()"));
    assert!(module.contains("word_count"));
    let main = fs::read_to_string(build.join("main.py")).unwrap();
    assert!(main.contains("@app.post(\"/run/assistant\""));
    let requirements = fs::read_to_string(build.join("requirements.txt")).unwrap();
    assert!(requirements.contains("langchain-openai>=0.1.0"));
    let env = fs::read_to_string(build.join(".env.example")).unwrap();
    assert_eq!(env, "OPENAI_API_KEY=  # Required\n");
}

#[test]
fn test_build_is_byte_identical() {
    let root = tempfile::tempdir().unwrap();
    let project = root.path().join("demo");
    init(&project);

    let mut outputs = Vec::new();
    for out in ["first", "second"] {
        cargo_bin_cmd!("agentmark")
            .args(["--project", project.to_str().unwrap(), "build", "--output", out])
            .assert()
            .success();
        outputs.push(fs::read_to_string(project.join(out).join("compiled_assistant.py")).unwrap());
    }
    assert_eq!(outputs[0], outputs[1]);
}

#[test]
fn test_dry_run_writes_nothing() {
    let root = tempfile::tempdir().unwrap();
    let project = root.path().join("demo");
    init(&project);

    cargo_bin_cmd!("agentmark")
        .args(["--project", project.to_str().unwrap(), "build", "--output", "out", "--dry-run"])
        .assert()
        .success();
    assert!(!project.join("out").exists());
}

#[test]
fn test_invalid_project_exits_one() {
    let root = tempfile::tempdir().unwrap();
    let project = root.path().join("demo");
    init(&project);
    fs::write(
        project.join("agents/broken.amk"),
        r#"<agent name="broken">
  <state><field name="count" type="int" reducer="append"/></state>
  <graph>
    <node id="think" type="llm"/>
    <edge source="__START__" target="think"/>
    <edge source="think" target="__END__"/>
  </graph>
</agent>
"#,
    )
    .unwrap();

    cargo_bin_cmd!("agentmark")
        .args(["--project", project.to_str().unwrap(), "build"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("E108"));
    assert!(!project.join("build/main.py").exists());
}

#[test]
fn test_validate_json_report() {
    let root = tempfile::tempdir().unwrap();
    let project = root.path().join("demo");
    init(&project);
    fs::remove_file(project.join("tools/example_tool.py")).unwrap();

    let output = cargo_bin_cmd!("agentmark")
        .args(["--project", project.to_str().unwrap(), "validate", "--json"])
        .assert()
        .code(1)
        .get_output()
        .stdout
        .clone();
    let report: serde_json::Value = serde_json::from_slice(&output).unwrap();
    let diagnostics = report["diagnostics"].as_array().unwrap();
    let missing = diagnostics
        .iter()
        .find(|d| d["code"] == "E308")
        .expect("missing script reported");
    assert_eq!(missing["severity"], "error");
    assert_eq!(missing["document"], "agents/assistant.amk");
    assert!(missing["message"].as_str().unwrap().contains("example_tool.py"));
}

#[test]
fn test_missing_project_exits_two() {
    let root = tempfile::tempdir().unwrap();
    cargo_bin_cmd!("agentmark")
        .args(["--project", root.path().to_str().unwrap(), "validate"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("agents/ directory not found"));
}

#[test]
fn test_init_refuses_existing_path() {
    let root = tempfile::tempdir().unwrap();
    cargo_bin_cmd!("agentmark")
        .args(["init", root.path().to_str().unwrap()])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("already exists"));
}
