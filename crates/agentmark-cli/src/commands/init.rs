//! Initialize a new AgentMark project

use std::path::Path;

use agentmark_core::source::{AGENTS_DIR, PROJECT_FILE, TOOLS_DIR};
use anyhow::{Context, Result};

use super::Outcome;

const EXAMPLE_AGENT: &str = r#"<agent name="assistant" version="0.1.0" description="Answers questions, counting words when asked.">
  <state>
    <field name="question" type="string" required="true"/>
    <field name="answer" type="string"/>
  </state>
  <tools>
    <tool id="word_count" type="script_tool" path="example_tool.py" description="Count the words in a piece of text.">
      <parameters>
        <param name="text" type="string" description="Text to count"/>
      </parameters>
    </tool>
  </tools>
  <graph>
    <node id="respond" type="llm">
      <system_prompt>You are a helpful assistant. Answer the question: ${question}</system_prompt>
      <tool_bind ref="word_count"/>
      <output_schema>
        <field name="answer" type="string" description="Final answer"/>
      </output_schema>
    </node>
    <edge source="__START__" target="respond"/>
    <edge source="respond" target="__END__"/>
  </graph>
</agent>
"#;

const EXAMPLE_TOOL: &str = r#""""Example tool script.

Tools receive their declared parameters as keyword arguments and return a
dict that is handed back to the model.
"""


def run(**kwargs) -> dict:
    text = str(kwargs.get("text", ""))
    return {"words": len(text.split())}
"#;

const GITIGNORE: &str = r#"# Build output
build/

# Local secrets
.env

# Python
__pycache__/
*.pyc
.venv/

# IDE
.idea/
.vscode/
*.swp
"#;

const ENV_EXAMPLE: &str = "OPENAI_API_KEY=  # Required\n";

fn project_document(name: &str) -> String {
    let name = name
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;");
    format!(
        r#"<project name="{name}" spec_version="2.0">
  <config>
    <llm provider="openai" model="gpt-4o-mini" max_retries="2"/>
    <env>
      <var name="OPENAI_API_KEY" required="true"/>
    </env>
    <limits max_steps="25"/>
  </config>
</project>
"#
    )
}

/// Run the init command
pub async fn run(path: &str, name: Option<&str>) -> Result<Outcome> {
    let project_dir = Path::new(path);

    if tokio::fs::try_exists(project_dir).await.unwrap_or(true) {
        anyhow::bail!("'{}' already exists", project_dir.display());
    }

    // Derive project name from directory name if not provided
    let project_name = match name {
        Some(n) => n.to_string(),
        None => project_dir
            .file_name()
            .and_then(|n| n.to_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("Could not determine project name from path"))?,
    };

    tracing::info!("Creating new AgentMark project: {}", project_name);

    for dir in [AGENTS_DIR, TOOLS_DIR, "build"] {
        let dir = project_dir.join(dir);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let files = [
        (
            project_dir.join(AGENTS_DIR).join(PROJECT_FILE),
            project_document(&project_name),
        ),
        (
            project_dir.join(AGENTS_DIR).join("assistant.amk"),
            EXAMPLE_AGENT.to_string(),
        ),
        (
            project_dir.join(TOOLS_DIR).join("example_tool.py"),
            EXAMPLE_TOOL.to_string(),
        ),
        (project_dir.join(".env.example"), ENV_EXAMPLE.to_string()),
        (project_dir.join(".gitignore"), GITIGNORE.to_string()),
    ];
    for (file, contents) in &files {
        tokio::fs::write(file, contents)
            .await
            .with_context(|| format!("Failed to write {}", file.display()))?;
    }

    tracing::info!(
        "✓ Created project '{}' at {}",
        project_name,
        project_dir.display()
    );
    tracing::info!("");
    tracing::info!("Next steps:");
    tracing::info!("  cd {}", project_dir.display());
    tracing::info!("  agentmark validate    # Check every agent");
    tracing::info!("  agentmark build       # Generate the service into build/");

    Ok(Outcome::Success)
}
