//! Validate project command

use agentmark_core::{FsProject, analyze};
use anyhow::{Context, Result};

use super::{Outcome, print_report};

/// Run the validate command
pub async fn run(project_path: &str, strict: bool, json: bool) -> Result<Outcome> {
    tracing::info!("Validating project: {}", project_path);

    let project = FsProject::open(project_path).context("Failed to open project")?;
    let analysis = analyze(&project, &project).context("Failed to read project documents")?;

    if json {
        let report =
            serde_json::to_string_pretty(&analysis.report).context("Failed to serialize report")?;
        println!("{}", report);
    } else {
        print_report(&analysis.report);
    }

    let summary = analysis.report.summary();
    if analysis.is_success(strict) {
        for name in analysis.agent_names() {
            tracing::info!("✓ Agent: {}", name);
        }
        tracing::info!("✓ Project is valid ({})", summary);
        Ok(Outcome::Success)
    } else {
        tracing::info!("✗ Validation failed ({})", summary);
        Ok(Outcome::Invalid)
    }
}
