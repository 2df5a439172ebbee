//! Build the Python service

use std::path::Path;

use agentmark_codegen::{Compilation, CompileOptions, Compiler};
use agentmark_core::FsProject;
use anyhow::{Context, Result};

use super::{Outcome, print_report};

/// Run the build command
pub async fn run(project_path: &str, output: &str, strict: bool, dry_run: bool) -> Result<Outcome> {
    tracing::info!("Building project: {}", project_path);

    let project = FsProject::open(project_path).context("Failed to open project")?;
    let compiler = Compiler::new(CompileOptions { strict });
    let compilation = compiler
        .compile_project(&project, &project)
        .context("Compilation failed")?;

    let built = match compilation {
        Compilation::Rejected(report) => {
            print_report(&report);
            tracing::info!("✗ Build failed ({})", report.summary());
            return Ok(Outcome::Invalid);
        }
        Compilation::Built(built) => built,
    };
    print_report(&built.report);

    let output_dir = project.root().join(output);
    if dry_run {
        for artifact in &built.artifacts {
            tracing::info!(
                "  {} ({} bytes)",
                output_dir.join(&artifact.path).display(),
                artifact.contents.len()
            );
        }
        tracing::info!("Dry run: nothing written (hash: {}...)", &built.content_hash()[..8]);
        return Ok(Outcome::Success);
    }

    write_artifacts(&output_dir, &built.artifacts).await?;
    tracing::info!(
        "✓ Wrote {} files to {} (hash: {}...)",
        built.artifacts.len(),
        output_dir.display(),
        &built.content_hash()[..8]
    );
    Ok(Outcome::Success)
}

async fn write_artifacts(dir: &Path, artifacts: &[agentmark_codegen::Artifact]) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
    for artifact in artifacts {
        let path = dir.join(&artifact.path);
        tokio::fs::write(&path, &artifact.contents)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::debug!("Wrote {}", path.display());
    }
    Ok(())
}
