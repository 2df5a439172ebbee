//! Compilation driver
//!
//! Runs generation over an [`Analysis`] once the whole project validated:
//! one `compiled_<agent>.py` per agent, then the service files. Nothing is
//! produced when any error-level finding exists.

use std::collections::BTreeSet;

use agentmark_core::{Analysis, DocumentSource, ScriptResolver, ValidationReport, analyze};
use sha2::{Digest, Sha256};

use crate::assembler::ServiceAssembler;
use crate::error::Result;
use crate::generator::{ModuleGenerator, module_name};

/// Options for the compiler
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Treat hazard warnings as fatal
    pub strict: bool,
}

/// One generated file, relative to the output directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Relative path
    pub path: String,
    /// File contents
    pub contents: String,
}

/// Files produced by a successful compilation
#[derive(Debug, Clone)]
pub struct BuildOutput {
    /// Generated files, agent modules first
    pub artifacts: Vec<Artifact>,
    /// Findings (warnings only)
    pub report: ValidationReport,
}

impl BuildOutput {
    /// Artifact by relative path
    pub fn artifact(&self, path: &str) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.path == path)
    }

    /// SHA-256 over every artifact's path and contents
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for artifact in &self.artifacts {
            hasher.update(artifact.path.as_bytes());
            hasher.update([0]);
            hasher.update(artifact.contents.as_bytes());
            hasher.update([0]);
        }
        hex::encode(hasher.finalize())
    }
}

/// Outcome of a compilation
#[derive(Debug, Clone)]
pub enum Compilation {
    /// Validation failed; no artifacts were produced
    Rejected(ValidationReport),
    /// Every agent generated
    Built(BuildOutput),
}

/// AgentMark compiler
#[derive(Debug, Clone, Default)]
pub struct Compiler {
    options: CompileOptions,
}

impl Compiler {
    /// Create a new compiler with the given options
    pub fn new(options: CompileOptions) -> Self {
        Self { options }
    }

    /// Analyse and compile a project in one step
    pub fn compile_project(
        &self,
        source: &dyn DocumentSource,
        resolver: &dyn ScriptResolver,
    ) -> Result<Compilation> {
        let analysis = analyze(source, resolver)?;
        self.compile(&analysis)
    }

    /// Generate artifacts for an analysed project
    pub fn compile(&self, analysis: &Analysis) -> Result<Compilation> {
        let project = match &analysis.project {
            Some(project) if analysis.is_success(self.options.strict) => project,
            _ => {
                tracing::info!(
                    errors = analysis.report.errors().len(),
                    warnings = analysis.report.warnings().len(),
                    strict = self.options.strict,
                    "Validation failed, nothing generated"
                );
                return Ok(Compilation::Rejected(analysis.report.clone()));
            }
        };

        let known: BTreeSet<String> = analysis
            .agents
            .iter()
            .map(|v| v.agent.name.clone())
            .collect();
        let mut agents: Vec<_> = analysis.agents.iter().collect();
        agents.sort_by(|a, b| a.agent.name.cmp(&b.agent.name));

        let mut artifacts = Vec::with_capacity(agents.len() + 3);
        for validated in agents {
            let contents = ModuleGenerator::new(validated, project, &known).generate()?;
            artifacts.push(Artifact {
                path: format!("{}.py", module_name(&validated.agent.name)),
                contents,
            });
        }

        let assembler = ServiceAssembler::new(project, &analysis.agents)?;
        artifacts.push(Artifact {
            path: "main.py".to_string(),
            contents: assembler.main_py()?,
        });
        artifacts.push(Artifact {
            path: "requirements.txt".to_string(),
            contents: assembler.requirements()?,
        });
        artifacts.push(Artifact {
            path: ".env.example".to_string(),
            contents: assembler.env_example()?,
        });

        let output = BuildOutput {
            artifacts,
            report: analysis.report.clone(),
        };
        tracing::info!(
            agents = known.len(),
            files = output.artifacts.len(),
            hash = %output.content_hash(),
            "Compiled project"
        );
        Ok(Compilation::Built(output))
    }
}
