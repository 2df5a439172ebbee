//! Front-end pipeline over a whole project
//!
//! ```text
//! DocumentSource ──▶ normalize ──▶ parse ──▶ build ──┐
//!        (per document; structural findings stop    │
//!         that document only)                        ▼
//!                                       Validator (all agents at once)
//!                                                    │
//!                                                    ▼
//!                                     Analysis { agents, report }
//! ```
//!
//! Findings are reported in a fixed order: the project document, then each
//! agent document in enumeration order, then cross-agent findings.

use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::diagnostic::{Code, Diagnostic, ValidationReport};
use crate::error::Result;
use crate::ir::Project;
use crate::model::{Built, build_agent, build_project};
use crate::normalize::normalize;
use crate::source::{AGENTS_DIR, Document, DocumentSource, PROJECT_FILE, ScriptResolver};
use crate::tree::{Element, parse};
use crate::validate::{ValidatedAgent, ValidationInput, Validator};

/// Result of analysing a project
#[derive(Debug, Clone)]
pub struct Analysis {
    /// Project configuration, when the project document built
    pub project: Option<Project>,
    /// Agents that built, in enumeration order
    pub agents: Vec<ValidatedAgent>,
    /// Every finding in reporting order
    pub report: ValidationReport,
}

impl Analysis {
    /// Whether generation may proceed
    pub fn is_success(&self, strict: bool) -> bool {
        self.project.is_some() && self.report.is_success(strict)
    }

    /// Names of the agents that built
    pub fn agent_names(&self) -> Vec<&str> {
        self.agents.iter().map(|v| v.agent.name.as_str()).collect()
    }
}

/// Run the front end and validator over every document of a project
pub fn analyze(source: &dyn DocumentSource, resolver: &dyn ScriptResolver) -> Result<Analysis> {
    let project_doc = source.project_document()?;
    let agent_docs = source.agent_documents()?;
    info!(agents = agent_docs.len(), "Analyzing project");

    let mut project_findings = Vec::new();
    let project = match &project_doc {
        Some(doc) => {
            let built = front_end(doc, build_project);
            project_findings = built.diagnostics;
            built.model
        }
        None => {
            project_findings.push(Diagnostic::error(
                Code::MissingProject,
                format!("{}/{}", AGENTS_DIR, PROJECT_FILE),
                None,
                format!("project document {} not found", PROJECT_FILE),
            ));
            None
        }
    };

    let mut agents = Vec::new();
    let mut agent_findings = Vec::with_capacity(agent_docs.len());
    let mut blocked = BTreeSet::new();
    let mut tainted = BTreeSet::new();
    for doc in &agent_docs {
        let mut name = None;
        let built = front_end(doc, |root: &Element, id: &str| {
            name = root.attr("name").map(str::to_string);
            build_agent(root, id)
        });
        match built.model {
            Some(agent) => {
                if built.diagnostics.iter().any(Diagnostic::is_error) {
                    tainted.insert(doc.id.clone());
                }
                agents.push(agent);
            }
            None => {
                let name = name.unwrap_or_else(|| doc.stem().to_string());
                debug!(document = %doc.id, agent = %name, "Document blocked by structural errors");
                blocked.insert(name);
            }
        }
        agent_findings.push((doc.id.clone(), built.diagnostics));
    }

    let validation = Validator::new(resolver).validate(ValidationInput {
        project: project.as_ref(),
        agents,
        blocked,
        tainted,
    });

    let mut report = ValidationReport::new();
    report.extend(project_findings);
    report.extend(validation.project);

    let mut outcomes = validation.agents.into_iter().peekable();
    let mut validated = Vec::new();
    for (document, diagnostics) in agent_findings {
        report.extend(diagnostics);
        if let Some(outcome) = outcomes.next_if(|o| o.validated.agent.document == document) {
            report.extend(outcome.diagnostics);
            validated.push(outcome.validated);
        }
    }
    report.extend(validation.cross_agent);

    info!(
        agents = validated.len(),
        summary = %report.summary(),
        "Analysis complete"
    );
    Ok(Analysis {
        project,
        agents: validated,
        report,
    })
}

/// Normalize, parse and build one document
fn front_end<T>(doc: &Document, build: impl FnOnce(&Element, &str) -> Built<T>) -> Built<T> {
    let failed = |code: Code, error: crate::tree::SyntaxError| Built {
        model: None,
        diagnostics: vec![Diagnostic::error(
            code,
            &doc.id,
            Some(error.position),
            error.message,
        )],
    };

    let normalized = match normalize(&doc.text) {
        Ok(normalized) => normalized,
        Err(error) => return failed(Code::FreeTextSpan, error),
    };
    if normalized.escaped_spans > 0 {
        debug!(
            document = %doc.id,
            spans = normalized.escaped_spans,
            "Escaped reserved characters in free-text spans"
        );
    }
    let root = match parse(&normalized.text) {
        Ok(root) => root,
        Err(error) => return failed(Code::Malformed, error),
    };
    let built = build(&root, &doc.id);
    debug!(
        document = %doc.id,
        findings = built.diagnostics.len(),
        "Built document"
    );
    built
}
