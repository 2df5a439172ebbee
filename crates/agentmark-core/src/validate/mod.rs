//! Multi-rule validator
//!
//! Rule classes run in a fixed order for every agent:
//!
//! ```text
//! presence ─▶ uniqueness ─▶ types ─▶ routing ─▶ references ─▶ expressions
//!                                                                  │
//!                         (no fatal findings for the agent) ───▶ hazards
//! ```
//!
//! Cross-agent rules (duplicate names, subgraph cycles) run once after all
//! agents. Findings are returned per document so the caller can merge them
//! with front-end findings in enumeration order.

mod cross_agent;
mod expressions;
mod hazards;
mod presence;
mod references;
mod routing;
mod types;
mod uniqueness;

use indexmap::IndexMap;
use std::collections::BTreeSet;

use crate::diagnostic::{Diagnostic, Findings};
use crate::graph::AgentGraph;
use crate::ir::{Agent, Edge, Project};
use crate::source::ScriptResolver;

pub use expressions::{ALLOWED_NAMES, ExpressionIssue, OPERATOR_KEYWORDS, scan_condition};

/// Agent that went through validation, with its folded routing edges
#[derive(Debug, Clone)]
pub struct ValidatedAgent {
    /// The agent model
    pub agent: Agent,
    /// Adjacency view built during validation
    pub graph: AgentGraph,
    /// Routing edges in order of first source appearance
    pub edges: Vec<Edge>,
}

/// Findings and result for one agent
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    /// Validated agent
    pub validated: ValidatedAgent,
    /// Findings for the agent's document
    pub diagnostics: Vec<Diagnostic>,
}

/// Everything the validator produces
#[derive(Debug, Clone, Default)]
pub struct Validation {
    /// Findings for the project document
    pub project: Vec<Diagnostic>,
    /// Per-agent outcomes in input order
    pub agents: Vec<AgentOutcome>,
    /// Findings spanning several agents
    pub cross_agent: Vec<Diagnostic>,
}

/// Input to one validation run
#[derive(Debug, Default)]
pub struct ValidationInput<'a> {
    /// Project configuration, if the project document produced one
    pub project: Option<&'a Project>,
    /// Agents in enumeration order
    pub agents: Vec<Agent>,
    /// Names of agents whose documents failed structurally
    pub blocked: BTreeSet<String>,
    /// Documents that already carry fatal front-end findings
    pub tainted: BTreeSet<String>,
}

/// Agents by name (first declaration wins)
pub(crate) type AgentIndex<'a> = IndexMap<&'a str, &'a Agent>;

/// Validator over a whole project
pub struct Validator<'a> {
    resolver: &'a dyn ScriptResolver,
}

impl<'a> Validator<'a> {
    /// Create a validator resolving scripts through `resolver`
    pub fn new(resolver: &'a dyn ScriptResolver) -> Self {
        Self { resolver }
    }

    /// Validate a project and its agents
    pub fn validate(&self, input: ValidationInput<'_>) -> Validation {
        let mut validation = Validation::default();

        if let Some(project) = input.project {
            let mut findings = Findings::new(&project.document);
            presence::check_project(project, &mut findings);
            uniqueness::check_project(project, &mut findings);
            validation.project = findings.into_vec();
        }

        let mut index: AgentIndex = IndexMap::new();
        for agent in &input.agents {
            index.entry(agent.name.as_str()).or_insert(agent);
        }

        let mut outcomes = Vec::with_capacity(input.agents.len());
        for agent in &input.agents {
            let tainted = input.tainted.contains(&agent.document);
            let (graph, edges, diagnostics) =
                self.validate_agent(agent, input.project, &index, &input.blocked, tainted);
            tracing::debug!(
                agent = %agent.name,
                findings = diagnostics.len(),
                "Validated agent"
            );
            outcomes.push((graph, edges, diagnostics));
        }

        validation.cross_agent = cross_agent::check(&input.agents, &index);

        validation.agents = input
            .agents
            .into_iter()
            .zip(outcomes)
            .map(|(agent, (graph, edges, diagnostics))| AgentOutcome {
                validated: ValidatedAgent {
                    agent,
                    graph,
                    edges,
                },
                diagnostics,
            })
            .collect();
        validation
    }

    fn validate_agent(
        &self,
        agent: &Agent,
        project: Option<&Project>,
        index: &AgentIndex,
        blocked: &BTreeSet<String>,
        tainted: bool,
    ) -> (AgentGraph, Vec<Edge>, Vec<Diagnostic>) {
        let mut findings = Findings::new(&agent.document);
        let graph = AgentGraph::build(agent);

        presence::check_agent(agent, project, &mut findings);
        if findings.has_errors() {
            return (graph, Vec::new(), findings.into_vec());
        }

        uniqueness::check_agent(agent, &mut findings);
        types::check_agent(agent, &mut findings);
        let edges = routing::check_agent(agent, &graph, &mut findings);
        references::check_agent(agent, index, blocked, self.resolver, &mut findings);
        expressions::check_agent(agent, &mut findings);

        if !tainted && !findings.has_errors() {
            hazards::check_agent(agent, &graph, &mut findings);
        }

        (graph, edges, findings.into_vec())
    }
}
