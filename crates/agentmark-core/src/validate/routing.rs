//! Graph well-formedness rules and folding of edge declarations
//!
//! Edges sharing a source must all belong to one routing category.
//! Once a source's group passes its rules it is folded into the closed
//! [`Edge`] variants the generator consumes.

use crate::diagnostic::{Code, Findings};
use crate::graph::AgentGraph;
use crate::ir::{
    Agent, ConditionalBranch, END, Edge, EdgeCategory, EdgeDecl, START, is_identifier,
    is_reserved,
};

pub(super) fn check_agent(agent: &Agent, graph: &AgentGraph, findings: &mut Findings) -> Vec<Edge> {
    if graph.outgoing(START).is_empty() {
        findings.error(
            Code::NoEntry,
            agent.graph_block,
            format!("agent '{}' has no edge from {}", agent.name, START),
        );
    }

    for decl in &agent.edges {
        if decl.source != START && !graph.contains_node(&decl.source) {
            findings.error(
                Code::UnknownSource,
                Some(decl.position),
                if decl.source == END {
                    format!("edges cannot leave {}", END)
                } else {
                    format!("edge source '{}' is not a declared node", decl.source)
                },
            );
        }
        if decl.target != END && !graph.contains_node(&decl.target) {
            findings.error(
                Code::UnknownTarget,
                Some(decl.position),
                if decl.target == START {
                    format!("edges cannot target {}", START)
                } else {
                    format!("edge target '{}' is not a declared node", decl.target)
                },
            );
        }
    }

    let reachable = graph.reachable_from(START, None);
    for node in &agent.nodes {
        if !reachable.contains(&node.id) {
            findings.error(
                Code::Unreachable,
                Some(node.position),
                format!("node '{}' is not reachable from {}", node.id, START),
            );
        }
    }
    for node in &agent.nodes {
        if graph.outgoing(&node.id).is_empty() {
            findings.error(
                Code::NoOutgoingEdge,
                Some(node.position),
                format!(
                    "node '{}' has no outgoing edge (route it to {} to finish)",
                    node.id, END
                ),
            );
        }
    }

    let mut edges = Vec::new();
    for (source, indices) in graph.sources() {
        let decls: Vec<&EdgeDecl> = indices.iter().map(|&i| &agent.edges[i]).collect();
        let category = decls[0].category();
        if let Some(other) = decls.iter().find(|d| d.category() != category) {
            findings.error(
                Code::MixedEdgeTypes,
                Some(other.position),
                format!(
                    "edges from '{}' mix {} and {} routing",
                    source,
                    category,
                    other.category()
                ),
            );
            continue;
        }
        match category {
            EdgeCategory::Unconditional => {
                edges.extend(decls.iter().map(|d| Edge::Unconditional {
                    source: source.to_string(),
                    target: d.target.clone(),
                }));
            }
            EdgeCategory::Conditional => {
                if let Some(edge) = conditional_group(source, &decls, findings) {
                    edges.push(edge);
                }
            }
            EdgeCategory::Map => {
                if let Some(edge) = map_edge(agent, source, &decls, findings) {
                    edges.push(edge);
                }
            }
        }
    }
    edges
}

fn conditional_group(source: &str, decls: &[&EdgeDecl], findings: &mut Findings) -> Option<Edge> {
    let defaults: Vec<&&EdgeDecl> = decls.iter().filter(|d| d.default).collect();
    let mut ok = true;
    for decl in &defaults {
        if decl.condition.is_some() {
            findings.error(
                Code::DefaultWithCondition,
                decl.condition_position.or(Some(decl.position)),
                format!("default edge from '{}' cannot carry a condition", source),
            );
            ok = false;
        }
    }
    match defaults.len() {
        0 => {
            findings.error(
                Code::MissingDefault,
                Some(decls[0].position),
                format!(
                    "conditional edges from '{}' need exactly one default edge (default=\"true\"); none found",
                    source
                ),
            );
            return None;
        }
        1 => {}
        _ => {
            findings.error(
                Code::MultipleDefaults,
                Some(defaults[1].position),
                format!(
                    "conditional edges from '{}' have {} default edges; exactly one is allowed",
                    source,
                    defaults.len()
                ),
            );
            return None;
        }
    }
    if !ok {
        return None;
    }
    let branches = decls
        .iter()
        .filter(|d| !d.default)
        .map(|d| ConditionalBranch {
            condition: d.condition.clone().unwrap_or_default(),
            target: d.target.clone(),
        })
        .collect();
    Some(Edge::ConditionalGroup {
        source: source.to_string(),
        branches,
        default: defaults[0].target.clone(),
    })
}

fn map_edge(
    agent: &Agent,
    source: &str,
    decls: &[&EdgeDecl],
    findings: &mut Findings,
) -> Option<Edge> {
    if decls.len() > 1 {
        findings.error(
            Code::MixedEdgeTypes,
            Some(decls[1].position),
            format!(
                "map source '{}' must have exactly one outgoing edge, found {}",
                source,
                decls.len()
            ),
        );
        return None;
    }
    let decl = decls[0];
    let spec = decl.map.as_ref()?;
    let mut ok = true;
    match agent.field(&spec.items_field) {
        Some(field) if field.ty.is_list() => {}
        Some(field) => {
            findings.error(
                Code::MapItemsNotList,
                Some(decl.position),
                format!(
                    "map items field '{}' must be a list, but it is {}",
                    spec.items_field, field.ty
                ),
            );
            ok = false;
        }
        None => {
            findings.error(
                Code::MapItemsNotList,
                Some(decl.position),
                format!(
                    "map items field '{}' is not a declared state field",
                    spec.items_field
                ),
            );
            ok = false;
        }
    }
    if !is_identifier(&spec.item_var) || is_reserved(&spec.item_var) {
        findings.error(
            Code::InvalidIdentifier,
            Some(decl.position),
            format!("map item variable '{}' is not a valid identifier", spec.item_var),
        );
        ok = false;
    }
    ok.then(|| Edge::Map {
        source: source.to_string(),
        target: decl.target.clone(),
        items_field: spec.items_field.clone(),
        item_var: spec.item_var.clone(),
    })
}
