//! Project-wide rules: unique agent names and acyclic subgraph references

use std::collections::{BTreeSet, HashMap};

use crate::diagnostic::{Code, Diagnostic};
use crate::ir::{Agent, NodeKind};

use super::AgentIndex;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

pub(super) fn check<'a>(agents: &[Agent], index: &AgentIndex<'a>) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    for agent in agents {
        if let Some(first) = index.get(agent.name.as_str())
            && !std::ptr::eq(*first, agent)
        {
            diagnostics.push(Diagnostic::error(
                Code::DuplicateAgent,
                &agent.document,
                Some(agent.position),
                format!(
                    "agent name '{}' is already declared in {}",
                    agent.name, first.document
                ),
            ));
        }
    }

    let mut marks: HashMap<&'a str, Mark> = HashMap::new();
    let mut stack: Vec<&'a str> = Vec::new();
    let mut cycles: Vec<Vec<&'a str>> = Vec::new();
    for &name in index.keys() {
        if !marks.contains_key(name) {
            visit(name, index, &mut marks, &mut stack, &mut cycles);
        }
    }

    let mut reported = BTreeSet::new();
    for cycle in cycles {
        let canonical = canonicalize(&cycle);
        if !reported.insert(canonical.clone()) {
            continue;
        }
        let Some(first) = index.get(canonical[0]) else {
            continue;
        };
        let mut path = canonical.clone();
        path.push(canonical[0]);
        tracing::debug!(cycle = %path.join(" -> "), "Subgraph cycle");
        diagnostics.push(Diagnostic::error(
            Code::SubgraphCycle,
            &first.document,
            Some(first.position),
            format!("subgraph references form a cycle: {}", path.join(" -> ")),
        ));
    }
    diagnostics
}

/// Subgraph targets of `agent` that name a known agent, in node order
fn references<'a>(agent: &'a Agent, index: &AgentIndex) -> Vec<&'a str> {
    agent
        .nodes
        .iter()
        .filter_map(|node| match &node.kind {
            NodeKind::Subgraph(sub) if index.contains_key(sub.agent_ref.as_str()) => {
                Some(sub.agent_ref.as_str())
            }
            _ => None,
        })
        .collect()
}

fn visit<'a>(
    name: &'a str,
    index: &AgentIndex<'a>,
    marks: &mut HashMap<&'a str, Mark>,
    stack: &mut Vec<&'a str>,
    cycles: &mut Vec<Vec<&'a str>>,
) {
    marks.insert(name, Mark::Visiting);
    stack.push(name);
    if let Some(&agent) = index.get(name) {
        for next in references(agent, index) {
            match marks.get(next) {
                Some(Mark::Visiting) => {
                    if let Some(at) = stack.iter().position(|n| *n == next) {
                        cycles.push(stack[at..].to_vec());
                    }
                }
                Some(Mark::Done) => {}
                None => visit(next, index, marks, stack, cycles),
            }
        }
    }
    stack.pop();
    marks.insert(name, Mark::Done);
}

/// Rotate a cycle so it starts at its smallest name
fn canonicalize<'a>(cycle: &[&'a str]) -> Vec<&'a str> {
    let start = cycle
        .iter()
        .enumerate()
        .min_by_key(|(_, name)| **name)
        .map(|(i, _)| i)
        .unwrap_or(0);
    cycle[start..].iter().chain(&cycle[..start]).copied().collect()
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::{ValidationInput, Validator};
    use super::*;
    use crate::source::MemoryProject;

    fn subgraph_agent(name: &str, refs: &[&str]) -> Agent {
        let nodes: String = refs
            .iter()
            .enumerate()
            .map(|(i, r)| format!(r#"<node id="s{}" type="subgraph" agent_ref="{}"/>"#, i, r))
            .collect();
        let mut edges = String::new();
        let mut previous = "__START__".to_string();
        for i in 0..refs.len() {
            edges.push_str(&format!(r#"<edge source="{}" target="s{}"/>"#, previous, i));
            previous = format!("s{}", i);
        }
        edges.push_str(&format!(r#"<edge source="{}" target="__END__"/>"#, previous));
        agent(&format!(
            r#"<agent name="{}"><state/><graph>{}{}</graph></agent>"#,
            name, nodes, edges
        ))
    }

    fn cross(agents: Vec<Agent>) -> Vec<Diagnostic> {
        let resolver = MemoryProject::new();
        let project = project();
        Validator::new(&resolver)
            .validate(ValidationInput {
                project: Some(&project),
                agents,
                ..Default::default()
            })
            .cross_agent
    }

    #[test]
    fn test_mutual_subgraph_references_form_one_cycle() {
        let diagnostics = cross(vec![
            subgraph_agent("alpha", &["beta"]),
            subgraph_agent("beta", &["alpha"]),
        ]);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].code, Code::SubgraphCycle);
        assert!(diagnostics[0].message.contains("alpha -> beta -> alpha"));
        assert!(diagnostics[0].is_error());
    }

    #[test]
    fn test_self_reference_and_acyclic_chain() {
        let diagnostics = cross(vec![
            subgraph_agent("loop", &["loop"]),
            subgraph_agent("outer", &["inner"]),
            subgraph_agent("inner", &[]),
        ]);
        assert_eq!(codes(&diagnostics), vec![Code::SubgraphCycle]);
        assert!(diagnostics[0].message.contains("loop -> loop"));
    }

    #[test]
    fn test_cycle_reported_once_from_any_entry() {
        let diagnostics = cross(vec![
            subgraph_agent("c", &["a"]),
            subgraph_agent("a", &["b"]),
            subgraph_agent("b", &["c"]),
        ]);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("a -> b -> c -> a"));
        assert_eq!(diagnostics[0].document, "agents/test.amk");
    }

    #[test]
    fn test_duplicate_agent_names() {
        let mut second = subgraph_agent("dup", &[]);
        second.document = "agents/zz.amk".to_string();
        let diagnostics = cross(vec![subgraph_agent("dup", &[]), second]);
        assert_eq!(codes(&diagnostics), vec![Code::DuplicateAgent]);
        assert_eq!(diagnostics[0].document, "agents/zz.amk");
    }
}
