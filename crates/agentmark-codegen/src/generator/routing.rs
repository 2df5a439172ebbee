//! Routers and graph assembly
//!
//! Conditional groups and map edges each get a router function. LLM nodes
//! with bound tools get a second router that loops through their ToolNode
//! until the model stops calling tools, then continues along the node's
//! declared edges.
//!
//! Fan-in: when every edge into a node comes from a different branch of the
//! same unconditional fan-out, the edges are emitted as one waiting edge
//! (`add_edge([a, b], join)`) so the node runs once after all branches.

use std::collections::BTreeSet;

use agentmark_core::Edge;
use agentmark_core::ir::{EdgeCategory, END, START};
use indexmap::IndexMap;

use super::{ModuleGenerator, Writer};
use crate::error::Result;
use crate::python;

/// Edges into `target` that are emitted as a single waiting edge
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Join {
    pub sources: Vec<String>,
    pub target: String,
}

impl ModuleGenerator<'_> {
    pub(super) fn emit_routers(&mut self, w: &mut Writer) -> Result<()> {
        let validated = self.validated;
        for edge in &validated.edges {
            match edge {
                Edge::Unconditional { .. } => {}
                Edge::ConditionalGroup {
                    source,
                    branches,
                    default,
                } => {
                    let router = &self.names.routers[source.as_str()];
                    w.block(format!("def {}(state: AgentState) -> str:", router), |w| {
                        for branch in branches {
                            w.block(format!("if {}:", condition(&branch.condition)), |w| {
                                w.line(format!("return {}", Self::endpoint(&branch.target)));
                            });
                        }
                        w.line(format!("return {}", Self::endpoint(default)));
                    });
                    w.gap();
                }
                Edge::Map {
                    source,
                    target,
                    items_field,
                    item_var,
                } => {
                    self.imports.name("langgraph.types", "Send");
                    let router = &self.names.routers[source.as_str()];
                    w.block(
                        format!("def {}(state: AgentState) -> list[Send]:", router),
                        |w| {
                            w.line(format!(
                                "items = state.get({}) or []",
                                python::string(items_field)
                            ));
                            w.line(format!(
                                "return [Send({}, {{**state, {}: item}}) for item in items]",
                                python::string(target),
                                python::string(item_var)
                            ));
                        },
                    );
                    w.gap();
                }
            }
        }

        let cycles: Vec<String> = self.names.cycle_routers.keys().cloned().collect();
        for node in cycles {
            let continuation = self.continuation(&node)?;
            let router = &self.names.cycle_routers[&node];
            let (_, tools_node) = &self.names.tool_nodes[&node];
            w.block(format!("def {}(state: AgentState):", router), |w| {
                w.line("messages = state.get(\"messages\") or []");
                w.block(
                    "if messages and getattr(messages[-1], \"tool_calls\", None):",
                    |w| w.line(format!("return {}", python::string(tools_node))),
                );
                w.line(format!("return {}", continuation));
            });
            w.gap();
        }
        Ok(())
    }

    /// Expression a tool-cycle router returns once the model is done
    fn continuation(&self, node: &str) -> Result<String> {
        let outgoing: Vec<&Edge> = self
            .validated
            .edges
            .iter()
            .filter(|e| e.source() == node)
            .collect();
        match outgoing.as_slice() {
            [] => Err(self.internal(format!("node '{}' has no outgoing edge", node))),
            [Edge::ConditionalGroup { .. } | Edge::Map { .. }] => {
                Ok(format!("{}(state)", self.names.routers[node]))
            }
            [Edge::Unconditional { target, .. }] => Ok(Self::endpoint(target)),
            edges if edges.iter().all(|e| matches!(e, Edge::Unconditional { .. })) => {
                let targets: Vec<String> = distinct_targets(edges)
                    .iter()
                    .map(|t| Self::endpoint(t))
                    .collect();
                Ok(format!("[{}]", targets.join(", ")))
            }
            _ => Err(self.internal(format!(
                "node '{}' mixes routing categories on its outgoing edges",
                node
            ))),
        }
    }

    pub(super) fn emit_graph(&mut self, w: &mut Writer) -> Result<()> {
        self.imports.name("langgraph.graph", "StateGraph");
        let validated = self.validated;
        let agent = &validated.agent;

        w.line("graph_builder = StateGraph(AgentState)");
        for node in &agent.nodes {
            w.line(format!(
                "graph_builder.add_node({}, {})",
                python::string(&node.id),
                self.names.nodes[&node.id]
            ));
            if let Some((variable, name)) = self.names.tool_nodes.get(&node.id) {
                w.line(format!(
                    "graph_builder.add_node({}, {})",
                    python::string(name),
                    variable
                ));
            }
        }
        w.blank();

        let joins = self.joins();
        let mut emitted_joins = BTreeSet::new();
        let mut emitted_cycles = BTreeSet::new();
        for edge in &validated.edges {
            let source = edge.source();
            if self.names.cycle_routers.contains_key(source) {
                if emitted_cycles.insert(source.to_string()) {
                    self.emit_cycle_edges(w, source);
                }
                continue;
            }
            match edge {
                Edge::Unconditional { source, target } => {
                    if let Some((i, join)) = joins
                        .iter()
                        .enumerate()
                        .find(|(_, j)| &j.target == target && j.sources.contains(source))
                    {
                        if emitted_joins.insert(i) {
                            let sources: Vec<String> =
                                join.sources.iter().map(|s| python::string(s)).collect();
                            w.line(format!(
                                "graph_builder.add_edge([{}], {})",
                                sources.join(", "),
                                Self::endpoint(target)
                            ));
                        }
                        continue;
                    }
                    w.line(format!(
                        "graph_builder.add_edge({}, {})",
                        Self::endpoint(source),
                        Self::endpoint(target)
                    ));
                }
                Edge::ConditionalGroup { .. } | Edge::Map { .. } => {
                    let targets: Vec<String> =
                        edge.targets().iter().map(|t| Self::endpoint(t)).collect();
                    w.line(format!(
                        "graph_builder.add_conditional_edges({}, {}, [{}])",
                        Self::endpoint(source),
                        self.names.routers[source],
                        targets.join(", ")
                    ));
                }
            }
        }
        if edges_use(&validated.edges, START) {
            self.imports.name("langgraph.graph", "START");
        }
        if validated.edges.iter().any(|e| e.targets().contains(&END)) {
            self.imports.name("langgraph.graph", "END");
        }

        w.blank();
        w.line("graph = graph_builder.compile()");
        Ok(())
    }

    fn emit_cycle_edges(&self, w: &mut Writer, node: &str) {
        let (_, tools_node) = &self.names.tool_nodes[node];
        let outgoing: Vec<&Edge> = self
            .validated
            .edges
            .iter()
            .filter(|e| e.source() == node)
            .collect();
        let mut destinations = vec![python::string(tools_node)];
        destinations.extend(distinct_targets(&outgoing).iter().map(|t| Self::endpoint(t)));
        w.line(format!(
            "graph_builder.add_conditional_edges({}, {}, [{}])",
            python::string(node),
            self.names.cycle_routers[node],
            destinations.join(", ")
        ));
        w.line(format!(
            "graph_builder.add_edge({}, {})",
            python::string(tools_node),
            python::string(node)
        ));
    }

    /// Targets whose incoming edges all come from distinct branches of one fan-out
    pub(super) fn joins(&self) -> Vec<Join> {
        let agent = &self.validated.agent;
        let graph = &self.validated.graph;

        let mut incoming: IndexMap<&str, Vec<(&str, EdgeCategory)>> = IndexMap::new();
        for decl in &agent.edges {
            incoming
                .entry(decl.target.as_str())
                .or_default()
                .push((decl.source.as_str(), decl.category()));
        }

        let fan_outs = graph.fan_outs();
        let mut joins = Vec::new();
        for (target, edges) in incoming {
            if target == END
                || edges
                    .iter()
                    .any(|(_, category)| *category != EdgeCategory::Unconditional)
            {
                continue;
            }
            let mut sources: Vec<&str> = Vec::new();
            for (source, _) in &edges {
                if !sources.contains(source) {
                    sources.push(*source);
                }
            }
            if sources.len() < 2
                || sources
                    .iter()
                    .any(|s| *s == START || self.names.cycle_routers.contains_key(*s))
            {
                continue;
            }
            let joined = fan_outs.iter().any(|fan_out| {
                let mut branches = BTreeSet::new();
                sources.iter().all(|source| {
                    fan_out
                        .branches
                        .iter()
                        .position(|b| b.exclusive.contains(*source))
                        .is_some_and(|i| branches.insert(i))
                })
            });
            if joined {
                joins.push(Join {
                    sources: sources.iter().map(|s| s.to_string()).collect(),
                    target: target.to_string(),
                });
            }
        }
        joins
    }
}

/// Condition text on one line, as written otherwise
fn condition(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn distinct_targets<'e>(edges: &[&'e Edge]) -> Vec<&'e str> {
    let mut targets = Vec::new();
    for edge in edges {
        for target in edge.targets() {
            if !targets.contains(&target) {
                targets.push(target);
            }
        }
    }
    targets
}

fn edges_use(edges: &[Edge], id: &str) -> bool {
    edges.iter().any(|e| e.source() == id)
}
