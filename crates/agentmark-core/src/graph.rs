//! Adjacency view of one agent's edges
//!
//! Built once per agent and shared by the routing rules (reachability,
//! outgoing-edge checks), hazard detection and the code generator's fan-in
//! grouping. All iteration follows document order.

use indexmap::{IndexMap, IndexSet};
use std::collections::VecDeque;

use crate::ir::{Agent, END, EdgeCategory, START};

/// One edge as seen by the graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphEdge {
    /// Source id
    pub source: String,
    /// Target id
    pub target: String,
    /// Routing category
    pub category: EdgeCategory,
}

/// Adjacency structure over node ids and the boundary markers
#[derive(Debug, Clone, Default)]
pub struct AgentGraph {
    nodes: IndexSet<String>,
    edges: Vec<GraphEdge>,
    outgoing: IndexMap<String, Vec<usize>>,
}

/// A source whose outgoing edges are two or more unconditional edges
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanOut {
    /// Source id
    pub source: String,
    /// One branch per distinct target, in document order
    pub branches: Vec<Branch>,
}

/// One branch of a [`FanOut`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    /// First node of the branch
    pub target: String,
    /// Nodes reachable from the target without passing the source
    pub region: IndexSet<String>,
    /// Nodes of `region` that no sibling branch reaches
    pub exclusive: IndexSet<String>,
}

impl AgentGraph {
    /// Build the adjacency view of `agent`
    pub fn build(agent: &Agent) -> Self {
        let nodes = agent.nodes.iter().map(|n| n.id.clone()).collect();
        let mut edges = Vec::with_capacity(agent.edges.len());
        let mut outgoing: IndexMap<String, Vec<usize>> = IndexMap::new();
        for (i, decl) in agent.edges.iter().enumerate() {
            edges.push(GraphEdge {
                source: decl.source.clone(),
                target: decl.target.clone(),
                category: decl.category(),
            });
            outgoing.entry(decl.source.clone()).or_default().push(i);
        }
        Self {
            nodes,
            edges,
            outgoing,
        }
    }

    /// Whether `id` is a declared node
    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.contains(id)
    }

    /// Declared node ids in order
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(String::as_str)
    }

    /// Edge by declaration index
    pub fn edge(&self, index: usize) -> &GraphEdge {
        &self.edges[index]
    }

    /// Sources with their edge indices, in order of first appearance
    pub fn sources(&self) -> impl Iterator<Item = (&str, &[usize])> {
        self.outgoing
            .iter()
            .map(|(source, edges)| (source.as_str(), edges.as_slice()))
    }

    /// Declaration indices of edges leaving `source`
    pub fn outgoing(&self, source: &str) -> &[usize] {
        self.outgoing.get(source).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Distinct targets of edges leaving `id`, in order
    pub fn successors(&self, id: &str) -> Vec<&str> {
        let mut targets = Vec::new();
        for &i in self.outgoing(id) {
            let target = self.edges[i].target.as_str();
            if !targets.contains(&target) {
                targets.push(target);
            }
        }
        targets
    }

    /// Ids reachable from `start` (inclusive), never expanding `barrier`
    pub fn reachable_from(&self, start: &str, barrier: Option<&str>) -> IndexSet<String> {
        let mut seen = IndexSet::new();
        if Some(start) == barrier {
            return seen;
        }
        let mut queue = VecDeque::from([start.to_string()]);
        seen.insert(start.to_string());
        while let Some(current) = queue.pop_front() {
            for next in self.successors(&current) {
                if Some(next) == barrier || seen.contains(next) {
                    continue;
                }
                seen.insert(next.to_string());
                queue.push_back(next.to_string());
            }
        }
        seen
    }

    /// Whether every edge leaving `source` is unconditional
    pub fn is_static_source(&self, source: &str) -> bool {
        let edges = self.outgoing(source);
        !edges.is_empty()
            && edges
                .iter()
                .all(|&i| self.edges[i].category == EdgeCategory::Unconditional)
    }

    /// Sources that fan out over two or more unconditional edges
    pub fn fan_outs(&self) -> Vec<FanOut> {
        let mut fan_outs = Vec::new();
        for (source, _) in self.sources() {
            if !self.is_static_source(source) {
                continue;
            }
            let targets = self.successors(source);
            if targets.len() < 2 {
                continue;
            }
            let regions: Vec<IndexSet<String>> = targets
                .iter()
                .map(|target| {
                    self.reachable_from(target, Some(source))
                        .into_iter()
                        .filter(|id| id != START && id != END)
                        .collect()
                })
                .collect();
            let branches = targets
                .iter()
                .enumerate()
                .map(|(i, target)| {
                    let exclusive = regions[i]
                        .iter()
                        .filter(|id| {
                            regions
                                .iter()
                                .enumerate()
                                .all(|(j, other)| j == i || !other.contains(*id))
                        })
                        .cloned()
                        .collect();
                    Branch {
                        target: target.to_string(),
                        region: regions[i].clone(),
                        exclusive,
                    }
                })
                .collect();
            fan_outs.push(FanOut {
                source: source.to_string(),
                branches,
            });
        }
        fan_outs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::Position;
    use crate::ir::{EdgeDecl, MapSpec, Node, NodeKind};

    fn agent(nodes: &[&str], edges: &[(&str, &str)]) -> Agent {
        Agent {
            name: "test".into(),
            version: "1.0".into(),
            description: None,
            document: "agents/test.amk".into(),
            position: Position::start(),
            llm: None,
            max_steps: None,
            state_block: Some(Position::start()),
            graph_block: Some(Position::start()),
            state: vec![],
            tools: vec![],
            nodes: nodes
                .iter()
                .map(|id| Node {
                    id: id.to_string(),
                    kind: NodeKind::Script {
                        path: format!("{}.py", id),
                    },
                    position: Position::start(),
                })
                .collect(),
            edges: edges
                .iter()
                .map(|(s, t)| EdgeDecl {
                    source: s.to_string(),
                    target: t.to_string(),
                    condition: None,
                    condition_position: None,
                    default: false,
                    map: None,
                    position: Position::start(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_reachability_from_start() {
        let a = agent(
            &["a", "b", "orphan"],
            &[(START, "a"), ("a", "b"), ("b", END), ("orphan", END)],
        );
        let graph = AgentGraph::build(&a);
        let reachable = graph.reachable_from(START, None);
        assert!(reachable.contains("a"));
        assert!(reachable.contains("b"));
        assert!(reachable.contains(END));
        assert!(!reachable.contains("orphan"));
    }

    #[test]
    fn test_sources_in_first_appearance_order() {
        let a = agent(&["a", "b"], &[("b", END), (START, "a"), ("a", "b"), ("b", "a")]);
        let graph = AgentGraph::build(&a);
        let sources: Vec<_> = graph.sources().map(|(s, e)| (s, e.to_vec())).collect();
        assert_eq!(sources, vec![("b", vec![0, 3]), (START, vec![1]), ("a", vec![2])]);
        assert_eq!(graph.successors("b"), vec![END, "a"]);
    }

    #[test]
    fn test_fan_out_regions() {
        // start -> split -> {left, right}; left -> l2 -> join; right -> join; join -> end
        let a = agent(
            &["split", "left", "l2", "right", "join"],
            &[
                (START, "split"),
                ("split", "left"),
                ("split", "right"),
                ("left", "l2"),
                ("l2", "join"),
                ("right", "join"),
                ("join", END),
            ],
        );
        let graph = AgentGraph::build(&a);
        let fan_outs = graph.fan_outs();
        assert_eq!(fan_outs.len(), 1);
        let fan_out = &fan_outs[0];
        assert_eq!(fan_out.source, "split");
        let left: Vec<_> = fan_out.branches[0].exclusive.iter().cloned().collect();
        let right: Vec<_> = fan_out.branches[1].exclusive.iter().cloned().collect();
        assert_eq!(left, vec!["left", "l2"]);
        assert_eq!(right, vec!["right"]);
        assert!(fan_out.branches[0].region.contains("join"));
    }

    #[test]
    fn test_loop_back_to_source_stops_region() {
        let a = agent(
            &["s", "x", "y"],
            &[(START, "s"), ("s", "x"), ("s", "y"), ("x", "s"), ("y", END)],
        );
        let graph = AgentGraph::build(&a);
        let fan_out = &graph.fan_outs()[0];
        assert_eq!(fan_out.branches[0].region.len(), 1);
        assert!(!fan_out.branches[0].region.contains("s"));
        assert_eq!(fan_out.branches[1].region.len(), 1);
    }

    #[test]
    fn test_map_source_is_not_a_fan_out() {
        let mut a = agent(&["s", "x"], &[(START, "s"), ("s", "x"), ("x", END)]);
        a.edges[1].map = Some(MapSpec {
            items_field: "items".into(),
            item_var: "item".into(),
        });
        let graph = AgentGraph::build(&a);
        assert!(!graph.is_static_source("s"));
        assert!(graph.fan_outs().is_empty());
    }
}
