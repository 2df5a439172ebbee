//! Concurrent-write hazards on overwrite fields
//!
//! For every unconditional fan-out, each branch owns the nodes only it can
//! reach. Two branches declaring writes to the same overwrite field race at
//! the join, and the surviving value depends on scheduling.

use indexmap::IndexSet;

use crate::diagnostic::{Code, Findings};
use crate::graph::AgentGraph;
use crate::ir::{Agent, MergePolicy, NodeKind, ToolKind};

pub(super) fn check_agent(agent: &Agent, graph: &AgentGraph, findings: &mut Findings) {
    for fan_out in graph.fan_outs() {
        let writes: Vec<IndexSet<&str>> = fan_out
            .branches
            .iter()
            .map(|branch| {
                branch
                    .exclusive
                    .iter()
                    .flat_map(|id| declared_writes(agent, id))
                    .collect()
            })
            .collect();

        for field in &agent.state {
            if field.policy != MergePolicy::Overwrite {
                continue;
            }
            let writers: Vec<&str> = fan_out
                .branches
                .iter()
                .zip(&writes)
                .filter(|(_, w)| w.contains(field.name.as_str()))
                .map(|(b, _)| b.target.as_str())
                .collect();
            if writers.len() < 2 {
                continue;
            }
            tracing::warn!(
                agent = %agent.name,
                source = %fan_out.source,
                field = %field.name,
                "Parallel branches overwrite the same field"
            );
            let position = graph
                .outgoing(&fan_out.source)
                .first()
                .map(|&i| agent.edges[i].position);
            findings.warning(
                Code::OverwriteRace,
                position,
                format!(
                    "parallel branches from '{}' ({}) all write field '{}', which uses the overwrite reducer; the result depends on scheduling",
                    fan_out.source,
                    writers.join(", "),
                    field.name
                ),
            );
        }
    }
}

/// State fields a node declares it writes
fn declared_writes<'a>(agent: &'a Agent, id: &str) -> Vec<&'a str> {
    let Some(node) = agent.node(id) else {
        return Vec::new();
    };
    let names: Vec<&str> = match &node.kind {
        NodeKind::Llm(llm) => llm.output_schema.iter().map(|f| f.name.as_str()).collect(),
        NodeKind::Action { tool_ref } => match agent.tool(tool_ref).map(|t| &t.kind) {
            Some(ToolKind::ApiCall(api)) => {
                api.returns.iter().map(|r| r.state_field.as_str()).collect()
            }
            _ => Vec::new(),
        },
        NodeKind::Subgraph(sub) => sub.output_map.iter().map(|m| m.target.as_str()).collect(),
        NodeKind::Script { .. } => Vec::new(),
    };
    names
        .into_iter()
        .filter(|name| agent.field(name).is_some())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use rstest::rstest;

    fn race(reducer: &str) -> Vec<crate::diagnostic::Diagnostic> {
        findings(&format!(
            r#"
<agent name="race">
  <state>
    <field name="total" type="int" reducer="{}"/>
  </state>
  <graph>
    <node id="split" type="llm"/>
    <node id="left" type="llm"><output_schema><field name="total" type="int"/></output_schema></node>
    <node id="right" type="llm"><output_schema><field name="total" type="int"/></output_schema></node>
    <node id="join" type="llm"/>
    <edge source="__START__" target="split"/>
    <edge source="split" target="left"/>
    <edge source="split" target="right"/>
    <edge source="left" target="join"/>
    <edge source="right" target="join"/>
    <edge source="join" target="__END__"/>
  </graph>
</agent>"#,
            reducer
        ))
    }

    #[rstest]
    #[case("overwrite", vec![Code::OverwriteRace])]
    #[case("add", vec![])]
    fn test_numeric_add_versus_overwrite(#[case] reducer: &str, #[case] expected: Vec<Code>) {
        let diagnostics = race(reducer);
        assert_eq!(codes(&diagnostics), expected);
        if let Some(warning) = diagnostics.first() {
            assert!(!warning.is_error());
            assert!(warning.message.contains("'split'"));
            assert!(warning.message.contains("'total'"));
        }
    }

    #[test]
    fn test_shared_downstream_writer_is_not_a_race() {
        let diagnostics = findings(
            r#"
<agent name="shared">
  <state><field name="summary" type="string"/></state>
  <graph>
    <node id="left" type="llm"/>
    <node id="right" type="llm"/>
    <node id="join" type="llm"><output_schema><field name="summary" type="string"/></output_schema></node>
    <edge source="__START__" target="left"/>
    <edge source="__START__" target="right"/>
    <edge source="left" target="join"/>
    <edge source="right" target="join"/>
    <edge source="join" target="__END__"/>
  </graph>
</agent>"#,
        );
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
    }

    #[test]
    fn test_conditional_branches_are_exclusive() {
        let diagnostics = findings(
            r#"
<agent name="cond">
  <state><field name="out" type="string"/></state>
  <graph>
    <node id="a" type="llm"><output_schema><field name="out" type="string"/></output_schema></node>
    <node id="b" type="llm"><output_schema><field name="out" type="string"/></output_schema></node>
    <edge source="__START__" target="a"><condition>state["out"] == ""</condition></edge>
    <edge source="__START__" target="b" default="true"/>
    <edge source="a" target="__END__"/>
    <edge source="b" target="__END__"/>
  </graph>
</agent>"#,
        );
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
    }
}
