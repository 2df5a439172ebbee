//! Node functions: llm, action, script and subgraph

use agentmark_core::ir::{LlmNode, Node, NodeKind, SubgraphNode, ToolKind};

use super::{Helper, ModelField, ModuleGenerator, Writer, module_name, script_module};
use crate::error::Result;
use crate::python;

impl ModuleGenerator<'_> {
    pub(super) fn emit_nodes(&mut self, w: &mut Writer) -> Result<()> {
        let agent = self.agent;
        for node in &agent.nodes {
            match &node.kind {
                NodeKind::Llm(llm) => self.emit_llm_node(w, node, llm)?,
                NodeKind::Action { tool_ref } => self.emit_action_node(w, node, tool_ref)?,
                NodeKind::Script { path } => {
                    self.imports.module("importlib");
                    self.helpers.insert(Helper::StateUpdates);
                    let function = &self.names.nodes[&node.id];
                    w.block(format!("def {}(state: AgentState) -> dict:", function), |w| {
                        w.line(format!(
                            "module = importlib.import_module({})",
                            python::string(&script_module(path))
                        ));
                        w.line("return _state_updates(module.run(dict(state)))");
                    });
                    w.gap();
                }
                NodeKind::Subgraph(sub) => self.emit_subgraph_node(w, node, sub)?,
            }
        }
        Ok(())
    }

    fn emit_llm_node(&mut self, w: &mut Writer, node: &Node, llm: &LlmNode) -> Result<()> {
        let output = self.names.outputs.get(&node.id).cloned();
        if let Some(model) = &output {
            let fields: Vec<ModelField<'_>> = llm
                .output_schema
                .iter()
                .map(|f| ModelField {
                    name: &f.name,
                    ty: &f.ty,
                    description: f.description.as_deref(),
                })
                .collect();
            self.emit_model(w, model, &fields);
            w.gap();
        }

        let mut bound = Vec::with_capacity(llm.tool_binds.len());
        for bind in &llm.tool_binds {
            let function = self.names.tools.get(&bind.tool_ref).ok_or_else(|| {
                self.internal(format!(
                    "node '{}' binds unknown tool '{}'",
                    node.id, bind.tool_ref
                ))
            })?;
            bound.push(function.clone());
        }
        let bound = format!("[{}]", bound.join(", "));

        let prompt = if llm.prompt.is_empty() {
            None
        } else {
            self.helpers.insert(Helper::StateText);
            Some(self.template_expr(&llm.prompt, |name| {
                format!("_state_text(state, {})", python::string(name))
            }))
        };
        if output.is_some() {
            self.helpers.insert(Helper::StateUpdates);
        }

        let function = self.names.nodes[&node.id].clone();
        w.line(format!("def {}(state: AgentState) -> dict:", function));
        w.indent();
        match prompt {
            Some(prompt) => {
                self.imports.name("langchain_core.messages", "SystemMessage");
                w.line(format!("system_prompt = {}", prompt));
                w.line("messages = [SystemMessage(content=system_prompt)] + list(state.get(\"messages\", []))");
            }
            None => w.line("messages = list(state.get(\"messages\", []))"),
        }
        match (&output, llm.tool_binds.is_empty()) {
            (None, true) => {
                w.line("response = llm.invoke(messages)");
                w.line("return {\"messages\": [response]}");
            }
            (None, false) => {
                w.line(format!("response = llm.bind_tools({}).invoke(messages)", bound));
                w.line("return {\"messages\": [response]}");
            }
            (Some(model), true) => {
                self.imports.name("langchain_core.messages", "AIMessage");
                w.line(format!(
                    "result = llm.with_structured_output({}).invoke(messages)",
                    model
                ));
                w.line("values = result.model_dump()");
                w.line("updates = _state_updates(values)");
                w.line("updates[\"messages\"] = [AIMessage(content=str(values))]");
                w.line("return updates");
            }
            (Some(model), false) => {
                w.line(format!("response = llm.bind_tools({}).invoke(messages)", bound));
                w.block("if getattr(response, \"tool_calls\", None):", |w| {
                    w.line("return {\"messages\": [response]}");
                });
                w.line(format!(
                    "result = llm.with_structured_output({}).invoke(messages + [response])",
                    model
                ));
                w.line("updates = _state_updates(result.model_dump())");
                w.line("updates[\"messages\"] = [response]");
                w.line("return updates");
            }
        }
        w.dedent();
        w.gap();

        if let Some((variable, _)) = self.names.tool_nodes.get(&node.id) {
            self.imports.name("langgraph.prebuilt", "ToolNode");
            w.line(format!("{} = ToolNode({})", variable, bound));
            w.gap();
        }
        Ok(())
    }

    fn emit_action_node(&mut self, w: &mut Writer, node: &Node, tool_ref: &str) -> Result<()> {
        let agent = self.agent;
        let tool = agent.tool(tool_ref).ok_or_else(|| {
            self.internal(format!(
                "node '{}' references unknown tool '{}'",
                node.id, tool_ref
            ))
        })?;
        let tool_function = &self.names.tools[&tool.id];
        let function = &self.names.nodes[&node.id];
        self.helpers.insert(Helper::StateUpdates);

        w.line(format!("def {}(state: AgentState) -> dict:", function));
        w.indent();
        match &tool.kind {
            ToolKind::LocalScript { .. } => {
                w.line("arguments = {key: value for key, value in state.items() if key != \"messages\"}");
            }
            kind if kind.parameters().is_empty() => w.line("arguments = {}"),
            kind => {
                w.line("arguments = {");
                w.indent();
                for param in kind.parameters() {
                    w.line(format!(
                        "{}: state.get({}),",
                        python::string(&param.name),
                        python::string(&param.name)
                    ));
                }
                w.dedent();
                w.line("}");
                w.line("arguments = {key: value for key, value in arguments.items() if value is not None}");
            }
        }
        w.line(format!("result = {}.invoke(arguments)", tool_function));
        w.line("return _state_updates(result)");
        w.dedent();
        w.gap();
        Ok(())
    }

    fn emit_subgraph_node(
        &mut self,
        w: &mut Writer,
        node: &Node,
        sub: &SubgraphNode,
    ) -> Result<()> {
        if !self.known_agents.contains(&sub.agent_ref) {
            return Err(self.internal(format!(
                "node '{}' calls agent '{}', which is not being compiled",
                node.id, sub.agent_ref
            )));
        }
        let alias = &self.names.subgraphs[&sub.agent_ref];
        self.imports.local(format!(
            "from {} import graph as {}",
            module_name(&sub.agent_ref),
            alias
        ));
        self.imports.name("langchain_core.runnables", "RunnableConfig");

        let function = &self.names.nodes[&node.id];
        w.line(format!(
            "def {}(state: AgentState, config: RunnableConfig) -> dict:",
            function
        ));
        w.indent();
        w.line("child_input = {");
        w.indent();
        w.line("\"messages\": [],");
        for mapping in &sub.input_map {
            w.line(format!(
                "{}: state.get({}),",
                python::string(&mapping.target),
                python::string(&mapping.source)
            ));
        }
        w.dedent();
        w.line("}");
        w.line(format!(
            "child_result = {}.invoke(child_input, config=config)",
            alias
        ));
        if sub.output_map.is_empty() {
            w.line("return {}");
        } else {
            w.line("return {");
            w.indent();
            for mapping in &sub.output_map {
                w.line(format!(
                    "{}: child_result.get({}),",
                    python::string(&mapping.target),
                    python::string(&mapping.source)
                ));
            }
            w.dedent();
            w.line("}");
        }
        w.dedent();
        w.gap();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use pretty_assertions::assert_eq;

    fn function<'a>(source: &'a str, name: &str) -> &'a str {
        let from = source.find(&format!("def {}(", name)).unwrap();
        let to = source[from..].find("\n\n\n").unwrap() + from;
        &source[from..to]
    }

    const CLASSIFIER: &str = r#"<agent name="classifier">
  <state>
    <field name="ticket" type="string" required="true"/>
    <field name="priority" type="enum" values="low, high" default="low"/>
    <field name="notes" type="list[string]" reducer="append" default="[]"/>
  </state>
  <tools>
    <tool id="lookup" type="script_tool" path="lookup.py">
      <parameters><param name="ticket" type="string"/></parameters>
    </tool>
  </tools>
  <graph>
    <node id="classify" type="llm">
      <system_prompt>Classify ${ticket} for ${env:SEARCH_KEY}</system_prompt>
      <output_schema><field name="priority" type="enum" values="low, high" description="Urgency"/></output_schema>
    </node>
    <node id="research" type="llm">
      <system_prompt>Research ${ticket}</system_prompt>
      <output_schema><field name="notes" type="list[string]"/></output_schema>
      <tool_bind ref="lookup"/>
    </node>
    <node id="check" type="action" tool_ref="lookup"/>
    <node id="tidy" type="script" path="tidy.py"/>
    <edge source="__START__" target="classify"/>
    <edge source="classify" target="research"/>
    <edge source="research" target="check"/>
    <edge source="check" target="tidy"/>
    <edge source="tidy" target="__END__"/>
  </graph>
</agent>"#;

    fn classifier() -> String {
        let analysis = analysis_with(&[("classifier", CLASSIFIER)], &["lookup.py", "tidy.py"]);
        module(&analysis, "classifier")
    }

    #[test]
    fn test_structured_llm_node() {
        let source = classifier();
        assert!(source.contains(
            "ClassifyOutput = create_model(\n    \"ClassifyOutput\",\n    **{\n        \"priority\": (Literal[\"low\", \"high\"], Field(..., description=\"Urgency\")),\n    },\n)"
        ));
        assert_eq!(
            function(&source, "classify"),
            r#"def classify(state: AgentState) -> dict:
    system_prompt = "".join(["Classify ", _state_text(state, "ticket"), " for ", os.getenv("SEARCH_KEY", "")])
    messages = [SystemMessage(content=system_prompt)] + list(state.get("messages", []))
    result = llm.with_structured_output(ClassifyOutput).invoke(messages)
    values = result.model_dump()
    updates = _state_updates(values)
    updates["messages"] = [AIMessage(content=str(values))]
    return updates"#
        );
    }

    #[test]
    fn test_tool_bound_llm_node_with_schema() {
        let source = classifier();
        assert_eq!(
            function(&source, "research"),
            r#"def research(state: AgentState) -> dict:
    system_prompt = "".join(["Research ", _state_text(state, "ticket")])
    messages = [SystemMessage(content=system_prompt)] + list(state.get("messages", []))
    response = llm.bind_tools([lookup]).invoke(messages)
    if getattr(response, "tool_calls", None):
        return {"messages": [response]}
    result = llm.with_structured_output(ResearchOutput).invoke(messages + [response])
    updates = _state_updates(result.model_dump())
    updates["messages"] = [response]
    return updates"#
        );
        assert!(source.contains("research_tools = ToolNode([lookup])\n"));
    }

    #[test]
    fn test_action_and_script_nodes() {
        let source = classifier();
        assert_eq!(
            function(&source, "check"),
            r#"def check(state: AgentState) -> dict:
    arguments = {
        "ticket": state.get("ticket"),
    }
    arguments = {key: value for key, value in arguments.items() if value is not None}
    result = lookup.invoke(arguments)
    return _state_updates(result)"#
        );
        assert_eq!(
            function(&source, "tidy"),
            r#"def tidy(state: AgentState) -> dict:
    module = importlib.import_module("tools.tidy")
    return _state_updates(module.run(dict(state)))"#
        );
        assert!(source.contains("def _state_text(state: dict, field: str) -> str:"));
    }

    #[test]
    fn test_subgraph_node_imports_child_graph() {
        let child = r#"<agent name="researcher">
  <state>
    <field name="question" type="string" required="true"/>
    <field name="answer" type="string"/>
  </state>
  <graph>
    <node id="answer_it" type="llm"><output_schema><field name="answer" type="string"/></output_schema></node>
    <edge source="__START__" target="answer_it"/>
    <edge source="answer_it" target="__END__"/>
  </graph>
</agent>"#;
        let parent = r#"<agent name="parent">
  <state>
    <field name="topic" type="string" required="true"/>
    <field name="summary" type="string"/>
  </state>
  <graph>
    <node id="delegate" type="subgraph" agent_ref="researcher">
      <input_map><map source="topic" target="question"/></input_map>
      <output_map><map source="answer" target="summary"/></output_map>
    </node>
    <edge source="__START__" target="delegate"/>
    <edge source="delegate" target="__END__"/>
  </graph>
</agent>"#;
        let analysis = analysis_with(&[("parent", parent), ("researcher", child)], &[]);
        let source = module(&analysis, "parent");
        assert!(source.contains("\nfrom compiled_researcher import graph as researcher_graph\n"));
        assert_eq!(
            function(&source, "delegate"),
            r#"def delegate(state: AgentState, config: RunnableConfig) -> dict:
    child_input = {
        "messages": [],
        "question": state.get("topic"),
    }
    child_result = researcher_graph.invoke(child_input, config=config)
    return {
        "summary": child_result.get("answer"),
    }"#
        );
        assert!(!source.contains("\nllm = "));
    }
}
