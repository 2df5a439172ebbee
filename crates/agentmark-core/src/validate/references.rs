//! Reference resolution: tools, scripts, interpolated fields and subgraphs

use std::collections::BTreeSet;

use crate::diagnostic::{Code, Findings, Position};
use crate::ir::{Agent, ApiCall, FieldMapping, NodeKind, ParamLocation, TokenKind, ToolKind};
use crate::source::ScriptResolver;

use super::AgentIndex;

pub(super) fn check_agent(
    agent: &Agent,
    index: &AgentIndex,
    blocked: &BTreeSet<String>,
    resolver: &dyn ScriptResolver,
    findings: &mut Findings,
) {
    for tool in &agent.tools {
        match &tool.kind {
            ToolKind::ApiCall(api) => check_api_call(agent, &tool.id, api, findings),
            ToolKind::LocalScript { path } | ToolKind::ScriptTool { path, .. } => {
                check_script(path, tool.position, resolver, findings);
            }
        }
    }

    for node in &agent.nodes {
        match &node.kind {
            NodeKind::Action { tool_ref } => {
                let Some(tool) = agent.tool(tool_ref) else {
                    findings.error(
                        Code::UnknownTool,
                        Some(node.position),
                        format!(
                            "node '{}' references undeclared tool '{}'",
                            node.id, tool_ref
                        ),
                    );
                    continue;
                };
                for param in tool.kind.parameters() {
                    if agent.field(&param.name).is_none() {
                        findings.error(
                            Code::UnboundParameter,
                            Some(node.position),
                            format!(
                                "action node '{}' cannot supply parameter '{}' of tool '{}': no state field of that name",
                                node.id, param.name, tool.id
                            ),
                        );
                    }
                }
            }
            NodeKind::Llm(llm) => {
                for bind in &llm.tool_binds {
                    if agent.tool(&bind.tool_ref).is_none() {
                        findings.error(
                            Code::UnknownTool,
                            Some(bind.position),
                            format!(
                                "node '{}' binds undeclared tool '{}'",
                                node.id, bind.tool_ref
                            ),
                        );
                    }
                }
                for token in llm.prompt.tokens() {
                    if token.kind == TokenKind::StateField && agent.field(&token.name).is_none() {
                        findings.warning(
                            Code::UndeclaredPromptField,
                            llm.prompt_position.or(Some(node.position)),
                            format!(
                                "prompt of node '{}' interpolates undeclared state field '{}'; it renders empty",
                                node.id, token.name
                            ),
                        );
                    }
                }
            }
            NodeKind::Script { path } => check_script(path, node.position, resolver, findings),
            NodeKind::Subgraph(sub) => {
                if blocked.contains(&sub.agent_ref) {
                    continue;
                }
                let Some(child) = index.get(sub.agent_ref.as_str()) else {
                    findings.error(
                        Code::UnknownAgent,
                        Some(node.position),
                        format!(
                            "subgraph node '{}' references unknown agent '{}'",
                            node.id, sub.agent_ref
                        ),
                    );
                    continue;
                };
                for mapping in &sub.input_map {
                    check_parent_field(agent, mapping, &mapping.source, "input", findings);
                    if child.field(&mapping.target).is_none() {
                        findings.error(
                            Code::InputMapField,
                            Some(mapping.position),
                            format!(
                                "input map target '{}' is not a state field of agent '{}'",
                                mapping.target, child.name
                            ),
                        );
                    }
                }
                for mapping in &sub.output_map {
                    if child.field(&mapping.source).is_none() {
                        findings.error(
                            Code::OutputMapField,
                            Some(mapping.position),
                            format!(
                                "output map source '{}' is not a state field of agent '{}'",
                                mapping.source, child.name
                            ),
                        );
                    }
                    check_parent_field(agent, mapping, &mapping.target, "output", findings);
                }
            }
        }
    }
}

fn check_parent_field(
    agent: &Agent,
    mapping: &FieldMapping,
    name: &str,
    direction: &str,
    findings: &mut Findings,
) {
    if agent.field(name).is_none() {
        findings.error(
            Code::ParentMapField,
            Some(mapping.position),
            format!(
                "{} map field '{}' is not a state field of agent '{}'",
                direction, name, agent.name
            ),
        );
    }
}

fn check_api_call(agent: &Agent, tool_id: &str, api: &ApiCall, findings: &mut Findings) {
    for token in api.url.tokens() {
        if token.kind != TokenKind::StateField {
            continue;
        }
        let bound = api
            .parameters
            .iter()
            .any(|p| p.name == token.name && p.location == ParamLocation::Path);
        if !bound {
            findings.error(
                Code::UnboundParameter,
                Some(api.endpoint_position),
                format!(
                    "endpoint of tool '{}' interpolates '{}', which is not a path parameter",
                    tool_id, token.name
                ),
            );
        }
    }

    for header in &api.headers {
        for token in header.value.tokens() {
            if token.kind == TokenKind::StateField
                && !api.parameters.iter().any(|p| p.name == token.name)
            {
                findings.error(
                    Code::UnboundParameter,
                    Some(header.position),
                    format!(
                        "header '{}' of tool '{}' interpolates '{}', which is not a parameter",
                        header.name, tool_id, token.name
                    ),
                );
            }
        }
    }

    if let Some(body) = &api.body {
        for field in &body.fields {
            if !api.parameters.iter().any(|p| p.name == field.from_state) {
                findings.error(
                    Code::ToolMappingField,
                    Some(field.position),
                    format!(
                        "body field '{}' of tool '{}' reads '{}', which is not a parameter",
                        field.name, tool_id, field.from_state
                    ),
                );
            }
        }
    }

    for mapping in &api.returns {
        if agent.field(&mapping.state_field).is_none() {
            findings.error(
                Code::ToolMappingField,
                Some(mapping.position),
                format!(
                    "response of tool '{}' maps '{}' into undeclared state field '{}'",
                    tool_id, mapping.api_field, mapping.state_field
                ),
            );
        }
    }
}

/// Script paths are relative `.py` paths under the tools directory
fn is_safe_script_path(path: &str) -> bool {
    !path.is_empty()
        && !path.starts_with('/')
        && !path.contains('\\')
        && !path.contains(':')
        && !path.split('/').any(|part| part == ".." || part.is_empty())
        && path.ends_with(".py")
}

fn check_script(
    path: &str,
    position: Position,
    resolver: &dyn ScriptResolver,
    findings: &mut Findings,
) {
    if !is_safe_script_path(path) {
        findings.error(
            Code::ScriptNotFound,
            Some(position),
            format!(
                "script path '{}' must be a relative .py path inside tools/",
                path
            ),
        );
    } else if !resolver.script_exists(path) {
        findings.error(
            Code::ScriptNotFound,
            Some(position),
            format!("script 'tools/{}' does not exist", path),
        );
    }
}
