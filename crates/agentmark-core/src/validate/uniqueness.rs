//! Uniqueness rules: identifier shape, reserved words and duplicates

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::diagnostic::{Code, Findings, Position};
use crate::ir::{Agent, NodeKind, Project, is_identifier, is_reserved};

static ENV_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid env name regex"));

pub(super) fn check_project(project: &Project, findings: &mut Findings) {
    let mut seen = BTreeSet::new();
    for var in &project.env {
        if !ENV_NAME.is_match(&var.name) {
            findings.error(
                Code::InvalidIdentifier,
                Some(var.position),
                format!("'{}' is not a valid environment variable name", var.name),
            );
        } else if !seen.insert(var.name.as_str()) {
            findings.error(
                Code::DuplicateField,
                Some(var.position),
                format!("environment variable '{}' is declared more than once", var.name),
            );
        }
    }
    if let Some(auth_env) = &project.server.auth_env
        && !ENV_NAME.is_match(auth_env)
    {
        findings.error(
            Code::InvalidIdentifier,
            Some(project.position),
            format!("'{}' is not a valid environment variable name", auth_env),
        );
    }
}

/// Reports shape and reserved-word problems; returns whether the name is usable
fn check_name(kind: &str, name: &str, position: Position, findings: &mut Findings) -> bool {
    if is_reserved(name) {
        findings.error(
            Code::ReservedWord,
            Some(position),
            format!("{} '{}' uses a reserved word", kind, name),
        );
        false
    } else if !is_identifier(name) {
        findings.error(
            Code::InvalidIdentifier,
            Some(position),
            format!(
                "{} '{}' is not a valid identifier (lowercase letters, digits and '_', not starting with a digit)",
                kind, name
            ),
        );
        false
    } else {
        true
    }
}

pub(super) fn check_agent(agent: &Agent, findings: &mut Findings) {
    check_name("agent name", &agent.name, agent.position, findings);

    let mut fields = BTreeSet::new();
    for field in &agent.state {
        if field.name == "messages" {
            findings.error(
                Code::MessagesField,
                Some(field.position),
                "'messages' is provided implicitly and cannot be declared as a state field",
            );
            continue;
        }
        if check_name("state field", &field.name, field.position, findings)
            && !fields.insert(field.name.as_str())
        {
            findings.error(
                Code::DuplicateField,
                Some(field.position),
                format!("state field '{}' is declared more than once", field.name),
            );
        }
    }

    let mut tools = BTreeSet::new();
    for tool in &agent.tools {
        if check_name("tool id", &tool.id, tool.position, findings) && !tools.insert(tool.id.as_str())
        {
            findings.error(
                Code::DuplicateTool,
                Some(tool.position),
                format!("tool '{}' is declared more than once", tool.id),
            );
        }
        let mut params = BTreeSet::new();
        for param in tool.kind.parameters() {
            if check_name("parameter", &param.name, param.position, findings)
                && !params.insert(param.name.as_str())
            {
                findings.error(
                    Code::DuplicateField,
                    Some(param.position),
                    format!(
                        "parameter '{}' of tool '{}' is declared more than once",
                        param.name, tool.id
                    ),
                );
            }
        }
    }

    let mut nodes = BTreeSet::new();
    for node in &agent.nodes {
        if check_name("node id", &node.id, node.position, findings) && !nodes.insert(node.id.as_str())
        {
            findings.error(
                Code::DuplicateNode,
                Some(node.position),
                format!("node '{}' is declared more than once", node.id),
            );
        }
        if let NodeKind::Llm(llm) = &node.kind {
            let mut outputs = BTreeSet::new();
            for field in &llm.output_schema {
                if check_name("output field", &field.name, field.position, findings)
                    && !outputs.insert(field.name.as_str())
                {
                    findings.error(
                        Code::DuplicateField,
                        Some(field.position),
                        format!(
                            "output field '{}' of node '{}' is declared more than once",
                            field.name, node.id
                        ),
                    );
                }
            }
        }
    }

    for node in &agent.nodes {
        let NodeKind::Llm(llm) = &node.kind else {
            continue;
        };
        if llm.tool_binds.is_empty() {
            continue;
        }
        let companion = format!("{}_tools", node.id);
        if let Some(clash) = agent.nodes.iter().find(|n| n.id == companion) {
            findings.error(
                Code::DuplicateNode,
                Some(clash.position),
                format!(
                    "node id '{}' collides with the tool node generated for '{}'",
                    companion, node.id
                ),
            );
        }
    }
}
