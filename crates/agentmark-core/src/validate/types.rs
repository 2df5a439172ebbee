//! Type rules: descriptors, merge policies and default values

use serde_json::Value;

use crate::diagnostic::{Code, Findings, Position};
use crate::ir::{
    Agent, ElementType, MergePolicy, NodeKind, ScalarType, StateField, ToolKind, TypeDescriptor,
};

pub(super) fn check_agent(agent: &Agent, findings: &mut Findings) {
    for field in &agent.state {
        if !check_descriptor("state field", &field.name, &field.ty, field.position, findings) {
            continue;
        }
        check_policy(field, findings);
        match (&field.default, field.required) {
            (Some(_), true) => findings.error(
                Code::RequiredWithDefault,
                Some(field.position),
                format!("required field '{}' cannot have a default value", field.name),
            ),
            (Some(default), false) => check_default(field, default, findings),
            (None, _) => {}
        }
    }

    for tool in &agent.tools {
        for param in tool.kind.parameters() {
            check_descriptor("parameter", &param.name, &param.ty, param.position, findings);
        }
        if let ToolKind::ApiCall(api) = &tool.kind
            && let Some(body) = &api.body
        {
            for field in &body.fields {
                check_descriptor("body field", &field.name, &field.ty, field.position, findings);
            }
        }
    }

    for node in &agent.nodes {
        if let NodeKind::Llm(llm) = &node.kind {
            for field in &llm.output_schema {
                check_descriptor("output field", &field.name, &field.ty, field.position, findings);
            }
        }
    }
}

/// Returns whether the descriptor is usable
fn check_descriptor(
    kind: &str,
    name: &str,
    ty: &TypeDescriptor,
    position: Position,
    findings: &mut Findings,
) -> bool {
    match ty {
        TypeDescriptor::Unrecognized(raw) => {
            findings.error(
                Code::InvalidType,
                Some(position),
                format!(
                    "{} '{}' has unknown type '{}' (expected string, int, float, bool, list, dict, enum, list[T] or dict[T])",
                    kind, name, raw
                ),
            );
            false
        }
        TypeDescriptor::Enum(values) if values.is_empty() => {
            findings.error(
                Code::InvalidType,
                Some(position),
                format!("enum {} '{}' must declare its values", kind, name),
            );
            false
        }
        _ => true,
    }
}

fn check_policy(field: &StateField, findings: &mut Findings) {
    match &field.policy {
        MergePolicy::Unrecognized(raw) => findings.error(
            Code::InvalidMergePolicy,
            Some(field.position),
            format!(
                "unknown reducer '{}' on field '{}' (expected overwrite, append, add, merge or concat)",
                raw, field.name
            ),
        ),
        policy if !policy.is_compatible_with(&field.ty) => findings.error(
            Code::InvalidMergePolicy,
            Some(field.position),
            format!(
                "reducer '{}' cannot be used on field '{}' of type {}",
                policy.name(),
                field.name,
                field.ty
            ),
        ),
        _ => {}
    }
}

fn check_default(field: &StateField, raw: &str, findings: &mut Findings) {
    if let TypeDescriptor::Enum(values) = &field.ty {
        if !values.iter().any(|v| v == raw) {
            findings.error(
                Code::EnumDefault,
                Some(field.position),
                format!(
                    "default '{}' of field '{}' is not one of: {}",
                    raw,
                    field.name,
                    values.join(", ")
                ),
            );
        }
        return;
    }
    if !default_fits(&field.ty, raw) {
        findings.error(
            Code::InvalidDefault,
            Some(field.position),
            format!(
                "default '{}' of field '{}' is not a valid {} value",
                raw, field.name, field.ty
            ),
        );
    }
}

/// Whether a textual default can be read as a value of `ty`
///
/// Scalars use their literal spelling; containers use JSON.
pub(crate) fn default_fits(ty: &TypeDescriptor, raw: &str) -> bool {
    let raw = raw.trim();
    match ty {
        TypeDescriptor::Scalar(scalar) => scalar_fits(*scalar, raw),
        TypeDescriptor::List(element) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Array(items)) => element
                .map(|e| items.iter().all(|item| element_fits(e, item)))
                .unwrap_or(true),
            _ => false,
        },
        TypeDescriptor::Dict(element) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(entries)) => element
                .map(|e| entries.values().all(|value| element_fits(e, value)))
                .unwrap_or(true),
            _ => false,
        },
        TypeDescriptor::Enum(values) => values.iter().any(|v| v == raw),
        TypeDescriptor::Unrecognized(_) => false,
    }
}

fn scalar_fits(scalar: ScalarType, raw: &str) -> bool {
    match scalar {
        ScalarType::String => true,
        ScalarType::Int => raw.parse::<i64>().is_ok(),
        ScalarType::Float => raw.parse::<f64>().is_ok_and(f64::is_finite),
        ScalarType::Bool => matches!(raw.to_ascii_lowercase().as_str(), "true" | "false"),
    }
}

fn element_fits(element: ElementType, value: &Value) -> bool {
    match element {
        ElementType::Any => true,
        ElementType::Dict => value.is_object(),
        ElementType::Scalar(ScalarType::String) => value.is_string(),
        ElementType::Scalar(ScalarType::Int) => value.is_i64() || value.is_u64(),
        ElementType::Scalar(ScalarType::Float) => value.is_number(),
        ElementType::Scalar(ScalarType::Bool) => value.is_boolean(),
    }
}
