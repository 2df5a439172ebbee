//! Python spelling helpers: literals, type annotations and identifiers

use std::collections::BTreeSet;

use agentmark_core::ir::{ElementType, ScalarType, StateField, TypeDescriptor};
use serde_json::Value;

/// Python keywords; none of them can be used as an identifier
pub const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if",
    "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try",
    "while", "with", "yield",
];

/// Whether `name` is a Python keyword
pub fn is_keyword(name: &str) -> bool {
    KEYWORDS.contains(&name)
}

/// Double-quoted Python string literal
pub fn string(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Triple-quoted docstring
pub fn docstring(text: &str) -> String {
    let escaped = text.trim().replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"\"\"{}\"\"\"", escaped)
}

/// `snake_case` to `PascalCase`
pub fn pascal_case(name: &str) -> String {
    name.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect()
}

fn scalar(ty: ScalarType) -> &'static str {
    match ty {
        ScalarType::String => "str",
        ScalarType::Int => "int",
        ScalarType::Float => "float",
        ScalarType::Bool => "bool",
    }
}

/// Annotation for a type descriptor; enums become `Literal[...]`
pub fn annotation(ty: &TypeDescriptor) -> String {
    match ty {
        TypeDescriptor::Scalar(s) => scalar(*s).to_string(),
        TypeDescriptor::List(None) => "list".to_string(),
        TypeDescriptor::List(Some(ElementType::Dict)) => "list[dict]".to_string(),
        TypeDescriptor::List(Some(ElementType::Any)) => "list[Any]".to_string(),
        TypeDescriptor::List(Some(ElementType::Scalar(s))) => format!("list[{}]", scalar(*s)),
        TypeDescriptor::Dict(None) | TypeDescriptor::Dict(Some(ElementType::Any)) => {
            "dict".to_string()
        }
        TypeDescriptor::Dict(Some(ElementType::Dict)) => "dict[str, dict]".to_string(),
        TypeDescriptor::Dict(Some(ElementType::Scalar(s))) => {
            format!("dict[str, {}]", scalar(*s))
        }
        TypeDescriptor::Enum(values) => format!(
            "Literal[{}]",
            values.iter().map(|v| string(v)).collect::<Vec<_>>().join(", ")
        ),
        TypeDescriptor::Unrecognized(_) => "Any".to_string(),
    }
}

/// Python literal for a field's declared default, if it has one that reads
pub fn default_literal(field: &StateField) -> Option<String> {
    let raw = field.default.as_deref()?;
    let trimmed = raw.trim();
    match &field.ty {
        TypeDescriptor::Scalar(ScalarType::String) | TypeDescriptor::Enum(_) => Some(string(raw)),
        TypeDescriptor::Scalar(ScalarType::Int) => trimmed.parse::<i64>().ok().map(|v| v.to_string()),
        TypeDescriptor::Scalar(ScalarType::Float) => {
            trimmed.parse::<f64>().ok().map(|v| format!("{:?}", v))
        }
        TypeDescriptor::Scalar(ScalarType::Bool) => match trimmed.to_ascii_lowercase().as_str() {
            "true" => Some("True".to_string()),
            "false" => Some("False".to_string()),
            _ => None,
        },
        TypeDescriptor::List(_) | TypeDescriptor::Dict(_) => serde_json::from_str::<Value>(trimmed)
            .ok()
            .map(|v| value(&v)),
        TypeDescriptor::Unrecognized(_) => None,
    }
}

/// Python literal for a JSON value
pub fn value(v: &Value) -> String {
    match v {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => string(s),
        Value::Array(items) => format!(
            "[{}]",
            items.iter().map(value).collect::<Vec<_>>().join(", ")
        ),
        Value::Object(entries) => format!(
            "{{{}}}",
            entries
                .iter()
                .map(|(k, v)| format!("{}: {}", string(k), value(v)))
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

/// Hands out module-level identifiers without collisions
///
/// A preferred name is used as is when free; otherwise a numeric suffix
/// is appended. Keywords and reserved names are never handed out.
#[derive(Debug, Clone, Default)]
pub struct Namer {
    taken: BTreeSet<String>,
}

impl Namer {
    /// Create a namer that never hands out `reserved` or a keyword
    pub fn new(reserved: &[&str]) -> Self {
        let taken = KEYWORDS
            .iter()
            .chain(reserved)
            .map(|s| s.to_string())
            .collect();
        Self { taken }
    }

    /// Claim a name derived from `preferred`
    pub fn claim(&mut self, preferred: &str) -> String {
        let base: String = preferred
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect();
        let base = match base.chars().next() {
            Some(c) if c.is_ascii_digit() => format!("_{}", base),
            None => "_".to_string(),
            _ => base,
        };
        if self.taken.insert(base.clone()) {
            return base;
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}_{}", base, n);
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}
