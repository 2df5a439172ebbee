//! Static safety scan of condition expressions
//!
//! Conditions are emitted verbatim into routing functions, so the scan
//! only admits a small vocabulary: the `state` mapping, a handful of pure
//! builtins, literals and operators. Attribute names after `.` are free
//! except dunder attributes.

use crate::diagnostic::{Code, Findings};
use crate::ir::Agent;

/// Names a condition may reference
pub const ALLOWED_NAMES: &[&str] = &[
    "state", "len", "any", "all", "abs", "min", "max", "str", "int", "float", "bool", "True",
    "False", "None",
];

/// Operator keywords a condition may use
pub const OPERATOR_KEYWORDS: &[&str] = &["and", "or", "not", "in", "is", "if", "else"];

/// A problem found in a condition expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpressionIssue {
    /// Byte offset into the expression
    pub offset: usize,
    /// What is wrong
    pub message: String,
}

impl ExpressionIssue {
    fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

/// Scan `expr` and return every issue found, in order of appearance
pub fn scan_condition(expr: &str) -> Vec<ExpressionIssue> {
    let mut issues = Vec::new();
    if expr.trim().is_empty() {
        issues.push(ExpressionIssue::new(0, "condition is empty"));
        return issues;
    }

    let mut brackets: Vec<(char, usize)> = Vec::new();
    let mut after_dot = false;
    let mut chars = expr.char_indices().peekable();

    while let Some((offset, c)) = chars.next() {
        match c {
            c if c.is_whitespace() => continue,
            '"' | '\'' => {
                let mut closed = false;
                while let Some((_, next)) = chars.next() {
                    match next {
                        '\\' => {
                            chars.next();
                        }
                        n if n == c => {
                            closed = true;
                            break;
                        }
                        _ => {}
                    }
                }
                if !closed {
                    issues.push(ExpressionIssue::new(offset, "unterminated string literal"));
                }
            }
            c if c.is_ascii_digit() => {
                while chars
                    .peek()
                    .is_some_and(|(_, n)| n.is_ascii_alphanumeric() || *n == '_' || *n == '.')
                {
                    chars.next();
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut end = offset + c.len_utf8();
                while let Some(&(i, n)) = chars.peek() {
                    if n.is_alphanumeric() || n == '_' {
                        end = i + n.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let name = &expr[offset..end];
                if after_dot {
                    if name.starts_with("__") && name.ends_with("__") {
                        issues.push(ExpressionIssue::new(
                            offset,
                            format!("dunder attribute '{}' is not allowed", name),
                        ));
                    }
                } else if !ALLOWED_NAMES.contains(&name) && !OPERATOR_KEYWORDS.contains(&name) {
                    issues.push(ExpressionIssue::new(
                        offset,
                        format!(
                            "name '{}' is not allowed (only state, builtins {} and operators)",
                            name,
                            ALLOWED_NAMES[1..].join(", ")
                        ),
                    ));
                }
                after_dot = false;
                continue;
            }
            '#' => issues.push(ExpressionIssue::new(offset, "comments are not allowed")),
            ';' => issues.push(ExpressionIssue::new(
                offset,
                "statement separators are not allowed",
            )),
            '`' => issues.push(ExpressionIssue::new(offset, "backticks are not allowed")),
            '\\' => issues.push(ExpressionIssue::new(
                offset,
                "line continuations are not allowed",
            )),
            ':' if chars.peek().is_some_and(|(_, n)| *n == '=') => {
                chars.next();
                issues.push(ExpressionIssue::new(
                    offset,
                    "assignment expressions are not allowed",
                ));
            }
            '(' | '[' | '{' => brackets.push((c, offset)),
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match brackets.pop() {
                    Some((open, _)) if open == expected => {}
                    _ => issues.push(ExpressionIssue::new(
                        offset,
                        format!("unbalanced '{}'", c),
                    )),
                }
            }
            _ => {}
        }
        after_dot = c == '.';
    }

    for (open, offset) in brackets {
        issues.push(ExpressionIssue::new(offset, format!("unclosed '{}'", open)));
    }
    issues
}

pub(super) fn check_agent(agent: &Agent, findings: &mut Findings) {
    for decl in &agent.edges {
        let Some(condition) = &decl.condition else {
            continue;
        };
        for issue in scan_condition(condition) {
            findings.error(
                Code::UnsafeExpression,
                decl.condition_position.or(Some(decl.position)),
                format!(
                    "condition on edge {} -> {}: {}",
                    decl.source, decl.target, issue.message
                ),
            );
        }
    }
}
