//! Surface normalizer
//!
//! Condition expressions and system prompts are written as free text inside
//! `<condition>` and `<system_prompt>` elements, so they routinely contain
//! `<`, `>` and `&`. Before tree parsing, those characters are escaped
//! inside free-text spans; text outside the spans is left untouched.
//!
//! The scan produces a list of replacement edits that are applied once at
//! the end, so offsets recorded during the scan never shift.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::diagnostic::LineIndex;
use crate::tree::SyntaxError;

/// Elements whose content is free text rather than markup
pub const FREE_TEXT_TAGS: &[&str] = &["condition", "system_prompt"];

static ENTITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^&(?:amp|lt|gt|apos|quot|#[0-9]+|#x[0-9a-fA-F]+);").expect("valid entity regex")
});

/// Normalized document text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    /// Text safe for tree parsing
    pub text: String,
    /// Number of free-text spans that needed at least one escape
    pub escaped_spans: usize,
}

#[derive(Debug)]
struct Edit {
    start: usize,
    end: usize,
    replacement: &'static str,
}

/// Escape reserved characters inside free-text spans
///
/// Fails when a free-text span contains another free-text opening tag or
/// never closes.
pub fn normalize(text: &str) -> Result<Normalized, SyntaxError> {
    let index = LineIndex::new(text);
    let mut edits = Vec::new();
    let mut escaped_spans = 0;
    let mut pos = 0;

    while let Some(rel) = text[pos..].find('<') {
        let at = pos + rel;
        let rest = &text[at..];

        if rest.starts_with("<!--") {
            match rest.find("-->") {
                Some(end) => {
                    pos = at + end + 3;
                    continue;
                }
                // The tree parser reports the unterminated comment.
                None => break,
            }
        }

        let Some(tag) = free_text_open(rest) else {
            pos = at + 1;
            continue;
        };
        let Some(open_end) = tag_end(text, at) else {
            break;
        };
        if text[..open_end].ends_with("/>") {
            pos = open_end;
            continue;
        }

        let Some((content_end, close_end)) = find_close(text, open_end, tag) else {
            return Err(SyntaxError::new(
                index.position(at),
                format!("unterminated <{}> element", tag),
            ));
        };

        let content = &text[open_end..content_end];
        if let Some((nested_at, nested)) = nested_open(content) {
            return Err(SyntaxError::new(
                index.position(open_end + nested_at),
                format!("<{}> cannot appear inside <{}>", nested, tag),
            ));
        }

        let before = edits.len();
        escape_span(content, open_end, &mut edits);
        if edits.len() > before {
            escaped_spans += 1;
        }
        pos = close_end;
    }

    Ok(Normalized {
        text: apply(text, &edits),
        escaped_spans,
    })
}

/// If `rest` starts with an opening free-text tag, return its name
fn free_text_open(rest: &str) -> Option<&'static str> {
    let name_part = rest.strip_prefix('<')?;
    FREE_TEXT_TAGS.iter().copied().find(|tag| {
        name_part.strip_prefix(tag).is_some_and(|after| {
            after
                .chars()
                .next()
                .is_some_and(|c| c == '>' || c == '/' || c.is_whitespace())
        })
    })
}

/// Offset just past the `>` closing the tag that starts at `start`
fn tag_end(text: &str, start: usize) -> Option<usize> {
    let mut quote = None;
    for (i, c) in text[start..].char_indices() {
        match (quote, c) {
            (None, '"' | '\'') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            (None, '>') => return Some(start + i + 1),
            _ => {}
        }
    }
    None
}

/// Locate `</tag>` (whitespace allowed before `>`); returns (content end, close end)
fn find_close(text: &str, from: usize, tag: &str) -> Option<(usize, usize)> {
    let needle = format!("</{}", tag);
    let mut pos = from;
    while let Some(rel) = text[pos..].find(&needle) {
        let start = pos + rel;
        let after = &text[start + needle.len()..];
        let trimmed = after.trim_start();
        if trimmed.starts_with('>') {
            let close_end = start + needle.len() + (after.len() - trimmed.len()) + 1;
            return Some((start, close_end));
        }
        pos = start + needle.len();
    }
    None
}

fn nested_open(content: &str) -> Option<(usize, &'static str)> {
    content
        .match_indices('<')
        .find_map(|(i, _)| free_text_open(&content[i..]).map(|tag| (i, tag)))
}

fn escape_span(content: &str, offset: usize, edits: &mut Vec<Edit>) {
    for (i, c) in content.char_indices() {
        let replacement = match c {
            '<' => "&lt;",
            '>' => "&gt;",
            '&' if !ENTITY.is_match(&content[i..]) => "&amp;",
            _ => continue,
        };
        edits.push(Edit {
            start: offset + i,
            end: offset + i + c.len_utf8(),
            replacement,
        });
    }
}

fn apply(text: &str, edits: &[Edit]) -> String {
    let extra: usize = edits.iter().map(|e| e.replacement.len()).sum();
    let mut out = String::with_capacity(text.len() + extra);
    let mut last = 0;
    for edit in edits {
        out.push_str(&text[last..edit.start]);
        out.push_str(edit.replacement);
        last = edit.end;
    }
    out.push_str(&text[last..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::Position;

    #[test]
    fn test_escapes_comparisons_in_condition() {
        let input = r#"<edge source="a" target="b"><condition>state["n"] > 3 && state["m"] < 2</condition></edge>"#;
        let normalized = normalize(input).unwrap();
        assert_eq!(
            normalized.text,
            r#"<edge source="a" target="b"><condition>state["n"] &gt; 3 &amp;&amp; state["m"] &lt; 2</condition></edge>"#
        );
        assert_eq!(normalized.escaped_spans, 1);
    }

    #[test]
    fn test_existing_entities_are_kept() {
        let input = "<system_prompt>Use &amp; and &#60; but not & alone</system_prompt>";
        let normalized = normalize(input).unwrap();
        assert_eq!(
            normalized.text,
            "<system_prompt>Use &amp; and &#60; but not &amp; alone</system_prompt>"
        );
    }

    #[test]
    fn test_text_outside_spans_is_untouched() {
        let input = "<graph>\n  <node id=\"a\" type=\"script\" path=\"a.py\"/>\n</graph>";
        let normalized = normalize(input).unwrap();
        assert_eq!(normalized.text, input);
        assert_eq!(normalized.escaped_spans, 0);
    }

    #[test]
    fn test_span_with_attributes_and_spaced_close() {
        let input = "<system_prompt lang=\"en\">a > b</system_prompt >";
        let normalized = normalize(input).unwrap();
        assert_eq!(
            normalized.text,
            "<system_prompt lang=\"en\">a &gt; b</system_prompt >"
        );
    }

    #[test]
    fn test_self_closing_span_is_skipped() {
        let input = "<node><system_prompt/><x>1</x></node>";
        assert_eq!(normalize(input).unwrap().text, input);
    }

    #[test]
    fn test_multiple_spans_counted() {
        let input = "<a><condition>x < 1</condition><condition>y</condition><condition>z > 2</condition></a>";
        assert_eq!(normalize(input).unwrap().escaped_spans, 2);
    }

    #[test]
    fn test_comment_containing_tag_is_ignored() {
        let input = "<!-- <condition> --><a/>";
        assert_eq!(normalize(input).unwrap().text, input);
    }

    #[test]
    fn test_nested_free_text_tag_is_an_error() {
        let input = "<a>\n<condition>x <condition> y</condition></a>";
        let err = normalize(input).unwrap_err();
        assert_eq!(err.position, Position::new(2, 14));
        assert!(err.message.contains("cannot appear inside"));
    }

    #[test]
    fn test_unterminated_span_is_an_error() {
        let input = "<a><system_prompt>hello</a>";
        let err = normalize(input).unwrap_err();
        assert_eq!(err.position, Position::new(1, 4));
        assert!(err.message.contains("unterminated <system_prompt>"));
    }

    #[test]
    fn test_similar_tag_names_are_not_spans() {
        let input = "<conditions><x>1</x></conditions>";
        assert_eq!(normalize(input).unwrap().text, input);
    }
}
