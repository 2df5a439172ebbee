//! Parse tree builder
//!
//! Turns normalized document text into an ordered tree of [`Element`]s.
//! Every element has either child elements or a single text blob, never
//! both; whitespace between child elements is dropped.
//!
//! Supported markup: an optional `<?xml ...?>` declaration, comments,
//! CDATA sections, self-closing tags, single- or double-quoted attribute
//! values, the five predefined entities and numeric character references.

use indexmap::IndexMap;
use thiserror::Error;

use crate::diagnostic::{LineIndex, Position};

/// A markup error that stops processing of one document
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (at {position})")]
pub struct SyntaxError {
    /// Where the problem was detected
    pub position: Position,
    /// What went wrong
    pub message: String,
}

impl SyntaxError {
    /// Create a new syntax error
    pub fn new(position: Position, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}

/// Body of an element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    /// No children and no (non-whitespace) text
    Empty,
    /// Text content with entities decoded
    Text(String),
    /// Child elements in document order
    Children(Vec<Element>),
}

/// One element of the parse tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Tag name
    pub tag: String,
    /// Attributes in document order
    pub attributes: IndexMap<String, String>,
    /// Children or text
    pub content: Content,
    /// Position of the opening `<`
    pub position: Position,
}

impl Element {
    /// Attribute value by name
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Child elements (empty for text or empty content)
    pub fn children(&self) -> &[Element] {
        match &self.content {
            Content::Children(children) => children,
            _ => &[],
        }
    }

    /// Text content, if the element holds text
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            Content::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Children with the given tag
    pub fn children_named<'a, 't>(
        &'a self,
        tag: &'t str,
    ) -> impl Iterator<Item = &'a Element> + use<'a, 't> {
        self.children().iter().filter(move |c| c.tag == tag)
    }

    /// First child with the given tag
    pub fn child(&self, tag: &str) -> Option<&Element> {
        self.children().iter().find(|c| c.tag == tag)
    }
}

/// Deepest element nesting accepted
pub const MAX_DEPTH: usize = 64;

/// Parse normalized text into a tree rooted at the single top-level element
pub fn parse(text: &str) -> Result<Element, SyntaxError> {
    let mut parser = Parser {
        src: text,
        pos: 0,
        depth: 0,
        index: LineIndex::new(text),
    };
    parser.document()
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
    index: LineIndex<'a>,
}

impl<'a> Parser<'a> {
    fn document(&mut self) -> Result<Element, SyntaxError> {
        if self.rest().starts_with('\u{feff}') {
            self.pos += '\u{feff}'.len_utf8();
        }
        self.skip_misc()?;
        if self.at_end() {
            return Err(self.error_here("document has no root element"));
        }
        if !self.rest().starts_with('<') {
            return Err(self.error_here("expected '<' at start of root element"));
        }
        let root = self.element()?;
        self.skip_misc()?;
        if !self.at_end() {
            return Err(self.error_here("unexpected content after the root element"));
        }
        Ok(root)
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn position(&self, offset: usize) -> Position {
        self.index.position(offset)
    }

    fn error_at(&self, offset: usize, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(self.position(offset), message)
    }

    fn error_here(&self, message: impl Into<String>) -> SyntaxError {
        self.error_at(self.pos, message)
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    /// Whitespace, comments, processing instructions and doctype declarations
    fn skip_misc(&mut self) -> Result<(), SyntaxError> {
        loop {
            self.skip_whitespace();
            let rest = self.rest();
            if rest.starts_with("<!--") {
                self.skip_comment()?;
            } else if rest.starts_with("<?") {
                self.skip_until("?>", "unterminated processing instruction")?;
            } else if rest.starts_with("<!DOCTYPE") {
                self.skip_until(">", "unterminated doctype declaration")?;
            } else {
                return Ok(());
            }
        }
    }

    fn skip_comment(&mut self) -> Result<(), SyntaxError> {
        self.skip_until("-->", "unterminated comment")
    }

    fn skip_until(&mut self, terminator: &str, message: &str) -> Result<(), SyntaxError> {
        match self.rest().find(terminator) {
            Some(end) => {
                self.pos += end + terminator.len();
                Ok(())
            }
            None => Err(self.error_here(message)),
        }
    }

    fn name(&mut self) -> Result<&'a str, SyntaxError> {
        let rest = self.rest();
        let mut chars = rest.char_indices();
        match chars.next() {
            Some((_, c)) if c.is_alphabetic() || c == '_' || c == ':' => {}
            _ => return Err(self.error_here("expected a name")),
        }
        let end = chars
            .find(|(_, c)| !(c.is_alphanumeric() || matches!(c, '_' | ':' | '-' | '.')))
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        self.pos += end;
        Ok(&rest[..end])
    }

    fn expect(&mut self, token: &str) -> Result<(), SyntaxError> {
        if self.rest().starts_with(token) {
            self.pos += token.len();
            Ok(())
        } else {
            Err(self.error_here(format!("expected '{}'", token)))
        }
    }

    fn element(&mut self) -> Result<Element, SyntaxError> {
        if self.depth == MAX_DEPTH {
            return Err(self.error_here(format!(
                "elements nested deeper than {} levels",
                MAX_DEPTH
            )));
        }
        self.depth += 1;
        let element = self.element_body();
        self.depth -= 1;
        element
    }

    fn element_body(&mut self) -> Result<Element, SyntaxError> {
        let start = self.pos;
        self.expect("<")?;
        let tag = self.name()?.to_string();
        let mut attributes = IndexMap::new();

        loop {
            let before = self.pos;
            self.skip_whitespace();
            if self.rest().starts_with("/>") {
                self.pos += 2;
                return Ok(Element {
                    tag,
                    attributes,
                    content: Content::Empty,
                    position: self.position(start),
                });
            }
            if self.rest().starts_with('>') {
                self.pos += 1;
                break;
            }
            if self.at_end() {
                return Err(self.error_at(start, format!("unterminated <{}> tag", tag)));
            }
            if self.pos == before {
                return Err(self.error_here(format!(
                    "expected whitespace before attribute in <{}>",
                    tag
                )));
            }
            let attr_start = self.pos;
            let name = self.name()?.to_string();
            self.skip_whitespace();
            self.expect("=")?;
            self.skip_whitespace();
            let value = self.attribute_value(&name)?;
            if attributes.contains_key(&name) {
                return Err(self.error_at(
                    attr_start,
                    format!("duplicate attribute '{}' on <{}>", name, tag),
                ));
            }
            attributes.insert(name, value);
        }

        let mut children = Vec::new();
        let mut text = String::new();
        let mut text_start = None;

        loop {
            let rest = self.rest();
            if rest.starts_with("</") {
                let close_start = self.pos;
                self.pos += 2;
                let closing = self.name()?;
                if closing != tag {
                    return Err(self.error_at(
                        close_start,
                        format!(
                            "mismatched closing tag: expected </{}>, found </{}>",
                            tag, closing
                        ),
                    ));
                }
                self.skip_whitespace();
                self.expect(">")?;
                break;
            } else if rest.starts_with("<!--") {
                self.skip_comment()?;
            } else if let Some(cdata) = rest.strip_prefix("<![CDATA[") {
                let Some(end) = cdata.find("]]>") else {
                    return Err(self.error_here("unterminated CDATA section"));
                };
                text_start.get_or_insert(self.pos);
                text.push_str(&cdata[..end]);
                self.pos += "<![CDATA[".len() + end + 3;
            } else if rest.starts_with("<?") {
                self.skip_until("?>", "unterminated processing instruction")?;
            } else if rest.starts_with('<') {
                children.push(self.element()?);
            } else if rest.is_empty() {
                return Err(self.error_at(start, format!("unterminated <{}> element", tag)));
            } else {
                let end = rest.find('<').unwrap_or(rest.len());
                text_start.get_or_insert(self.pos);
                let decoded = self.decode(&rest[..end], self.pos)?;
                text.push_str(&decoded);
                self.pos += end;
            }
        }

        let has_text = !text.trim().is_empty();
        let content = if !children.is_empty() {
            if has_text {
                let at = text_start.unwrap_or(start);
                return Err(self.error_at(
                    at,
                    format!("<{}> mixes text with child elements", tag),
                ));
            }
            Content::Children(children)
        } else if has_text {
            Content::Text(text)
        } else {
            Content::Empty
        };

        Ok(Element {
            tag,
            attributes,
            content,
            position: self.position(start),
        })
    }

    fn attribute_value(&mut self, name: &str) -> Result<String, SyntaxError> {
        let quote = match self.rest().chars().next() {
            Some(q @ ('"' | '\'')) => q,
            _ => {
                return Err(self.error_here(format!(
                    "value of attribute '{}' must be quoted",
                    name
                )));
            }
        };
        self.pos += 1;
        let value_start = self.pos;
        let Some(end) = self.rest().find(quote) else {
            return Err(self.error_at(
                value_start - 1,
                format!("unterminated value for attribute '{}'", name),
            ));
        };
        let raw = &self.rest()[..end];
        if let Some(lt) = raw.find('<') {
            return Err(self.error_at(
                value_start + lt,
                format!("'<' is not allowed in the value of attribute '{}'", name),
            ));
        }
        let value = self.decode(raw, value_start)?;
        self.pos += end + 1;
        Ok(value)
    }

    /// Decode entity and character references in `raw`, which starts at `offset`
    fn decode(&self, raw: &str, offset: usize) -> Result<String, SyntaxError> {
        if !raw.contains('&') {
            return Ok(raw.to_string());
        }
        let mut out = String::with_capacity(raw.len());
        let mut rest = raw;
        while let Some(amp) = rest.find('&') {
            out.push_str(&rest[..amp]);
            let at = offset + (raw.len() - rest.len()) + amp;
            let after = &rest[amp + 1..];
            let Some(semi) = after.find(';') else {
                return Err(self.error_at(at, "unescaped '&' (use &amp;)"));
            };
            let entity = &after[..semi];
            let decoded = match entity {
                "amp" => '&',
                "lt" => '<',
                "gt" => '>',
                "quot" => '"',
                "apos" => '\'',
                _ => {
                    let code = if let Some(hex) = entity.strip_prefix("#x") {
                        u32::from_str_radix(hex, 16).ok()
                    } else if let Some(dec) = entity.strip_prefix('#') {
                        dec.parse::<u32>().ok()
                    } else {
                        None
                    };
                    match code.and_then(char::from_u32) {
                        Some(c) => c,
                        None => {
                            return Err(
                                self.error_at(at, format!("unknown entity '&{};'", entity))
                            );
                        }
                    }
                }
            };
            out.push(decoded);
            rest = &after[semi + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }
}
