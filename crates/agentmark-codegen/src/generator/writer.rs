//! Indented line writer and import collector for generated modules

use std::collections::{BTreeMap, BTreeSet};

const INDENT: &str = "    ";

/// Modules that ship with Python; grouped first in the import block
const STDLIB: &[&str] = &["importlib", "logging", "operator", "os", "typing", "urllib.parse"];

/// Line-oriented source buffer with an indentation level
#[derive(Debug, Default)]
pub(crate) struct Writer {
    out: String,
    depth: usize,
}

impl Writer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Write one line at the current depth
    pub(crate) fn line(&mut self, text: impl AsRef<str>) {
        let text = text.as_ref();
        if !text.is_empty() {
            for _ in 0..self.depth {
                self.out.push_str(INDENT);
            }
            self.out.push_str(text);
        }
        self.out.push('\n');
    }

    pub(crate) fn blank(&mut self) {
        self.out.push('\n');
    }

    /// Two blank lines, as between top-level definitions
    pub(crate) fn gap(&mut self) {
        self.out.push_str("\n\n");
    }

    pub(crate) fn indent(&mut self) {
        self.depth += 1;
    }

    pub(crate) fn dedent(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Write `header` and run `body` one level deeper
    pub(crate) fn block(&mut self, header: impl AsRef<str>, body: impl FnOnce(&mut Self)) {
        self.line(header);
        self.indent();
        body(self);
        self.dedent();
    }

    /// Append pre-rendered text verbatim
    pub(crate) fn raw(&mut self, text: &str) {
        self.out.push_str(text);
    }

    pub(crate) fn finish(self) -> String {
        self.out
    }
}

/// Imports requested while generating a module body
#[derive(Debug, Default)]
pub(crate) struct Imports {
    plain: BTreeSet<&'static str>,
    from: BTreeMap<String, BTreeSet<String>>,
    local: Vec<String>,
}

impl Imports {
    /// `import module`
    pub(crate) fn module(&mut self, module: &'static str) {
        self.plain.insert(module);
    }

    /// `from module import name`
    pub(crate) fn name(&mut self, module: &str, name: &str) {
        self.from
            .entry(module.to_string())
            .or_default()
            .insert(name.to_string());
    }

    /// A sibling generated module, rendered last
    pub(crate) fn local(&mut self, line: String) {
        if !self.local.contains(&line) {
            self.local.push(line);
        }
    }

    /// Render the import block: standard library, third party, local
    pub(crate) fn render(&self) -> String {
        let mut groups: Vec<Vec<String>> = vec![Vec::new(), Vec::new(), self.local.clone()];
        for module in &self.plain {
            let group = if STDLIB.contains(module) { 0 } else { 1 };
            groups[group].push(format!("import {}", module));
        }
        for (module, names) in &self.from {
            let group = if STDLIB.contains(&module.as_str()) { 0 } else { 1 };
            let names: Vec<&str> = names.iter().map(String::as_str).collect();
            groups[group].push(format!("from {} import {}", module, names.join(", ")));
        }
        groups
            .into_iter()
            .filter(|g| !g.is_empty())
            .map(|g| g.join("\n") + "\n")
            .collect::<Vec<_>>()
            .join("\n")
    }
}
