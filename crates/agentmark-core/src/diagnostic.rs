//! Findings produced by the front-end and the validator
//!
//! Every problem found in a document is a [`Diagnostic`] carrying a stable
//! [`Code`], the document it was found in, a source [`Position`] and a
//! message. Diagnostics are collected into a [`ValidationReport`] in a
//! deterministic order.

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Line/column position inside a document (both 1-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    /// Line number
    pub line: u32,
    /// Column number, counted in characters
    pub column: u32,
}

impl Position {
    /// Create a new position
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }

    /// Position of the first character of a document
    pub fn start() -> Self {
        Self::new(1, 1)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Byte offset → [`Position`] lookup for one document
#[derive(Debug, Clone)]
pub struct LineIndex<'a> {
    text: &'a str,
    line_starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    /// Index the line starts of `text`
    pub fn new(text: &'a str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(text.match_indices('\n').map(|(i, _)| i + 1));
        Self { text, line_starts }
    }

    /// Resolve a byte offset to a position
    pub fn position(&self, offset: usize) -> Position {
        let offset = offset.min(self.text.len());
        let line = match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next - 1,
        };
        let start = self.line_starts[line];
        let column = self
            .text
            .get(start..offset)
            .map(|s| s.chars().count())
            .unwrap_or(0);
        Position::new(line as u32 + 1, column as u32 + 1)
    }
}

/// Severity of a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Fatal; blocks code generation
    Error,
    /// Non-fatal unless strict mode is enabled
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// Broad class a finding belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// The document could not be turned into a model
    Structural,
    /// The model violates a validation rule
    Semantic,
    /// Possible race between concurrent writers
    Hazard,
    /// Construct that degrades at runtime instead of failing
    Advisory,
}

macro_rules! codes {
    ($($(#[$doc:meta])* $variant:ident => $code:literal, $category:ident;)*) => {
        /// Stable identifier of a finding
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum Code {
            $($(#[$doc])* $variant,)*
        }

        impl Code {
            /// Every known code, in numeric order
            pub const ALL: &'static [Code] = &[$(Code::$variant,)*];

            /// The code as printed in reports (e.g. `E304`)
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Code::$variant => $code,)*
                }
            }

            /// Class of finding this code belongs to
            pub fn category(&self) -> Category {
                match self {
                    $(Code::$variant => Category::$category,)*
                }
            }
        }
    };
}

codes! {
    /// Root element is not the expected `<project>` or `<agent>`
    RootElement => "E001", Structural;
    /// A required block or attribute is missing
    MissingBlock => "E002", Semantic;
    /// No project document was supplied
    MissingProject => "E003", Semantic;
    /// Spec version is missing or unsupported
    UnsupportedVersion => "E004", Semantic;
    /// Document is not well-formed markup
    Malformed => "E005", Structural;
    /// A free-text span is nested or unterminated
    FreeTextSpan => "E006", Structural;
    /// Element or attribute not recognized at this position
    UnrecognizedConstruct => "E007", Structural;
    /// Attribute value could not be interpreted
    InvalidAttribute => "E008", Structural;
    /// Node id declared twice
    DuplicateNode => "E101", Semantic;
    /// Tool id declared twice
    DuplicateTool => "E102", Semantic;
    /// Field or parameter declared twice within one scope
    DuplicateField => "E103", Semantic;
    /// Identifier uses a reserved word
    ReservedWord => "E104", Semantic;
    /// Node type not recognized
    UnknownNodeType => "E105", Structural;
    /// Tool type not recognized
    UnknownToolType => "E106", Structural;
    /// Type descriptor not recognized
    InvalidType => "E107", Semantic;
    /// Merge policy unknown or incompatible with the field type
    InvalidMergePolicy => "E108", Semantic;
    /// Enum default is not a member of the value set
    EnumDefault => "E109", Semantic;
    /// Default value does not fit the declared type
    InvalidDefault => "E110", Semantic;
    /// Identifier does not have a valid shape
    InvalidIdentifier => "E111", Semantic;
    /// `messages` declared as a state field
    MessagesField => "E201", Semantic;
    /// Required field carries a default
    RequiredWithDefault => "E202", Semantic;
    /// No edge leaves `__START__`
    NoEntry => "E301", Semantic;
    /// Edge target does not resolve
    UnknownTarget => "E302", Semantic;
    /// Edge source does not resolve
    UnknownSource => "E303", Semantic;
    /// Conditional group has no default edge
    MissingDefault => "E304", Semantic;
    /// Default edge carries a condition
    DefaultWithCondition => "E305", Semantic;
    /// Conditional group has more than one default edge
    MultipleDefaults => "E306", Semantic;
    /// Tool reference does not resolve
    UnknownTool => "E307", Semantic;
    /// Script path does not resolve
    ScriptNotFound => "E308", Semantic;
    /// Subgraph references an unknown agent
    UnknownAgent => "E309", Semantic;
    /// Subgraph input map names a field the child does not declare
    InputMapField => "E310", Semantic;
    /// Subgraph output map names a field the child does not declare
    OutputMapField => "E311", Semantic;
    /// Node cannot be reached from `__START__`
    Unreachable => "E312", Semantic;
    /// Node has no outgoing edge
    NoOutgoingEdge => "E313", Semantic;
    /// Edges from one source mix routing categories
    MixedEdgeTypes => "E314", Semantic;
    /// Map items field is missing or not list-typed
    MapItemsNotList => "E315", Semantic;
    /// Tool parameter or URL placeholder has no matching state field or parameter
    UnboundParameter => "E316", Semantic;
    /// Tool body or response mapping names an undeclared field
    ToolMappingField => "E317", Semantic;
    /// Subgraph map names a field the parent does not declare
    ParentMapField => "E318", Semantic;
    /// LLM provider not recognized
    UnknownProvider => "E401", Semantic;
    /// Subgraph references form a cycle
    SubgraphCycle => "E402", Semantic;
    /// Agent name declared by more than one document
    DuplicateAgent => "E403", Semantic;
    /// Condition expression uses a disallowed construct
    UnsafeExpression => "E501", Semantic;
    /// Malformed `${...}` interpolation token
    Interpolation => "E502", Semantic;
    /// Concurrent branches write the same overwrite field
    OverwriteRace => "W301", Hazard;
    /// Prompt interpolates a field the agent does not declare
    UndeclaredPromptField => "W502", Advisory;
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Code {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A single finding
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    /// Error or warning
    pub severity: Severity,
    /// Stable code
    pub code: Code,
    /// Class of finding
    pub category: Category,
    /// Id of the document the finding belongs to (e.g. `agents/support.amk`)
    pub document: String,
    /// Source position, when the finding points at a construct
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    /// Human-readable message
    pub message: String,
}

impl Diagnostic {
    /// Create an error-level diagnostic
    pub fn error(
        code: Code,
        document: impl Into<String>,
        position: Option<Position>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity: Severity::Error,
            code,
            category: code.category(),
            document: document.into(),
            position,
            message: message.into(),
        }
    }

    /// Create a warning-level diagnostic
    pub fn warning(
        code: Code,
        document: impl Into<String>,
        position: Option<Position>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(code, document, position, message)
        }
    }

    /// Whether this finding is fatal
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]: {}", self.severity, self.code, self.message)?;
        match self.position {
            Some(position) => write!(f, "\n  --> {}:{}", self.document, position),
            None => write!(f, "\n  --> {}", self.document),
        }
    }
}

/// Accumulates findings for one document
#[derive(Debug)]
pub struct Findings<'a> {
    document: &'a str,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Findings<'a> {
    /// Start collecting findings for `document`
    pub fn new(document: &'a str) -> Self {
        Self {
            document,
            diagnostics: Vec::new(),
        }
    }

    /// Document id the findings belong to
    pub fn document(&self) -> &'a str {
        self.document
    }

    /// Record an error
    pub fn error(&mut self, code: Code, position: Option<Position>, message: impl Into<String>) {
        self.diagnostics
            .push(Diagnostic::error(code, self.document, position, message));
    }

    /// Record a warning
    pub fn warning(&mut self, code: Code, position: Option<Position>, message: impl Into<String>) {
        self.diagnostics
            .push(Diagnostic::warning(code, self.document, position, message));
    }

    /// Whether any error has been recorded
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    /// Number of findings recorded so far
    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    /// Whether nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// Consume the collector
    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

/// Aggregated outcome of a validation run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    /// All findings in report order
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationReport {
    /// Create an empty report
    pub fn new() -> Self {
        Self::default()
    }

    /// Append findings, preserving their order
    pub fn extend(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        self.diagnostics.extend(diagnostics);
    }

    /// Append one finding
    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    /// Error-level findings only
    pub fn errors(&self) -> Vec<&Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_error()).collect()
    }

    /// Warning-level findings only
    pub fn warnings(&self) -> Vec<&Diagnostic> {
        self.diagnostics.iter().filter(|d| !d.is_error()).collect()
    }

    /// Whether any fatal finding was recorded
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    /// Whether the run passes; strict mode also fails on warnings
    pub fn is_success(&self, strict: bool) -> bool {
        if strict {
            self.diagnostics.is_empty()
        } else {
            !self.has_errors()
        }
    }

    /// Findings carrying `code`
    pub fn with_code(&self, code: Code) -> Vec<&Diagnostic> {
        self.diagnostics.iter().filter(|d| d.code == code).collect()
    }

    /// One-line summary such as `2 errors, 1 warning`
    pub fn summary(&self) -> String {
        let errors = self.errors().len();
        let warnings = self.warnings().len();
        format!(
            "{} error{}, {} warning{}",
            errors,
            if errors == 1 { "" } else { "s" },
            warnings,
            if warnings == 1 { "" } else { "s" }
        )
    }
}
