//! Workflow intermediate representation
//!
//! The model builder produces these types from parse trees; the validator
//! checks them and folds edge declarations into routing [`Edge`]s; the code
//! generator consumes them read-only.
//!
//! ```text
//! Project ─┬─ LlmConfig / ServerConfig / EnvVar
//!          └─ Agent ─┬─ StateField
//!                    ├─ Tool      (ApiCall | LocalScript | ScriptTool)
//!                    ├─ Node      (Llm | Action | Script | Subgraph)
//!                    └─ EdgeDecl  ──validate──▶ Edge
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

use crate::diagnostic::Position;

/// Entry boundary marker
pub const START: &str = "__START__";

/// Exit boundary marker
pub const END: &str = "__END__";

/// Words that may not be used as identifiers
pub const RESERVED_WORDS: &[&str] = &[
    "__START__",
    "__END__",
    "__start__",
    "__end__",
    "messages",
    "__root__",
    "__config__",
    "__state__",
];

/// Spec versions this compiler understands
pub const SUPPORTED_SPEC_VERSIONS: &[&str] = &["2.0"];

/// Recognized LLM providers
pub const SUPPORTED_PROVIDERS: &[&str] = &[
    "openai",
    "anthropic",
    "google",
    "mistral",
    "groq",
    "ollama",
    "azure_openai",
    "bedrock",
];

/// Default graph-wide step ceiling
pub const DEFAULT_MAX_STEPS: u32 = 25;

/// Status codes retried by api-call tools unless overridden
pub const DEFAULT_RETRY_STATUS_CODES: &[u16] = &[429, 500, 502, 503, 504];

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z_][a-z0-9_]*$").expect("valid identifier regex"));

/// Whether `name` has the shape of an identifier
pub fn is_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

/// Whether `name` is a reserved word
pub fn is_reserved(name: &str) -> bool {
    RESERVED_WORDS.contains(&name)
}

/// Project-wide configuration from the project document
#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    /// Project name
    pub name: String,
    /// Declared spec version (presence is checked by the validator)
    pub spec_version: Option<String>,
    /// Default LLM configuration for all agents
    pub llm: Option<LlmConfig>,
    /// Service configuration
    pub server: ServerConfig,
    /// Declared environment variables
    pub env: Vec<EnvVar>,
    /// Graph-wide step ceiling
    pub max_steps: u32,
    /// Document id
    pub document: String,
    /// Position of the root element
    pub position: Position,
}

/// LLM provider configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmConfig {
    /// Provider name (see [`SUPPORTED_PROVIDERS`])
    pub provider: String,
    /// Model name
    pub model: String,
    /// Client-side retry count
    pub max_retries: u32,
    /// Position of the `<llm>` element
    pub position: Position,
}

/// Service configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Allowed CORS origins
    pub cors_origins: Vec<String>,
    /// Environment variable holding the shared secret
    pub auth_env: Option<String>,
    /// Header carrying the shared secret
    pub auth_header: String,
    /// Whether interactive API docs are served
    pub docs_public: bool,
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            cors_origins: vec!["*".to_string()],
            auth_env: None,
            auth_header: "X-API-Key".to_string(),
            docs_public: true,
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// A declared environment variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvVar {
    /// Variable name
    pub name: String,
    /// Whether the service refuses to start without it
    pub required: bool,
    /// Fallback value
    pub default: Option<String>,
    /// Position of the `<var>` element
    pub position: Position,
}

/// One workflow definition
#[derive(Debug, Clone, PartialEq)]
pub struct Agent {
    /// Agent name
    pub name: String,
    /// Agent version
    pub version: String,
    /// Description
    pub description: Option<String>,
    /// Document id
    pub document: String,
    /// Position of the root element
    pub position: Position,
    /// Agent-level LLM override
    pub llm: Option<LlmConfig>,
    /// Agent-level step-ceiling override
    pub max_steps: Option<u32>,
    /// Position of `<state>`, when present
    pub state_block: Option<Position>,
    /// Position of `<graph>`, when present
    pub graph_block: Option<Position>,
    /// State fields in declaration order
    pub state: Vec<StateField>,
    /// Tools in declaration order
    pub tools: Vec<Tool>,
    /// Nodes in declaration order
    pub nodes: Vec<Node>,
    /// Edge declarations in document order
    pub edges: Vec<EdgeDecl>,
}

impl Agent {
    /// State field by name
    pub fn field(&self, name: &str) -> Option<&StateField> {
        self.state.iter().find(|f| f.name == name)
    }

    /// Tool by id
    pub fn tool(&self, id: &str) -> Option<&Tool> {
        self.tools.iter().find(|t| t.id == id)
    }

    /// Node by id
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Effective LLM configuration (agent override, then project default)
    pub fn effective_llm<'a>(&'a self, project: Option<&'a Project>) -> Option<&'a LlmConfig> {
        self.llm
            .as_ref()
            .or_else(|| project.and_then(|p| p.llm.as_ref()))
    }

    /// Effective step ceiling
    pub fn effective_max_steps(&self, project: Option<&Project>) -> u32 {
        self.max_steps
            .or(project.map(|p| p.max_steps))
            .unwrap_or(DEFAULT_MAX_STEPS)
    }

    /// Whether any node is an LLM node
    pub fn has_llm_nodes(&self) -> bool {
        self.nodes
            .iter()
            .any(|n| matches!(n.kind, NodeKind::Llm(_)))
    }
}

/// Scalar types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    /// `string`
    String,
    /// `int`
    Int,
    /// `float`
    Float,
    /// `bool`
    Bool,
}

/// Element type of a parameterized container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    /// A scalar element
    Scalar(ScalarType),
    /// `dict` elements (lists only)
    Dict,
    /// `any` values (dicts only)
    Any,
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScalarType::String => "string",
            ScalarType::Int => "int",
            ScalarType::Float => "float",
            ScalarType::Bool => "bool",
        })
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementType::Scalar(s) => s.fmt(f),
            ElementType::Dict => f.write_str("dict"),
            ElementType::Any => f.write_str("any"),
        }
    }
}

/// Declared type of a field or parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeDescriptor {
    /// `string`, `int`, `float`, `bool`
    Scalar(ScalarType),
    /// `list` or `list[T]`
    List(Option<ElementType>),
    /// `dict` or `dict[T]`
    Dict(Option<ElementType>),
    /// `enum` with its value set (may be empty; the validator rejects that)
    Enum(Vec<String>),
    /// Anything else, kept verbatim for reporting
    Unrecognized(String),
}

impl TypeDescriptor {
    /// Parse a type name; `values` supplies the members of an enum
    pub fn parse(raw: &str, values: Option<&str>) -> Self {
        let raw = raw.trim();
        let scalar = |name: &str| match name {
            "string" => Some(ScalarType::String),
            "int" => Some(ScalarType::Int),
            "float" => Some(ScalarType::Float),
            "bool" => Some(ScalarType::Bool),
            _ => None,
        };
        if let Some(s) = scalar(raw) {
            return TypeDescriptor::Scalar(s);
        }
        match raw {
            "list" => return TypeDescriptor::List(None),
            "dict" => return TypeDescriptor::Dict(None),
            "enum" => {
                let members = values
                    .map(|v| {
                        v.split(',')
                            .map(str::trim)
                            .filter(|m| !m.is_empty())
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                return TypeDescriptor::Enum(members);
            }
            _ => {}
        }
        let parameterized = |prefix: &str| {
            raw.strip_prefix(prefix)
                .and_then(|r| r.strip_prefix('['))
                .and_then(|r| r.strip_suffix(']'))
                .map(str::trim)
        };
        if let Some(inner) = parameterized("list") {
            let element = match inner {
                "dict" => Some(ElementType::Dict),
                other => scalar(other).map(ElementType::Scalar),
            };
            if let Some(element) = element {
                return TypeDescriptor::List(Some(element));
            }
        }
        if let Some(inner) = parameterized("dict") {
            let element = match inner {
                "any" => Some(ElementType::Any),
                other => scalar(other).map(ElementType::Scalar),
            };
            if let Some(element) = element {
                return TypeDescriptor::Dict(Some(element));
            }
        }
        TypeDescriptor::Unrecognized(raw.to_string())
    }

    /// Whether this is a list type
    pub fn is_list(&self) -> bool {
        matches!(self, TypeDescriptor::List(_))
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDescriptor::Scalar(s) => s.fmt(f),
            TypeDescriptor::List(None) => f.write_str("list"),
            TypeDescriptor::List(Some(e)) => write!(f, "list[{}]", e),
            TypeDescriptor::Dict(None) => f.write_str("dict"),
            TypeDescriptor::Dict(Some(e)) => write!(f, "dict[{}]", e),
            TypeDescriptor::Enum(_) => f.write_str("enum"),
            TypeDescriptor::Unrecognized(raw) => f.write_str(raw),
        }
    }
}

/// How a new value is combined with a field's current value
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// Replace the value
    #[default]
    Overwrite,
    /// Extend a list
    Append,
    /// Add numbers
    Add,
    /// Merge dicts, right side wins
    Merge,
    /// Concatenate strings
    Concat,
    /// Unknown policy name, kept for reporting
    Unrecognized(String),
}

impl MergePolicy {
    /// Parse a surface policy name
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "" | "overwrite" => MergePolicy::Overwrite,
            "append" => MergePolicy::Append,
            "add" => MergePolicy::Add,
            "merge" => MergePolicy::Merge,
            "concat" => MergePolicy::Concat,
            other => MergePolicy::Unrecognized(other.to_string()),
        }
    }

    /// Surface name of the policy
    pub fn name(&self) -> &str {
        match self {
            MergePolicy::Overwrite => "overwrite",
            MergePolicy::Append => "append",
            MergePolicy::Add => "add",
            MergePolicy::Merge => "merge",
            MergePolicy::Concat => "concat",
            MergePolicy::Unrecognized(raw) => raw,
        }
    }

    /// Whether the policy can be applied to a field of type `ty`
    pub fn is_compatible_with(&self, ty: &TypeDescriptor) -> bool {
        match self {
            MergePolicy::Overwrite => true,
            MergePolicy::Append => matches!(ty, TypeDescriptor::List(_)),
            MergePolicy::Add => matches!(
                ty,
                TypeDescriptor::Scalar(ScalarType::Int | ScalarType::Float)
            ),
            MergePolicy::Merge => matches!(ty, TypeDescriptor::Dict(_)),
            MergePolicy::Concat => matches!(ty, TypeDescriptor::Scalar(ScalarType::String)),
            MergePolicy::Unrecognized(_) => false,
        }
    }
}

/// One declared state field
#[derive(Debug, Clone, PartialEq)]
pub struct StateField {
    /// Field name
    pub name: String,
    /// Declared type
    pub ty: TypeDescriptor,
    /// Whether callers must supply the field
    pub required: bool,
    /// Default value as written
    pub default: Option<String>,
    /// Merge policy
    pub policy: MergePolicy,
    /// Whether the field is part of the service's request/response models
    pub expose: bool,
    /// Position of the `<field>` element
    pub position: Position,
}

/// Kind of an interpolation token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// `${field}`
    StateField,
    /// `${env:NAME}`
    Env,
}

/// A `${...}` token found in text content
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InterpolationToken {
    /// Token kind
    pub kind: TokenKind,
    /// Referenced name
    pub name: String,
}

/// Piece of a [`Template`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Text passed through unchanged
    Literal(String),
    /// A resolved token
    Token(InterpolationToken),
}

/// Malformed `${...}` sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpolationError {
    /// Byte offset of the `$`
    pub offset: usize,
    /// What went wrong
    pub message: String,
}

static TOKEN_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid token regex"));

/// Text with interpolation tokens
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Template {
    /// Text as written
    pub raw: String,
    /// Literal and token segments in order
    pub segments: Vec<Segment>,
}

impl Template {
    /// Split `raw` into literal text and tokens
    ///
    /// `$` not followed by `{` and lone braces are literal text.
    pub fn parse(raw: &str) -> Result<Self, InterpolationError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = raw;

        while let Some(at) = rest.find("${") {
            literal.push_str(&rest[..at]);
            let offset = raw.len() - rest.len() + at;
            let body_start = &rest[at + 2..];
            let Some(close) = body_start.find('}') else {
                return Err(InterpolationError {
                    offset,
                    message: "unterminated '${' interpolation".to_string(),
                });
            };
            let body = &body_start[..close];
            let token = match body.strip_prefix("env:") {
                Some(name) if TOKEN_NAME.is_match(name) => InterpolationToken {
                    kind: TokenKind::Env,
                    name: name.to_string(),
                },
                None if TOKEN_NAME.is_match(body) => InterpolationToken {
                    kind: TokenKind::StateField,
                    name: body.to_string(),
                },
                _ => {
                    return Err(InterpolationError {
                        offset,
                        message: format!(
                            "'${{{}}}' is not a valid interpolation (expected ${{field}} or ${{env:NAME}})",
                            body
                        ),
                    });
                }
            };
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Token(token));
            rest = &body_start[close + 1..];
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// Tokens in order of appearance
    pub fn tokens(&self) -> impl Iterator<Item = &InterpolationToken> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Token(t) => Some(t),
            Segment::Literal(_) => None,
        })
    }

    /// Whether the template has no content
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// A declared tool
#[derive(Debug, Clone, PartialEq)]
pub struct Tool {
    /// Tool id
    pub id: String,
    /// Description shown to the model
    pub description: Option<String>,
    /// Tool variant
    pub kind: ToolKind,
    /// Position of the `<tool>` element
    pub position: Position,
}

/// Tool variants
#[derive(Debug, Clone, PartialEq)]
pub enum ToolKind {
    /// HTTP call
    ApiCall(ApiCall),
    /// Script under `tools/` whose schema is taken from the script itself
    LocalScript {
        /// Path relative to `tools/`
        path: String,
    },
    /// Script under `tools/` with declared parameters
    ScriptTool {
        /// Path relative to `tools/`
        path: String,
        /// Declared parameters
        parameters: Vec<ToolParam>,
    },
}

impl ToolKind {
    /// Declared parameters, if the variant has any
    pub fn parameters(&self) -> &[ToolParam] {
        match self {
            ToolKind::ApiCall(api) => &api.parameters,
            ToolKind::ScriptTool { parameters, .. } => parameters,
            ToolKind::LocalScript { .. } => &[],
        }
    }

    /// Script path, for script-backed variants
    pub fn script_path(&self) -> Option<&str> {
        match self {
            ToolKind::LocalScript { path } | ToolKind::ScriptTool { path, .. } => Some(path),
            ToolKind::ApiCall(_) => None,
        }
    }
}

/// HTTP methods for api-call tools
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
}

impl HttpMethod {
    /// Parse a method name, case-insensitively
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "GET" => Some(HttpMethod::Get),
            "POST" => Some(HttpMethod::Post),
            "PUT" => Some(HttpMethod::Put),
            "PATCH" => Some(HttpMethod::Patch),
            "DELETE" => Some(HttpMethod::Delete),
            _ => None,
        }
    }

    /// Lower-case method name
    pub fn as_lower(&self) -> &'static str {
        match self {
            HttpMethod::Get => "get",
            HttpMethod::Post => "post",
            HttpMethod::Put => "put",
            HttpMethod::Patch => "patch",
            HttpMethod::Delete => "delete",
        }
    }
}

/// Retry backoff strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Delay doubles on each attempt
    Exponential,
    /// Constant delay
    Fixed,
}

/// Retry policy of an api-call tool
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Request timeout in seconds
    pub timeout_secs: f64,
    /// Status codes that trigger a retry
    pub retry_status_codes: Vec<u16>,
    /// Backoff strategy
    pub backoff: Backoff,
    /// Base delay in seconds
    pub backoff_base: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            timeout_secs: 30.0,
            retry_status_codes: DEFAULT_RETRY_STATUS_CODES.to_vec(),
            backoff: Backoff::Exponential,
            backoff_base: 1.0,
        }
    }
}

/// HTTP call definition
#[derive(Debug, Clone, PartialEq)]
pub struct ApiCall {
    /// URL template
    pub url: Template,
    /// HTTP method
    pub method: HttpMethod,
    /// Headers with templated values
    pub headers: Vec<Header>,
    /// Declared parameters
    pub parameters: Vec<ToolParam>,
    /// Request body
    pub body: Option<Body>,
    /// Response mappings
    pub returns: Vec<ReturnMapping>,
    /// Retry policy
    pub retry: RetryPolicy,
    /// Position of the `<endpoint>` element
    pub endpoint_position: Position,
}

/// Request header
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    /// Header name
    pub name: String,
    /// Value template
    pub value: Template,
    /// Position of the `<header>` element
    pub position: Position,
}

/// Where a tool parameter is sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamLocation {
    /// Query string
    #[default]
    Query,
    /// URL placeholder
    Path,
    /// JSON body
    Body,
}

/// Declared tool parameter
#[derive(Debug, Clone, PartialEq)]
pub struct ToolParam {
    /// Parameter name
    pub name: String,
    /// Declared type
    pub ty: TypeDescriptor,
    /// Where the value goes
    pub location: ParamLocation,
    /// Wire name, when it differs from `name`
    pub map_to: Option<String>,
    /// Description shown to the model
    pub description: Option<String>,
    /// Position of the `<param>` element
    pub position: Position,
}

impl ToolParam {
    /// Name used on the wire
    pub fn wire_name(&self) -> &str {
        self.map_to.as_deref().unwrap_or(&self.name)
    }
}

/// Request body definition
#[derive(Debug, Clone, PartialEq)]
pub struct Body {
    /// Body fields
    pub fields: Vec<BodyField>,
    /// Position of the `<body>` element
    pub position: Position,
}

/// One field of a request body
#[derive(Debug, Clone, PartialEq)]
pub struct BodyField {
    /// Key in the JSON body
    pub name: String,
    /// Declared type
    pub ty: TypeDescriptor,
    /// Parameter supplying the value
    pub from_state: String,
    /// Position of the `<field>` element
    pub position: Position,
}

/// Response-field → state-field mapping
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnMapping {
    /// Dotted path into the JSON response
    pub api_field: String,
    /// State field receiving the value
    pub state_field: String,
    /// Position of the `<map>` element
    pub position: Position,
}

/// A node in an agent graph
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Node id
    pub id: String,
    /// Node variant
    pub kind: NodeKind,
    /// Position of the `<node>` element
    pub position: Position,
}

/// Node variants
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Model call
    Llm(LlmNode),
    /// Direct tool invocation
    Action {
        /// Referenced tool id
        tool_ref: String,
    },
    /// Script under `tools/`
    Script {
        /// Path relative to `tools/`
        path: String,
    },
    /// Invocation of another agent
    Subgraph(SubgraphNode),
}

impl NodeKind {
    /// Surface type name
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeKind::Llm(_) => "llm",
            NodeKind::Action { .. } => "action",
            NodeKind::Script { .. } => "script",
            NodeKind::Subgraph(_) => "subgraph",
        }
    }
}

/// LLM node definition
#[derive(Debug, Clone, PartialEq)]
pub struct LlmNode {
    /// System prompt template
    pub prompt: Template,
    /// Position of `<system_prompt>`, when present
    pub prompt_position: Option<Position>,
    /// Structured-output fields
    pub output_schema: Vec<OutputField>,
    /// Bound tools
    pub tool_binds: Vec<ToolBind>,
}

/// Structured-output field
#[derive(Debug, Clone, PartialEq)]
pub struct OutputField {
    /// Field name
    pub name: String,
    /// Declared type
    pub ty: TypeDescriptor,
    /// Description shown to the model
    pub description: Option<String>,
    /// Position of the `<field>` element
    pub position: Position,
}

/// Reference from an LLM node to a tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolBind {
    /// Referenced tool id
    pub tool_ref: String,
    /// Position of the `<tool_bind>` element
    pub position: Position,
}

/// Subgraph node definition
#[derive(Debug, Clone, PartialEq)]
pub struct SubgraphNode {
    /// Referenced agent name
    pub agent_ref: String,
    /// Parent field → child field
    pub input_map: Vec<FieldMapping>,
    /// Child field → parent field
    pub output_map: Vec<FieldMapping>,
}

/// `source` → `target` field mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMapping {
    /// Field read from
    pub source: String,
    /// Field written to
    pub target: String,
    /// Position of the `<map>` element
    pub position: Position,
}

/// Map fan-out configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapSpec {
    /// List-typed field whose items are fanned out
    pub items_field: String,
    /// Name each branch sees its item under
    pub item_var: String,
}

/// One `<edge>` element as written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeDecl {
    /// Source node id or [`START`]
    pub source: String,
    /// Target node id or [`END`]
    pub target: String,
    /// Condition expression
    pub condition: Option<String>,
    /// Position of `<condition>`, when present
    pub condition_position: Option<Position>,
    /// Whether this is the default branch of a conditional group
    pub default: bool,
    /// Map fan-out configuration
    pub map: Option<MapSpec>,
    /// Position of the `<edge>` element
    pub position: Position,
}

/// Routing category of an edge declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeCategory {
    /// Plain edge
    Unconditional,
    /// Conditional or default branch
    Conditional,
    /// Map fan-out
    Map,
}

impl fmt::Display for EdgeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EdgeCategory::Unconditional => "unconditional",
            EdgeCategory::Conditional => "conditional",
            EdgeCategory::Map => "map",
        })
    }
}

impl EdgeDecl {
    /// Routing category this declaration belongs to
    pub fn category(&self) -> EdgeCategory {
        if self.map.is_some() {
            EdgeCategory::Map
        } else if self.condition.is_some() || self.default {
            EdgeCategory::Conditional
        } else {
            EdgeCategory::Unconditional
        }
    }
}

/// Ordered branch of a conditional group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionalBranch {
    /// Condition expression
    pub condition: String,
    /// Target when the condition holds
    pub target: String,
}

/// Validated routing edge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edge {
    /// Always taken
    Unconditional {
        /// Source node id or [`START`]
        source: String,
        /// Target node id or [`END`]
        target: String,
    },
    /// First matching condition wins, otherwise the default
    ConditionalGroup {
        /// Source node id or [`START`]
        source: String,
        /// Branches in document order
        branches: Vec<ConditionalBranch>,
        /// Default target
        default: String,
    },
    /// One isolated branch per item of a list field
    Map {
        /// Source node id or [`START`]
        source: String,
        /// Node run once per item
        target: String,
        /// List-typed field
        items_field: String,
        /// Per-branch item variable
        item_var: String,
    },
}

impl Edge {
    /// Source of the edge
    pub fn source(&self) -> &str {
        match self {
            Edge::Unconditional { source, .. }
            | Edge::ConditionalGroup { source, .. }
            | Edge::Map { source, .. } => source,
        }
    }

    /// Every target the edge can route to, in order
    pub fn targets(&self) -> Vec<&str> {
        match self {
            Edge::Unconditional { target, .. } | Edge::Map { target, .. } => vec![target],
            Edge::ConditionalGroup {
                branches, default, ..
            } => {
                let mut targets: Vec<&str> = Vec::new();
                for t in branches.iter().map(|b| b.target.as_str()).chain([default.as_str()]) {
                    if !targets.contains(&t) {
                        targets.push(t);
                    }
                }
                targets
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("string", TypeDescriptor::Scalar(ScalarType::String))]
    #[case("int", TypeDescriptor::Scalar(ScalarType::Int))]
    #[case("float", TypeDescriptor::Scalar(ScalarType::Float))]
    #[case("bool", TypeDescriptor::Scalar(ScalarType::Bool))]
    #[case("list", TypeDescriptor::List(None))]
    #[case("dict", TypeDescriptor::Dict(None))]
    #[case("list[string]", TypeDescriptor::List(Some(ElementType::Scalar(ScalarType::String))))]
    #[case("list[dict]", TypeDescriptor::List(Some(ElementType::Dict)))]
    #[case("dict[any]", TypeDescriptor::Dict(Some(ElementType::Any)))]
    #[case("dict[int]", TypeDescriptor::Dict(Some(ElementType::Scalar(ScalarType::Int))))]
    #[case("list[any]", TypeDescriptor::Unrecognized("list[any]".into()))]
    #[case("dict[dict]", TypeDescriptor::Unrecognized("dict[dict]".into()))]
    #[case("tuple", TypeDescriptor::Unrecognized("tuple".into()))]
    fn test_type_descriptor_parse(#[case] raw: &str, #[case] expected: TypeDescriptor) {
        assert_eq!(TypeDescriptor::parse(raw, None), expected);
    }

    #[test]
    fn test_enum_values() {
        let ty = TypeDescriptor::parse("enum", Some("low, medium ,high,"));
        assert_eq!(
            ty,
            TypeDescriptor::Enum(vec!["low".into(), "medium".into(), "high".into()])
        );
        assert_eq!(TypeDescriptor::parse("enum", None), TypeDescriptor::Enum(vec![]));
    }

    #[rstest]
    #[case(MergePolicy::Append, "list[int]", true)]
    #[case(MergePolicy::Append, "string", false)]
    #[case(MergePolicy::Add, "int", true)]
    #[case(MergePolicy::Add, "float", true)]
    #[case(MergePolicy::Add, "string", false)]
    #[case(MergePolicy::Merge, "dict[any]", true)]
    #[case(MergePolicy::Merge, "list", false)]
    #[case(MergePolicy::Concat, "string", true)]
    #[case(MergePolicy::Concat, "list", false)]
    #[case(MergePolicy::Overwrite, "enum", true)]
    fn test_merge_policy_compatibility(
        #[case] policy: MergePolicy,
        #[case] ty: &str,
        #[case] ok: bool,
    ) {
        assert_eq!(policy.is_compatible_with(&TypeDescriptor::parse(ty, None)), ok);
    }

    #[test]
    fn test_merge_policy_parse() {
        assert_eq!(MergePolicy::parse(""), MergePolicy::Overwrite);
        assert_eq!(MergePolicy::parse("append"), MergePolicy::Append);
        assert_eq!(
            MergePolicy::parse("extend"),
            MergePolicy::Unrecognized("extend".into())
        );
        assert!(!MergePolicy::parse("extend").is_compatible_with(&TypeDescriptor::List(None)));
    }

    #[test]
    fn test_identifiers() {
        assert!(is_identifier("fetch_order"));
        assert!(is_identifier("_private2"));
        assert!(!is_identifier("FetchOrder"));
        assert!(!is_identifier("2fast"));
        assert!(!is_identifier("has-dash"));
        assert!(!is_identifier(""));
        assert!(is_reserved("messages"));
        assert!(is_reserved("__start__"));
        assert!(!is_reserved("message"));
    }

    #[test]
    fn test_template_segments() {
        let t = Template::parse("Hello ${name}, key=${env:API_KEY} {literal} $5").unwrap();
        assert_eq!(
            t.segments,
            vec![
                Segment::Literal("Hello ".into()),
                Segment::Token(InterpolationToken {
                    kind: TokenKind::StateField,
                    name: "name".into()
                }),
                Segment::Literal(", key=".into()),
                Segment::Token(InterpolationToken {
                    kind: TokenKind::Env,
                    name: "API_KEY".into()
                }),
                Segment::Literal(" {literal} $5".into()),
            ]
        );
        assert_eq!(t.tokens().count(), 2);
    }

    #[rstest]
    #[case("${}", 0)]
    #[case("ab ${not valid}", 3)]
    #[case("${env:}", 0)]
    #[case("${state.x}", 0)]
    #[case("x ${open", 2)]
    fn test_template_errors(#[case] raw: &str, #[case] offset: usize) {
        let err = Template::parse(raw).unwrap_err();
        assert_eq!(err.offset, offset);
    }

    #[test]
    fn test_edge_category() {
        let mut decl = EdgeDecl {
            source: "a".into(),
            target: "b".into(),
            condition: None,
            condition_position: None,
            default: false,
            map: None,
            position: Position::start(),
        };
        assert_eq!(decl.category(), EdgeCategory::Unconditional);
        decl.default = true;
        assert_eq!(decl.category(), EdgeCategory::Conditional);
        decl.map = Some(MapSpec {
            items_field: "items".into(),
            item_var: "item".into(),
        });
        assert_eq!(decl.category(), EdgeCategory::Map);
    }

    #[test]
    fn test_conditional_targets_deduplicated() {
        let edge = Edge::ConditionalGroup {
            source: "a".into(),
            branches: vec![
                ConditionalBranch {
                    condition: "x".into(),
                    target: "b".into(),
                },
                ConditionalBranch {
                    condition: "y".into(),
                    target: "b".into(),
                },
            ],
            default: END.into(),
        };
        assert_eq!(edge.targets(), vec!["b", END]);
    }
}
