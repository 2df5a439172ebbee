//! Agent module generator
//!
//! Turns one validated agent into a self-contained Python module that
//! builds and compiles a LangGraph `StateGraph`:
//!
//! ```text
//! header ─ imports ─ constants ─ helpers ─ AgentState
//!     ─ tool models + tools ─ output models + node functions
//!     ─ routers ─ graph assembly (graph = graph_builder.compile())
//! ```
//!
//! Output is a pure function of the validated model: names are assigned in
//! declaration order and nothing depends on hashing or the clock.

mod nodes;
mod routing;
mod tools;
mod writer;

use std::collections::BTreeSet;

use agentmark_core::ValidatedAgent;
use agentmark_core::ir::{
    Agent, MergePolicy, NodeKind, Project, Segment, Template, TokenKind, ToolKind, TypeDescriptor,
};
use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::python::{self, Namer};
pub(crate) use writer::{Imports, Writer};

/// Chat model class and package for a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Provider {
    /// LangChain chat model class
    pub class: &'static str,
    /// Python module exporting the class
    pub module: &'static str,
    /// Whether the class accepts `max_retries`
    pub retries: bool,
}

impl Provider {
    /// Distribution name for requirements files
    pub fn package(&self) -> String {
        self.module.replace('_', "-")
    }
}

/// Look up the chat model class for a provider name
pub fn provider(name: &str) -> Option<Provider> {
    let (class, module, retries) = match name {
        "openai" => ("ChatOpenAI", "langchain_openai", true),
        "anthropic" => ("ChatAnthropic", "langchain_anthropic", true),
        "google" => ("ChatGoogleGenerativeAI", "langchain_google_genai", true),
        "mistral" => ("ChatMistralAI", "langchain_mistralai", true),
        "groq" => ("ChatGroq", "langchain_groq", true),
        "ollama" => ("ChatOllama", "langchain_ollama", false),
        "azure_openai" => ("AzureChatOpenAI", "langchain_openai", true),
        "bedrock" => ("ChatBedrock", "langchain_aws", false),
        _ => return None,
    };
    Some(Provider {
        class,
        module,
        retries,
    })
}

/// Import path of a script under `tools/`
fn script_module(path: &str) -> String {
    let stem = path.strip_suffix(".py").unwrap_or(path);
    format!("tools.{}", stem.replace('/', "."))
}

/// Python module name of a compiled agent
pub fn module_name(agent: &str) -> String {
    format!("compiled_{}", agent)
}

/// Names a generated module defines or imports itself
const RESERVED: &[&str] = &[
    "AIMessage",
    "AgentState",
    "Annotated",
    "Any",
    "BaseModel",
    "ConfigDict",
    "END",
    "Field",
    "Literal",
    "RECURSION_LIMIT",
    "RetryableStatusError",
    "RunnableConfig",
    "START",
    "Send",
    "StateGraph",
    "SystemMessage",
    "ToolExecutionError",
    "ToolNode",
    "TypedDict",
    "_dig",
    "_merge_dicts",
    "_state_text",
    "_state_updates",
    "add_messages",
    "create_model",
    "graph",
    "graph_builder",
    "httpx",
    "importlib",
    "llm",
    "logger",
    "logging",
    "operator",
    "os",
    "quote",
    "retry",
    "retry_if_exception_type",
    "stop_after_attempt",
    "tool",
    "wait_exponential",
    "wait_fixed",
];

/// One field of a generated pydantic model
struct ModelField<'a> {
    name: &'a str,
    ty: &'a TypeDescriptor,
    description: Option<&'a str>,
}

/// Module-level helpers, emitted only when used
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Helper {
    StateText,
    MergeDicts,
    Dig,
    StateUpdates,
}

/// Python identifiers assigned to the agent's constructs
#[derive(Debug, Default)]
struct Names {
    /// tool id → tool function
    tools: IndexMap<String, String>,
    /// tool id → input model
    tool_inputs: IndexMap<String, String>,
    /// node id → node function
    nodes: IndexMap<String, String>,
    /// llm node id → structured-output model
    outputs: IndexMap<String, String>,
    /// llm node id → (ToolNode variable, graph node name)
    tool_nodes: IndexMap<String, (String, String)>,
    /// source → router for its conditional or map edge
    routers: IndexMap<String, String>,
    /// llm node id → router deciding between tools and successors
    cycle_routers: IndexMap<String, String>,
    /// agent name → imported graph alias
    subgraphs: IndexMap<String, String>,
}

/// Generates the module for one agent
pub struct ModuleGenerator<'a> {
    validated: &'a ValidatedAgent,
    agent: &'a Agent,
    project: &'a Project,
    known_agents: &'a BTreeSet<String>,
    names: Names,
    imports: Imports,
    helpers: BTreeSet<Helper>,
}

impl<'a> ModuleGenerator<'a> {
    /// Prepare a generator; `known_agents` are the agents compiled alongside
    pub fn new(
        validated: &'a ValidatedAgent,
        project: &'a Project,
        known_agents: &'a BTreeSet<String>,
    ) -> Self {
        let agent = &validated.agent;
        Self {
            validated,
            agent,
            project,
            known_agents,
            names: assign_names(validated),
            imports: Imports::default(),
            helpers: BTreeSet::new(),
        }
    }

    /// Render the module source
    pub fn generate(mut self) -> Result<String> {
        tracing::debug!(agent = %self.agent.name, "Generating agent module");

        let mut body = Writer::new();
        self.emit_tools(&mut body)?;
        self.emit_nodes(&mut body)?;
        self.emit_routers(&mut body)?;
        self.emit_graph(&mut body)?;

        let mut state = Writer::new();
        self.emit_state(&mut state);

        let mut preamble = Writer::new();
        self.emit_constants(&mut preamble)?;
        self.emit_errors(&mut preamble);
        self.emit_helpers(&mut preamble);
        preamble.raw(&state.finish());

        let mut module = Writer::new();
        self.emit_header(&mut module);
        module.blank();
        module.raw(&self.imports.render());
        module.gap();
        module.raw(&preamble.finish());
        module.raw(&body.finish());
        Ok(module.finish())
    }

    fn internal(&self, message: impl Into<String>) -> Error {
        Error::internal(&self.agent.name, message)
    }

    fn emit_header(&self, w: &mut Writer) {
        let agent = self.agent;
        let mut text = format!("Compiled agent: {} v{}\n", agent.name, agent.version);
        if let Some(description) = agent.description.as_deref().map(str::trim)
            && !description.is_empty()
        {
            text.push('\n');
            text.push_str(description);
            text.push('\n');
        }
        text.push_str(&format!(
            "\nGenerated by agentmark from {}. Do not edit by hand.\n",
            agent.document
        ));
        let escaped = text.replace('\\', "\\\\").replace('"', "\\\"");
        w.raw(&format!("\"\"\"{}\"\"\"\n", escaped));
    }

    fn emit_constants(&mut self, w: &mut Writer) -> Result<()> {
        let (agent, project) = (self.agent, self.project);
        self.imports.module("logging");
        w.line("logger = logging.getLogger(__name__)");
        w.blank();
        w.line(format!(
            "RECURSION_LIMIT = {}",
            agent.effective_max_steps(Some(project))
        ));

        if agent.has_llm_nodes() {
            let config = agent
                .effective_llm(Some(project))
                .ok_or_else(|| self.internal("llm nodes present but no llm configuration"))?;
            let provider = provider(&config.provider).ok_or_else(|| {
                self.internal(format!("unsupported llm provider '{}'", config.provider))
            })?;
            self.imports.name(provider.module, provider.class);
            w.blank();
            if provider.retries {
                w.line(format!(
                    "llm = {}(model={}, max_retries={})",
                    provider.class,
                    python::string(&config.model),
                    config.max_retries
                ));
            } else {
                w.line(format!(
                    "llm = {}(model={})",
                    provider.class,
                    python::string(&config.model)
                ));
            }
        }
        w.gap();
        Ok(())
    }

    fn emit_errors(&mut self, w: &mut Writer) {
        let api_tools: Vec<_> = self
            .agent
            .tools
            .iter()
            .filter_map(|t| match &t.kind {
                ToolKind::ApiCall(api) => Some(api),
                _ => None,
            })
            .collect();
        if api_tools.is_empty() {
            return;
        }
        w.block("class ToolExecutionError(Exception):", |w| {
            w.line("\"\"\"Raised when a tool call cannot produce a result.\"\"\"");
            w.blank();
            w.block("def __init__(self, tool_name: str, message: str):", |w| {
                w.line("super().__init__(f\"{tool_name}: {message}\")");
                w.line("self.tool_name = tool_name");
            });
        });
        w.gap();
        if api_tools.iter().any(|api| api.retry.max_retries > 0) {
            w.block("class RetryableStatusError(Exception):", |w| {
                w.line("\"\"\"Raised for responses whose status code is retried.\"\"\"");
                w.blank();
                w.block("def __init__(self, status_code: int):", |w| {
                    w.line("super().__init__(f\"retryable status {status_code}\")");
                    w.line("self.status_code = status_code");
                });
            });
            w.gap();
        }
    }

    fn emit_state(&mut self, w: &mut Writer) {
        self.imports.name("typing", "Annotated");
        self.imports.name("typing", "TypedDict");
        self.imports.name("langgraph.graph.message", "add_messages");

        w.line("AgentState = TypedDict(");
        w.indent();
        w.line("\"AgentState\",");
        w.line("{");
        w.indent();
        w.line("\"messages\": Annotated[list, add_messages],");
        let agent = self.agent;
        for field in &agent.state {
            let annotation = python::annotation(&field.ty);
            self.note_annotation(&annotation);
            let reducer = match field.policy {
                MergePolicy::Append | MergePolicy::Add => Some("operator.add"),
                MergePolicy::Concat => Some("operator.concat"),
                MergePolicy::Merge => Some("_merge_dicts"),
                MergePolicy::Overwrite | MergePolicy::Unrecognized(_) => None,
            };
            let ty = match reducer {
                Some(reducer) => {
                    if reducer.starts_with("operator") {
                        self.imports.module("operator");
                    } else {
                        self.helpers.insert(Helper::MergeDicts);
                    }
                    format!("Annotated[{}, {}]", annotation, reducer)
                }
                None => annotation,
            };
            w.line(format!("{}: {},", python::string(&field.name), ty));
        }
        w.dedent();
        w.line("},");
        w.line("total=False,");
        w.dedent();
        w.line(")");
        w.gap();
    }

    fn emit_helpers(&mut self, w: &mut Writer) {
        for helper in self.helpers.clone() {
            match helper {
                Helper::StateText => {
                    w.block("def _state_text(state: dict, field: str) -> str:", |w| {
                        w.line("value = state.get(field)");
                        w.block("if value is None:", |w| {
                            w.line("logger.warning(\"State field '%s' is empty while rendering a prompt\", field)");
                            w.line("return \"\"");
                        });
                        w.line("return str(value)");
                    });
                }
                Helper::MergeDicts => {
                    w.block("def _merge_dicts(left: dict | None, right: dict | None) -> dict:", |w| {
                        w.line("return {**(left or {}), **(right or {})}");
                    });
                }
                Helper::Dig => {
                    w.block("def _dig(data, path: str):", |w| {
                        w.block("for key in path.split(\".\"):", |w| {
                            w.block("if isinstance(data, dict):", |w| {
                                w.line("data = data.get(key)");
                            });
                            w.block(
                                "elif isinstance(data, list) and key.isdigit() and int(key) < len(data):",
                                |w| w.line("data = data[int(key)]"),
                            );
                            w.block("else:", |w| w.line("return None"));
                        });
                        w.line("return data");
                    });
                }
                Helper::StateUpdates => {
                    w.block("def _state_updates(result) -> dict:", |w| {
                        w.block("if not isinstance(result, dict):", |w| w.line("return {}"));
                        w.line("return {key: value for key, value in result.items() if key in AgentState.__annotations__}");
                    });
                }
            }
            w.gap();
        }
    }

    /// Record imports an annotation needs
    fn note_annotation(&mut self, annotation: &str) {
        if annotation.contains("Literal[") {
            self.imports.name("typing", "Literal");
        }
        if annotation.contains("Any") {
            self.imports.name("typing", "Any");
        }
    }

    /// `Name = create_model("Name", **{...})`; field names may be keywords
    fn emit_model(&mut self, w: &mut Writer, model: &str, fields: &[ModelField<'_>]) {
        self.imports.name("pydantic", "create_model");
        if fields.is_empty() {
            w.line(format!("{} = create_model({})", model, python::string(model)));
            return;
        }
        w.line(format!("{} = create_model(", model));
        w.indent();
        w.line(format!("{},", python::string(model)));
        w.line("**{");
        w.indent();
        for field in fields {
            let annotation = python::annotation(field.ty);
            self.note_annotation(&annotation);
            let spec = match field.description {
                Some(description) => {
                    self.imports.name("pydantic", "Field");
                    format!(
                        "({}, Field(..., description={}))",
                        annotation,
                        python::string(description)
                    )
                }
                None => format!("({}, ...)", annotation),
            };
            w.line(format!("{}: {},", python::string(field.name), spec));
        }
        w.dedent();
        w.line("},");
        w.dedent();
        w.line(")");
    }

    /// Python expression rendering `template`; `field` spells a state token
    fn template_expr(&mut self, template: &Template, field: impl Fn(&str) -> String) -> String {
        let parts: Vec<String> = template
            .segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(text) => python::string(text),
                Segment::Token(token) => match token.kind {
                    TokenKind::StateField => field(&token.name),
                    TokenKind::Env => {
                        self.imports.module("os");
                        format!("os.getenv({}, \"\")", python::string(&token.name))
                    }
                },
            })
            .collect();
        match parts.as_slice() {
            [] => "\"\"".to_string(),
            [only] if matches!(template.segments[0], Segment::Literal(_)) => only.clone(),
            _ => format!("\"\".join([{}])", parts.join(", ")),
        }
    }

    /// `"a"`, `START` or `END` for a graph endpoint
    fn endpoint(id: &str) -> String {
        match id {
            agentmark_core::ir::START => "START".to_string(),
            agentmark_core::ir::END => "END".to_string(),
            other => python::string(other),
        }
    }
}

/// Assign every module-level identifier in declaration order
fn assign_names(validated: &ValidatedAgent) -> Names {
    let agent = &validated.agent;
    let mut namer = Namer::new(RESERVED);
    let mut names = Names::default();

    for tool in &agent.tools {
        names.tools.insert(tool.id.clone(), namer.claim(&tool.id));
    }
    for node in &agent.nodes {
        names.nodes.insert(node.id.clone(), namer.claim(&node.id));
    }
    for tool in &agent.tools {
        let model = namer.claim(&format!("{}Input", python::pascal_case(&tool.id)));
        names.tool_inputs.insert(tool.id.clone(), model);
    }

    for node in &agent.nodes {
        let NodeKind::Llm(llm) = &node.kind else {
            continue;
        };
        if !llm.output_schema.is_empty() {
            let model = namer.claim(&format!("{}Output", python::pascal_case(&node.id)));
            names.outputs.insert(node.id.clone(), model);
        }
        if !llm.tool_binds.is_empty() {
            // Node ids never equal `<id>_tools`; uniqueness rejects that clash
            let graph_name = format!("{}_tools", node.id);
            let variable = namer.claim(&graph_name);
            names.tool_nodes.insert(node.id.clone(), (variable, graph_name));
            let router = namer.claim(&format!("route_{}_tool_cycle", node.id));
            names.cycle_routers.insert(node.id.clone(), router);
        }
    }
    for node in &agent.nodes {
        if let NodeKind::Subgraph(sub) = &node.kind
            && !names.subgraphs.contains_key(&sub.agent_ref)
        {
            let alias = namer.claim(&format!("{}_graph", sub.agent_ref));
            names.subgraphs.insert(sub.agent_ref.clone(), alias);
        }
    }

    for edge in &validated.edges {
        if matches!(edge, agentmark_core::Edge::Unconditional { .. }) {
            continue;
        }
        let source = edge.source();
        if names.routers.contains_key(source) {
            continue;
        }
        let label = if source == agentmark_core::ir::START {
            "start"
        } else {
            source
        };
        let router = namer.claim(&format!("route_{}", label));
        names.routers.insert(source.to_string(), router);
    }
    names
}
