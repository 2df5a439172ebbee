//! Semantic model builder
//!
//! Maps parse trees onto the IR. Anything that does not fit the grammar
//! (unknown element or attribute, unknown node/tool type, malformed
//! number or boolean, wrong root element) is a structural finding and the
//! document yields no model. Malformed interpolation tokens are recorded
//! as findings too, but the model is still produced so the rest of the
//! document can be validated.
//!
//! ```text
//! <agent name version description>
//!   <config>  <llm/> <limits/>                        </config>
//!   <state>   <field/>*                               </state>
//!   <tools>   <tool>...</tool>*                       </tools>
//!   <graph>   (<node>...</node> | <edge>...</edge>)*  </graph>
//! </agent>
//! ```

use std::str::FromStr;

use crate::diagnostic::{Code, Diagnostic, Findings, Position};
use crate::ir::{
    Agent, ApiCall, Backoff, Body, BodyField, DEFAULT_MAX_STEPS, EdgeDecl, EnvVar, FieldMapping,
    Header, HttpMethod, LlmConfig, LlmNode, MapSpec, MergePolicy, Node, NodeKind, OutputField,
    ParamLocation, Project, RetryPolicy, ReturnMapping, ServerConfig, StateField, SubgraphNode,
    Template, Tool, ToolBind, ToolKind, ToolParam, TypeDescriptor,
};
use crate::tree::{Content, Element};

/// Result of building one document
#[derive(Debug)]
pub struct Built<T> {
    /// The model, unless a structural finding stopped the build
    pub model: Option<T>,
    /// Findings recorded while building
    pub diagnostics: Vec<Diagnostic>,
}

/// Build a [`Project`] from the tree of the project document
pub fn build_project(root: &Element, document: &str) -> Built<Project> {
    let mut b = Builder::new(document);
    if root.tag != "project" {
        b.structural(
            Code::RootElement,
            root.position,
            format!("expected <project> as the root element, found <{}>", root.tag),
        );
        return b.finish(None);
    }
    b.allow_attributes(root, &["name", "spec_version", "description"]);
    b.allow_children(root, &["config"]);

    let mut project = Project {
        name: optional_attr(root, "name").unwrap_or_default(),
        spec_version: optional_attr(root, "spec_version"),
        llm: None,
        server: ServerConfig::default(),
        env: Vec::new(),
        max_steps: DEFAULT_MAX_STEPS,
        document: document.to_string(),
        position: root.position,
    };

    if let Some(config) = b.single(root, "config") {
        b.allow_attributes(config, &[]);
        b.allow_children(config, &["llm", "server", "env", "limits"]);
        if let Some(llm) = b.single(config, "llm") {
            project.llm = Some(b.llm(llm));
        }
        if let Some(server) = b.single(config, "server") {
            project.server = b.server(server);
        }
        if let Some(env) = b.single(config, "env") {
            b.allow_attributes(env, &[]);
            b.allow_children(env, &["var"]);
            for var in env.children_named("var") {
                b.allow_attributes(var, &["name", "required", "default"]);
                b.allow_children(var, &[]);
                project.env.push(EnvVar {
                    name: b.required_attr(var, "name"),
                    required: b.bool_attr(var, "required", false),
                    default: var.attr("default").map(str::to_string),
                    position: var.position,
                });
            }
        }
        if let Some(limits) = b.single(config, "limits") {
            if let Some(max_steps) = b.limits(limits) {
                project.max_steps = max_steps;
            }
        }
    }

    let model = (!b.structural).then_some(project);
    b.finish(model)
}

/// Build an [`Agent`] from the tree of an agent document
pub fn build_agent(root: &Element, document: &str) -> Built<Agent> {
    let mut b = Builder::new(document);
    if root.tag != "agent" {
        b.structural(
            Code::RootElement,
            root.position,
            format!("expected <agent> as the root element, found <{}>", root.tag),
        );
        return b.finish(None);
    }
    b.allow_attributes(root, &["name", "version", "description"]);
    b.allow_children(root, &["config", "state", "tools", "graph"]);

    let mut agent = Agent {
        name: optional_attr(root, "name").unwrap_or_default(),
        version: optional_attr(root, "version").unwrap_or_else(|| "0.1.0".to_string()),
        description: optional_attr(root, "description"),
        document: document.to_string(),
        position: root.position,
        llm: None,
        max_steps: None,
        state_block: None,
        graph_block: None,
        state: Vec::new(),
        tools: Vec::new(),
        nodes: Vec::new(),
        edges: Vec::new(),
    };

    if let Some(config) = b.single(root, "config") {
        b.allow_attributes(config, &[]);
        b.allow_children(config, &["llm", "limits"]);
        if let Some(llm) = b.single(config, "llm") {
            agent.llm = Some(b.llm(llm));
        }
        if let Some(limits) = b.single(config, "limits") {
            agent.max_steps = b.limits(limits);
        }
    }

    if let Some(state) = b.single(root, "state") {
        agent.state_block = Some(state.position);
        b.allow_attributes(state, &[]);
        b.allow_children(state, &["field"]);
        for field in state.children_named("field") {
            agent.state.push(b.state_field(field));
        }
    }

    if let Some(tools) = b.single(root, "tools") {
        b.allow_attributes(tools, &[]);
        b.allow_children(tools, &["tool"]);
        for tool in tools.children_named("tool") {
            if let Some(tool) = b.tool(tool) {
                agent.tools.push(tool);
            }
        }
    }

    if let Some(graph) = b.single(root, "graph") {
        agent.graph_block = Some(graph.position);
        b.allow_attributes(graph, &[]);
        b.allow_children(graph, &["node", "edge"]);
        for child in graph.children() {
            match child.tag.as_str() {
                "node" => {
                    if let Some(node) = b.node(child) {
                        agent.nodes.push(node);
                    }
                }
                "edge" => {
                    if let Some(edge) = b.edge(child) {
                        agent.edges.push(edge);
                    }
                }
                _ => {}
            }
        }
    }

    tracing::debug!(
        document,
        fields = agent.state.len(),
        tools = agent.tools.len(),
        nodes = agent.nodes.len(),
        edges = agent.edges.len(),
        "Built agent model"
    );

    let model = (!b.structural).then_some(agent);
    b.finish(model)
}

fn optional_attr(elem: &Element, name: &str) -> Option<String> {
    elem.attr(name)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Strip blank edge lines and common indentation from element text
fn dedent(text: &str) -> String {
    let starts_inline = text.lines().next().is_some_and(|l| !l.trim().is_empty());
    let mut lines: Vec<&str> = text.lines().collect();
    let leading_blank = lines.iter().take_while(|l| l.trim().is_empty()).count();
    lines.drain(..leading_blank);
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
    let lead = |l: &str| l.len() - l.trim_start_matches([' ', '\t']).len();
    let skip = usize::from(starts_inline);
    let indent = lines
        .iter()
        .skip(skip)
        .filter(|l| !l.trim().is_empty())
        .map(|l| lead(l))
        .min()
        .unwrap_or(0);
    lines
        .iter()
        .enumerate()
        .map(|(i, l)| {
            if i < skip {
                l.trim_start()
            } else {
                &l[indent.min(lead(l))..]
            }
        })
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

struct Builder<'a> {
    findings: Findings<'a>,
    structural: bool,
}

impl<'a> Builder<'a> {
    fn new(document: &'a str) -> Self {
        Self {
            findings: Findings::new(document),
            structural: false,
        }
    }

    fn finish<T>(self, model: Option<T>) -> Built<T> {
        Built {
            model,
            diagnostics: self.findings.into_vec(),
        }
    }

    fn structural(&mut self, code: Code, position: Position, message: impl Into<String>) {
        self.structural = true;
        self.findings.error(code, Some(position), message);
    }

    fn allow_attributes(&mut self, elem: &Element, allowed: &[&str]) {
        for name in elem.attributes.keys() {
            if !allowed.contains(&name.as_str()) {
                self.structural(
                    Code::UnrecognizedConstruct,
                    elem.position,
                    format!("unknown attribute '{}' on <{}>", name, elem.tag),
                );
            }
        }
    }

    fn allow_children(&mut self, elem: &Element, allowed: &[&str]) {
        match &elem.content {
            Content::Text(_) => self.structural(
                Code::UnrecognizedConstruct,
                elem.position,
                format!("<{}> does not take text content", elem.tag),
            ),
            Content::Children(children) => {
                for child in children {
                    if !allowed.contains(&child.tag.as_str()) {
                        self.structural(
                            Code::UnrecognizedConstruct,
                            child.position,
                            format!("unexpected <{}> inside <{}>", child.tag, elem.tag),
                        );
                    }
                }
            }
            Content::Empty => {}
        }
    }

    /// First child named `tag`; a second one is a structural finding
    fn single<'e>(&mut self, elem: &'e Element, tag: &str) -> Option<&'e Element> {
        let mut found = elem.children_named(tag);
        let first = found.next();
        if let Some(duplicate) = found.next() {
            self.structural(
                Code::UnrecognizedConstruct,
                duplicate.position,
                format!("duplicate <{}> inside <{}>", tag, elem.tag),
            );
        }
        first
    }

    fn required_attr(&mut self, elem: &Element, name: &str) -> String {
        match optional_attr(elem, name) {
            Some(value) => value,
            None => {
                self.structural(
                    Code::InvalidAttribute,
                    elem.position,
                    format!("<{}> requires attribute '{}'", elem.tag, name),
                );
                String::new()
            }
        }
    }

    fn bool_attr(&mut self, elem: &Element, name: &str, default: bool) -> bool {
        match elem.attr(name).map(|v| v.trim().to_ascii_lowercase()) {
            None => default,
            Some(v) if v == "true" => true,
            Some(v) if v == "false" => false,
            Some(v) => {
                self.structural(
                    Code::InvalidAttribute,
                    elem.position,
                    format!(
                        "attribute '{}' on <{}> must be true or false, found '{}'",
                        name, elem.tag, v
                    ),
                );
                default
            }
        }
    }

    fn number_attr<T: FromStr>(&mut self, elem: &Element, name: &str) -> Option<T> {
        let raw = elem.attr(name)?.trim();
        match raw.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                self.structural(
                    Code::InvalidAttribute,
                    elem.position,
                    format!(
                        "attribute '{}' on <{}> is not a valid number: '{}'",
                        name, elem.tag, raw
                    ),
                );
                None
            }
        }
    }

    /// Text of a free-text element; child elements are not allowed
    fn text_of(&mut self, elem: &Element) -> String {
        self.allow_attributes(elem, &[]);
        match &elem.content {
            Content::Text(text) => text.clone(),
            Content::Empty => String::new(),
            Content::Children(_) => {
                self.structural(
                    Code::UnrecognizedConstruct,
                    elem.position,
                    format!("<{}> must contain text, not elements", elem.tag),
                );
                String::new()
            }
        }
    }

    fn template(&mut self, raw: &str, position: Position) -> Template {
        match Template::parse(raw) {
            Ok(template) => template,
            Err(err) => {
                self.findings.error(Code::Interpolation, Some(position), err.message);
                Template {
                    raw: raw.to_string(),
                    segments: Vec::new(),
                }
            }
        }
    }

    fn llm(&mut self, elem: &Element) -> LlmConfig {
        self.allow_attributes(elem, &["provider", "model", "max_retries"]);
        self.allow_children(elem, &[]);
        LlmConfig {
            provider: optional_attr(elem, "provider").unwrap_or_default(),
            model: optional_attr(elem, "model").unwrap_or_default(),
            max_retries: self.number_attr(elem, "max_retries").unwrap_or(2),
            position: elem.position,
        }
    }

    fn limits(&mut self, elem: &Element) -> Option<u32> {
        self.allow_attributes(elem, &["max_steps"]);
        self.allow_children(elem, &[]);
        let max_steps: u32 = self.number_attr(elem, "max_steps")?;
        if max_steps == 0 {
            self.structural(
                Code::InvalidAttribute,
                elem.position,
                "attribute 'max_steps' on <limits> must be at least 1",
            );
            return None;
        }
        Some(max_steps)
    }

    fn server(&mut self, elem: &Element) -> ServerConfig {
        self.allow_attributes(
            elem,
            &["cors_origins", "auth_env", "auth_header", "docs_public", "host", "port"],
        );
        self.allow_children(elem, &[]);
        let defaults = ServerConfig::default();
        let auth_env = optional_attr(elem, "auth_env");
        let cors_origins = match elem.attr("cors_origins") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect(),
            None => defaults.cors_origins,
        };
        ServerConfig {
            cors_origins,
            docs_public: self.bool_attr(elem, "docs_public", auth_env.is_none()),
            auth_env,
            auth_header: optional_attr(elem, "auth_header").unwrap_or(defaults.auth_header),
            host: optional_attr(elem, "host").unwrap_or(defaults.host),
            port: self.number_attr(elem, "port").unwrap_or(defaults.port),
        }
    }

    fn state_field(&mut self, elem: &Element) -> StateField {
        self.allow_attributes(
            elem,
            &[
                "name",
                "type",
                "required",
                "default",
                "reducer",
                "expose",
                "values",
                "description",
            ],
        );
        self.allow_children(elem, &[]);
        let name = self.required_attr(elem, "name");
        let ty = self.required_attr(elem, "type");
        StateField {
            name,
            ty: TypeDescriptor::parse(&ty, elem.attr("values")),
            required: self.bool_attr(elem, "required", false),
            default: elem.attr("default").map(str::to_string),
            policy: MergePolicy::parse(elem.attr("reducer").unwrap_or("")),
            expose: self.bool_attr(elem, "expose", true),
            position: elem.position,
        }
    }

    fn tool(&mut self, elem: &Element) -> Option<Tool> {
        let id = self.required_attr(elem, "id");
        let ty = self.required_attr(elem, "type");
        let description = optional_attr(elem, "description");
        let kind = match ty.as_str() {
            "api_call" => {
                self.allow_attributes(
                    elem,
                    &[
                        "id",
                        "type",
                        "description",
                        "max_retries",
                        "timeout",
                        "retry_status_codes",
                        "backoff",
                        "backoff_base",
                    ],
                );
                self.allow_children(
                    elem,
                    &["endpoint", "headers", "parameters", "body", "returns"],
                );
                ToolKind::ApiCall(self.api_call(elem)?)
            }
            "local_script" => {
                self.allow_attributes(elem, &["id", "type", "description", "path"]);
                self.allow_children(elem, &[]);
                ToolKind::LocalScript {
                    path: self.required_attr(elem, "path"),
                }
            }
            "script_tool" => {
                self.allow_attributes(elem, &["id", "type", "description", "path"]);
                self.allow_children(elem, &["parameters"]);
                ToolKind::ScriptTool {
                    path: self.required_attr(elem, "path"),
                    parameters: self.parameters(elem),
                }
            }
            "" => return None,
            other => {
                self.structural(
                    Code::UnknownToolType,
                    elem.position,
                    format!(
                        "unknown tool type '{}' (expected api_call, local_script or script_tool)",
                        other
                    ),
                );
                return None;
            }
        };
        Some(Tool {
            id,
            description,
            kind,
            position: elem.position,
        })
    }

    fn api_call(&mut self, elem: &Element) -> Option<ApiCall> {
        let Some(endpoint) = self.single(elem, "endpoint") else {
            self.structural(
                Code::UnrecognizedConstruct,
                elem.position,
                "api_call tool requires an <endpoint> element",
            );
            return None;
        };
        self.allow_attributes(endpoint, &["url", "method"]);
        self.allow_children(endpoint, &[]);
        let url = self.required_attr(endpoint, "url");
        let url = self.template(&url, endpoint.position);
        let method = match elem_method(endpoint) {
            Ok(method) => method,
            Err(raw) => {
                self.structural(
                    Code::InvalidAttribute,
                    endpoint.position,
                    format!("unsupported HTTP method '{}'", raw),
                );
                HttpMethod::Get
            }
        };

        let mut headers = Vec::new();
        if let Some(block) = self.single(elem, "headers") {
            self.allow_attributes(block, &[]);
            self.allow_children(block, &["header"]);
            for header in block.children_named("header") {
                self.allow_attributes(header, &["name", "value"]);
                self.allow_children(header, &[]);
                let name = self.required_attr(header, "name");
                let value = header.attr("value").unwrap_or("").to_string();
                let value = self.template(&value, header.position);
                headers.push(Header {
                    name,
                    value,
                    position: header.position,
                });
            }
        }

        let parameters = self.parameters(elem);

        let body = match self.single(elem, "body") {
            Some(block) => {
                self.allow_attributes(block, &["format"]);
                self.allow_children(block, &["field"]);
                if let Some(format) = optional_attr(block, "format")
                    && format != "json"
                {
                    self.structural(
                        Code::InvalidAttribute,
                        block.position,
                        format!("unsupported body format '{}' (expected json)", format),
                    );
                }
                let mut fields = Vec::new();
                for field in block.children_named("field") {
                    self.allow_attributes(field, &["name", "type", "from_state"]);
                    self.allow_children(field, &[]);
                    let name = self.required_attr(field, "name");
                    let from_state = optional_attr(field, "from_state").unwrap_or(name.clone());
                    fields.push(BodyField {
                        ty: TypeDescriptor::parse(field.attr("type").unwrap_or("string"), None),
                        name,
                        from_state,
                        position: field.position,
                    });
                }
                Some(Body {
                    fields,
                    position: block.position,
                })
            }
            None => None,
        };

        let mut returns = Vec::new();
        if let Some(block) = self.single(elem, "returns") {
            self.allow_attributes(block, &[]);
            self.allow_children(block, &["map"]);
            for map in block.children_named("map") {
                self.allow_attributes(map, &["api_field", "state_field"]);
                self.allow_children(map, &[]);
                returns.push(ReturnMapping {
                    api_field: self.required_attr(map, "api_field"),
                    state_field: self.required_attr(map, "state_field"),
                    position: map.position,
                });
            }
        }

        let mut retry = RetryPolicy::default();
        if let Some(max_retries) = self.number_attr(elem, "max_retries") {
            retry.max_retries = max_retries;
        }
        if let Some(timeout) = self.number_attr::<f64>(elem, "timeout") {
            if timeout > 0.0 {
                retry.timeout_secs = timeout;
            } else {
                self.structural(
                    Code::InvalidAttribute,
                    elem.position,
                    "attribute 'timeout' must be greater than zero",
                );
            }
        }
        if let Some(raw) = elem.attr("retry_status_codes") {
            let mut codes = Vec::new();
            for code in raw.split(',').map(str::trim).filter(|c| !c.is_empty()) {
                match code.parse::<u16>() {
                    Ok(code) if (100..600).contains(&code) => codes.push(code),
                    _ => self.structural(
                        Code::InvalidAttribute,
                        elem.position,
                        format!("'{}' is not a valid HTTP status code", code),
                    ),
                }
            }
            retry.retry_status_codes = codes;
        }
        match elem.attr("backoff").map(str::trim) {
            None | Some("exponential") => {}
            Some("fixed") => retry.backoff = Backoff::Fixed,
            Some(other) => self.structural(
                Code::InvalidAttribute,
                elem.position,
                format!("unknown backoff '{}' (expected exponential or fixed)", other),
            ),
        }
        if let Some(base) = self.number_attr::<f64>(elem, "backoff_base") {
            if base >= 0.0 {
                retry.backoff_base = base;
            } else {
                self.structural(
                    Code::InvalidAttribute,
                    elem.position,
                    "attribute 'backoff_base' must not be negative",
                );
            }
        }

        Some(ApiCall {
            url,
            method,
            headers,
            parameters,
            body,
            returns,
            retry,
            endpoint_position: endpoint.position,
        })
    }

    fn parameters(&mut self, elem: &Element) -> Vec<ToolParam> {
        let Some(block) = self.single(elem, "parameters") else {
            return Vec::new();
        };
        self.allow_attributes(block, &[]);
        self.allow_children(block, &["param"]);
        let mut parameters = Vec::new();
        for param in block.children_named("param") {
            self.allow_attributes(param, &["name", "type", "in", "map_to", "description"]);
            self.allow_children(param, &[]);
            let location = match param.attr("in").map(str::trim) {
                None | Some("query") => ParamLocation::Query,
                Some("path") => ParamLocation::Path,
                Some("body") => ParamLocation::Body,
                Some(other) => {
                    self.structural(
                        Code::InvalidAttribute,
                        param.position,
                        format!("unknown parameter location '{}' (expected query, path or body)", other),
                    );
                    ParamLocation::Query
                }
            };
            parameters.push(ToolParam {
                name: self.required_attr(param, "name"),
                ty: TypeDescriptor::parse(param.attr("type").unwrap_or("string"), None),
                location,
                map_to: optional_attr(param, "map_to"),
                description: optional_attr(param, "description"),
                position: param.position,
            });
        }
        parameters
    }

    fn node(&mut self, elem: &Element) -> Option<Node> {
        let id = self.required_attr(elem, "id");
        let ty = self.required_attr(elem, "type");
        let kind = match ty.as_str() {
            "llm" => {
                self.allow_attributes(elem, &["id", "type"]);
                self.allow_children(elem, &["system_prompt", "output_schema", "tool_bind"]);
                NodeKind::Llm(self.llm_node(elem))
            }
            "action" => {
                self.allow_attributes(elem, &["id", "type", "tool_ref"]);
                self.allow_children(elem, &[]);
                NodeKind::Action {
                    tool_ref: self.required_attr(elem, "tool_ref"),
                }
            }
            "script" => {
                self.allow_attributes(elem, &["id", "type", "path"]);
                self.allow_children(elem, &[]);
                NodeKind::Script {
                    path: self.required_attr(elem, "path"),
                }
            }
            "subgraph" => {
                self.allow_attributes(elem, &["id", "type", "agent_ref"]);
                self.allow_children(elem, &["input_map", "output_map"]);
                NodeKind::Subgraph(SubgraphNode {
                    agent_ref: self.required_attr(elem, "agent_ref"),
                    input_map: self.field_maps(elem, "input_map"),
                    output_map: self.field_maps(elem, "output_map"),
                })
            }
            "" => return None,
            other => {
                self.structural(
                    Code::UnknownNodeType,
                    elem.position,
                    format!(
                        "unknown node type '{}' (expected llm, action, script or subgraph)",
                        other
                    ),
                );
                return None;
            }
        };
        Some(Node {
            id,
            kind,
            position: elem.position,
        })
    }

    fn llm_node(&mut self, elem: &Element) -> LlmNode {
        let (prompt, prompt_position) = match self.single(elem, "system_prompt") {
            Some(prompt) => {
                let text = dedent(&self.text_of(prompt));
                (self.template(&text, prompt.position), Some(prompt.position))
            }
            None => (Template::default(), None),
        };

        let mut output_schema = Vec::new();
        if let Some(schema) = self.single(elem, "output_schema") {
            self.allow_attributes(schema, &[]);
            self.allow_children(schema, &["field"]);
            for field in schema.children_named("field") {
                self.allow_attributes(field, &["name", "type", "description", "values"]);
                self.allow_children(field, &[]);
                output_schema.push(OutputField {
                    name: self.required_attr(field, "name"),
                    ty: TypeDescriptor::parse(
                        field.attr("type").unwrap_or("string"),
                        field.attr("values"),
                    ),
                    description: optional_attr(field, "description"),
                    position: field.position,
                });
            }
        }

        let mut tool_binds = Vec::new();
        for bind in elem.children_named("tool_bind") {
            self.allow_attributes(bind, &["ref"]);
            self.allow_children(bind, &[]);
            tool_binds.push(ToolBind {
                tool_ref: self.required_attr(bind, "ref"),
                position: bind.position,
            });
        }

        LlmNode {
            prompt,
            prompt_position,
            output_schema,
            tool_binds,
        }
    }

    fn field_maps(&mut self, elem: &Element, tag: &str) -> Vec<FieldMapping> {
        let Some(block) = self.single(elem, tag) else {
            return Vec::new();
        };
        self.allow_attributes(block, &[]);
        self.allow_children(block, &["map"]);
        let mut maps = Vec::new();
        for map in block.children_named("map") {
            self.allow_attributes(map, &["source", "target"]);
            self.allow_children(map, &[]);
            maps.push(FieldMapping {
                source: self.required_attr(map, "source"),
                target: self.required_attr(map, "target"),
                position: map.position,
            });
        }
        maps
    }

    fn edge(&mut self, elem: &Element) -> Option<EdgeDecl> {
        self.allow_attributes(elem, &["source", "target", "default", "type"]);
        self.allow_children(elem, &["condition", "map_config"]);
        let source = self.required_attr(elem, "source");
        let target = self.required_attr(elem, "target");
        let default = self.bool_attr(elem, "default", false);

        let is_map = match elem.attr("type").map(str::trim) {
            None => false,
            Some("map") => true,
            Some(other) => {
                self.structural(
                    Code::InvalidAttribute,
                    elem.position,
                    format!("unknown edge type '{}' (only 'map' is recognized)", other),
                );
                false
            }
        };

        let (condition, condition_position) = match self.single(elem, "condition") {
            Some(cond) => (
                Some(self.text_of(cond).trim().to_string()),
                Some(cond.position),
            ),
            None => (None, None),
        };

        let map = match (is_map, self.single(elem, "map_config")) {
            (true, Some(config)) => {
                self.allow_attributes(config, &["items_field", "item_var"]);
                self.allow_children(config, &[]);
                Some(MapSpec {
                    items_field: self.required_attr(config, "items_field"),
                    item_var: self.required_attr(config, "item_var"),
                })
            }
            (true, None) => {
                self.structural(
                    Code::UnrecognizedConstruct,
                    elem.position,
                    "map edge requires a <map_config> element",
                );
                None
            }
            (false, Some(config)) => {
                self.structural(
                    Code::UnrecognizedConstruct,
                    config.position,
                    "<map_config> is only allowed on edges with type=\"map\"",
                );
                None
            }
            (false, None) => None,
        };

        if is_map && (condition.is_some() || default) {
            self.structural(
                Code::UnrecognizedConstruct,
                elem.position,
                "map edges cannot carry a condition or a default flag",
            );
        }

        Some(EdgeDecl {
            source,
            target,
            condition,
            condition_position,
            default,
            map,
            position: elem.position,
        })
    }
}

fn elem_method(endpoint: &Element) -> Result<HttpMethod, String> {
    match endpoint.attr("method").map(str::trim) {
        None | Some("") => Ok(HttpMethod::Get),
        Some(raw) => HttpMethod::parse(raw).ok_or_else(|| raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ElementType, ScalarType, Segment, TokenKind};
    use crate::normalize::normalize;
    use crate::tree::parse;

    fn agent(src: &str) -> Built<Agent> {
        let normalized = normalize(src).unwrap();
        let root = parse(&normalized.text).unwrap();
        build_agent(&root, "agents/test.amk")
    }

    fn project(src: &str) -> Built<Project> {
        let root = parse(src).unwrap();
        build_project(&root, "agents/_project.amk")
    }

    #[test]
    fn test_build_full_agent() {
        let built = agent(
            r#"
<agent name="support" version="1.2" description="Support triage">
  <config>
    <llm provider="anthropic" model="claude-sonnet" max_retries="3"/>
    <limits max_steps="40"/>
  </config>
  <state>
    <field name="query" type="string" required="true"/>
    <field name="tags" type="list[string]" reducer="append" default="[]"/>
    <field name="priority" type="enum" values="low,high" default="low"/>
    <field name="scratch" type="dict" expose="false"/>
  </state>
  <tools>
    <tool id="lookup" type="api_call" max_retries="2" backoff="fixed">
      <endpoint url="https://api.example.com/orders/${order_id}" method="post"/>
      <headers><header name="Authorization" value="Bearer ${env:API_TOKEN}"/></headers>
      <parameters><param name="order_id" type="string" in="path"/></parameters>
      <returns><map api_field="order.status" state_field="query"/></returns>
    </tool>
  </tools>
  <graph>
    <node id="classify" type="llm">
      <system_prompt>
        Classify: ${query}
        Use a > b && c < d.
      </system_prompt>
      <output_schema>
        <field name="priority" type="enum" values="low,high"/>
      </output_schema>
      <tool_bind ref="lookup"/>
    </node>
    <edge source="__START__" target="classify"/>
    <edge source="classify" target="__END__"/>
  </graph>
</agent>
"#,
        );
        assert!(built.diagnostics.is_empty(), "{:?}", built.diagnostics);
        let agent = built.model.unwrap();
        assert_eq!(agent.name, "support");
        assert_eq!(agent.version, "1.2");
        assert_eq!(agent.max_steps, Some(40));
        assert_eq!(agent.llm.as_ref().unwrap().provider, "anthropic");
        assert_eq!(agent.state.len(), 4);
        assert_eq!(
            agent.state[1].ty,
            TypeDescriptor::List(Some(ElementType::Scalar(ScalarType::String)))
        );
        assert_eq!(agent.state[1].policy, MergePolicy::Append);
        assert!(!agent.state[3].expose);

        let ToolKind::ApiCall(api) = &agent.tools[0].kind else {
            panic!("Expected api_call tool");
        };
        assert_eq!(api.method, HttpMethod::Post);
        assert_eq!(api.retry.max_retries, 2);
        assert_eq!(api.retry.backoff, Backoff::Fixed);
        assert_eq!(api.parameters[0].location, ParamLocation::Path);
        assert_eq!(api.headers[0].value.tokens().next().unwrap().kind, TokenKind::Env);

        match &agent.nodes[0].kind {
            NodeKind::Llm(llm) => {
                assert_eq!(llm.prompt.raw, "Classify: ${query}\nUse a > b && c < d.");
                assert!(matches!(llm.prompt.segments[1], Segment::Token(_)));
                assert_eq!(llm.tool_binds[0].tool_ref, "lookup");
                assert_eq!(llm.output_schema[0].name, "priority");
            }
            _ => panic!("Expected llm node"),
        }
        assert_eq!(agent.edges.len(), 2);
    }

    #[test]
    fn test_edges_with_conditions_and_maps() {
        let built = agent(
            r#"
<agent name="a">
  <state><field name="items" type="list"/></state>
  <graph>
    <node id="n" type="script" path="n.py"/>
    <edge source="__START__" target="n"><condition>len(state["items"]) > 0</condition></edge>
    <edge source="__START__" target="__END__" default="true"/>
    <edge source="n" target="n" type="map">
      <map_config items_field="items" item_var="item"/>
    </edge>
  </graph>
</agent>
"#,
        );
        let agent = built.model.unwrap();
        assert_eq!(
            agent.edges[0].condition.as_deref(),
            Some(r#"len(state["items"]) > 0"#)
        );
        assert!(agent.edges[1].default);
        assert_eq!(agent.edges[2].map.as_ref().unwrap().item_var, "item");
    }

    #[test]
    fn test_wrong_root_element() {
        let built = agent("<workflow name=\"x\"/>");
        assert!(built.model.is_none());
        assert_eq!(built.diagnostics[0].code, Code::RootElement);
    }

    #[test]
    fn test_unknown_node_type_is_structural() {
        let built = agent(
            r#"<agent name="a"><graph><node id="x" type="robot"/></graph></agent>"#,
        );
        assert!(built.model.is_none());
        assert_eq!(built.diagnostics[0].code, Code::UnknownNodeType);
    }

    #[test]
    fn test_unknown_tool_type_is_structural() {
        let built = agent(
            r#"<agent name="a"><tools><tool id="t" type="grpc"/></tools></agent>"#,
        );
        assert!(built.model.is_none());
        assert_eq!(built.diagnostics[0].code, Code::UnknownToolType);
    }

    #[test]
    fn test_unknown_child_and_attribute() {
        let built = agent(r#"<agent name="a" colour="red"><extras/></agent>"#);
        assert!(built.model.is_none());
        let codes: Vec<_> = built.diagnostics.iter().map(|d| d.code).collect();
        assert_eq!(
            codes,
            vec![Code::UnrecognizedConstruct, Code::UnrecognizedConstruct]
        );
    }

    #[test]
    fn test_malformed_boolean_and_number() {
        let built = agent(
            r#"<agent name="a"><config><limits max_steps="many"/></config><state><field name="f" type="int" required="yes"/></state></agent>"#,
        );
        assert!(built.model.is_none());
        assert!(built.diagnostics.iter().all(|d| d.code == Code::InvalidAttribute));
        assert_eq!(built.diagnostics.len(), 2);
    }

    #[test]
    fn test_map_edge_without_config() {
        let built = agent(
            r#"<agent name="a"><graph><edge source="x" target="y" type="map"/></graph></agent>"#,
        );
        assert!(built.model.is_none());
        assert!(built.diagnostics[0].message.contains("<map_config>"));
    }

    #[test]
    fn test_interpolation_error_keeps_model() {
        let built = agent(
            r#"<agent name="a"><graph><node id="n" type="llm"><system_prompt>Hi ${user name}</system_prompt></node></graph></agent>"#,
        );
        assert!(built.model.is_some());
        assert_eq!(built.diagnostics.len(), 1);
        assert_eq!(built.diagnostics[0].code, Code::Interpolation);
    }

    #[test]
    fn test_unknown_merge_policy_is_kept() {
        let built = agent(
            r#"<agent name="a"><state><field name="f" type="list" reducer="extend"/></state></agent>"#,
        );
        let agent = built.model.unwrap();
        assert_eq!(agent.state[0].policy, MergePolicy::Unrecognized("extend".into()));
    }

    #[test]
    fn test_build_project() {
        let built = project(
            r#"
<project name="demo" spec_version="2.0">
  <config>
    <llm provider="openai" model="gpt-4o"/>
    <server cors_origins="https://a.example, https://b.example" auth_env="DEMO_KEY" port="9000"/>
    <env>
      <var name="API_TOKEN" required="true"/>
      <var name="REGION" default="eu"/>
    </env>
    <limits max_steps="50"/>
  </config>
</project>
"#,
        );
        assert!(built.diagnostics.is_empty(), "{:?}", built.diagnostics);
        let project = built.model.unwrap();
        assert_eq!(project.name, "demo");
        assert_eq!(project.spec_version.as_deref(), Some("2.0"));
        assert_eq!(project.llm.unwrap().max_retries, 2);
        assert_eq!(
            project.server.cors_origins,
            vec!["https://a.example", "https://b.example"]
        );
        assert_eq!(project.server.auth_env.as_deref(), Some("DEMO_KEY"));
        assert!(!project.server.docs_public);
        assert_eq!(project.server.port, 9000);
        assert_eq!(project.server.host, "0.0.0.0");
        assert!(project.env[0].required);
        assert_eq!(project.env[1].default.as_deref(), Some("eu"));
        assert_eq!(project.max_steps, 50);
    }

    #[test]
    fn test_project_defaults() {
        let project = project(r#"<project name="demo"/>"#).model.unwrap();
        assert_eq!(project.server, ServerConfig::default());
        assert!(project.server.docs_public);
        assert_eq!(project.max_steps, DEFAULT_MAX_STEPS);
        assert!(project.spec_version.is_none());
    }

    #[test]
    fn test_dedent() {
        assert_eq!(dedent("\n    line one\n      indented\n    line two\n  "), "line one\n  indented\nline two");
        assert_eq!(dedent("Inline start\n    next"), "Inline start\nnext");
        assert_eq!(dedent("   "), "");
    }
}
