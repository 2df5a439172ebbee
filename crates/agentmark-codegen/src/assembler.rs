//! Service assembly
//!
//! Renders the files that wrap the compiled agent modules into one
//! deployable FastAPI service:
//!
//! ```text
//! main.py           POST /run/<agent> per agent, GET /health, settings
//! requirements.txt  packages implied by providers and tool kinds
//! .env.example      every declared variable, auth secret first
//! ```
//!
//! Templates are compiled into the binary and rendered with `minijinja`.

use std::collections::BTreeSet;

use agentmark_core::ValidatedAgent;
use agentmark_core::ir::{Agent, EnvVar, Project, ToolKind};
use minijinja::Environment;
use serde::Serialize;

use crate::error::Result;
use crate::generator::{module_name, provider};
use crate::python::{self, Namer};

const MAIN_TEMPLATE: &str = include_str!("../templates/main.py.j2");
const REQUIREMENTS_TEMPLATE: &str = include_str!("../templates/requirements.txt.j2");
const ENV_TEMPLATE: &str = include_str!("../templates/env.example.j2");

/// Packages every service needs
const BASE_PACKAGES: &[&str] = &[
    "fastapi>=0.104.0",
    "uvicorn[standard]>=0.24.0",
    "pydantic>=2.0.0",
    "pydantic-settings>=2.0.0",
    "langgraph>=0.2.0",
    "langchain-core>=0.2.0",
];

/// Names `main.py` defines or imports itself
const RESERVED: &[&str] = &[
    "API_KEY_ENV",
    "API_KEY_HEADER",
    "Any",
    "BaseSettings",
    "CORSMiddleware",
    "Depends",
    "FastAPI",
    "Field",
    "GraphRecursionError",
    "HTTPException",
    "Literal",
    "Request",
    "Settings",
    "SettingsConfigDict",
    "_request_id",
    "_serialize_messages",
    "app",
    "create_model",
    "health",
    "logger",
    "logging",
    "os",
    "require_api_key",
    "secrets",
    "settings",
    "uuid",
    "uvicorn",
];

#[derive(Serialize)]
struct AuthContext {
    env: String,
    header: String,
}

#[derive(Serialize)]
struct AgentContext {
    module: String,
    limit_alias: String,
    graph_alias: String,
    request_model: String,
    request_model_literal: String,
    response_model: String,
    response_model_literal: String,
    request_fields: Vec<String>,
    response_fields: Vec<String>,
    route: String,
    function: String,
    docstring: String,
    name: String,
    response_keys: String,
}

#[derive(Serialize)]
struct ServiceContext {
    title: String,
    fastapi_imports: String,
    title_literal: String,
    auth: Option<AuthContext>,
    settings: Vec<String>,
    docs_public: bool,
    cors_origins: String,
    agent_names: String,
    host: String,
    port: u16,
    agents: Vec<AgentContext>,
}

#[derive(Serialize)]
struct RequirementsContext {
    packages: Vec<String>,
}

#[derive(Serialize)]
struct EnvContext {
    auth_env: Option<String>,
    env: Vec<String>,
}

/// Renders the service files for a set of validated agents
pub struct ServiceAssembler<'a> {
    project: &'a Project,
    agents: Vec<&'a ValidatedAgent>,
    env: Environment<'static>,
}

impl<'a> ServiceAssembler<'a> {
    /// Prepare an assembler; agents are served in name order
    pub fn new(project: &'a Project, agents: &'a [ValidatedAgent]) -> Result<Self> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.set_keep_trailing_newline(true);
        env.add_template("main.py", MAIN_TEMPLATE)?;
        env.add_template("requirements.txt", REQUIREMENTS_TEMPLATE)?;
        env.add_template(".env.example", ENV_TEMPLATE)?;

        let mut agents: Vec<&ValidatedAgent> = agents.iter().collect();
        agents.sort_by(|a, b| a.agent.name.cmp(&b.agent.name));
        Ok(Self {
            project,
            agents,
            env,
        })
    }

    /// Render `main.py`
    pub fn main_py(&self) -> Result<String> {
        let server = &self.project.server;
        let mut namer = Namer::new(RESERVED);
        let agents = self
            .agents
            .iter()
            .map(|v| agent_context(&v.agent, &mut namer))
            .collect();
        let names: Vec<&str> = self.agents.iter().map(|v| v.agent.name.as_str()).collect();

        let fastapi_imports = if server.auth_env.is_some() {
            "Depends, FastAPI, HTTPException, Request"
        } else {
            "FastAPI, HTTPException"
        };

        let context = ServiceContext {
            title: self.project.name.clone(),
            fastapi_imports: fastapi_imports.to_string(),
            title_literal: python::string(&self.project.name),
            auth: server.auth_env.as_ref().map(|env| AuthContext {
                env: python::string(env),
                header: python::string(&server.auth_header),
            }),
            settings: self.project.env.iter().map(setting_line).collect(),
            docs_public: server.docs_public,
            cors_origins: string_list(server.cors_origins.iter().map(String::as_str)),
            agent_names: string_list(names),
            host: python::string(&server.host),
            port: server.port,
            agents,
        };
        Ok(self.env.get_template("main.py")?.render(context)?)
    }

    /// Render `requirements.txt`
    pub fn requirements(&self) -> Result<String> {
        let context = RequirementsContext {
            packages: self.packages().into_iter().collect(),
        };
        Ok(self.env.get_template("requirements.txt")?.render(context)?)
    }

    /// Render `.env.example`
    pub fn env_example(&self) -> Result<String> {
        let auth_env = self.project.server.auth_env.clone();
        let env = self
            .project
            .env
            .iter()
            .filter(|var| auth_env.as_deref() != Some(var.name.as_str()))
            .map(env_line)
            .collect();
        let context = EnvContext { auth_env, env };
        Ok(self.env.get_template(".env.example")?.render(context)?)
    }

    fn packages(&self) -> BTreeSet<String> {
        let mut packages: BTreeSet<String> = BASE_PACKAGES.iter().map(|p| p.to_string()).collect();
        let providers = self
            .project
            .llm
            .iter()
            .chain(self.agents.iter().filter_map(|v| v.agent.llm.as_ref()));
        for llm in providers {
            if let Some(provider) = provider(&llm.provider) {
                packages.insert(format!("{}>=0.1.0", provider.package()));
            }
        }
        let apis = self
            .agents
            .iter()
            .flat_map(|v| &v.agent.tools)
            .filter_map(|t| match &t.kind {
                ToolKind::ApiCall(api) => Some(api),
                _ => None,
            })
            .collect::<Vec<_>>();
        if !apis.is_empty() {
            packages.insert("httpx>=0.25.0".to_string());
        }
        if apis.iter().any(|api| api.retry.max_retries > 0) {
            packages.insert("tenacity>=8.2.0".to_string());
        }
        packages
    }
}

fn agent_context(agent: &Agent, namer: &mut Namer) -> AgentContext {
    let pascal = python::pascal_case(&agent.name);
    let request_model = namer.claim(&format!("{}Request", pascal));
    let response_model = namer.claim(&format!("{}Response", pascal));
    let exposed: Vec<_> = agent.state.iter().filter(|f| f.expose).collect();

    // Required and defaulted fields are always accepted; `expose` adds optional inputs
    let request_fields = agent
        .state
        .iter()
        .filter(|f| f.required || f.default.is_some() || f.expose)
        .map(|field| {
            let ann = python::annotation(&field.ty);
            let spec = if field.required {
                format!("({}, ...)", ann)
            } else if let Some(default) = python::default_literal(field) {
                format!("({}, {})", ann, default)
            } else {
                format!("({} | None, None)", ann)
            };
            format!("{}: {}", python::string(&field.name), spec)
        })
        .collect();
    let response_fields = exposed
        .iter()
        .map(|field| {
            format!(
                "{}: ({} | None, None)",
                python::string(&field.name),
                python::annotation(&field.ty)
            )
        })
        .collect();
    let docstring = match agent.description.as_deref() {
        Some(description) if !description.trim().is_empty() => python::docstring(description),
        _ => python::docstring(&format!("Run the {} agent.", agent.name)),
    };

    AgentContext {
        module: module_name(&agent.name),
        limit_alias: namer.claim(&format!("{}_recursion_limit", agent.name)),
        graph_alias: namer.claim(&format!("{}_graph", agent.name)),
        request_model_literal: python::string(&request_model),
        request_model,
        response_model_literal: python::string(&response_model),
        response_model,
        request_fields,
        response_fields,
        route: python::string(&format!("/run/{}", agent.name)),
        function: namer.claim(&format!("run_{}", agent.name)),
        docstring,
        name: python::string(&agent.name),
        response_keys: string_list(exposed.iter().map(|f| f.name.as_str())),
    }
}

/// `Settings` attribute for a declared variable
fn setting_line(var: &EnvVar) -> String {
    let default = var.default.as_deref().map(python::string);
    if python::is_keyword(&var.name) {
        let value = match (&default, var.required) {
            (Some(d), _) => format!("default={}, ", d),
            (None, true) => "..., ".to_string(),
            (None, false) => "default=\"\", ".to_string(),
        };
        return format!(
            "{}_: str = Field({}validation_alias={})",
            var.name,
            value,
            python::string(&var.name)
        );
    }
    match (default, var.required) {
        (Some(d), _) => format!("{}: str = {}", var.name, d),
        (None, true) => format!("{}: str", var.name),
        (None, false) => format!("{}: str = \"\"", var.name),
    }
}

/// `.env.example` line for a declared variable
fn env_line(var: &EnvVar) -> String {
    match (&var.default, var.required) {
        (Some(default), _) => format!("{}={}", var.name, default),
        (None, true) => format!("{}=  # Required", var.name),
        (None, false) => format!("{}=", var.name),
    }
}

fn string_list<'s>(items: impl IntoIterator<Item = &'s str>) -> String {
    let items: Vec<String> = items.into_iter().map(python::string).collect();
    format!("[{}]", items.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::test_support::*;
    use agentmark_core::{Analysis, MemoryProject, Position, analyze};
    use pretty_assertions::assert_eq;

    const ECHO: &str = r#"<agent name="echo" version="1.0.0" description="Echoes input.">
  <state>
    <field name="query" type="string" required="true"/>
    <field name="limit" type="int" default="5"/>
    <field name="mode" type="enum" values="short,long"/>
    <field name="scratch" type="string" expose="false"/>
    <field name="answer" type="string"/>
  </state>
  <graph>
    <node id="reply" type="llm"/>
    <edge source="__START__" target="reply"/>
    <edge source="reply" target="__END__"/>
  </graph>
</agent>"#;

    const SECURED_PROJECT: &str = r#"<project name="Support Desk" spec_version="2.0">
  <config>
    <llm provider="anthropic" model="claude-sonnet"/>
    <env>
      <var name="API_SECRET" required="true"/>
      <var name="REGION" default="eu"/>
      <var name="TRACE"/>
    </env>
    <server host="127.0.0.1" port="9000" auth_env="API_SECRET" cors_origins="https://app.example.com"/>
  </config>
</project>"#;

    fn secured(agent: &str) -> Analysis {
        let project = MemoryProject::new()
            .with_project(SECURED_PROJECT)
            .with_agent("echo", agent);
        let analysis = analyze(&project, &project).unwrap();
        assert!(analysis.report.errors().is_empty(), "{:?}", analysis.report);
        analysis
    }

    #[test]
    fn test_request_and_response_models() {
        let analysis = analysis(ECHO);
        let assembler =
            ServiceAssembler::new(analysis.project.as_ref().unwrap(), &analysis.agents).unwrap();
        let main = assembler.main_py().unwrap();

        assert!(main.contains(
            "from compiled_echo import RECURSION_LIMIT as echo_recursion_limit, graph as echo_graph\n"
        ));
        assert!(main.contains(
            r#"EchoRequest = create_model(
    "EchoRequest",
    **{
        "query": (str, ...),
        "limit": (int, 5),
        "mode": (Literal["short", "long"] | None, None),
        "answer": (str | None, None),
    },
)
"#
        ));
        assert!(main.contains(r#"        "answer": (str | None, None),
        "messages": (list[dict[str, Any]], Field(default_factory=list)),"#));
        assert!(!main.contains("\"scratch\""));
        assert!(main.contains("@app.post(\"/run/echo\", response_model=EchoResponse)\n"));
        assert!(main.contains("async def run_echo(request: EchoRequest) -> dict[str, Any]:\n    \"\"\"Echoes input.\"\"\"\n"));
        assert!(main.contains("config={\"recursion_limit\": echo_recursion_limit}"));
        assert!(main.contains("for key in [\"query\", \"limit\", \"mode\", \"answer\"]}"));
        assert!(main.contains("return {\"status\": \"ok\", \"agents\": [\"echo\"]}"));
        assert!(main.contains("SEARCH_KEY: str\n"));
        assert!(main.contains("uvicorn.run(app, host=\"0.0.0.0\", port=8000)"));
        assert!(main.contains(
            "from fastapi import FastAPI, HTTPException\nfrom fastapi.middleware.cors import CORSMiddleware\n"
        ));
        assert!(!main.contains("require_api_key"));
        assert!(!main.contains("docs_url=None"));
    }

    #[test]
    fn test_auth_docs_and_cors() {
        let analysis = secured(ECHO);
        let assembler =
            ServiceAssembler::new(analysis.project.as_ref().unwrap(), &analysis.agents).unwrap();
        let main = assembler.main_py().unwrap();

        assert!(main.contains(
            "from fastapi import Depends, FastAPI, HTTPException, Request\nfrom fastapi.middleware.cors import CORSMiddleware\n"
        ));
        assert!(main.contains("API_KEY_ENV = \"API_SECRET\"\nAPI_KEY_HEADER = \"X-API-Key\"\n"));
        assert!(main.contains("secrets.compare_digest(provided, expected)"));
        assert!(main.contains("dependencies=[Depends(require_api_key)]"));
        assert!(main.contains("title=\"Support Desk\",\n    docs_url=None,"));
        assert!(main.contains("allow_origins=[\"https://app.example.com\"],"));
        assert!(main.contains("    API_SECRET: str\n    REGION: str = \"eu\"\n    TRACE: str = \"\"\n"));
        assert!(main.contains("uvicorn.run(app, host=\"127.0.0.1\", port=9000)"));
    }

    #[test]
    fn test_request_accepts_required_and_defaulted_hidden_fields() {
        let agent = r#"<agent name="acc">
  <state>
    <field name="count" type="int" reducer="add"/>
    <field name="notes" type="list[string]" reducer="append"/>
    <field name="secret" type="string" required="true" expose="false"/>
    <field name="budget" type="int" default="7" expose="false"/>
    <field name="cache" type="dict" expose="false"/>
  </state>
  <graph>
    <node id="work" type="llm"/>
    <edge source="__START__" target="work"/>
    <edge source="work" target="__END__"/>
  </graph>
</agent>"#;
        let analysis = analysis(agent);
        let assembler =
            ServiceAssembler::new(analysis.project.as_ref().unwrap(), &analysis.agents).unwrap();
        let main = assembler.main_py().unwrap();

        assert!(main.contains(
            r#"AccRequest = create_model(
    "AccRequest",
    **{
        "count": (int | None, None),
        "notes": (list[str] | None, None),
        "secret": (str, ...),
        "budget": (int, 7),
    },
)
"#
        ));
        assert!(main.contains(
            r#"AccResponse = create_model(
    "AccResponse",
    **{
        "count": (int | None, None),
        "notes": (list[str] | None, None),
        "messages": (list[dict[str, Any]], Field(default_factory=list)),
    },
)
"#
        ));
        assert!(!main.contains("\"cache\""));
        assert!(main.contains("    state = request.model_dump(exclude_none=True)\n"));
    }

    #[test]
    fn test_requirements_follow_providers_and_tools() {
        let agent = r#"<agent name="fetcher">
  <config><llm provider="groq" model="llama"/></config>
  <state><field name="id" type="string"/><field name="title" type="string"/></state>
  <tools>
    <tool id="get_item" type="api_call" max_retries="2">
      <endpoint url="https://api.example.com/items/${id}" method="GET"/>
      <parameters><param name="id" type="string" in="path"/></parameters>
      <returns><map api_field="title" state_field="title"/></returns>
    </tool>
  </tools>
  <graph>
    <node id="fetch" type="action" tool_ref="get_item"/>
    <edge source="__START__" target="fetch"/>
    <edge source="fetch" target="__END__"/>
  </graph>
</agent>"#;
        let analysis = analysis(agent);
        let assembler =
            ServiceAssembler::new(analysis.project.as_ref().unwrap(), &analysis.agents).unwrap();
        assert_eq!(
            assembler.requirements().unwrap(),
            "fastapi>=0.104.0\nhttpx>=0.25.0\nlangchain-core>=0.2.0\nlangchain-groq>=0.1.0\n\
             langchain-openai>=0.1.0\nlanggraph>=0.2.0\npydantic-settings>=2.0.0\n\
             pydantic>=2.0.0\ntenacity>=8.2.0\nuvicorn[standard]>=0.24.0\n"
        );
    }

    #[test]
    fn test_env_example() {
        let analysis = secured(ECHO);
        let assembler =
            ServiceAssembler::new(analysis.project.as_ref().unwrap(), &analysis.agents).unwrap();
        assert_eq!(
            assembler.env_example().unwrap(),
            "# API authentication\nAPI_SECRET=your-api-key-here\n\nREGION=eu\nTRACE=\n"
        );
    }

    #[test]
    fn test_env_example_without_variables() {
        let project = MemoryProject::new()
            .with_project(r#"<project name="bare" spec_version="2.0"/>"#)
            .with_agent("echo", ECHO);
        let analysis = analyze(&project, &project).unwrap();
        let assembler =
            ServiceAssembler::new(analysis.project.as_ref().unwrap(), &analysis.agents).unwrap();
        assert_eq!(
            assembler.env_example().unwrap(),
            "# No environment variables configured\n"
        );
    }

    #[test]
    fn test_setting_lines() {
        let var = |name: &str, required, default: Option<&str>| EnvVar {
            name: name.to_string(),
            required,
            default: default.map(str::to_string),
            position: Position::start(),
        };
        assert_eq!(setting_line(&var("KEY", true, None)), "KEY: str");
        assert_eq!(setting_line(&var("KEY", false, Some("a\"b"))), "KEY: str = \"a\\\"b\"");
        assert_eq!(
            setting_line(&var("None", true, None)),
            "None_: str = Field(..., validation_alias=\"None\")"
        );
        assert_eq!(env_line(&var("KEY", true, None)), "KEY=  # Required");
    }
}
