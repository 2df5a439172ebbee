//! Tool functions and their input models

use agentmark_core::ir::{ApiCall, Backoff, ParamLocation, Tool, ToolKind, ToolParam};

use super::{ModelField, ModuleGenerator, Writer, script_module};
use crate::error::Result;
use crate::python;

impl ModuleGenerator<'_> {
    pub(super) fn emit_tools(&mut self, w: &mut Writer) -> Result<()> {
        let agent = self.agent;
        for tool in &agent.tools {
            let model = self.names.tool_inputs[&tool.id].clone();
            let function = self.names.tools[&tool.id].clone();
            self.imports.name("langchain_core.tools", "tool");
            self.imports.name("pydantic", "create_model");

            match &tool.kind {
                ToolKind::LocalScript { .. } => {
                    self.imports.name("pydantic", "ConfigDict");
                    w.line(format!(
                        "{} = create_model({}, __config__=ConfigDict(extra=\"allow\"))",
                        model,
                        python::string(&model)
                    ));
                }
                kind => self.emit_input_model(w, &model, kind.parameters()),
            }
            w.gap();

            w.line(format!(
                "@tool({}, args_schema={})",
                python::string(&tool.id),
                model
            ));
            w.line(format!("def {}(**kwargs) -> dict:", function));
            w.indent();
            w.line(python::docstring(&tool_description(tool)));
            match &tool.kind {
                ToolKind::ApiCall(api) => self.emit_api_body(w, tool, api),
                ToolKind::LocalScript { path } | ToolKind::ScriptTool { path, .. } => {
                    self.imports.module("importlib");
                    w.line(format!(
                        "module = importlib.import_module({})",
                        python::string(&script_module(path))
                    ));
                    w.line("return module.run(**kwargs)");
                }
            }
            w.dedent();
            w.gap();
        }
        Ok(())
    }

    fn emit_input_model(&mut self, w: &mut Writer, model: &str, parameters: &[ToolParam]) {
        let fields: Vec<ModelField<'_>> = parameters
            .iter()
            .map(|p| ModelField {
                name: &p.name,
                ty: &p.ty,
                description: p.description.as_deref(),
            })
            .collect();
        self.emit_model(w, model, &fields);
    }

    fn emit_api_body(&mut self, w: &mut Writer, tool: &Tool, api: &ApiCall) {
        self.imports.module("httpx");

        let url = self.template_expr(&api.url, |name| {
            format!(
                "quote(str(kwargs.get({}, \"\")), safe=\"\")",
                python::string(name)
            )
        });
        if api.url.tokens().next().is_some() {
            self.imports.name("urllib.parse", "quote");
        }
        w.line(format!("url = {}", url));

        if api.headers.is_empty() {
            w.line("headers = {}");
        } else {
            w.line("headers = {");
            w.indent();
            for header in &api.headers {
                let value = self.template_expr(&header.value, |name| {
                    format!("str(kwargs.get({}, \"\"))", python::string(name))
                });
                w.line(format!("{}: {},", python::string(&header.name), value));
            }
            w.dedent();
            w.line("}");
        }

        let query: Vec<&ToolParam> = api
            .parameters
            .iter()
            .filter(|p| p.location == ParamLocation::Query)
            .collect();
        if !query.is_empty() {
            w.line("params = {");
            w.indent();
            for param in &query {
                w.line(format!(
                    "{}: kwargs.get({}),",
                    python::string(param.wire_name()),
                    python::string(&param.name)
                ));
            }
            w.dedent();
            w.line("}");
            w.line("params = {key: value for key, value in params.items() if value is not None}");
        }

        let mut payload: Vec<(String, String)> = Vec::new();
        if let Some(body) = &api.body {
            for field in &body.fields {
                payload.push((field.name.clone(), field.from_state.clone()));
            }
        }
        for param in api
            .parameters
            .iter()
            .filter(|p| p.location == ParamLocation::Body)
        {
            if !payload.iter().any(|(key, _)| key == param.wire_name()) {
                payload.push((param.wire_name().to_string(), param.name.clone()));
            }
        }
        if !payload.is_empty() {
            w.line("payload = {");
            w.indent();
            for (key, source) in &payload {
                w.line(format!(
                    "{}: kwargs.get({}),",
                    python::string(key),
                    python::string(source)
                ));
            }
            w.dedent();
            w.line("}");
        }

        let mut call = format!(
            "httpx.request({}, url, headers=headers",
            python::string(&api.method.as_lower().to_ascii_uppercase())
        );
        if !query.is_empty() {
            call.push_str(", params=params");
        }
        if !payload.is_empty() {
            call.push_str(", json=payload");
        }
        call.push_str(&format!(", timeout={:?})", api.retry.timeout_secs));

        let retry = &api.retry;
        if retry.max_retries > 0 {
            self.imports.name("tenacity", "retry");
            self.imports.name("tenacity", "retry_if_exception_type");
            self.imports.name("tenacity", "stop_after_attempt");
            let wait = match retry.backoff {
                Backoff::Exponential => {
                    self.imports.name("tenacity", "wait_exponential");
                    format!("wait_exponential(multiplier={:?})", retry.backoff_base)
                }
                Backoff::Fixed => {
                    self.imports.name("tenacity", "wait_fixed");
                    format!("wait_fixed({:?})", retry.backoff_base)
                }
            };
            w.blank();
            w.line("@retry(");
            w.indent();
            w.line(format!("stop=stop_after_attempt({}),", retry.max_retries + 1));
            w.line(format!("wait={},", wait));
            w.line("retry=retry_if_exception_type((RetryableStatusError, httpx.TransportError)),");
            w.line("reraise=True,");
            w.dedent();
            w.line(")");
            w.block("def send():", |w| {
                w.line(format!("response = {}", call));
                if !retry.retry_status_codes.is_empty() {
                    let codes: Vec<String> =
                        retry.retry_status_codes.iter().map(u16::to_string).collect();
                    let codes = if codes.len() == 1 {
                        format!("({},)", codes[0])
                    } else {
                        format!("({})", codes.join(", "))
                    };
                    w.block(format!("if response.status_code in {}:", codes), |w| {
                        w.line("raise RetryableStatusError(response.status_code)");
                    });
                }
                w.line("response.raise_for_status()");
                w.line("return response");
            });
            w.blank();
            w.line("response = send()");
        } else {
            w.line(format!("response = {}", call));
            w.line("response.raise_for_status()");
        }

        w.block("try:", |w| w.line("data = response.json()"));
        w.block("except ValueError as exc:", |w| {
            w.line(format!(
                "raise ToolExecutionError({}, \"response body is not JSON\") from exc",
                python::string(&tool.id)
            ));
        });
        if api.returns.is_empty() {
            w.line("return data if isinstance(data, dict) else {\"result\": data}");
        } else {
            self.helpers.insert(super::Helper::Dig);
            w.line("return {");
            w.indent();
            for mapping in &api.returns {
                w.line(format!(
                    "{}: _dig(data, {}),",
                    python::string(&mapping.state_field),
                    python::string(&mapping.api_field)
                ));
            }
            w.dedent();
            w.line("}");
        }
    }
}

/// Text the model sees for a tool
fn tool_description(tool: &Tool) -> String {
    match tool.description.as_deref().map(str::trim) {
        Some(description) if !description.is_empty() => description.to_string(),
        _ => format!("Run the {} tool.", tool.id),
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use pretty_assertions::assert_eq;

    fn section<'a>(source: &'a str, start: &str, end: &str) -> &'a str {
        let from = source.find(start).unwrap();
        let to = source[from..].find(end).unwrap() + from;
        &source[from..to]
    }

    #[test]
    fn test_api_tool_with_retries() {
        let agent = r#"<agent name="fetcher">
  <state>
    <field name="order_id" type="string" required="true"/>
    <field name="status" type="string"/>
  </state>
  <tools>
    <tool id="get_order" type="api_call" description="Fetch an order." max_retries="2" timeout="5" backoff="fixed" backoff_base="0.5" retry_status_codes="503">
      <endpoint url="https://shop.example.com/orders/${order_id}" method="get"/>
      <headers><header name="Authorization" value="Bearer ${env:SEARCH_KEY}"/></headers>
      <parameters><param name="order_id" type="string" in="path" description="Order id"/></parameters>
      <returns><map api_field="order.status" state_field="status"/></returns>
    </tool>
  </tools>
  <graph>
    <node id="fetch" type="action" tool_ref="get_order"/>
    <edge source="__START__" target="fetch"/>
    <edge source="fetch" target="__END__"/>
  </graph>
</agent>"#;
        let source = module(&analysis(agent), "fetcher");
        assert_eq!(
            section(&source, "GetOrderInput = create_model(", "\n\n\n"),
            r#"GetOrderInput = create_model(
    "GetOrderInput",
    **{
        "order_id": (str, Field(..., description="Order id")),
    },
)"#
        );
        assert_eq!(
            section(&source, "@tool(\"get_order\"", "\n\n\n"),
            r#"@tool("get_order", args_schema=GetOrderInput)
def get_order(**kwargs) -> dict:
    """Fetch an order."""
    url = "".join(["https://shop.example.com/orders/", quote(str(kwargs.get("order_id", "")), safe="")])
    headers = {
        "Authorization": "".join(["Bearer ", os.getenv("SEARCH_KEY", "")]),
    }

    @retry(
        stop=stop_after_attempt(3),
        wait=wait_fixed(0.5),
        retry=retry_if_exception_type((RetryableStatusError, httpx.TransportError)),
        reraise=True,
    )
    def send():
        response = httpx.request("GET", url, headers=headers, timeout=5.0)
        if response.status_code in (503,):
            raise RetryableStatusError(response.status_code)
        response.raise_for_status()
        return response

    response = send()
    try:
        data = response.json()
    except ValueError as exc:
        raise ToolExecutionError("get_order", "response body is not JSON") from exc
    return {
        "status": _dig(data, "order.status"),
    }"#
        );
        assert!(source.contains("from tenacity import retry, retry_if_exception_type, stop_after_attempt, wait_fixed\n"));
        assert!(source.contains("from urllib.parse import quote\n"));
        assert!(source.contains("class RetryableStatusError(Exception):"));
    }

    #[test]
    fn test_api_tool_query_and_body_without_retries() {
        let agent = r#"<agent name="poster">
  <state>
    <field name="text" type="string"/>
    <field name="lang" type="string"/>
  </state>
  <tools>
    <tool id="translate" type="api_call">
      <endpoint url="https://api.example.com/translate" method="POST"/>
      <parameters>
        <param name="lang" type="string" map_to="target_lang"/>
        <param name="text" type="string" in="body"/>
      </parameters>
      <body><field name="content" from_state="text"/></body>
    </tool>
  </tools>
  <graph>
    <node id="go" type="action" tool_ref="translate"/>
    <edge source="__START__" target="go"/>
    <edge source="go" target="__END__"/>
  </graph>
</agent>"#;
        let source = module(&analysis(agent), "poster");
        let body = section(&source, "def translate(", "\n\n\n");
        assert!(body.contains("    url = \"https://api.example.com/translate\"\n"));
        assert!(body.contains("    params = {\n        \"target_lang\": kwargs.get(\"lang\"),\n    }\n"));
        assert!(body.contains(
            "    payload = {\n        \"content\": kwargs.get(\"text\"),\n        \"text\": kwargs.get(\"text\"),\n    }\n"
        ));
        assert!(body.contains(
            "    response = httpx.request(\"POST\", url, headers=headers, params=params, json=payload, timeout=30.0)\n    response.raise_for_status()\n"
        ));
        assert!(body.contains("    return data if isinstance(data, dict) else {\"result\": data}"));
        assert!(!source.contains("tenacity"));
        assert!(!source.contains("RetryableStatusError"));
    }

    #[test]
    fn test_script_tools() {
        let agent = r#"<agent name="scripted">
  <state><field name="text" type="string"/></state>
  <tools>
    <tool id="anything" type="local_script" path="helpers/any.py"/>
    <tool id="fmt" type="script_tool" path="fmt.py" description="Format text.">
      <parameters><param name="text" type="string"/></parameters>
    </tool>
  </tools>
  <graph>
    <node id="ask" type="llm"><tool_bind ref="anything"/><tool_bind ref="fmt"/></node>
    <edge source="__START__" target="ask"/>
    <edge source="ask" target="__END__"/>
  </graph>
</agent>"#;
        let analysis = analysis_with(&[("scripted", agent)], &["helpers/any.py", "fmt.py"]);
        let source = module(&analysis, "scripted");
        assert!(source.contains(
            "AnythingInput = create_model(\"AnythingInput\", __config__=ConfigDict(extra=\"allow\"))"
        ));
        assert_eq!(
            section(&source, "@tool(\"anything\"", "\n\n\n"),
            r#"@tool("anything", args_schema=AnythingInput)
def anything(**kwargs) -> dict:
    """Run the anything tool."""
    module = importlib.import_module("tools.helpers.any")
    return module.run(**kwargs)"#
        );
        assert!(source.contains("    \"\"\"Format text.\"\"\"\n    module = importlib.import_module(\"tools.fmt\")\n"));
        assert!(source.contains("        \"text\": (str, ...),\n"));
    }
}
