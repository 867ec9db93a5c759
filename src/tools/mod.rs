//! Tool registry and invoker.
//!
//! Tools are named callables with a JSON-schema-like specification. The
//! registry keeps registration order stable, dispatches [`Call`]s, and never
//! panics: failures come back as diagnostic strings the model can read.

pub mod builtin;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::{ChatToolDefinition, ChatToolFunction};
use crate::core::call::Call;

/// Substituted for empty tool output; some models reject empty tool replies.
pub const EMPTY_RESPONSE: &str = "<EMPTY-RESPONSE>";

/// One named parameter of a tool's input schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolParam {
    pub name: String,
    pub kind: String,
    pub description: String,
    pub required: bool,
}

impl ToolParam {
    pub fn string(name: &str, description: &str, required: bool) -> Self {
        Self {
            name: name.to_string(),
            kind: "string".to_string(),
            description: description.to_string(),
            required,
        }
    }
}

/// Specification the vendor adapter advertises to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub params: Vec<ToolParam>,
    /// Free-form description of what the tool returns.
    pub output: String,
    /// Raw JSON schema for tools whose schema arrives prebuilt (MCP).
    pub raw_schema: Option<Value>,
}

impl ToolSpec {
    pub fn new(name: &str, description: &str, params: Vec<ToolParam>, output: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            params,
            output: output.to_string(),
            raw_schema: None,
        }
    }

    /// The JSON-schema subset sent over the wire.
    pub fn input_schema(&self) -> Value {
        if let Some(schema) = &self.raw_schema {
            return schema.clone();
        }
        let mut properties = Map::new();
        let mut required = Vec::new();
        for param in &self.params {
            properties.insert(
                param.name.clone(),
                json!({ "type": param.kind, "description": param.description }),
            );
            if param.required {
                required.push(Value::String(param.name.clone()));
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    pub fn to_definition(&self) -> ChatToolDefinition {
        ChatToolDefinition {
            kind: "function".to_string(),
            function: ChatToolFunction {
                name: self.name.clone(),
                description: Some(self.description.clone()),
                parameters: self.input_schema(),
            },
        }
    }
}

/// Everything a tool receives for one invocation.
///
/// `cancel` is the token of the generation this call belongs to. Cancelling
/// it terminates only that branch of the conversation; parents keep running.
/// This is a public contract of the querier.
pub struct ToolInvocation {
    pub args: Map<String, Value>,
    pub cancel: CancellationToken,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;

    /// Run the tool. Errors become `ERROR: <cause>` strings for the model.
    async fn invoke(&self, invocation: ToolInvocation) -> Result<String, String>;
}

/// Named tool collection with stable registration order.
#[derive(Default)]
pub struct ToolRegistry {
    order: Vec<String>,
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent by name; last write wins but keeps the original slot.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.spec().name;
        if !self.tools.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.tools.insert(name, tool);
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Specifications in registration order.
    pub fn specifications(&self) -> Vec<ToolSpec> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.spec())
            .collect()
    }

    /// Drop every tool whose name does not match the glob set.
    pub fn retain_globs(&mut self, globs: &[String]) {
        let keep = filter_by_globs(&self.order, globs);
        self.order.retain(|name| keep.contains(name));
        self.tools.retain(|name, _| keep.contains(name));
    }

    /// Dispatch a call. Returns UTF-8 output, a diagnostic string starting
    /// with `ERROR:`, or `<EMPTY-RESPONSE>` for empty output. Never panics.
    pub async fn invoke(&self, call: &Call, cancel: CancellationToken) -> String {
        let Some(tool) = self.tools.get(&call.name) else {
            return format!("ERROR: unknown tool: {}", call.name);
        };
        let args = match call.args() {
            Ok(args) => args,
            Err(err) => return format!("ERROR: invalid tool arguments: {}", err),
        };
        debug!(tool = %call.name, call_id = %call.id, "Invoking tool");
        let output = match tool.invoke(ToolInvocation { args, cancel }).await {
            Ok(output) => output,
            Err(cause) => return format!("ERROR: {}", cause),
        };
        if output.is_empty() {
            EMPTY_RESPONSE.to_string()
        } else {
            output
        }
    }
}

/// Match tool names against a set of shell-style globs.
///
/// `"*"` matches everything. Names carrying the `mcp_` prefix also match
/// patterns written for the unprefixed tool name, so `-t weather` selects
/// `mcp_forecast_weather` as well.
pub fn filter_by_globs(names: &[String], globs: &[String]) -> Vec<String> {
    let patterns: Vec<glob::Pattern> = globs
        .iter()
        .filter_map(|g| glob::Pattern::new(g).ok())
        .collect();

    names
        .iter()
        .filter(|name| {
            patterns.iter().any(|pattern| {
                if pattern.matches(name) {
                    return true;
                }
                match name.strip_prefix("mcp_") {
                    Some(stripped) => {
                        // Also try with the server segment removed.
                        pattern.matches(stripped)
                            || stripped
                                .split_once('_')
                                .is_some_and(|(_, tool)| pattern.matches(tool))
                    }
                    None => false,
                }
            })
        })
        .cloned()
        .collect()
}

/// Trim `output` to at most `limit` unicode scalars, appending a truncation
/// notice with the number of elided characters.
pub fn limit_tool_output(output: &str, limit: usize) -> String {
    let total = output.chars().count();
    if total <= limit {
        return output.to_string();
    }
    let kept: String = output.chars().take(limit).collect();
    format!("{}\n[truncated: {} characters elided]", kept, total - limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool {
        reply: &'static str,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec::new("echo", "echoes", vec![], "the input")
        }

        async fn invoke(&self, _invocation: ToolInvocation) -> Result<String, String> {
            Ok(self.reply.to_string())
        }
    }

    struct FailTool;

    #[async_trait]
    impl Tool for FailTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec::new("fail", "always fails", vec![], "nothing")
        }

        async fn invoke(&self, _invocation: ToolInvocation) -> Result<String, String> {
            Err("boom".to_string())
        }
    }

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn registration_order_is_stable_and_last_write_wins() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool { reply: "one" }));
        registry.register(Arc::new(FailTool));
        registry.register(Arc::new(EchoTool { reply: "two" }));

        let specs = registry.specifications();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].name, "echo");
        assert_eq!(specs[1].name, "fail");
    }

    #[tokio::test]
    async fn invoke_reports_errors_as_diagnostics() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FailTool));
        let mut call = Call::new("c1", "fail", "{}");
        call.patch();
        let output = registry.invoke(&call, CancellationToken::new()).await;
        assert_eq!(output, "ERROR: boom");
    }

    #[tokio::test]
    async fn invoke_substitutes_empty_output() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool { reply: "" }));
        let mut call = Call::new("c1", "echo", "{}");
        call.patch();
        let output = registry.invoke(&call, CancellationToken::new()).await;
        assert_eq!(output, EMPTY_RESPONSE);
    }

    #[tokio::test]
    async fn invoke_rejects_unknown_tools() {
        let registry = ToolRegistry::new();
        let call = Call::new("c1", "nope", "{}");
        let output = registry.invoke(&call, CancellationToken::new()).await;
        assert!(output.starts_with("ERROR: unknown tool"));
    }

    #[test]
    fn star_glob_matches_everything() {
        let all = names(&["ls", "cat", "mcp_srv_weather"]);
        assert_eq!(filter_by_globs(&all, &names(&["*"])), all);
    }

    #[test]
    fn globs_select_by_pattern() {
        let all = names(&["ls", "cat", "curl"]);
        assert_eq!(filter_by_globs(&all, &names(&["c*"])), names(&["cat", "curl"]));
    }

    #[test]
    fn mcp_names_match_unprefixed_patterns() {
        let all = names(&["mcp_srv_weather", "ls"]);
        assert_eq!(
            filter_by_globs(&all, &names(&["weather"])),
            names(&["mcp_srv_weather"])
        );
        assert_eq!(
            filter_by_globs(&all, &names(&["mcp_*"])),
            names(&["mcp_srv_weather"])
        );
    }

    #[test]
    fn limit_tool_output_keeps_short_strings() {
        assert_eq!(limit_tool_output("short", 10), "short");
    }

    #[test]
    fn limit_tool_output_truncates_by_scalar() {
        let input = "aéb💧cd";
        let out = limit_tool_output(input, 3);
        assert!(out.starts_with("aéb"));
        assert!(!out.starts_with("aéb💧"));
        assert!(out.contains("3 characters elided"));
    }

    #[test]
    fn spec_schema_lists_required_params() {
        let spec = ToolSpec::new(
            "cat",
            "read a file",
            vec![ToolParam::string("path", "file path", true)],
            "file contents",
        );
        let schema = spec.input_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["path"]["type"], "string");
        assert_eq!(schema["required"][0], "path");
    }
}
