use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_MODEL: &str = "gpt-4o";

pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are an assistant for a CLI tool. Answer concisely and prefer plain text.";

pub const DEFAULT_CMD_MODE_PROMPT: &str = "You are a helper that only outputs shell commands. \
Reply with exactly one command line that accomplishes the user's request, \
with no explanation, no markdown and no quoting.";

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_cmd_mode_prompt() -> String {
    DEFAULT_CMD_MODE_PROMPT.to_string()
}

fn default_token_warn_limit() -> usize {
    17_000
}

fn default_tool_output_rune_limit() -> usize {
    10_000
}

fn default_true() -> bool {
    true
}

fn default_tools() -> Vec<String> {
    vec!["ls".to_string(), "cat".to_string()]
}

/// The persisted text configuration (`textConfig.json`).
///
/// Ephemeral state (glob pattern, initial chat, post-processed prompt) never
/// lands here; it lives on the builder input for one invocation only.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_cmd_mode_prompt")]
    pub cmd_mode_prompt: String,
    #[serde(default)]
    pub raw: bool,
    #[serde(default)]
    pub use_tools: bool,
    #[serde(default = "default_token_warn_limit")]
    pub token_warn_limit: usize,
    #[serde(default = "default_tool_output_rune_limit")]
    pub tool_output_rune_limit: usize,
    #[serde(default = "default_true")]
    pub save_reply_as_conversation: bool,
    /// Globs selecting which registered tools the model may see.
    #[serde(default)]
    pub requested_tool_globs: Vec<String>,
    /// Builtin tools to register when tools are enabled.
    #[serde(default = "default_tools")]
    pub tools: Vec<String>,
    /// Names of MCP servers (from `mcpServerConfig.json`) to start.
    #[serde(default)]
    pub mcp_servers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tool_calls: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: default_model(),
            system_prompt: default_system_prompt(),
            cmd_mode_prompt: default_cmd_mode_prompt(),
            raw: false,
            use_tools: false,
            token_warn_limit: default_token_warn_limit(),
            tool_output_rune_limit: default_tool_output_rune_limit(),
            save_reply_as_conversation: true,
            requested_tool_globs: vec!["*".to_string()],
            tools: default_tools(),
            mcp_servers: Vec::new(),
            max_tool_calls: None,
        }
    }
}

/// One entry of `mcpServerConfig.json`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct McpServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// The servers file as a whole.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct McpServersFile {
    #[serde(default)]
    pub servers: Vec<McpServerConfig>,
}

/// Per-vendor model parameters, persisted as
/// `<vendor>_<family>_<model>.json` next to `textConfig.json`.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ModelParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_yields_defaults() {
        let config: Config = serde_json::from_str("{}").expect("parse");
        assert_eq!(config.model, DEFAULT_MODEL);
        assert!(config.save_reply_as_conversation);
        assert_eq!(config.tool_output_rune_limit, 10_000);
        assert!(config.max_tool_calls.is_none());
    }

    #[test]
    fn mcp_servers_file_parses_spec_layout() {
        let file: McpServersFile = serde_json::from_str(
            r#"{"servers":[{"name":"fs","command":"mcp-fs","args":["--root","/tmp"],"env":{"A":"1"}}]}"#,
        )
        .expect("parse");
        assert_eq!(file.servers.len(), 1);
        assert_eq!(file.servers[0].name, "fs");
        assert_eq!(file.servers[0].args, vec!["--root", "/tmp"]);
    }
}
