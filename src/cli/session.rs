//! Assembly of one query session: adapter, tool registry, MCP subprocesses
//! and the querier driving them.

use std::error::Error as StdError;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::core::chat_stream::OpenAiCompleter;
use crate::core::completer::{CompleterError, StreamCompleter, ToolBox};
use crate::core::config::data::{Config, McpServersFile};
use crate::core::config::io::{conversations_dir, ConfigError};
use crate::core::querier::{Querier, QuerierOptions};
use crate::mcp::{connect_servers, StdioClient};
use crate::tools::builtin::register_builtins;
use crate::tools::ToolRegistry;
use crate::cli::vendor;

#[derive(Debug)]
pub enum SessionError {
    Config(ConfigError),
    Completer(CompleterError),
    Mcp(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Config(err) => write!(f, "{}", err),
            SessionError::Completer(err) => write!(f, "{}", err),
            SessionError::Mcp(cause) => write!(f, "MCP setup failed: {}", cause),
        }
    }
}

impl StdError for SessionError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            SessionError::Config(err) => Some(err),
            SessionError::Completer(err) => Some(err),
            SessionError::Mcp(_) => None,
        }
    }
}

impl From<ConfigError> for SessionError {
    fn from(err: ConfigError) -> Self {
        SessionError::Config(err)
    }
}

impl From<CompleterError> for SessionError {
    fn from(err: CompleterError) -> Self {
        SessionError::Completer(err)
    }
}

/// A ready-to-query session. The MCP handles keep their subprocesses alive
/// for as long as the session exists.
pub struct Session {
    pub querier: Querier<OpenAiCompleter>,
    _mcp_clients: Vec<Arc<StdioClient>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

impl Session {
    /// Build the adapter and registry the layered `config` describes.
    ///
    /// Tools are registered only when `use_tools` is set and the session is
    /// not in cmd mode; the registry is then narrowed by the configured
    /// glob set and advertised to the adapter.
    pub async fn assemble(
        root: &Path,
        config: &Config,
        cmd_mode: bool,
        debug_mode: bool,
    ) -> Result<Session, SessionError> {
        let mut completer = vendor::completer_for(root, &config.model)?;
        completer.setup()?;

        let mut registry = ToolRegistry::new();
        let mut mcp_clients = Vec::new();
        if config.use_tools && !cmd_mode {
            register_builtins(&mut registry, &config.tools);
            if !config.mcp_servers.is_empty() {
                let servers_file = McpServersFile::load(root)?;
                let enabled: Vec<_> = servers_file
                    .servers
                    .into_iter()
                    .filter(|server| config.mcp_servers.contains(&server.name))
                    .collect();
                mcp_clients = connect_servers(&mut registry, &enabled)
                    .await
                    .map_err(SessionError::Mcp)?;
            }
            registry.retain_globs(&config.requested_tool_globs);
            for spec in registry.specifications() {
                completer.register_tool(spec);
            }
            debug!(tools = ?registry.names(), "Session tool set");
        }

        let options = QuerierOptions {
            raw: config.raw || cmd_mode,
            cmd_mode,
            debug: debug_mode,
            should_save_reply: config.save_reply_as_conversation,
            token_warn_limit: config.token_warn_limit,
            tool_output_rune_limit: config.tool_output_rune_limit,
            max_tool_calls: config.max_tool_calls,
            conversations_dir: conversations_dir(root),
        };
        Ok(Session {
            querier: Querier::new(completer, registry, options),
            _mcp_clients: mcp_clients,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn assemble_requires_an_api_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::env::remove_var("OPENAI_API_KEY");
        let config = Config::default();
        let err = Session::assemble(dir.path(), &config, false, false)
            .await
            .expect_err("missing key");
        assert!(matches!(err, SessionError::Completer(_)));
    }

    #[tokio::test]
    async fn assemble_with_key_builds_a_session() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::env::set_var("MISTRAL_API_KEY", "test-key");
        let mut config = Config::default();
        config.model = "mistral-large".to_string();
        config.use_tools = true;
        let session = Session::assemble(dir.path(), &config, false, false)
            .await
            .expect("session");
        assert!(session.querier.chat().messages.is_empty());
    }

    #[tokio::test]
    async fn cmd_mode_suppresses_tools() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::env::set_var("MISTRAL_API_KEY", "test-key");
        let mut config = Config::default();
        config.model = "mistral-large".to_string();
        config.use_tools = true;
        // Assembles without touching the tool list or MCP servers.
        config.mcp_servers = vec!["would-fail-to-spawn".to_string()];
        Session::assemble(dir.path(), &config, true, false)
            .await
            .expect("session");
    }
}
