//! Unattended agent façade: a fixed prompt run with tools enabled, once or
//! on a ticker.

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::cli::session::{Session, SessionError};
use crate::core::config::data::Config;
use crate::core::config::io::{config_root, ConfigError};
use crate::core::message::{Chat, Message};
use crate::core::querier::QuerierError;

#[derive(Debug)]
pub enum AgentError {
    Config(ConfigError),
    Session(SessionError),
    Query(QuerierError),
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::Config(err) => write!(f, "{}", err),
            AgentError::Session(err) => write!(f, "{}", err),
            AgentError::Query(err) => write!(f, "{}", err),
        }
    }
}

impl StdError for AgentError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            AgentError::Config(err) => Some(err),
            AgentError::Session(err) => Some(err),
            AgentError::Query(err) => Some(err),
        }
    }
}

impl From<ConfigError> for AgentError {
    fn from(err: ConfigError) -> Self {
        AgentError::Config(err)
    }
}

impl From<SessionError> for AgentError {
    fn from(err: SessionError) -> Self {
        AgentError::Session(err)
    }
}

impl From<QuerierError> for AgentError {
    fn from(err: QuerierError) -> Self {
        AgentError::Query(err)
    }
}

/// A pre-configured prompt runner. Tools are always on; the tool selection,
/// MCP servers and call budget come from the agent rather than the user's
/// interactive settings.
pub struct Agent {
    pub prompt: String,
    pub model: Option<String>,
    pub tool_globs: Vec<String>,
    pub mcp_servers: Vec<String>,
    pub max_tool_calls: Option<u32>,
}

impl Agent {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: None,
            tool_globs: Vec::new(),
            mcp_servers: Vec::new(),
            max_tool_calls: None,
        }
    }

    fn initial_chat(&self) -> Chat {
        let mut chat = Chat::new(Chat::id_from_prompt(&self.prompt));
        chat.messages.push(Message::user(self.prompt.clone()));
        chat
    }

    /// Build a session with the agent's tool surface applied over the user
    /// configuration.
    pub async fn setup(&self) -> Result<Session, AgentError> {
        let root = config_root()?;
        let mut config = Config::load(&root)?;
        config.use_tools = true;
        config.raw = true;
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if !self.tool_globs.is_empty() {
            config.requested_tool_globs = self.tool_globs.clone();
        }
        config.mcp_servers = self.mcp_servers.clone();
        if self.max_tool_calls.is_some() {
            config.max_tool_calls = self.max_tool_calls;
        }
        Ok(Session::assemble(&root, &config, false, false).await?)
    }

    /// Run the prompt once and return the finished chat.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<Chat, AgentError> {
        let mut session = self.setup().await?;
        let chat = session.querier.text_query(cancel, self.initial_chat()).await?;
        Ok(chat)
    }

    /// Re-run the prompt on a fixed interval until `cancel` fires. A failed
    /// run is logged and does not stop the ticker; each run gets a child
    /// token so cancelling the parent stops the in-flight run too.
    pub async fn start(&self, cancel: &CancellationToken, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    let run_token = cancel.child_token();
                    if let Err(err) = self.run(&run_token).await {
                        warn!(error = %err, "Agent run failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::Role;

    #[test]
    fn initial_chat_is_a_single_user_message() {
        let agent = Agent::new("check the weather in Oslo");
        let chat = agent.initial_chat();
        assert_eq!(chat.id, "check_the_weather_in_Oslo");
        assert_eq!(chat.messages.len(), 1);
        assert_eq!(chat.messages[0].role, Role::User);
    }

    #[tokio::test]
    async fn start_returns_on_cancel() {
        let agent = Agent::new("noop");
        let cancel = CancellationToken::new();
        cancel.cancel();
        // Already-cancelled parent: the loop exits before the first run.
        agent.start(&cancel, Duration::from_secs(3600)).await;
    }
}
