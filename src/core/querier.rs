//! The text querier: owns the live chat, drives vendor streams, interprets
//! tool calls and persists finished exchanges.
//!
//! Tool-call resumption is an explicit loop rather than recursion: after a
//! tool reply is appended the next stream starts from the updated chat, so
//! `max_tool_calls` is a plain counter check and stack depth stays flat.

use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::call::Call;
use crate::core::completer::{CompletionError, CompletionEvent, StreamCompleter};
use crate::core::conversation;
use crate::core::message::{Chat, Message};
use crate::tools::{limit_tool_output, ToolRegistry};
use crate::ui::renderer::Renderer;
use crate::utils::home::expand_tilde;

pub const TOOLS_DISALLOWED_MSG: &str = "tools disallowed in cmd mode";
const NO_MORE_TOOL_CALLS: &str = "ERROR: No more tool calls allowed";

#[derive(Debug)]
pub enum QuerierError {
    Completion(CompletionError),
    Render(std::io::Error),
    ToolsDisallowed,
}

impl fmt::Display for QuerierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuerierError::Completion(err) => write!(f, "completion failed: {}", err),
            QuerierError::Render(err) => write!(f, "render failure: {}", err),
            QuerierError::ToolsDisallowed => write!(f, "{}", TOOLS_DISALLOWED_MSG),
        }
    }
}

impl StdError for QuerierError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            QuerierError::Completion(err) => Some(err),
            QuerierError::Render(err) => Some(err),
            QuerierError::ToolsDisallowed => None,
        }
    }
}

impl From<CompletionError> for QuerierError {
    fn from(err: CompletionError) -> Self {
        QuerierError::Completion(err)
    }
}

impl From<std::io::Error> for QuerierError {
    fn from(err: std::io::Error) -> Self {
        QuerierError::Render(err)
    }
}

/// Construction-time knobs for [`Querier`].
pub struct QuerierOptions {
    pub raw: bool,
    pub cmd_mode: bool,
    pub debug: bool,
    pub should_save_reply: bool,
    pub token_warn_limit: usize,
    pub tool_output_rune_limit: usize,
    pub max_tool_calls: Option<u32>,
    pub conversations_dir: PathBuf,
}

enum ToolFlow {
    /// Tool reply appended; start the next stream.
    Continue,
    /// The model signalled completion; finalize without another stream.
    Stop,
}

pub struct Querier<C: StreamCompleter> {
    completer: C,
    registry: ToolRegistry,
    renderer: Renderer,
    chat: Chat,
    full_msg: String,
    am_tool_calls: u32,
    is_likely_gemini3_preview: bool,
    raw: bool,
    cmd_mode: bool,
    debug: bool,
    should_save_reply: bool,
    token_warn_limit: usize,
    tool_output_rune_limit: usize,
    max_tool_calls: Option<u32>,
    conversations_dir: PathBuf,
}

impl<C: StreamCompleter> Querier<C> {
    pub fn new(completer: C, registry: ToolRegistry, options: QuerierOptions) -> Self {
        let renderer = Renderer::new(options.raw);
        Self::with_renderer(completer, registry, renderer, options)
    }

    pub fn with_renderer(
        completer: C,
        registry: ToolRegistry,
        renderer: Renderer,
        options: QuerierOptions,
    ) -> Self {
        Self {
            completer,
            registry,
            renderer,
            chat: Chat::new(""),
            full_msg: String::new(),
            am_tool_calls: 0,
            is_likely_gemini3_preview: false,
            raw: options.raw,
            cmd_mode: options.cmd_mode,
            debug: options.debug,
            should_save_reply: options.should_save_reply,
            token_warn_limit: options.token_warn_limit,
            tool_output_rune_limit: options.tool_output_rune_limit,
            max_tool_calls: options.max_tool_calls,
            conversations_dir: options.conversations_dir,
        }
    }

    pub fn chat(&self) -> &Chat {
        &self.chat
    }

    pub fn completer_mut(&mut self) -> &mut C {
        &mut self.completer
    }

    /// Last accumulated assistant text; used by cmd mode to execute it.
    pub fn last_reply(&self) -> &str {
        &self.full_msg
    }

    /// Replace the chat, drive a full assistant turn and return the updated
    /// conversation with the accumulated assistant message appended.
    pub async fn text_query(
        &mut self,
        cancel: &CancellationToken,
        chat: Chat,
    ) -> Result<Chat, QuerierError> {
        self.chat = chat;
        self.am_tool_calls = 0;
        self.query(cancel).await?;
        Ok(self.chat.clone())
    }

    /// Drive a single assistant turn off the current chat, following tool
    /// calls until the stream closes without one.
    pub async fn query(&mut self, cancel: &CancellationToken) -> Result<(), QuerierError> {
        self.warn_on_large_prompt();
        self.full_msg.clear();
        self.renderer.reset();

        // Each tool call re-derives this token, so a tool cancels only the
        // generation it spawned.
        let mut generation = cancel.child_token();

        'turns: loop {
            let mut rx = self
                .completer
                .stream_completions(&self.chat, generation.clone());
            let mut pending_call: Option<Call> = None;

            loop {
                let event = tokio::select! {
                    event = rx.recv() => event,
                    _ = generation.cancelled() => Some(CompletionEvent::Error(CompletionError::Cancelled)),
                };
                let Some(event) = event else {
                    break; // channel closed: end of stream
                };
                match event {
                    CompletionEvent::TextDelta(token) => {
                        self.full_msg.push_str(&token);
                        self.renderer.push_token(&token)?;
                    }
                    CompletionEvent::Noop => {}
                    CompletionEvent::End => break,
                    CompletionEvent::ToolCall(call) => {
                        pending_call = Some(call);
                        break;
                    }
                    CompletionEvent::Error(err) if err.is_clean_exit() => {
                        debug!("Stream ended by cancellation");
                        break;
                    }
                    CompletionEvent::Error(err) => return Err(err.into()),
                }
            }

            match pending_call {
                None => break 'turns,
                Some(call) => match self.handle_tool_call(call, &mut generation).await? {
                    ToolFlow::Continue => continue 'turns,
                    ToolFlow::Stop => break 'turns,
                },
            }
        }

        self.finish_turn()
    }

    async fn handle_tool_call(
        &mut self,
        mut call: Call,
        generation: &mut CancellationToken,
    ) -> Result<ToolFlow, QuerierError> {
        if self.cmd_mode {
            return Err(QuerierError::ToolsDisallowed);
        }

        // Gemini-3 preview revisions emit a final tool call without
        // extra_content to mean "I'm done"; executing it would loop.
        if call.has_thought_signature() {
            self.is_likely_gemini3_preview = true;
        }
        if self.is_likely_gemini3_preview && call.extra_content.is_none() {
            debug!(call = %call.name, "Swallowing end-of-conversation tool call");
            return Ok(ToolFlow::Stop);
        }

        self.full_msg.clear();
        self.renderer.reset();

        call.patch();
        let mut announcement = Message::assistant(call.render());
        announcement.tool_calls = Some(vec![call.clone()]);
        self.chat.messages.push(announcement);
        if !self.debug {
            self.renderer.announce_tool_call(&call)?;
        }

        let output = self.budgeted_invoke(&call, generation).await;
        let output = limit_tool_output(&output, self.tool_output_rune_limit);

        self.chat
            .messages
            .push(Message::tool_response(call.id.clone(), output.clone()));
        if !self.debug {
            self.renderer.show_tool_output(&output)?;
        }

        Ok(ToolFlow::Continue)
    }

    /// Run the call under the per-turn budget; on refusal the output is a
    /// diagnostic and the tool never runs.
    async fn budgeted_invoke(&mut self, call: &Call, generation: &mut CancellationToken) -> String {
        if let Some(max) = self.max_tool_calls {
            if self.am_tool_calls >= max {
                if self.am_tool_calls == max {
                    self.am_tool_calls += 1;
                }
                return NO_MORE_TOOL_CALLS.to_string();
            }
            self.am_tool_calls += 1;
            let remaining = max - self.am_tool_calls;
            let branch = generation.child_token();
            let output = self.registry.invoke(call, branch.clone()).await;
            *generation = branch;
            return format!("[ Tool calls remaining: {} ] {}", remaining, output);
        }

        self.am_tool_calls += 1;
        let branch = generation.child_token();
        let output = self.registry.invoke(call, branch.clone()).await;
        *generation = branch;
        output
    }

    fn finish_turn(&mut self) -> Result<(), QuerierError> {
        self.renderer.finish(&self.full_msg)?;
        self.chat
            .messages
            .push(Message::assistant(self.full_msg.clone()));

        if self.should_save_reply {
            // Persistence failures never unwind in-memory state.
            if let Err(err) = conversation::save(&self.conversations_dir, &self.chat) {
                warn!(error = %err, "Failed to persist conversation");
            }
        }
        Ok(())
    }

    fn warn_on_large_prompt(&self) {
        let chars: usize = self
            .chat
            .messages
            .iter()
            .map(|message| message.content.text().chars().count())
            .sum();
        let estimate = chars / 4;
        if estimate > self.token_warn_limit {
            eprintln!(
                "warning: prompt is roughly {} tokens, above the configured limit of {}",
                estimate, self.token_warn_limit
            );
        }
    }
}

/// Split a model-emitted command line into argv tokens: whitespace-split,
/// quote characters stripped, `~` expanded.
pub fn prepare_command_tokens(command_line: &str) -> Vec<String> {
    command_line
        .split_whitespace()
        .map(|token| token.trim_matches(|ch| ch == '"' || ch == '\''))
        .filter(|token| !token.is_empty())
        .map(expand_tilde)
        .collect()
}

/// Execute a cmd-mode command with inherited stdout/stderr.
pub async fn run_shell_command(command_line: &str) -> Result<(), String> {
    let tokens = prepare_command_tokens(command_line);
    let Some((program, args)) = tokens.split_first() else {
        return Err("model produced an empty command".to_string());
    };
    let status = tokio::process::Command::new(program)
        .args(args)
        .status()
        .await
        .map_err(|err| format!("failed to spawn {}: {}", program, err))?;
    if !status.success() {
        return Err(format!("command exited with {}", status));
    }
    Ok(())
}
