//! The vendor-polymorphic streaming completion contract.
//!
//! A vendor adapter turns a [`Chat`] into an ordered stream of
//! [`CompletionEvent`]s. The querier is generic over anything implementing
//! [`StreamCompleter`]; tool specifications are forwarded only when the
//! adapter also implements [`ToolBox`].

use std::error::Error as StdError;
use std::fmt;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::call::Call;
use crate::core::message::Chat;
use crate::tools::ToolSpec;

/// A unit yielded by the vendor stream.
#[derive(Debug, Clone)]
pub enum CompletionEvent {
    /// One content token.
    TextDelta(String),
    /// A fully reconstituted tool invocation request.
    ToolCall(Call),
    /// An unrecognized but non-fatal stream event.
    Noop,
    /// A protocol or transport failure; the channel closes after this.
    Error(CompletionError),
    /// Normal end of stream (`[DONE]` sentinel or equivalent).
    End,
}

/// Rate-limit details surfaced by a vendor 429 response.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimit {
    pub reset_at: Option<DateTime<Utc>>,
    pub max_input_tokens: Option<u64>,
    pub tokens_remaining: Option<u64>,
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rate limited")?;
        if let Some(reset_at) = self.reset_at {
            write!(f, ", resets at {}", reset_at.to_rfc3339())?;
        }
        if let Some(remaining) = self.tokens_remaining {
            write!(f, ", {} tokens remaining", remaining)?;
        }
        if let Some(max) = self.max_input_tokens {
            write!(f, ", input limit {} tokens", max)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompletionError {
    /// The vendor refused the request with a rate-limit status.
    RateLimit(RateLimit),
    /// Network or HTTP failure, including non-2xx statuses.
    Transport(String),
    /// Malformed stream event that could not be skipped.
    Protocol(String),
    /// The request context was cancelled or the connection reached EOF
    /// mid-read. Treated as clean termination by the querier.
    Cancelled,
}

impl CompletionError {
    /// Cancellation and EOF terminate the turn without being failures.
    pub fn is_clean_exit(&self) -> bool {
        matches!(self, CompletionError::Cancelled)
    }
}

impl fmt::Display for CompletionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionError::RateLimit(limit) => write!(f, "{}", limit),
            CompletionError::Transport(cause) => write!(f, "transport error: {}", cause),
            CompletionError::Protocol(cause) => write!(f, "protocol error: {}", cause),
            CompletionError::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl StdError for CompletionError {}

/// Errors raised while preparing an adapter, before any stream starts.
#[derive(Debug)]
pub enum CompleterError {
    /// The API key environment variable is unset or empty.
    MissingApiKey { env_var: String },
}

impl fmt::Display for CompleterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompleterError::MissingApiKey { env_var } => {
                write!(f, "environment variable {} is not set", env_var)
            }
        }
    }
}

impl StdError for CompleterError {}

/// Contract every vendor adapter implements.
///
/// `stream_completions` must deliver events in emission order, emit an
/// `Error` before closing on failure, and exit promptly when `cancel` fires.
/// The channel is bounded at one entry so a slow consumer throttles the
/// HTTP reader.
pub trait StreamCompleter {
    /// Read the API key from the environment and prepare the HTTP client.
    fn setup(&mut self) -> Result<(), CompleterError>;

    /// Start streaming a completion for `chat`.
    fn stream_completions(
        &self,
        chat: &Chat,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<CompletionEvent>;
}

/// Optional capability: adapters that can forward tool specifications.
pub trait ToolBox {
    fn register_tool(&mut self, spec: ToolSpec);
}
