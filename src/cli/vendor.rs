//! Model-name based vendor routing.
//!
//! Every supported vendor speaks the OpenAI chat-completion protocol, so
//! routing picks a base URL and API-key variable rather than a different
//! adapter. Unrecognized model names go to a local Ollama endpoint.

use std::path::Path;

use crate::core::chat_stream::{OpenAiCompleter, OPENAI_BASE_URL};
use crate::core::config::data::ModelParams;
use crate::core::config::io::ConfigError;

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";
pub const MISTRAL_BASE_URL: &str = "https://api.mistral.ai/v1";
pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
pub const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vendor {
    pub name: &'static str,
    pub base_url: &'static str,
    pub api_key_env: &'static str,
}

/// Route a model name to its vendor.
pub fn for_model(model: &str) -> Vendor {
    let lowered = model.to_ascii_lowercase();
    if lowered.starts_with("gpt")
        || lowered.starts_with("chatgpt")
        || lowered.starts_with("o1")
        || lowered.starts_with("o3")
        || lowered.starts_with("o4")
    {
        Vendor {
            name: "openai",
            base_url: OPENAI_BASE_URL,
            api_key_env: "OPENAI_API_KEY",
        }
    } else if lowered.starts_with("gemini") {
        Vendor {
            name: "gemini",
            base_url: GEMINI_BASE_URL,
            api_key_env: "GEMINI_API_KEY",
        }
    } else if lowered.starts_with("mistral")
        || lowered.starts_with("ministral")
        || lowered.starts_with("codestral")
    {
        Vendor {
            name: "mistral",
            base_url: MISTRAL_BASE_URL,
            api_key_env: "MISTRAL_API_KEY",
        }
    } else if lowered.starts_with("claude") {
        Vendor {
            name: "anthropic",
            base_url: ANTHROPIC_BASE_URL,
            api_key_env: "ANTHROPIC_API_KEY",
        }
    } else {
        Vendor {
            name: "ollama",
            base_url: OLLAMA_BASE_URL,
            api_key_env: "OLLAMA_API_KEY",
        }
    }
}

/// Build the adapter for `model`, layering any persisted per-model params
/// (`<vendor>_<family>_<model>.json`) on top.
pub fn completer_for(root: &Path, model: &str) -> Result<OpenAiCompleter, ConfigError> {
    let vendor = for_model(model);
    let mut completer = OpenAiCompleter::new(model, vendor.base_url, vendor.api_key_env);
    let params = ModelParams::load(root, vendor.name, model)?;
    completer.temperature = params.temperature;
    completer.top_p = params.top_p;
    completer.frequency_penalty = params.frequency_penalty;
    completer.presence_penalty = params.presence_penalty;
    completer.max_tokens = params.max_tokens;
    completer.tool_choice = params.tool_choice;
    completer.response_format = params.response_format;
    Ok(completer)
}
