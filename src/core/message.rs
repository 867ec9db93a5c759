use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::call::Call;

/// Reserved chat id naming the most recent exchange.
pub const PREV_QUERY: &str = "prevQuery";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl AsRef<str> for Role {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// One part of a structured message body. Plain prompts stay text-only;
/// image parts appear when the user prompt embeds an image reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Concatenated text of the message, ignoring image parts.
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            MessageContent::Text(text) => text.is_empty(),
            MessageContent::Parts(parts) => parts.is_empty(),
        }
    }
}

impl From<String> for MessageContent {
    fn from(value: String) -> Self {
        MessageContent::Text(value)
    }
}

impl From<&str> for MessageContent {
    fn from(value: &str) -> Self {
        MessageContent::Text(value.to_string())
    }
}

/// A single conversation entry.
///
/// `extra_content` is an opaque per-vendor bag (e.g. Google's
/// `thought_signature`) that must survive save/load round-trips unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<Call>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_content: Option<Value>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<MessageContent>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
            extra_content: None,
        }
    }

    pub fn system(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// A tool-role reply answering the call with the given id.
    pub fn tool_response(call_id: impl Into<String>, content: impl Into<MessageContent>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
            extra_content: None,
        }
    }
}

/// An ordered sequence of messages with a stable id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    pub created: DateTime<Utc>,
    pub messages: Vec<Message>,
}

impl Chat {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            profile: None,
            created: Utc::now(),
            messages: Vec::new(),
        }
    }

    /// Derive a chat id from a prompt: the first five whitespace-split
    /// tokens joined by underscores. Shorter prompts keep all tokens.
    pub fn id_from_prompt(prompt: &str) -> String {
        prompt
            .split_whitespace()
            .take(5)
            .collect::<Vec<_>>()
            .join("_")
    }

    pub fn first_system_prompt(&self) -> Option<String> {
        self.messages
            .iter()
            .find(|message| message.role == Role::System)
            .map(|message| message.content.text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_derivation_takes_first_five_tokens() {
        assert_eq!(
            Chat::id_from_prompt("How's the weather today?"),
            "How's_the_weather_today?"
        );
        assert_eq!(
            Chat::id_from_prompt("one two three four five six seven"),
            "one_two_three_four_five"
        );
        assert_eq!(Chat::id_from_prompt("  spaced   out  "), "spaced_out");
        assert_eq!(Chat::id_from_prompt(""), "");
    }

    #[test]
    fn message_round_trips_with_extra_content() {
        let mut message = Message::assistant("done");
        message.extra_content = Some(serde_json::json!({
            "google": { "thought_signature": "abc123" }
        }));

        let encoded = serde_json::to_string(&message).expect("serialize");
        let decoded: Message = serde_json::from_str(&encoded).expect("deserialize");
        assert_eq!(decoded, message);
    }

    #[test]
    fn multipart_content_round_trips() {
        let message = Message::user(MessageContent::Parts(vec![
            ContentPart::Text {
                text: "what is this?".to_string(),
            },
            ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: "data:image/png;base64,aWNvbg==".to_string(),
                },
            },
        ]));

        let encoded = serde_json::to_string(&message).expect("serialize");
        let decoded: Message = serde_json::from_str(&encoded).expect("deserialize");
        assert_eq!(decoded, message);
        assert_eq!(decoded.content.text(), "what is this?");
    }

    #[test]
    fn plain_fields_are_omitted_from_json() {
        let encoded = serde_json::to_string(&Message::user("hi")).expect("serialize");
        assert_eq!(encoded, r#"{"role":"user","content":"hi"}"#);
    }
}
