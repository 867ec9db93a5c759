use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A model-issued request to execute a named local function.
///
/// `arguments` holds the raw JSON object text exactly as reconstituted from
/// the vendor stream; [`Call::args`] parses it on demand. `extra_content` is
/// an opaque vendor bag carried through unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub id: String,
    pub name: String,
    pub arguments: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_content: Option<Value>,
}

impl Call {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
            extra_content: None,
        }
    }

    /// Normalize vendor quirks: empty argument strings become `{}` and a
    /// missing id gets a synthesized stable one derived from name+arguments.
    pub fn patch(&mut self) {
        if self.arguments.trim().is_empty() {
            self.arguments = "{}".to_string();
        }
        if self.id.is_empty() {
            let mut hasher = crc32fast::Hasher::new();
            hasher.update(self.name.as_bytes());
            hasher.update(self.arguments.as_bytes());
            self.id = format!("call_{}_{:08x}", self.name, hasher.finalize());
        }
    }

    /// Parse the argument object. Call [`Call::patch`] first so empty
    /// argument strings do not fail here.
    pub fn args(&self) -> Result<Map<String, Value>, serde_json::Error> {
        serde_json::from_str(&self.arguments)
    }

    /// Human-readable form used when announcing the call in the transcript.
    pub fn render(&self) -> String {
        let arguments = serde_json::from_str::<Value>(&self.arguments)
            .ok()
            .and_then(|value| serde_json::to_string_pretty(&value).ok())
            .unwrap_or_else(|| self.arguments.clone());
        format!("Tool call: {}({})", self.name, arguments)
    }

    /// Whether the vendor attached Google's `thought_signature` marker.
    pub fn has_thought_signature(&self) -> bool {
        self.extra_content
            .as_ref()
            .and_then(|extra| extra.pointer("/google/thought_signature"))
            .is_some()
    }
}
