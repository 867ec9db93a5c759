//! Named presets layered over the user configuration.
//!
//! Precedence is flag > profile > config file > built-in default. A profile
//! only overrides the fields it sets; everything else falls through.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::data::Config;
use super::io::{profiles_dir, ConfigError};

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Profile {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_tools: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_reply_as_conversation: Option<bool>,
}

impl Profile {
    /// Load `<config>/profiles/<name>.json`.
    pub fn load(root: &Path, name: &str) -> Result<Profile, ConfigError> {
        Self::load_path(&profiles_dir(root).join(format!("{}.json", name)))
    }

    /// Load a profile from an absolute path.
    pub fn load_path(path: &Path) -> Result<Profile, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Layer this profile over `config`, overriding only the set fields.
    pub fn apply(&self, config: &mut Config) {
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(system_prompt) = &self.system_prompt {
            config.system_prompt = system_prompt.clone();
        }
        if let Some(tools) = &self.tools {
            config.tools = tools.clone();
        }
        if let Some(use_tools) = self.use_tools {
            config.use_tools = use_tools;
        }
        if let Some(save) = self.save_reply_as_conversation {
            config.save_reply_as_conversation = save;
        }
    }
}

/// The hybrid system prompt used when cmd mode runs under a profile: both
/// prompts are embedded so the profile cannot talk the model out of
/// emitting a command.
pub fn hybrid_cmd_prompt(cmd_prompt: &str, profile_prompt: &str) -> String {
    format!(
        "{cmd_prompt}\n\nAdditional context from the active profile (it never \
overrides the command-only output requirement above):\n{profile_prompt}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_overrides_only_set_fields() {
        let mut config = Config::default();
        let original_prompt = config.system_prompt.clone();
        let profile = Profile {
            name: "coder".to_string(),
            model: Some("mistral-large".to_string()),
            use_tools: Some(true),
            ..Profile::default()
        };
        profile.apply(&mut config);
        assert_eq!(config.model, "mistral-large");
        assert!(config.use_tools);
        assert_eq!(config.system_prompt, original_prompt);
    }

    #[test]
    fn profiles_load_by_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let profiles = profiles_dir(dir.path());
        std::fs::create_dir_all(&profiles).expect("mkdir");
        std::fs::write(
            profiles.join("coder.json"),
            r#"{"name":"coder","model":"gpt-4o","use_tools":true}"#,
        )
        .expect("write");

        let profile = Profile::load(dir.path(), "coder").expect("load");
        assert_eq!(profile.model.as_deref(), Some("gpt-4o"));
    }

    #[test]
    fn hybrid_prompt_keeps_cmd_prompt_first() {
        let hybrid = hybrid_cmd_prompt("ONLY COMMANDS", "be friendly");
        assert!(hybrid.starts_with("ONLY COMMANDS"));
        assert!(hybrid.contains("be friendly"));
    }
}
