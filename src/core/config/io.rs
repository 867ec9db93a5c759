//! Configuration file IO under `<user-config>/clai/`.

use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use tempfile::NamedTempFile;

use super::data::{Config, McpServersFile, ModelParams};

#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    NoConfigDir,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config at {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config at {}: {}", path.display(), source)
            }
            ConfigError::Write { path, source } => {
                write!(f, "failed to write config at {}: {}", path.display(), source)
            }
            ConfigError::NoConfigDir => {
                write!(f, "could not determine a user configuration directory")
            }
        }
    }
}

impl StdError for ConfigError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ConfigError::Read { source, .. } | ConfigError::Write { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::NoConfigDir => None,
        }
    }
}

/// The configuration root: `CLAI_CONFIG_DIR` when set, otherwise the
/// platform config directory for `clai`.
pub fn config_root() -> Result<PathBuf, ConfigError> {
    if let Some(dir) = std::env::var_os("CLAI_CONFIG_DIR") {
        return Ok(PathBuf::from(dir));
    }
    ProjectDirs::from("", "", "clai")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .ok_or(ConfigError::NoConfigDir)
}

pub fn conversations_dir(root: &Path) -> PathBuf {
    root.join("conversations")
}

pub fn profiles_dir(root: &Path) -> PathBuf {
    root.join("profiles")
}

pub fn text_config_path(root: &Path) -> PathBuf {
    root.join("textConfig.json")
}

pub fn mcp_servers_path(root: &Path) -> PathBuf {
    root.join("mcpServerConfig.json")
}

/// `<vendor>_<family>_<model>.json`; the family is the first dash-separated
/// segment of the model name (`gpt` for `gpt-4o`).
pub fn model_params_path(root: &Path, vendor: &str, model: &str) -> PathBuf {
    let family = model.split('-').next().unwrap_or(model);
    root.join(format!("{}_{}_{}.json", vendor, family, model))
}

fn load_json<T: serde::de::DeserializeOwned + Default>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Ok(T::default());
    }
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn save_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), ConfigError> {
    let parent = path.parent().filter(|dir| !dir.as_os_str().is_empty());
    if let Some(dir) = parent {
        fs::create_dir_all(dir).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })?;
    }
    let contents = serde_json::to_string_pretty(value).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let mut temp = NamedTempFile::new_in(parent.unwrap_or_else(|| Path::new(".")))
        .map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })?;
    temp.write_all(contents.as_bytes())
        .map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })?;
    temp.persist(path).map_err(|err| ConfigError::Write {
        path: path.to_path_buf(),
        source: err.error,
    })?;
    Ok(())
}

impl Config {
    pub fn load(root: &Path) -> Result<Config, ConfigError> {
        load_json(&text_config_path(root))
    }

    pub fn save(&self, root: &Path) -> Result<(), ConfigError> {
        save_json(&text_config_path(root), self)
    }
}

impl McpServersFile {
    pub fn load(root: &Path) -> Result<McpServersFile, ConfigError> {
        load_json(&mcp_servers_path(root))
    }
}

impl ModelParams {
    pub fn load(root: &Path, vendor: &str, model: &str) -> Result<ModelParams, ConfigError> {
        load_json(&model_params_path(root, vendor, model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_is_defaulted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config::load(dir.path()).expect("load");
        assert_eq!(config.model, super::super::data::DEFAULT_MODEL);
    }

    #[test]
    fn config_save_load_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = Config::default();
        config.model = "mistral-large".to_string();
        config.max_tool_calls = Some(4);
        config.save(dir.path()).expect("save");

        let loaded = Config::load(dir.path()).expect("load");
        assert_eq!(loaded.model, "mistral-large");
        assert_eq!(loaded.max_tool_calls, Some(4));
    }

    #[test]
    fn corrupt_config_reports_the_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(text_config_path(dir.path()), "not json").expect("write");
        let err = Config::load(dir.path()).expect_err("parse failure");
        assert!(err.to_string().contains("textConfig.json"));
    }

    #[test]
    fn model_params_filename_includes_family() {
        let path = model_params_path(Path::new("/c"), "openai", "gpt-4o");
        assert_eq!(path, PathBuf::from("/c/openai_gpt_gpt-4o.json"));
    }
}
