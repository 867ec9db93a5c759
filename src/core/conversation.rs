//! Durable chat storage under `<config>/conversations/`.
//!
//! Saves are atomic (write to a temp file, then rename) and every non-reply
//! save also refreshes the `prevQuery.json` alias, updated last so a crash
//! leaves it pointing at the most recent complete save.

use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::core::message::{Chat, PREV_QUERY};

const MAX_ID_LEN: usize = 120;

#[derive(Debug)]
pub enum StoreError {
    NotFound { id: String },
    Io { path: PathBuf, source: std::io::Error },
    Parse { path: PathBuf, source: serde_json::Error },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound { id } => write!(f, "no conversation named {}", id),
            StoreError::Io { path, source } => {
                write!(f, "conversation file {}: {}", path.display(), source)
            }
            StoreError::Parse { path, source } => {
                write!(f, "failed to parse {}: {}", path.display(), source)
            }
        }
    }
}

impl StdError for StoreError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            StoreError::NotFound { .. } => None,
            StoreError::Io { source, .. } => Some(source),
            StoreError::Parse { source, .. } => Some(source),
        }
    }
}

/// Chat id + creation time, as returned by [`list`].
#[derive(Debug, Clone, PartialEq)]
pub struct ChatHeader {
    pub id: String,
    pub created: DateTime<Utc>,
}

/// Reduce an id to `[A-Za-z0-9_-]`, truncated to 120 characters, so it is
/// always a safe filename stem.
pub fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
                ch
            } else {
                '_'
            }
        })
        .take(MAX_ID_LEN)
        .collect()
}

fn chat_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{}.json", sanitize_id(id)))
}

fn write_atomic(path: &Path, contents: &str) -> Result<(), StoreError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    temp.write_all(contents.as_bytes())
        .map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    temp.persist(path).map_err(|err| StoreError::Io {
        path: path.to_path_buf(),
        source: err.error,
    })?;
    Ok(())
}

/// Write `<dir>/<chat.id>.json`, plus the `prevQuery.json` alias unless the
/// chat id already is `prevQuery`.
pub fn save(dir: &Path, chat: &Chat) -> Result<(), StoreError> {
    fs::create_dir_all(dir).map_err(|source| StoreError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let contents = serde_json::to_string_pretty(chat).map_err(|source| StoreError::Parse {
        path: chat_path(dir, &chat.id),
        source,
    })?;

    write_atomic(&chat_path(dir, &chat.id), &contents)?;
    debug!(id = %chat.id, "Saved conversation");

    if chat.id != PREV_QUERY {
        // Alias last, so prevQuery never points at a torn write.
        write_atomic(&chat_path(dir, PREV_QUERY), &contents)?;
    }
    Ok(())
}

pub fn load(dir: &Path, id: &str) -> Result<Chat, StoreError> {
    let path = chat_path(dir, id);
    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(StoreError::NotFound { id: id.to_string() })
        }
        Err(source) => return Err(StoreError::Io { path, source }),
    };
    serde_json::from_str(&contents).map_err(|source| StoreError::Parse { path, source })
}

/// Load the last exchange; a missing file is tolerated as an empty chat.
pub fn load_prev_query(dir: &Path) -> Result<Chat, StoreError> {
    match load(dir, PREV_QUERY) {
        Ok(chat) => Ok(chat),
        Err(StoreError::NotFound { .. }) => Ok(Chat::new(PREV_QUERY)),
        Err(err) => Err(err),
    }
}

/// Headers of every stored chat, sorted by creation time.
pub fn list(dir: &Path) -> Result<Vec<ChatHeader>, StoreError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(StoreError::Io {
                path: dir.to_path_buf(),
                source,
            })
        }
    };

    let mut headers = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        let Ok(contents) = fs::read_to_string(&path) else {
            continue;
        };
        if let Ok(chat) = serde_json::from_str::<Chat>(&contents) {
            headers.push(ChatHeader {
                id: chat.id,
                created: chat.created,
            });
        }
    }
    headers.sort_by(|a, b| a.created.cmp(&b.created));
    Ok(headers)
}

/// Best-effort unlink; a missing file is not an error.
pub fn delete(dir: &Path, id: &str) {
    let _ = fs::remove_file(chat_path(dir, id));
}
