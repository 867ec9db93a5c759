//! Turns argv, stdin, flags and the layered configuration into the chat a
//! query starts from.

use std::error::Error as StdError;
use std::fmt;
use std::path::{Path, PathBuf};

use base64::Engine;
use serde_json::json;

use crate::core::conversation::{self, StoreError};
use crate::core::message::{Chat, ContentPart, ImageUrl, Message, MessageContent, Role};
use crate::utils::home::expand_tilde;

/// Closes a glob-ingestion block so the model knows the file list ended.
pub const GLOB_SENTINEL: &str = "#####";

const GLOB_PREFACE: &str = "The user attached files below. Each following message is a JSON \
object with `fileName` and `data` fields holding one file. The list ends with a message \
containing only `#####`.";

#[derive(Debug)]
pub enum BuildError {
    /// The glob pattern failed to parse.
    BadGlob {
        pattern: String,
        source: glob::PatternError,
    },
    /// The glob matched nothing; an empty attachment block is a user error.
    EmptyGlob { pattern: String },
    /// An attached file could not be read.
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    Store(StoreError),
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::BadGlob { pattern, source } => {
                write!(f, "invalid glob pattern {:?}: {}", pattern, source)
            }
            BuildError::EmptyGlob { pattern } => {
                write!(f, "glob {:?} matched no files", pattern)
            }
            BuildError::ReadFile { path, source } => {
                write!(f, "cannot read {}: {}", path.display(), source)
            }
            BuildError::Store(err) => write!(f, "loading previous conversation: {}", err),
        }
    }
}

impl StdError for BuildError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            BuildError::BadGlob { source, .. } => Some(source),
            BuildError::EmptyGlob { .. } => None,
            BuildError::ReadFile { source, .. } => Some(source),
            BuildError::Store(err) => Some(err),
        }
    }
}

impl From<StoreError> for BuildError {
    fn from(err: StoreError) -> Self {
        BuildError::Store(err)
    }
}

/// One invocation's worth of builder input. All fields are ephemeral; none
/// of this is persisted as configuration.
pub struct BuildInput {
    pub prompt_args: Vec<String>,
    pub stdin: Option<String>,
    pub reply: bool,
    pub chat_mode: bool,
    pub cmd_mode: bool,
    pub glob_pattern: Option<String>,
    pub stdin_replace_token: Option<String>,
    /// The active system prompt, already profile-layered.
    pub system_prompt: String,
    pub profile_name: Option<String>,
    pub conversations_dir: PathBuf,
}

impl BuildInput {
    pub fn new(system_prompt: impl Into<String>, conversations_dir: impl Into<PathBuf>) -> Self {
        Self {
            prompt_args: Vec::new(),
            stdin: None,
            reply: false,
            chat_mode: false,
            cmd_mode: false,
            glob_pattern: None,
            stdin_replace_token: None,
            system_prompt: system_prompt.into(),
            profile_name: None,
            conversations_dir: conversations_dir.into(),
        }
    }
}

/// Assemble the chat a query starts from. See the field docs on
/// [`BuildInput`] for what each flag does.
pub fn build_chat(input: &BuildInput) -> Result<Chat, BuildError> {
    let mut chat = if input.reply {
        let mut previous = conversation::load_prev_query(&input.conversations_dir)?;
        if input.cmd_mode {
            // History is preserved but the ruling prompt becomes the cmd
            // prompt, so the resumed model still emits a command.
            match previous.messages.iter_mut().find(|m| m.role == Role::System) {
                Some(system) => system.content = MessageContent::from(input.system_prompt.as_str()),
                None => previous
                    .messages
                    .insert(0, Message::system(input.system_prompt.clone())),
            }
        }
        previous
    } else {
        let mut chat = Chat::new("");
        chat.messages.push(Message::system(input.system_prompt.clone()));
        chat
    };
    chat.profile = input.profile_name.clone();

    if let Some(pattern) = input.glob_pattern.as_deref() {
        if !pattern.is_empty() {
            ingest_glob(&mut chat, pattern)?;
        }
    }

    let prompt = assemble_prompt(input, &mut chat);

    if !input.chat_mode && !prompt.is_empty() {
        chat.messages.push(user_message_with_images(&prompt));
    }

    if chat.id.is_empty() {
        chat.id = Chat::id_from_prompt(&prompt);
    }

    Ok(chat)
}

/// Expand the glob and append the attachment block: one system preface, one
/// `{fileName, data}` message per match, and the closing sentinel.
fn ingest_glob(chat: &mut Chat, pattern: &str) -> Result<(), BuildError> {
    let expanded = expand_tilde(pattern);
    let paths = glob::glob(&expanded)
        .map_err(|source| BuildError::BadGlob {
            pattern: pattern.to_string(),
            source,
        })?
        .filter_map(Result::ok)
        .filter(|path| path.is_file())
        .collect::<Vec<_>>();
    if paths.is_empty() {
        return Err(BuildError::EmptyGlob {
            pattern: pattern.to_string(),
        });
    }

    chat.messages.push(Message::system(GLOB_PREFACE));
    for path in paths {
        let data = std::fs::read_to_string(&path).map_err(|source| BuildError::ReadFile {
            path: path.clone(),
            source,
        })?;
        let body = json!({
            "fileName": path.display().to_string(),
            "data": data,
        });
        chat.messages.push(Message::user(body.to_string()));
    }
    chat.messages.push(Message::user(GLOB_SENTINEL));
    Ok(())
}

/// Merge argv and stdin into the live prompt. With a replace token, stdin is
/// substituted in place; otherwise piped stdin becomes its own user message.
fn assemble_prompt(input: &BuildInput, chat: &mut Chat) -> String {
    let mut tokens = input.prompt_args.clone();
    match (&input.stdin_replace_token, &input.stdin) {
        (Some(token), Some(stdin)) => {
            let stdin = stdin.trim_end_matches('\n');
            for slot in tokens.iter_mut() {
                if slot == token {
                    *slot = stdin.to_string();
                } else if slot.contains(token.as_str()) {
                    *slot = slot.replace(token.as_str(), stdin);
                }
            }
        }
        (None, Some(stdin)) => {
            let stdin = stdin.trim_end_matches('\n');
            if !stdin.is_empty() {
                chat.messages.push(Message::user(stdin));
            }
        }
        _ => {}
    }
    tokens.join(" ").trim().to_string()
}

const IMAGE_EXTENSIONS: &[(&str, &str)] = &[
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
];

fn image_mime(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    IMAGE_EXTENSIONS
        .iter()
        .find(|(known, _)| *known == ext)
        .map(|(_, mime)| *mime)
}

/// Build the final user message. Prompt tokens naming readable image files
/// become `image_url` parts carrying the file as a base64 data URL; the rest
/// of the prompt stays a single text part. Prompts without image references
/// stay plain text.
fn user_message_with_images(prompt: &str) -> Message {
    let mut text_tokens: Vec<&str> = Vec::new();
    let mut images: Vec<ContentPart> = Vec::new();

    for token in prompt.split_whitespace() {
        let path = PathBuf::from(expand_tilde(token));
        let attached = image_mime(&path)
            .filter(|_| path.is_file())
            .and_then(|mime| std::fs::read(&path).ok().map(|bytes| (mime, bytes)));
        match attached {
            Some((mime, bytes)) => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
                images.push(ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: format!("data:{};base64,{}", mime, encoded),
                    },
                });
            }
            None => text_tokens.push(token),
        }
    }

    if images.is_empty() {
        return Message::user(prompt);
    }
    let mut parts = vec![ContentPart::Text {
        text: text_tokens.join(" "),
    }];
    parts.extend(images);
    Message::user(MessageContent::Parts(parts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::PREV_QUERY;

    fn input(dir: &Path) -> BuildInput {
        BuildInput::new("be helpful", dir)
    }

    #[test]
    fn fresh_chat_gets_system_and_user_messages() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut builder = input(dir.path());
        builder.prompt_args = vec!["hello".to_string(), "there".to_string()];

        let chat = build_chat(&builder).expect("build");
        assert_eq!(chat.messages.len(), 2);
        assert_eq!(chat.messages[0].role, Role::System);
        assert_eq!(chat.messages[0].content.text(), "be helpful");
        assert_eq!(chat.messages[1].content.text(), "hello there");
        assert_eq!(chat.id, "hello_there");
    }

    #[test]
    fn glob_block_is_matches_plus_two() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.txt"), "alpha").expect("write");
        std::fs::write(dir.path().join("b.txt"), "beta").expect("write");
        let mut builder = input(dir.path());
        builder.prompt_args = vec!["summarize".to_string()];
        builder.glob_pattern = Some(format!("{}/*.txt", dir.path().display()));

        let chat = build_chat(&builder).expect("build");
        // system + preface + 2 files + sentinel + user prompt.
        assert_eq!(chat.messages.len(), 6);
        assert_eq!(chat.messages[1].content.text(), GLOB_PREFACE);
        let file_msg: serde_json::Value =
            serde_json::from_str(&chat.messages[2].content.text()).expect("file json");
        assert!(file_msg["fileName"].as_str().unwrap().ends_with(".txt"));
        assert_eq!(chat.messages[4].content.text(), GLOB_SENTINEL);
        assert_eq!(chat.messages[5].content.text(), "summarize");
    }

    #[test]
    fn empty_glob_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut builder = input(dir.path());
        builder.glob_pattern = Some(format!("{}/*.nope", dir.path().display()));
        let err = build_chat(&builder).expect_err("no matches");
        assert!(matches!(err, BuildError::EmptyGlob { .. }));
    }

    #[test]
    fn reply_mode_appends_to_previous_exchange() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut previous = Chat::new(PREV_QUERY);
        previous.messages.push(Message::system("A"));
        previous.messages.push(Message::user("1"));
        previous.messages.push(Message::assistant("2"));
        conversation::save(dir.path(), &previous).expect("save");

        let mut builder = input(dir.path());
        builder.reply = true;
        builder.prompt_args = vec!["3".to_string()];

        let chat = build_chat(&builder).expect("build");
        let texts: Vec<String> = chat.messages.iter().map(|m| m.content.text()).collect();
        assert_eq!(texts, vec!["A", "1", "2", "3"]);
    }

    #[test]
    fn reply_mode_cmd_overwrites_system_prompt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut previous = Chat::new(PREV_QUERY);
        previous.messages.push(Message::system("old prompt"));
        previous.messages.push(Message::user("1"));
        conversation::save(dir.path(), &previous).expect("save");

        let mut builder = BuildInput::new("ONLY COMMANDS", dir.path());
        builder.reply = true;
        builder.cmd_mode = true;
        builder.prompt_args = vec!["list".to_string()];

        let chat = build_chat(&builder).expect("build");
        assert_eq!(chat.messages[0].content.text(), "ONLY COMMANDS");
        assert_eq!(chat.messages[1].content.text(), "1");
    }

    #[test]
    fn stdin_without_token_becomes_its_own_message() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut builder = input(dir.path());
        builder.prompt_args = vec!["explain".to_string(), "this".to_string()];
        builder.stdin = Some("fn main() {}\n".to_string());

        let chat = build_chat(&builder).expect("build");
        assert_eq!(chat.messages[1].content.text(), "fn main() {}");
        assert_eq!(chat.messages[2].content.text(), "explain this");
    }

    #[test]
    fn replace_token_splices_stdin_into_argv() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut builder = input(dir.path());
        builder.prompt_args = vec!["review".to_string(), "{}".to_string(), "please".to_string()];
        builder.stdin = Some("diff text".to_string());
        builder.stdin_replace_token = Some("{}".to_string());

        let chat = build_chat(&builder).expect("build");
        assert_eq!(chat.messages.len(), 2);
        assert_eq!(chat.messages[1].content.text(), "review diff text please");
    }

    #[test]
    fn chat_mode_defers_the_user_message() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut builder = input(dir.path());
        builder.chat_mode = true;
        builder.prompt_args = vec!["ignored?".to_string()];

        let chat = build_chat(&builder).expect("build");
        assert_eq!(chat.messages.len(), 1);
        assert_eq!(chat.messages[0].role, Role::System);
    }

    #[test]
    fn image_reference_splits_into_parts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let image = dir.path().join("shot.png");
        std::fs::write(&image, [0x89, 0x50, 0x4e, 0x47]).expect("write");
        let mut builder = input(dir.path());
        builder.prompt_args = vec![
            "what".to_string(),
            "is".to_string(),
            image.display().to_string(),
        ];

        let chat = build_chat(&builder).expect("build");
        let last = chat.messages.last().expect("user message");
        match &last.content {
            MessageContent::Parts(parts) => {
                assert_eq!(parts.len(), 2);
                assert!(matches!(&parts[0], ContentPart::Text { text } if text == "what is"));
                match &parts[1] {
                    ContentPart::ImageUrl { image_url } => {
                        assert!(image_url.url.starts_with("data:image/png;base64,"));
                    }
                    other => panic!("expected image part, got {:?}", other),
                }
            }
            other => panic!("expected multi-part content, got {:?}", other),
        }
    }

    #[test]
    fn prompt_without_images_stays_plain_text() {
        let message = user_message_with_images("no attachments here");
        assert!(matches!(message.content, MessageContent::Text(_)));
    }
}
