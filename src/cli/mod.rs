//! Command-line surface: argument parsing, flag/profile/config layering and
//! subcommand dispatch.

pub mod session;
pub mod vendor;

use std::error::Error as StdError;
use std::fmt;
use std::io::{IsTerminal, Read, Write};
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tokio_util::sync::CancellationToken;

use crate::core::chat_builder::{build_chat, BuildError, BuildInput};
use crate::core::config::data::Config;
use crate::core::config::io::{config_root, conversations_dir, text_config_path, ConfigError};
use crate::core::config::profiles::{hybrid_cmd_prompt, Profile};
use crate::core::message::Message;
use crate::core::querier::{run_shell_command, QuerierError};
use session::{Session, SessionError};

#[derive(Parser, Debug)]
#[command(name = "clai", version, about = "Converse with large language models from the CLI")]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ask a single question and print the reply.
    #[command(alias = "q")]
    Query(QueryArgs),
    /// Interactive conversation: one line per turn, `exit` or EOF to leave.
    #[command(alias = "c")]
    Chat(QueryArgs),
    /// Attach every file matching a glob pattern to the prompt.
    #[command(alias = "g")]
    Glob(GlobArgs),
    /// Generate a shell command and optionally execute it.
    Cmd(QueryArgs),
    /// Generate images (not included in this build).
    #[command(alias = "p")]
    Photo(QueryArgs),
    /// Dream-mode generation (not included in this build).
    Dre(QueryArgs),
    /// Print the active configuration, creating it on first run.
    Setup,
    /// Print the version.
    #[command(alias = "v")]
    Version,
}

#[derive(Args, Debug, Clone, Default)]
struct QueryArgs {
    /// The prompt, joined from the remaining arguments.
    #[arg(trailing_var_arg = true)]
    prompt: Vec<String>,

    /// Print tokens verbatim without markdown post-rendering.
    #[arg(short = 'r', long)]
    raw: bool,

    /// Continue from the previous exchange (`prevQuery`).
    #[arg(long, alias = "re")]
    reply: bool,

    /// Enable tools and select them by glob (`*` for all).
    #[arg(short = 't', long, value_delimiter = ',', num_args = 0..=1)]
    tools: Option<Vec<String>>,

    /// Replace this token in the prompt with piped stdin.
    #[arg(short = 'I', long)]
    replace: Option<String>,

    /// Model to converse with, overriding config and profile.
    #[arg(long, alias = "cm")]
    chat_model: Option<String>,

    /// Named profile from `<config>/profiles/`.
    #[arg(long)]
    profile: Option<String>,

    /// Profile loaded from an explicit path.
    #[arg(long)]
    profile_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
struct GlobArgs {
    /// The file pattern to attach, e.g. `src/*.rs`.
    pattern: String,

    #[command(flatten)]
    query: QueryArgs,
}

#[derive(Debug)]
pub enum CliError {
    /// Bad invocation: missing prompt, conflicting flags.
    Input(String),
    Config(ConfigError),
    Build(BuildError),
    Session(SessionError),
    Query(QuerierError),
    Io(std::io::Error),
    /// A recognized subcommand this build does not include.
    Unsupported(&'static str),
    /// The user asked to leave; not a failure.
    UserInitiatedExit,
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::UserInitiatedExit => 0,
            _ => 1,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Input(cause) => write!(f, "{}", cause),
            CliError::Config(err) => write!(f, "{}", err),
            CliError::Build(err) => write!(f, "{}", err),
            CliError::Session(err) => write!(f, "{}", err),
            CliError::Query(err) => write!(f, "{}", err),
            CliError::Io(err) => write!(f, "{}", err),
            CliError::Unsupported(what) => {
                write!(f, "the {} subcommand is not included in this build", what)
            }
            CliError::UserInitiatedExit => write!(f, "exit"),
        }
    }
}

impl StdError for CliError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            CliError::Config(err) => Some(err),
            CliError::Build(err) => Some(err),
            CliError::Session(err) => Some(err),
            CliError::Query(err) => Some(err),
            CliError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        CliError::Config(err)
    }
}

impl From<BuildError> for CliError {
    fn from(err: BuildError) -> Self {
        CliError::Build(err)
    }
}

impl From<SessionError> for CliError {
    fn from(err: SessionError) -> Self {
        CliError::Session(err)
    }
}

impl From<QuerierError> for CliError {
    fn from(err: QuerierError) -> Self {
        CliError::Query(err)
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io(err)
    }
}

enum Mode {
    Query,
    Chat,
    Cmd,
}

pub async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Version => {
            println!("clai {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Command::Setup => setup(),
        Command::Photo(_) => Err(CliError::Unsupported("photo")),
        Command::Dre(_) => Err(CliError::Unsupported("dre")),
        Command::Query(args) => run_query(args, None, Mode::Query).await,
        Command::Chat(args) => run_query(args, None, Mode::Chat).await,
        Command::Cmd(args) => run_query(args, None, Mode::Cmd).await,
        Command::Glob(args) => run_query(args.query, Some(args.pattern), Mode::Query).await,
    }
}

fn setup() -> Result<(), CliError> {
    let root = config_root()?;
    let path = text_config_path(&root);
    let config = Config::load(&root)?;
    if !path.exists() {
        config.save(&root)?;
    }
    println!("config: {}", path.display());
    let rendered = serde_json::to_string_pretty(&config).map_err(|source| {
        CliError::Config(ConfigError::Parse {
            path: path.clone(),
            source,
        })
    })?;
    println!("{}", rendered);
    Ok(())
}

/// Layer flags over the profile over the config file, returning the active
/// configuration and the profile's own prompt (for the cmd-mode hybrid).
fn layer_config(args: &QueryArgs) -> Result<(PathBuf, Config, Option<Profile>), CliError> {
    let root = config_root()?;
    let mut config = Config::load(&root)?;

    let profile = if let Some(path) = &args.profile_path {
        Some(Profile::load_path(path)?)
    } else if let Some(name) = &args.profile {
        Some(Profile::load(&root, name)?)
    } else {
        None
    };
    if let Some(profile) = &profile {
        profile.apply(&mut config);
    }

    if let Some(model) = &args.chat_model {
        config.model = model.clone();
    }
    if args.raw {
        config.raw = true;
    }
    if let Some(globs) = &args.tools {
        config.use_tools = true;
        if !globs.is_empty() {
            config.requested_tool_globs = globs.clone();
        }
    }

    Ok((root, config, profile))
}

fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let mut stdin = std::io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }
    let mut contents = String::new();
    stdin.read_to_string(&mut contents)?;
    if contents.is_empty() {
        Ok(None)
    } else {
        Ok(Some(contents))
    }
}

fn spawn_ctrl_c_handler() -> CancellationToken {
    let cancel = CancellationToken::new();
    let handle = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.cancel();
        }
    });
    cancel
}

async fn run_query(
    args: QueryArgs,
    glob_pattern: Option<String>,
    mode: Mode,
) -> Result<(), CliError> {
    let (root, mut config, profile) = layer_config(&args)?;
    let cmd_mode = matches!(mode, Mode::Cmd);
    let chat_mode = matches!(mode, Mode::Chat);

    if cmd_mode {
        // Both prompts travel so the profile cannot talk the model out of
        // emitting a command.
        config.system_prompt = match profile.as_ref().and_then(|p| p.system_prompt.as_deref()) {
            Some(profile_prompt) => hybrid_cmd_prompt(&config.cmd_mode_prompt, profile_prompt),
            None => config.cmd_mode_prompt.clone(),
        };
    }

    let stdin = read_piped_stdin()?;
    let mut input = BuildInput::new(config.system_prompt.clone(), conversations_dir(&root));
    input.prompt_args = args.prompt.clone();
    input.stdin = stdin;
    input.reply = args.reply;
    input.chat_mode = chat_mode;
    input.cmd_mode = cmd_mode;
    input.glob_pattern = glob_pattern;
    input.stdin_replace_token = args.replace.clone();
    input.profile_name = profile.as_ref().map(|p| p.name.clone());

    let chat = build_chat(&input)?;
    if !chat_mode && chat.messages.iter().all(|m| m.role != crate::core::message::Role::User) {
        return Err(CliError::Input(
            "no prompt given; pass one as arguments or pipe it on stdin".to_string(),
        ));
    }

    let debug_mode = std::env::var_os("DEBUG").is_some();
    let mut session = Session::assemble(&root, &config, cmd_mode, debug_mode).await?;
    let cancel = spawn_ctrl_c_handler();

    if chat_mode {
        return run_chat_loop(&mut session, chat, &cancel).await;
    }

    session.querier.text_query(&cancel, chat).await?;

    if cmd_mode {
        return confirm_and_run(session.querier.last_reply()).await;
    }
    Ok(())
}

/// One line per turn; `exit`/`quit` or EOF leaves. Every turn persists
/// through the querier's normal save path.
async fn run_chat_loop(
    session: &mut Session,
    mut chat: crate::core::message::Chat,
    cancel: &CancellationToken,
) -> Result<(), CliError> {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("> ");
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = cancel.cancelled() => None,
        };
        let Some(line) = line else {
            return Err(CliError::UserInitiatedExit);
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            return Err(CliError::UserInitiatedExit);
        }
        chat.messages.push(Message::user(line));
        chat = session.querier.text_query(cancel, chat).await?;
    }
}

/// cmd mode aftermath: show the generated command and run it only on an
/// explicit yes.
async fn confirm_and_run(command_line: &str) -> Result<(), CliError> {
    let command_line = command_line.trim();
    if command_line.is_empty() {
        return Err(CliError::Input("the model produced no command".to_string()));
    }
    eprint!("run `{}`? [y/N] ", command_line);
    std::io::stderr().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    match answer.trim() {
        "y" | "Y" | "yes" => run_shell_command(command_line)
            .await
            .map_err(CliError::Input),
        _ => Err(CliError::UserInitiatedExit),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn aliases_parse() {
        let cli = Cli::parse_from(["clai", "q", "hello", "world"]);
        match cli.command {
            Command::Query(args) => assert_eq!(args.prompt, vec!["hello", "world"]),
            other => panic!("expected query, got {:?}", other),
        }

        let cli = Cli::parse_from(["clai", "g", "src/*.rs", "summarize"]);
        match cli.command {
            Command::Glob(args) => {
                assert_eq!(args.pattern, "src/*.rs");
                assert_eq!(args.query.prompt, vec!["summarize"]);
            }
            other => panic!("expected glob, got {:?}", other),
        }
    }

    #[test]
    fn flags_parse_with_long_aliases() {
        let cli = Cli::parse_from([
            "clai",
            "query",
            "--re",
            "--cm",
            "mistral-large",
            "-t",
            "weather,c*",
            "-I",
            "{}",
            "hi",
        ]);
        match cli.command {
            Command::Query(args) => {
                assert!(args.reply);
                assert_eq!(args.chat_model.as_deref(), Some("mistral-large"));
                assert_eq!(
                    args.tools,
                    Some(vec!["weather".to_string(), "c*".to_string()])
                );
                assert_eq!(args.replace.as_deref(), Some("{}"));
                assert_eq!(args.prompt, vec!["hi"]);
            }
            other => panic!("expected query, got {:?}", other),
        }
    }

    #[test]
    fn tools_flag_enables_tools_in_layering() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::env::set_var("CLAI_CONFIG_DIR", dir.path());
        let args = QueryArgs {
            tools: Some(vec!["weather".to_string()]),
            ..QueryArgs::default()
        };
        let (_, config, profile) = layer_config(&args).expect("layer");
        assert!(config.use_tools);
        assert_eq!(config.requested_tool_globs, vec!["weather"]);
        assert!(profile.is_none());
        std::env::remove_var("CLAI_CONFIG_DIR");
    }
}
