use clap::Parser;

use clai::cli::{self, Cli};

/// Legacy switches that force debug logging for the whole binary.
const DEBUG_ENV_VARS: &[&str] = &[
    "DEBUG",
    "DEBUG_OPENAI",
    "DEBUG_CLAUDE",
    "GEMINI_DEBUG",
    "DEBUG_CALL",
    "TEXT_QUERIER_DEBUG",
];

fn configure_logging() {
    let legacy_debug = DEBUG_ENV_VARS
        .iter()
        .any(|name| std::env::var_os(name).is_some_and(|value| !value.is_empty()));
    let default_filter = if legacy_debug { "clai=debug" } else { "clai=warn" };
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.to_string());

    let format = tracing_subscriber::fmt::format()
        .with_target(false)
        .compact();
    tracing_subscriber::fmt()
        .event_format(format)
        .without_time()
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

#[tokio::main]
async fn main() {
    configure_logging();
    let cli = Cli::parse();
    if let Err(err) = cli::run(cli).await {
        let code = err.exit_code();
        if code != 0 {
            eprintln!("clai: {}", err);
        }
        std::process::exit(code);
    }
}
