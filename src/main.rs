//! yochat - ask a question from the terminal.
//!
//! Sends the question (and optionally a file) to Gemini, streams the short
//! answer onto a status line, prints it, and copies any suggested shell
//! commands to the clipboard.

mod ask;
mod backend;
mod clipboard;
mod commands;
mod config;
mod error;
mod request;
mod spinner;
mod stream;

use anyhow::{Context, Result};
use backend::GeminiBackend;
use clap::{Args, CommandFactory, Parser, Subcommand};
use config::{AskSettings, Config};
use request::{build_parts, Attachment};
use spinner::{Spinner, StatusIndicator};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chat")]
#[command(author, version, about = "Ask a question from the terminal")]
#[command(long_about = "Ask a question from the terminal.\n\n\
Answers are short and streamed as they arrive. Shell commands suggested in the \
answer are copied to the clipboard.")]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(flatten)]
    ask: AskArgs,

    /// Log debug output to stderr
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct AskArgs {
    /// The question to ask; everything after its first word belongs to it
    #[arg(
        value_name = "QUESTION",
        num_args = 1..,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    words: Vec<String>,

    /// Ask this question (alternative to typing it as plain words)
    #[arg(short = 'q', value_name = "QUESTION")]
    question: Option<String>,

    /// Attach a file (text, image, PDF, audio, video) for analysis
    #[arg(long, value_name = "PATH")]
    file: Option<PathBuf>,

    /// Override the model
    #[arg(short = 'm', long, value_name = "MODEL")]
    model: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Save your Gemini API key (get one free at https://aistudio.google.com)
    Set {
        /// The API key
        api_key: Option<String>,
    },
    /// Print the version
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    match cli.command {
        Some(Commands::Set { api_key }) => handle_set(api_key.as_deref()),
        Some(Commands::Version) => {
            println!("v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        None => handle_ask(cli.ask).await,
    }
}

/// Send tracing output to stderr so it never mixes with the answer.
fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(format!("yochat={level},reqwest=warn"))
    })?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

/// Handle the set command.
fn handle_set(api_key: Option<&str>) -> Result<()> {
    let Some(api_key) = api_key else {
        println!("Usage:");
        println!("  chat set <your-api-key>   (get one free at https://aistudio.google.com)");
        return Ok(());
    };

    let mut config = Config::load().context("Error loading config")?;
    config.api_key = Some(api_key.to_string());
    let path = config.save().context("Error saving API key")?;

    println!("API key set successfully.");
    println!("Config file location: {}", path.display());
    Ok(())
}

/// Handle a question, with or without an attached file.
async fn handle_ask(args: AskArgs) -> Result<()> {
    let settings = AskSettings::default().with_model(args.model);

    let question = args
        .question
        .filter(|q| !q.trim().is_empty())
        .or_else(|| Some(args.words.join(" ")).filter(|q| !q.trim().is_empty()));

    let attachment = args.file.map(Attachment::read).transpose()?;
    if attachment.is_none() && question.is_none() {
        println!("Please provide a question to ask, a file using --file, or use the -q flag.");
        print_usage_and_exit();
    }

    let mut indicator = Spinner::stderr();
    if let Some(attachment) = &attachment {
        indicator.set_message(&format!(
            "Analyzing file: {} (MIME type: {})",
            attachment.path.display(),
            attachment.mime_type
        ));
    }

    let parts = build_parts(attachment, question, &settings.media_types);

    let api_key = Config::load().and_then(|config| config.api_key());
    let backend = open_backend(&settings, api_key, &mut indicator)?;
    debug!("Using model {}", settings.model);

    let mut clipboard = clipboard::SystemClipboard::new();
    let mut stdout = std::io::stdout().lock();
    let outcome = ask::ask(
        &backend,
        &settings,
        &parts,
        &mut indicator,
        &mut clipboard,
        &mut stdout,
    )
    .await?;

    debug!(
        "Answer of {} bytes with {} command(s), clipboard: {:?}",
        outcome.answer.len(),
        outcome.commands.len(),
        outcome.copy
    );
    Ok(())
}

/// Create the backend, clearing the status line first if that fails.
fn open_backend(
    settings: &AskSettings,
    api_key: error::Result<String>,
    indicator: &mut dyn StatusIndicator,
) -> error::Result<GeminiBackend> {
    let backend = api_key
        .and_then(|key| GeminiBackend::new(settings.model.clone(), key, settings.timeout));
    if backend.is_err() {
        indicator.stop();
    }
    backend
}

fn print_usage_and_exit() -> ! {
    // Nothing useful can be done if stdout is gone.
    let _ = Cli::command().print_help();
    std::process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::tests::RecordingIndicator;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_free_form_words() {
        let cli = Cli::try_parse_from(["chat", "how", "do", "I", "list", "files"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.ask.words.join(" "), "how do I list files");
    }

    #[test]
    fn test_hyphenated_words_stay_in_question() {
        let cli = Cli::try_parse_from(["chat", "what", "does", "ls", "-la", "do"]).unwrap();
        assert_eq!(cli.ask.words.join(" "), "what does ls -la do");

        let cli =
            Cli::try_parse_from(["chat", "-m", "gemini-x", "explain", "tar", "--xz"]).unwrap();
        assert_eq!(cli.ask.model.as_deref(), Some("gemini-x"));
        assert_eq!(cli.ask.words, vec!["explain", "tar", "--xz"]);
    }

    #[test]
    fn test_backend_failure_clears_status_line() {
        let mut indicator = RecordingIndicator::default();
        let result = open_backend(
            &AskSettings::default(),
            Err(error::Error::MissingApiKey),
            &mut indicator,
        );
        assert!(matches!(result, Err(error::Error::MissingApiKey)));
        assert!(indicator.stopped);

        let mut indicator = RecordingIndicator::default();
        let result = open_backend(&AskSettings::default(), Ok("key".to_string()), &mut indicator);
        assert!(result.is_ok());
        assert!(!indicator.stopped);
    }

    #[test]
    fn test_question_flag_and_file() {
        let cli = Cli::try_parse_from(["chat", "--file", "notes.txt", "-q", "summarize"]).unwrap();
        assert_eq!(cli.ask.file, Some(PathBuf::from("notes.txt")));
        assert_eq!(cli.ask.question.as_deref(), Some("summarize"));
    }

    #[test]
    fn test_set_subcommand() {
        let cli = Cli::try_parse_from(["chat", "set", "abc123"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Set { api_key: Some(ref k) }) if k == "abc123"
        ));
    }

    #[test]
    fn test_version_subcommand() {
        let cli = Cli::try_parse_from(["chat", "version"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Version)));
    }

    #[test]
    fn test_help_subcommand() {
        let err = Cli::try_parse_from(["chat", "help"]).err().unwrap();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }
}
