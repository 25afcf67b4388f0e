use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use hr_assistant_lib::commands::chat::SUGGESTED_QUESTIONS;
use hr_assistant_lib::commands::documents::{
    document_row, follow_upload, upload_path, DocumentSelector,
};
use hr_assistant_lib::config::{AppConfig, ENV_KEYS};
use hr_assistant_lib::doc_processor::excerpt;
use hr_assistant_lib::error::AppError;
use hr_assistant_lib::models::{Conversation, ConversationMessage};
use hr_assistant_lib::validation::format_bytes;
use hr_assistant_lib::App;

const PREVIEW_CHARS: usize = 2000;
const SOURCE_EXCERPT_CHARS: usize = 160;

#[derive(Parser, Debug)]
#[command(name = "hr-assistant", version)]
#[command(about = "Ask the HR assistant questions grounded in company documents")]
struct Cli {
    /// Backend base URL, e.g. http://localhost:8080/api
    #[arg(long, global = true)]
    api_url: Option<String>,
    /// Where conversation history is kept
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ask one question and print the answer as it streams in
    Ask {
        #[arg(required = true, trailing_var_arg = true)]
        question: Vec<String>,
        /// Restrict the search to these document ids (repeatable)
        #[arg(long = "document", short = 'd')]
        documents: Vec<String>,
        /// Wait for the full answer, with its sources
        #[arg(long, conflicts_with = "documents")]
        no_stream: bool,
    },
    /// Interactive chat
    Chat,
    /// Print the starter questions
    Suggestions,
    #[command(subcommand)]
    History(HistoryCommand),
    #[command(subcommand)]
    Docs(DocsCommand),
    /// Print the effective configuration
    Config,
}

#[derive(Subcommand, Debug)]
enum HistoryCommand {
    List,
    /// Show a conversation (the active one by default)
    Show { id: Option<Uuid> },
    New,
    Switch { id: Uuid },
    Delete { id: Uuid },
    Rename {
        id: Uuid,
        #[arg(required = true, trailing_var_arg = true)]
        title: Vec<String>,
    },
    Clear,
}

#[derive(Subcommand, Debug)]
enum DocsCommand {
    List,
    Upload { path: PathBuf },
    Delete { id: String },
    Rename { id: String, new_name: String },
    Preview {
        id: String,
        #[arg(long, default_value_t = PREVIEW_CHARS)]
        chars: usize,
    },
    Categories,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::from_env();
    if let Some(url) = cli.api_url {
        config.api_url = url;
    }
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }

    if let Command::Config = cli.command {
        return print_config(&config);
    }

    let app = App::new(config);
    let result = match cli.command {
        Command::Ask {
            question,
            documents,
            no_stream,
        } => ask(&app, &question.join(" "), &documents, no_stream).await,
        Command::Chat => repl(&app).await,
        Command::Suggestions => {
            for (i, question) in SUGGESTED_QUESTIONS.iter().enumerate() {
                println!("{}. {}", i + 1, question);
            }
            Ok(())
        }
        Command::History(cmd) => history(&app, cmd),
        Command::Docs(cmd) => docs(&app, cmd).await,
        Command::Config => Ok(()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

fn report(err: &AppError) {
    eprintln!("Error: {}", err);
    if let Some(details) = err.details() {
        eprintln!("  {}", details);
    }
}

fn print_config(config: &AppConfig) -> ExitCode {
    match serde_json::to_string_pretty(config) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    }
    println!("\nEnvironment: {}", ENV_KEYS.join(", "));
    ExitCode::SUCCESS
}

// ── Chat ──

/// Stream one answer to stdout. Ctrl-C abandons it; nothing is saved.
async fn stream_answer(app: &App, question: &str, documents: &[String]) -> Result<(), AppError> {
    let submission = app.chat.submit(question, documents, |fragment| {
        let mut out = std::io::stdout();
        let _ = write!(out, "{}", fragment);
        let _ = out.flush();
    });
    tokio::select! {
        result = submission => {
            result?;
            println!();
        }
        _ = tokio::signal::ctrl_c() => {
            println!();
            eprintln!("Cancelled.");
        }
    }
    Ok(())
}

async fn ask(app: &App, question: &str, documents: &[String], no_stream: bool) -> Result<(), AppError> {
    if !no_stream {
        return stream_answer(app, question, documents).await;
    }
    let message = app.chat.ask(question).await?;
    println!("{}", message.answer.content);
    print_sources(&message);
    Ok(())
}

fn print_sources(message: &ConversationMessage) {
    if message.answer.sources.is_empty() {
        return;
    }
    println!("\nSources:");
    for source in &message.answer.sources {
        println!("  - {}", source.document_name);
        if !source.excerpt.is_empty() {
            println!("    {}", excerpt(&source.excerpt, SOURCE_EXCERPT_CHARS));
        }
    }
}

const REPL_HELP: &str = "\
/new            start a new conversation
/history        list conversations
/docs           list selectable documents
/select <id>    toggle a document in the search scope
/all            toggle between all and no documents
/suggest <n>    ask a suggested question
/help           show this help
/quit           leave";

async fn repl(app: &App) -> Result<(), AppError> {
    let mut selector = DocumentSelector::new();
    match app.documents.load_documents().await {
        Ok(documents) => {
            selector.sync(&documents);
        }
        Err(e) => eprintln!("Documents unavailable: {}", e),
    }

    println!("HR assistant. Type a question, or /help.");
    println!("Searching: {}", selector.summary());
    if app.conversations.message_count() == 0 {
        for (i, question) in SUGGESTED_QUESTIONS.iter().enumerate() {
            println!("  {}. {}", i + 1, question);
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        let _ = std::io::stdout().flush();

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            println!();
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let question = match line.split_once(' ').unwrap_or((line, "")) {
            ("/quit" | "/exit", _) => break,
            ("/help", _) => {
                println!("{}", REPL_HELP);
                continue;
            }
            ("/new", _) => {
                match app.conversations.create_conversation() {
                    Some(conversation) => println!("Started conversation {}", conversation.id),
                    None => println!("The current conversation is still empty."),
                }
                continue;
            }
            ("/history", _) => {
                list_conversations(app);
                continue;
            }
            ("/docs", _) => {
                for document in app.documents.snapshot().indexed_documents() {
                    let mark = if selector.is_selected(&document.id) { 'x' } else { ' ' };
                    println!("[{}] {}  {}", mark, document.id, document.filename);
                }
                println!("Searching: {}", selector.summary());
                continue;
            }
            ("/select", id) => {
                selector.toggle(id.trim());
                println!("Searching: {}", selector.summary());
                continue;
            }
            ("/all", _) => {
                selector.toggle_all();
                println!("Searching: {}", selector.summary());
                continue;
            }
            ("/suggest", n) => {
                match n.trim().parse::<usize>().ok().and_then(|n| SUGGESTED_QUESTIONS.get(n.wrapping_sub(1))) {
                    Some(question) => {
                        println!("> {}", question);
                        question.to_string()
                    }
                    None => {
                        println!("Pick a number from 1 to {}.", SUGGESTED_QUESTIONS.len());
                        continue;
                    }
                }
            }
            _ => line.to_string(),
        };

        if let Err(e) = stream_answer(app, &question, &selector.selection()).await {
            report(&e);
        }
        app.chat.dismiss_error();
    }
    Ok(())
}

// ── History ──

fn list_conversations(app: &App) {
    let state = app.conversations.snapshot();
    for conversation in &state.conversations {
        let mark = if state.active_id == Some(conversation.id) { '*' } else { ' ' };
        println!(
            "{} {}  {:<52} {:>3} msgs  {}",
            mark,
            conversation.id,
            conversation.title,
            conversation.messages.len(),
            conversation.updated_at.format("%Y-%m-%d %H:%M"),
        );
    }
}

fn print_conversation(conversation: &Conversation) {
    println!("{}\n", conversation.title);
    if conversation.messages.is_empty() {
        println!("(no messages)");
    }
    for message in &conversation.messages {
        println!("[{}] Q: {}", message.timestamp.format("%Y-%m-%d %H:%M"), message.question.text);
        println!("A: {}", message.answer.content);
        print_sources(message);
        println!();
    }
}

fn history(app: &App, cmd: HistoryCommand) -> Result<(), AppError> {
    let store = &app.conversations;
    let not_found = |id: Uuid| AppError::NotFound(format!("conversation {}", id));
    match cmd {
        HistoryCommand::List => list_conversations(app),
        HistoryCommand::Show { id } => {
            let conversation = match id {
                Some(id) => store.conversations().into_iter().find(|c| c.id == id),
                None => store.active_conversation(),
            };
            let conversation = conversation.ok_or_else(|| not_found(id.unwrap_or_default()))?;
            print_conversation(&conversation);
        }
        HistoryCommand::New => match store.create_conversation() {
            Some(conversation) => println!("{}", conversation.id),
            None => println!("The current conversation is still empty."),
        },
        HistoryCommand::Switch { id } => {
            if !store.switch_conversation(id) {
                return Err(not_found(id));
            }
        }
        HistoryCommand::Delete { id } => {
            if !store.delete_conversation(id) {
                return Err(not_found(id));
            }
        }
        HistoryCommand::Rename { id, title } => {
            if !store.rename_conversation(id, &title.join(" ")) {
                return Err(not_found(id));
            }
        }
        HistoryCommand::Clear => {
            store.clear_all_history();
            println!("History cleared.");
        }
    }
    Ok(())
}

// ── Documents ──

async fn docs(app: &App, cmd: DocsCommand) -> Result<(), AppError> {
    let directory = &app.documents;
    match cmd {
        DocsCommand::List => {
            directory.load_documents().await?;
            let state = directory.snapshot();
            for document in &state.documents {
                println!("{}", document_row(document));
            }
            println!(
                "{} documents: {} indexed, {} processing, {} failed",
                state.document_count(),
                state.indexed_count(),
                state.pending_count(),
                state.failed_count(),
            );
        }
        DocsCommand::Upload { path } => {
            let reporter = tokio::spawn(follow_upload(directory.subscribe(), |line| eprintln!("{}", line)));
            let result = upload_path(directory, &path, app.config.max_file_size_bytes()).await;
            // Rejected before upload: no progress was ever published.
            if directory.upload_progress().is_some() {
                let _ = reporter.await;
            } else {
                reporter.abort();
            }
            let document = result?;
            println!("{}", document_row(&document));
        }
        DocsCommand::Delete { id } => {
            directory.delete_document(&id).await?;
            println!("Deleted {}", id);
        }
        DocsCommand::Rename { id, new_name } => {
            let document = directory.rename_document(&id, &new_name).await?;
            println!("{}", document_row(&document));
        }
        DocsCommand::Preview { id, chars } => {
            let preview = directory.preview_document(&id).await?;
            let size = directory
                .get_document_by_id(&id)
                .map(|d| format_bytes(d.file_size_bytes))
                .unwrap_or_default();
            println!("{} ({})", preview.filename, size);
            println!("{}\n", preview.url);
            println!("{}", excerpt(&preview.text, chars));
        }
        DocsCommand::Categories => {
            for category in directory.categories().await? {
                println!("{}", category);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_no_stream_rejects_document_scope() {
        let err = Cli::try_parse_from(["hr-assistant", "ask", "--no-stream", "-d", "d1", "Remote", "work?"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);

        let cli = Cli::try_parse_from(["hr-assistant", "ask", "-d", "d1", "Remote", "work?"]).unwrap();
        match cli.command {
            Command::Ask { question, documents, no_stream } => {
                assert_eq!(question.join(" "), "Remote work?");
                assert_eq!(documents, vec!["d1".to_string()]);
                assert!(!no_stream);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
