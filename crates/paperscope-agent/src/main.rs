//! Paperscope — structured paper analysis with a local LLM.
//! Entry point for the command-line binary.

mod config;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use futures_util::StreamExt;
use paperscope_common::Paper;
use paperscope_llm::{
    analyze_paper, overview_paper, summarize, AnalysisOptions, ChatBackend, ChatMode, Envelope, LlmError,
    OllamaClient, PaperChat, StructuredPipeline,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "paperscope", version, about = "Structured paper analysis with a local LLM")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Use the /api/generate endpoint instead of /api/chat.
    #[arg(long, global = true)]
    generate: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List models installed on the endpoint.
    Models,
    /// Full analysis of a paper; the file holds its title and abstract.
    Analyze { file: PathBuf },
    /// Field, target and main keywords of a paper.
    Overview { file: PathBuf },
    /// Short and structured summaries.
    Summarize {
        #[arg(long)]
        title: String,
        #[arg(long = "abstract")]
        abstract_text: String,
    },
    /// Talk about a paper; replies are streamed to stdout.
    Chat {
        #[arg(long)]
        title: String,
        #[arg(long = "abstract")]
        abstract_text: String,
        #[command(flatten)]
        target: ChatTarget,
        /// Follow-up questions, asked in order.
        #[arg(long = "message")]
        messages: Vec<String>,
    },
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct ChatTarget {
    /// Search keywords that found the paper.
    #[arg(long)]
    query: Option<String>,
    /// The user's own paper to compare against.
    #[arg(long)]
    user_paper: Option<String>,
}

impl ChatTarget {
    fn into_mode(self) -> ChatMode {
        match (self.query, self.user_paper) {
            (_, Some(user_paper)) => ChatMode::PaperComparison { user_paper },
            (query, None) => ChatMode::KeywordSearch { query: query.unwrap_or_default() },
        }
    }
}

fn report(e: LlmError) -> anyhow::Error {
    tracing::error!(kind = e.kind(), "LLM request failed");
    anyhow::anyhow!(e.diagnostic())
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Stream the next reply, printing only the newly arrived text.
async fn stream_to_stdout(chat: &mut PaperChat, backend: &dyn ChatBackend, temperature: f32) -> anyhow::Result<()> {
    let mut stream = chat.stream_reply(backend, temperature).await.map_err(report)?;
    let mut stdout = std::io::stdout();
    let mut text = String::new();
    while let Some(item) = stream.next().await {
        let current = item.map_err(report)?;
        // Each item extends the previous one.
        write!(stdout, "{}", current.get(text.len()..).unwrap_or(current.as_str()))?;
        stdout.flush()?;
        text = current;
    }
    writeln!(stdout)?;
    chat.record_reply(text);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("paperscope=debug,info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    info!("Paperscope {}", env!("CARGO_PKG_VERSION"));

    let config = config::Config::load().context("Could not load configuration")?;
    let envelope = if cli.generate { Envelope::Generate } else { config.envelope()? };
    info!(base_url = %config.ollama.base_url, model = %config.ollama.model, envelope = envelope.as_str(), "Configuration loaded");

    let client = OllamaClient::new(&config.ollama).map_err(report)?.with_envelope(envelope);
    let options = AnalysisOptions { temperature: config.analysis.temperature };

    match cli.command {
        Command::Models => {
            for model in client.list_models().await.map_err(report)? {
                println!("{}\t{}\t{}", model.name, model.size, model.modified_at);
            }
        }
        Command::Analyze { file } => {
            let subject = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let pipeline = StructuredPipeline::new(Arc::new(client));
            let analysis = analyze_paper(&pipeline, &subject, options).await.map_err(report)?;
            print_json(&analysis)?;
        }
        Command::Overview { file } => {
            let subject = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let pipeline = StructuredPipeline::new(Arc::new(client));
            let overview = overview_paper(&pipeline, &subject, options).await.map_err(report)?;
            print_json(&overview)?;
        }
        Command::Summarize { title, abstract_text } => {
            let paper = Paper::new("cli", title).with_abstract(abstract_text);
            let pipeline = StructuredPipeline::new(Arc::new(client));
            let result = summarize(&pipeline, &paper).await.map_err(report)?;
            print_json(&result)?;
        }
        Command::Chat { title, abstract_text, target, messages } => {
            let paper = Paper::new("cli", title).with_abstract(abstract_text);
            let mut chat = match config.chat.system_prompt {
                Some(ref prompt) => PaperChat::with_system_prompt(prompt.as_str()),
                None => PaperChat::new(),
            };
            chat.open(&target.into_mode(), &paper);
            stream_to_stdout(&mut chat, &client, config.chat.temperature).await?;

            for message in messages {
                println!("\n> {message}\n");
                chat.push_user(message);
                stream_to_stdout(&mut chat, &client, config.chat.temperature).await?;
            }
        }
    }

    Ok(())
}
