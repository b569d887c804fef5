//! Interactive CLI for the long-form memory agent.

use std::io::Write as _;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use colored::Colorize;
use longmem_core::embeddings::LocalEmbedder;
use longmem_core::{Agent, AgentConfig, OpenAiCompatibleClient, Store};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Provider {
    Groq,
    Openai,
    Gemini,
    Ollama,
}

#[derive(Parser)]
#[command(name = "longmem")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Chat with a long-form memory agent")]
struct Cli {
    /// LLM provider
    #[arg(long, value_enum, default_value = "groq")]
    provider: Provider,

    /// Shorthand for --provider ollama with the local default base URL
    #[arg(long)]
    local: bool,

    /// Override the provider's default base URL
    #[arg(long)]
    base_url: Option<String>,

    /// Model name
    #[arg(long, default_value = "llama-3.1-8b-instant")]
    model: String,

    /// Path to the SQLite database file
    #[arg(long, default_value = "memory.db")]
    db: PathBuf,

    /// Model context window size, in tokens
    #[arg(long, default_value_t = 8192)]
    context_limit: usize,

    /// Fraction of the context window that triggers a flush
    #[arg(long, default_value_t = 0.70)]
    flush_threshold: f32,

    /// Messages kept verbatim across a flush, for dialogic continuity
    #[arg(long, default_value_t = 4)]
    keep_last_turns: usize,

    /// Run consolidation every N flushes
    #[arg(long, default_value_t = 5)]
    consolidate_every_n_flushes: u64,

    /// Memories retrieved per turn
    #[arg(long, default_value_t = 5)]
    top_k: usize,

    /// Minimum relevance score a retrieved memory must clear
    #[arg(long, default_value_t = 0.01)]
    min_score: f32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let mut cli = Cli::parse();
    if cli.local {
        cli.provider = Provider::Ollama;
        if cli.base_url.is_none() {
            cli.base_url = Some("http://localhost:11434/v1".to_string());
        }
    }

    let (default_base_url, api_key_env) = match cli.provider {
        Provider::Groq => ("https://api.groq.com/openai/v1", "GROQ_API_KEY"),
        Provider::Openai => ("https://api.openai.com/v1", "OPENAI_API_KEY"),
        Provider::Gemini => ("https://generativelanguage.googleapis.com/v1beta/openai", "GEMINI_API_KEY"),
        Provider::Ollama => ("http://localhost:11434/v1", "OLLAMA_API_KEY"),
    };
    let base_url = cli.base_url.clone().unwrap_or_else(|| default_base_url.to_string());
    let api_key = std::env::var(api_key_env).unwrap_or_else(|_| "dummy".to_string());

    if matches!(cli.provider, Provider::Groq) && cli.base_url.is_none() && api_key == "dummy" {
        eprintln!("Error: set GROQ_API_KEY in the environment (or a .env file) to use Groq, or pass --provider.");
        std::process::exit(1);
    }

    println!(
        "{}",
        "Long-Form Memory Agent\nType your messages. Info from turn 1 will be recalled at turn 1000.\n\
         Commands: /memories - show all | /distill - extract memories now | /snapshot - save snapshot | /quit - exit"
            .cyan()
            .bold()
    );

    let llm = OpenAiCompatibleClient::new(base_url, api_key, cli.model);
    let embedder = Box::new(LocalEmbedder);
    let store = Store::open(Some(cli.db), embedder)?;
    let config = AgentConfig {
        context_limit: cli.context_limit,
        flush_threshold: cli.flush_threshold,
        keep_last_turns: cli.keep_last_turns,
        consolidate_every_n_flushes: cli.consolidate_every_n_flushes,
        top_k: cli.top_k,
        min_score: cli.min_score,
        ..Default::default()
    };

    let mut agent = Agent::new(store, llm, config)?;

    loop {
        print!("\n{} ", "You:".green().bold());
        std::io::stdout().flush().ok();

        let mut line = String::new();
        if std::io::stdin().read_line(&mut line).unwrap_or(0) == 0 {
            println!("\n{}", "Goodbye.".dimmed());
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match input.to_lowercase().as_str() {
            "/quit" => {
                println!("{}", "Goodbye.".dimmed());
                break;
            }
            "/memories" => {
                show_memories(&agent)?;
                continue;
            }
            "/distill" => {
                distill_memories(&mut agent).await?;
                continue;
            }
            "/snapshot" => {
                let path = agent.save_snapshot()?;
                println!("{}", format!("Snapshot written to {}", path.display()).green());
                continue;
            }
            _ => {}
        }

        let outcome = agent.chat(input).await?;

        let mut meta = vec![
            format!("Turn {}", outcome.turn_id),
            format!("Ctx: {:.0}%", outcome.context_utilization * 100.0),
            format!("Mems: {}", outcome.total_memories),
        ];
        if outcome.flush_triggered {
            meta.push("FLUSH".to_string());
        }

        println!("\n{} {}", "Assistant:".blue().bold(), outcome.response);
        if !outcome.active_memories.is_empty() {
            let mem_line = outcome
                .active_memories
                .iter()
                .map(|m| format!("{} (t{})", m.content, m.origin_turn))
                .collect::<Vec<_>>()
                .join(" | ");
            println!("  {}", mem_line.dimmed());
        }
        println!("{}", meta.join(" | ").dimmed());
    }

    Ok(())
}

async fn distill_memories<C: longmem_core::LlmClient>(agent: &mut Agent<C>) -> anyhow::Result<()> {
    let (added, total) = agent.manual_distill().await?;
    if added == 0 {
        println!("{}", "No messages to distill yet.".yellow());
    } else {
        println!("{}", format!("Distillation complete. {added} memories extracted.").green());
        println!("{}", format!("Total active memories: {total}").dimmed());
    }
    Ok(())
}

fn show_memories<C: longmem_core::LlmClient>(agent: &Agent<C>) -> anyhow::Result<()> {
    let memories = agent.get_all_memories()?;
    if memories.is_empty() {
        println!("{}", "No memories stored yet.".dimmed());
        return Ok(());
    }

    println!("{:<12} {:<12} {:<24} {:<36} {:>6} {:>6}", "ID", "Type", "Key", "Value", "Turn", "Conf");
    for m in &memories {
        let id_short: String = m.id.chars().take(8).collect();
        println!(
            "{:<12} {:<12} {:<24} {:<36} {:>6} {:>6.2}",
            id_short,
            m.r#type.to_string(),
            m.key,
            m.value.chars().take(36).collect::<String>(),
            m.source_turn,
            m.confidence,
        );
    }
    Ok(())
}
