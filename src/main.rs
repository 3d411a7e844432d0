// MIT License
// Copyright (c) 2025 Copydesk Authors

use clap::{Parser, Subcommand};
use std::env;
use std::fs;
use std::process;

mod article;
mod claude;
mod db;
mod feedback;
mod front_matter;
mod ingest;
mod openai;
mod optimize;
mod proofread;
mod similar;
mod worklist;

const DB_NAME: &str = "copydesk.db";
const CFG_DIR: &str = ".config/copydesk";

/// System and user prompts to send to a chat model
#[derive(Debug, Clone, Copy)]
pub struct Prompts {
    pub system: &'static str,
    pub user: &'static str,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum ModelChoice {
    Gpt4o,
    Gpt4oMini,
    ClaudeSonnet,
    ClaudeHaiku,
}

/// Send prompts plus the article body to the chosen chat model
pub fn chat(model: ModelChoice, body: &str, prompts: Prompts) -> anyhow::Result<String> {
    use ModelChoice::*;
    match model {
        Gpt4o => openai::message(openai::CHAT_MODEL_BIG, body, prompts),
        Gpt4oMini => openai::message(openai::CHAT_MODEL_SMALL, body, prompts),
        ClaudeSonnet => claude::message(claude::CHAT_MODEL_BIG, body, prompts),
        ClaudeHaiku => claude::message(claude::CHAT_MODEL_SMALL, body, prompts),
    }
}

// Models keep wrapping JSON in a markdown fence no matter what the system
// prompt says, so peel it off before parsing
pub fn strip_code_fence(s: &str) -> &str {
    let t = s.trim();
    let Some(inner) = t.strip_prefix("```") else {
        return t;
    };
    let inner = match inner.find('\n') {
        Some(i) => &inner[i + 1..],
        None => inner,
    };
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

#[derive(Parser)]
struct Cli {
    /// Sets a custom database path
    #[arg(long, value_name = "PATH")]
    db_path: Option<String>,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse markdown articles into the db and queue them for processing
    Ingest {
        /// The directory with the markdown files
        directory: String,
    },

    /// Review queued articles. Uses a chat model when a key is configured,
    /// the built-in rule engine otherwise
    Proofread {
        /// Only this article instead of the pending queue
        #[clap(long)]
        article: Option<usize>,
        #[clap(long, value_enum, default_value_t = ModelChoice::Gpt4oMini)]
        model: ModelChoice,
    },

    /// Generate title candidates, SEO description, tags and FAQs in one
    /// model call per article
    Optimize {
        /// Only this article instead of the proofread queue
        #[clap(long)]
        article: Option<usize>,
        #[clap(long, value_enum, default_value_t = ModelChoice::Gpt4oMini)]
        model: ModelChoice,
        /// Merge the description and tags into the article file
        #[clap(long)]
        write: bool,
        /// Do no backup the file as a .BAK
        #[clap(long)]
        no_backup: bool,
    },

    /// Embedding based similarity between articles
    Similar {
        #[clap(subcommand)]
        subcommand: similar::Commands,
    },

    /// Record a reviewer verdict on a proofreading issue
    Decide {
        /// The issue id, as shown by proofread
        #[clap(long)]
        issue: usize,
        #[clap(value_enum)]
        verdict: feedback::Verdict,
        #[clap(long)]
        note: Option<String>,
    },

    /// Suppress rules that reviewers keep rejecting
    Tune {
        #[clap(long, default_value_t = feedback::DEFAULT_MIN_DECISIONS)]
        min_decisions: usize,
        #[clap(long, default_value_t = feedback::DEFAULT_MAX_REJECT_RATE)]
        max_reject_rate: f64,
        /// Update the suppression table instead of just reporting
        #[clap(long)]
        apply: bool,
    },

    /// Worklist overview
    Status,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db_path = match cli.db_path {
        Some(db) => db,
        None => {
            let Ok(user_home) = env::var("HOME") else {
                eprintln!("$HOME not set");
                process::exit(1);
            };
            let cfg_dir = format!("{user_home}/{CFG_DIR}");
            fs::create_dir_all(&cfg_dir)?;
            format!("{cfg_dir}/{DB_NAME}")
        }
    };
    match cli.command {
        Commands::Ingest { directory } => ingest::run(&db_path, &directory),
        Commands::Proofread { article, model } => proofread::run(&db_path, model, article),
        Commands::Optimize {
            article,
            model,
            write,
            no_backup,
        } => optimize::run(&db_path, model, article, write, !no_backup),
        Commands::Similar { subcommand } => similar::run(&db_path, subcommand),
        Commands::Decide {
            issue,
            verdict,
            note,
        } => feedback::run_decide(&db_path, issue, verdict, note.as_deref()),
        Commands::Tune {
            min_decisions,
            max_reject_rate,
            apply,
        } => feedback::run_tune(&db_path, min_decisions, max_reject_rate, apply),
        Commands::Status => worklist::run_status(&db_path),
    }
}
