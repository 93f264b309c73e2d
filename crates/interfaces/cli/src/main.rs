mod query_cmds;
mod store_cmds;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ragdesk_config::{AppConfig, DEFAULT_CONFIG_PATH};
use ragdesk_memory::Role;

#[derive(Debug, Parser)]
#[command(
    name = "ragdesk",
    version,
    about = "Document retrieval and durable memory for a tool-calling assistant"
)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List the documents available in the knowledge base.
    Docs,
    /// Retrieve the passages of a knowledge-base document most relevant to a question.
    Query {
        /// File name inside the knowledge base, e.g. `report.md`.
        #[arg(value_name = "DOC")]
        document: String,
        #[arg(value_name = "TEXT")]
        text: String,
        /// Maximum passages to return (defaults to `retrieval.top_k`).
        #[arg(short, long, value_parser = parse_top_k)]
        k: Option<usize>,
    },
    /// Durable key/value facts.
    Fact {
        #[command(subcommand)]
        command: FactCommands,
    },
    /// Append an event to the journal.
    Log {
        action: String,
        target: String,
        #[arg(default_value = "")]
        details: String,
    },
    /// Per-session conversation history.
    History {
        #[command(subcommand)]
        command: HistoryCommands,
    },
}

#[derive(Debug, Subcommand)]
enum FactCommands {
    /// Set a fact, replacing any previous value for the key.
    Set {
        key: String,
        value: String,
        /// Fact store profile (defaults to `memory.profile`).
        #[arg(long)]
        profile: Option<String>,
    },
    /// Print every stored fact.
    List {
        #[arg(long)]
        profile: Option<String>,
        /// Print the facts as the block injected into the assistant prompt.
        #[arg(long)]
        prompt: bool,
    },
}

#[derive(Debug, Subcommand)]
enum HistoryCommands {
    /// Print the persisted turns of a session.
    Show { session: String },
    /// Record a turn; the session is truncated to the configured window.
    Add {
        session: String,
        #[arg(value_parser = parse_role)]
        role: Role,
        content: String,
    },
    /// Delete a session's history.
    Clear {
        session: String,
        #[arg(long)]
        yes: bool,
    },
}

fn parse_role(raw: &str) -> Result<Role, String> {
    raw.parse()
}

fn parse_top_k(raw: &str) -> Result<usize, String> {
    match raw.parse::<usize>() {
        Ok(0) => Err("k must be at least 1".to_string()),
        Ok(k) => Ok(k),
        Err(err) => Err(err.to_string()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.telemetry.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Docs => query_cmds::run_docs(&config)?,
        Commands::Query { document, text, k } => {
            query_cmds::run_query(&config, &document, &text, k).await?
        }
        Commands::Fact { command } => match command {
            FactCommands::Set { key, value, profile } => {
                store_cmds::run_fact_set(&config, profile.as_deref(), &key, &value)?
            }
            FactCommands::List { profile, prompt } => {
                store_cmds::run_fact_list(&config, profile.as_deref(), prompt)?
            }
        },
        Commands::Log {
            action,
            target,
            details,
        } => store_cmds::run_log(&config, &action, &target, &details)?,
        Commands::History { command } => match command {
            HistoryCommands::Show { session } => store_cmds::run_history_show(&config, &session)?,
            HistoryCommands::Add {
                session,
                role,
                content,
            } => store_cmds::run_history_add(&config, &session, role, &content)?,
            HistoryCommands::Clear { session, yes } => {
                store_cmds::run_history_clear(&config, &session, yes)?
            }
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_query_with_explicit_k() {
        let cli = Cli::try_parse_from(["ragdesk", "query", "report.md", "cloud revenue", "-k", "5"])
            .unwrap();
        match cli.command {
            Commands::Query { document, text, k } => {
                assert_eq!(document, "report.md");
                assert_eq!(text, "cloud revenue");
                assert_eq!(k, Some(5));
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
    }

    #[test]
    fn rejects_zero_k() {
        assert!(Cli::try_parse_from(["ragdesk", "query", "report.md", "q", "-k", "0"]).is_err());
        assert!(Cli::try_parse_from(["ragdesk", "query", "report.md", "q", "-k", "x"]).is_err());
    }

    #[test]
    fn parses_history_add_roles() {
        let cli = Cli::try_parse_from(["ragdesk", "history", "add", "s1", "assistant", "hi"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::History {
                command: HistoryCommands::Add { role: Role::Assistant, .. }
            }
        ));
        assert!(Cli::try_parse_from(["ragdesk", "history", "add", "s1", "robot", "hi"]).is_err());
    }

    #[test]
    fn log_details_default_to_empty() {
        let cli = Cli::try_parse_from(["ragdesk", "--config", "x.toml", "log", "buy", "AAPL"]).unwrap();
        match cli.command {
            Commands::Log { details, .. } => assert_eq!(details, ""),
            other => panic!("unexpected command: {other:?}"),
        }
        assert_eq!(cli.config, PathBuf::from("x.toml"));
    }
}
