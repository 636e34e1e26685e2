//! Command-line surface over the knowledge service and the sync engine.

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};

use crate::models::OutputFormat;

/// Keep knowledge bases in sync with their vector collections.
#[derive(Debug, Parser)]
#[command(name = "kbsync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[arg(
        long,
        short = 'f',
        global = true,
        help = "Output format: text, json, or markdown"
    )]
    pub format: Option<OutputFormat>,

    #[arg(long, short = 'v', global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Check embedding provider, vector store and knowledge store
    Status(commands::StatusArgs),

    /// Manage knowledge bases
    #[command(subcommand)]
    Base(commands::BaseCommand),

    /// Manage points of a knowledge base
    #[command(subcommand)]
    Point(commands::PointCommand),

    /// Import points from JSON/JSONL
    Import(commands::ImportArgs),

    /// Embed and index the pending points of a knowledge base
    Sync(commands::SyncArgs),

    /// Semantic search over a synced knowledge base
    Search(commands::SearchArgs),

    /// Count tokens and estimate embedding cost for a text
    Estimate(commands::EstimateArgs),

    /// Manage configuration
    #[command(subcommand)]
    Config(commands::ConfigCommand),
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["kbsync", "sync", "faq", "-f", "json", "-v"]).unwrap();
        assert_eq!(cli.format, Some(OutputFormat::Json));
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Sync(ref args) if args.base == "faq"));
    }

    #[test]
    fn test_parse_point_list() {
        let cli = Cli::try_parse_from(["kbsync", "point", "list", "faq", "--search", "fee"])
            .unwrap();
        match cli.command {
            Commands::Point(commands::PointCommand::List {
                page,
                page_size,
                search,
                ..
            }) => {
                assert_eq!((page, page_size), (1, 50));
                assert_eq!(search.as_deref(), Some("fee"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
