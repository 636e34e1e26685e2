use anyhow::{Context, Result};
use clap::Args;

use super::connect;
use crate::cli::output::get_formatter;
use crate::models::{Config, OutputFormat};

#[derive(Debug, Args)]
pub struct SearchArgs {
    #[arg(help = "Knowledge base id or name")]
    pub base: String,

    #[arg(required = true, help = "Search query text")]
    pub query: String,

    #[arg(long, short = 'n', help = "Maximum number of results to return")]
    pub limit: Option<u32>,

    #[arg(long, help = "Minimum similarity score threshold (0.0-1.0)")]
    pub min_score: Option<f32>,
}

pub async fn handle_search(args: SearchArgs, format: OutputFormat, verbose: bool) -> Result<()> {
    let query = args.query.trim();
    if query.is_empty() {
        anyhow::bail!("search query cannot be empty");
    }

    let config = Config::load()?;
    let formatter = get_formatter(format);

    let limit = args.limit.unwrap_or(config.search.default_limit);
    if limit == 0 {
        anyhow::bail!("limit must be at least 1");
    }

    let min_score = args.min_score.or(config.search.default_min_score);
    if let Some(score) = min_score
        && !(0.0..=1.0).contains(&score)
    {
        anyhow::bail!("min_score must be between 0.0 and 1.0");
    }

    if verbose {
        eprintln!("Query: \"{query}\"");
        eprintln!("  Limit: {limit}");
        if let Some(score) = min_score {
            eprintln!("  Min score: {score:.3}");
        }
    }

    let service = connect(&config).await?;
    let results = service
        .search(&args.base, query, u64::from(limit), min_score)
        .await
        .context("search failed")?;

    if verbose {
        eprintln!("  Query tokens: {}", results.query_tokens);
        eprintln!("  Total: {}ms\n", results.duration_ms);
    }

    print!("{}", formatter.format_search_results(&results));

    Ok(())
}
