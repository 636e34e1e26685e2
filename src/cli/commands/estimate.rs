use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use super::read_input;
use crate::cli::output::{EstimateReport, get_formatter};
use crate::models::{Config, OutputFormat};
use crate::services::EmbeddingGenerator;

#[derive(Debug, Args)]
pub struct EstimateArgs {
    /// Text file to estimate (use - or omit for stdin)
    #[arg()]
    pub file: Option<PathBuf>,

    /// Estimate this text instead of reading a file
    #[arg(long, short = 't', conflicts_with = "file")]
    pub text: Option<String>,

    /// Chunk window size in tokens (overrides [chunking].max_tokens)
    #[arg(long)]
    pub max_tokens: Option<usize>,

    /// Tokens shared by consecutive chunks (overrides [chunking].overlap)
    #[arg(long)]
    pub overlap: Option<usize>,
}

pub async fn handle_estimate(args: EstimateArgs, format: OutputFormat, verbose: bool) -> Result<()> {
    let config = Config::load()?;
    let formatter = get_formatter(format);

    let text = match args.text {
        Some(text) => text,
        None => read_input(args.file.as_deref())?,
    };
    let max_tokens = args.max_tokens.unwrap_or(config.chunking.max_tokens);
    let overlap = args.overlap.unwrap_or(config.chunking.overlap);

    let generator = EmbeddingGenerator::from_config(&config.embedding)?;
    if verbose && !generator.tokenizer().is_exact() {
        eprintln!("Note: BPE tokenizer unavailable, token counts are approximate");
    }

    let chunks = generator
        .tokenizer()
        .chunk_text(&text, max_tokens, overlap)
        .context("invalid chunk window")?;

    let report = EstimateReport {
        estimate: generator.estimate(std::slice::from_ref(&text)),
        chunks: chunks.len(),
        chunk_max_tokens: max_tokens,
        chunk_overlap: overlap,
    };

    print!("{}", formatter.format_estimate(&report));

    Ok(())
}
