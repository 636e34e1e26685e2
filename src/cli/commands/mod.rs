mod base;
mod config;
mod estimate;
mod import;
mod point;
mod search;
mod status;
mod sync;

pub use base::BaseCommand;
pub use config::ConfigCommand;
pub use estimate::EstimateArgs;
pub use import::ImportArgs;
pub use point::PointCommand;
pub use search::SearchArgs;
pub use status::StatusArgs;
pub use sync::SyncArgs;

pub use base::handle_base;
pub use config::handle_config;
pub use estimate::handle_estimate;
pub use import::handle_import;
pub use point::handle_point;
pub use search::handle_search;
pub use status::handle_status;
pub use sync::handle_sync;

use std::io::{self, Read};
use std::path::Path;

use anyhow::{Context, Result};

use crate::models::{Config, Metadata};
use crate::services::{EmbeddingGenerator, KnowledgeService, VectorIndexManager};
use crate::store::create_store;

/// Wire the store, the embedding generator and the index from configuration.
async fn connect(config: &Config) -> Result<KnowledgeService> {
    let store = create_store(&config.store)
        .await
        .context("failed to open knowledge store")?;
    let generator = EmbeddingGenerator::from_config(&config.embedding)
        .context("failed to create embedding client")?;
    let index = VectorIndexManager::from_config(&config.vector_store)
        .context("failed to create vector store client")?;
    Ok(KnowledgeService::new(store, generator, index))
}

/// Read a file, or stdin when `file` is absent or `-`.
fn read_input(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) if path.to_string_lossy() != "-" => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display())),
        _ => {
            let mut input = String::new();
            io::stdin()
                .read_to_string(&mut input)
                .context("failed to read stdin")?;
            Ok(input)
        }
    }
}

fn parse_metadata(raw: &str) -> Result<Metadata> {
    match serde_json::from_str(raw).context("metadata must be valid JSON")? {
        serde_json::Value::Object(map) => Ok(map),
        _ => anyhow::bail!("metadata must be a JSON object"),
    }
}

fn confirm(prompt: &str) -> Result<bool> {
    eprintln!("{prompt} [y/N]");
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}
