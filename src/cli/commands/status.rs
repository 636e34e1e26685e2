use anyhow::Result;
use clap::Args;

use crate::cli::output::{StatusInfo, get_formatter};
use crate::models::{Config, OutputFormat};
use crate::services::{EmbeddingGenerator, VectorIndexManager};
use crate::store::{KnowledgeStore, create_store};

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Send a probe request to the embedding provider
    #[arg(long)]
    pub probe: bool,
}

async fn probe_embedding(config: &Config) -> String {
    let generator = match EmbeddingGenerator::from_config(&config.embedding) {
        Ok(generator) => generator,
        Err(e) => return format!("failed: {e}"),
    };
    match generator.test_connection().await {
        Ok(dimension) => format!("ok ({dimension} dims)"),
        Err(e) => format!("failed: {e}"),
    }
}

async fn vector_store_status(config: &Config) -> (bool, usize) {
    let Ok(index) = VectorIndexManager::from_config(&config.vector_store) else {
        return (false, 0);
    };
    if !index.health_check().await.unwrap_or(false) {
        return (false, 0);
    }
    match index.list_collections().await {
        Ok(collections) => (true, collections.len()),
        Err(e) => {
            tracing::debug!(error = %e, "listing collections failed");
            (true, 0)
        }
    }
}

async fn store_status(config: &Config) -> (bool, usize) {
    let store = match create_store(&config.store).await {
        Ok(store) => store,
        Err(e) => {
            tracing::debug!(error = %e, "store unreachable");
            return (false, 0);
        }
    };
    if !store.health_check().await.unwrap_or(false) {
        return (false, 0);
    }
    match store.list_bases().await {
        Ok(bases) => (true, bases.len()),
        Err(e) => {
            tracing::debug!(error = %e, "listing knowledge bases failed");
            (true, 0)
        }
    }
}

pub async fn handle_status(args: StatusArgs, format: OutputFormat, _verbose: bool) -> Result<()> {
    let config = Config::load()?;
    let formatter = get_formatter(format);

    let (vector_store_connected, collections) = vector_store_status(&config).await;
    let (store_connected, knowledge_bases) = store_status(&config).await;
    let embedding_probe = if args.probe {
        Some(probe_embedding(&config).await)
    } else {
        None
    };

    let status = StatusInfo {
        embedding_model: config.embedding.model.clone(),
        embedding_url: config.embedding.base_url.clone(),
        embedding_configured: config.embedding.api_key.is_some(),
        embedding_probe,
        vector_store_url: config.vector_store.url.clone(),
        vector_store_connected,
        collections,
        store_driver: config.store.driver.to_string(),
        store_connected,
        knowledge_bases,
    };

    print!("{}", formatter.format_status(&status));

    if !status.embedding_configured {
        eprintln!("\nHint: set OPENAI_API_KEY or [embedding].api_key to enable sync and search.");
    }
    if !vector_store_connected {
        eprintln!("Warning: Qdrant not reachable. Start with: docker compose up -d qdrant");
    }
    if !store_connected {
        eprintln!("Warning: knowledge store not accessible. Check [store] settings.");
    }

    Ok(())
}
