use std::path::PathBuf;

use anyhow::Result;
use clap::Subcommand;

use super::{confirm, connect, parse_metadata, read_input};
use crate::cli::output::get_formatter;
use crate::models::{Config, NewKnowledgePoint, OutputFormat, PointQuery};

#[derive(Debug, Subcommand)]
pub enum PointCommand {
    #[command(about = "Add a point to a knowledge base")]
    Add {
        #[arg(help = "Knowledge base id or name")]
        base: String,
        #[arg(help = "Point content (read from --file or stdin if omitted)")]
        content: Option<String>,
        #[arg(long, help = "Read content from a file (use - for stdin)")]
        file: Option<PathBuf>,
        #[arg(long, short = 'm', help = "Metadata as a JSON object")]
        metadata: Option<String>,
    },
    #[command(about = "List points of a knowledge base")]
    List {
        #[arg(help = "Knowledge base id or name")]
        base: String,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 50)]
        page_size: u32,
        #[arg(long, short = 's', help = "Filter by content or metadata substring")]
        search: Option<String>,
    },
    #[command(about = "Show one point")]
    Show {
        #[arg(help = "Point id")]
        id: String,
    },
    #[command(about = "Edit a point; it is re-embedded on the next sync")]
    Edit {
        #[arg(help = "Point id")]
        id: String,
        #[arg(long, short = 'c', help = "New content")]
        content: Option<String>,
        #[arg(long, short = 'm', help = "New metadata as a JSON object")]
        metadata: Option<String>,
    },
    #[command(about = "Delete a point and its vector")]
    Delete {
        #[arg(help = "Point id")]
        id: String,
        #[arg(long, short = 'y', help = "Skip confirmation prompt")]
        yes: bool,
    },
}

pub async fn handle_point(cmd: PointCommand, format: OutputFormat, _verbose: bool) -> Result<()> {
    let config = Config::load()?;
    let formatter = get_formatter(format);
    let service = connect(&config).await?;

    match cmd {
        PointCommand::Add {
            base,
            content,
            file,
            metadata,
        } => {
            let content = match content {
                Some(content) => content,
                None => read_input(file.as_deref())?,
            };
            let metadata = metadata.as_deref().map(parse_metadata).transpose()?;

            let point = NewKnowledgePoint::new(content).with_metadata(metadata.unwrap_or_default());
            let created = service.add_point(&base, point).await?;
            print!("{}", formatter.format_point(&created));
        }
        PointCommand::List {
            base,
            page,
            page_size,
            search,
        } => {
            if page == 0 || page_size == 0 {
                anyhow::bail!("page and page size must be at least 1");
            }
            let query = PointQuery {
                page,
                page_size,
                search,
            };
            let points = service.list_points(&base, &query).await?;
            print!("{}", formatter.format_points(&points));
        }
        PointCommand::Show { id } => {
            let point = service.get_point(&id).await?;
            print!("{}", formatter.format_point(&point));
        }
        PointCommand::Edit {
            id,
            content,
            metadata,
        } => {
            if content.is_none() && metadata.is_none() {
                anyhow::bail!("nothing to change: pass --content and/or --metadata");
            }
            let metadata = metadata.as_deref().map(parse_metadata).transpose()?;
            let point = service
                .update_point(&id, content.as_deref(), metadata)
                .await?;
            print!("{}", formatter.format_point(&point));
        }
        PointCommand::Delete { id, yes } => {
            if !yes && !confirm(&format!("Delete point {id}?"))? {
                print!("{}", formatter.format_message("Cancelled."));
                return Ok(());
            }
            service.delete_point(&id).await?;
            print!("{}", formatter.format_message(&format!("Deleted point {id}")));
        }
    }

    Ok(())
}
