use anyhow::Result;
use clap::Subcommand;

use super::{confirm, connect};
use crate::cli::output::get_formatter;
use crate::models::{Config, OutputFormat};

#[derive(Debug, Subcommand)]
pub enum BaseCommand {
    #[command(about = "Create a knowledge base")]
    Create {
        #[arg(help = "Knowledge base name")]
        name: String,
        #[arg(long, short = 'd', default_value = "", help = "Description")]
        description: String,
        #[arg(long, help = "Vector collection name (derived from the name if omitted)")]
        collection: Option<String>,
    },
    #[command(about = "List knowledge bases")]
    List,
    #[command(about = "Show one knowledge base")]
    Show {
        #[arg(help = "Knowledge base id or name")]
        base: String,
    },
    #[command(about = "Delete a knowledge base, its points and its collection")]
    Delete {
        #[arg(help = "Knowledge base id or name")]
        base: String,
        #[arg(long, short = 'y', help = "Skip confirmation prompt")]
        yes: bool,
    },
}

pub async fn handle_base(cmd: BaseCommand, format: OutputFormat, _verbose: bool) -> Result<()> {
    let config = Config::load()?;
    let formatter = get_formatter(format);
    let service = connect(&config).await?;

    match cmd {
        BaseCommand::Create {
            name,
            description,
            collection,
        } => {
            let base = service
                .create_base(&name, &description, collection.as_deref())
                .await?;
            print!("{}", formatter.format_base(&base));
        }
        BaseCommand::List => {
            let bases = service.list_bases().await?;
            print!("{}", formatter.format_bases(&bases));
        }
        BaseCommand::Show { base } => {
            let base = service.resolve_base(&base).await?;
            print!("{}", formatter.format_base(&base));
        }
        BaseCommand::Delete { base, yes } => {
            let target = service.resolve_base(&base).await?;
            if !yes
                && !confirm(&format!(
                    "This will delete \"{}\", its {} points and collection \"{}\". Continue?",
                    target.name, target.total_points, target.collection_name
                ))?
            {
                print!("{}", formatter.format_message("Cancelled."));
                return Ok(());
            }

            let deleted = service.delete_base(&target.id).await?;
            print!(
                "{}",
                formatter.format_message(&format!("Deleted knowledge base \"{}\"", deleted.name))
            );
        }
    }

    Ok(())
}
