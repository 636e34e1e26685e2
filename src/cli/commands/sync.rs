use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};

use super::connect;
use crate::cli::output::get_formatter;
use crate::models::{Config, OutputFormat};
use crate::services::SyncOrchestrator;

const SPINNER_TEMPLATE: &str = "{spinner:.cyan} {msg} [{elapsed}]";

#[derive(Debug, Args)]
pub struct SyncArgs {
    #[arg(help = "Knowledge base id or name")]
    pub base: String,

    #[arg(long, short = 'b', help = "Points per embedding request (overrides [sync].batch_size)")]
    pub batch_size: Option<usize>,
}

fn spinner(message: String) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template(SPINNER_TEMPLATE) {
        spinner.set_style(style);
    }
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner
}

pub async fn handle_sync(args: SyncArgs, format: OutputFormat, _verbose: bool) -> Result<()> {
    let config = Config::load()?;
    let formatter = get_formatter(format);
    let service = connect(&config).await?;

    let base = service.resolve_base(&args.base).await?;
    let orchestrator = SyncOrchestrator::new(
        service.store().clone(),
        service.generator().clone(),
        service.index().clone(),
        args.batch_size.unwrap_or(config.sync.batch_size),
    )?;

    let progress = spinner(format!(
        "Syncing {} pending points of \"{}\"",
        base.pending_points(),
        base.name
    ));
    let result = orchestrator.sync(&base.id).await;
    progress.finish_and_clear();

    let result = result.with_context(|| format!("sync of \"{}\" failed", base.name))?;
    print!("{}", formatter.format_sync_result(&result));

    if !result.is_clean() {
        anyhow::bail!(
            "{} of {} points failed to sync; rerun to retry them",
            result.error_count,
            result.total_pending
        );
    }

    Ok(())
}
