use anyhow::Result;
use clap::Parser;
use tokio::signal;

use kbsync::cli::commands::{
    handle_base, handle_config, handle_estimate, handle_import, handle_point, handle_search,
    handle_status, handle_sync,
};
use kbsync::cli::output::get_formatter;
use kbsync::cli::{Cli, Commands};
use kbsync::models::{Config, OutputFormat};
use kbsync::utils::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load().unwrap_or_default();
    let format = cli.format.unwrap_or(config.search.default_format);
    let verbose = cli.verbose;

    init_logging(&config.logging, verbose);

    tokio::select! {
        result = run_command(cli.command, format, verbose) => {
            if let Err(e) = result {
                eprint!("{}", get_formatter(format).format_error(&format!("{e:#}")));
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            eprintln!("\nReceived shutdown signal, stopping...");
        }
    }

    Ok(())
}

async fn run_command(command: Commands, format: OutputFormat, verbose: bool) -> Result<()> {
    match command {
        Commands::Status(args) => handle_status(args, format, verbose).await,
        Commands::Base(cmd) => handle_base(cmd, format, verbose).await,
        Commands::Point(cmd) => handle_point(cmd, format, verbose).await,
        Commands::Import(args) => handle_import(args, format, verbose).await,
        Commands::Sync(args) => handle_sync(args, format, verbose).await,
        Commands::Search(args) => handle_search(args, format, verbose).await,
        Commands::Estimate(args) => handle_estimate(args, format, verbose).await,
        Commands::Config(cmd) => handle_config(cmd, format, verbose).await,
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
