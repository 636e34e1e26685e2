pub mod cli;
pub mod error;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

pub use cli::{Cli, Commands};
pub use models::{Config, OutputFormat};
pub use services::{KnowledgeService, SyncOrchestrator};
