//! Utility modules.

pub mod logging;
pub mod text;

pub use logging::init_logging;
pub use text::{single_line, truncate_chars};
