//! CLI command implementations

pub mod error;
pub mod export;

pub use error::CliError;
pub use export::{Cli, Commands, ExportArgs, ExportSettings, OutputFormat};
