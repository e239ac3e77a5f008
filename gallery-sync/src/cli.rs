use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "gallery-sync",
    version,
    about = "Sync gallery images and their previews to an S3-compatible bucket"
)]
pub struct Cli {
    /// Site directory holding `content/` and `_data/` (overrides GALLERY_SITE_DIR)
    #[arg(long)]
    pub site_dir: Option<PathBuf>,

    /// Number of parallel workers (overrides GALLERY_SYNC_CONCURRENCY)
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,

    /// Log verbosity; RUST_LOG takes precedence when set
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Upload new and changed images, delete orphans, rewrite the metadata index
    Sync,
    /// Write missing `_preview.webp` files next to local originals
    Previews,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl Cli {
    pub fn effective_command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Sync)
    }
}
