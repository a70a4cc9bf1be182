use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "directstream")]
#[command(author, version, about = "Direct streaming engine with live subtitle extraction")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the streaming server
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Parse a Matroska file and print its metadata as JSON
    Probe {
        /// File to probe
        #[arg(required = true)]
        file: PathBuf,
    },

    /// Extract subtitle events from a Matroska file as JSON lines
    Subtitles {
        /// File to read
        #[arg(required = true)]
        file: PathBuf,

        /// Byte offset to resynchronise from
        #[arg(long, default_value = "0")]
        offset: u64,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
