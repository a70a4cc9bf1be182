mod cli;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use ds_core::config::Config;
use ds_media::{DemuxerOptions, MkvDemuxer};
use ds_server::streamer::{spawn_streamer, StreamerParams, StreamerRegistry};
use tokio_util::sync::CancellationToken;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG if set, otherwise pick defaults from the verbose flag.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "directstream=trace,ds_server=trace,ds_io=debug,ds_media=debug,ds_subtitle=debug,tower_http=debug".to_string()
        } else {
            "directstream=info,ds_server=info,ds_io=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Serve { host, port } => {
            let mut config = Config::load_or_default(cli.config.as_deref());
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(ds_server::start(config))?;
            Ok(())
        }
        Commands::Probe { file } => probe_file(&file, cli.config.as_deref()),
        Commands::Subtitles { file, offset } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(dump_subtitles(&file, offset, cli.config.as_deref()))
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("directstream {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn demuxer_options(config_path: Option<&Path>) -> DemuxerOptions {
    let config = Config::load_or_default(config_path);
    DemuxerOptions {
        attachment_inline_limit: config.stream.attachment_inline_limit,
        ..DemuxerOptions::default()
    }
}

fn probe_file(file: &Path, config_path: Option<&Path>) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }

    let reader = std::io::BufReader::new(std::fs::File::open(file)?);
    let demuxer = MkvDemuxer::open(reader, demuxer_options(config_path))
        .map_err(ds_core::Error::from)?;
    let metadata = demuxer.into_metadata();

    println!("{}", serde_json::to_string_pretty(&metadata)?);
    Ok(())
}

async fn dump_subtitles(file: &Path, offset: u64, config_path: Option<&Path>) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }
    let config = Config::load_or_default(config_path);

    let reader = Box::new(std::fs::File::open(file)?);
    let registry = Arc::new(StreamerRegistry::new());
    let scope = CancellationToken::new();
    let (tx, mut rx) = tokio::sync::mpsc::channel(64);
    let params = StreamerParams {
        start_offset: offset,
        backoff: if offset > 0 {
            config.stream.subtitle_backoff_bytes
        } else {
            0
        },
        demuxer: demuxer_options(config_path),
        metadata: None,
    };

    if spawn_streamer(&registry, &scope, reader, params, tx).is_none() {
        anyhow::bail!("Subtitle streamer could not be started");
    }

    let mut count = 0usize;
    while let Some(event) = rx.recv().await {
        println!("{}", serde_json::to_string(&event)?);
        count += 1;
    }
    tracing::info!("Extracted {count} subtitle events");
    Ok(())
}

fn validate_config(config_path: Option<&Path>) -> Result<()> {
    let Some(path) = config_path else {
        println!("No config file specified; defaults are valid.");
        return Ok(());
    };

    let contents = std::fs::read_to_string(path)?;
    let config = Config::from_json(&contents)?;
    let warnings = config.validate();
    if warnings.is_empty() {
        println!("Configuration is valid.");
    } else {
        for warning in &warnings {
            println!("warning: {warning}");
        }
    }
    Ok(())
}
