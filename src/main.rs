//! Command-line entry point: read a `.torrent` file, announce to its
//! trackers, and leech the content to disk.
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use rstc::bencode;
use rstc::client::Supervisor;
use rstc::torrent::Metainfo;

/// A minimal BitTorrent leech client.
#[derive(Parser, Debug)]
#[command(name = "rstc", version, about)]
struct Cli {
    /// Path to the .torrent file to download.
    torrent: PathBuf,

    /// Destination path for the downloaded content.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Local TCP port advertised to trackers.
    #[arg(long, default_value_t = 6881)]
    port: u16,

    /// Increase log verbosity (repeatable).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all but error-level logging.
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "download failed");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(cli: &Cli) {
    let default_directive = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let data = std::fs::read(&cli.torrent)?;
    let decoded = bencode::decode(&data)?;
    let metainfo = Metainfo::parse(&decoded)?;

    let output_path = cli
        .output
        .unwrap_or_else(|| PathBuf::from(metainfo.output_name()));

    tracing::info!(
        name = metainfo.output_name(),
        info_hash = hex::encode(metainfo.info_hash()),
        pieces = metainfo.num_pieces(),
        size = metainfo.total_length(),
        "starting download"
    );

    let supervisor = Supervisor::new(metainfo, output_path, cli.port);

    supervisor
        .run(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("received interrupt, shutting down");
            }
        })
        .await?;

    Ok(())
}
