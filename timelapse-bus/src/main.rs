use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context as _;
use clap::Parser;
use timelapse_bus::palette::{decode_board, encode_png, palette_swatch};
use timelapse_bus::stage::CanvasClient;

/// Downloads one canvas backup and renders it to a PNG.
#[derive(Parser, Debug)]
#[command(name = "render-snapshot", version)]
struct Cli {
    /// Commit hash of the backup to render.
    commit_hash: String,

    /// Output PNG path.
    #[arg(short, long, default_value = "./place.png")]
    output: PathBuf,

    /// Base URL the backups are served from.
    #[arg(
        short,
        long = "base-url",
        default_value = "https://raw.githubusercontent.com/rplacetk/canvas1/"
    )]
    base_url: String,

    /// Write the palette as a grid of colour blocks instead of the canvas.
    #[arg(short, long)]
    palette: bool,
}

fn init_logging() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();
    let started = Instant::now();

    let client = CanvasClient::new(reqwest::Client::new(), &cli.base_url);
    let metadata = client.metadata(&cli.commit_hash).await?;
    let palette = metadata.palette()?;
    let board = client.board(&cli.commit_hash).await?;
    log::info!(
        "fetched {} ({}x{}, {} colours) in {:?}",
        cli.commit_hash,
        metadata.width,
        metadata.height,
        palette.len(),
        started.elapsed()
    );

    let image = if cli.palette {
        palette_swatch(&palette)
    } else {
        decode_board(&board, metadata.width, metadata.height, &palette)?
    };
    tokio::fs::write(&cli.output, encode_png(&image)?)
        .await
        .with_context(|| format!("writing {}", cli.output.display()))?;
    log::info!("wrote {}", cli.output.display());

    log::info!("done in {:?}", started.elapsed());
    Ok(())
}
