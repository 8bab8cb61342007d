//! export_dataset - re-run exports by hand.
//!
//! Converts staged archives to Parquet and uploads them in the foreground,
//! exactly as the collector's detached worker does. Without `--archive`,
//! every staged archive left behind by a failed export is retried, oldest
//! first.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use frame_collector::{create_and_upload, Destination, HttpUploader, MediaLayout};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Package staged dataset archives as Parquet and upload them"
)]
struct Args {
    /// Media root of the collector.
    #[arg(long, env = "FRAME_COLLECTOR_MEDIA_ROOT", default_value = "media")]
    media_root: PathBuf,

    /// Export only this archive directory.
    #[arg(long)]
    archive: Option<PathBuf>,

    #[arg(long, env = "FRAME_COLLECTOR_UPLOAD_URL")]
    url: String,

    #[arg(long, env = "FRAME_COLLECTOR_UPLOAD_USER")]
    username: String,

    #[arg(long, env = "FRAME_COLLECTOR_UPLOAD_PASSWORD", hide_env_values = true)]
    password: String,

    #[arg(long, default_value_t = 300)]
    timeout_secs: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let layout = MediaLayout::new(args.media_root);
    let archives = match args.archive {
        Some(archive) => vec![archive],
        None => layout.pending_exports()?,
    };
    if archives.is_empty() {
        log::info!("no staged archives under {}", layout.root().display());
        return Ok(());
    }

    let destination = Destination::new(args.url, args.username, args.password);
    let uploader = HttpUploader::new(Duration::from_secs(args.timeout_secs));

    let mut failed = 0usize;
    for archive in &archives {
        match create_and_upload(
            archive,
            &layout.export_output_dir(archive),
            &destination,
            &uploader,
        )
        .with_context(|| format!("export {}", archive.display()))
        {
            Ok(summary) => match summary.artifact {
                Some(path) => log::info!("uploaded {} to {}", path.display(), destination.url),
                None => log::info!("archive {} was empty; nothing uploaded", archive.display()),
            },
            Err(err) => {
                failed += 1;
                log::error!("{:#}", err);
            }
        }
    }

    if failed > 0 {
        return Err(anyhow!("{} of {} exports failed", failed, archives.len()));
    }
    Ok(())
}
