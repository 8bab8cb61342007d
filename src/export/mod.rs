//! Export of finished recordings.
//!
//! When a recording window expires, the designated owner camera renames the
//! shared archive to a staging directory and hands that off to a detached
//! worker which:
//! 1. Converts the archived frames into a Parquet artifact
//! 2. Uploads the artifact to the trigger's destination
//! 3. Deletes the staged archive and its intermediate output
//!
//! The acquisition loop never waits on, or learns about, the outcome.
//! Failures are logged by the worker; the archive is left in place so the
//! export can be re-run with `export_dataset`.

use anyhow::{Context, Result};
use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::trigger::Destination;

pub mod columnar;
pub mod upload;

pub use upload::{HttpUploader, Uploader};

/// Everything a worker needs to export one recording.
#[derive(Clone, Debug)]
pub struct ExportJob {
    pub archive_dir: PathBuf,
    pub output_dir: PathBuf,
    pub destination: Destination,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ExportSummary {
    pub artifact: Option<PathBuf>,
}

/// Receives completed recordings. Implementations must return promptly.
pub trait ExportHandoff: Send + Sync {
    fn hand_off(&self, job: ExportJob);
}

/// Runs each export on its own detached thread.
pub struct DetachedExport {
    uploader: Arc<dyn Uploader>,
}

impl DetachedExport {
    pub fn new(uploader: Arc<dyn Uploader>) -> Self {
        Self { uploader }
    }
}

impl ExportHandoff for DetachedExport {
    fn hand_off(&self, job: ExportJob) {
        let uploader = self.uploader.clone();
        let spawned = std::thread::Builder::new()
            .name("dataset-export".to_string())
            .spawn(move || {
                log::info!(
                    "export started: {} -> {}",
                    job.archive_dir.display(),
                    job.destination.url
                );
                match create_and_upload(
                    &job.archive_dir,
                    &job.output_dir,
                    &job.destination,
                    uploader.as_ref(),
                ) {
                    Ok(summary) => log::info!(
                        "export finished ({})",
                        match &summary.artifact {
                            Some(path) => path.display().to_string(),
                            None => "empty archive".to_string(),
                        }
                    ),
                    Err(err) => log::error!("export failed: {:#}", err),
                }
            });
        if let Err(err) = spawned {
            log::error!("failed to spawn export worker: {}", err);
        }
    }
}

/// Convert, upload, then delete `archive_dir` and `output_dir`.
///
/// Directories are only removed once the upload has succeeded.
pub fn create_and_upload(
    archive_dir: &Path,
    output_dir: &Path,
    destination: &Destination,
    uploader: &dyn Uploader,
) -> Result<ExportSummary> {
    let artifact = columnar::write_dataset(archive_dir, output_dir, &Local::now())?;
    if let Some(path) = &artifact {
        uploader.upload(path, destination)?;
    } else {
        log::warn!(
            "archive {} holds no frames; nothing to upload",
            archive_dir.display()
        );
    }

    remove_dir_if_present(archive_dir)?;
    remove_dir_if_present(output_dir)?;
    Ok(ExportSummary { artifact })
}

fn remove_dir_if_present(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("remove {}", dir.display())),
    }
}
