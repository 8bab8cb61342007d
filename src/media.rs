//! On-disk media layout.
//!
//! ```text
//! <root>/archive/cam{id}/{unix_secs}.{micros}.png        per-frame archive while recording
//! <root>/dataset/{id}/{dd_mm_yyyy}/{dd_mm_yyyy_HH_MM_SS_micros}.jpg   one snapshot per poll tick
//! <root>/archive.export-{tag}/cam{id}/...                archive handed to an export
//! <root>/parquet/archive.export-{tag}/                   export intermediate output
//! ```
//!
//! Camera directories are disjoint per display id. The archive root is shared
//! by every camera; an export renames it to a staging directory and consumes
//! only that.

use anyhow::{Context, Result};
use chrono::{DateTime, Local, TimeZone, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use std::fs;
use std::path::{Path, PathBuf};

use crate::camera::{CameraIdentity, FrameSample};

pub const DEFAULT_MEDIA_ROOT: &str = "media";
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

#[derive(Clone, Debug)]
pub struct MediaLayout {
    root: PathBuf,
}

impl MediaLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn archive_root(&self) -> PathBuf {
        self.root.join("archive")
    }

    pub fn camera_archive(&self, identity: CameraIdentity) -> PathBuf {
        self.archive_root().join(identity.to_string())
    }

    pub fn dataset_day_dir(&self, identity: CameraIdentity, day: &DateTime<Local>) -> PathBuf {
        self.root
            .join("dataset")
            .join(identity.display_id().to_string())
            .join(day.format("%d_%m_%Y").to_string())
    }

    pub fn parquet_dir(&self) -> PathBuf {
        self.root.join("parquet")
    }

    /// Where a handed-off archive is moved, keyed by the handoff instant.
    pub fn export_staging_dir(&self, at: &DateTime<Local>) -> PathBuf {
        self.root
            .join(format!("{}{}", EXPORT_STAGING_PREFIX, export_tag(at)))
    }

    /// Per-export output directory, so overlapping exports never share files.
    pub fn export_output_dir(&self, staging: &Path) -> PathBuf {
        let tag = staging
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.parquet_dir().join(tag)
    }

    /// Move the shared archive root to a fresh staging directory.
    ///
    /// From here on the staged batch belongs to the export; cameras that keep
    /// recording start a new archive root. `None` when nothing was archived.
    pub fn stage_archive(&self, at: &DateTime<Local>) -> Result<Option<PathBuf>> {
        let staging = self.export_staging_dir(at);
        match fs::rename(self.archive_root(), &staging) {
            Ok(()) => Ok(Some(staging)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| {
                format!(
                    "stage archive {} as {}",
                    self.archive_root().display(),
                    staging.display()
                )
            }),
        }
    }

    /// Staged archives left behind by exports that did not complete, oldest first.
    pub fn pending_exports(&self) -> Result<Vec<PathBuf>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut pending = Vec::new();
        for entry in fs::read_dir(&self.root)
            .with_context(|| format!("list media root {}", self.root.display()))?
        {
            let entry = entry?;
            let name = entry.file_name();
            if entry.file_type()?.is_dir()
                && name.to_string_lossy().starts_with(EXPORT_STAGING_PREFIX)
            {
                pending.push(entry.path());
            }
        }
        pending.sort();
        Ok(pending)
    }
}

const EXPORT_STAGING_PREFIX: &str = "archive.export-";

fn export_tag(at: &DateTime<Local>) -> String {
    at.format("%Y%m%d_%H%M%S_%6f").to_string()
}

pub fn archive_file_name(at: &DateTime<Local>) -> String {
    format!("{}.{:06}.png", at.timestamp(), at.timestamp_subsec_micros())
}

pub fn snapshot_file_name(at: &DateTime<Local>) -> String {
    format!("{}.jpg", at.format("%d_%m_%Y_%H_%M_%S_%6f"))
}

/// Recover the capture instant from an archive file name.
pub fn parse_archive_file_name(name: &str) -> Option<DateTime<Utc>> {
    let stem = name.strip_suffix(".png")?;
    let (secs, micros) = match stem.split_once('.') {
        Some((secs, frac)) => {
            if frac.is_empty() || frac.len() > 6 || !frac.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let micros: u32 = format!("{:0<6}", frac).parse().ok()?;
            (secs.parse::<i64>().ok()?, micros)
        }
        None => (stem.parse::<i64>().ok()?, 0),
    };
    Utc.timestamp_opt(secs, micros * 1_000).single()
}

/// JPEG-encode a frame. Alpha is dropped; 16-bit images are reduced to 8 bits.
pub fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    match image {
        DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) => image.write_with_encoder(encoder),
        DynamicImage::ImageLuma16(_) | DynamicImage::ImageLumaA8(_) | DynamicImage::ImageLumaA16(_) => {
            DynamicImage::ImageLuma8(image.to_luma8()).write_with_encoder(encoder)
        }
        _ => DynamicImage::ImageRgb8(image.to_rgb8()).write_with_encoder(encoder),
    }
    .context("encode jpeg")?;
    Ok(buf)
}

/// Write the lossless archive copy of a frame into `dir`.
///
/// The directory is recreated if an export staged it away mid-recording.
pub fn write_archive_frame(dir: &Path, sample: &FrameSample) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("create archive dir {}", dir.display()))?;
    let path = dir.join(archive_file_name(&sample.captured_at));
    sample
        .image
        .save_with_format(&path, ImageFormat::Png)
        .with_context(|| format!("write archive frame {}", path.display()))?;
    Ok(path)
}

/// Write an already-encoded snapshot into `dir`, creating it if needed.
pub fn write_snapshot(dir: &Path, captured_at: &DateTime<Local>, jpeg: &[u8]) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("create dataset dir {}", dir.display()))?;
    let path = dir.join(snapshot_file_name(captured_at));
    fs::write(&path, jpeg).with_context(|| format!("write snapshot {}", path.display()))?;
    Ok(path)
}
