//! Archive-to-Parquet conversion.
//!
//! Schema:
//! ```text
//! camera       (utf8)          archive subdirectory, e.g. "cam1"
//! file_name    (utf8)
//! captured_at  (timestamp µs)  parsed from the file name
//! width        (u32)
//! height       (u32)
//! image        (binary)        PNG bytes as archived
//! ```
//!
//! Rows are written in batches so a long recording is never held in memory
//! at once.

use anyhow::{Context, Result};
use arrow::array::{BinaryArray, StringArray, TimestampMicrosecondArray, UInt32Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Local};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::media::parse_archive_file_name;

const ROWS_PER_BATCH: usize = 64;

struct ArchivedImage {
    camera: String,
    file_name: String,
    captured_at_us: i64,
    path: PathBuf,
}

pub fn dataset_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("camera", DataType::Utf8, false),
        Field::new("file_name", DataType::Utf8, false),
        Field::new(
            "captured_at",
            DataType::Timestamp(TimeUnit::Microsecond, None),
            false,
        ),
        Field::new("width", DataType::UInt32, false),
        Field::new("height", DataType::UInt32, false),
        Field::new("image", DataType::Binary, false),
    ]))
}

pub fn artifact_name(created_at: &DateTime<Local>) -> String {
    format!("dataset_{}.parquet", created_at.format("%d_%m_%Y_%H_%M_%S"))
}

/// Convert every archived image under `archive_dir` into one Parquet file in
/// `output_dir`. Returns `None` when there is nothing to convert.
pub fn write_dataset(
    archive_dir: &Path,
    output_dir: &Path,
    created_at: &DateTime<Local>,
) -> Result<Option<PathBuf>> {
    let images = collect_images(archive_dir)?;
    if images.is_empty() {
        return Ok(None);
    }

    fs::create_dir_all(output_dir)
        .with_context(|| format!("create export dir {}", output_dir.display()))?;
    let path = output_dir.join(artifact_name(created_at));
    let file =
        File::create(&path).with_context(|| format!("create artifact {}", path.display()))?;

    let schema = dataset_schema();
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(file, schema.clone(), Some(props))
        .context("open parquet writer")?;

    for chunk in images.chunks(ROWS_PER_BATCH) {
        let batch = build_batch(&schema, chunk)?;
        writer.write(&batch).context("write parquet batch")?;
    }
    writer.close().context("finish parquet file")?;

    log::info!(
        "dataset artifact {} written ({} images)",
        path.display(),
        images.len()
    );
    Ok(Some(path))
}

fn build_batch(schema: &SchemaRef, images: &[ArchivedImage]) -> Result<RecordBatch> {
    let mut payloads = Vec::with_capacity(images.len());
    let mut widths = Vec::with_capacity(images.len());
    let mut heights = Vec::with_capacity(images.len());
    for img in images {
        let bytes =
            fs::read(&img.path).with_context(|| format!("read {}", img.path.display()))?;
        let (width, height) = image::image_dimensions(&img.path)
            .with_context(|| format!("read dimensions of {}", img.path.display()))?;
        payloads.push(bytes);
        widths.push(width);
        heights.push(height);
    }

    let cameras: StringArray = images.iter().map(|img| Some(img.camera.as_str())).collect();
    let names: StringArray = images
        .iter()
        .map(|img| Some(img.file_name.as_str()))
        .collect();
    let captured: Vec<i64> = images.iter().map(|img| img.captured_at_us).collect();
    let payloads: BinaryArray = payloads.iter().map(|p| Some(p.as_slice())).collect();

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(cameras),
            Arc::new(names),
            Arc::new(TimestampMicrosecondArray::from(captured)),
            Arc::new(UInt32Array::from(widths)),
            Arc::new(UInt32Array::from(heights)),
            Arc::new(payloads),
        ],
    )?;
    Ok(batch)
}

/// Archived PNGs under `cam*` subdirectories, ordered by camera then time.
/// Files that do not follow the archive naming are skipped.
fn collect_images(archive_dir: &Path) -> Result<Vec<ArchivedImage>> {
    if !archive_dir.exists() {
        return Ok(Vec::new());
    }
    let mut images = Vec::new();
    for cam_entry in fs::read_dir(archive_dir)
        .with_context(|| format!("list archive {}", archive_dir.display()))?
    {
        let cam_entry = cam_entry?;
        if !cam_entry.file_type()?.is_dir() {
            continue;
        }
        let camera = cam_entry.file_name().to_string_lossy().into_owned();
        if !camera.starts_with("cam") {
            continue;
        }
        for entry in fs::read_dir(cam_entry.path())? {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let Some(captured_at) = parse_archive_file_name(&file_name) else {
                log::debug!("skipping non-archive file {}", entry.path().display());
                continue;
            };
            images.push(ArchivedImage {
                camera: camera.clone(),
                file_name,
                captured_at_us: captured_at.timestamp_micros(),
                path: entry.path(),
            });
        }
    }
    images.sort_by(|a, b| {
        (a.camera.as_str(), a.captured_at_us).cmp(&(b.camera.as_str(), b.captured_at_us))
    });
    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Array;
    use chrono::TimeZone;
    use image::{DynamicImage, GrayImage};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> Result<()> {
        fs::create_dir_all(dir)?;
        DynamicImage::ImageLuma8(GrayImage::new(width, height)).save(dir.join(name))?;
        Ok(())
    }

    #[test]
    fn empty_archive_produces_no_artifact() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let now = Local.timestamp_opt(1_714_564_800, 0).unwrap();
        assert!(write_dataset(&temp.path().join("missing"), &temp.path().join("out"), &now)?.is_none());
        assert!(!temp.path().join("out").exists());
        Ok(())
    }

    #[test]
    fn converts_all_cameras_into_one_file() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let archive = temp.path().join("archive");
        write_png(&archive.join("cam1"), "1714564802.000001.png", 8, 6)?;
        write_png(&archive.join("cam1"), "1714564801.500000.png", 8, 6)?;
        write_png(&archive.join("cam2"), "1714564801.000000.png", 4, 2)?;
        fs::write(archive.join("cam2").join("notes.txt"), b"ignored")?;

        let now = Local.timestamp_opt(1_714_564_900, 0).unwrap();
        let path = write_dataset(&archive, &temp.path().join("parquet"), &now)?
            .expect("artifact");
        assert_eq!(
            path.file_name().and_then(|n| n.to_str()),
            Some(artifact_name(&now).as_str())
        );

        let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(&path)?)?.build()?;
        let mut cameras = Vec::new();
        let mut widths = Vec::new();
        let mut first_ts = None;
        for batch in reader {
            let batch = batch?;
            let cam_col = batch
                .column(0)
                .as_any()
                .downcast_ref::<StringArray>()
                .expect("camera column");
            let width_col = batch
                .column(3)
                .as_any()
                .downcast_ref::<UInt32Array>()
                .expect("width column");
            let ts_col = batch
                .column(2)
                .as_any()
                .downcast_ref::<TimestampMicrosecondArray>()
                .expect("timestamp column");
            first_ts.get_or_insert(ts_col.value(0));
            for row in 0..batch.num_rows() {
                cameras.push(cam_col.value(row).to_string());
                widths.push(width_col.value(row));
            }
        }
        assert_eq!(cameras, vec!["cam1", "cam1", "cam2"]);
        assert_eq!(widths, vec![8, 8, 4]);
        assert_eq!(first_ts, Some(1_714_564_801_500_000));
        Ok(())
    }
}
