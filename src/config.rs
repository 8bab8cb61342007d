use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::camera::DEFAULT_PRIMARY_CAMERA;
use crate::media::{DEFAULT_JPEG_QUALITY, DEFAULT_MEDIA_ROOT};

const DEFAULT_STORE_PATH: &str = "frame_collector.db";
const DEFAULT_DEVICE_URL: &str = "stub://basler";
const DEFAULT_GRAB_TIMEOUT_MS: u64 = 1000;
const DEFAULT_REOPEN_DELAY_MS: u64 = 1000;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
const DEFAULT_LIVE_TTL_SECS: u64 = 60;
const DEFAULT_EXPORT_OWNER: usize = 0;
const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 300;
const DEFAULT_HEALTH_LOG_SECS: u64 = 30;

#[derive(Debug, Deserialize, Default)]
struct CollectorConfigFile {
    media_root: Option<PathBuf>,
    store_path: Option<String>,
    camera: Option<CameraConfigFile>,
    session: Option<SessionConfigFile>,
    live: Option<LiveConfigFile>,
    export: Option<ExportConfigFile>,
    health_log_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device_url: Option<String>,
    primary_name: Option<String>,
    ordinals: Option<Vec<usize>>,
    grab_timeout_ms: Option<u64>,
    reopen_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SessionConfigFile {
    poll_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct LiveConfigFile {
    ttl_secs: Option<u64>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct ExportConfigFile {
    owner_ordinal: Option<usize>,
    upload_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub media_root: PathBuf,
    pub store_path: String,
    pub camera: CameraSettings,
    pub poll_interval: Duration,
    pub live: LiveSettings,
    pub export: ExportSettings,
    pub health_log_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub device_url: String,
    pub primary_name: String,
    pub ordinals: Vec<usize>,
    pub grab_timeout: Duration,
    pub reopen_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct LiveSettings {
    pub ttl: Duration,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone)]
pub struct ExportSettings {
    pub owner_ordinal: usize,
    pub upload_timeout: Duration,
}

impl CollectorConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("FRAME_COLLECTOR_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CollectorConfigFile) -> Self {
        let camera = file.camera.unwrap_or_default();
        let session = file.session.unwrap_or_default();
        let live = file.live.unwrap_or_default();
        let export = file.export.unwrap_or_default();
        Self {
            media_root: file
                .media_root
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MEDIA_ROOT)),
            store_path: file
                .store_path
                .unwrap_or_else(|| DEFAULT_STORE_PATH.to_string()),
            camera: CameraSettings {
                device_url: camera
                    .device_url
                    .unwrap_or_else(|| DEFAULT_DEVICE_URL.to_string()),
                primary_name: camera
                    .primary_name
                    .unwrap_or_else(|| DEFAULT_PRIMARY_CAMERA.to_string()),
                ordinals: camera.ordinals.unwrap_or_else(|| vec![0]),
                grab_timeout: Duration::from_millis(
                    camera.grab_timeout_ms.unwrap_or(DEFAULT_GRAB_TIMEOUT_MS),
                ),
                reopen_delay: Duration::from_millis(
                    camera.reopen_delay_ms.unwrap_or(DEFAULT_REOPEN_DELAY_MS),
                ),
            },
            poll_interval: Duration::from_secs(
                session
                    .poll_interval_secs
                    .unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
            ),
            live: LiveSettings {
                ttl: Duration::from_secs(live.ttl_secs.unwrap_or(DEFAULT_LIVE_TTL_SECS)),
                jpeg_quality: live.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            },
            export: ExportSettings {
                owner_ordinal: export.owner_ordinal.unwrap_or(DEFAULT_EXPORT_OWNER),
                upload_timeout: Duration::from_secs(
                    export
                        .upload_timeout_secs
                        .unwrap_or(DEFAULT_UPLOAD_TIMEOUT_SECS),
                ),
            },
            health_log_interval: Duration::from_secs(
                file.health_log_secs.unwrap_or(DEFAULT_HEALTH_LOG_SECS),
            ),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(root) = std::env::var("FRAME_COLLECTOR_MEDIA_ROOT") {
            if !root.trim().is_empty() {
                self.media_root = PathBuf::from(root);
            }
        }
        if let Ok(path) = std::env::var("FRAME_COLLECTOR_STORE_PATH") {
            if !path.trim().is_empty() {
                self.store_path = path;
            }
        }
        if let Ok(url) = std::env::var("FRAME_COLLECTOR_DEVICE_URL") {
            if !url.trim().is_empty() {
                self.camera.device_url = url;
            }
        }
        if let Ok(name) = std::env::var("FRAME_COLLECTOR_PRIMARY_CAMERA") {
            if !name.trim().is_empty() {
                self.camera.primary_name = name;
            }
        }
        if let Ok(cameras) = std::env::var("FRAME_COLLECTOR_CAMERAS") {
            let parsed = split_csv(&cameras)
                .iter()
                .map(|entry| entry.parse::<usize>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| {
                    anyhow!("FRAME_COLLECTOR_CAMERAS must be a comma-separated list of ordinals")
                })?;
            if !parsed.is_empty() {
                self.camera.ordinals = parsed;
            }
        }
        if let Ok(poll) = std::env::var("FRAME_COLLECTOR_POLL_SECS") {
            let seconds: u64 = poll.parse().map_err(|_| {
                anyhow!("FRAME_COLLECTOR_POLL_SECS must be an integer number of seconds")
            })?;
            self.poll_interval = Duration::from_secs(seconds);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.camera.ordinals.is_empty() {
            return Err(anyhow!("at least one camera ordinal must be configured"));
        }
        let mut seen = self.camera.ordinals.clone();
        seen.sort_unstable();
        seen.dedup();
        if seen.len() != self.camera.ordinals.len() {
            return Err(anyhow!("camera ordinals must be unique"));
        }
        if !(self.camera.device_url.starts_with("stub://")
            || self.camera.device_url.starts_with("v4l2://"))
        {
            return Err(anyhow!(
                "device_url '{}' must use the stub:// or v4l2:// scheme",
                self.camera.device_url
            ));
        }
        if self.camera.grab_timeout.is_zero() {
            return Err(anyhow!("grab timeout must be greater than zero"));
        }
        if self.poll_interval.is_zero() {
            return Err(anyhow!("poll interval must be greater than zero"));
        }
        if self.live.ttl.is_zero() {
            return Err(anyhow!("live frame ttl must be greater than zero"));
        }
        if !(1..=100).contains(&self.live.jpeg_quality) {
            return Err(anyhow!("jpeg quality must be between 1 and 100"));
        }
        if self.health_log_interval.is_zero() {
            self.health_log_interval = Duration::from_secs(DEFAULT_HEALTH_LOG_SECS);
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<CollectorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployment() -> Result<()> {
        let mut cfg = CollectorConfig::from_file(CollectorConfigFile::default());
        cfg.validate()?;
        assert_eq!(cfg.media_root, PathBuf::from("media"));
        assert_eq!(cfg.camera.primary_name, DEFAULT_PRIMARY_CAMERA);
        assert_eq!(cfg.camera.ordinals, vec![0]);
        assert_eq!(cfg.camera.grab_timeout, Duration::from_millis(1000));
        assert_eq!(cfg.poll_interval, Duration::from_secs(60));
        assert_eq!(cfg.live.ttl, Duration::from_secs(60));
        assert_eq!(cfg.export.owner_ordinal, 0);
        Ok(())
    }

    #[test]
    fn rejects_duplicate_ordinals() {
        let mut cfg = CollectorConfig::from_file(CollectorConfigFile::default());
        cfg.camera.ordinals = vec![0, 1, 0];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_unknown_device_scheme_and_bad_quality() {
        let mut cfg = CollectorConfig::from_file(CollectorConfigFile::default());
        cfg.camera.device_url = "rtsp://cam".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = CollectorConfig::from_file(CollectorConfigFile::default());
        cfg.live.jpeg_quality = 0;
        assert!(cfg.validate().is_err());
    }
}
