//! Synthetic camera driver (`stub://`).
//!
//! Enumerates two fake devices, with the primary camera deliberately listed
//! second so that enumeration normalization is exercised on every open.
//! Frames are generated gray-scale gradients that drift between frames.
//!
//! Fault injection through the URL query:
//! - `fail_every=N`: every Nth grab reports a transport failure
//! - `timeout_every=N`: every Nth grab times out
//! - `width=W`, `height=H`: frame size (default 320x240)

use anyhow::{anyhow, Context, Result};
use rand::Rng;
use std::time::Duration;
use url::Url;

use super::pixel::{self, PixelFormat};
use super::{BackendGrab, CameraBackend, DeviceDriver, DeviceInfo};

const DEFAULT_WIDTH: u32 = 320;
const DEFAULT_HEIGHT: u32 = 240;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyntheticConfig {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub fail_every: Option<u64>,
    pub timeout_every: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            name: "camera".to_string(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            fail_every: None,
            timeout_every: None,
        }
    }
}

pub struct SyntheticDriver {
    config: SyntheticConfig,
    primary_name: String,
}

impl SyntheticDriver {
    pub fn new(config: SyntheticConfig, primary_name: &str) -> Self {
        Self {
            config,
            primary_name: primary_name.to_string(),
        }
    }

    /// Parse `stub://<name>?fail_every=N&timeout_every=N&width=W&height=H`.
    pub fn from_url(device_url: &str, primary_name: &str) -> Result<Self> {
        let url = Url::parse(device_url).context("parse stub device url")?;
        if url.scheme() != "stub" {
            return Err(anyhow!("synthetic driver expects a stub:// url"));
        }
        let mut config = SyntheticConfig {
            name: url.host_str().unwrap_or("camera").to_string(),
            ..SyntheticConfig::default()
        };
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "fail_every" => config.fail_every = Some(parse_positive(&key, &value)?),
                "timeout_every" => config.timeout_every = Some(parse_positive(&key, &value)?),
                "width" => config.width = parse_positive(&key, &value)? as u32,
                "height" => config.height = parse_positive(&key, &value)? as u32,
                other => return Err(anyhow!("unknown stub device option '{}'", other)),
            }
        }
        Ok(Self::new(config, primary_name))
    }
}

fn parse_positive(key: &str, value: &str) -> Result<u64> {
    match value.parse::<u64>() {
        Ok(n) if n > 0 && n <= u32::MAX as u64 => Ok(n),
        _ => Err(anyhow!("stub device option {} must be a positive integer", key)),
    }
}

impl DeviceDriver for SyntheticDriver {
    fn enumerate(&self) -> Result<Vec<DeviceInfo>> {
        Ok(vec![
            DeviceInfo {
                friendly_name: format!("Synthetic {} (00000002)", self.config.name),
                address: format!("stub://{}/1", self.config.name),
            },
            DeviceInfo {
                friendly_name: self.primary_name.clone(),
                address: format!("stub://{}/0", self.config.name),
            },
        ])
    }

    fn create(&self, info: &DeviceInfo) -> Result<Box<dyn CameraBackend>> {
        Ok(Box::new(SyntheticCamera::new(self.config.clone(), info)))
    }
}

struct SyntheticCamera {
    config: SyntheticConfig,
    address: String,
    grabbing: bool,
    open: bool,
    grab_count: u64,
    /// Drifting offset so consecutive frames differ.
    phase: u8,
}

impl SyntheticCamera {
    fn new(config: SyntheticConfig, info: &DeviceInfo) -> Self {
        Self {
            config,
            address: info.address.clone(),
            grabbing: false,
            open: true,
            grab_count: 0,
            phase: 0,
        }
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        let width = self.config.width as usize;
        let height = self.config.height as usize;
        self.phase = self.phase.wrapping_add(rand::thread_rng().gen_range(1..4));

        let mut pixels = vec![0u8; width * height];
        for (row, line) in pixels.chunks_exact_mut(width).enumerate() {
            for (col, pixel) in line.iter_mut().enumerate() {
                *pixel = ((row + col) as u8).wrapping_add(self.phase);
            }
        }
        pixels
    }
}

impl CameraBackend for SyntheticCamera {
    fn start_continuous_capture(&mut self) -> Result<()> {
        if !self.open {
            return Err(anyhow!("{} is closed", self.address));
        }
        self.grabbing = true;
        log::debug!("SyntheticCamera: grabbing on {}", self.address);
        Ok(())
    }

    fn grab(&mut self, _timeout: Duration) -> BackendGrab {
        if !self.grabbing {
            return BackendGrab::Failure(format!("{} is not grabbing", self.address));
        }
        self.grab_count += 1;

        if let Some(n) = self.config.fail_every {
            if self.grab_count % n == 0 {
                return BackendGrab::Failure(format!(
                    "injected failure on grab {}",
                    self.grab_count
                ));
            }
        }
        if let Some(n) = self.config.timeout_every {
            if self.grab_count % n == 0 {
                return BackendGrab::Timeout;
            }
        }

        let pixels = self.generate_pixels();
        match pixel::to_image(
            &pixels,
            self.config.width,
            self.config.height,
            PixelFormat::Mono8,
        ) {
            Ok(image) => BackendGrab::Frame(image),
            Err(err) => BackendGrab::Failure(err.to_string()),
        }
    }

    fn stop(&mut self) {
        self.grabbing = false;
    }

    fn close(&mut self) {
        self.grabbing = false;
        self.open = false;
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
