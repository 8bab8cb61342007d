//! Camera device handles.
//!
//! This module owns the physical camera connection:
//! - Enumerating devices through a `DeviceDriver`
//! - Normalizing enumeration order so a given physical camera always gets the same ordinal
//! - Opening, starting, grabbing, stopping and closing a device
//! - Reopening a device from scratch after a failed grab
//!
//! Drivers:
//! - `stub://` synthetic devices (testing, soak runs without hardware)
//! - `v4l2://` local V4L2 devices (feature: ingest-v4l2)
//!
//! A grab never blocks longer than the timeout passed to `Device::grab`.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};
use image::DynamicImage;
use std::fmt;
use std::time::Duration;

use crate::clock::Clock;

pub(crate) mod pixel;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

pub use synthetic::SyntheticDriver;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Driver;

/// Upper bound on a single grab.
pub const DEFAULT_GRAB_TIMEOUT: Duration = Duration::from_millis(1000);

/// Friendly name of the camera that must always be ordinal 0.
pub const DEFAULT_PRIMARY_CAMERA: &str = "Basler acA1920-40gm (22039069)";

/// Selects one physical camera out of the normalized enumeration.
///
/// The ordinal is 0-based; the display id (used in paths and cache keys) is `ordinal + 1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CameraIdentity {
    ordinal: usize,
}

impl CameraIdentity {
    pub fn new(ordinal: usize) -> Self {
        Self { ordinal }
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn display_id(&self) -> usize {
        self.ordinal + 1
    }
}

impl fmt::Display for CameraIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cam{}", self.display_id())
    }
}

/// One enumerated device as reported by a driver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub friendly_name: String,
    /// Driver-specific address (device node, stub path).
    pub address: String,
}

/// A decoded frame and the wall-clock instant it was grabbed.
///
/// Owned by the acquisition loop for one cycle.
pub struct FrameSample {
    pub image: DynamicImage,
    pub captured_at: DateTime<Local>,
}

/// Outcome of one grab attempt.
pub enum GrabResult {
    Success(FrameSample),
    Timeout,
    /// The transport reported a failed grab. The device must be reopened.
    Failure(String),
}

/// Outcome of one grab at the backend level, before timestamping.
pub enum BackendGrab {
    Frame(DynamicImage),
    Timeout,
    Failure(String),
}

/// A created (but not necessarily started) camera connection.
pub trait CameraBackend: Send {
    fn start_continuous_capture(&mut self) -> Result<()>;

    fn grab(&mut self, timeout: Duration) -> BackendGrab;

    fn stop(&mut self);

    fn close(&mut self);
}

/// Enumerates devices and creates backends for them.
pub trait DeviceDriver: Send {
    fn enumerate(&self) -> Result<Vec<DeviceInfo>>;

    fn create(&self, info: &DeviceInfo) -> Result<Box<dyn CameraBackend>>;
}

/// Puts the device named `primary_name` at index 0.
///
/// If it is absent the driver order is reversed.
pub fn normalize_enumeration(mut devices: Vec<DeviceInfo>, primary_name: &str) -> Vec<DeviceInfo> {
    match devices
        .iter()
        .position(|dev| dev.friendly_name == primary_name)
    {
        Some(0) => {}
        Some(index) => {
            let primary = devices.remove(index);
            devices.insert(0, primary);
        }
        None => devices.reverse(),
    }
    devices
}

/// An open, capturing camera.
pub struct Device {
    identity: CameraIdentity,
    info: DeviceInfo,
    backend: Box<dyn CameraBackend>,
    closed: bool,
}

impl Device {
    /// Enumerate, select the device for `identity`, open it and start continuous capture.
    pub fn open(
        driver: &dyn DeviceDriver,
        identity: CameraIdentity,
        primary_name: &str,
    ) -> Result<Self> {
        let devices = normalize_enumeration(
            driver.enumerate().context("enumerate camera devices")?,
            primary_name,
        );
        let info = devices.get(identity.ordinal()).cloned().ok_or_else(|| {
            anyhow!(
                "{}: no device at ordinal {} ({} enumerated)",
                identity,
                identity.ordinal(),
                devices.len()
            )
        })?;

        let mut backend = driver
            .create(&info)
            .with_context(|| format!("{}: open device {}", identity, info.address))?;
        if let Err(err) = backend.start_continuous_capture() {
            backend.close();
            return Err(err.context(format!("{}: start capture on {}", identity, info.address)));
        }

        log::info!(
            "{}: opened '{}' at {}",
            identity,
            info.friendly_name,
            info.address
        );
        Ok(Self {
            identity,
            info,
            backend,
            closed: false,
        })
    }

    /// Close this device and open a fresh one for the same identity.
    ///
    /// The device is re-enumerated; a failed grab may mean the transport session is gone.
    pub fn reopen(mut self, driver: &dyn DeviceDriver, primary_name: &str) -> Result<Self> {
        let identity = self.identity;
        self.shutdown();
        drop(self);
        Self::open(driver, identity, primary_name)
    }

    /// Grab the next frame, waiting at most `timeout`.
    pub fn grab(&mut self, timeout: Duration, clock: &dyn Clock) -> GrabResult {
        if self.closed {
            return GrabResult::Failure("device is closed".to_string());
        }
        match self.backend.grab(timeout) {
            BackendGrab::Frame(image) => GrabResult::Success(FrameSample {
                image,
                captured_at: clock.now(),
            }),
            BackendGrab::Timeout => GrabResult::Timeout,
            BackendGrab::Failure(reason) => GrabResult::Failure(reason),
        }
    }

    pub fn identity(&self) -> CameraIdentity {
        self.identity
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.backend.stop();
        self.backend.close();
        self.closed = true;
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Build the driver for a device URL.
///
/// `stub://...` selects the synthetic driver; `v4l2://` selects local V4L2 devices.
pub fn open_driver(device_url: &str, primary_name: &str) -> Result<Box<dyn DeviceDriver>> {
    if device_url.starts_with("stub://") {
        return Ok(Box::new(SyntheticDriver::from_url(device_url, primary_name)?));
    }
    if device_url.starts_with("v4l2://") {
        #[cfg(feature = "ingest-v4l2")]
        {
            return Ok(Box::new(V4l2Driver::new()));
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            return Err(anyhow!("v4l2 devices require the ingest-v4l2 feature"));
        }
    }
    Err(anyhow!(
        "unsupported device url '{}'; expected stub:// or v4l2://",
        device_url
    ))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn info(name: &str) -> DeviceInfo {
        DeviceInfo {
            friendly_name: name.to_string(),
            address: format!("test://{}", name),
        }
    }

    #[test]
    fn identity_display_id_is_one_based() {
        let identity = CameraIdentity::new(0);
        assert_eq!(identity.display_id(), 1);
        assert_eq!(identity.to_string(), "cam1");
        assert_eq!(CameraIdentity::new(3).to_string(), "cam4");
    }

    #[test]
    fn primary_camera_moves_to_front() {
        let devices = vec![info("other"), info("primary")];
        let normalized = normalize_enumeration(devices, "primary");
        assert_eq!(normalized[0].friendly_name, "primary");
        assert_eq!(normalized[1].friendly_name, "other");
    }

    #[test]
    fn primary_camera_already_first_keeps_order() {
        let devices = vec![info("primary"), info("b"), info("c")];
        let normalized = normalize_enumeration(devices, "primary");
        let names: Vec<_> = normalized.iter().map(|d| d.friendly_name.as_str()).collect();
        assert_eq!(names, vec!["primary", "b", "c"]);
    }

    #[test]
    fn missing_primary_reverses_order() {
        let devices = vec![info("a"), info("b"), info("c")];
        let normalized = normalize_enumeration(devices, "primary");
        let names: Vec<_> = normalized.iter().map(|d| d.friendly_name.as_str()).collect();
        assert_eq!(names, vec!["c", "b", "a"]);
    }

    struct CountingBackend {
        closes: Arc<AtomicUsize>,
        fail_start: bool,
    }

    impl CameraBackend for CountingBackend {
        fn start_continuous_capture(&mut self) -> Result<()> {
            if self.fail_start {
                Err(anyhow!("start refused"))
            } else {
                Ok(())
            }
        }

        fn grab(&mut self, _timeout: Duration) -> BackendGrab {
            BackendGrab::Timeout
        }

        fn stop(&mut self) {}

        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct CountingDriver {
        devices: Vec<DeviceInfo>,
        closes: Arc<AtomicUsize>,
        fail_start: bool,
    }

    impl DeviceDriver for CountingDriver {
        fn enumerate(&self) -> Result<Vec<DeviceInfo>> {
            Ok(self.devices.clone())
        }

        fn create(&self, _info: &DeviceInfo) -> Result<Box<dyn CameraBackend>> {
            Ok(Box::new(CountingBackend {
                closes: self.closes.clone(),
                fail_start: self.fail_start,
            }))
        }
    }

    #[test]
    fn open_selects_normalized_ordinal() -> Result<()> {
        let driver = CountingDriver {
            devices: vec![info("secondary"), info("primary")],
            closes: Arc::new(AtomicUsize::new(0)),
            fail_start: false,
        };
        let first = Device::open(&driver, CameraIdentity::new(0), "primary")?;
        let second = Device::open(&driver, CameraIdentity::new(1), "primary")?;
        assert_eq!(first.info().friendly_name, "primary");
        assert_eq!(second.info().friendly_name, "secondary");
        Ok(())
    }

    #[test]
    fn open_rejects_missing_ordinal() {
        let driver = CountingDriver {
            devices: vec![info("primary")],
            closes: Arc::new(AtomicUsize::new(0)),
            fail_start: false,
        };
        assert!(Device::open(&driver, CameraIdentity::new(1), "primary").is_err());
    }

    #[test]
    fn failed_start_closes_backend() {
        let closes = Arc::new(AtomicUsize::new(0));
        let driver = CountingDriver {
            devices: vec![info("primary")],
            closes: closes.clone(),
            fail_start: true,
        };
        assert!(Device::open(&driver, CameraIdentity::new(0), "primary").is_err());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reopen_closes_previous_backend_once() -> Result<()> {
        let closes = Arc::new(AtomicUsize::new(0));
        let driver = CountingDriver {
            devices: vec![info("primary")],
            closes: closes.clone(),
            fail_start: false,
        };
        let device = Device::open(&driver, CameraIdentity::new(0), "primary")?;
        let mut device = device.reopen(&driver, "primary")?;
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        assert!(matches!(
            device.grab(DEFAULT_GRAB_TIMEOUT, &SystemClock),
            GrabResult::Timeout
        ));
        device.close();
        assert_eq!(closes.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[test]
    fn unknown_device_url_is_rejected() {
        assert!(open_driver("rtsp://camera", DEFAULT_PRIMARY_CAMERA).is_err());
    }
}
