//! V4L2 camera driver.
//!
//! Enumerates local `/dev/video*` nodes and streams frames through mmap
//! buffers. The friendly name of a node is the card name the kernel reports,
//! which is what enumeration normalization matches against.
//!
//! Supported pixel formats: GREY, RGB3, YUYV. The driver asks for GREY first
//! and accepts whatever supported format the device settles on.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;
use std::io::ErrorKind;
use std::time::Duration;

use super::pixel::{self, PixelFormat};
use super::{BackendGrab, CameraBackend, DeviceDriver, DeviceInfo};

const STREAM_BUFFERS: u32 = 4;

#[derive(Clone, Copy, Debug, Default)]
pub struct V4l2Driver;

impl V4l2Driver {
    pub fn new() -> Self {
        Self
    }
}

impl DeviceDriver for V4l2Driver {
    fn enumerate(&self) -> Result<Vec<DeviceInfo>> {
        let mut nodes = v4l::context::enum_devices();
        nodes.sort_by_key(|node| node.index());
        Ok(nodes
            .into_iter()
            .map(|node| DeviceInfo {
                friendly_name: node
                    .name()
                    .unwrap_or_else(|| format!("video{}", node.index())),
                address: node.path().display().to_string(),
            })
            .collect())
    }

    fn create(&self, info: &DeviceInfo) -> Result<Box<dyn CameraBackend>> {
        Ok(Box::new(V4l2Camera::new(info.address.clone())))
    }
}

#[self_referencing]
struct V4l2Stream {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

struct V4l2Camera {
    path: String,
    state: Option<V4l2Stream>,
    width: u32,
    height: u32,
    format: PixelFormat,
    timeout: Option<Duration>,
}

impl V4l2Camera {
    fn new(path: String) -> Self {
        Self {
            path,
            state: None,
            width: 0,
            height: 0,
            format: PixelFormat::Mono8,
            timeout: None,
        }
    }
}

impl CameraBackend for V4l2Camera {
    fn start_continuous_capture(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let device = v4l::Device::with_path(&self.path)
            .with_context(|| format!("open v4l2 device {}", self.path))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.fourcc = v4l::FourCC::new(b"GREY");
        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Camera: failed to select GREY on {}: {}",
                    self.path,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        self.format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            anyhow!(
                "v4l2 device {} uses unsupported pixel format {}",
                self.path,
                format.fourcc
            )
        })?;
        self.width = format.width;
        self.height = format.height;
        self.timeout = None;

        let state = V4l2StreamBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, STREAM_BUFFERS)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "V4l2Camera: streaming {} ({}x{} {:?})",
            self.path,
            self.width,
            self.height,
            self.format
        );
        Ok(())
    }

    fn grab(&mut self, timeout: Duration) -> BackendGrab {
        use v4l::io::traits::CaptureStream;

        let Some(state) = self.state.as_mut() else {
            return BackendGrab::Failure(format!("{} is not streaming", self.path));
        };
        if self.timeout != Some(timeout) {
            state.with_stream_mut(|stream| stream.set_timeout(timeout));
            self.timeout = Some(timeout);
        }

        let (width, height, format) = (self.width, self.height, self.format);
        state.with_stream_mut(|stream| match stream.next() {
            Ok((buf, _meta)) => match pixel::to_image(buf, width, height, format) {
                Ok(image) => BackendGrab::Frame(image),
                Err(err) => BackendGrab::Failure(err.to_string()),
            },
            Err(err) if err.kind() == ErrorKind::TimedOut => BackendGrab::Timeout,
            Err(err) => BackendGrab::Failure(format!("capture v4l2 frame: {}", err)),
        })
    }

    fn stop(&mut self) {
        // Dropping the stream issues STREAMOFF and unmaps the buffers.
        self.state = None;
    }

    fn close(&mut self) {
        self.state = None;
    }
}
