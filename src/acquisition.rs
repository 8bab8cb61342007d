//! Acquisition loop.
//!
//! One loop runs per camera for the lifetime of the process. Each iteration:
//! 1. Polls the trigger store when the poll interval has elapsed
//! 2. Grabs one frame (bounded by the grab timeout)
//!    - failure: the device is closed and reopened from scratch
//!    - timeout: nothing to do this iteration
//!    - frame: publish to the live cache, archive while recording, write a
//!      snapshot if one was requested
//! 3. Closes an expired recording window and, on the export owner camera,
//!    stages the shared archive and hands it to the export worker
//!
//! Grab, publish and archive stay on the loop thread so the live cache tracks
//! the true grab cadence. Only the export runs elsewhere.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::camera::{CameraIdentity, Device, DeviceDriver, FrameSample, GrabResult};
use crate::clock::Clock;
use crate::config::CollectorConfig;
use crate::export::{ExportHandoff, ExportJob};
use crate::live::LiveFrameCache;
use crate::media::{self, MediaLayout};
use crate::session::{PollOutcome, RecordingSession};
use crate::trigger::TriggerSource;

/// Per-instance tunables.
#[derive(Clone, Debug)]
pub struct LoopSettings {
    pub primary_name: String,
    pub grab_timeout: Duration,
    /// Pause after a failed open before the next attempt.
    pub reopen_delay: Duration,
    pub poll_interval: Duration,
    pub jpeg_quality: u8,
    /// Ordinal of the camera that exports finished recordings.
    pub export_owner: usize,
    pub health_log_interval: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            primary_name: crate::camera::DEFAULT_PRIMARY_CAMERA.to_string(),
            grab_timeout: crate::camera::DEFAULT_GRAB_TIMEOUT,
            reopen_delay: Duration::from_secs(1),
            poll_interval: crate::session::DEFAULT_POLL_INTERVAL,
            jpeg_quality: media::DEFAULT_JPEG_QUALITY,
            export_owner: 0,
            health_log_interval: Duration::from_secs(30),
        }
    }
}

impl LoopSettings {
    pub fn from_config(cfg: &CollectorConfig) -> Self {
        Self {
            primary_name: cfg.camera.primary_name.clone(),
            grab_timeout: cfg.camera.grab_timeout,
            reopen_delay: cfg.camera.reopen_delay,
            poll_interval: cfg.poll_interval,
            jpeg_quality: cfg.live.jpeg_quality,
            export_owner: cfg.export.owner_ordinal,
            health_log_interval: cfg.health_log_interval,
        }
    }
}

/// External collaborators of one loop instance.
pub struct LoopCollaborators {
    pub live: LiveFrameCache,
    pub triggers: Box<dyn TriggerSource>,
    pub export: Arc<dyn ExportHandoff>,
    pub layout: MediaLayout,
    pub clock: Box<dyn Clock>,
}

/// What one iteration did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Frame { archived: bool, snapshot: bool },
    Timeout,
    /// The grab failed and the device was reopened.
    Reopened,
    /// No device could be opened this iteration.
    DeviceUnavailable,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub frames: u64,
    pub timeouts: u64,
    pub grab_failures: u64,
    pub reopens: u64,
    pub open_failures: u64,
    pub publish_failures: u64,
    pub archived: u64,
    pub snapshots: u64,
    pub exports: u64,
}

pub struct AcquisitionLoop {
    identity: CameraIdentity,
    settings: LoopSettings,
    driver: Box<dyn DeviceDriver>,
    device: Option<Device>,
    session: RecordingSession,
    live: LiveFrameCache,
    triggers: Box<dyn TriggerSource>,
    export: Arc<dyn ExportHandoff>,
    layout: MediaLayout,
    clock: Box<dyn Clock>,
    stats: LoopStats,
    last_health_log: Instant,
}

impl AcquisitionLoop {
    /// The device is opened lazily on the first step.
    pub fn new(
        identity: CameraIdentity,
        settings: LoopSettings,
        driver: Box<dyn DeviceDriver>,
        collaborators: LoopCollaborators,
    ) -> Self {
        Self {
            identity,
            session: RecordingSession::new(settings.poll_interval),
            settings,
            driver,
            device: None,
            live: collaborators.live,
            triggers: collaborators.triggers,
            export: collaborators.export,
            layout: collaborators.layout,
            clock: collaborators.clock,
            stats: LoopStats::default(),
            last_health_log: Instant::now(),
        }
    }

    pub fn identity(&self) -> CameraIdentity {
        self.identity
    }

    pub fn session(&self) -> &RecordingSession {
        &self.session
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn device(&self) -> Option<&Device> {
        self.device.as_ref()
    }

    /// Run until the process exits.
    pub fn run(mut self) -> ! {
        log::info!(
            "{}: acquisition loop running (media root {})",
            self.identity,
            self.layout.root().display()
        );
        loop {
            self.step();
        }
    }

    /// One iteration.
    pub fn step(&mut self) -> StepOutcome {
        let now = self.clock.now();
        self.poll_triggers(now);

        let outcome = self.acquire(now);

        self.close_expired_window();
        self.log_health();
        outcome
    }

    fn poll_triggers(&mut self, now: chrono::DateTime<chrono::Local>) {
        if let PollOutcome::Armed { .. } = self.session.poll(now, self.triggers.as_ref()) {
            let dir = self.layout.camera_archive(self.identity);
            if let Err(err) = std::fs::create_dir_all(&dir) {
                log::error!(
                    "{}: cannot create archive dir {}: {}; recording cancelled",
                    self.identity,
                    dir.display(),
                    err
                );
                self.session.disarm();
            }
        }
    }

    fn acquire(&mut self, now: chrono::DateTime<chrono::Local>) -> StepOutcome {
        if self.device.is_none() && !self.open_device() {
            return StepOutcome::DeviceUnavailable;
        }
        let Some(device) = self.device.as_mut() else {
            return StepOutcome::DeviceUnavailable;
        };

        match device.grab(self.settings.grab_timeout, self.clock.as_ref()) {
            GrabResult::Success(sample) => self.process_frame(now, sample),
            GrabResult::Timeout => {
                self.stats.timeouts += 1;
                StepOutcome::Timeout
            }
            GrabResult::Failure(reason) => {
                self.stats.grab_failures += 1;
                log::warn!("{}: grab failed ({}); reopening device", self.identity, reason);
                self.reopen_device()
            }
        }
    }

    fn open_device(&mut self) -> bool {
        match Device::open(
            self.driver.as_ref(),
            self.identity,
            &self.settings.primary_name,
        ) {
            Ok(device) => {
                self.device = Some(device);
                true
            }
            Err(err) => {
                self.stats.open_failures += 1;
                log::error!("{}: device unavailable: {:#}", self.identity, err);
                std::thread::sleep(self.settings.reopen_delay);
                false
            }
        }
    }

    fn reopen_device(&mut self) -> StepOutcome {
        let Some(device) = self.device.take() else {
            return StepOutcome::DeviceUnavailable;
        };
        match device.reopen(self.driver.as_ref(), &self.settings.primary_name) {
            Ok(device) => {
                self.stats.reopens += 1;
                self.device = Some(device);
                StepOutcome::Reopened
            }
            Err(err) => {
                self.stats.open_failures += 1;
                log::error!("{}: reopen failed: {:#}", self.identity, err);
                StepOutcome::DeviceUnavailable
            }
        }
    }

    fn process_frame(
        &mut self,
        poll_time: chrono::DateTime<chrono::Local>,
        sample: FrameSample,
    ) -> StepOutcome {
        self.stats.frames += 1;

        let jpeg = match media::encode_jpeg(&sample.image, self.settings.jpeg_quality) {
            Ok(jpeg) => Some(jpeg),
            Err(err) => {
                log::warn!("{}: {:#}", self.identity, err);
                None
            }
        };
        if let Some(jpeg) = &jpeg {
            if let Err(err) = self.live.publish(jpeg) {
                self.stats.publish_failures += 1;
                log::warn!("{}: {:#}", self.identity, err);
            }
        }

        let mut archived = false;
        if self.session.is_recording(self.clock.now()) {
            let dir = self.layout.camera_archive(self.identity);
            match media::write_archive_frame(&dir, &sample) {
                Ok(path) => {
                    archived = true;
                    self.stats.archived += 1;
                    log::debug!("{}: archived {}", self.identity, path.display());
                }
                Err(err) => log::warn!("{}: {:#}", self.identity, err),
            }
        }

        let mut snapshot = false;
        if self.session.take_snapshot_request() {
            let dir = self.layout.dataset_day_dir(self.identity, &poll_time);
            match jpeg
                .as_deref()
                .map(|jpeg| media::write_snapshot(&dir, &sample.captured_at, jpeg))
            {
                Some(Ok(path)) => {
                    snapshot = true;
                    self.stats.snapshots += 1;
                    log::debug!("{}: snapshot {}", self.identity, path.display());
                }
                Some(Err(err)) => log::warn!("{}: {:#}", self.identity, err),
                None => log::warn!("{}: snapshot skipped, frame not encodable", self.identity),
            }
        }

        StepOutcome::Frame { archived, snapshot }
    }

    fn close_expired_window(&mut self) {
        let now = self.clock.now();
        let Some(window) = self.session.expire(now) else {
            return;
        };
        if self.identity.ordinal() != self.settings.export_owner {
            log::info!("{}: recording window closed", self.identity);
            return;
        }

        let staged = match self.layout.stage_archive(&now) {
            Ok(Some(staged)) => staged,
            Ok(None) => {
                log::warn!(
                    "{}: recording window closed with nothing archived",
                    self.identity
                );
                return;
            }
            Err(err) => {
                log::error!(
                    "{}: recording window closed but export not started: {:#}",
                    self.identity,
                    err
                );
                return;
            }
        };
        log::info!(
            "{}: recording window closed; exporting {}",
            self.identity,
            staged.display()
        );
        self.stats.exports += 1;
        self.export.hand_off(ExportJob {
            output_dir: self.layout.export_output_dir(&staged),
            archive_dir: staged,
            destination: window.destination,
        });
    }

    fn log_health(&mut self) {
        if self.last_health_log.elapsed() < self.settings.health_log_interval {
            return;
        }
        let stats = self.stats;
        log::info!(
            "{} health: device={} frames={} timeouts={} grab_failures={} reopens={} archived={} snapshots={} recording={}",
            self.identity,
            self.device.is_some(),
            stats.frames,
            stats.timeouts,
            stats.grab_failures,
            stats.reopens,
            stats.archived,
            stats.snapshots,
            self.session.is_active()
        );
        self.last_health_log = Instant::now();
    }
}
