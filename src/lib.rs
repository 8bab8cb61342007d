//! Frame collector
//!
//! Continuously pulls frames from industrial cameras, republishes the latest
//! frame of each camera for live viewing and, on external command, records a
//! time-boxed image dataset that is then packaged and uploaded off-loop.
//!
//! # Architecture
//!
//! One `AcquisitionLoop` runs per camera. Each owns its device handle and its
//! recording session; nothing mutable is shared between loops except the
//! filesystem and the external key/value store.
//!
//! # Module Structure
//!
//! - `camera`: device enumeration, open/grab/reopen (`Device`, `DeviceDriver`)
//! - `store`: shared TTL key/value store (SQLite, in-memory)
//! - `live`: latest-frame publishing for viewers
//! - `trigger`: the `save_dataset` recording command
//! - `session`: recording window state machine
//! - `media`: on-disk layout and frame files
//! - `export`: Parquet conversion + upload, run detached
//! - `acquisition`: the per-camera loop tying it together

pub mod acquisition;
pub mod camera;
pub mod clock;
pub mod config;
pub mod export;
pub mod live;
pub mod media;
pub mod session;
pub mod store;
pub mod trigger;

pub use acquisition::{AcquisitionLoop, LoopCollaborators, LoopSettings, LoopStats, StepOutcome};
pub use camera::{
    open_driver, BackendGrab, CameraBackend, CameraIdentity, Device, DeviceDriver, DeviceInfo,
    FrameSample, GrabResult, SyntheticDriver,
};
#[cfg(feature = "ingest-v4l2")]
pub use camera::V4l2Driver;
pub use clock::{Clock, ManualClock, SystemClock};
pub use export::{
    create_and_upload, DetachedExport, ExportHandoff, ExportJob, ExportSummary, HttpUploader,
    Uploader,
};
pub use live::{live_frame_key, LiveFrameCache, LIVE_FRAME_TTL};
pub use media::MediaLayout;
pub use session::{ActiveWindow, PollOutcome, RecordingSession};
pub use store::{InMemoryTtlStore, SqliteTtlStore, TtlStore};
pub use trigger::{
    Destination, RecordingTrigger, StoreTriggerSource, TriggerError, TriggerSource, TRIGGER_KEY,
};
