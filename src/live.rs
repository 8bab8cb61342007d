//! Live frame publishing.
//!
//! The most recent JPEG of each camera is kept in the shared store under
//! `cam{display_id}_bytes` with a short TTL. Viewers read the store directly;
//! an entry that expires means the acquisition loop has stalled.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use crate::camera::CameraIdentity;
use crate::store::TtlStore;

pub const LIVE_FRAME_TTL: Duration = Duration::from_secs(60);

pub fn live_frame_key(identity: CameraIdentity) -> String {
    format!("cam{}_bytes", identity.display_id())
}

pub struct LiveFrameCache {
    store: Arc<dyn TtlStore>,
    key: String,
    ttl: Duration,
}

impl LiveFrameCache {
    pub fn new(store: Arc<dyn TtlStore>, identity: CameraIdentity, ttl: Duration) -> Self {
        Self {
            store,
            key: live_frame_key(identity),
            ttl,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Replace the published frame. One attempt, no retry.
    pub fn publish(&self, jpeg: &[u8]) -> Result<()> {
        self.store
            .set(&self.key, jpeg, Some(self.ttl))
            .with_context(|| format!("publish live frame {}", self.key))
    }
}
