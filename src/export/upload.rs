//! Artifact upload over HTTP.
//!
//! Each artifact is sent as `PUT {destination}/{file_name}` with HTTP Basic
//! credentials and an `X-Content-SHA256` header carrying the hex digest of
//! the body, so the receiving side can verify what it stored.

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::trigger::Destination;

pub trait Uploader: Send + Sync {
    fn upload(&self, artifact: &Path, destination: &Destination) -> Result<()>;
}

pub struct HttpUploader {
    timeout: Duration,
}

impl HttpUploader {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Uploader for HttpUploader {
    fn upload(&self, artifact: &Path, destination: &Destination) -> Result<()> {
        let file_name = artifact
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| anyhow!("artifact path {} has no file name", artifact.display()))?;
        let target = artifact_url(&destination.url, file_name)?;
        let body =
            std::fs::read(artifact).with_context(|| format!("read {}", artifact.display()))?;
        let digest = hex::encode(Sha256::digest(&body));

        let result = ureq::put(target.as_str())
            .timeout(self.timeout)
            .set(
                "Authorization",
                &basic_auth(&destination.username, destination.password()),
            )
            .set("Content-Type", "application/octet-stream")
            .set("X-Content-SHA256", &digest)
            .send_bytes(&body);

        match result {
            Ok(_) => {
                log::info!(
                    "uploaded {} ({} bytes, sha256 {})",
                    target,
                    body.len(),
                    digest
                );
                Ok(())
            }
            Err(ureq::Error::Status(code, _)) => {
                Err(anyhow!("upload to {} rejected with status {}", target, code))
            }
            Err(err) => Err(anyhow::Error::new(err).context(format!("upload to {}", target))),
        }
    }
}

/// `base` with `file_name` appended as the last path segment.
pub(crate) fn artifact_url(base: &str, file_name: &str) -> Result<Url> {
    let mut url = Url::parse(base).with_context(|| format!("parse destination url {}", base))?;
    url.path_segments_mut()
        .map_err(|_| anyhow!("destination url {} cannot carry a path", base))?
        .pop_if_empty()
        .push(file_name);
    Ok(url)
}

fn basic_auth(username: &str, password: &str) -> String {
    format!("Basic {}", BASE64.encode(format!("{}:{}", username, password)))
}
