//! Dataset recording trigger.
//!
//! An out-of-process controller writes a JSON object under `save_dataset`:
//!
//! ```json
//! {"time": "15", "url": "https://host/upload", "username": "u", "user_password": "p"}
//! ```
//!
//! `time` is the recording duration in minutes (string or integer). The
//! collector only ever reads this key.

use anyhow::{Context, Result};
use chrono::TimeDelta;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use url::Url;
use zeroize::Zeroize;

use crate::store::TtlStore;

pub const TRIGGER_KEY: &str = "save_dataset";

/// Longest recording window a trigger may ask for (one week).
const MAX_DURATION_MINUTES: i64 = 7 * 24 * 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TriggerError {
    #[error("trigger payload is not a JSON object")]
    NotAnObject,
    #[error("trigger field '{0}' is missing or not a string")]
    MissingField(&'static str),
    #[error("trigger duration '{0}' is not a positive number of minutes")]
    InvalidDuration(String),
    #[error("trigger url '{0}' is not an http(s) url")]
    InvalidUrl(String),
}

/// Read capability over the trigger store.
pub trait TriggerSource: Send {
    fn get(&self, key: &str) -> Result<Option<Value>>;
}

/// Trigger source reading JSON out of a `TtlStore`.
pub struct StoreTriggerSource {
    store: Arc<dyn TtlStore>,
}

impl StoreTriggerSource {
    pub fn new(store: Arc<dyn TtlStore>) -> Self {
        Self { store }
    }
}

impl TriggerSource for StoreTriggerSource {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let Some(raw) = self.store.get(key)? else {
            return Ok(None);
        };
        let value = serde_json::from_slice(&raw)
            .with_context(|| format!("trigger '{}' is not valid json", key))?;
        Ok(Some(value))
    }
}

/// Where a finished recording is uploaded.
#[derive(Clone, PartialEq, Eq)]
pub struct Destination {
    pub url: String,
    pub username: String,
    password: String,
}

impl Destination {
    pub fn new(url: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Destination")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Drop for Destination {
    fn drop(&mut self) {
        self.password.zeroize();
    }
}

/// A validated recording command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordingTrigger {
    pub duration: TimeDelta,
    pub destination: Destination,
}

impl RecordingTrigger {
    pub fn from_value(value: &Value) -> Result<Self, TriggerError> {
        let obj = value.as_object().ok_or(TriggerError::NotAnObject)?;

        let duration = parse_minutes(obj.get("time").ok_or(TriggerError::MissingField("time"))?)?;
        let url = string_field(obj, "url")?;
        let username = string_field(obj, "username")?;
        let password = string_field(obj, "user_password")?;

        match Url::parse(url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
            _ => return Err(TriggerError::InvalidUrl(url.to_string())),
        }

        Ok(Self {
            duration,
            destination: Destination::new(url, username, password),
        })
    }
}

fn string_field<'a>(
    obj: &'a serde_json::Map<String, Value>,
    name: &'static str,
) -> Result<&'a str, TriggerError> {
    obj.get(name)
        .and_then(Value::as_str)
        .ok_or(TriggerError::MissingField(name))
}

fn parse_minutes(value: &Value) -> Result<TimeDelta, TriggerError> {
    let minutes = match value {
        Value::String(s) => s.trim().parse::<i64>().ok(),
        Value::Number(n) => n.as_i64(),
        _ => None,
    };
    match minutes {
        Some(m) if m > 0 && m <= MAX_DURATION_MINUTES => TimeDelta::try_minutes(m)
            .ok_or_else(|| TriggerError::InvalidDuration(value.to_string())),
        _ => Err(TriggerError::InvalidDuration(value.to_string())),
    }
}
