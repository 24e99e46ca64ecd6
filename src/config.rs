//! Session configuration.
//!
//! A [`SessionConfig`] carries everything a [`Session`](crate::session::Session) needs
//! besides its backend. It round-trips through TOML:
//!
//! ```toml
//! read_timeout_ms = 30000
//! receive_permanently = true
//! transfer_type = "interrupt"
//!
//! [device]
//! vendor_id = 0x04d8
//! product_id = 0x003f
//! serial = "12"
//! ```
//!
//! Every key is optional; missing keys take the defaults below.

use crate::device::{ClassGuid, DeviceIdentity};
use crate::error::{Error, Result};
use crate::event::TransferType;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_READ_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 3_000;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Interface class to enumerate.
    pub class_guid: ClassGuid,
    /// Interrupt read timeout; `0` waits forever.
    pub read_timeout_ms: u64,
    /// Re-arm the interrupt read after every completion.
    pub receive_permanently: bool,
    /// Default pipe for input/output report calls.
    pub transfer_type: TransferType,
    /// Built-in device watcher period; `0` disables it.
    pub poll_interval_ms: u64,
    /// Driver input ring buffer depth applied on acquisition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_buffers: Option<u32>,
    #[serde(rename = "device")]
    pub identity: DeviceIdentity,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            class_guid: ClassGuid::HID,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            receive_permanently: false,
            transfer_type: TransferType::Interrupt,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            input_buffers: None,
            identity: DeviceIdentity::default(),
        }
    }
}

impl SessionConfig {
    pub fn new(identity: DeviceIdentity) -> Self {
        Self {
            identity,
            ..Default::default()
        }
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_receive_permanently(mut self, on: bool) -> Self {
        self.receive_permanently = on;
        self
    }

    pub fn with_transfer_type(mut self, kind: TransferType) -> Self {
        self.transfer_type = kind;
        self
    }

    /// `Duration::ZERO` disables the built-in watcher.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_input_buffers(mut self, count: u32) -> Self {
        self.input_buffers = Some(count);
        self
    }

    pub fn with_class(mut self, class: ClassGuid) -> Self {
        self.class_guid = class;
        self
    }

    #[inline]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    #[inline]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| Error::Config(e.to_string()))
    }
}
