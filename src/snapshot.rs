//! Point-in-time view of a session.
//!
//! [`SessionSnapshot`] is an **owned**, read-only copy of the session state, taken under
//! the state lock by [`Session::snapshot`](crate::session::Session::snapshot). It never
//! touches the device and goes stale as soon as it is returned.
//!
//! # Examples
//! ```no_run
//! use hidlink::{DeviceIdentity, Session};
//!
//! let session = Session::with_identity(
//!     hidlink::backends::default_backend().unwrap(),
//!     DeviceIdentity::new(0x04d8, 0x003f),
//! );
//! session.open();
//! println!("{}", session.snapshot().to_json().unwrap());
//! ```

use crate::event::TransferType;
use crate::metadata::{Capabilities, DeviceInfo};
use serde::Serialize;

/// Lifecycle phase of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Closed,
    /// Open, target not present.
    Opened,
    /// Present but without stream handles (not yet acquired, or feature-only).
    Detected,
    /// Read and write streams are open.
    Ready,
}

#[derive(Clone, Debug, Serialize)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub detected: bool,
    pub handles_obtained: bool,
    pub device: Option<DeviceInfo>,
    pub capabilities: Capabilities,
    pub transfer_type: TransferType,
    pub read_timeout_ms: u64,
    pub receive_permanently: bool,
    pub control_in_progress: bool,
    pub interrupt_in_progress: bool,
    /// Interrupt reads armed since the session was created.
    pub reads_armed: u64,
    /// Successful acquisitions since the session was created.
    pub acquisitions: u64,
}

impl SessionSnapshot {
    #[inline]
    pub fn transfer_in_progress(&self) -> bool {
        self.control_in_progress || self.interrupt_in_progress
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
