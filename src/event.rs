//! Events and transfer tags.
//!
//! A [`Session`](crate::session::Session) reports lifecycle changes and incoming data as
//! [`SessionEvent`]s and optionally timestamps them ([`TimedEvent`]).
//!
//! ## Delivery conventions
//! - Events are raised **after** the session state lock is released, so a listener
//!   always observes the state the event describes.
//! - `DataReceived` and `ReadTimedOut` are raised from the interrupt reader thread.
//!   `Inserted` / `Removed` are raised from whichever thread delivered the device change
//!   (the built-in watcher, or a caller of `handle_device_change`).
//! - If another delivery is already running, the event is queued and delivered by that
//!   thread after the current one.
//! - For one armed interrupt read, exactly one of `DataReceived` / `ReadTimedOut` fires,
//!   or neither if the read failed or was cancelled by `close()` / removal.

use crate::report::Report;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// How a report is moved between host and device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferType {
    /// Synchronous request/response over the control pipe
    /// (`HidD_GetInputReport` / `HidD_SetOutputReport`).
    Control,
    /// Streamed over the interrupt endpoint (`ReadFile` / `WriteFile`).
    #[default]
    Interrupt,
}

/// Which report channel a transfer targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportType {
    Input,
    Output,
    Feature,
}

/// Device change delivered by a notification source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceChange {
    /// Some device of the watched class arrived.
    Arrived,
    /// Some device of the watched class went away.
    Removed,
}

/// Something that happened on a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// The target device was acquired after an arrival.
    Inserted,

    /// The target device is no longer present; handles have been released.
    Removed,

    /// An armed interrupt read hit the read timeout without data.
    ReadTimedOut,

    /// An interrupt read completed with an input report.
    DataReceived(Report),
}

impl SessionEvent {
    /// `true` for `Inserted` / `Removed`.
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, SessionEvent::Inserted | SessionEvent::Removed)
    }
}

/// Timestamped session event.
///
/// Used by channel subscribers that want to measure report cadence.
#[derive(Clone, Debug)]
pub struct TimedEvent {
    /// Capture time (monotonic).
    pub at: Instant,
    pub event: SessionEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_transfer_type_is_interrupt() {
        assert_eq!(TransferType::default(), TransferType::Interrupt);
    }

    #[test]
    fn lifecycle_classification() {
        assert!(SessionEvent::Inserted.is_lifecycle());
        assert!(SessionEvent::Removed.is_lifecycle());
        assert!(!SessionEvent::ReadTimedOut.is_lifecycle());
        assert!(!SessionEvent::DataReceived(Report::new(1, vec![2])).is_lifecycle());
    }
}
