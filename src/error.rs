//! Error types.
//!
//! Two layers:
//! - [`TransportError`] is what a [`HidBackend`](crate::backends::HidBackend) reports
//!   (OS error codes, hidapi failures, invalid handles).
//! - [`Error`] is what the session internals propagate with `?`. The public
//!   [`Session`](crate::session::Session) API folds it into `bool` / `Option` results
//!   after logging, so no error type crosses the façade.

use crate::event::{ReportType, TransferType};
use thiserror::Error;

/// Failure reported by a transport backend.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The handle was never valid, or was already closed.
    #[error("invalid or closed handle")]
    InvalidHandle,

    /// An OS call failed; `code` is the platform error (e.g. `GetLastError()`).
    #[error("{op} failed (os error {code})")]
    Os { op: &'static str, code: u32 },

    /// The device went away while the operation was in flight.
    #[error("device disconnected")]
    Disconnected,

    /// The backend cannot perform this operation on this platform.
    #[error("{0} is not supported by this backend")]
    Unsupported(&'static str),

    /// Transfer moved fewer bytes than requested.
    #[error("short transfer: {actual} of {expected} bytes")]
    ShortTransfer { expected: usize, actual: usize },

    #[cfg(feature = "hid")]
    #[error("hidapi: {0}")]
    Hidapi(#[from] hidapi::HidError),
}

/// Session-level error.
#[derive(Debug, Error)]
pub enum Error {
    /// `open()` has not been called, or the session was closed.
    #[error("session is not open")]
    NotOpen,

    /// No enumerated candidate matched the configured identity.
    #[error("no matching device found")]
    NotFound,

    /// The device is known but the required handle is not available.
    #[error("no usable handle for {0:?} transfer")]
    NoHandle(TransferType),

    /// A transfer of the same kind is already running.
    #[error("{0:?} transfer already in progress")]
    Busy(TransferType),

    /// The report cannot be sent as-is (empty buffer, zero length...).
    #[error("invalid {kind:?} report: {reason}")]
    InvalidReport {
        kind: ReportType,
        reason: &'static str,
    },

    /// The transport failed mid-transfer; handles have been invalidated.
    #[error("{kind:?} report transfer failed: {source}")]
    Transfer {
        kind: ReportType,
        #[source]
        source: TransportError,
    },

    /// Opening or probing the device failed.
    #[error("device acquisition failed: {0}")]
    Acquisition(#[source] TransportError),

    /// The interrupt reader thread could not be started.
    #[error("could not start reader thread: {0}")]
    Thread(#[from] std::io::Error),

    /// Configuration could not be parsed.
    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Result alias used by backends.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_busy() {
        let e = Error::Busy(TransferType::Control);
        assert_eq!(e.to_string(), "Control transfer already in progress");
    }

    #[test]
    fn display_os_error() {
        let e = TransportError::Os {
            op: "HidD_GetAttributes",
            code: 31,
        };
        assert_eq!(e.to_string(), "HidD_GetAttributes failed (os error 31)");
    }

    #[test]
    fn transfer_error_chains_source() {
        let e = Error::Transfer {
            kind: ReportType::Feature,
            source: TransportError::Disconnected,
        };
        let source = std::error::Error::source(&e).unwrap();
        assert_eq!(source.to_string(), "device disconnected");
    }
}
