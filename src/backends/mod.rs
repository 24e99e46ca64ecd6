//! Transport backends for `hidlink`.
//!
//! A [`HidBackend`] is the boundary to the OS: it enumerates device interface paths for
//! a class GUID, opens handles, moves report bytes and answers capability queries. The
//! session logic above it never touches an OS handle directly.
//!
//! # Implementations
//! - **`windows`**: native Win32 (`SetupDi*`, `CreateFileW`, `HidD_*`, `HidP_GetCaps`,
//!   overlapped `ReadFile`). Default on Windows.
//! - **`hid`** feature: [`hid::HidapiBackend`], cross-platform via `hidapi`. Capabilities
//!   are derived from the raw report descriptor (see [`descriptor`]).
//! - **`virtual`** feature: [`virtual_input::VirtualBackend`], scripted in-memory devices
//!   for tests and demos.
//!
//! Backends must be `Send + Sync`: the interrupt reader thread, the device watcher and
//! the caller's thread use the same backend concurrently (on different handles).

use crate::device::ClassGuid;
use crate::error::{TransportError, TransportResult};
use crate::metadata::{Attributes, Capabilities};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

pub mod descriptor;

#[cfg(feature = "hid")]
#[cfg_attr(docsrs, doc(cfg(feature = "hid")))]
pub mod hid;

#[cfg(feature = "virtual")]
#[cfg_attr(docsrs, doc(cfg(feature = "virtual")))]
pub mod virtual_input;

#[cfg(target_os = "windows")]
#[cfg_attr(docsrs, doc(cfg(target_os = "windows")))]
pub mod windows;

/// Opaque, backend-issued handle to an open device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RawHandle(u64);

impl RawHandle {
    #[inline]
    pub fn new(raw: u64) -> Self {
        RawHandle(raw)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Opaque preparsed-data blob. Must be handed back to
/// [`HidBackend::free_preparsed_data`] exactly once.
#[derive(Debug, PartialEq, Eq)]
pub struct PreparsedBlob(u64);

impl PreparsedBlob {
    #[inline]
    pub fn new(raw: u64) -> Self {
        PreparsedBlob(raw)
    }

    #[inline]
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Access rights requested when opening a device path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// No read/write rights. Enough for attributes, strings, caps and feature reports,
    /// and succeeds even on OS-reserved devices (system mouse / keyboard).
    Metadata,
    /// Generic read, overlapped I/O.
    Read,
    /// Generic write, overlapped I/O.
    Write,
}

/// Sharing granted to other openers of the same path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum ShareMode {
    Exclusive,
    /// Others (including the OS HID class driver) may keep reading and writing.
    #[default]
    ReadWrite,
}

/// Which USB string descriptor to read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StringKind {
    Manufacturer,
    Product,
    SerialNumber,
}

/// OS transport primitives used by the session.
pub trait HidBackend: Send + Sync {
    /// Device interface paths for `class`, in enumeration order.
    fn enumerate(&self, class: &ClassGuid) -> TransportResult<Vec<String>>;

    fn open(&self, path: &str, access: AccessMode, share: ShareMode) -> TransportResult<RawHandle>;

    /// Release a handle. Closing an unknown or already-closed handle is a no-op.
    fn close(&self, handle: RawHandle);

    /// Interrupt read of one input report.
    ///
    /// `timeout = None` blocks until data or failure. `Ok(0)` means the timeout elapsed
    /// without data.
    fn read(&self, handle: RawHandle, buf: &mut [u8], timeout: Option<Duration>)
        -> TransportResult<usize>;

    /// Interrupt write of one output report; returns bytes accepted.
    fn write(&self, handle: RawHandle, buf: &[u8]) -> TransportResult<usize>;

    fn attributes(&self, handle: RawHandle) -> TransportResult<Attributes>;

    fn preparsed_data(&self, handle: RawHandle) -> TransportResult<PreparsedBlob>;

    fn free_preparsed_data(&self, blob: PreparsedBlob);

    fn capabilities(&self, blob: &PreparsedBlob) -> TransportResult<Capabilities>;

    fn string(&self, handle: RawHandle, kind: StringKind) -> TransportResult<String>;

    /// Drop queued input reports.
    fn flush_queue(&self, handle: RawHandle) -> TransportResult<()>;

    fn num_input_buffers(&self, handle: RawHandle) -> TransportResult<u32>;

    fn set_num_input_buffers(&self, handle: RawHandle, count: u32) -> TransportResult<()>;

    /// `buf[0]` carries the requested report ID on entry.
    fn get_feature(&self, handle: RawHandle, buf: &mut [u8]) -> TransportResult<usize>;

    fn set_feature(&self, handle: RawHandle, buf: &[u8]) -> TransportResult<()>;

    /// Control-pipe input report read. `buf[0]` carries the report ID on entry.
    fn get_input_report(&self, handle: RawHandle, buf: &mut [u8]) -> TransportResult<usize>;

    /// Control-pipe output report write.
    fn set_output_report(&self, handle: RawHandle, buf: &[u8]) -> TransportResult<()>;
}

/// A handle that is closed when dropped.
///
/// Every handle the session holds is wrapped in one of these, so releasing state
/// (`close()`, removal, transfer failure) can never leak an OS handle.
pub struct OwnedHandle {
    backend: Arc<dyn HidBackend>,
    raw: RawHandle,
}

impl OwnedHandle {
    pub fn new(backend: Arc<dyn HidBackend>, raw: RawHandle) -> Self {
        Self { backend, raw }
    }

    /// Open `path` and wrap the result.
    pub fn open(
        backend: &Arc<dyn HidBackend>,
        path: &str,
        access: AccessMode,
        share: ShareMode,
    ) -> TransportResult<Self> {
        let raw = backend.open(path, access, share)?;
        Ok(Self::new(Arc::clone(backend), raw))
    }

    /// The raw handle. Stays valid until this value is dropped.
    #[inline]
    pub fn raw(&self) -> RawHandle {
        self.raw
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        self.backend.close(self.raw);
    }
}

impl std::fmt::Debug for OwnedHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("OwnedHandle").field(&self.raw).finish()
    }
}

/// Id → object table shared by backends whose native handles are not plain integers.
///
/// Lookups hand out an `Arc`, so an operation in flight keeps its object alive even if
/// the handle is closed concurrently; the next lookup then fails with `InvalidHandle`.
pub(crate) struct HandleTable<T> {
    next: AtomicU64,
    entries: Mutex<HashMap<u64, Arc<T>>>,
}

impl<T> HandleTable<T> {
    pub(crate) fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn insert(&self, value: T) -> RawHandle {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(value));
        RawHandle(id)
    }

    pub(crate) fn get(&self, handle: RawHandle) -> TransportResult<Arc<T>> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&handle.0)
            .cloned()
            .ok_or(TransportError::InvalidHandle)
    }

    pub(crate) fn remove(&self, handle: RawHandle) -> Option<Arc<T>> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle.0)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// The platform's native backend.
///
/// Windows uses the Win32 HID stack directly; other platforms go through `hidapi`
/// (requires the `hid` feature).
pub fn default_backend() -> crate::Result<Arc<dyn HidBackend>> {
    #[cfg(target_os = "windows")]
    {
        Ok(Arc::new(windows::WinHidBackend::new()))
    }

    #[cfg(all(not(target_os = "windows"), feature = "hid"))]
    {
        let backend = hid::HidapiBackend::new().map_err(crate::Error::Acquisition)?;
        Ok(Arc::new(backend))
    }

    #[cfg(all(not(target_os = "windows"), not(feature = "hid")))]
    {
        Err(crate::Error::Acquisition(TransportError::Unsupported(
            "native HID transport",
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_table_lifecycle() {
        let table = HandleTable::new();
        let a = table.insert("a");
        let b = table.insert("b");
        assert_ne!(a, b);
        assert_eq!(*table.get(a).unwrap(), "a");
        assert!(table.remove(a).is_some());
        assert!(matches!(table.get(a), Err(TransportError::InvalidHandle)));
        assert!(table.remove(a).is_none());
        assert_eq!(table.len(), 1);
    }
}
