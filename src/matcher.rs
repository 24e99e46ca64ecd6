//! Device matching and acquisition.
//!
//! Matching walks the enumerated interface paths in order:
//!
//! 1. open the path metadata-only (works even for OS-reserved mice/keyboards)
//! 2. read `HIDD_ATTRIBUTES`; on failure drop the candidate
//! 3. compare VID/PID; on mismatch drop the candidate without reading any strings
//! 4. read manufacturer / product / serial and apply the substring filters
//!
//! The first full match wins and keeps its metadata handle. Every dropped candidate's
//! handle is closed before the next path is opened.
//!
//! Acquisition then probes capabilities on that handle, closes it, and reopens the path
//! twice: a read stream and a write stream, both overlapped and shared. If either stream
//! refuses to open (system mouse/keyboard) the device is kept reachable for feature
//! reports only.

use crate::backends::{AccessMode, HidBackend, OwnedHandle, ShareMode, StringKind};
use crate::device::{ClassGuid, DeviceIdentity};
use crate::error::{Error, Result};
use crate::metadata::{Attributes, Capabilities, DeviceInfo};
use crate::probe::{classify_usage, query_capabilities};
use std::sync::Arc;

/// Why a candidate path was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropStage {
    /// Metadata-only open failed.
    ///
    /// The Windows backend opens with no access rights, so this is rare there. hidapi
    /// has no metadata-only open: on Linux and macOS a device the OS holds exclusively
    /// (system keyboards and mice among them) usually lands here instead of matching
    /// as feature-only.
    OpenFailed(String),
    /// `HidD_GetAttributes` failed.
    AttributesFailed(String),
    /// VID/PID differ from the identity.
    IdMismatch,
    /// VID/PID matched but a string filter did not.
    StringMismatch,
}

/// Debug record for one enumerated path.
#[derive(Debug, Clone)]
pub struct CandidateDebugInfo {
    pub path: String,
    pub attributes: Option<Attributes>,
    /// `None` means the candidate matched.
    pub drop_stage: Option<DropStage>,
}

/// A matched device, still holding its metadata-only handle.
#[derive(Debug)]
pub struct MatchedDevice {
    pub path: String,
    pub attributes: Attributes,
    pub manufacturer: String,
    pub product: String,
    pub serial_number: String,
    handle: OwnedHandle,
}

/// Handles held after acquisition.
#[derive(Debug)]
pub enum AcquiredHandles {
    /// Read and write streams are open; every transfer kind is available.
    Streams {
        read: OwnedHandle,
        write: OwnedHandle,
    },
    /// Streams refused to open; only feature reports go through this metadata handle.
    FeatureOnly { control: OwnedHandle },
}

impl AcquiredHandles {
    /// Handle used for control-pipe reads (input / feature).
    pub fn control_read(&self) -> &OwnedHandle {
        match self {
            AcquiredHandles::Streams { read, .. } => read,
            AcquiredHandles::FeatureOnly { control } => control,
        }
    }

    /// Handle used for control-pipe writes (output / feature).
    pub fn control_write(&self) -> &OwnedHandle {
        match self {
            AcquiredHandles::Streams { write, .. } => write,
            AcquiredHandles::FeatureOnly { control } => control,
        }
    }

    pub fn streams(&self) -> Option<(&OwnedHandle, &OwnedHandle)> {
        match self {
            AcquiredHandles::Streams { read, write } => Some((read, write)),
            AcquiredHandles::FeatureOnly { .. } => None,
        }
    }
}

/// Result of a successful acquisition.
#[derive(Debug)]
pub struct Acquisition {
    pub info: DeviceInfo,
    pub capabilities: Capabilities,
    pub handles: AcquiredHandles,
}

impl Acquisition {
    /// `true` when read and write streams are open.
    pub fn handles_obtained(&self) -> bool {
        self.handles.streams().is_some()
    }
}

/// Find the first enumerated device matching `identity`.
pub fn find_device(
    backend: &Arc<dyn HidBackend>,
    class: &ClassGuid,
    identity: &DeviceIdentity,
) -> Option<MatchedDevice> {
    find_device_with_debug(backend, class, identity).0
}

/// Debug-aware variant of [`find_device`] that also reports, per enumerated path, where
/// the candidate was dropped. Records stop at the matched candidate.
pub fn find_device_with_debug(
    backend: &Arc<dyn HidBackend>,
    class: &ClassGuid,
    identity: &DeviceIdentity,
) -> (Option<MatchedDevice>, Vec<CandidateDebugInfo>) {
    let mut debug = Vec::new();

    let paths = match backend.enumerate(class) {
        Ok(paths) => paths,
        Err(e) => {
            log::warn!("enumeration of {class} failed: {e}");
            return (None, debug);
        }
    };
    if paths.is_empty() {
        log::debug!("no {class} interfaces present");
        return (None, debug);
    }

    for path in paths {
        let mut dbg = CandidateDebugInfo {
            path: path.clone(),
            attributes: None,
            drop_stage: None,
        };

        let handle = match OwnedHandle::open(backend, &path, AccessMode::Metadata, ShareMode::ReadWrite) {
            Ok(h) => h,
            Err(e) => {
                dbg.drop_stage = Some(DropStage::OpenFailed(e.to_string()));
                debug.push(dbg);
                continue;
            }
        };

        let attributes = match backend.attributes(handle.raw()) {
            Ok(a) => a,
            Err(e) => {
                dbg.drop_stage = Some(DropStage::AttributesFailed(e.to_string()));
                debug.push(dbg);
                continue;
            }
        };
        dbg.attributes = Some(attributes);

        if !identity.matches_ids(&attributes) {
            dbg.drop_stage = Some(DropStage::IdMismatch);
            debug.push(dbg);
            continue;
        }

        // Devices without a string descriptor report failure; treat as empty.
        let read_string = |kind| backend.string(handle.raw(), kind).unwrap_or_default();
        let manufacturer = read_string(StringKind::Manufacturer);
        let product = read_string(StringKind::Product);
        let serial_number = read_string(StringKind::SerialNumber);

        if !identity.matches_strings(&manufacturer, &product, &serial_number) {
            dbg.drop_stage = Some(DropStage::StringMismatch);
            debug.push(dbg);
            continue;
        }

        log::debug!("matched {identity} at {path}");
        debug.push(dbg);
        return (
            Some(MatchedDevice {
                path,
                attributes,
                manufacturer,
                product,
                serial_number,
                handle,
            }),
            debug,
        );
    }

    log::debug!("no candidate matched {identity}");
    (None, debug)
}

/// Probe and reopen a matched device for streaming.
///
/// `input_buffers`, when set, is applied to the read stream's driver ring buffer.
/// Fails only if the path cannot be reopened at all.
pub fn acquire(
    backend: &Arc<dyn HidBackend>,
    matched: MatchedDevice,
    input_buffers: Option<u32>,
) -> Result<Acquisition> {
    let MatchedDevice {
        path,
        attributes,
        manufacturer,
        product,
        serial_number,
        handle,
    } = matched;

    let capabilities = query_capabilities(backend.as_ref(), handle.raw());
    let usage = classify_usage(&capabilities);
    let current_buffers = backend.num_input_buffers(handle.raw()).ok();
    drop(handle);

    let read = OwnedHandle::open(backend, &path, AccessMode::Read, ShareMode::ReadWrite);
    let write = OwnedHandle::open(backend, &path, AccessMode::Write, ShareMode::ReadWrite);

    let mut info = DeviceInfo {
        path: path.clone(),
        attributes,
        manufacturer,
        product,
        serial_number,
        usage,
        input_buffers: current_buffers,
    };

    let handles = match (read, write) {
        (Ok(read), Ok(write)) => {
            if let Some(count) = input_buffers {
                match backend.set_num_input_buffers(read.raw(), count) {
                    Ok(()) => info.input_buffers = Some(count),
                    Err(e) => log::warn!("could not set input buffers to {count}: {e}"),
                }
            }
            // Best effort; stale reports from a previous owner are harmless if this fails.
            let _ = backend.flush_queue(read.raw());
            let _ = backend.flush_queue(write.raw());
            AcquiredHandles::Streams { read, write }
        }
        (read, write) => {
            if let Err(e) = read.as_ref().and(write.as_ref()) {
                log::info!("{path}: streams unavailable ({e}); usage={usage:?}, feature reports only");
            }
            drop((read, write));
            let control =
                OwnedHandle::open(backend, &path, AccessMode::Metadata, ShareMode::ReadWrite)
                    .map_err(|e| {
                        log::warn!("{path}: reopen for feature access failed: {e}");
                        Error::Acquisition(e)
                    })?;
            AcquiredHandles::FeatureOnly { control }
        }
    };

    Ok(Acquisition {
        info,
        capabilities,
        handles,
    })
}
