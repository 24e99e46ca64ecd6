#![cfg(target_os = "windows")]

//! Native Windows HID backend.
//!
//! Talks to the HID class driver directly through `windows-sys`:
//! - **discovery**: `SetupDi*` device interface enumeration ([`hid_discovery`])
//! - **I/O**: `CreateFileW` handles, overlapped `ReadFile` / `WriteFile`, and the
//!   `HidD_*` control-pipe calls ([`hid_device`])
//! - **capabilities**: `HidD_GetPreparsedData` + `HidP_GetCaps`
//!
//! Unlike hidapi this backend can open a device with no access rights, which is what
//! lets a session reach the feature reports of the system mouse and keyboard.

pub mod hid_device;
pub mod hid_discovery;

use self::hid_device::WinDevice;
use super::{AccessMode, HandleTable, HidBackend, PreparsedBlob, RawHandle, ShareMode, StringKind};
use crate::device::ClassGuid;
use crate::error::TransportResult;
use crate::metadata::{Attributes, Capabilities};
use std::time::Duration;
use windows_sys::Win32::Devices::HumanInterfaceDevice::PHIDP_PREPARSED_DATA;

pub struct WinHidBackend {
    handles: HandleTable<WinDevice>,
}

impl WinHidBackend {
    pub fn new() -> Self {
        Self {
            handles: HandleTable::new(),
        }
    }
}

impl Default for WinHidBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HidBackend for WinHidBackend {
    fn enumerate(&self, class: &ClassGuid) -> TransportResult<Vec<String>> {
        hid_discovery::enumerate_interfaces(class)
    }

    fn open(&self, path: &str, access: AccessMode, share: ShareMode) -> TransportResult<RawHandle> {
        let dev = WinDevice::open(path, access, share)?;
        log::trace!("win: opened {path} ({access:?})");
        Ok(self.handles.insert(dev))
    }

    fn close(&self, handle: RawHandle) {
        // The OS handle closes when the last in-flight call drops its Arc.
        if let Some(dev) = self.handles.remove(handle) {
            log::trace!("win: closed {}", dev.path);
        }
    }

    fn read(
        &self,
        handle: RawHandle,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> TransportResult<usize> {
        self.handles.get(handle)?.read(buf, timeout)
    }

    fn write(&self, handle: RawHandle, buf: &[u8]) -> TransportResult<usize> {
        self.handles.get(handle)?.write(buf)
    }

    fn attributes(&self, handle: RawHandle) -> TransportResult<Attributes> {
        self.handles.get(handle)?.attributes()
    }

    fn preparsed_data(&self, handle: RawHandle) -> TransportResult<PreparsedBlob> {
        let ppd = self.handles.get(handle)?.preparsed_data()?;
        Ok(PreparsedBlob::new(ppd as u64))
    }

    fn free_preparsed_data(&self, blob: PreparsedBlob) {
        hid_device::free_preparsed_data(blob.raw() as PHIDP_PREPARSED_DATA);
    }

    fn capabilities(&self, blob: &PreparsedBlob) -> TransportResult<Capabilities> {
        hid_device::capabilities(blob.raw() as PHIDP_PREPARSED_DATA)
    }

    fn string(&self, handle: RawHandle, kind: StringKind) -> TransportResult<String> {
        self.handles.get(handle)?.string(kind)
    }

    fn flush_queue(&self, handle: RawHandle) -> TransportResult<()> {
        self.handles.get(handle)?.flush_queue()
    }

    fn num_input_buffers(&self, handle: RawHandle) -> TransportResult<u32> {
        self.handles.get(handle)?.num_input_buffers()
    }

    fn set_num_input_buffers(&self, handle: RawHandle, count: u32) -> TransportResult<()> {
        self.handles.get(handle)?.set_num_input_buffers(count)
    }

    fn get_feature(&self, handle: RawHandle, buf: &mut [u8]) -> TransportResult<usize> {
        self.handles.get(handle)?.get_feature(buf)
    }

    fn set_feature(&self, handle: RawHandle, buf: &[u8]) -> TransportResult<()> {
        self.handles.get(handle)?.set_feature(buf)
    }

    fn get_input_report(&self, handle: RawHandle, buf: &mut [u8]) -> TransportResult<usize> {
        self.handles.get(handle)?.get_input_report(buf)
    }

    fn set_output_report(&self, handle: RawHandle, buf: &[u8]) -> TransportResult<()> {
        self.handles.get(handle)?.set_output_report(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumerating_hid_class_does_not_fail() {
        let backend = WinHidBackend::new();
        assert!(backend.enumerate(&ClassGuid::HID).is_ok());
    }

    #[test]
    fn unknown_handle_is_invalid() {
        let backend = WinHidBackend::new();
        let mut buf = [0u8; 8];
        assert!(backend.read(RawHandle::new(42), &mut buf, Some(Duration::ZERO)).is_err());
    }
}
