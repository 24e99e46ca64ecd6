//! One open Windows HID handle.
//!
//! [`WinDevice`] owns a `CreateFileW` handle and closes it on drop. Stream handles are
//! opened `FILE_FLAG_OVERLAPPED`; reads wait on an event with a timeout and cancel the
//! request with `CancelIoEx` when it expires, so a read never outlives its call.

#![cfg(target_os = "windows")]

use crate::backends::{AccessMode, ShareMode, StringKind};
use crate::error::{TransportError, TransportResult};
use crate::metadata::{Attributes, Capabilities};
use std::ffi::OsStr;
use std::os::windows::ffi::OsStrExt;
use std::ptr::{null, null_mut};
use std::time::Duration;

use windows_sys::Win32::Devices::HumanInterfaceDevice::{
    HidD_FlushQueue, HidD_FreePreparsedData, HidD_GetAttributes, HidD_GetFeature,
    HidD_GetInputReport, HidD_GetManufacturerString, HidD_GetNumInputBuffers,
    HidD_GetPreparsedData, HidD_GetProductString, HidD_GetSerialNumberString,
    HidD_SetFeature, HidD_SetNumInputBuffers, HidD_SetOutputReport, HidP_GetCaps,
    HIDD_ATTRIBUTES, HIDP_CAPS, HIDP_STATUS_SUCCESS, PHIDP_PREPARSED_DATA,
};
use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, ERROR_DEVICE_NOT_CONNECTED, ERROR_IO_PENDING,
    ERROR_OPERATION_ABORTED, GENERIC_READ, GENERIC_WRITE, HANDLE, INVALID_HANDLE_VALUE,
    WAIT_OBJECT_0, WAIT_TIMEOUT,
};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, ReadFile, WriteFile, FILE_FLAG_OVERLAPPED, FILE_SHARE_READ, FILE_SHARE_WRITE,
    OPEN_EXISTING,
};
use windows_sys::Win32::System::Threading::{CreateEventW, WaitForSingleObject, INFINITE};
use windows_sys::Win32::System::IO::{CancelIoEx, GetOverlappedResult, OVERLAPPED};

/// USB string descriptors hold at most 126 UTF-16 units.
const STRING_UNITS: usize = 127;

fn last_error(op: &'static str) -> TransportError {
    match unsafe { GetLastError() } {
        ERROR_DEVICE_NOT_CONNECTED => TransportError::Disconnected,
        code => TransportError::Os { op, code },
    }
}

fn check(op: &'static str, ok: u8) -> TransportResult<()> {
    if ok == 0 {
        Err(last_error(op))
    } else {
        Ok(())
    }
}

/// Manual-reset event used for one overlapped request.
struct Event(HANDLE);

impl Event {
    fn new() -> TransportResult<Self> {
        let h = unsafe { CreateEventW(null(), 1, 0, null()) };
        if h.is_null() {
            return Err(last_error("CreateEventW"));
        }
        Ok(Event(h))
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.0);
        }
    }
}

pub(crate) struct WinDevice {
    pub(crate) path: String,
    handle: HANDLE,
}

// SAFETY: a file HANDLE may be used from any thread; every request on it carries its
// own OVERLAPPED and event.
unsafe impl Send for WinDevice {}
unsafe impl Sync for WinDevice {}

impl Drop for WinDevice {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.handle);
        }
    }
}

impl WinDevice {
    pub(crate) fn open(path: &str, access: AccessMode, share: ShareMode) -> TransportResult<Self> {
        // UTF-16 + NUL
        let wide: Vec<u16> = OsStr::new(path)
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();
        let (rights, flags) = match access {
            AccessMode::Metadata => (0, 0),
            AccessMode::Read => (GENERIC_READ, FILE_FLAG_OVERLAPPED),
            AccessMode::Write => (GENERIC_WRITE, FILE_FLAG_OVERLAPPED),
        };
        let share = match share {
            ShareMode::Exclusive => 0,
            ShareMode::ReadWrite => FILE_SHARE_READ | FILE_SHARE_WRITE,
        };
        let handle = unsafe {
            CreateFileW(
                wide.as_ptr(),
                rights,
                share,
                null(),
                OPEN_EXISTING,
                flags,
                null_mut(),
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            return Err(last_error("CreateFileW"));
        }
        Ok(Self {
            path: path.to_string(),
            handle,
        })
    }

    /// Overlapped `ReadFile`. `Ok(0)` when `timeout` expires first.
    pub(crate) fn read(&self, buf: &mut [u8], timeout: Option<Duration>) -> TransportResult<usize> {
        let event = Event::new()?;
        let mut ov: OVERLAPPED = unsafe { std::mem::zeroed() };
        ov.hEvent = event.0;
        let len = u32::try_from(buf.len()).unwrap_or(u32::MAX);

        let ok = unsafe { ReadFile(self.handle, buf.as_mut_ptr(), len, null_mut(), &mut ov) };
        if ok == 0 {
            let err = last_error("ReadFile");
            if !matches!(err, TransportError::Os { code: ERROR_IO_PENDING, .. }) {
                return Err(err);
            }
        }

        let wait_ms = timeout.map_or(INFINITE, |t| {
            u32::try_from(t.as_millis()).unwrap_or(INFINITE - 1)
        });
        let waited = unsafe { WaitForSingleObject(event.0, wait_ms) };
        if waited != WAIT_OBJECT_0 {
            // Cancel and wait for the cancellation so `buf` and `ov` outlive the request.
            unsafe {
                CancelIoEx(self.handle, &ov);
            }
            let mut n = 0u32;
            let ok = unsafe { GetOverlappedResult(self.handle, &ov, &mut n, 1) };
            if ok != 0 {
                // Completed just before the cancel landed.
                return Ok(n as usize);
            }
            let err = last_error("GetOverlappedResult");
            return match (waited, err) {
                (WAIT_TIMEOUT, TransportError::Os { code: ERROR_OPERATION_ABORTED, .. }) => Ok(0),
                (WAIT_TIMEOUT, err) => Err(err),
                _ => Err(TransportError::Os {
                    op: "WaitForSingleObject",
                    code: waited,
                }),
            };
        }

        let mut n = 0u32;
        let ok = unsafe { GetOverlappedResult(self.handle, &ov, &mut n, 0) };
        if ok == 0 {
            return Err(last_error("GetOverlappedResult"));
        }
        Ok(n as usize)
    }

    /// Overlapped `WriteFile`, waited to completion.
    pub(crate) fn write(&self, buf: &[u8]) -> TransportResult<usize> {
        let event = Event::new()?;
        let mut ov: OVERLAPPED = unsafe { std::mem::zeroed() };
        ov.hEvent = event.0;
        let len = u32::try_from(buf.len()).unwrap_or(u32::MAX);

        let ok = unsafe { WriteFile(self.handle, buf.as_ptr(), len, null_mut(), &mut ov) };
        if ok == 0 {
            let err = last_error("WriteFile");
            if !matches!(err, TransportError::Os { code: ERROR_IO_PENDING, .. }) {
                return Err(err);
            }
        }
        let mut n = 0u32;
        let ok = unsafe { GetOverlappedResult(self.handle, &ov, &mut n, 1) };
        if ok == 0 {
            return Err(last_error("GetOverlappedResult"));
        }
        Ok(n as usize)
    }

    pub(crate) fn attributes(&self) -> TransportResult<Attributes> {
        let mut attrs: HIDD_ATTRIBUTES = unsafe { std::mem::zeroed() };
        attrs.Size = std::mem::size_of::<HIDD_ATTRIBUTES>() as u32;
        check("HidD_GetAttributes", unsafe {
            HidD_GetAttributes(self.handle, &mut attrs)
        })?;
        Ok(Attributes {
            vendor_id: attrs.VendorID,
            product_id: attrs.ProductID,
            version_number: attrs.VersionNumber,
        })
    }

    pub(crate) fn preparsed_data(&self) -> TransportResult<PHIDP_PREPARSED_DATA> {
        let mut ppd: PHIDP_PREPARSED_DATA = 0;
        check("HidD_GetPreparsedData", unsafe {
            HidD_GetPreparsedData(self.handle, &mut ppd)
        })?;
        if ppd == 0 {
            return Err(TransportError::Os {
                op: "HidD_GetPreparsedData",
                code: 0,
            });
        }
        Ok(ppd)
    }

    pub(crate) fn string(&self, kind: StringKind) -> TransportResult<String> {
        let mut buf = [0u16; STRING_UNITS];
        let bytes = (buf.len() * 2) as u32;
        let ptr = buf.as_mut_ptr().cast();
        let ok = unsafe {
            match kind {
                StringKind::Manufacturer => HidD_GetManufacturerString(self.handle, ptr, bytes),
                StringKind::Product => HidD_GetProductString(self.handle, ptr, bytes),
                StringKind::SerialNumber => HidD_GetSerialNumberString(self.handle, ptr, bytes),
            }
        };
        check("HidD_GetString", ok)?;
        let len = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
        Ok(String::from_utf16_lossy(&buf[..len]))
    }

    pub(crate) fn flush_queue(&self) -> TransportResult<()> {
        check("HidD_FlushQueue", unsafe { HidD_FlushQueue(self.handle) })
    }

    pub(crate) fn num_input_buffers(&self) -> TransportResult<u32> {
        let mut n = 0u32;
        check("HidD_GetNumInputBuffers", unsafe {
            HidD_GetNumInputBuffers(self.handle, &mut n)
        })?;
        Ok(n)
    }

    pub(crate) fn set_num_input_buffers(&self, count: u32) -> TransportResult<()> {
        check("HidD_SetNumInputBuffers", unsafe {
            HidD_SetNumInputBuffers(self.handle, count)
        })
    }

    /// `HidD_GetFeature` fills the whole buffer; its length is returned.
    pub(crate) fn get_feature(&self, buf: &mut [u8]) -> TransportResult<usize> {
        check("HidD_GetFeature", unsafe {
            HidD_GetFeature(self.handle, buf.as_mut_ptr().cast(), buf.len() as u32)
        })?;
        Ok(buf.len())
    }

    pub(crate) fn set_feature(&self, buf: &[u8]) -> TransportResult<()> {
        check("HidD_SetFeature", unsafe {
            HidD_SetFeature(self.handle, buf.as_ptr().cast(), buf.len() as u32)
        })
    }

    pub(crate) fn get_input_report(&self, buf: &mut [u8]) -> TransportResult<usize> {
        check("HidD_GetInputReport", unsafe {
            HidD_GetInputReport(self.handle, buf.as_mut_ptr().cast(), buf.len() as u32)
        })?;
        Ok(buf.len())
    }

    pub(crate) fn set_output_report(&self, buf: &[u8]) -> TransportResult<()> {
        check("HidD_SetOutputReport", unsafe {
            HidD_SetOutputReport(self.handle, buf.as_ptr().cast(), buf.len() as u32)
        })
    }
}

/// Release preparsed data obtained from [`WinDevice::preparsed_data`].
pub(crate) fn free_preparsed_data(ppd: PHIDP_PREPARSED_DATA) {
    unsafe {
        HidD_FreePreparsedData(ppd);
    }
}

pub(crate) fn capabilities(ppd: PHIDP_PREPARSED_DATA) -> TransportResult<Capabilities> {
    let mut caps: HIDP_CAPS = unsafe { std::mem::zeroed() };
    let status = unsafe { HidP_GetCaps(ppd, &mut caps) };
    if status != HIDP_STATUS_SUCCESS {
        return Err(TransportError::Os {
            op: "HidP_GetCaps",
            code: status as u32,
        });
    }
    Ok(Capabilities {
        usage: caps.Usage,
        usage_page: caps.UsagePage,
        input_report_byte_length: caps.InputReportByteLength,
        output_report_byte_length: caps.OutputReportByteLength,
        feature_report_byte_length: caps.FeatureReportByteLength,
        number_link_collection_nodes: caps.NumberLinkCollectionNodes,
        number_input_button_caps: caps.NumberInputButtonCaps,
        number_input_value_caps: caps.NumberInputValueCaps,
        number_input_data_indices: caps.NumberInputDataIndices,
        number_output_button_caps: caps.NumberOutputButtonCaps,
        number_output_value_caps: caps.NumberOutputValueCaps,
        number_output_data_indices: caps.NumberOutputDataIndices,
        number_feature_button_caps: caps.NumberFeatureButtonCaps,
        number_feature_value_caps: caps.NumberFeatureValueCaps,
        number_feature_data_indices: caps.NumberFeatureDataIndices,
    })
}
