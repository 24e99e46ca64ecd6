//! `hidapi` backend.
//!
//! Cross-platform transport through the `hidapi` crate. hidapi has no preparsed data,
//! so [`HidBackend::preparsed_data`] fetches the raw report descriptor and the blob
//! carries the [`Capabilities`] parsed from it.
//!
//! Limitations compared to the Windows backend:
//! - only the HID interface class enumerates; other class GUIDs yield nothing
//! - access and share modes are not distinguishable; every open is read/write
//! - the driver input ring buffer depth is not exposed

use super::descriptor::parse_capabilities;
use super::{AccessMode, HandleTable, HidBackend, PreparsedBlob, RawHandle, ShareMode, StringKind};
use crate::device::ClassGuid;
use crate::error::{TransportError, TransportResult};
use crate::metadata::{Attributes, Capabilities};
use hidapi::{HidApi, HidDevice};
use std::ffi::CString;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Largest report descriptor hidapi can return.
const MAX_DESCRIPTOR_LEN: usize = 4096;
/// Reports drained at most by one `flush_queue`.
const MAX_FLUSH: usize = 512;

struct OpenDevice {
    path: String,
    device: Mutex<HidDevice>,
}

impl OpenDevice {
    fn lock(&self) -> MutexGuard<'_, HidDevice> {
        self.device.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct HidapiBackend {
    api: Mutex<HidApi>,
    handles: HandleTable<OpenDevice>,
    blobs: HandleTable<Capabilities>,
}

impl HidapiBackend {
    pub fn new() -> TransportResult<Self> {
        Ok(Self {
            api: Mutex::new(HidApi::new()?),
            handles: HandleTable::new(),
            blobs: HandleTable::new(),
        })
    }

    fn api(&self) -> MutexGuard<'_, HidApi> {
        self.api.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn timeout_ms(timeout: Option<Duration>) -> i32 {
    match timeout {
        None => -1,
        Some(t) => i32::try_from(t.as_millis()).unwrap_or(i32::MAX),
    }
}

impl HidBackend for HidapiBackend {
    fn enumerate(&self, class: &ClassGuid) -> TransportResult<Vec<String>> {
        if *class != ClassGuid::HID {
            return Ok(Vec::new());
        }
        let mut api = self.api();
        api.refresh_devices()?;
        Ok(api
            .device_list()
            .map(|info| info.path().to_string_lossy().into_owned())
            .collect())
    }

    fn open(&self, path: &str, access: AccessMode, _share: ShareMode) -> TransportResult<RawHandle> {
        let c_path = CString::new(path).map_err(|_| TransportError::Os {
            op: "hid_open_path",
            code: 0,
        })?;
        // hidapi always asks for read/write access, so a metadata open of a device the OS
        // holds exclusively fails here where the Windows backend would succeed.
        let device = self.api().open_path(&c_path).map_err(|e| {
            if access == AccessMode::Metadata {
                log::debug!("hidapi: {path} not openable for metadata: {e}");
            }
            e
        })?;
        log::trace!("hidapi: opened {path} ({access:?})");
        Ok(self.handles.insert(OpenDevice {
            path: path.to_string(),
            device: Mutex::new(device),
        }))
    }

    fn close(&self, handle: RawHandle) {
        if let Some(dev) = self.handles.remove(handle) {
            log::trace!("hidapi: closed {}", dev.path);
        }
    }

    fn read(
        &self,
        handle: RawHandle,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> TransportResult<usize> {
        let dev = self.handles.get(handle)?;
        let n = dev.lock().read_timeout(buf, timeout_ms(timeout))?;
        Ok(n)
    }

    fn write(&self, handle: RawHandle, buf: &[u8]) -> TransportResult<usize> {
        let dev = self.handles.get(handle)?;
        let n = dev.lock().write(buf)?;
        Ok(n)
    }

    fn attributes(&self, handle: RawHandle) -> TransportResult<Attributes> {
        let dev = self.handles.get(handle)?;
        let info = dev.lock().get_device_info()?;
        Ok(Attributes {
            vendor_id: info.vendor_id(),
            product_id: info.product_id(),
            version_number: info.release_number(),
        })
    }

    fn preparsed_data(&self, handle: RawHandle) -> TransportResult<PreparsedBlob> {
        let dev = self.handles.get(handle)?;
        let mut desc = vec![0u8; MAX_DESCRIPTOR_LEN];
        let n = dev.lock().get_report_descriptor(&mut desc)?;
        let caps = parse_capabilities(&desc[..n]);
        log::trace!("hidapi: {} descriptor {n} bytes → {caps:?}", dev.path);
        Ok(PreparsedBlob::new(self.blobs.insert(caps).raw()))
    }

    fn free_preparsed_data(&self, blob: PreparsedBlob) {
        self.blobs.remove(RawHandle::new(blob.raw()));
    }

    fn capabilities(&self, blob: &PreparsedBlob) -> TransportResult<Capabilities> {
        Ok(*self.blobs.get(RawHandle::new(blob.raw()))?)
    }

    fn string(&self, handle: RawHandle, kind: StringKind) -> TransportResult<String> {
        let dev = self.handles.get(handle)?;
        let device = dev.lock();
        let s = match kind {
            StringKind::Manufacturer => device.get_manufacturer_string()?,
            StringKind::Product => device.get_product_string()?,
            StringKind::SerialNumber => device.get_serial_number_string()?,
        };
        Ok(s.unwrap_or_default())
    }

    fn flush_queue(&self, handle: RawHandle) -> TransportResult<()> {
        let dev = self.handles.get(handle)?;
        let device = dev.lock();
        let mut scratch = [0u8; 256];
        for _ in 0..MAX_FLUSH {
            if device.read_timeout(&mut scratch, 0)? == 0 {
                break;
            }
        }
        Ok(())
    }

    fn num_input_buffers(&self, _handle: RawHandle) -> TransportResult<u32> {
        Err(TransportError::Unsupported("input buffer depth"))
    }

    fn set_num_input_buffers(&self, _handle: RawHandle, _count: u32) -> TransportResult<()> {
        Err(TransportError::Unsupported("input buffer depth"))
    }

    fn get_feature(&self, handle: RawHandle, buf: &mut [u8]) -> TransportResult<usize> {
        let dev = self.handles.get(handle)?;
        let n = dev.lock().get_feature_report(buf)?;
        Ok(n)
    }

    fn set_feature(&self, handle: RawHandle, buf: &[u8]) -> TransportResult<()> {
        let dev = self.handles.get(handle)?;
        dev.lock().send_feature_report(buf)?;
        Ok(())
    }

    fn get_input_report(&self, handle: RawHandle, buf: &mut [u8]) -> TransportResult<usize> {
        let dev = self.handles.get(handle)?;
        let n = dev.lock().get_input_report(buf)?;
        Ok(n)
    }

    fn set_output_report(&self, handle: RawHandle, buf: &[u8]) -> TransportResult<()> {
        // hidapi routes output reports without an interrupt OUT endpoint through the
        // control pipe itself.
        let written = self.write(handle, buf)?;
        if written < buf.len() {
            return Err(TransportError::ShortTransfer {
                expected: buf.len(),
                actual: written,
            });
        }
        Ok(())
    }
}
