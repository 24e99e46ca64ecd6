//! Capability probe.
//!
//! `HidD_GetPreparsedData` → `HidP_GetCaps` → `HidD_FreePreparsedData`. The blob is held
//! by a [`PreparsedData`] guard so it is released on every exit path.

use crate::backends::{HidBackend, PreparsedBlob, RawHandle};
use crate::error::TransportResult;
use crate::metadata::{Capabilities, DeviceUsage};

const USAGE_MOUSE: u16 = 0x0102;
const USAGE_KEYBOARD: u16 = 0x0106;

/// Preparsed data borrowed from a backend; freed on drop.
pub struct PreparsedData<'a> {
    backend: &'a dyn HidBackend,
    blob: Option<PreparsedBlob>,
}

impl<'a> PreparsedData<'a> {
    pub fn acquire(backend: &'a dyn HidBackend, handle: RawHandle) -> TransportResult<Self> {
        let blob = backend.preparsed_data(handle)?;
        Ok(Self {
            backend,
            blob: Some(blob),
        })
    }

    pub fn capabilities(&self) -> TransportResult<Capabilities> {
        match &self.blob {
            Some(blob) => self.backend.capabilities(blob),
            None => Ok(Capabilities::default()),
        }
    }
}

impl Drop for PreparsedData<'_> {
    fn drop(&mut self) {
        if let Some(blob) = self.blob.take() {
            self.backend.free_preparsed_data(blob);
        }
    }
}

/// Query report lengths and usage for an open handle.
///
/// Any failure yields `Capabilities::default()`; check the byte lengths before use.
pub fn query_capabilities(backend: &dyn HidBackend, handle: RawHandle) -> Capabilities {
    let result = PreparsedData::acquire(backend, handle).and_then(|ppd| ppd.capabilities());
    match result {
        Ok(caps) => caps,
        Err(e) => {
            log::warn!("capability probe failed on {handle:?}: {e}");
            Capabilities::default()
        }
    }
}

/// Recognise the two OS-reserved Generic Desktop collections.
pub fn classify_usage(caps: &Capabilities) -> DeviceUsage {
    match caps.usage_code() {
        USAGE_MOUSE => DeviceUsage::Mouse,
        USAGE_KEYBOARD => DeviceUsage::Keyboard,
        _ => DeviceUsage::Unknown,
    }
}

#[cfg(all(test, feature = "virtual"))]
mod tests {
    use super::*;
    use crate::backends::virtual_input::{VirtualBackend, VirtualDevice};
    use crate::backends::{AccessMode, ShareMode};

    #[test]
    fn classify_known_codes() {
        let mut caps = Capabilities {
            usage_page: 0x01,
            usage: 0x02,
            ..Default::default()
        };
        assert_eq!(classify_usage(&caps), DeviceUsage::Mouse);
        caps.usage = 0x06;
        assert_eq!(classify_usage(&caps), DeviceUsage::Keyboard);
        caps.usage = 0x04;
        assert_eq!(classify_usage(&caps), DeviceUsage::Unknown);
        assert_eq!(classify_usage(&Capabilities::default()), DeviceUsage::Unknown);
    }

    #[test]
    fn blob_released_on_success() {
        let backend = VirtualBackend::new();
        backend.attach(VirtualDevice::new("dev0", 0x04d8, 0x003f).with_report_lengths(65, 65, 0));
        let h = backend.open("dev0", AccessMode::Metadata, ShareMode::ReadWrite).unwrap();

        let caps = query_capabilities(&backend, h);
        assert_eq!(caps.input_report_byte_length, 65);
        assert_eq!(backend.outstanding_preparsed(), 0);
    }

    #[test]
    fn blob_released_when_caps_fail() {
        let backend = VirtualBackend::new();
        backend.attach(
            VirtualDevice::new("dev0", 0x04d8, 0x003f)
                .with_report_lengths(65, 65, 0)
                .failing_caps(),
        );
        let h = backend.open("dev0", AccessMode::Metadata, ShareMode::ReadWrite).unwrap();

        let caps = query_capabilities(&backend, h);
        assert!(caps.is_empty());
        assert_eq!(backend.preparsed_acquired(), 1);
        assert_eq!(backend.outstanding_preparsed(), 0);
    }

    #[test]
    fn invalid_handle_yields_default() {
        let backend = VirtualBackend::new();
        let caps = query_capabilities(&backend, RawHandle::new(999));
        assert!(caps.is_empty());
        assert_eq!(backend.preparsed_acquired(), 0);
    }
}
