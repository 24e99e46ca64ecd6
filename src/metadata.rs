//! Device metadata snapshots.
//!
//! [`Capabilities`] mirrors the Windows `HIDP_CAPS` structure: report byte lengths,
//! the top-level collection's usage, and descriptor structure counts. Backends that have
//! no preparsed data (hidapi on Linux/macOS) derive it from the raw report descriptor.
//!
//! [`DeviceInfo`] is a lightweight, cloneable description of the acquired device,
//! suitable for UI display, logging and persistence.
//!
//! ## Conventions
//! - Report byte lengths **include** the report ID byte, exactly as Windows reports them.
//!   A length of `0` means "unknown / not supported"; callers must check before sizing
//!   buffers.
//! - `path` is platform-specific and may change across ports and reconnects; treat it as
//!   diagnostic first, identity second.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Report-length and usage metadata for one HID top-level collection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub usage: u16,
    pub usage_page: u16,
    pub input_report_byte_length: u16,
    pub output_report_byte_length: u16,
    pub feature_report_byte_length: u16,
    pub number_link_collection_nodes: u16,
    pub number_input_button_caps: u16,
    pub number_input_value_caps: u16,
    pub number_input_data_indices: u16,
    pub number_output_button_caps: u16,
    pub number_output_value_caps: u16,
    pub number_output_data_indices: u16,
    pub number_feature_button_caps: u16,
    pub number_feature_value_caps: u16,
    pub number_feature_data_indices: u16,
}

impl Capabilities {
    /// `usage_page * 256 + usage`, truncated to 16 bits.
    ///
    /// Generic Desktop (0x01) / Mouse (0x02) gives `0x0102`.
    #[inline]
    pub fn usage_code(&self) -> u16 {
        self.usage_page.wrapping_mul(256).wrapping_add(self.usage)
    }

    /// `true` when nothing was populated (probe failure).
    pub fn is_empty(&self) -> bool {
        *self == Capabilities::default()
    }
}

/// Coarse classification of the top-level collection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceUsage {
    /// Generic Desktop / Mouse. Owned by the OS; stream handles will not open.
    Mouse,
    /// Generic Desktop / Keyboard. Owned by the OS; stream handles will not open.
    Keyboard,
    #[default]
    Unknown,
}

impl DeviceUsage {
    /// `"mouse"`, `"keyboard"` or `""`.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceUsage::Mouse => "mouse",
            DeviceUsage::Keyboard => "keyboard",
            DeviceUsage::Unknown => "",
        }
    }

    /// `true` for devices the OS reserves for itself.
    pub fn is_system_reserved(&self) -> bool {
        !matches!(self, DeviceUsage::Unknown)
    }
}

impl fmt::Display for DeviceUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Vendor/product/version triple (`HIDD_ATTRIBUTES`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attributes {
    pub vendor_id: u16,
    pub product_id: u16,
    pub version_number: u16,
}

/// Snapshot of the acquired device.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// OS device interface path (opaque).
    pub path: String,

    /// USB Vendor ID / Product ID / release number.
    pub attributes: Attributes,

    /// iManufacturer string, empty if the device has none.
    pub manufacturer: String,

    /// iProduct string, empty if the device has none.
    pub product: String,

    /// iSerialNumber string, empty if the device has none.
    pub serial_number: String,

    /// Classification of the top-level collection.
    pub usage: DeviceUsage,

    /// Depth of the driver's input report ring buffer, if it could be read.
    pub input_buffers: Option<u32>,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} {:?} ({})",
            self.attributes.vendor_id, self.attributes.product_id, self.product, self.path
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_code_combines_page_and_usage() {
        let caps = Capabilities {
            usage_page: 0x01,
            usage: 0x06,
            ..Default::default()
        };
        assert_eq!(caps.usage_code(), 0x0106);
    }

    #[test]
    fn usage_code_truncates_vendor_pages() {
        let caps = Capabilities {
            usage_page: 0xff00,
            usage: 0x01,
            ..Default::default()
        };
        assert_eq!(caps.usage_code(), 0x0001);
    }

    #[test]
    fn usage_strings() {
        assert_eq!(DeviceUsage::Mouse.as_str(), "mouse");
        assert_eq!(DeviceUsage::Keyboard.to_string(), "keyboard");
        assert_eq!(DeviceUsage::Unknown.as_str(), "");
        assert!(!DeviceUsage::Unknown.is_system_reserved());
    }
}
