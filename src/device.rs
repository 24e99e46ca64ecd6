//! Device identity: what a session is looking for.
//!
//! A [`DeviceIdentity`] names the target by USB vendor/product ID plus optional
//! substring filters over the manufacturer, product and serial strings. An empty filter
//! is a wildcard.
//!
//! ## Persistence notes
//! - VID/PID and serial (when present) are stable across reconnects and ports.
//! - Device paths are not; the session re-resolves the path on every acquisition.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::metadata::Attributes;

/// Match criteria for the target device. Immutable once a session is built.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Substring of the manufacturer string (empty = any).
    #[serde(default)]
    pub manufacturer: String,
    /// Substring of the product string (empty = any).
    #[serde(default)]
    pub product: String,
    /// Substring of the serial number string (empty = any).
    #[serde(default)]
    pub serial: String,
}

impl DeviceIdentity {
    /// VID/PID only; all string filters are wildcards.
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
            ..Default::default()
        }
    }

    pub fn with_manufacturer(mut self, filter: impl Into<String>) -> Self {
        self.manufacturer = filter.into();
        self
    }

    pub fn with_product(mut self, filter: impl Into<String>) -> Self {
        self.product = filter.into();
        self
    }

    pub fn with_serial(mut self, filter: impl Into<String>) -> Self {
        self.serial = filter.into();
        self
    }

    /// VID/PID check, the cheap first stage of matching.
    #[inline]
    pub fn matches_ids(&self, attrs: &Attributes) -> bool {
        attrs.vendor_id == self.vendor_id && attrs.product_id == self.product_id
    }

    /// String stage: every filter must be a substring of the corresponding device string.
    pub fn matches_strings(&self, manufacturer: &str, product: &str, serial: &str) -> bool {
        manufacturer.contains(self.manufacturer.as_str())
            && product.contains(self.product.as_str())
            && serial.contains(self.serial.as_str())
    }

    /// `true` if no string filter is set.
    pub fn has_string_filters(&self) -> bool {
        !(self.manufacturer.is_empty() && self.product.is_empty() && self.serial.is_empty())
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)?;
        if self.has_string_filters() {
            write!(
                f,
                " [mfr~{:?} prod~{:?} sn~{:?}]",
                self.manufacturer, self.product, self.serial
            )?;
        }
        Ok(())
    }
}

/// 128-bit device interface class identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ClassGuid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl ClassGuid {
    /// `GUID_DEVINTERFACE_HID`, `{4D1E55B2-F16F-11CF-88CB-001111000030}`.
    pub const HID: ClassGuid = ClassGuid {
        data1: 0x4D1E_55B2,
        data2: 0xF16F,
        data3: 0x11CF,
        data4: [0x88, 0xCB, 0x00, 0x11, 0x11, 0x00, 0x00, 0x30],
    };
}

impl Default for ClassGuid {
    fn default() -> Self {
        ClassGuid::HID
    }
}

impl fmt::Display for ClassGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = &self.data4;
        write!(
            f,
            "{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
            self.data1, self.data2, self.data3, d[0], d[1], d[2], d[3], d[4], d[5], d[6], d[7]
        )
    }
}

/// Error parsing a [`ClassGuid`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed GUID {0:?}")]
pub struct ParseGuidError(pub String);

impl FromStr for ClassGuid {
    type Err = ParseGuidError;

    /// Accepts `XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX`, optionally wrapped in braces.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseGuidError(s.to_string());
        let body = s.trim().trim_start_matches('{').trim_end_matches('}');
        if !body.is_ascii() {
            return Err(err());
        }
        let groups: Vec<&str> = body.split('-').collect();
        let lens = [8usize, 4, 4, 4, 12];
        if groups.len() != lens.len() || groups.iter().zip(lens).any(|(g, l)| g.len() != l) {
            return Err(err());
        }

        let data1 = u32::from_str_radix(groups[0], 16).map_err(|_| err())?;
        let data2 = u16::from_str_radix(groups[1], 16).map_err(|_| err())?;
        let data3 = u16::from_str_radix(groups[2], 16).map_err(|_| err())?;

        let tail = format!("{}{}", groups[3], groups[4]);
        let mut data4 = [0u8; 8];
        for (i, byte) in data4.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&tail[i * 2..i * 2 + 2], 16).map_err(|_| err())?;
        }

        Ok(ClassGuid {
            data1,
            data2,
            data3,
            data4,
        })
    }
}

impl Serialize for ClassGuid {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ClassGuid {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filters_match_any_strings() {
        let id = DeviceIdentity::new(0x04d8, 0x003f);
        assert!(id.matches_strings("", "", ""));
        assert!(id.matches_strings("Microchip", "Custom HID", "0001"));
    }

    #[test]
    fn serial_filter_is_substring() {
        let id = DeviceIdentity::new(1, 2).with_serial("12");
        assert!(id.matches_strings("", "", "AB12CD"));
        assert!(!id.matches_strings("", "", "AB1C2D"));
    }

    #[test]
    fn all_filters_must_match() {
        let id = DeviceIdentity::new(1, 2)
            .with_manufacturer("Micro")
            .with_product("HID");
        assert!(id.matches_strings("Microchip", "Custom HID", ""));
        assert!(!id.matches_strings("Microchip", "Custom Device", ""));
    }

    #[test]
    fn id_stage() {
        let id = DeviceIdentity::new(0x04d8, 0x003f);
        let ok = Attributes {
            vendor_id: 0x04d8,
            product_id: 0x003f,
            version_number: 1,
        };
        assert!(id.matches_ids(&ok));
        assert!(!id.matches_ids(&Attributes {
            product_id: 0x0040,
            ..ok
        }));
    }

    #[test]
    fn guid_round_trip() {
        let text = "4D1E55B2-F16F-11CF-88CB-001111000030";
        let guid: ClassGuid = text.parse().unwrap();
        assert_eq!(guid, ClassGuid::HID);
        assert_eq!(guid.to_string(), text);
        assert_eq!("{4d1e55b2-f16f-11cf-88cb-001111000030}".parse::<ClassGuid>(), Ok(ClassGuid::HID));
    }

    #[test]
    fn guid_rejects_garbage() {
        assert!("4D1E55B2-F16F-11CF-88CB".parse::<ClassGuid>().is_err());
        assert!("ZZZZZZZZ-F16F-11CF-88CB-001111000030".parse::<ClassGuid>().is_err());
    }
}
