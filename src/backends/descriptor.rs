//! Report descriptor walker.
//!
//! Backends without an OS parser (hidapi on Linux/macOS) hand us the raw HID report
//! descriptor. This module derives the same [`Capabilities`] Windows' `HidP_GetCaps`
//! would report: byte lengths per report kind (ID byte included), the first top-level
//! collection's usage, and coarse button/value cap counts.
//!
//! Only what is needed to size buffers and classify the device is extracted; usages,
//! logical ranges and units are skipped.

use crate::metadata::Capabilities;
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum MainKind {
    Input,
    Output,
    Feature,
}

#[derive(Clone, Copy, Default)]
struct Globals {
    usage_page: u16,
    report_size: u32,
    report_count: u32,
    report_id: u8,
}

#[derive(Default)]
struct Locals {
    usages: u32,
    first_usage: Option<u32>,
    usage_min: Option<u32>,
    usage_max: Option<u32>,
}

fn clamp_u16(n: u32) -> u16 {
    u16::try_from(n).unwrap_or(u16::MAX)
}

impl Locals {
    /// Number of distinct usages declared for an array item.
    fn span(&self) -> u32 {
        match (self.usage_min, self.usage_max) {
            (Some(lo), Some(hi)) if hi >= lo => (hi - lo).saturating_add(1),
            _ => self.usages.max(1),
        }
    }
}

#[derive(Default)]
struct Counters {
    button_caps: u16,
    value_caps: u16,
    data_indices: u16,
}

/// Parse a raw report descriptor into [`Capabilities`].
///
/// Malformed trailing bytes are ignored; whatever was parsed up to that point is used.
pub fn parse_capabilities(desc: &[u8]) -> Capabilities {
    let mut caps = Capabilities::default();
    let mut globals = Globals::default();
    let mut stack: Vec<Globals> = Vec::new();
    let mut locals = Locals::default();
    let mut depth = 0u32;
    let mut top_level_seen = false;

    let mut bits: BTreeMap<(MainKind, u8), u32> = BTreeMap::new();
    let mut input = Counters::default();
    let mut output = Counters::default();
    let mut feature = Counters::default();

    let mut i = 0;
    while i < desc.len() {
        let prefix = desc[i];

        // Long items: 0xFE, size, tag, data...
        if prefix == 0xFE {
            let size = desc.get(i + 1).copied().unwrap_or(0) as usize;
            i += 3 + size;
            continue;
        }

        let tag = prefix >> 4;
        let item_type = (prefix >> 2) & 0x03;
        let size = match prefix & 0x03 {
            3 => 4,
            n => n as usize,
        };
        if i + 1 + size > desc.len() {
            break;
        }
        let data = &desc[i + 1..i + 1 + size];
        let value = data
            .iter()
            .rev()
            .fold(0u32, |acc, &b| (acc << 8) | u32::from(b));

        match item_type {
            // Main
            0 => {
                let kind = match tag {
                    0x08 => Some(MainKind::Input),
                    0x09 => Some(MainKind::Output),
                    0x0B => Some(MainKind::Feature),
                    _ => None,
                };
                if let Some(kind) = kind {
                    let total = globals.report_size.saturating_mul(globals.report_count);
                    let acc = bits.entry((kind, globals.report_id)).or_insert(0);
                    *acc = acc.saturating_add(total);

                    let is_constant = value & 0x01 != 0;
                    let is_variable = value & 0x02 != 0;
                    if !is_constant {
                        let counters = match kind {
                            MainKind::Input => &mut input,
                            MainKind::Output => &mut output,
                            MainKind::Feature => &mut feature,
                        };
                        if globals.report_size == 1 || !is_variable {
                            counters.button_caps = counters.button_caps.saturating_add(1);
                            let indices = if is_variable {
                                globals.report_count
                            } else {
                                locals.span()
                            };
                            counters.data_indices = counters.data_indices.saturating_add(clamp_u16(indices));
                        } else {
                            counters.value_caps = counters.value_caps.saturating_add(1);
                            counters.data_indices =
                                counters.data_indices.saturating_add(clamp_u16(globals.report_count));
                        }
                    }
                } else if tag == 0x0A {
                    // Collection
                    caps.number_link_collection_nodes = caps.number_link_collection_nodes.saturating_add(1);
                    if depth == 0 && !top_level_seen {
                        top_level_seen = true;
                        let usage = locals.first_usage.unwrap_or(0);
                        if usage > 0xFFFF {
                            // Extended usage: page in the high half.
                            caps.usage_page = (usage >> 16) as u16;
                        } else {
                            caps.usage_page = globals.usage_page;
                        }
                        caps.usage = (usage & 0xFFFF) as u16;
                    }
                    depth = depth.saturating_add(1);
                } else if tag == 0x0C {
                    depth = depth.saturating_sub(1);
                }
                locals = Locals::default();
            }
            // Global
            1 => match tag {
                0x00 => globals.usage_page = value as u16,
                0x07 => globals.report_size = value,
                0x08 => globals.report_id = value as u8,
                0x09 => globals.report_count = value,
                0x0A => stack.push(globals),
                0x0B => {
                    if let Some(saved) = stack.pop() {
                        globals = saved;
                    }
                }
                _ => {}
            },
            // Local
            2 => match tag {
                0x00 => {
                    locals.usages = locals.usages.saturating_add(1);
                    if locals.first_usage.is_none() {
                        locals.first_usage = Some(value);
                    }
                }
                0x01 => locals.usage_min = Some(value),
                0x02 => locals.usage_max = Some(value),
                _ => {}
            },
            _ => {}
        }

        i += 1 + size;
    }

    let byte_len = |kind: MainKind| -> u16 {
        bits.iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, &b)| b.div_ceil(8) + 1)
            .max()
            .map_or(0, |len| len.min(u32::from(u16::MAX)) as u16)
    };
    caps.input_report_byte_length = byte_len(MainKind::Input);
    caps.output_report_byte_length = byte_len(MainKind::Output);
    caps.feature_report_byte_length = byte_len(MainKind::Feature);

    caps.number_input_button_caps = input.button_caps;
    caps.number_input_value_caps = input.value_caps;
    caps.number_input_data_indices = input.data_indices;
    caps.number_output_button_caps = output.button_caps;
    caps.number_output_value_caps = output.value_caps;
    caps.number_output_data_indices = output.data_indices;
    caps.number_feature_button_caps = feature.button_caps;
    caps.number_feature_value_caps = feature.value_caps;
    caps.number_feature_data_indices = feature.data_indices;
    caps
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Microchip "Simple HID" vendor descriptor: 64-byte in/out, no report IDs.
    const VENDOR_64: &[u8] = &[
        0x06, 0x00, 0xFF, // Usage Page (Vendor 0xFF00)
        0x09, 0x01, // Usage (1)
        0xA1, 0x01, // Collection (Application)
        0x19, 0x01, //   Usage Minimum (1)
        0x29, 0x40, //   Usage Maximum (64)
        0x15, 0x00, //   Logical Minimum (0)
        0x26, 0xFF, 0x00, // Logical Maximum (255)
        0x75, 0x08, //   Report Size (8)
        0x95, 0x40, //   Report Count (64)
        0x81, 0x00, //   Input (Data, Array)
        0x19, 0x01, //   Usage Minimum (1)
        0x29, 0x40, //   Usage Maximum (64)
        0x91, 0x00, //   Output (Data, Array)
        0xC0, // End Collection
    ];

    /// Boot mouse: 3 buttons + 5 bit padding + X/Y.
    const BOOT_MOUSE: &[u8] = &[
        0x05, 0x01, // Usage Page (Generic Desktop)
        0x09, 0x02, // Usage (Mouse)
        0xA1, 0x01, // Collection (Application)
        0x09, 0x01, //   Usage (Pointer)
        0xA1, 0x00, //   Collection (Physical)
        0x05, 0x09, //     Usage Page (Button)
        0x19, 0x01, //     Usage Minimum (1)
        0x29, 0x03, //     Usage Maximum (3)
        0x15, 0x00, //     Logical Minimum (0)
        0x25, 0x01, //     Logical Maximum (1)
        0x95, 0x03, //     Report Count (3)
        0x75, 0x01, //     Report Size (1)
        0x81, 0x02, //     Input (Data, Var, Abs)
        0x95, 0x01, //     Report Count (1)
        0x75, 0x05, //     Report Size (5)
        0x81, 0x01, //     Input (Const)
        0x05, 0x01, //     Usage Page (Generic Desktop)
        0x09, 0x30, //     Usage (X)
        0x09, 0x31, //     Usage (Y)
        0x15, 0x81, //     Logical Minimum (-127)
        0x25, 0x7F, //     Logical Maximum (127)
        0x75, 0x08, //     Report Size (8)
        0x95, 0x02, //     Report Count (2)
        0x81, 0x06, //     Input (Data, Var, Rel)
        0xC0, //   End Collection
        0xC0, // End Collection
    ];

    #[test]
    fn vendor_descriptor_lengths() {
        let caps = parse_capabilities(VENDOR_64);
        assert_eq!(caps.usage_page, 0xFF00);
        assert_eq!(caps.usage, 0x01);
        assert_eq!(caps.input_report_byte_length, 65);
        assert_eq!(caps.output_report_byte_length, 65);
        assert_eq!(caps.feature_report_byte_length, 0);
        assert_eq!(caps.number_link_collection_nodes, 1);
        assert_eq!(caps.number_input_button_caps, 1);
        assert_eq!(caps.number_input_data_indices, 64);
    }

    #[test]
    fn boot_mouse_classifies_and_sizes() {
        let caps = parse_capabilities(BOOT_MOUSE);
        assert_eq!(caps.usage_code(), 0x0102);
        // 3 + 5 + 16 bits = 3 bytes, plus the ID byte.
        assert_eq!(caps.input_report_byte_length, 4);
        assert_eq!(caps.output_report_byte_length, 0);
        assert_eq!(caps.number_link_collection_nodes, 2);
        assert_eq!(caps.number_input_button_caps, 1);
        assert_eq!(caps.number_input_value_caps, 1);
        assert_eq!(caps.number_input_data_indices, 5);
    }

    #[test]
    fn longest_report_id_wins() {
        let desc: &[u8] = &[
            0x06, 0x00, 0xFF, // Usage Page (Vendor)
            0x09, 0x01, // Usage (1)
            0xA1, 0x01, // Collection
            0x85, 0x01, //   Report ID (1)
            0x75, 0x08, //   Report Size (8)
            0x95, 0x04, //   Report Count (4)
            0xB1, 0x02, //   Feature (Var)
            0x85, 0x02, //   Report ID (2)
            0x95, 0x10, //   Report Count (16)
            0xB1, 0x02, //   Feature (Var)
            0xC0,
        ];
        let caps = parse_capabilities(desc);
        assert_eq!(caps.feature_report_byte_length, 17);
        assert_eq!(caps.number_feature_value_caps, 2);
    }

    #[test]
    fn truncated_descriptor_does_not_panic() {
        let caps = parse_capabilities(&VENDOR_64[..VENDOR_64.len() - 6]);
        assert_eq!(caps.input_report_byte_length, 65);
        assert_eq!(parse_capabilities(&[0x26, 0xFF]), Capabilities::default());
    }

    #[test]
    fn oversized_fields_saturate() {
        let desc: &[u8] = &[
            0x77, 0xFF, 0xFF, 0xFF, 0xFF, // Report Size (u32::MAX)
            0x97, 0xFF, 0xFF, 0xFF, 0xFF, // Report Count (u32::MAX)
            0x81, 0x02, // Input (Var)
            0x81, 0x02, // Input (Var)
            0x1B, 0x00, 0x00, 0x00, 0x00, // Usage Minimum (0)
            0x2B, 0xFF, 0xFF, 0xFF, 0xFF, // Usage Maximum (u32::MAX)
            0xB1, 0x00, // Feature (Array)
        ];
        let caps = parse_capabilities(desc);
        assert_eq!(caps.input_report_byte_length, u16::MAX);
        assert_eq!(caps.feature_report_byte_length, u16::MAX);
        assert_eq!(caps.number_input_value_caps, 2);
        assert_eq!(caps.number_input_data_indices, u16::MAX);
        assert_eq!(caps.number_feature_button_caps, 1);
    }
}
