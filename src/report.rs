//! HID report value type.
//!
//! A [`Report`] is `[report_id][payload...]`. Its shape (payload length) is fixed at
//! construction; its content is freely mutable. Only [`Report::resize`] changes the shape.
//!
//! Windows HID stacks always transfer the ID byte, even for devices that declare no
//! report IDs (they use ID 0), so the serialized form is always `payload.len() + 1` bytes.

use std::fmt;

/// One HID report (ID + payload).
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Report {
    id: u8,
    payload: Vec<u8>,
}

impl Report {
    /// Build a report from an ID and payload.
    pub fn new(id: u8, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }

    /// Zero-filled report whose serialized length is `total_size` (ID byte included).
    ///
    /// `total_size == 0` yields the unset report.
    pub fn with_total_size(total_size: usize) -> Self {
        Self {
            id: 0,
            payload: vec![0u8; total_size.saturating_sub(1)],
        }
    }

    /// Single-byte payload.
    pub fn from_id_and_byte(id: u8, byte: u8) -> Self {
        Self::new(id, vec![byte])
    }

    /// Copy `buf` into a new report.
    ///
    /// An absent buffer leaves the report unset (`id == 0`, empty payload); check
    /// [`is_unset`](Self::is_unset) before sending it.
    pub fn from_id_and_buffer(id: u8, buf: Option<&[u8]>) -> Self {
        match buf {
            Some(bytes) => Self::new(id, bytes),
            None => Self::default(),
        }
    }

    /// Decode a raw transfer buffer: first byte is the ID, the rest the payload.
    ///
    /// An empty buffer decodes to the unset report.
    pub fn from_raw(buf: &[u8]) -> Self {
        match buf.split_first() {
            Some((&id, payload)) => Self::new(id, payload),
            None => Self::default(),
        }
    }

    #[inline]
    pub fn id(&self) -> u8 {
        self.id
    }

    #[inline]
    pub fn set_id(&mut self, id: u8) {
        self.id = id;
    }

    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Mutable view of the payload. The length cannot change through this view.
    #[inline]
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.payload
    }

    /// Serialized length (`payload.len() + 1`).
    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len() + 1
    }

    /// `true` if the report carries no payload.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// `true` for the report produced from an absent or empty buffer.
    pub fn is_unset(&self) -> bool {
        self.id == 0 && self.payload.is_empty()
    }

    /// Change the payload length, keeping the existing prefix and zero-filling growth.
    pub fn resize(&mut self, payload_len: usize) {
        self.payload.resize(payload_len, 0);
    }

    /// `[id] + payload`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        out.push(self.id);
        out.extend_from_slice(&self.payload);
        out
    }

    /// `[id] + payload`, truncated to at most `max_len` bytes.
    ///
    /// Always returns exactly `min(max_len, payload.len() + 1)` bytes.
    pub fn to_bytes_max(&self, max_len: usize) -> Vec<u8> {
        let total = max_len.min(self.len());
        let mut out = Vec::with_capacity(total);
        if total > 0 {
            out.push(self.id);
            out.extend_from_slice(&self.payload[..total - 1]);
        }
        out
    }

    /// Serialize into a zero-padded buffer of exactly `len` bytes.
    ///
    /// This is the shape Windows expects for `WriteFile` / `HidD_SetFeature`: the buffer
    /// must be the full report length declared by the device.
    pub fn to_padded(&self, len: usize) -> Vec<u8> {
        let mut out = self.to_bytes_max(len);
        out.resize(len, 0);
        out
    }
}

impl From<&[u8]> for Report {
    fn from(raw: &[u8]) -> Self {
        Report::from_raw(raw)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:02x}]", self.id)?;
        for b in &self.payload {
            write!(f, " {b:02x}")?;
        }
        Ok(())
    }
}
