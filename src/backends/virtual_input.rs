//! In-memory HID backend.
//!
//! [`VirtualBackend`] hosts scripted [`VirtualDevice`]s and implements [`HidBackend`]
//! against them. It exists for tests and demos: every call is recorded in a call log,
//! failures can be injected per operation, devices can be attached and detached at
//! runtime, and control transfers can be paused to exercise concurrency guards.
//!
//! Enumeration order is attach order.

use crate::backends::{AccessMode, HidBackend, PreparsedBlob, RawHandle, ShareMode, StringKind};
use crate::device::ClassGuid;
use crate::error::{TransportError, TransportResult};
use crate::metadata::{Attributes, Capabilities};
use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

const ERROR_FILE_NOT_FOUND: u32 = 2;
const ERROR_ACCESS_DENIED: u32 = 5;
const ERROR_GEN_FAILURE: u32 = 31;

/// A scripted device.
#[derive(Clone, Debug)]
pub struct VirtualDevice {
    pub path: String,
    pub class: ClassGuid,
    pub attributes: Attributes,
    pub manufacturer: String,
    pub product: String,
    pub serial: String,
    pub caps: Capabilities,
    /// Streams refuse to open (system mouse / keyboard behaviour).
    pub reserved: bool,
    pub fail_attributes: bool,
    pub fail_caps: bool,
    /// Every open fails, metadata-only included (an OS-held device seen through hidapi).
    pub exclusive: bool,
    pub input_buffers: u32,
    /// Feature report contents by report ID (ID byte included).
    pub features: HashMap<u8, Vec<u8>>,
    /// Answer for control-pipe input report reads, by report ID.
    pub input_reports: HashMap<u8, Vec<u8>>,
}

impl VirtualDevice {
    pub fn new(path: impl Into<String>, vendor_id: u16, product_id: u16) -> Self {
        Self {
            path: path.into(),
            class: ClassGuid::HID,
            attributes: Attributes {
                vendor_id,
                product_id,
                version_number: 0x0100,
            },
            manufacturer: String::new(),
            product: String::new(),
            serial: String::new(),
            caps: Capabilities {
                usage_page: 0xFF00,
                usage: 0x01,
                ..Default::default()
            },
            reserved: false,
            fail_attributes: false,
            fail_caps: false,
            exclusive: false,
            input_buffers: 32,
            features: HashMap::new(),
            input_reports: HashMap::new(),
        }
    }

    pub fn with_strings(mut self, manufacturer: &str, product: &str, serial: &str) -> Self {
        self.manufacturer = manufacturer.to_string();
        self.product = product.to_string();
        self.serial = serial.to_string();
        self
    }

    /// Report byte lengths, ID byte included.
    pub fn with_report_lengths(mut self, input: u16, output: u16, feature: u16) -> Self {
        self.caps.input_report_byte_length = input;
        self.caps.output_report_byte_length = output;
        self.caps.feature_report_byte_length = feature;
        self
    }

    pub fn with_usage(mut self, usage_page: u16, usage: u16) -> Self {
        self.caps.usage_page = usage_page;
        self.caps.usage = usage;
        self
    }

    pub fn with_feature(mut self, raw: Vec<u8>) -> Self {
        if let Some(&id) = raw.first() {
            self.features.insert(id, raw);
        }
        self
    }

    pub fn with_input_report(mut self, raw: Vec<u8>) -> Self {
        if let Some(&id) = raw.first() {
            self.input_reports.insert(id, raw);
        }
        self
    }

    /// Refuse read/write opens, like the OS does for the system mouse and keyboard.
    pub fn system_reserved(mut self) -> Self {
        self.reserved = true;
        self
    }

    pub fn failing_attributes(mut self) -> Self {
        self.fail_attributes = true;
        self
    }

    pub fn failing_caps(mut self) -> Self {
        self.fail_caps = true;
        self
    }

    /// Refuse every open, the way hidapi sees a device the OS holds exclusively.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }
}

/// One recorded backend call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Enumerate,
    Open { path: String, access: AccessMode },
    Close { path: String },
    Attributes { path: String },
    String { path: String, kind: StringKind },
    Read { path: String },
    Write { path: String, data: Vec<u8> },
    Flush { path: String },
    GetNumInputBuffers { path: String },
    SetNumInputBuffers { path: String, count: u32 },
    GetFeature { path: String, id: u8 },
    SetFeature { path: String, data: Vec<u8> },
    GetInputReport { path: String, id: u8 },
    SetOutputReport { path: String, data: Vec<u8> },
}

struct OpenEntry {
    path: String,
    access: AccessMode,
}

#[derive(Default)]
struct Failures {
    reads: bool,
    writes: bool,
    control: bool,
    opens: bool,
    short_writes: bool,
}

#[derive(Default)]
struct State {
    devices: Vec<VirtualDevice>,
    queues: HashMap<String, VecDeque<Vec<u8>>>,
    handles: HashMap<u64, OpenEntry>,
    next_handle: u64,
    blobs: HashMap<u64, (Capabilities, bool)>,
    next_blob: u64,
    blobs_acquired: usize,
    calls: Vec<Call>,
    fail: Failures,
    control_paused: bool,
    control_waiting: usize,
}

impl State {
    fn device(&self, path: &str) -> Option<&VirtualDevice> {
        self.devices.iter().find(|d| d.path == path)
    }

    fn device_mut(&mut self, path: &str) -> Option<&mut VirtualDevice> {
        self.devices.iter_mut().find(|d| d.path == path)
    }

    /// Resolve a handle to its device path; fails if closed or detached.
    fn resolve(&self, handle: RawHandle) -> TransportResult<String> {
        let entry = self
            .handles
            .get(&handle.raw())
            .ok_or(TransportError::InvalidHandle)?;
        if self.device(&entry.path).is_none() {
            return Err(TransportError::Disconnected);
        }
        Ok(entry.path.clone())
    }
}

/// Scripted, thread-safe HID backend.
pub struct VirtualBackend {
    state: Mutex<State>,
    changed: Condvar,
}

impl VirtualBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_handle: 1,
                next_blob: 1,
                ..Default::default()
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Plug a device in (appended to the enumeration order).
    pub fn attach(&self, device: VirtualDevice) {
        let mut st = self.lock();
        st.queues.entry(device.path.clone()).or_default();
        st.devices.push(device);
        self.changed.notify_all();
    }

    /// Unplug a device. Open handles to it start failing with `Disconnected`.
    pub fn detach(&self, path: &str) {
        let mut st = self.lock();
        st.devices.retain(|d| d.path != path);
        st.queues.remove(path);
        self.changed.notify_all();
    }

    /// Queue an input report for interrupt reads (ID byte included).
    pub fn push_input(&self, path: &str, raw: Vec<u8>) {
        let mut st = self.lock();
        st.queues.entry(path.to_string()).or_default().push_back(raw);
        self.changed.notify_all();
    }

    pub fn pending_input(&self, path: &str) -> usize {
        self.lock().queues.get(path).map_or(0, VecDeque::len)
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.lock().fail.reads = fail;
        self.changed.notify_all();
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail.writes = fail;
    }

    pub fn set_fail_control(&self, fail: bool) {
        self.lock().fail.control = fail;
    }

    pub fn set_fail_opens(&self, fail: bool) {
        self.lock().fail.opens = fail;
    }

    /// Interrupt writes accept one byte less than offered.
    pub fn set_short_writes(&self, short: bool) {
        self.lock().fail.short_writes = short;
    }

    /// Block control transfers at entry until [`resume_control`](Self::resume_control).
    pub fn pause_control(&self) {
        self.lock().control_paused = true;
    }

    pub fn resume_control(&self) {
        self.lock().control_paused = false;
        self.changed.notify_all();
    }

    /// Number of control transfers currently blocked by [`pause_control`](Self::pause_control).
    pub fn control_waiting(&self) -> usize {
        self.lock().control_waiting
    }

    /// Wait until `n` control transfers are parked, or `timeout` passes.
    pub fn wait_control_waiting(&self, n: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut st = self.lock();
        while st.control_waiting < n {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            st = self
                .changed
                .wait_timeout(st, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    /// Snapshot of the call log.
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Count calls matching `pred`.
    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| pred(c)).count()
    }

    /// Data of every interrupt write, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Write { data, .. } => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn open_handles(&self) -> usize {
        self.lock().handles.len()
    }

    /// Preparsed blobs handed out and not yet freed.
    pub fn outstanding_preparsed(&self) -> usize {
        self.lock().blobs.len()
    }

    /// Preparsed blobs handed out in total.
    pub fn preparsed_acquired(&self) -> usize {
        self.lock().blobs_acquired
    }

    /// Current feature report content for `id` on `path`.
    pub fn feature(&self, path: &str, id: u8) -> Option<Vec<u8>> {
        self.lock().device(path)?.features.get(&id).cloned()
    }

    pub fn input_buffers(&self, path: &str) -> Option<u32> {
        self.lock().device(path).map(|d| d.input_buffers)
    }

    /// Park while control transfers are paused; fail if control failures are injected.
    fn enter_control<'a>(&'a self, mut st: MutexGuard<'a, State>) -> TransportResult<MutexGuard<'a, State>> {
        if st.control_paused {
            st.control_waiting += 1;
            self.changed.notify_all();
            while st.control_paused {
                st = self
                    .changed
                    .wait(st)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            st.control_waiting -= 1;
        }
        if st.fail.control {
            return Err(TransportError::Os {
                op: "control transfer",
                code: ERROR_GEN_FAILURE,
            });
        }
        Ok(st)
    }
}

impl Default for VirtualBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HidBackend for VirtualBackend {
    fn enumerate(&self, class: &ClassGuid) -> TransportResult<Vec<String>> {
        let mut st = self.lock();
        st.calls.push(Call::Enumerate);
        Ok(st
            .devices
            .iter()
            .filter(|d| d.class == *class)
            .map(|d| d.path.clone())
            .collect())
    }

    fn open(&self, path: &str, access: AccessMode, _share: ShareMode) -> TransportResult<RawHandle> {
        let mut st = self.lock();
        st.calls.push(Call::Open {
            path: path.to_string(),
            access,
        });
        if st.fail.opens {
            return Err(TransportError::Os {
                op: "CreateFileW",
                code: ERROR_GEN_FAILURE,
            });
        }
        let (reserved, exclusive) = match st.device(path) {
            Some(d) => (d.reserved, d.exclusive),
            None => {
                return Err(TransportError::Os {
                    op: "CreateFileW",
                    code: ERROR_FILE_NOT_FOUND,
                })
            }
        };
        if exclusive || (reserved && access != AccessMode::Metadata) {
            return Err(TransportError::Os {
                op: "CreateFileW",
                code: ERROR_ACCESS_DENIED,
            });
        }
        let id = st.next_handle;
        st.next_handle += 1;
        st.handles.insert(
            id,
            OpenEntry {
                path: path.to_string(),
                access,
            },
        );
        Ok(RawHandle::new(id))
    }

    fn close(&self, handle: RawHandle) {
        let mut st = self.lock();
        if let Some(entry) = st.handles.remove(&handle.raw()) {
            st.calls.push(Call::Close { path: entry.path });
            self.changed.notify_all();
        }
    }

    fn read(
        &self,
        handle: RawHandle,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> TransportResult<usize> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut st = self.lock();
        let path = st.resolve(handle)?;
        if st.handles.get(&handle.raw()).map(|e| e.access) != Some(AccessMode::Read) {
            return Err(TransportError::Os {
                op: "ReadFile",
                code: ERROR_ACCESS_DENIED,
            });
        }
        st.calls.push(Call::Read { path: path.clone() });

        loop {
            if st.fail.reads {
                return Err(TransportError::Os {
                    op: "ReadFile",
                    code: ERROR_GEN_FAILURE,
                });
            }
            // Re-resolve: the handle may have been closed or the device unplugged.
            st.resolve(handle)?;
            if let Some(raw) = st.queues.get_mut(&path).and_then(VecDeque::pop_front) {
                let n = raw.len().min(buf.len());
                buf[..n].copy_from_slice(&raw[..n]);
                return Ok(n);
            }
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(0);
                    }
                    st = self
                        .changed
                        .wait_timeout(st, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
                None => {
                    st = self
                        .changed
                        .wait(st)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }

    fn write(&self, handle: RawHandle, buf: &[u8]) -> TransportResult<usize> {
        let mut st = self.lock();
        let path = st.resolve(handle)?;
        st.calls.push(Call::Write {
            path,
            data: buf.to_vec(),
        });
        if st.fail.writes {
            return Err(TransportError::Os {
                op: "WriteFile",
                code: ERROR_GEN_FAILURE,
            });
        }
        if st.fail.short_writes {
            return Ok(buf.len().saturating_sub(1));
        }
        Ok(buf.len())
    }

    fn attributes(&self, handle: RawHandle) -> TransportResult<Attributes> {
        let mut st = self.lock();
        let path = st.resolve(handle)?;
        st.calls.push(Call::Attributes { path: path.clone() });
        match st.device(&path) {
            Some(d) if !d.fail_attributes => Ok(d.attributes),
            _ => Err(TransportError::Os {
                op: "HidD_GetAttributes",
                code: ERROR_GEN_FAILURE,
            }),
        }
    }

    fn preparsed_data(&self, handle: RawHandle) -> TransportResult<PreparsedBlob> {
        let mut st = self.lock();
        let path = st.resolve(handle)?;
        let (caps, fail) = match st.device(&path) {
            Some(d) => (d.caps, d.fail_caps),
            None => return Err(TransportError::Disconnected),
        };
        let id = st.next_blob;
        st.next_blob += 1;
        st.blobs.insert(id, (caps, fail));
        st.blobs_acquired += 1;
        Ok(PreparsedBlob::new(id))
    }

    fn free_preparsed_data(&self, blob: PreparsedBlob) {
        self.lock().blobs.remove(&blob.raw());
    }

    fn capabilities(&self, blob: &PreparsedBlob) -> TransportResult<Capabilities> {
        match self.lock().blobs.get(&blob.raw()) {
            Some((caps, false)) => Ok(*caps),
            _ => Err(TransportError::Os {
                op: "HidP_GetCaps",
                code: ERROR_GEN_FAILURE,
            }),
        }
    }

    fn string(&self, handle: RawHandle, kind: StringKind) -> TransportResult<String> {
        let mut st = self.lock();
        let path = st.resolve(handle)?;
        st.calls.push(Call::String {
            path: path.clone(),
            kind,
        });
        let d = st.device(&path).ok_or(TransportError::Disconnected)?;
        Ok(match kind {
            StringKind::Manufacturer => d.manufacturer.clone(),
            StringKind::Product => d.product.clone(),
            StringKind::SerialNumber => d.serial.clone(),
        })
    }

    fn flush_queue(&self, handle: RawHandle) -> TransportResult<()> {
        let mut st = self.lock();
        let path = st.resolve(handle)?;
        st.calls.push(Call::Flush { path: path.clone() });
        if let Some(q) = st.queues.get_mut(&path) {
            q.clear();
        }
        Ok(())
    }

    fn num_input_buffers(&self, handle: RawHandle) -> TransportResult<u32> {
        let mut st = self.lock();
        let path = st.resolve(handle)?;
        st.calls.push(Call::GetNumInputBuffers { path: path.clone() });
        st.device(&path)
            .map(|d| d.input_buffers)
            .ok_or(TransportError::Disconnected)
    }

    fn set_num_input_buffers(&self, handle: RawHandle, count: u32) -> TransportResult<()> {
        let mut st = self.lock();
        let path = st.resolve(handle)?;
        st.calls.push(Call::SetNumInputBuffers {
            path: path.clone(),
            count,
        });
        // Windows accepts 2..=512.
        if !(2..=512).contains(&count) {
            return Err(TransportError::Os {
                op: "HidD_SetNumInputBuffers",
                code: 87,
            });
        }
        if let Some(d) = st.device_mut(&path) {
            d.input_buffers = count;
        }
        Ok(())
    }

    fn get_feature(&self, handle: RawHandle, buf: &mut [u8]) -> TransportResult<usize> {
        let id = buf.first().copied().unwrap_or(0);
        let st = self.lock();
        let path = st.resolve(handle)?;
        let mut st = self.enter_control(st)?;
        st.calls.push(Call::GetFeature {
            path: path.clone(),
            id,
        });
        let d = st.device(&path).ok_or(TransportError::Disconnected)?;
        let data = d.features.get(&id).ok_or(TransportError::Os {
            op: "HidD_GetFeature",
            code: ERROR_GEN_FAILURE,
        })?;
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    fn set_feature(&self, handle: RawHandle, buf: &[u8]) -> TransportResult<()> {
        let st = self.lock();
        let path = st.resolve(handle)?;
        let mut st = self.enter_control(st)?;
        st.calls.push(Call::SetFeature {
            path: path.clone(),
            data: buf.to_vec(),
        });
        if let (Some(&id), Some(d)) = (buf.first(), st.device_mut(&path)) {
            d.features.insert(id, buf.to_vec());
        }
        Ok(())
    }

    fn get_input_report(&self, handle: RawHandle, buf: &mut [u8]) -> TransportResult<usize> {
        let id = buf.first().copied().unwrap_or(0);
        let st = self.lock();
        let path = st.resolve(handle)?;
        let mut st = self.enter_control(st)?;
        st.calls.push(Call::GetInputReport {
            path: path.clone(),
            id,
        });
        let d = st.device(&path).ok_or(TransportError::Disconnected)?;
        let data = d.input_reports.get(&id).ok_or(TransportError::Os {
            op: "HidD_GetInputReport",
            code: ERROR_GEN_FAILURE,
        })?;
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    fn set_output_report(&self, handle: RawHandle, buf: &[u8]) -> TransportResult<()> {
        let st = self.lock();
        let path = st.resolve(handle)?;
        let mut st = self.enter_control(st)?;
        st.calls.push(Call::SetOutputReport {
            path,
            data: buf.to_vec(),
        });
        Ok(())
    }
}
