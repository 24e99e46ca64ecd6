//! Device session.
//!
//! A [`Session`] binds one [`DeviceIdentity`] to whatever matching device is plugged
//! in, and keeps that binding alive across unplug/replug:
//!
//! ```text
//! Closed ──open()──▶ Opened ──match──▶ Detected ──acquire──▶ Ready
//!    ▲                 ▲  ◀──removal──────┘                    │
//!    └────close()──────┴──────────────────removal──────────────┘
//! ```
//!
//! Transfer failures drop the handles but leave the device marked detected; the next
//! read or write then makes exactly one re-acquisition attempt before giving up.
//!
//! Public operations never return errors. Failures are logged and folded into `false`
//! or `None`; the state is always left consistent for a retry.
//!
//! # Example
//! ```no_run
//! use hidlink::{DeviceIdentity, Report, Session, TransferType};
//!
//! let backend = hidlink::backends::default_backend().unwrap();
//! let session = Session::with_identity(backend, DeviceIdentity::new(0x04d8, 0x003f));
//! session.add_listener(
//!     |e: &hidlink::SessionEvent| println!("{e:?}"),
//!     hidlink::EventFilter::All,
//! );
//! if session.open() {
//!     session.write_output_report(&Report::from_id_and_byte(0, 0x80), TransferType::Interrupt);
//!     session.read_input_report(TransferType::Interrupt);
//! }
//! ```

use crate::backends::HidBackend;
use crate::config::SessionConfig;
use crate::device::{ClassGuid, DeviceIdentity};
use crate::error::{Error, Result};
use crate::event::{DeviceChange, ReportType, SessionEvent, TimedEvent, TransferType};
use crate::eventbus::{ChannelListener, EventDispatcher, EventFilter, ListenerId, SessionListener};
use crate::matcher::{acquire, find_device, find_device_with_debug, AcquiredHandles, Acquisition, CandidateDebugInfo};
use crate::metadata::{Capabilities, DeviceInfo};
use crate::report::Report;
use crate::snapshot::{SessionPhase, SessionSnapshot};
use crate::transfer::{ArmedRead, InputRead, Pipe};
use crate::watcher::DeviceWatcher;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Everything guarded by the session lock.
pub(crate) struct SessionState {
    pub(crate) opened: bool,
    pub(crate) detected: bool,
    pub(crate) device: Option<DeviceInfo>,
    pub(crate) capabilities: Capabilities,
    pub(crate) handles: Option<AcquiredHandles>,
    /// Bumped whenever `handles` is installed or dropped.
    pub(crate) epoch: u64,
    pub(crate) control_busy: bool,
    pub(crate) interrupt_busy: bool,
    /// Current interrupt read generation; bumped on arm and on teardown.
    pub(crate) generation: u64,
    pub(crate) transfer_type: TransferType,
    pub(crate) read_timeout: Duration,
    pub(crate) receive_permanently: bool,
    pub(crate) reads_armed: u64,
    pub(crate) acquisitions: u64,
}

impl SessionState {
    fn new(config: &SessionConfig) -> Self {
        Self {
            opened: false,
            detected: false,
            device: None,
            capabilities: Capabilities::default(),
            handles: None,
            epoch: 0,
            control_busy: false,
            interrupt_busy: false,
            generation: 0,
            transfer_type: config.transfer_type,
            read_timeout: config.read_timeout(),
            receive_permanently: config.receive_permanently,
            reads_armed: 0,
            acquisitions: 0,
        }
    }

    pub(crate) fn handles_obtained(&self) -> bool {
        self.handles.as_ref().is_some_and(|h| h.streams().is_some())
    }

    fn phase(&self) -> SessionPhase {
        if !self.opened {
            SessionPhase::Closed
        } else if self.handles_obtained() {
            SessionPhase::Ready
        } else if self.detected {
            SessionPhase::Detected
        } else {
            SessionPhase::Opened
        }
    }

    pub(crate) fn report_len(&self, kind: ReportType) -> usize {
        usize::from(match kind {
            ReportType::Input => self.capabilities.input_report_byte_length,
            ReportType::Output => self.capabilities.output_report_byte_length,
            ReportType::Feature => self.capabilities.feature_report_byte_length,
        })
    }
}

/// Which detect-and-acquire pass is running.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Pass {
    /// First pass from `open()`.
    Initial,
    /// Triggered by an arrival notification; raises `Inserted`.
    Arrival,
    /// Lazy recovery before a transfer; never arms a read.
    Recovery,
}

/// Session core shared with the reader and watcher threads.
pub(crate) struct Shared {
    pub(crate) backend: Arc<dyn HidBackend>,
    class: ClassGuid,
    identity: DeviceIdentity,
    input_buffers: Option<u32>,
    pub(crate) state: Mutex<SessionState>,
    /// Mirror of `SessionState::generation` for lock-free cancellation checks.
    pub(crate) read_generation: AtomicU64,
    /// Serializes detection/acquisition passes. Taken before `state`, never after.
    acquire_lock: Mutex<()>,
    bus: EventDispatcher,
}

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver events to listeners. Must be called without the state lock held.
    pub(crate) fn emit(&self, events: &[SessionEvent]) {
        self.bus.emit(events);
    }

    /// Drop every handle and cancel the pending interrupt read.
    ///
    /// `detected` is left alone so the next transfer attempts recovery.
    pub(crate) fn close_communications_locked(&self, st: &mut SessionState) {
        if st.handles.take().is_some() {
            log::debug!("{}: communications closed", self.identity);
        }
        st.epoch += 1;
        st.interrupt_busy = false;
        st.generation += 1;
        self.read_generation.store(st.generation, Ordering::Release);
    }

    /// Tear down only if the handles are still the ones a failed transfer used.
    pub(crate) fn invalidate(&self, epoch: u64) {
        let mut st = self.lock();
        if st.epoch == epoch {
            self.close_communications_locked(&mut st);
        }
    }

    fn install_locked(&self, st: &mut SessionState, acquisition: Acquisition) {
        let Acquisition {
            info,
            capabilities,
            handles,
        } = acquisition;
        log::info!(
            "{}: acquired {} ({} in / {} out / {} feature bytes, {})",
            self.identity,
            info.path,
            capabilities.input_report_byte_length,
            capabilities.output_report_byte_length,
            capabilities.feature_report_byte_length,
            if handles.streams().is_some() {
                "streams"
            } else {
                "feature only"
            },
        );
        st.handles = Some(handles);
        st.capabilities = capabilities;
        st.device = Some(info);
        st.epoch += 1;
        st.acquisitions += 1;
    }

    fn forget_device_locked(&self, st: &mut SessionState) {
        self.close_communications_locked(st);
        st.detected = false;
        st.device = None;
        st.capabilities = Capabilities::default();
    }

    /// Run one detection pass and acquire if needed. Returns whether the device is
    /// present.
    fn detect_and_acquire(self: &Arc<Self>, pass: Pass) -> bool {
        let (present, events, armed) = {
            let _pass = self.acquire_lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.run_pass(pass)
        };
        self.emit(&events);
        if let Some(armed) = armed {
            if let Err(e) = self.spawn_reader(armed) {
                log::warn!("{}: {e}", self.identity);
            }
        }
        present
    }

    /// Body of a detection pass; the caller holds `acquire_lock`.
    fn run_pass(&self, pass: Pass) -> (bool, Vec<SessionEvent>, Option<ArmedRead>) {
        let mut events = Vec::new();
        if !self.lock().opened {
            return (false, events, None);
        }

        let Some(matched) = find_device(&self.backend, &self.class, &self.identity) else {
            let mut st = self.lock();
            if st.detected {
                // Gone without a removal notification.
                self.forget_device_locked(&mut st);
                events.push(SessionEvent::Removed);
            }
            return (false, events, None);
        };

        {
            let mut st = self.lock();
            st.detected = true;
            if st.handles.is_some() {
                return (true, events, None);
            }
        }

        let acquisition = match acquire(&self.backend, matched, self.input_buffers) {
            Ok(a) => a,
            Err(e) => {
                log::warn!("{}: acquisition failed: {e}", self.identity);
                return (true, events, None);
            }
        };

        let streams = acquisition.handles_obtained();
        let mut st = self.lock();
        if !st.opened {
            return (false, events, None);
        }
        self.install_locked(&mut st, acquisition);
        let armed = if streams && st.receive_permanently && pass != Pass::Recovery {
            self.arm_interrupt_read_locked(&mut st)
                .map_err(|e| log::warn!("{}: could not arm read: {e}", self.identity))
                .ok()
        } else {
            None
        };
        if streams && pass == Pass::Arrival {
            events.push(SessionEvent::Inserted);
        }
        (true, events, armed)
    }

    fn on_removal(&self) {
        let was_detected = {
            let _pass = self.acquire_lock.lock().unwrap_or_else(PoisonError::into_inner);
            if !self.lock().opened {
                return;
            }
            if find_device(&self.backend, &self.class, &self.identity).is_some() {
                return;
            }
            let mut st = self.lock();
            let was = st.detected;
            self.forget_device_locked(&mut st);
            was
        };
        if was_detected {
            log::info!("{}: device removed", self.identity);
            self.emit(&[SessionEvent::Removed]);
        }
    }

    pub(crate) fn handle_device_change(self: &Arc<Self>, change: DeviceChange) {
        match change {
            DeviceChange::Arrived => {
                self.detect_and_acquire(Pass::Arrival);
            }
            DeviceChange::Removed => self.on_removal(),
        }
    }

    /// Lazy recovery: detected but holding no handles → one re-acquisition attempt.
    pub(crate) fn ensure_ready(self: &Arc<Self>) -> Result<()> {
        let needs_recovery = {
            let st = self.lock();
            if !st.opened {
                return Err(Error::NotOpen);
            }
            st.detected && st.handles.is_none()
        };
        if needs_recovery {
            log::debug!("{}: re-acquiring before transfer", self.identity);
            if !self.detect_and_acquire(Pass::Recovery) {
                return Err(Error::NotFound);
            }
        }
        Ok(())
    }
}

/// Log and fold a session error into a negative result.
fn settle<T>(op: &str, result: Result<T>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e @ (Error::Busy(_) | Error::NotOpen | Error::NoHandle(_))) => {
            log::debug!("{op}: {e}");
            None
        }
        Err(e) => {
            log::warn!("{op}: {e}");
            None
        }
    }
}

/// A HID device bound by identity.
///
/// `Session` is `Send + Sync`; share it behind an `Arc` to call it from several threads.
/// Dropping it closes it.
pub struct Session {
    shared: Arc<Shared>,
    poll_interval: Duration,
    watcher: Mutex<Option<DeviceWatcher>>,
}

impl Session {
    pub fn new(backend: Arc<dyn HidBackend>, config: SessionConfig) -> Self {
        let shared = Arc::new(Shared {
            backend,
            class: config.class_guid,
            identity: config.identity.clone(),
            input_buffers: config.input_buffers,
            state: Mutex::new(SessionState::new(&config)),
            read_generation: AtomicU64::new(0),
            acquire_lock: Mutex::new(()),
            bus: EventDispatcher::new(),
        });
        Self {
            shared,
            poll_interval: config.poll_interval(),
            watcher: Mutex::new(None),
        }
    }

    /// Session with default settings for `identity`.
    pub fn with_identity(backend: Arc<dyn HidBackend>, identity: DeviceIdentity) -> Self {
        Self::new(backend, SessionConfig::new(identity))
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.shared.identity
    }

    // ---- lifecycle ----

    /// Start watching for the device and try to acquire it. Returns whether the device
    /// is present. Calling it on an open session only reports presence.
    pub fn open(&self) -> bool {
        {
            let mut st = self.shared.lock();
            if st.opened {
                return st.detected;
            }
            st.opened = true;
        }
        log::info!("{}: session opened", self.shared.identity);
        self.start_watcher();
        self.shared.detect_and_acquire(Pass::Initial)
    }

    /// Release every handle and stop watching. Idempotent.
    pub fn close(&self) {
        if let Some(mut watcher) = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            watcher.stop();
        }
        let mut st = self.shared.lock();
        if st.opened {
            st.opened = false;
            self.shared.forget_device_locked(&mut st);
            log::info!("{}: session closed", self.shared.identity);
        }
    }

    fn start_watcher(&self) {
        if self.poll_interval.is_zero() {
            return;
        }
        let weak = Arc::downgrade(&self.shared);
        let spawned = DeviceWatcher::spawn(
            Arc::clone(&self.shared.backend),
            self.shared.class,
            self.poll_interval,
            move |change| {
                if let Some(shared) = weak.upgrade() {
                    shared.handle_device_change(change);
                }
            },
        );
        match spawned {
            Ok(w) => *self.watcher.lock().unwrap_or_else(PoisonError::into_inner) = Some(w),
            Err(e) => log::warn!("{}: device watcher not started: {e}", self.shared.identity),
        }
    }

    /// Feed a device change from an external notification source.
    pub fn handle_device_change(&self, change: DeviceChange) {
        self.shared.handle_device_change(change);
    }

    // ---- feature reports ----

    /// Read feature report `id` over the control pipe.
    ///
    /// `len` defaults to the device's feature report length (ID byte included).
    pub fn read_feature_report(&self, id: u8, len: Option<usize>) -> Option<Report> {
        let shared = &self.shared;
        let result = shared.ensure_ready().and_then(|()| {
            let len = len.unwrap_or_else(|| shared.lock().report_len(ReportType::Feature));
            if len == 0 {
                return Err(Error::InvalidReport {
                    kind: ReportType::Feature,
                    reason: "zero-length feature report",
                });
            }
            let mut buf = vec![0u8; len];
            buf[0] = id;
            let n = shared.control_transfer(ReportType::Feature, Pipe::Read, |b, h| {
                b.get_feature(h, &mut buf)
            })?;
            Ok(Report::from_raw(&buf[..n.min(len)]))
        });
        settle("read feature report", result)
    }

    /// Write a feature report over the control pipe, padded to the device's feature
    /// report length.
    pub fn write_feature_report(&self, report: &Report) -> bool {
        let shared = &self.shared;
        let result = shared.ensure_ready().and_then(|()| {
            let bytes = match shared.lock().report_len(ReportType::Feature) {
                0 => report.to_bytes(),
                len => report.to_padded(len),
            };
            shared.control_transfer(ReportType::Feature, Pipe::Write, |b, h| {
                b.set_feature(h, &bytes)
            })
        });
        settle("write feature report", result).is_some()
    }

    // ---- input / output reports ----

    /// Read an input report.
    ///
    /// - `Control`: synchronous `GET_REPORT` for report ID 0; returns the report.
    /// - `Interrupt`: arms a background read and returns [`InputRead::Armed`]. The report
    ///   arrives as [`SessionEvent::DataReceived`], or [`SessionEvent::ReadTimedOut`]
    ///   fires.
    ///
    /// `None` if the device is unavailable or a transfer of the same kind is running.
    pub fn read_input_report(&self, kind: TransferType) -> Option<InputRead> {
        let result = self.shared.ensure_ready().and_then(|()| match kind {
            TransferType::Control => self.shared.control_input(0).map(InputRead::Received),
            TransferType::Interrupt => self.shared.begin_interrupt_read().map(|()| InputRead::Armed),
        });
        settle("read input report", result)
    }

    /// Read input report `id` over the control pipe.
    pub fn read_input_report_by_id(&self, id: u8) -> Option<Report> {
        let result = self
            .shared
            .ensure_ready()
            .and_then(|()| self.shared.control_input(id));
        settle("read input report", result)
    }

    /// [`read_input_report`](Self::read_input_report) with the session's transfer type.
    pub fn read_input(&self) -> Option<InputRead> {
        self.read_input_report(self.transfer_type())
    }

    /// Arm an interrupt read; `true` if one was armed.
    pub fn start_interrupt_read(&self) -> bool {
        self.read_input_report(TransferType::Interrupt).is_some()
    }

    /// Write an output report, padded to the device's output report length.
    ///
    /// Interrupt writes succeed only if the device accepted every byte.
    pub fn write_output_report(&self, report: &Report, kind: TransferType) -> bool {
        let shared = &self.shared;
        let result = shared.ensure_ready().and_then(|()| match kind {
            TransferType::Interrupt => shared.interrupt_write(report),
            TransferType::Control => {
                let bytes = match shared.lock().report_len(ReportType::Output) {
                    0 => report.to_bytes(),
                    len => report.to_padded(len),
                };
                shared.control_transfer(ReportType::Output, Pipe::Write, |b, h| {
                    b.set_output_report(h, &bytes)
                })
            }
        });
        settle("write output report", result).is_some()
    }

    /// [`write_output_report`](Self::write_output_report) with the session's transfer type.
    pub fn write_output(&self, report: &Report) -> bool {
        self.write_output_report(report, self.transfer_type())
    }

    // ---- driver buffers ----

    /// Depth of the driver's input report ring buffer.
    pub fn input_report_buffer_size(&self) -> Option<u32> {
        let shared = &self.shared;
        let result = shared.ensure_ready().and_then(|()| {
            let handle = shared.control_handle(Pipe::Read)?;
            shared
                .backend
                .num_input_buffers(handle)
                .map_err(|source| Error::Transfer {
                    kind: ReportType::Input,
                    source,
                })
        });
        settle("input buffer size", result)
    }

    /// Set the driver ring buffer depth (Windows accepts 2..=512).
    pub fn set_input_report_buffer_size(&self, count: u32) -> bool {
        let shared = &self.shared;
        let result = shared.ensure_ready().and_then(|()| {
            let handle = shared.control_handle(Pipe::Read)?;
            shared
                .backend
                .set_num_input_buffers(handle, count)
                .map_err(|source| Error::Transfer {
                    kind: ReportType::Input,
                    source,
                })?;
            if let Some(info) = shared.lock().device.as_mut() {
                info.input_buffers = Some(count);
            }
            Ok(())
        });
        settle("set input buffer size", result).is_some()
    }

    // ---- device strings ----

    /// Manufacturer string read at acquisition; empty when unknown.
    pub fn manufacturer_string(&self) -> String {
        self.device_string(|d| &d.manufacturer)
    }

    pub fn product_string(&self) -> String {
        self.device_string(|d| &d.product)
    }

    pub fn serial_number_string(&self) -> String {
        self.device_string(|d| &d.serial_number)
    }

    fn device_string(&self, field: impl Fn(&DeviceInfo) -> &String) -> String {
        self.shared
            .lock()
            .device
            .as_ref()
            .map(|d| field(d).clone())
            .unwrap_or_default()
    }

    // ---- properties ----

    pub fn is_open(&self) -> bool {
        self.shared.lock().opened
    }

    pub fn is_detected(&self) -> bool {
        self.shared.lock().detected
    }

    /// Read and write streams are open.
    pub fn handles_obtained(&self) -> bool {
        self.shared.lock().handles_obtained()
    }

    /// A control transfer or an interrupt read is running.
    pub fn transfer_in_progress(&self) -> bool {
        let st = self.shared.lock();
        st.control_busy || st.interrupt_busy
    }

    pub fn control_transfer_in_progress(&self) -> bool {
        self.shared.lock().control_busy
    }

    pub fn interrupt_transfer_in_progress(&self) -> bool {
        self.shared.lock().interrupt_busy
    }

    pub fn read_timeout(&self) -> Duration {
        self.shared.lock().read_timeout
    }

    /// Applies to reads armed after the call. `Duration::ZERO` waits forever.
    pub fn set_read_timeout(&self, timeout: Duration) {
        self.shared.lock().read_timeout = timeout;
    }

    pub fn receive_permanently(&self) -> bool {
        self.shared.lock().receive_permanently
    }

    /// Takes effect at the next read completion or arrival.
    pub fn set_receive_permanently(&self, on: bool) {
        self.shared.lock().receive_permanently = on;
    }

    pub fn transfer_type(&self) -> TransferType {
        self.shared.lock().transfer_type
    }

    pub fn set_transfer_type(&self, kind: TransferType) {
        self.shared.lock().transfer_type = kind;
    }

    /// Capabilities of the acquired device; all zero before acquisition.
    pub fn capabilities(&self) -> Capabilities {
        self.shared.lock().capabilities
    }

    pub fn device_info(&self) -> Option<DeviceInfo> {
        self.shared.lock().device.clone()
    }

    pub fn phase(&self) -> SessionPhase {
        self.shared.lock().phase()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let st = self.shared.lock();
        SessionSnapshot {
            phase: st.phase(),
            detected: st.detected,
            handles_obtained: st.handles_obtained(),
            device: st.device.clone(),
            capabilities: st.capabilities,
            transfer_type: st.transfer_type,
            read_timeout_ms: u64::try_from(st.read_timeout.as_millis()).unwrap_or(u64::MAX),
            receive_permanently: st.receive_permanently,
            control_in_progress: st.control_busy,
            interrupt_in_progress: st.interrupt_busy,
            reads_armed: st.reads_armed,
            acquisitions: st.acquisitions,
        }
    }

    /// Walk the enumerated candidates and report where each one was dropped.
    ///
    /// Does not change session state; the matched candidate's handle is closed again.
    pub fn probe_candidates(&self) -> Vec<CandidateDebugInfo> {
        let shared = &self.shared;
        find_device_with_debug(&shared.backend, &shared.class, &shared.identity).1
    }

    // ---- events ----

    /// Register a listener.
    ///
    /// Listeners run with no session lock held and may call any session operation,
    /// including adding or removing listeners. Events raised while another delivery is
    /// running are delivered after it, on the delivering thread.
    pub fn add_listener(
        &self,
        listener: impl SessionListener + 'static,
        filter: EventFilter,
    ) -> ListenerId {
        self.shared.bus.add_listener(listener, filter)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.bus.remove_listener(id)
    }

    /// Receive every event, timestamped, through a channel.
    pub fn subscribe(&self) -> Receiver<TimedEvent> {
        let (tx, rx) = mpsc::channel();
        self.add_listener(ChannelListener::new(tx), EventFilter::All);
        rx
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.shared.identity)
            .field("phase", &self.phase())
            .finish()
    }
}

#[cfg(all(test, feature = "virtual"))]
mod tests {
    use super::*;
    use crate::backends::virtual_input::{Call, VirtualBackend, VirtualDevice};
    use crate::backends::AccessMode;

    fn session_with(dev: VirtualDevice) -> (Arc<VirtualBackend>, Session) {
        let virt = Arc::new(VirtualBackend::new());
        virt.attach(dev);
        let id = DeviceIdentity::new(0x04d8, 0x003f);
        let cfg = SessionConfig::new(id).with_poll_interval(Duration::ZERO);
        (virt.clone(), Session::new(virt, cfg))
    }

    fn simple() -> VirtualDevice {
        VirtualDevice::new("simple", 0x04d8, 0x003f).with_report_lengths(65, 65, 0)
    }

    #[test]
    fn calls_before_open_fail() {
        let (virt, s) = session_with(simple());
        assert_eq!(s.phase(), SessionPhase::Closed);
        assert!(!s.write_output_report(&Report::from_id_and_byte(0, 1), TransferType::Interrupt));
        assert_eq!(virt.count(|c| matches!(c, Call::Open { .. })), 0);
    }

    #[test]
    fn open_acquires_and_close_releases() {
        let (virt, s) = session_with(simple());
        assert!(s.open());
        assert_eq!(s.phase(), SessionPhase::Ready);
        assert!(s.handles_obtained());
        assert_eq!(virt.open_handles(), 2);

        s.close();
        s.close();
        assert_eq!(s.phase(), SessionPhase::Closed);
        assert!(!s.is_detected());
        assert_eq!(virt.open_handles(), 0);
    }

    #[test]
    fn open_without_device_stays_opened() {
        let virt = Arc::new(VirtualBackend::new());
        let s = Session::new(
            virt.clone(),
            SessionConfig::new(DeviceIdentity::new(1, 2)).with_poll_interval(Duration::ZERO),
        );
        assert!(!s.open());
        assert_eq!(s.phase(), SessionPhase::Opened);
        assert!(s.read_feature_report(1, None).is_none());
    }

    #[test]
    fn removal_without_notification_is_noticed_on_arrival_pass() {
        let (virt, s) = session_with(simple());
        assert!(s.open());
        virt.detach("simple");
        s.handle_device_change(DeviceChange::Arrived);
        assert!(!s.is_detected());
        assert_eq!(virt.open_handles(), 0);
    }

    #[test]
    fn write_failure_drops_handles_but_keeps_detection() {
        let (virt, s) = session_with(simple());
        s.open();
        virt.set_fail_writes(true);
        assert!(!s.write_output_report(&Report::from_id_and_byte(0, 1), TransferType::Interrupt));
        assert!(s.is_detected());
        assert!(!s.handles_obtained());
        assert_eq!(virt.open_handles(), 0);

        virt.set_fail_writes(false);
        let reads_before = virt.count(|c| matches!(c, Call::Open { access: AccessMode::Read, .. }));
        assert!(s.write_output_report(&Report::from_id_and_byte(0, 1), TransferType::Interrupt));
        let reads_after = virt.count(|c| matches!(c, Call::Open { access: AccessMode::Read, .. }));
        assert_eq!(reads_after - reads_before, 1);
        assert_eq!(s.snapshot().acquisitions, 2);
    }

    #[test]
    fn short_write_fails_without_teardown() {
        let (virt, s) = session_with(simple());
        s.open();
        virt.set_short_writes(true);
        assert!(!s.write_output_report(&Report::from_id_and_byte(0, 1), TransferType::Interrupt));
        assert!(s.handles_obtained());
    }

    #[test]
    fn strings_come_from_acquisition() {
        let (_, s) = session_with(simple().with_strings("Microchip", "Simple HID", "0001"));
        assert_eq!(s.manufacturer_string(), "");
        s.open();
        assert_eq!(s.manufacturer_string(), "Microchip");
        assert_eq!(s.product_string(), "Simple HID");
        assert_eq!(s.serial_number_string(), "0001");
    }

    #[test]
    fn input_buffer_size_round_trip() {
        let (virt, s) = session_with(simple());
        s.open();
        assert_eq!(s.input_report_buffer_size(), Some(32));
        assert!(s.set_input_report_buffer_size(128));
        assert_eq!(virt.input_buffers("simple"), Some(128));
        assert_eq!(s.device_info().unwrap().input_buffers, Some(128));
        assert!(!s.set_input_report_buffer_size(1));
    }

    #[test]
    fn snapshot_serializes() {
        let (_, s) = session_with(simple());
        s.open();
        let json = s.snapshot().to_json().unwrap();
        assert!(json.contains("\"phase\": \"ready\""));
    }

    #[test]
    fn probe_candidates_leaves_no_handles() {
        let (virt, s) = session_with(simple());
        let debug = s.probe_candidates();
        assert_eq!(debug.len(), 1);
        assert!(debug[0].drop_stage.is_none());
        assert_eq!(virt.open_handles(), 0);
    }
}
