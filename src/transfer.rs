//! Transfer coordinator.
//!
//! Two independent guards live in the session state:
//!
//! - **control**: feature reports and control-pipe input/output reports. A second
//!   caller finds the flag set and is turned away immediately; nothing is queued. The
//!   flag is held by a [`ControlGuard`] while the transfer runs outside the lock.
//! - **interrupt**: at most one interrupt read is armed at a time. Arming bumps the read
//!   generation and hands an [`ArmedRead`] to a reader thread.
//!
//! The reader thread polls the backend in short slices so that it notices cancellation
//! (generation change on teardown) and its [`ReadTimer`] deadline. Data, timeout and
//! failure are decided by that single loop, so each armed read completes exactly once.
//! With `receive_permanently` the completion re-arms under the same lock and the loop
//! continues with the next generation.
//!
//! Interrupt writes are synchronous and unguarded; the OS serializes them per handle.

use crate::backends::{HidBackend, RawHandle};
use crate::error::{Error, Result, TransportError, TransportResult};
use crate::event::{ReportType, SessionEvent, TransferType};
use crate::report::Report;
use crate::session::{SessionState, Shared};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Longest single backend read; bounds how late a cancellation or timeout is noticed.
pub(crate) const POLL_SLICE: Duration = Duration::from_millis(100);

/// Which acquired handle a control transfer goes through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Pipe {
    Read,
    Write,
}

/// Outcome of a successful input report request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InputRead {
    /// Control read: the report itself.
    Received(Report),
    /// Interrupt read armed; the result arrives as an event.
    Armed,
}

impl InputRead {
    pub fn into_report(self) -> Option<Report> {
        match self {
            InputRead::Received(r) => Some(r),
            InputRead::Armed => None,
        }
    }
}

/// Deadline of one armed interrupt read.
///
/// Owned by the read it times; a zero timeout never arms it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReadTimer {
    deadline: Option<Instant>,
}

impl ReadTimer {
    pub fn start(timeout: Duration) -> Self {
        Self {
            deadline: (!timeout.is_zero()).then(|| Instant::now() + timeout),
        }
    }

    pub fn stop(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Time left, or `None` when unarmed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn expired(&self) -> bool {
        self.remaining().is_some_and(|left| left.is_zero())
    }
}

/// An interrupt read handed to the reader thread.
#[derive(Debug)]
pub(crate) struct ArmedRead {
    pub(crate) generation: u64,
    handle: RawHandle,
    len: usize,
    timer: ReadTimer,
}

#[derive(Debug)]
pub(crate) enum ReadOutcome {
    Data(Vec<u8>),
    TimedOut,
    Failed(TransportError),
    Cancelled,
}

/// Holds the control flag; clears it on drop.
struct ControlGuard<'a> {
    shared: &'a Shared,
}

impl Drop for ControlGuard<'_> {
    fn drop(&mut self) {
        self.shared.lock().control_busy = false;
    }
}

impl Shared {
    /// Raw handle for a control transfer, without taking the guard.
    pub(crate) fn control_handle(&self, pipe: Pipe) -> Result<RawHandle> {
        let st = self.lock();
        let handles = st
            .handles
            .as_ref()
            .ok_or(Error::NoHandle(TransferType::Control))?;
        Ok(match pipe {
            Pipe::Read => handles.control_read().raw(),
            Pipe::Write => handles.control_write().raw(),
        })
    }

    /// Run `op` under the control guard.
    ///
    /// Busy → `Error::Busy` with no side effects. A transport failure drops the handles
    /// the transfer used.
    pub(crate) fn control_transfer<T>(
        &self,
        kind: ReportType,
        pipe: Pipe,
        op: impl FnOnce(&dyn HidBackend, RawHandle) -> TransportResult<T>,
    ) -> Result<T> {
        let (handle, epoch, _guard) = {
            let mut st = self.lock();
            if st.control_busy {
                return Err(Error::Busy(TransferType::Control));
            }
            let handles = st
                .handles
                .as_ref()
                .ok_or(Error::NoHandle(TransferType::Control))?;
            let handle = match pipe {
                Pipe::Read => handles.control_read().raw(),
                Pipe::Write => handles.control_write().raw(),
            };
            st.control_busy = true;
            (handle, st.epoch, ControlGuard { shared: self })
        };

        op(self.backend.as_ref(), handle).map_err(|source| {
            log::warn!("{kind:?} control transfer failed: {source}");
            self.invalidate(epoch);
            Error::Transfer { kind, source }
        })
    }

    /// Control-pipe read of input report `id`.
    pub(crate) fn control_input(&self, id: u8) -> Result<Report> {
        let len = self.lock().report_len(ReportType::Input);
        if len == 0 {
            return Err(Error::InvalidReport {
                kind: ReportType::Input,
                reason: "device declares no input report",
            });
        }
        let mut buf = vec![0u8; len];
        buf[0] = id;
        let n = self.control_transfer(ReportType::Input, Pipe::Read, |b, h| {
            b.get_input_report(h, &mut buf)
        })?;
        let report = Report::from_raw(&buf[..n.min(len)]);
        #[cfg(feature = "debug-log")]
        log::trace!("control in: {report}");
        Ok(report)
    }

    /// Synchronous interrupt write, padded to the output report length.
    pub(crate) fn interrupt_write(&self, report: &Report) -> Result<()> {
        let (handle, epoch, len) = {
            let st = self.lock();
            let handle = st
                .handles
                .as_ref()
                .and_then(|h| h.streams())
                .map(|(_, write)| write.raw())
                .ok_or(Error::NoHandle(TransferType::Interrupt))?;
            (handle, st.epoch, st.report_len(ReportType::Output))
        };
        if len == 0 {
            return Err(Error::InvalidReport {
                kind: ReportType::Output,
                reason: "device declares no output report",
            });
        }

        let bytes = report.to_padded(len);
        #[cfg(feature = "debug-log")]
        log::trace!("interrupt out: {}", Report::from_raw(&bytes));

        match self.backend.write(handle, &bytes) {
            Ok(n) if n == bytes.len() => Ok(()),
            Ok(n) => Err(Error::Transfer {
                kind: ReportType::Output,
                source: TransportError::ShortTransfer {
                    expected: bytes.len(),
                    actual: n,
                },
            }),
            Err(source) => {
                self.invalidate(epoch);
                Err(Error::Transfer {
                    kind: ReportType::Output,
                    source,
                })
            }
        }
    }

    /// Set the interrupt flag and describe the read to perform.
    pub(crate) fn arm_interrupt_read_locked(&self, st: &mut SessionState) -> Result<ArmedRead> {
        if st.interrupt_busy {
            return Err(Error::Busy(TransferType::Interrupt));
        }
        let handle = st
            .handles
            .as_ref()
            .and_then(|h| h.streams())
            .map(|(read, _)| read.raw())
            .ok_or(Error::NoHandle(TransferType::Interrupt))?;
        let len = st.report_len(ReportType::Input);
        if len == 0 {
            return Err(Error::InvalidReport {
                kind: ReportType::Input,
                reason: "device declares no input report",
            });
        }

        st.interrupt_busy = true;
        st.generation += 1;
        st.reads_armed += 1;
        self.read_generation.store(st.generation, Ordering::Release);
        Ok(ArmedRead {
            generation: st.generation,
            handle,
            len,
            timer: ReadTimer::start(st.read_timeout),
        })
    }

    /// Arm an interrupt read and start its reader thread.
    pub(crate) fn begin_interrupt_read(self: &Arc<Self>) -> Result<()> {
        let armed = {
            let mut st = self.lock();
            self.arm_interrupt_read_locked(&mut st)?
        };
        self.spawn_reader(armed)
    }

    pub(crate) fn spawn_reader(self: &Arc<Self>, armed: ArmedRead) -> Result<()> {
        let generation = armed.generation;
        let shared = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("hidlink-reader".into())
            .spawn(move || run_interrupt_reader(&shared, armed));
        match spawned {
            Ok(_) => Ok(()),
            Err(e) => {
                let mut st = self.lock();
                if st.generation == generation {
                    st.interrupt_busy = false;
                }
                Err(Error::Thread(e))
            }
        }
    }

    /// Wait for one input report, the deadline, or cancellation.
    fn wait_for_input(&self, armed: &mut ArmedRead) -> ReadOutcome {
        let mut buf = vec![0u8; armed.len];
        loop {
            if self.read_generation.load(Ordering::Acquire) != armed.generation {
                return ReadOutcome::Cancelled;
            }
            let slice = match armed.timer.remaining() {
                Some(left) if left.is_zero() => return ReadOutcome::TimedOut,
                Some(left) => left.min(POLL_SLICE),
                None => POLL_SLICE,
            };
            match self.backend.read(armed.handle, &mut buf, Some(slice)) {
                Ok(0) => continue,
                Ok(n) => {
                    armed.timer.stop();
                    buf.truncate(n);
                    return ReadOutcome::Data(buf);
                }
                Err(e) => return ReadOutcome::Failed(e),
            }
        }
    }

    /// Settle an armed read. Returns the next read when the completion re-armed.
    ///
    /// Completions of a generation that is no longer current are dropped silently.
    pub(crate) fn complete_interrupt_read(
        &self,
        armed: &ArmedRead,
        outcome: ReadOutcome,
    ) -> Option<ArmedRead> {
        let mut events = Vec::new();
        let next = {
            let mut st = self.lock();
            if st.generation != armed.generation || !st.interrupt_busy {
                log::trace!("stale read generation {} discarded", armed.generation);
                return None;
            }
            st.interrupt_busy = false;

            let rearm = match outcome {
                ReadOutcome::Data(buf) => {
                    let report = Report::from_raw(&buf);
                    #[cfg(feature = "debug-log")]
                    log::trace!("interrupt in: {report}");
                    events.push(SessionEvent::DataReceived(report));
                    true
                }
                ReadOutcome::TimedOut => {
                    log::debug!("interrupt read timed out after {:?}", st.read_timeout);
                    events.push(SessionEvent::ReadTimedOut);
                    true
                }
                ReadOutcome::Failed(e) => {
                    log::warn!("interrupt read failed: {e}");
                    self.close_communications_locked(&mut st);
                    false
                }
                ReadOutcome::Cancelled => false,
            };

            if rearm && st.receive_permanently {
                self.arm_interrupt_read_locked(&mut st)
                    .map_err(|e| log::debug!("not re-armed: {e}"))
                    .ok()
            } else {
                None
            }
        };
        self.emit(&events);
        next
    }
}

fn run_interrupt_reader(shared: &Shared, mut armed: ArmedRead) {
    loop {
        let outcome = shared.wait_for_input(&mut armed);
        match shared.complete_interrupt_read(&armed, outcome) {
            Some(next) => armed = next,
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_timeout_never_arms() {
        let t = ReadTimer::start(Duration::ZERO);
        assert!(!t.is_armed());
        assert!(!t.expired());
        assert_eq!(t.remaining(), None);
    }

    #[test]
    fn timer_expires_and_stops() {
        let mut t = ReadTimer::start(Duration::from_millis(1));
        assert!(t.is_armed());
        thread::sleep(Duration::from_millis(5));
        assert!(t.expired());
        t.stop();
        assert!(!t.expired());
    }

    #[test]
    fn input_read_into_report() {
        assert_eq!(InputRead::Armed.into_report(), None);
        let r = Report::new(1, vec![2]);
        assert_eq!(InputRead::Received(r.clone()).into_report(), Some(r));
    }
}
