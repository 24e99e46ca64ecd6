#![allow(dead_code)]

use hidlink::backends::virtual_input::{VirtualBackend, VirtualDevice};
use hidlink::{DeviceIdentity, Session, SessionConfig, SessionEvent, TimedEvent};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const VID: u16 = 0x04d8;
pub const PID: u16 = 0x003f;
pub const PATH: &str = "virtual:simple-hid";
pub const WAIT: Duration = Duration::from_secs(3);

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 64-byte vendor device, no report IDs.
pub fn simple_hid() -> VirtualDevice {
    VirtualDevice::new(PATH, VID, PID)
        .with_strings("Microchip Technology Inc.", "Simple HID Device", "0001")
        .with_report_lengths(65, 65, 0)
}

/// Config without the built-in watcher; tests drive device changes by hand.
pub fn config() -> SessionConfig {
    SessionConfig::new(DeviceIdentity::new(VID, PID)).with_poll_interval(Duration::ZERO)
}

pub fn setup(devices: Vec<VirtualDevice>, config: SessionConfig) -> (Arc<VirtualBackend>, Session) {
    init_logging();
    let virt = Arc::new(VirtualBackend::new());
    for d in devices {
        virt.attach(d);
    }
    let session = Session::new(virt.clone(), config);
    (virt, session)
}

/// Next event matching `pred`, skipping others.
pub fn wait_for(
    rx: &Receiver<TimedEvent>,
    pred: impl Fn(&SessionEvent) -> bool,
) -> Option<SessionEvent> {
    let deadline = Instant::now() + WAIT;
    loop {
        let left = deadline.checked_duration_since(Instant::now())?;
        match rx.recv_timeout(left) {
            Ok(timed) if pred(&timed.event) => return Some(timed.event),
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
}

/// Poll `cond` until true or [`WAIT`] passes.
pub fn eventually(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}
