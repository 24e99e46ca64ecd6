//! Scripted hot-plug session against the virtual backend.
//!
//! Attaches a 64-byte vendor device, streams a few input reports with
//! `receive_permanently`, unplugs it, and plugs it back in.

use hidlink::backends::virtual_input::{VirtualBackend, VirtualDevice};
use hidlink::{
    DeviceIdentity, EventFilter, LogListener, Report, Session, SessionConfig, SessionEvent,
    TransferType,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn device() -> VirtualDevice {
    VirtualDevice::new("virtual:simple-hid", 0x04d8, 0x003f)
        .with_strings("Microchip Technology Inc.", "Simple HID Device", "0001")
        .with_report_lengths(65, 65, 0)
}

fn main() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .try_init();

    let virt = Arc::new(VirtualBackend::new());
    virt.attach(device());

    let config = SessionConfig::new(DeviceIdentity::new(0x04d8, 0x003f))
        .with_receive_permanently(true)
        .with_read_timeout(Duration::from_millis(500))
        .with_poll_interval(Duration::from_millis(200));
    let session = Session::new(virt.clone(), config);
    session.add_listener(LogListener::default(), EventFilter::LifecycleOnly);
    let events = session.subscribe();

    session.open();
    println!("{} / {}", session.manufacturer_string(), session.product_string());

    session.write_output_report(&Report::from_id_and_byte(0, 0x80), TransferType::Interrupt);
    for n in 0..3u8 {
        virt.push_input("virtual:simple-hid", vec![0, 0x37, n]);
        thread::sleep(Duration::from_millis(50));
    }

    virt.detach("virtual:simple-hid");
    thread::sleep(Duration::from_millis(400));
    virt.attach(device());
    thread::sleep(Duration::from_millis(400));
    virt.push_input("virtual:simple-hid", vec![0, 0x37, 0xff]);
    thread::sleep(Duration::from_millis(100));

    session.close();
    let received: Vec<_> = events.try_iter().collect();
    let start = received.first().map(|e| e.at);
    for timed in received {
        let at = start.map(|s| timed.at.duration_since(s)).unwrap_or_default();
        match timed.event {
            SessionEvent::DataReceived(r) => println!("{at:>10.3?}  data {r}"),
            other => println!("{at:>10.3?}  {other:?}"),
        }
    }
}
