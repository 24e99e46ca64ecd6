#![cfg(feature = "virtual")]

mod common;

use common::*;
use hidlink::backends::virtual_input::{Call, VirtualDevice};
use hidlink::{DeviceChange, DeviceIdentity, SessionConfig, SessionEvent, SessionPhase};
use std::time::Duration;

#[test]
fn open_without_device_is_not_detected() {
    let (_virt, session) = setup(vec![], config());
    assert!(!session.open());
    assert!(session.is_open());
    assert_eq!(session.phase(), SessionPhase::Opened);
    // A second open only reports presence.
    assert!(!session.open());
}

#[test]
fn unplug_and_replug_raise_events() {
    let (virt, session) = setup(vec![simple_hid()], config());
    assert!(session.open());
    let rx = session.subscribe();

    virt.detach(PATH);
    session.handle_device_change(DeviceChange::Removed);
    assert_eq!(rx.try_recv().map(|t| t.event), Ok(SessionEvent::Removed));
    assert!(!session.is_detected());
    assert_eq!(session.phase(), SessionPhase::Opened);
    assert_eq!(virt.open_handles(), 0);

    virt.attach(simple_hid());
    session.handle_device_change(DeviceChange::Arrived);
    assert_eq!(rx.try_recv().map(|t| t.event), Ok(SessionEvent::Inserted));
    assert!(session.handles_obtained());
    assert_eq!(session.product_string(), "Simple HID Device");
}

#[test]
fn unrelated_changes_are_ignored() {
    let other = VirtualDevice::new("virtual:other", 0x1234, 0x5678);
    let (virt, session) = setup(vec![simple_hid(), other.clone()], config());
    session.open();
    let rx = session.subscribe();

    virt.detach("virtual:other");
    session.handle_device_change(DeviceChange::Removed);
    virt.attach(other);
    session.handle_device_change(DeviceChange::Arrived);

    assert!(rx.try_recv().is_err());
    assert!(session.handles_obtained());
    assert_eq!(session.snapshot().acquisitions, 1);
}

#[test]
fn arrival_of_feature_only_device_is_silent() {
    let kbd = VirtualDevice::new("virtual:kbd", VID, PID)
        .with_usage(0x01, 0x06)
        .system_reserved();
    let (virt, session) = setup(vec![], config());
    session.open();
    let rx = session.subscribe();

    virt.attach(kbd);
    session.handle_device_change(DeviceChange::Arrived);
    assert!(rx.try_recv().is_err());
    assert!(session.is_detected());
    assert!(!session.handles_obtained());

    // Removal still reported: the device was detected.
    virt.detach("virtual:kbd");
    session.handle_device_change(DeviceChange::Removed);
    assert_eq!(rx.try_recv().map(|t| t.event), Ok(SessionEvent::Removed));
}

#[test]
fn watcher_follows_the_device() {
    let cfg = config().with_poll_interval(Duration::from_millis(20));
    let (virt, session) = setup(vec![simple_hid()], cfg);
    let rx = session.subscribe();
    assert!(session.open());

    virt.detach(PATH);
    assert_eq!(wait_for(&rx, |_| true), Some(SessionEvent::Removed));
    virt.attach(simple_hid());
    assert_eq!(wait_for(&rx, |_| true), Some(SessionEvent::Inserted));
    assert!(session.handles_obtained());
}

#[test]
fn arrival_rearms_permanent_read() {
    let cfg = config()
        .with_receive_permanently(true)
        .with_read_timeout(Duration::ZERO);
    let (virt, session) = setup(vec![simple_hid()], cfg);
    session.open();
    let rx = session.subscribe();
    assert_eq!(session.snapshot().reads_armed, 1);

    virt.detach(PATH);
    session.handle_device_change(DeviceChange::Removed);
    assert!(!session.interrupt_transfer_in_progress());

    virt.attach(simple_hid());
    session.handle_device_change(DeviceChange::Arrived);
    assert_eq!(session.snapshot().reads_armed, 2);
    assert!(session.interrupt_transfer_in_progress());

    virt.push_input(PATH, vec![0, 0x42]);
    assert!(wait_for(&rx, |e| matches!(e, SessionEvent::DataReceived(_))).is_some());
}

#[test]
fn close_is_idempotent_and_reopen_works() {
    let (virt, session) = setup(vec![simple_hid()], config().with_read_timeout(Duration::ZERO));
    session.open();
    session.start_interrupt_read();

    session.close();
    session.close();
    assert!(!session.is_open());
    assert_eq!(session.phase(), SessionPhase::Closed);
    assert_eq!(virt.open_handles(), 0);
    assert_eq!(virt.outstanding_preparsed(), 0);
    assert!(session.device_info().is_none());

    assert!(session.open());
    assert!(session.handles_obtained());
}

#[test]
fn drop_releases_handles() {
    let (virt, session) = setup(vec![simple_hid()], config());
    session.open();
    assert_eq!(virt.open_handles(), 2);
    drop(session);
    assert_eq!(virt.open_handles(), 0);
}

#[test]
fn lazy_recovery_makes_one_attempt() {
    let (virt, session) = setup(vec![simple_hid()], config());
    session.open();

    virt.set_fail_writes(true);
    assert!(!session.write_output_report(&hidlink::Report::from_id_and_byte(0, 1), hidlink::TransferType::Interrupt));
    assert!(!session.handles_obtained());
    virt.set_fail_writes(false);

    virt.set_fail_opens(true);
    virt.clear_calls();
    assert!(session.read_feature_report(0, Some(8)).is_none());
    assert_eq!(virt.count(|c| *c == Call::Enumerate), 1);
}

#[test]
fn first_enumerated_match_wins() {
    let (_virt, session) = setup(
        vec![
            simple_hid().with_strings("Acme", "Board", "A"),
            VirtualDevice::new("virtual:second", VID, PID).with_strings("Acme", "Board", "B"),
        ],
        config(),
    );
    session.open();
    assert_eq!(session.device_info().unwrap().path, PATH);
}

#[test]
fn string_filters_select_candidate() {
    let cfg = SessionConfig::new(DeviceIdentity::new(VID, PID).with_serial("B"))
        .with_poll_interval(Duration::ZERO);
    let (_virt, session) = setup(
        vec![
            simple_hid().with_strings("Acme", "Board", "A1"),
            VirtualDevice::new("virtual:second", VID, PID).with_strings("Acme", "Board", "B1"),
        ],
        cfg,
    );
    session.open();
    assert_eq!(session.serial_number_string(), "B1");
}

#[test]
fn session_from_toml() {
    let cfg = SessionConfig::from_toml_str(&format!(
        r#"
        read_timeout_ms = 0
        poll_interval_ms = 0
        input_buffers = 64

        [device]
        vendor_id = {VID}
        product_id = {PID}
        product = "Simple"
        "#
    ))
    .unwrap();
    let (virt, session) = setup(vec![simple_hid()], cfg);
    assert!(session.open());
    assert_eq!(session.read_timeout(), Duration::ZERO);
    assert_eq!(virt.input_buffers(PATH), Some(64));
    assert_eq!(session.input_report_buffer_size(), Some(64));
}
