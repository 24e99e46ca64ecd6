#![cfg(feature = "virtual")]

mod common;

use common::*;
use hidlink::backends::virtual_input::Call;
use hidlink::backends::AccessMode;
use hidlink::{InputRead, Report, SessionEvent, TransferType};
use std::time::Duration;

fn is_data(e: &SessionEvent) -> bool {
    matches!(e, SessionEvent::DataReceived(_))
}

#[test]
fn one_report_per_armed_read() {
    let (virt, session) = setup(vec![simple_hid()], config());
    session.open();
    let rx = session.subscribe();

    assert_eq!(session.read_input_report(TransferType::Interrupt), Some(InputRead::Armed));
    assert!(session.interrupt_transfer_in_progress());

    virt.push_input(PATH, vec![0, 1, 2, 3]);
    let event = wait_for(&rx, is_data).unwrap();
    assert_eq!(event, SessionEvent::DataReceived(Report::new(0, vec![1, 2, 3])));
    assert!(!session.interrupt_transfer_in_progress());

    // Not re-armed: a second report stays queued.
    virt.push_input(PATH, vec![0, 9]);
    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    assert_eq!(virt.pending_input(PATH), 1);
    assert_eq!(session.snapshot().reads_armed, 1);
}

#[test]
fn second_read_is_rejected_while_armed() {
    let (_virt, session) = setup(vec![simple_hid()], config().with_read_timeout(Duration::ZERO));
    session.open();
    assert!(session.start_interrupt_read());
    assert!(!session.start_interrupt_read());
    assert_eq!(session.snapshot().reads_armed, 1);
    assert!(session.transfer_in_progress());
}

#[test]
fn read_timeout_raises_event() {
    let (_virt, session) = setup(vec![simple_hid()], config());
    session.set_read_timeout(Duration::from_millis(50));
    session.open();
    let rx = session.subscribe();

    assert!(session.start_interrupt_read());
    assert_eq!(
        wait_for(&rx, |e| !matches!(e, SessionEvent::Inserted)),
        Some(SessionEvent::ReadTimedOut)
    );
    assert!(!session.interrupt_transfer_in_progress());
    // The device is still usable after a timeout.
    assert!(session.handles_obtained());
}

#[test]
fn zero_timeout_waits_indefinitely() {
    let (virt, session) = setup(vec![simple_hid()], config().with_read_timeout(Duration::ZERO));
    session.open();
    let rx = session.subscribe();

    assert!(session.start_interrupt_read());
    assert!(rx.recv_timeout(Duration::from_millis(400)).is_err());
    assert!(session.interrupt_transfer_in_progress());

    virt.push_input(PATH, vec![0, 7]);
    assert!(wait_for(&rx, is_data).is_some());
}

#[test]
fn receive_permanently_rearms_exactly_once_per_completion() {
    let cfg = config()
        .with_receive_permanently(true)
        .with_read_timeout(Duration::ZERO);
    let (virt, session) = setup(vec![simple_hid()], cfg);
    let rx = session.subscribe();
    session.open();

    // open() arms the first read.
    assert!(eventually(|| session.interrupt_transfer_in_progress()));
    assert_eq!(session.snapshot().reads_armed, 1);

    for n in 1..=3u8 {
        virt.push_input(PATH, vec![0, n]);
        let event = wait_for(&rx, is_data).unwrap();
        assert_eq!(event, SessionEvent::DataReceived(Report::new(0, vec![n])));
    }
    assert_eq!(session.snapshot().reads_armed, 4);
    assert!(session.interrupt_transfer_in_progress());
}

#[test]
fn receive_permanently_rearms_after_timeout() {
    let cfg = config()
        .with_receive_permanently(true)
        .with_read_timeout(Duration::from_millis(30));
    let (_virt, session) = setup(vec![simple_hid()], cfg);
    let rx = session.subscribe();
    session.open();

    for _ in 0..2 {
        assert_eq!(wait_for(&rx, |_| true), Some(SessionEvent::ReadTimedOut));
    }
    session.set_receive_permanently(false);
    // Whatever was armed when the flag dropped settles, then nothing more.
    assert!(eventually(|| !session.interrupt_transfer_in_progress()));
    let armed = session.snapshot().reads_armed;
    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(session.snapshot().reads_armed, armed);
}

#[test]
fn read_failure_closes_communications_and_recovers_lazily() {
    let (virt, session) = setup(vec![simple_hid()], config().with_read_timeout(Duration::ZERO));
    session.open();
    assert!(session.start_interrupt_read());

    virt.set_fail_reads(true);
    assert!(eventually(|| !session.handles_obtained()));
    assert!(session.is_detected());
    assert!(!session.interrupt_transfer_in_progress());
    assert_eq!(virt.open_handles(), 0);

    virt.set_fail_reads(false);
    let read_opens = |v: &hidlink::backends::virtual_input::VirtualBackend| {
        v.count(|c| matches!(c, Call::Open { access: AccessMode::Read, .. }))
    };
    let before = read_opens(&*virt);
    assert!(session.write_output_report(&Report::from_id_and_byte(0, 1), TransferType::Interrupt));
    assert_eq!(read_opens(&*virt), before + 1);
    assert!(session.handles_obtained());
    assert_eq!(session.snapshot().acquisitions, 2);
}

#[test]
fn close_cancels_pending_read() {
    let (virt, session) = setup(vec![simple_hid()], config().with_read_timeout(Duration::ZERO));
    session.open();
    let rx = session.subscribe();
    assert!(session.start_interrupt_read());

    session.close();
    assert!(!session.interrupt_transfer_in_progress());
    virt.push_input(PATH, vec![0, 1]);
    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    assert_eq!(virt.open_handles(), 0);
}
