//! List every HID interface and show where it drops out of matching.
//!
//! Usage: `cargo run --example diagnose -- 04d8 003f [serial-filter]`

use hidlink::backends::default_backend;
use hidlink::{DeviceIdentity, Session};

fn parse_hex(arg: Option<String>) -> u16 {
    arg.and_then(|s| u16::from_str_radix(s.trim_start_matches("0x"), 16).ok())
        .unwrap_or(0)
}

fn main() {
    let _ = env_logger::builder().is_test(false).try_init();

    let mut args = std::env::args().skip(1);
    let vid = parse_hex(args.next());
    let pid = parse_hex(args.next());
    let mut identity = DeviceIdentity::new(vid, pid);
    if let Some(serial) = args.next() {
        identity = identity.with_serial(serial);
    }

    let backend = match default_backend() {
        Ok(b) => b,
        Err(e) => {
            eprintln!("no HID transport: {e}");
            std::process::exit(1);
        }
    };

    let session = Session::with_identity(backend, identity.clone());
    println!("looking for {identity}");
    for candidate in session.probe_candidates() {
        let ids = candidate
            .attributes
            .map(|a| format!("{:04x}:{:04x}", a.vendor_id, a.product_id))
            .unwrap_or_else(|| "????:????".into());
        match candidate.drop_stage {
            None => println!("  MATCH {ids} {}", candidate.path),
            Some(stage) => println!("  {ids} {} -> {stage:?}", candidate.path),
        }
    }

    if session.open() {
        println!("{}", session.snapshot().to_json().unwrap_or_default());
    }
    session.close();
}
