//! # hidlink
//!
//! Host-side HID session driver. A [`Session`] finds a device by
//! [`DeviceIdentity`] (VID/PID plus optional manufacturer/product/serial substring
//! filters), acquires read and write streams, and exchanges [`Report`]s over the
//! control pipe or the interrupt endpoints. It follows the device through unplug and
//! replug and recovers lazily after transfer failures.
//!
//! ```no_run
//! use hidlink::{DeviceIdentity, EventFilter, Report, Session, SessionEvent, TransferType};
//!
//! let backend = hidlink::backends::default_backend().unwrap();
//! let session = Session::with_identity(backend, DeviceIdentity::new(0x04d8, 0x003f));
//! session.add_listener(
//!     |e: &SessionEvent| {
//!         if let SessionEvent::DataReceived(r) = e {
//!             println!("in: {r}");
//!         }
//!     },
//!     EventFilter::DataOnly,
//! );
//! session.open();
//! session.write_output_report(&Report::new(0, vec![0x80]), TransferType::Interrupt);
//! session.read_input_report(TransferType::Interrupt);
//! ```
//!
//! ## Features
//! - `hid` (default): cross-platform transport via `hidapi`.
//! - `virtual` (default): in-memory [`VirtualBackend`](backends::virtual_input::VirtualBackend)
//!   for tests and demos.
//! - `debug-log`: `trace!` every report moved.
//!
//! On Windows the native backend is always compiled and is the default.

pub mod backends;
pub mod config;
pub mod device;
pub mod error;
pub mod event;
pub mod eventbus;
pub mod filtered_listener;
pub mod logger;
pub mod matcher;
pub mod metadata;
pub mod probe;
pub mod report;
pub mod session;
pub mod snapshot;
pub mod transfer;
pub mod watcher;

pub use config::SessionConfig;
pub use device::{ClassGuid, DeviceIdentity};
pub use error::{Error, Result, TransportError};
pub use event::{DeviceChange, ReportType, SessionEvent, TimedEvent, TransferType};
pub use eventbus::{EventFilter, ListenerId, SessionListener};
pub use filtered_listener::FilteredListener;
pub use logger::LogListener;
pub use metadata::{Attributes, Capabilities, DeviceInfo, DeviceUsage};
pub use report::Report;
pub use session::Session;
pub use snapshot::{SessionPhase, SessionSnapshot};
pub use transfer::{InputRead, ReadTimer};
