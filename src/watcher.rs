//! Polling device-change source.
//!
//! [`DeviceWatcher`] re-enumerates a device class on a fixed period and diffs the set of
//! interface paths. A new path yields [`DeviceChange::Arrived`], a vanished one
//! [`DeviceChange::Removed`]; at most one of each per poll, arrivals first.
//!
//! The callback runs on the watcher thread.

use crate::backends::HidBackend;
use crate::device::ClassGuid;
use crate::event::DeviceChange;
use std::collections::HashSet;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub struct DeviceWatcher {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl DeviceWatcher {
    /// Start watching `class`. The current device set is the baseline; devices already
    /// present do not produce an arrival.
    pub fn spawn<F>(
        backend: Arc<dyn HidBackend>,
        class: ClassGuid,
        interval: Duration,
        on_change: F,
    ) -> std::io::Result<Self>
    where
        F: Fn(DeviceChange) + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let mut known = enumerate_set(backend.as_ref(), &class);

        let thread = thread::Builder::new()
            .name("hidlink-watcher".into())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    // Stop requested or the owner went away.
                    _ => break,
                }
                let current = enumerate_set(backend.as_ref(), &class);
                let (arrived, removed) = diff(&known, &current);
                known = current;
                if arrived {
                    log::debug!("watcher: {class} arrival");
                    on_change(DeviceChange::Arrived);
                }
                if removed {
                    log::debug!("watcher: {class} removal");
                    on_change(DeviceChange::Removed);
                }
            })?;

        Ok(Self {
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }

    /// Stop polling and join the thread. Safe to call from the watcher thread itself,
    /// in which case the join is skipped.
    pub fn stop(&mut self) {
        self.stop.take();
        if let Some(handle) = self.thread.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for DeviceWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn enumerate_set(backend: &dyn HidBackend, class: &ClassGuid) -> HashSet<String> {
    match backend.enumerate(class) {
        Ok(paths) => paths.into_iter().collect(),
        Err(e) => {
            log::warn!("watcher: enumeration failed: {e}");
            HashSet::new()
        }
    }
}

/// `(any arrived, any removed)`.
fn diff(before: &HashSet<String>, after: &HashSet<String>) -> (bool, bool) {
    (
        after.difference(before).next().is_some(),
        before.difference(after).next().is_some(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn diff_reports_both_directions() {
        assert_eq!(diff(&set(&["a"]), &set(&["a"])), (false, false));
        assert_eq!(diff(&set(&["a"]), &set(&["a", "b"])), (true, false));
        assert_eq!(diff(&set(&["a", "b"]), &set(&["b"])), (false, true));
        assert_eq!(diff(&set(&["a"]), &set(&["b"])), (true, true));
    }

    #[cfg(feature = "virtual")]
    #[test]
    fn reports_attach_and_detach() {
        use crate::backends::virtual_input::{VirtualBackend, VirtualDevice};
        use std::sync::Mutex;

        let virt = Arc::new(VirtualBackend::new());
        let backend: Arc<dyn HidBackend> = virt.clone();
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let mut watcher = DeviceWatcher::spawn(
            backend,
            ClassGuid::HID,
            Duration::from_millis(10),
            move |c| {
                let _ = tx.lock().unwrap().send(c);
            },
        )
        .unwrap();

        virt.attach(VirtualDevice::new("d", 1, 2));
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), DeviceChange::Arrived);
        virt.detach("d");
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), DeviceChange::Removed);
        watcher.stop();
    }
}
