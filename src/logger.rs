//! Listener that forwards session events to the `log` facade.
use crate::event::SessionEvent;
use crate::eventbus::SessionListener;

/// Logs every event it receives under the given target.
///
/// Lifecycle events go out at `info`, data and timeouts at `debug`.
pub struct LogListener {
    target: String,
}

impl LogListener {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }
}

impl Default for LogListener {
    fn default() -> Self {
        Self::new("hidlink::events")
    }
}

impl SessionListener for LogListener {
    fn on_event(&mut self, event: &SessionEvent) {
        let target = self.target.as_str();
        match event {
            SessionEvent::Inserted => log::info!(target: target, "device inserted"),
            SessionEvent::Removed => log::info!(target: target, "device removed"),
            SessionEvent::ReadTimedOut => log::debug!(target: target, "interrupt read timed out"),
            SessionEvent::DataReceived(report) => {
                log::debug!(target: target, "input report {report}")
            }
        }
    }
}
