use crate::event::SessionEvent;
use crate::eventbus::SessionListener;

/// Wraps a listener and filters events based on a user-supplied predicate.
///
/// Unlike [`EventFilter::Custom`](crate::eventbus::EventFilter::Custom) the predicate
/// may capture state, e.g. only reports with a given ID.
pub struct FilteredListener {
    predicate: Box<dyn Fn(&SessionEvent) -> bool + Send + Sync>,
    inner: Box<dyn SessionListener>,
}

impl FilteredListener {
    pub fn new(
        predicate: impl Fn(&SessionEvent) -> bool + Send + Sync + 'static,
        inner: Box<dyn SessionListener>,
    ) -> Self {
        Self {
            predicate: Box::new(predicate),
            inner,
        }
    }

    /// Pass only `DataReceived` events whose report ID is `id`.
    pub fn report_id(id: u8, inner: Box<dyn SessionListener>) -> Self {
        Self::new(
            move |e| matches!(e, SessionEvent::DataReceived(r) if r.id() == id),
            inner,
        )
    }
}

impl SessionListener for FilteredListener {
    fn on_event(&mut self, event: &SessionEvent) {
        if (self.predicate)(event) {
            self.inner.on_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Report;
    use std::sync::{Arc, Mutex};

    #[test]
    fn passes_matching_report_ids_only() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut l = FilteredListener::report_id(
            2,
            Box::new(move |e: &SessionEvent| sink.lock().unwrap().push(e.clone())),
        );
        l.on_event(&SessionEvent::DataReceived(Report::new(1, vec![0])));
        l.on_event(&SessionEvent::DataReceived(Report::new(2, vec![9])));
        l.on_event(&SessionEvent::Inserted);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![SessionEvent::DataReceived(Report::new(2, vec![9]))]
        );
    }
}
