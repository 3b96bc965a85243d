//! Wait-set: Registry of asynchronous completions a phase is waiting for.
//!
//! Commands and events are not 1:1: a single phase may have several
//! commands outstanding across both components, and their completions
//! arrive in any order. The controller registers one [`PendingEvent`] per
//! expected completion *before* sending the command, then blocks until the
//! set is empty.
//!
//! Matching is on the full `(kind, data1, data2)` triple; the first equal
//! entry is consumed. Error events are never matched.

use ip_common::Event;

/// Post-match operation bound to a pending event, run under the engine
/// lock on the callback context.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FollowUp {
    /// The decoder has settled its output format; streaming may stop
    /// waiting for it.
    MarkOutputFormatChanged,
}

/// One expected completion.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PendingEvent {
    pub event: Event,
    pub follow_up: Option<FollowUp>,
}

/// Result of offering an inbound event to a wait-set.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// Fatal hardware error; never matched against pending entries.
    Fatal,
    /// No pending entry matched.
    Unmatched,
    /// An entry was consumed.
    Matched {
        follow_up: Option<FollowUp>,
        /// The set became empty with this match.
        drained: bool,
    },
}

#[derive(Clone, Debug, Default)]
pub struct WaitSet {
    pending: Vec<PendingEvent>,
}

impl WaitSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one expected completion.
    pub fn expect(&mut self, event: Event, follow_up: Option<FollowUp>) {
        self.pending.push(PendingEvent { event, follow_up });
    }

    /// Offer an inbound event. The matched entry is removed; its follow-up
    /// is returned for the caller to run before releasing the lock.
    pub fn dispatch(&mut self, event: Event) -> Dispatch {
        if event.is_fatal() {
            return Dispatch::Fatal;
        }
        match self.pending.iter().position(|p| p.event == event) {
            Some(index) => {
                let matched = self.pending.remove(index);
                Dispatch::Matched {
                    follow_up: matched.follow_up,
                    drained: self.pending.is_empty(),
                }
            }
            None => Dispatch::Unmatched,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn pending(&self) -> &[PendingEvent] {
        &self.pending
    }

    pub fn contains(&self, event: &Event) -> bool {
        self.pending.iter().any(|p| p.event == *event)
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::Monitor;
    use ip_common::{Command, ComponentState, EventKind, PortIndex};
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn disable(port: u32) -> Event {
        Command::PortDisable(PortIndex(port)).completion()
    }

    fn state(s: ComponentState) -> Event {
        Command::StateSet(s).completion()
    }

    // ── Matching ─────────────────────────────────────────────────

    #[test]
    fn empty_set_is_drained() {
        let ws = WaitSet::new();
        assert!(ws.is_empty());
        assert_eq!(ws.len(), 0);
    }

    #[test]
    fn matching_event_is_consumed() {
        let mut ws = WaitSet::new();
        ws.expect(disable(320), None);
        ws.expect(disable(321), None);

        assert_eq!(
            ws.dispatch(disable(321)),
            Dispatch::Matched {
                follow_up: None,
                drained: false
            }
        );
        assert!(!ws.contains(&disable(321)));
        assert!(ws.contains(&disable(320)));
        assert_eq!(
            ws.dispatch(disable(320)),
            Dispatch::Matched {
                follow_up: None,
                drained: true
            }
        );
        assert!(ws.is_empty());
    }

    #[test]
    fn all_discriminators_must_match() {
        let mut ws = WaitSet::new();
        ws.expect(disable(320), None);

        assert_eq!(ws.dispatch(disable(321)), Dispatch::Unmatched);
        assert_eq!(
            ws.dispatch(Command::PortEnable(PortIndex(320)).completion()),
            Dispatch::Unmatched
        );
        assert_eq!(
            ws.dispatch(Event::new(EventKind::PortSettingsChanged, 320, 0)),
            Dispatch::Unmatched
        );
        assert_eq!(ws.len(), 1);
    }

    #[test]
    fn duplicate_expectations_need_duplicate_events() {
        let mut ws = WaitSet::new();
        ws.expect(state(ComponentState::Idle), None);
        ws.expect(state(ComponentState::Idle), None);

        assert!(matches!(
            ws.dispatch(state(ComponentState::Idle)),
            Dispatch::Matched { drained: false, .. }
        ));
        assert!(matches!(
            ws.dispatch(state(ComponentState::Idle)),
            Dispatch::Matched { drained: true, .. }
        ));
        assert_eq!(ws.dispatch(state(ComponentState::Idle)), Dispatch::Unmatched);
    }

    #[test]
    fn follow_up_is_returned_on_match() {
        let mut ws = WaitSet::new();
        let ev = Event::port_settings_changed(PortIndex(321));
        ws.expect(ev, Some(FollowUp::MarkOutputFormatChanged));
        assert_eq!(
            ws.dispatch(ev),
            Dispatch::Matched {
                follow_up: Some(FollowUp::MarkOutputFormatChanged),
                drained: true
            }
        );
    }

    #[test]
    fn error_events_are_never_matched() {
        let mut ws = WaitSet::new();
        let err = Event::new(EventKind::Error, 0, 0);
        ws.expect(err, None);
        assert_eq!(ws.dispatch(err), Dispatch::Fatal);
        assert_eq!(ws.len(), 1, "fatal event leaves the set untouched");
    }

    #[test]
    fn unmatched_on_empty_set() {
        let mut ws = WaitSet::new();
        assert_eq!(ws.dispatch(disable(1)), Dispatch::Unmatched);
    }

    // ── Blocking ─────────────────────────────────────────────────

    #[test]
    fn block_returns_immediately_when_empty() {
        let monitor = Monitor::new(WaitSet::new());
        let mut guard = monitor.lock();
        monitor.wait_until(&mut guard, |ws| ws.is_empty());
    }

    #[test]
    fn waiter_released_only_after_last_completion() {
        let monitor = Arc::new(Monitor::new(WaitSet::new()));
        {
            let mut guard = monitor.lock();
            guard.expect(disable(1), None);
            guard.expect(disable(2), None);
            guard.expect(state(ComponentState::Idle), None);
        }

        let driver = Arc::clone(&monitor);
        let handle = thread::spawn(move || {
            for ev in [state(ComponentState::Idle), disable(2), disable(1)] {
                thread::sleep(Duration::from_millis(5));
                let mut guard = driver.lock();
                if let Dispatch::Matched { drained: true, .. } = guard.dispatch(ev) {
                    driver.notify_one();
                }
            }
        });

        let mut guard = monitor.lock();
        monitor.wait_until(&mut guard, |ws| ws.is_empty());
        assert!(guard.is_empty());
        drop(guard);
        handle.join().unwrap();
    }

    // ── Properties ───────────────────────────────────────────────

    proptest! {
        #[test]
        fn drains_in_any_completion_order(
            (events, order) in proptest::collection::vec(0u32..8, 1..12).prop_flat_map(|ports| {
                let events: Vec<Event> = ports.iter().map(|&p| disable(p)).collect();
                (Just(events.clone()), Just(events).prop_shuffle())
            }),
        ) {
            let mut ws = WaitSet::new();
            for &ev in &events {
                ws.expect(ev, None);
            }

            for (n, ev) in order.iter().enumerate() {
                let last = n + 1 == order.len();
                match ws.dispatch(*ev) {
                    Dispatch::Matched { drained, .. } => prop_assert_eq!(drained, last),
                    other => prop_assert!(false, "unexpected {:?}", other),
                }
                prop_assert_eq!(ws.is_empty(), last);
            }
        }
    }
}
