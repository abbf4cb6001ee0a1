//! Newest-first record of control traffic.

use std::collections::VecDeque;

use duplex_core::ControlEvent;

/// Control events of the current session, most recent first.
#[derive(Clone, Debug, Default)]
pub struct EventLog {
    events: VecDeque<ControlEvent>,
}

impl EventLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `event` as the newest entry.
    pub fn prepend(&mut self, event: ControlEvent) {
        self.events.push_front(event);
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Copy of the entries, newest first.
    pub fn snapshot(&self) -> Vec<ControlEvent> {
        self.events.iter().cloned().collect()
    }

    /// The newest entry.
    pub fn latest(&self) -> Option<&ControlEvent> {
        self.events.front()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn event(n: usize) -> ControlEvent {
        ControlEvent::new(format!("test.{n}"))
    }

    #[test]
    fn newest_first() {
        let mut log = EventLog::new();
        log.prepend(event(1));
        log.prepend(event(2));
        assert_eq!(log.latest().unwrap().event_type, "test.2");
        let types: Vec<_> = log.snapshot().into_iter().map(|e| e.event_type).collect();
        assert_eq!(types, vec!["test.2", "test.1"]);
    }

    #[test]
    fn clear_empties() {
        let mut log = EventLog::new();
        log.prepend(event(1));
        log.clear();
        assert!(log.is_empty());
        assert!(log.latest().is_none());
    }

    proptest! {
        #[test]
        fn snapshot_is_reverse_arrival_order(count in 0usize..64) {
            let mut log = EventLog::new();
            for n in 0..count {
                log.prepend(event(n));
            }
            prop_assert_eq!(log.len(), count);
            let expected: Vec<String> = (0..count).rev().map(|n| format!("test.{n}")).collect();
            let actual: Vec<String> = log.snapshot().into_iter().map(|e| e.event_type).collect();
            prop_assert_eq!(actual, expected);
        }

        #[test]
        fn prepend_never_drops_entries(first in 1usize..16, second in 1usize..16) {
            let mut log = EventLog::new();
            for n in 0..first {
                log.prepend(event(n));
            }
            let before = log.snapshot();
            for n in 0..second {
                log.prepend(event(first + n));
            }
            let after = log.snapshot();
            prop_assert_eq!(&after[second..], &before[..]);
        }
    }
}
