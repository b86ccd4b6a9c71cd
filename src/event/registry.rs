//! Process-global registry of event labels.
//!
//! A label is a small, dense integer handed out once and stable for the
//! lifetime of the process. The registry never forgets a label or reuses
//! one, so a label value is always safe to store and compare by equality.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

/// An opaque, process-global event label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventLabel(u32);

impl EventLabel {
    /// Returns the raw integer value of this label.
    pub fn value(self) -> u32 {
        self.0
    }
}

static NEXT_LABEL: AtomicU32 = AtomicU32::new(0);
static HELP_TEXT: Mutex<Vec<Option<&'static str>>> = Mutex::new(Vec::new());

/// Registers a new event label, optionally with a human-readable description
/// used only for diagnostics.
pub fn register(help: Option<&'static str>) -> EventLabel {
    let id = NEXT_LABEL.fetch_add(1, Ordering::SeqCst);
    let mut text = HELP_TEXT.lock().expect("event registry lock poisoned");
    debug_assert_eq!(text.len() as u32, id, "label ids must be assigned in order");
    text.push(help);
    EventLabel(id)
}

/// Returns the help text a label was registered with, if any.
pub fn help_text(label: EventLabel) -> Option<&'static str> {
    HELP_TEXT
        .lock()
        .expect("event registry lock poisoned")
        .get(label.0 as usize)
        .copied()
        .flatten()
}

/// Whether `label` was handed out by [`register`]. Publishing to a label
/// that fails this check is a programming error.
pub fn is_registered(label: EventLabel) -> bool {
    (label.0 as usize) < HELP_TEXT.lock().expect("event registry lock poisoned").len()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn labels_are_dense_and_stable() {
        let a = register(Some("a"));
        let b = register(Some("b"));
        assert_ne!(a, b);
        assert!(is_registered(a));
        assert!(is_registered(b));
        assert_eq!(help_text(a), Some("a"));
    }

    #[test]
    fn unregistered_label_is_detected() {
        let bogus = EventLabel(u32::MAX);
        assert!(!is_registered(bogus));
    }
}
