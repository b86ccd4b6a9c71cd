//! Event primitives: a process-global label registry, a per-loop listener
//! that queues and coalesces pending events, and a source that publishes to
//! at most one listener per label.
//!
//! Grounded on `examples/original_source/tor/src/lib/evloop/events.c`: the
//! registry there is a mutex-protected `smartlist_t` handing out array
//! indices as labels; a listener owns a pending queue plus a per-label
//! callback table; a source publishes by label and either wakes the
//! listener's loop or merely enqueues, depending on a per-label
//! "deliver silently" setting.

mod listener;
mod registry;
mod source;

pub use listener::{CoalesceFn, EventListener, ProcessFn};
pub use registry::{EventLabel, register};
pub use source::EventSource;

use std::any::Any;

/// The payload delivered together with a label.
///
/// The original carries a tagged union of a raw pointer (with a
/// caller-supplied destructor) or a small inline integer; in Rust the
/// destructor is just `Drop`, so `Boxed` owns its payload outright.
pub enum EventData {
    /// A small integer payload that needs no allocation or destructor.
    Inline(i64),
    /// An owned, type-erased payload. Dropped automatically when the last
    /// owner (the pending queue entry, or a callback that discards it) goes
    /// out of scope.
    Boxed(Box<dyn Any + Send>),
}

impl EventData {
    /// Wraps `value` as a boxed event payload.
    pub fn boxed<T: Any + Send>(value: T) -> Self {
        EventData::Boxed(Box::new(value))
    }

    /// Attempts to recover a boxed payload of type `T`.
    pub fn downcast<T: Any + Send>(self) -> Option<Box<T>> {
        match self {
            EventData::Boxed(b) => b.downcast::<T>().ok(),
            EventData::Inline(_) => None,
        }
    }
}
