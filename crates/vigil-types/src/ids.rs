//! Event identifiers.
//!
//! Events are numbered by the event store in append order. Unlike the
//! UUID-backed identifiers common elsewhere, an [`EventId`] is a plain
//! monotonic sequence so that ordering by id equals ordering by insertion.

use serde::{Deserialize, Serialize};

/// Monotonic sequence number assigned to an intervention event on append.
///
/// The first event appended to a store receives id `1`. Ids are never
/// reused, not even after the store is cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub u64);

impl EventId {
    /// The id handed out to the first event of a fresh store.
    pub const FIRST: Self = Self(1);

    /// Return the inner sequence number.
    pub const fn into_inner(self) -> u64 {
        self.0
    }

    /// Return the id that follows this one.
    ///
    /// Saturates at `u64::MAX`; a store would have to append for longer
    /// than any process lifetime to reach it.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl core::fmt::Display for EventId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_ordered_by_sequence() {
        let first = EventId::FIRST;
        let second = first.next();
        assert!(first < second);
        assert_eq!(second.into_inner(), 2);
    }

    #[test]
    fn next_saturates() {
        assert_eq!(EventId(u64::MAX).next(), EventId(u64::MAX));
    }

    #[test]
    fn serializes_as_bare_number() {
        let json = serde_json::to_string(&EventId(42)).ok();
        assert_eq!(json.as_deref(), Some("42"));
    }
}
