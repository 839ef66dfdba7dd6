//! Bounded in-memory event log.
//!
//! [`EventStore`] is the only place [`InterventionEvent`]s are created: the
//! monitor hands it an [`EventDraft`] and the store stamps the next id.
//! The log is a ring of at most `capacity` events; appending past capacity
//! evicts the oldest. A single [`tokio::sync::RwLock`] guards the ring, so
//! a reader never observes a half-appended event.
//!
//! The ring also records the scope epoch it holds events for. A batch
//! stamped with any other epoch is refused under the same lock that
//! [`EventStore::rescope`] takes, so events from a replaced target list
//! can never land after the store was cleared for the new one.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use vigil_types::{EventId, Finding, InterventionEvent, ScenarioKind, Severity};

/// An event that has been classified but not yet numbered.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    /// When the finding was classified.
    pub timestamp: DateTime<Utc>,
    /// Scenario kind and payload.
    pub finding: Finding,
    /// The target path that produced the finding.
    pub source: String,
    /// Urgency.
    pub severity: Severity,
    /// Classifier confidence, when meaningful.
    pub confidence: Option<f64>,
}

#[derive(Debug)]
struct Ring {
    events: VecDeque<InterventionEvent>,
    capacity: usize,
    next_id: EventId,
    scope_epoch: u64,
}

impl Ring {
    fn push(&mut self, draft: EventDraft) -> InterventionEvent {
        let id = self.next_id;
        self.next_id = id.next();
        let event = InterventionEvent {
            id,
            timestamp: draft.timestamp,
            finding: draft.finding,
            source: draft.source,
            severity: draft.severity,
            confidence: draft.confidence,
        };
        self.events.push_back(event.clone());
        self.evict_overflow();
        event
    }

    fn evict_overflow(&mut self) {
        while self.events.len() > self.capacity {
            self.events.pop_front();
        }
    }
}

/// Append-only, capacity-bounded, insertion-ordered event log.
#[derive(Debug)]
pub struct EventStore {
    ring: RwLock<Ring>,
}

impl EventStore {
    /// Create an empty store holding at most `capacity` events.
    ///
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: RwLock::new(Ring {
                events: VecDeque::with_capacity(capacity.min(1024)),
                capacity,
                next_id: EventId::FIRST,
                scope_epoch: 0,
            }),
        }
    }

    /// Number and append every draft produced under `scope_epoch`, in
    /// order, and return the stored events.
    ///
    /// Returns `None` and stores nothing when the store has since been
    /// rescoped. Evicts the oldest events when the store is full.
    pub async fn append_batch(
        &self,
        scope_epoch: u64,
        drafts: Vec<EventDraft>,
    ) -> Option<Vec<InterventionEvent>> {
        let mut ring = self.ring.write().await;
        if ring.scope_epoch != scope_epoch {
            return None;
        }
        Some(drafts.into_iter().map(|draft| ring.push(draft)).collect())
    }

    /// Drop every event and accept only batches for `scope_epoch` from now
    /// on. Ids keep counting from where they were.
    pub async fn rescope(&self, scope_epoch: u64) {
        let mut ring = self.ring.write().await;
        ring.events.clear();
        ring.scope_epoch = scope_epoch;
    }

    /// The `limit` most recent events, oldest first.
    ///
    /// A limit of zero yields nothing; a limit at or above the store size
    /// yields the whole store.
    pub async fn tail(&self, limit: usize) -> Vec<InterventionEvent> {
        let ring = self.ring.read().await;
        let skip = ring.events.len().saturating_sub(limit);
        ring.events.iter().skip(skip).cloned().collect()
    }

    /// Number of retained events.
    pub async fn len(&self) -> usize {
        self.ring.read().await.events.len()
    }

    /// Whether the store holds no events.
    pub async fn is_empty(&self) -> bool {
        self.ring.read().await.events.is_empty()
    }

    /// Maximum number of retained events.
    pub async fn capacity(&self) -> usize {
        self.ring.read().await.capacity
    }

    /// Change the capacity, evicting the oldest events if it shrank.
    pub async fn set_capacity(&self, capacity: usize) {
        let mut ring = self.ring.write().await;
        ring.capacity = capacity.max(1);
        ring.evict_overflow();
    }

    /// Retained events tallied by scenario. Every kind is present.
    pub async fn counts_by_scenario(&self) -> BTreeMap<ScenarioKind, usize> {
        let ring = self.ring.read().await;
        let mut counts: BTreeMap<ScenarioKind, usize> =
            ScenarioKind::ALL.into_iter().map(|k| (k, 0)).collect();
        for event in &ring.events {
            if let Some(count) = counts.get_mut(&event.scenario()) {
                *count = count.saturating_add(1);
            }
        }
        counts
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn draft(source: &str) -> EventDraft {
        EventDraft {
            timestamp: Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap(),
            finding: Finding::CleanState { resolved: None },
            source: source.to_owned(),
            severity: Severity::Info,
            confidence: Some(1.0),
        }
    }

    async fn append(store: &EventStore, draft: EventDraft) -> InterventionEvent {
        store.append_batch(0, vec![draft]).await.unwrap().remove(0)
    }

    fn ids(events: &[InterventionEvent]) -> Vec<u64> {
        events.iter().map(|e| e.id.into_inner()).collect()
    }

    #[tokio::test]
    async fn append_assigns_monotonic_ids() {
        let store = EventStore::new(10);
        let a = append(&store, draft("a")).await;
        let b = append(&store, draft("b")).await;
        assert_eq!(a.id, EventId(1));
        assert_eq!(b.id, EventId(2));
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn capacity_evicts_oldest() {
        let store = EventStore::new(3);
        for i in 0..5 {
            append(&store, draft(&format!("t{i}"))).await;
        }
        assert_eq!(store.len().await, 3);
        assert_eq!(ids(&store.tail(10).await), vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn tail_limits() {
        let store = EventStore::new(10);
        for i in 0..4 {
            append(&store, draft(&format!("t{i}"))).await;
        }
        assert!(store.tail(0).await.is_empty());
        assert_eq!(ids(&store.tail(2).await), vec![3, 4]);
        assert_eq!(ids(&store.tail(4).await), vec![1, 2, 3, 4]);
        assert_eq!(ids(&store.tail(100).await), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn ids_survive_rescope() {
        let store = EventStore::new(10);
        append(&store, draft("a")).await;
        append(&store, draft("b")).await;
        store.rescope(1).await;
        assert!(store.is_empty().await);
        let next = store.append_batch(1, vec![draft("c")]).await.unwrap();
        assert_eq!(next[0].id, EventId(3));
    }

    #[tokio::test]
    async fn batches_from_a_replaced_scope_are_refused() {
        let store = EventStore::new(10);
        append(&store, draft("old")).await;
        store.rescope(1).await;

        assert!(store.append_batch(0, vec![draft("late")]).await.is_none());
        assert!(store.is_empty().await);

        let kept = store.append_batch(1, vec![draft("x"), draft("y")]).await.unwrap();
        assert_eq!(ids(&kept), vec![2, 3]);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn shrinking_capacity_evicts() {
        let store = EventStore::new(10);
        for i in 0..6 {
            append(&store, draft(&format!("t{i}"))).await;
        }
        store.set_capacity(2).await;
        assert_eq!(store.capacity().await, 2);
        assert_eq!(ids(&store.tail(10).await), vec![5, 6]);
    }

    #[tokio::test]
    async fn counts_cover_every_scenario() {
        let store = EventStore::new(10);
        append(&store, draft("a")).await;
        let mut conflict = draft("b");
        conflict.finding = Finding::MergeConflict {
            conflicted_files: vec!["x.rs".to_owned()],
        };
        append(&store, conflict).await;
        let counts = store.counts_by_scenario().await;
        assert_eq!(counts.len(), ScenarioKind::ALL.len());
        assert_eq!(counts[&ScenarioKind::CleanState], 1);
        assert_eq!(counts[&ScenarioKind::MergeConflict], 1);
        assert_eq!(counts[&ScenarioKind::StaleBranch], 0);
    }
}
