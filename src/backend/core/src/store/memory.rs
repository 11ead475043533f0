//! Volatile in-process event store.
//!
//! Conforms to the same ordering and concurrency observables as the
//! PostgreSQL store but keeps everything in memory: useful for tests,
//! development, and as a degraded fallback when persistence is down.
//! The single-writer discipline is a `parking_lot` write lock guarding
//! both the sequence counter and every aggregate's head version.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::{LedgerError, Result};
use crate::events::event::{Event, PreparedEvent};

use super::{EventStore, HealthReport};

/// In-process, volatile event store.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    /// All events in commit order; index + 1 == sequence.
    events: Vec<Event>,
    /// Head (version, index into `events`) per aggregate.
    heads: HashMap<(String, Uuid), (i64, usize)>,
}

impl InMemoryStore {
    /// Create an empty store. Sequences start at 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed events.
    pub fn len(&self) -> usize {
        self.inner.read().events.len()
    }

    /// Whether the store holds no events.
    pub fn is_empty(&self) -> bool {
        self.inner.read().events.is_empty()
    }
}

#[async_trait]
impl EventStore for InMemoryStore {
    #[instrument(skip(self, event), fields(event_type = %event.event_type, aggregate_id = %event.aggregate_id))]
    async fn commit(&self, event: PreparedEvent) -> Result<Event> {
        let mut inner = self.inner.write();

        let key = (event.aggregate_type.clone(), event.aggregate_id);
        let head_version = inner.heads.get(&key).map(|(v, _)| *v).unwrap_or(0);
        if event.aggregate_version != head_version + 1 {
            return Err(LedgerError::conflict(
                event.aggregate_type,
                event.aggregate_id,
                event.aggregate_version,
                head_version + 1,
            ));
        }

        let sequence = inner.events.len() as i64 + 1;
        let committed = event.into_event(sequence);
        let index = inner.events.len();
        inner.events.push(committed.clone());
        inner.heads.insert(key, (committed.aggregate_version, index));

        debug!(sequence, version = committed.aggregate_version, "event committed");
        Ok(committed)
    }

    async fn fetch_latest(
        &self,
        aggregate_type: &str,
        aggregate_id: Uuid,
    ) -> Result<Option<Event>> {
        let inner = self.inner.read();
        let head = inner
            .heads
            .get(&(aggregate_type.to_string(), aggregate_id))
            .map(|(_, index)| inner.events[*index].clone());
        Ok(head)
    }

    fn fetch_ordered<'a>(
        &'a self,
        aggregate_type: &str,
        aggregate_id: Uuid,
        to_timestamp: Option<DateTime<Utc>>,
    ) -> BoxStream<'a, Result<Event>> {
        // Events are appended in version order, so a filtered scan of the
        // commit log is already ascending by aggregate_version.
        let inner = self.inner.read();
        let matching: Vec<Event> = inner
            .events
            .iter()
            .filter(|e| e.aggregate_type == aggregate_type && e.aggregate_id == aggregate_id)
            .filter(|e| to_timestamp.map_or(true, |cutoff| e.timestamp <= cutoff))
            .cloned()
            .collect();
        stream::iter(matching.into_iter().map(Ok)).boxed()
    }

    fn fetch_from_sequence(&self, from: i64) -> BoxStream<'_, Result<Event>> {
        let inner = self.inner.read();
        let start = from.max(1) as usize - 1;
        let tail: Vec<Event> = inner.events.iter().skip(start).cloned().collect();
        stream::iter(tail.into_iter().map(Ok)).boxed()
    }

    async fn health(&self) -> HealthReport {
        HealthReport {
            reachable: true,
            persistent: false,
            latency_ms: None,
            pool: None,
        }
    }

    fn is_persistent(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event::{Actor, CandidateEvent};
    use crate::events::hash;
    use futures::TryStreamExt;
    use serde_json::json;

    async fn append(
        store: &InMemoryStore,
        aggregate_id: Uuid,
        version: i64,
        previous_hash: Option<String>,
    ) -> Result<Event> {
        let candidate = CandidateEvent::new(
            "Noted",
            "Note",
            aggregate_id,
            version,
            Actor::system("test"),
        )
        .with_payload(json!({"v": version}));
        let h = hash::hash_candidate(&candidate, previous_hash.as_deref())?;
        store.commit(candidate.into_prepared(h, previous_hash)).await
    }

    #[tokio::test]
    async fn commit_assigns_increasing_sequences() {
        let store = InMemoryStore::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let e1 = append(&store, a, 1, None).await.unwrap();
        let e2 = append(&store, b, 1, None).await.unwrap();
        let e3 = append(&store, a, 2, Some(e1.hash.clone())).await.unwrap();

        assert_eq!(e1.sequence, 1);
        assert_eq!(e2.sequence, 2);
        assert_eq!(e3.sequence, 3);
    }

    #[tokio::test]
    async fn stale_version_is_rejected_without_a_write() {
        let store = InMemoryStore::new();
        let id = Uuid::new_v4();
        append(&store, id, 1, None).await.unwrap();

        let err = append(&store, id, 1, None).await.unwrap_err();
        assert!(matches!(err, LedgerError::ConcurrencyConflict { .. }));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn version_gap_is_rejected() {
        let store = InMemoryStore::new();
        let id = Uuid::new_v4();
        append(&store, id, 1, None).await.unwrap();

        let err = append(&store, id, 3, None).await.unwrap_err();
        assert!(matches!(err, LedgerError::ConcurrencyConflict { .. }));
    }

    #[tokio::test]
    async fn fetch_ordered_filters_by_aggregate_and_cutoff() {
        let store = InMemoryStore::new();
        let id = Uuid::new_v4();
        let other = Uuid::new_v4();

        let e1 = append(&store, id, 1, None).await.unwrap();
        append(&store, other, 1, None).await.unwrap();
        append(&store, id, 2, Some(e1.hash.clone())).await.unwrap();

        let all: Vec<Event> = store
            .fetch_ordered("Note", id, None)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(
            all.iter().map(|e| e.aggregate_version).collect::<Vec<_>>(),
            vec![1, 2]
        );

        let up_to_first: Vec<Event> = store
            .fetch_ordered("Note", id, Some(e1.timestamp))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(up_to_first.len(), 1);
    }

    #[tokio::test]
    async fn fetch_from_sequence_returns_the_tail() {
        let store = InMemoryStore::new();
        let id = Uuid::new_v4();
        let e1 = append(&store, id, 1, None).await.unwrap();
        let e2 = append(&store, id, 2, Some(e1.hash.clone())).await.unwrap();
        append(&store, id, 3, Some(e2.hash.clone())).await.unwrap();

        let tail: Vec<Event> = store.fetch_from_sequence(2).try_collect().await.unwrap();
        assert_eq!(
            tail.iter().map(|e| e.sequence).collect::<Vec<_>>(),
            vec![2, 3]
        );
    }

    #[tokio::test]
    async fn health_reports_volatile_backend() {
        let store = InMemoryStore::new();
        let health = store.health().await;
        assert!(health.reachable);
        assert!(!health.persistent);
        assert!(health.pool.is_none());
        assert!(!store.is_persistent());
    }

    #[tokio::test]
    async fn fetch_latest_tracks_the_head() {
        let store = InMemoryStore::new();
        let id = Uuid::new_v4();
        assert!(store.fetch_latest("Note", id).await.unwrap().is_none());

        let e1 = append(&store, id, 1, None).await.unwrap();
        append(&store, id, 2, Some(e1.hash.clone())).await.unwrap();

        let latest = store.fetch_latest("Note", id).await.unwrap().unwrap();
        assert_eq!(latest.aggregate_version, 2);
    }
}
