//! The append pipeline and collaborator-facing API surface.
//!
//! Every other subsystem (workflow engine, authorization, hooks,
//! projections, transport) consumes the ledger through this type: append
//! a fact, read ordered facts back, verify the chain, rebuild state.

use chrono::{DateTime, Duration, Utc};
use futures::stream::BoxStream;
use metrics::counter;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::config::LedgerConfig;
use crate::error::{LedgerError, Result};
use crate::events::aggregate::{self, Rehydrate, Rehydrated};
use crate::events::event::{CandidateEvent, Event};
use crate::events::hash;
use crate::integrity::{self, IntegrityReport, VerifyScope};
use crate::store::{EventStore, HealthReport};

/// The event ledger: validated appends, ordered reads, chain verification
/// and aggregate reconstruction over a pluggable backing store.
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn EventStore>,
    max_clock_skew: Duration,
}

impl Ledger {
    /// Create a ledger over the given store with default configuration.
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self::with_config(store, &LedgerConfig::default())
    }

    /// Create a ledger with explicit pipeline configuration.
    pub fn with_config(store: Arc<dyn EventStore>, config: &LedgerConfig) -> Self {
        Self {
            store,
            max_clock_skew: Duration::seconds(config.max_clock_skew_secs as i64),
        }
    }

    /// Access the underlying store.
    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Append Pipeline
    // ─────────────────────────────────────────────────────────────────────────

    /// Append a candidate event to the log.
    ///
    /// Validates the candidate, checks the expected aggregate version
    /// against the current head, binds the event into the aggregate's hash
    /// chain, and commits atomically. On success the event is visible to
    /// all subsequent reads in `sequence` order. On any failure nothing is
    /// written: a stale version yields `ConcurrencyConflict` (re-read and
    /// retry), malformed input yields `Validation`, and backend failures
    /// yield `BackendUnavailable`. The ledger itself never retries.
    #[instrument(skip(self, candidate), fields(
        event_type = %candidate.event_type,
        aggregate_type = %candidate.aggregate_type,
        aggregate_id = %candidate.aggregate_id,
    ))]
    pub async fn append(&self, candidate: CandidateEvent) -> Result<Event> {
        let mut candidate = candidate;
        // Persisted timestamps carry microsecond precision; hash what will
        // be stored.
        candidate.timestamp = hash::truncate_to_micros(candidate.timestamp);

        if let Err(err) = candidate.validate(Utc::now(), self.max_clock_skew) {
            err.record_metrics();
            return Err(err);
        }

        let latest = self
            .store
            .fetch_latest(&candidate.aggregate_type, candidate.aggregate_id)
            .await?;

        let expected = latest.as_ref().map(|e| e.aggregate_version + 1).unwrap_or(1);
        if candidate.aggregate_version != expected {
            let err = LedgerError::conflict(
                candidate.aggregate_type,
                candidate.aggregate_id,
                candidate.aggregate_version,
                expected,
            );
            err.record_metrics();
            counter!("ledger_conflicts_total").increment(1);
            return Err(err);
        }

        let previous_hash = latest.map(|e| e.hash);
        let event_hash = hash::hash_candidate(&candidate, previous_hash.as_deref())?;
        let prepared = candidate.into_prepared(event_hash, previous_hash);

        // The store re-checks the head under its serialization primitive;
        // a concurrent winner surfaces here as a conflict.
        let event = match self.store.commit(prepared).await {
            Ok(event) => event,
            Err(err) => {
                err.record_metrics();
                if matches!(err, LedgerError::ConcurrencyConflict { .. }) {
                    counter!("ledger_conflicts_total").increment(1);
                }
                return Err(err);
            }
        };

        counter!("ledger_appends_total").increment(1);
        debug!(
            sequence = event.sequence,
            version = event.aggregate_version,
            "event appended"
        );
        Ok(event)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Read Surface
    // ─────────────────────────────────────────────────────────────────────────

    /// All events for an aggregate in ascending version order, optionally
    /// cut off at a business timestamp for historical reads.
    pub fn get_by_aggregate<'a>(
        &'a self,
        aggregate_type: &str,
        aggregate_id: Uuid,
        to_timestamp: Option<DateTime<Utc>>,
    ) -> BoxStream<'a, Result<Event>> {
        self.store
            .fetch_ordered(aggregate_type, aggregate_id, to_timestamp)
    }

    /// The global feed: all events from `from` onward in commit order.
    /// Consumed by projections, search indexers, and audit scans.
    pub fn get_by_sequence(&self, from: i64) -> BoxStream<'_, Result<Event>> {
        self.store.fetch_from_sequence(from)
    }

    /// The most recent event for an aggregate, or `None`. A cheap
    /// existence and version check that avoids full replay.
    pub async fn get_latest(
        &self,
        aggregate_type: &str,
        aggregate_id: Uuid,
    ) -> Result<Option<Event>> {
        self.store.fetch_latest(aggregate_type, aggregate_id).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Integrity & Rehydration
    // ─────────────────────────────────────────────────────────────────────────

    /// Verify hash chains across the whole store, or a single aggregate
    /// when a scope is given. Read-only; breakage is reported, not healed.
    pub async fn verify_integrity(&self, scope: Option<VerifyScope>) -> Result<IntegrityReport> {
        integrity::verify(self.store.as_ref(), scope.unwrap_or(VerifyScope::All)).await
    }

    /// Reconstruct an aggregate's state by replaying its events, at "now"
    /// or as of `to_timestamp`. Returns the default state with
    /// `exists: false` when the aggregate has no events.
    pub async fn reconstruct<S: Rehydrate>(
        &self,
        aggregate_type: &str,
        aggregate_id: Uuid,
        to_timestamp: Option<DateTime<Utc>>,
    ) -> Result<Rehydrated<S>> {
        aggregate::reconstruct(
            self.store.as_ref(),
            aggregate_type,
            aggregate_id,
            to_timestamp,
        )
        .await
    }

    /// Backend reachability and persistence mode, for health endpoints.
    pub async fn health(&self) -> HealthReport {
        self.store.health().await
    }
}
