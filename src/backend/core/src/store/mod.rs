//! Pluggable backing stores for the event log.
//!
//! Two conforming implementations exist: a volatile in-process store for
//! tests and development, and a PostgreSQL-backed store for production.
//! Both expose identical ordering and concurrency observables; the shared
//! conformance suite in `tests/` runs the same scenarios against each.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::Serialize;
use uuid::Uuid;

use crate::error::Result;
use crate::events::event::{Event, PreparedEvent};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;

// =============================================================================
// Health
// =============================================================================

/// Backend reachability report, surfaced through the ledger's health check.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Whether the backend answered a probe.
    pub reachable: bool,

    /// Whether events survive process restart (false for the volatile store).
    pub persistent: bool,

    /// Probe round-trip latency, when the probe performs I/O.
    pub latency_ms: Option<u64>,

    /// Connection pool utilization, when the backend pools connections.
    pub pool: Option<PoolMetrics>,
}

/// Metrics collected from a backend's connection pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolMetrics {
    pub pool_size: u32,
    pub idle_connections: u32,
    pub active_connections: u32,
    pub max_connections: u32,
    pub min_connections: u32,
    pub utilization_pct: f64,
}

// =============================================================================
// EventStore Trait
// =============================================================================

/// Durable persistence capability for the event log.
///
/// `commit` is the only write path and must be atomic: it re-checks the
/// expected aggregate version and allocates the global `sequence` under a
/// serialization primitive, so no two concurrent appends can act on the
/// same observed head. Reads are pure and non-destructive; abandoning a
/// returned stream mid-iteration has no effect on the store.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Atomically persist a prepared event, assigning its global sequence.
    ///
    /// Fails with `ConcurrencyConflict` when the aggregate's head is no
    /// longer at `aggregate_version - 1`, with no partial write observable.
    async fn commit(&self, event: PreparedEvent) -> Result<Event>;

    /// The most recent event for an aggregate, or `None`.
    async fn fetch_latest(
        &self,
        aggregate_type: &str,
        aggregate_id: Uuid,
    ) -> Result<Option<Event>>;

    /// All events for an aggregate in ascending `aggregate_version` order,
    /// optionally cut off at a business timestamp (inclusive).
    ///
    /// The stream is lazy, finite, and restartable: a fresh call re-reads
    /// from the store.
    fn fetch_ordered<'a>(
        &'a self,
        aggregate_type: &str,
        aggregate_id: Uuid,
        to_timestamp: Option<DateTime<Utc>>,
    ) -> BoxStream<'a, Result<Event>>;

    /// All events from a global sequence position onward, in ascending
    /// `sequence` order across every aggregate. Never skips or reorders
    /// events relative to commit order.
    fn fetch_from_sequence(&self, from: i64) -> BoxStream<'_, Result<Event>>;

    /// Probe backend reachability.
    async fn health(&self) -> HealthReport;

    /// Whether this store survives process restart.
    fn is_persistent(&self) -> bool;
}
