//! PostgreSQL-backed event store.
//!
//! The production backend. `sequence` is a `BIGSERIAL` primary ordering
//! key; appends run inside a transaction that holds a global advisory
//! lock, so sequence allocation and the aggregate-head check are
//! serialized and readers observe sequences in commit order with no
//! gaps in the prefix they can see. A uniqueness constraint on
//! `(aggregate_type, aggregate_id, aggregate_version)` enforces the
//! concurrency invariant at the storage layer as a second line of defense.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::error::{LedgerError, Result};
use crate::events::event::{Actor, Event, PreparedEvent};

use super::{EventStore, HealthReport, PoolMetrics};

/// Advisory lock key serializing all appends. Spells "ldgr" in ASCII.
const APPEND_LOCK_KEY: i64 = 0x6c64_6772;

/// Latency above which the connectivity probe logs a warning.
const SLOW_PROBE: Duration = Duration::from_millis(100);

// ═══════════════════════════════════════════════════════════════════════════════
// Store
// ═══════════════════════════════════════════════════════════════════════════════

/// PostgreSQL-backed event store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    max_connections: u32,
    min_connections: u32,
}

impl PostgresStore {
    /// Connect a new pool using the database configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await?;

        Ok(Self {
            pool,
            max_connections: config.max_connections,
            min_connections: config.min_connections,
        })
    }

    /// Wrap an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            max_connections: 0,
            min_connections: 0,
        }
    }

    /// Run migrations with logging.
    pub async fn migrate(&self) -> Result<()> {
        info!("Running ledger migrations...");
        let start = Instant::now();
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| {
                error!(error = %e, "Ledger migration failed");
                LedgerError::BackendUnavailable(e.to_string())
            })?;
        info!(
            duration_ms = start.elapsed().as_millis() as u64,
            "Ledger migrations completed"
        );
        Ok(())
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Get connection pool metrics, as reported through `health`.
    pub fn pool_metrics(&self) -> PoolMetrics {
        let size = self.pool.size();
        let idle = self.pool.num_idle() as u32;
        let active = size.saturating_sub(idle);
        let utilization = if self.max_connections > 0 {
            (active as f64 / self.max_connections as f64) * 100.0
        } else {
            0.0
        };

        PoolMetrics {
            pool_size: size,
            idle_connections: idle,
            active_connections: active,
            max_connections: self.max_connections,
            min_connections: self.min_connections,
            utilization_pct: utilization,
        }
    }
}

#[async_trait]
impl EventStore for PostgresStore {
    #[instrument(skip(self, event), fields(event_type = %event.event_type, aggregate_id = %event.aggregate_id))]
    async fn commit(&self, event: PreparedEvent) -> Result<Event> {
        let mut tx = self.pool.begin().await?;

        // Serializes sequence allocation with commit order: without it,
        // BIGSERIAL values can become visible out of order across
        // concurrent transactions.
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(APPEND_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        let head_version: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT aggregate_version
            FROM events
            WHERE aggregate_type = $1 AND aggregate_id = $2
            ORDER BY aggregate_version DESC
            LIMIT 1
            "#,
        )
        .bind(&event.aggregate_type)
        .bind(event.aggregate_id)
        .fetch_optional(&mut *tx)
        .await?;

        let expected = head_version.unwrap_or(0) + 1;
        if event.aggregate_version != expected {
            // Dropping the transaction rolls it back; nothing was written.
            return Err(LedgerError::conflict(
                event.aggregate_type.clone(),
                event.aggregate_id,
                event.aggregate_version,
                expected,
            ));
        }

        let actor = serde_json::to_value(&event.actor)?;
        let sequence: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO events (id, event_type, aggregate_type, aggregate_id, aggregate_version,
                                timestamp, actor, payload, causation, hash, previous_hash)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING sequence
            "#,
        )
        .bind(event.id)
        .bind(&event.event_type)
        .bind(&event.aggregate_type)
        .bind(event.aggregate_id)
        .bind(event.aggregate_version)
        .bind(event.timestamp)
        .bind(&actor)
        .bind(&event.payload)
        .bind(&event.causation)
        .bind(&event.hash)
        .bind(event.previous_hash.as_deref())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_unique_violation(e, &event, expected))?;

        tx.commit().await?;

        debug!(sequence, version = event.aggregate_version, "event committed");
        Ok(event.into_event(sequence))
    }

    async fn fetch_latest(
        &self,
        aggregate_type: &str,
        aggregate_id: Uuid,
    ) -> Result<Option<Event>> {
        let row = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT sequence, id, event_type, aggregate_type, aggregate_id,
                   aggregate_version, timestamp, actor, payload, causation, hash, previous_hash
            FROM events
            WHERE aggregate_type = $1 AND aggregate_id = $2
            ORDER BY aggregate_version DESC
            LIMIT 1
            "#,
        )
        .bind(aggregate_type)
        .bind(aggregate_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Event::try_from).transpose()
    }

    fn fetch_ordered<'a>(
        &'a self,
        aggregate_type: &str,
        aggregate_id: Uuid,
        to_timestamp: Option<DateTime<Utc>>,
    ) -> BoxStream<'a, Result<Event>> {
        sqlx::query_as::<_, EventRow>(
            r#"
            SELECT sequence, id, event_type, aggregate_type, aggregate_id,
                   aggregate_version, timestamp, actor, payload, causation, hash, previous_hash
            FROM events
            WHERE aggregate_type = $1 AND aggregate_id = $2
              AND ($3::timestamptz IS NULL OR timestamp <= $3)
            ORDER BY aggregate_version
            "#,
        )
        .bind(aggregate_type.to_string())
        .bind(aggregate_id)
        .bind(to_timestamp)
        .fetch(&self.pool)
        .map(|row| row.map_err(LedgerError::from).and_then(Event::try_from))
        .boxed()
    }

    fn fetch_from_sequence(&self, from: i64) -> BoxStream<'_, Result<Event>> {
        sqlx::query_as::<_, EventRow>(
            r#"
            SELECT sequence, id, event_type, aggregate_type, aggregate_id,
                   aggregate_version, timestamp, actor, payload, causation, hash, previous_hash
            FROM events
            WHERE sequence >= $1
            ORDER BY sequence
            "#,
        )
        .bind(from)
        .fetch(&self.pool)
        .map(|row| row.map_err(LedgerError::from).and_then(Event::try_from))
        .boxed()
    }

    async fn health(&self) -> HealthReport {
        let start = Instant::now();
        let probe = sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await;
        let latency = start.elapsed();

        match probe {
            Ok(_) => {
                if latency > SLOW_PROBE {
                    warn!(
                        latency_ms = latency.as_millis() as u64,
                        "Ledger backend probe latency is high"
                    );
                }
                HealthReport {
                    reachable: true,
                    persistent: true,
                    latency_ms: Some(latency.as_millis() as u64),
                    pool: Some(self.pool_metrics()),
                }
            }
            Err(e) => {
                error!(error = %e, "Ledger backend probe failed");
                HealthReport {
                    reachable: false,
                    persistent: true,
                    latency_ms: None,
                    pool: Some(self.pool_metrics()),
                }
            }
        }
    }

    fn is_persistent(&self) -> bool {
        true
    }
}

/// Translate a unique-constraint violation on the version index into the
/// concurrency conflict it represents.
fn map_unique_violation(err: sqlx::Error, event: &PreparedEvent, expected: i64) -> LedgerError {
    if let sqlx::Error::Database(ref db) = err {
        if db.code().as_deref() == Some("23505") {
            return LedgerError::conflict(
                event.aggregate_type.clone(),
                event.aggregate_id,
                event.aggregate_version,
                expected,
            );
        }
    }
    LedgerError::from(err)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Row Type
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    sequence: i64,
    id: Uuid,
    event_type: String,
    aggregate_type: String,
    aggregate_id: Uuid,
    aggregate_version: i64,
    timestamp: DateTime<Utc>,
    actor: serde_json::Value,
    payload: serde_json::Value,
    causation: Vec<Uuid>,
    hash: String,
    previous_hash: Option<String>,
}

impl TryFrom<EventRow> for Event {
    type Error = LedgerError;

    fn try_from(row: EventRow) -> Result<Self> {
        let actor: Actor = serde_json::from_value(row.actor)?;
        Ok(Event {
            sequence: row.sequence,
            id: row.id,
            event_type: row.event_type,
            aggregate_type: row.aggregate_type,
            aggregate_id: row.aggregate_id,
            aggregate_version: row.aggregate_version,
            timestamp: row.timestamp,
            actor,
            payload: row.payload,
            causation: row.causation,
            hash: row.hash,
            previous_hash: row.previous_hash,
        })
    }
}
