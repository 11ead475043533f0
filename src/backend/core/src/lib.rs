//! # Ledger Core
//!
//! An append-only, hash-chained event log with deterministic aggregate
//! reconstruction. Every other subsystem of the relationship ledger is a
//! consumer of this crate: they read ordered facts, fold them into state,
//! and write new facts back.
//!
//! ## Architecture
//!
//! - **Append Pipeline**: validation, optimistic concurrency on aggregate
//!   version, hash chaining, atomic commit
//! - **Backing Stores**: a volatile in-process store and a PostgreSQL
//!   store with byte-identical observable behavior
//! - **Read Surface**: lazy, ordered streams by aggregate, by global
//!   sequence, or latest-for-aggregate, with time-travel cutoffs
//! - **Integrity Verifier**: read-only hash chain verification with
//!   first-broken-event reporting
//! - **Rehydration Engine**: pure fold of ordered events into typed state

pub mod config;
pub mod error;
pub mod events;
pub mod integrity;
pub mod ledger;
pub mod store;
pub mod telemetry;

pub use error::{LedgerError, Result};
pub use ledger::Ledger;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, DatabaseConfig, LedgerConfig, ObservabilityConfig};
    pub use crate::error::{LedgerError, Result};
    pub use crate::events::{Actor, CandidateEvent, Event, Rehydrate, Rehydrated};
    pub use crate::integrity::{BrokenLink, IntegrityReport, VerifyScope};
    pub use crate::ledger::Ledger;
    pub use crate::store::{EventStore, HealthReport, InMemoryStore, PoolMetrics, PostgresStore};
}
