//! Error handling for the ledger core.
//!
//! This module provides:
//! - A structured error taxonomy covering every failure mode of the
//!   append/read/replay contract
//! - Retryability classification for callers implementing backoff
//! - Error categories for metrics and log grouping
//! - Conversions from the underlying database and serialization layers

use metrics::counter;
use thiserror::Error;
use uuid::Uuid;

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for the ledger core.
///
/// Validation and concurrency errors are local and expected: the immediate
/// caller fixes its input or re-reads the latest version and retries.
/// Integrity violations are never retried and must reach an operator-visible
/// channel. Backend unavailability is retryable with backoff and degrades
/// health status without corrupting state.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// The candidate event is malformed (bad timestamp, degenerate actor,
    /// missing type). No state change occurred.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The candidate's `aggregate_version` does not match the aggregate's
    /// current head. Exactly one writer wins a contested version; the rest
    /// land here. No state change occurred.
    #[error("concurrency conflict on {aggregate_type}/{aggregate_id}: expected version {expected}, found {found}")]
    ConcurrencyConflict {
        aggregate_type: String,
        aggregate_id: Uuid,
        expected: i64,
        found: i64,
    },

    /// The stored hash chain is broken. Detected only by the integrity
    /// verifier; indicates a bug or tampering and is never self-healed.
    #[error("integrity violation in {aggregate_type}/{aggregate_id} at sequence {sequence}: {detail}")]
    IntegrityViolation {
        aggregate_type: String,
        aggregate_id: Uuid,
        sequence: i64,
        detail: String,
    },

    /// The requested entity has no events. A valid outcome, distinguished
    /// from an error by callers that treat absence as meaningful.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The backing store could not be reached or failed mid-operation.
    /// Partial writes are never observable; callers should retry with backoff.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// An event or one of its structured fields could not be (de)serialized.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LedgerError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a concurrency conflict for the given aggregate.
    pub fn conflict(
        aggregate_type: impl Into<String>,
        aggregate_id: Uuid,
        expected: i64,
        found: i64,
    ) -> Self {
        Self::ConcurrencyConflict {
            aggregate_type: aggregate_type.into(),
            aggregate_id,
            expected,
            found,
        }
    }

    /// Check if this error is retryable by the caller.
    ///
    /// Concurrency conflicts are retryable after re-reading the latest
    /// version; backend failures are retryable with backoff. Everything
    /// else requires a fixed input or an operator.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrencyConflict { .. } | Self::BackendUnavailable(_)
        )
    }

    /// Get the error category for metrics and log grouping.
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::ConcurrencyConflict { .. } => "concurrency",
            Self::IntegrityViolation { .. } => "integrity",
            Self::NotFound { .. } => "not_found",
            Self::BackendUnavailable(_) => "backend",
            Self::Serialization(_) => "serialization",
        }
    }

    /// Record this error in the metrics pipeline.
    pub fn record_metrics(&self) {
        counter!("ledger_errors_total", "category" => self.category()).increment(1);
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound {
                entity: "event",
                id: String::new(),
            },
            other => Self::BackendUnavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_is_retryable() {
        let err = LedgerError::conflict("Party", Uuid::new_v4(), 2, 3);
        assert!(err.is_retryable());
        assert_eq!(err.category(), "concurrency");
    }

    #[test]
    fn validation_is_not_retryable() {
        let err = LedgerError::validation("missing event type");
        assert!(!err.is_retryable());
        assert_eq!(err.category(), "validation");
    }

    #[test]
    fn integrity_violation_is_not_retryable() {
        let err = LedgerError::IntegrityViolation {
            aggregate_type: "Party".to_string(),
            aggregate_id: Uuid::new_v4(),
            sequence: 7,
            detail: "hash mismatch".to_string(),
        };
        assert!(!err.is_retryable());
        assert_eq!(err.category(), "integrity");
    }

    #[test]
    fn conflict_message_names_versions() {
        let id = Uuid::new_v4();
        let err = LedgerError::conflict("Agreement", id, 4, 5);
        let msg = err.to_string();
        assert!(msg.contains("expected version 4"));
        assert!(msg.contains("found 5"));
    }
}
