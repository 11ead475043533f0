//! Event definitions for the append-only ledger.
//!
//! This module provides:
//! - `Actor` — the discriminated reference to who or what caused an event
//! - `CandidateEvent` — the append input, lacking sequence and hash linkage
//! - `PreparedEvent` — a validated, hash-linked event awaiting its sequence
//! - `Event` — the committed, immutable fact as stored and read back

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{LedgerError, Result};

// =============================================================================
// Actor
// =============================================================================

/// Who or what caused an event. Required on every event; never omitted.
///
/// Serialized as a tagged JSON object so collaborators (authorization,
/// audit scans) can discriminate without guessing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Actor {
    /// An internal system process (workflow engine, hooks processor).
    System { component: String },
    /// A named party known to the ledger.
    Party { id: Uuid },
    /// An unauthenticated caller. Still recorded, never blank.
    Anonymous,
}

impl Actor {
    /// Create a system actor for the given component.
    pub fn system(component: impl Into<String>) -> Self {
        Self::System {
            component: component.into(),
        }
    }

    /// Create a party actor.
    pub fn party(id: Uuid) -> Self {
        Self::Party { id }
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Actor::System { component } => write!(f, "system:{}", component),
            Actor::Party { id } => write!(f, "party:{}", id),
            Actor::Anonymous => write!(f, "anonymous"),
        }
    }
}

// =============================================================================
// Candidate Event
// =============================================================================

/// A candidate event submitted to the append pipeline.
///
/// Carries everything the caller asserts; the pipeline supplies
/// `previous_hash`, `hash`, and the store assigns `sequence` at commit time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateEvent {
    /// Globally unique identifier, defaulted to a fresh v4.
    pub id: Uuid,

    /// Domain-defined tag, e.g. "PartyRegistered". Opaque to the core.
    pub event_type: String,

    /// Logical entity type this event belongs to.
    pub aggregate_type: String,

    /// Logical entity identity within its type.
    pub aggregate_id: Uuid,

    /// Expected position in the aggregate's history: 1 for the first
    /// event, otherwise latest + 1.
    pub aggregate_version: i64,

    /// Caller-asserted business time of the fact.
    pub timestamp: DateTime<Utc>,

    /// Who caused this event. Required.
    pub actor: Actor,

    /// Opaque, type-tagged payload. The core never inspects it.
    #[serde(default)]
    pub payload: serde_json::Value,

    /// Back-references to the command/event(s) that caused this one.
    #[serde(default)]
    pub causation: Vec<Uuid>,
}

impl CandidateEvent {
    /// Create a candidate with a fresh id, current timestamp, null payload
    /// and no causation links.
    pub fn new(
        event_type: impl Into<String>,
        aggregate_type: impl Into<String>,
        aggregate_id: Uuid,
        aggregate_version: i64,
        actor: Actor,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            aggregate_type: aggregate_type.into(),
            aggregate_id,
            aggregate_version,
            timestamp: Utc::now(),
            actor,
            payload: serde_json::Value::Null,
            causation: Vec::new(),
        }
    }

    /// Set the payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Set the business timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Set causation back-references.
    pub fn with_causation(mut self, causation: Vec<Uuid>) -> Self {
        self.causation = causation;
        self
    }

    /// Set an explicit event id.
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Validate the candidate against the pipeline's acceptance rules.
    ///
    /// `max_clock_skew` bounds how far into the future the asserted
    /// timestamp may lie relative to the pipeline's clock.
    pub fn validate(&self, now: DateTime<Utc>, max_clock_skew: Duration) -> Result<()> {
        if self.event_type.trim().is_empty() {
            return Err(LedgerError::validation("event_type must not be empty"));
        }
        if self.aggregate_type.trim().is_empty() {
            return Err(LedgerError::validation("aggregate_type must not be empty"));
        }
        if self.aggregate_version < 1 {
            return Err(LedgerError::validation(format!(
                "aggregate_version must be >= 1, got {}",
                self.aggregate_version
            )));
        }
        if self.timestamp.timestamp() < 0 {
            return Err(LedgerError::validation(
                "timestamp must not precede the epoch",
            ));
        }
        if self.timestamp > now + max_clock_skew {
            return Err(LedgerError::validation(format!(
                "timestamp {} is unreasonably far in the future",
                self.timestamp
            )));
        }
        match &self.actor {
            Actor::System { component } if component.trim().is_empty() => {
                return Err(LedgerError::validation(
                    "system actor must name its component",
                ));
            }
            Actor::Party { id } if id.is_nil() => {
                return Err(LedgerError::validation("party actor must carry a real id"));
            }
            _ => {}
        }
        Ok(())
    }

    /// Bind the candidate into the aggregate's hash chain, producing an
    /// event ready for atomic commit.
    pub fn into_prepared(self, hash: String, previous_hash: Option<String>) -> PreparedEvent {
        PreparedEvent {
            id: self.id,
            event_type: self.event_type,
            aggregate_type: self.aggregate_type,
            aggregate_id: self.aggregate_id,
            aggregate_version: self.aggregate_version,
            timestamp: self.timestamp,
            actor: self.actor,
            payload: self.payload,
            causation: self.causation,
            hash,
            previous_hash,
        }
    }
}

// =============================================================================
// Prepared Event
// =============================================================================

/// A validated, hash-linked event awaiting its global sequence.
///
/// Produced by the append pipeline; consumed by `EventStore::commit`, which
/// re-checks the expected version under its serialization primitive and
/// assigns `sequence` atomically.
#[derive(Debug, Clone)]
pub struct PreparedEvent {
    pub id: Uuid,
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub aggregate_version: i64,
    pub timestamp: DateTime<Utc>,
    pub actor: Actor,
    pub payload: serde_json::Value,
    pub causation: Vec<Uuid>,
    pub hash: String,
    pub previous_hash: Option<String>,
}

impl PreparedEvent {
    /// Finalize with the store-assigned sequence.
    pub fn into_event(self, sequence: i64) -> Event {
        Event {
            sequence,
            id: self.id,
            event_type: self.event_type,
            aggregate_type: self.aggregate_type,
            aggregate_id: self.aggregate_id,
            aggregate_version: self.aggregate_version,
            timestamp: self.timestamp,
            actor: self.actor,
            payload: self.payload,
            causation: self.causation,
            hash: self.hash,
            previous_hash: self.previous_hash,
        }
    }
}

// =============================================================================
// Committed Event
// =============================================================================

/// A committed, immutable fact.
///
/// Once returned by the append pipeline an event is never mutated or
/// deleted; the core exposes no update or delete operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Global total-order position, unique across the entire store.
    pub sequence: i64,

    /// Globally unique identifier.
    pub id: Uuid,

    /// Domain-defined tag.
    pub event_type: String,

    /// Logical entity type.
    pub aggregate_type: String,

    /// Logical entity identity.
    pub aggregate_id: Uuid,

    /// Dense per-aggregate position: 1, 2, 3, ... with no gaps.
    pub aggregate_version: i64,

    /// Caller-asserted business time.
    pub timestamp: DateTime<Utc>,

    /// Who caused this event.
    pub actor: Actor,

    /// Opaque payload.
    pub payload: serde_json::Value,

    /// Causation back-references.
    pub causation: Vec<Uuid>,

    /// SHA-256 content commitment over this event's fields and
    /// `previous_hash`, hex-encoded.
    pub hash: String,

    /// The `hash` of the immediately preceding event of the same
    /// aggregate; `None` for version 1.
    pub previous_hash: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn candidate() -> CandidateEvent {
        CandidateEvent::new(
            "PartyRegistered",
            "Party",
            Uuid::new_v4(),
            1,
            Actor::system("workflow-engine"),
        )
    }

    #[test]
    fn valid_candidate_passes() {
        let c = candidate().with_payload(json!({"name": "John"}));
        assert!(c.validate(Utc::now(), Duration::minutes(5)).is_ok());
    }

    #[test]
    fn empty_event_type_is_rejected() {
        let mut c = candidate();
        c.event_type = "  ".to_string();
        let err = c.validate(Utc::now(), Duration::minutes(5)).unwrap_err();
        assert_eq!(err.category(), "validation");
    }

    #[test]
    fn zero_version_is_rejected() {
        let mut c = candidate();
        c.aggregate_version = 0;
        assert!(c.validate(Utc::now(), Duration::minutes(5)).is_err());
    }

    #[test]
    fn far_future_timestamp_is_rejected() {
        let c = candidate().with_timestamp(Utc::now() + Duration::hours(2));
        assert!(c.validate(Utc::now(), Duration::minutes(5)).is_err());
    }

    #[test]
    fn timestamp_within_skew_window_passes() {
        let c = candidate().with_timestamp(Utc::now() + Duration::minutes(3));
        assert!(c.validate(Utc::now(), Duration::minutes(5)).is_ok());
    }

    #[test]
    fn degenerate_actors_are_rejected() {
        let mut c = candidate();
        c.actor = Actor::System {
            component: String::new(),
        };
        assert!(c.validate(Utc::now(), Duration::minutes(5)).is_err());

        c.actor = Actor::Party { id: Uuid::nil() };
        assert!(c.validate(Utc::now(), Duration::minutes(5)).is_err());
    }

    #[test]
    fn candidate_without_actor_fails_deserialization() {
        let raw = json!({
            "id": Uuid::new_v4(),
            "event_type": "PartyRegistered",
            "aggregate_type": "Party",
            "aggregate_id": Uuid::new_v4(),
            "aggregate_version": 1,
            "timestamp": Utc::now(),
        });
        assert!(serde_json::from_value::<CandidateEvent>(raw).is_err());
    }

    #[test]
    fn actor_serializes_as_tagged_object() {
        let json = serde_json::to_value(Actor::system("indexer")).unwrap();
        assert_eq!(json["kind"], "system");
        assert_eq!(json["component"], "indexer");

        let json = serde_json::to_value(Actor::Anonymous).unwrap();
        assert_eq!(json["kind"], "anonymous");
    }
}
