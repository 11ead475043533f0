//! Hash chain construction and verification.
//!
//! Each event commits to a SHA-256 digest over its own fields plus the
//! digest of the immediately preceding event of the same aggregate. The
//! preimage is a stable concatenation of length-prefixed segments, in
//! order:
//!
//! ```text
//! id, event_type, aggregate_type, aggregate_id, aggregate_version,
//! timestamp (RFC 3339, microseconds, UTC), actor JSON, payload JSON,
//! causation JSON, previous_hash or ""
//! ```
//!
//! Every segment is preceded by its byte length (8 bytes, big-endian), so
//! field boundaries are unambiguous even for free-form strings such as
//! `event_type`: no pair of distinct events can concatenate to the same
//! preimage. JSON fields are serialized with `serde_json`, whose object
//! maps are key-sorted, so the serialization is canonical for a given
//! value. Timestamps are truncated to microseconds before hashing because
//! the persistent backend stores microsecond precision; hashing
//! nanoseconds would break verification after a round trip.

use chrono::{DateTime, Timelike, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::Result;

use super::event::{Actor, CandidateEvent, Event};

/// Truncate a timestamp to microsecond precision.
///
/// Applied by the append pipeline before hashing so the digest is stable
/// across the in-memory and relational backends.
pub fn truncate_to_micros(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp
        .with_nanosecond(timestamp.nanosecond() / 1_000 * 1_000)
        .unwrap_or(timestamp)
}

/// Compute the chain hash for a candidate being appended after
/// `previous_hash` (or at the head of a new aggregate when `None`).
pub fn hash_candidate(candidate: &CandidateEvent, previous_hash: Option<&str>) -> Result<String> {
    digest(
        candidate.id,
        &candidate.event_type,
        &candidate.aggregate_type,
        candidate.aggregate_id,
        candidate.aggregate_version,
        candidate.timestamp,
        &candidate.actor,
        &candidate.payload,
        &candidate.causation,
        previous_hash,
    )
}

/// Recompute a stored event's hash from its own fields and compare it to
/// the stored value. Returns `false` when the commitment does not hold.
pub fn verify_event(event: &Event) -> Result<bool> {
    let recomputed = digest(
        event.id,
        &event.event_type,
        &event.aggregate_type,
        event.aggregate_id,
        event.aggregate_version,
        event.timestamp,
        &event.actor,
        &event.payload,
        &event.causation,
        event.previous_hash.as_deref(),
    )?;
    Ok(recomputed == event.hash)
}

/// Feed one length-prefixed segment into the hasher.
fn segment(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

#[allow(clippy::too_many_arguments)]
fn digest(
    id: Uuid,
    event_type: &str,
    aggregate_type: &str,
    aggregate_id: Uuid,
    aggregate_version: i64,
    timestamp: DateTime<Utc>,
    actor: &Actor,
    payload: &serde_json::Value,
    causation: &[Uuid],
    previous_hash: Option<&str>,
) -> Result<String> {
    let mut hasher = Sha256::new();
    segment(&mut hasher, id.to_string().as_bytes());
    segment(&mut hasher, event_type.as_bytes());
    segment(&mut hasher, aggregate_type.as_bytes());
    segment(&mut hasher, aggregate_id.to_string().as_bytes());
    segment(&mut hasher, aggregate_version.to_string().as_bytes());
    segment(
        &mut hasher,
        truncate_to_micros(timestamp)
            .to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
            .as_bytes(),
    );
    segment(&mut hasher, &serde_json::to_vec(actor)?);
    segment(&mut hasher, &serde_json::to_vec(payload)?);
    segment(&mut hasher, &serde_json::to_vec(causation)?);
    segment(&mut hasher, previous_hash.unwrap_or_default().as_bytes());
    Ok(hex::encode(hasher.finalize()))
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
            Actor::system("test"),
        )
        .with_payload(json!({"name": "John"}))
    }

    #[test]
    fn hashing_is_deterministic() {
        let c = candidate();
        let a = hash_candidate(&c, None).unwrap();
        let b = hash_candidate(&c, None).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn hash_depends_on_previous_hash() {
        let c = candidate();
        let genesis = hash_candidate(&c, None).unwrap();
        let linked = hash_candidate(&c, Some("ab".repeat(32).as_str())).unwrap();
        assert_ne!(genesis, linked);
    }

    #[test]
    fn hash_depends_on_payload() {
        let c = candidate();
        let original = hash_candidate(&c, None).unwrap();
        let altered = c.with_payload(json!({"name": "Jane"}));
        assert_ne!(original, hash_candidate(&altered, None).unwrap());
    }

    #[test]
    fn hash_depends_on_causation() {
        let c = candidate();
        let without = hash_candidate(&c, None).unwrap();
        let with = hash_candidate(&c.with_causation(vec![Uuid::new_v4()]), None).unwrap();
        assert_ne!(without, with);
    }

    #[test]
    fn verify_detects_field_tampering() {
        let c = candidate();
        let hash = hash_candidate(&c, None).unwrap();
        let mut event = c.into_prepared(hash, None).into_event(1);
        assert!(verify_event(&event).unwrap());

        event.payload = json!({"name": "Mallory"});
        assert!(!verify_event(&event).unwrap());
    }

    #[test]
    fn verify_detects_causation_tampering() {
        let c = candidate().with_causation(vec![Uuid::new_v4()]);
        let hash = hash_candidate(&c, None).unwrap();
        let mut event = c.into_prepared(hash, None).into_event(1);
        assert!(verify_event(&event).unwrap());

        // Rewriting the audit back-references must break the commitment.
        event.causation = vec![Uuid::new_v4(), Uuid::new_v4()];
        assert!(!verify_event(&event).unwrap());
    }

    #[test]
    fn adjacent_string_fields_cannot_collide() {
        // The same bytes split differently across event_type and
        // aggregate_type must produce distinct digests.
        let a = candidate();
        let mut b = a.clone();

        let mut a = a;
        a.event_type = "Party|Registered".to_string();
        a.aggregate_type = "X".to_string();
        b.event_type = "Party".to_string();
        b.aggregate_type = "Registered|X".to_string();

        assert_ne!(
            hash_candidate(&a, None).unwrap(),
            hash_candidate(&b, None).unwrap()
        );
    }

    #[test]
    fn truncation_is_idempotent() {
        let now = Utc::now();
        let once = truncate_to_micros(now);
        assert_eq!(once, truncate_to_micros(once));
        assert_eq!(once.timestamp_subsec_nanos() % 1_000, 0);
    }

    #[test]
    fn hash_survives_microsecond_round_trip() {
        // A backend that stores microseconds must reproduce the digest.
        let mut c = candidate();
        c.timestamp = truncate_to_micros(c.timestamp);
        let hash = hash_candidate(&c, None).unwrap();
        let event = c.into_prepared(hash, None).into_event(1);
        assert!(verify_event(&event).unwrap());
    }
}
