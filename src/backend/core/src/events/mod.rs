//! Event model, hash chaining, and aggregate rehydration.

pub mod aggregate;
pub mod event;
pub mod hash;

pub use aggregate::{fold, reconstruct, Rehydrate, Rehydrated};
pub use event::{Actor, CandidateEvent, Event, PreparedEvent};
