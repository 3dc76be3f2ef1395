//! Reservation conflict & lifecycle engine for shared resources.
//!
//! Users submit a [`model::Group`] of time slots on one resource; administrators
//! approve or deny them. The engine detects time-overlap conflicts, cascades
//! denials when an approval displaces pending requests, sweeps expired slots to
//! terminal states, and emits deduplicated notification events through the
//! [`notify::Notifier`] seam. State is kept in memory per resource and made
//! durable by replaying an append-only journal ([`wal::Wal`]).

pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod wal;

pub use engine::{Engine, EngineError, SweepScope};
