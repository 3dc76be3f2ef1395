use ulid::Ulid;

use crate::model::SlotStatus;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Malformed input — reported to the caller, nothing mutated.
    Validation(&'static str),
    /// The approval collided with an already-approved slot (its id). Distinct
    /// from the cascade-deny path, which mutates the losing side instead.
    Conflict(Ulid),
    InvalidTransition {
        from: SlotStatus,
        to: SlotStatus,
    },
    /// Actor does not own the target group/slot.
    Permission(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Validation(msg) => write!(f, "validation failed: {msg}"),
            EngineError::Conflict(id) => {
                write!(f, "time window conflicts with approved slot: {id}")
            }
            EngineError::InvalidTransition { from, to } => {
                write!(f, "invalid transition: {from} -> {to}")
            }
            EngineError::Permission(actor) => {
                write!(f, "permission denied for actor: {actor}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "journal error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
