//! Hard limits guarding against resource exhaustion. Exceeding any of these
//! fails the operation with `EngineError::LimitExceeded`.

/// Max registered resources per engine.
pub const MAX_RESOURCES: usize = 10_000;

/// Max length of a resource name.
pub const MAX_NAME_LEN: usize = 255;

/// Max length of a group's purpose text.
pub const MAX_PURPOSE_LEN: usize = 255;

/// Max length of a group's free-text notes.
pub const MAX_NOTES_LEN: usize = 4_096;

/// Max slots in a single reservation group (a year of daily recurrences).
pub const MAX_SLOTS_PER_GROUP: usize = 366;

/// Max slots in one (resource, start date) bucket.
pub const MAX_SLOTS_PER_DAY: usize = 1_000;
