/// Error types for the scheduling core.
///
/// Conflicts are not errors. A taken slot comes back as a `ConflictReport`
/// inside a normal return value; only malformed input, lost races, missing
/// records and upstream failures end up here.

use thiserror::Error;
use uuid::Uuid;

use crate::models::AppointmentStatus;

/// Field-level input validation failure, raised before any conflict logic runs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field}: invalid time '{value}', expected HH:MM")]
    InvalidTime { field: &'static str, value: String },

    #[error("{field}: invalid date '{value}', expected YYYY-MM-DD")]
    InvalidDate { field: &'static str, value: String },

    #[error("duration: must be positive, got {0}")]
    NonPositiveDuration(i64),

    #[error("{0}: required")]
    MissingField(&'static str),

    #[error("recurrence: {0}")]
    InvalidRecurrence(String),
}

/// Failure reported by the appointment store or provider directory.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The store refused a write because an overlapping booking was committed
    /// first.
    #[error("Slot already taken by appointment {0}")]
    SlotTaken(Uuid),

    #[error("Record not found: {0}")]
    NotFound(Uuid),
}

/// Rejected status change.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Cannot move from {from} to {to} on the board")]
    NotAdjacent {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("Appointment is already {0}")]
    Unchanged(AppointmentStatus),

    #[error("Completed appointments cannot be moved on the board")]
    Terminal,
}

/// Top-level error for boundary operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulingError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Passed the in-section check but lost to a concurrent writer. Callers
    /// should re-fetch availability.
    #[error("Slot was just taken, refresh availability and try again")]
    SlotJustTaken,

    #[error("Appointment not found: {0}")]
    NotFound(Uuid),

    #[error("Service not found: {0}")]
    UnknownService(Uuid),

    #[error("A {0} appointment cannot be rescheduled")]
    Immutable(AppointmentStatus),

    #[error("Invalid status change: {0}")]
    Transition(#[from] TransitionError),

    /// Availability could not be determined. Never treated as "free".
    #[error("Upstream lookup failed: {0}")]
    Upstream(StoreError),
}

impl From<StoreError> for SchedulingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::SlotTaken(_) => SchedulingError::SlotJustTaken,
            StoreError::NotFound(id) => SchedulingError::NotFound(id),
            other => SchedulingError::Upstream(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_taken_maps_to_distinct_error() {
        let err: SchedulingError = StoreError::SlotTaken(Uuid::new_v4()).into();
        assert_eq!(err, SchedulingError::SlotJustTaken);

        let err: SchedulingError = StoreError::Unavailable("timeout".to_string()).into();
        assert!(matches!(err, SchedulingError::Upstream(_)));
    }

    #[test]
    fn validation_messages_name_the_field() {
        let err = ValidationError::InvalidTime {
            field: "time",
            value: "25:99".to_string(),
        };
        assert_eq!(err.to_string(), "time: invalid time '25:99', expected HH:MM");
    }
}
