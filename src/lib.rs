//! Appointment scheduling and conflict-resolution core.
//!
//! Availability, conflict detection, slot search, drag rescheduling, the
//! status workflow and recurring series for a clinic or salon booking
//! dashboard. Persistence stays outside; the core reads and writes through
//! the traits in [`store`].

pub mod availability;
pub mod config;
pub mod conflict;
pub mod debounce;
pub mod error;
pub mod models;
pub mod recurrence;
pub mod reschedule;
pub mod service;
pub mod slots;
pub mod snapshot;
pub mod status;
pub mod store;
pub mod time_grid;

pub use availability::{AvailabilityCalculator, DayAvailability, FreeInterval, NextSlot};
pub use config::{Enforcement, EnforcementPolicy, SchedulingConfig};
pub use conflict::{CheckScope, Conflict, ConflictContext, ConflictDetector, ConflictReport};
pub use error::{Result, SchedulingError, StoreError, TransitionError, ValidationError};
pub use models::{
    Appointment, AppointmentDraft, AppointmentPatch, AppointmentStatus, BookingRequest, Candidate,
    Provider, ProviderKind, ProviderRef, Service, WorkingHours,
};
pub use recurrence::{EndCondition, Frequency, RecurrenceOutcome, RecurrenceRule};
pub use reschedule::{GestureKind, GestureOutcome, RescheduleEngine};
pub use service::{BookingOutcome, BookingService, Clock, FixedClock, SystemClock};
pub use snapshot::{ProviderSnapshot, ProviderStatus};
pub use status::{BoardColumn, StatusMachine, TransitionSource};
pub use store::{AppointmentStore, InMemoryStore, ProviderDirectory};
