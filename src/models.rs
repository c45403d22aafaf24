/// Data models for the appointment scheduling core.
///
/// This module defines the core data structures used throughout the system:
/// - AppointmentStatus: lifecycle states of a booking
/// - ProviderRef / Provider: employees and doctors who take bookings
/// - WorkingHours: a provider's weekly working window
/// - Service: bookable service with its default duration and price
/// - Appointment: a booking in the ledger
/// - Candidate / BookingRequest: a proposed booking awaiting a conflict check

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::ValidationError;
use crate::time_grid::{self, minutes_of};

/// Lifecycle status of an appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Waiting,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 7] = [
        AppointmentStatus::Pending,
        AppointmentStatus::Confirmed,
        AppointmentStatus::Waiting,
        AppointmentStatus::InProgress,
        AppointmentStatus::Completed,
        AppointmentStatus::Cancelled,
        AppointmentStatus::NoShow,
    ];

    /// Convert a string to an AppointmentStatus value.
    pub fn from_string(value: &str) -> Result<Self, String> {
        let value = value.trim().to_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|status| status.name() == value)
            .ok_or_else(|| {
                format!(
                    "Invalid status: '{}'. Must be one of: pending, confirmed, waiting, \
                     in-progress, completed, cancelled, no-show",
                    value
                )
            })
    }

    pub fn name(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Waiting => "waiting",
            AppointmentStatus::InProgress => "in-progress",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no-show",
        }
    }

    /// Whether an appointment in this status occupies its slot.
    ///
    /// Cancelled and no-show bookings free the slot and are invisible to
    /// conflict checks and availability.
    pub fn occupies_slot(&self) -> bool {
        !matches!(self, AppointmentStatus::Cancelled | AppointmentStatus::NoShow)
    }

    /// Whether the booking may no longer be moved or resized.
    pub fn is_schedule_locked(&self) -> bool {
        matches!(self, AppointmentStatus::Completed | AppointmentStatus::Cancelled)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Employee,
    Doctor,
}

impl ProviderKind {
    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::Employee => "employee",
            ProviderKind::Doctor => "doctor",
        }
    }
}

/// Identifies one employee or doctor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProviderRef {
    pub kind: ProviderKind,
    pub id: Uuid,
}

impl ProviderRef {
    pub fn employee(id: Uuid) -> Self {
        ProviderRef {
            kind: ProviderKind::Employee,
            id,
        }
    }

    pub fn doctor(id: Uuid) -> Self {
        ProviderRef {
            kind: ProviderKind::Doctor,
            id,
        }
    }
}

impl fmt::Display for ProviderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.name(), self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    #[serde(flatten)]
    pub reference: ProviderRef,
    pub name: String,
}

/// One day of a provider's weekly schedule.
///
/// `day_of_week` counts from Sunday (0) to Saturday (6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkingHours {
    pub day_of_week: u8,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub is_available: bool,
}

impl WorkingHours {
    pub fn new(
        day_of_week: u8,
        start_time: NaiveTime,
        end_time: NaiveTime,
        is_available: bool,
    ) -> Result<Self, String> {
        if day_of_week > 6 {
            return Err(format!("Invalid day of week: {}", day_of_week));
        }
        if is_available && end_time <= start_time {
            return Err("End time must be after start time".to_string());
        }

        Ok(WorkingHours {
            day_of_week,
            start_time,
            end_time,
            is_available,
        })
    }

    /// Working window as `(start, end)` minutes, `None` on a day off.
    pub fn window(&self) -> Option<(i64, i64)> {
        self.is_available
            .then(|| (minutes_of(self.start_time), minutes_of(self.end_time)))
    }
}

/// Day-of-week index used by [`WorkingHours`].
pub fn weekday_index(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

/// Pick the entry for `date` out of a provider's weekly schedule.
pub fn hours_for_date(week: &[WorkingHours], date: NaiveDate) -> Option<&WorkingHours> {
    let day = weekday_index(date);
    week.iter().find(|h| h.day_of_week == day)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Uuid,
    pub name: String,
    pub duration: i64,
    pub price_cents: i64,
}

/// A booking in the ledger.
///
/// `duration` and `price_cents` are copied from the service when booked and
/// are never recomputed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: Uuid,
    pub group_id: Option<Uuid>,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub time: NaiveTime,
    pub duration: i64,
    pub client_id: Option<Uuid>,
    pub employee_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub status: AppointmentStatus,
    pub service_id: Uuid,
    pub service_name: String,
    pub price_cents: i64,
    pub created_at: NaiveDateTime,
}

impl Appointment {
    /// Materialise a draft into a ledger entry with a fresh id.
    pub fn from_draft(draft: AppointmentDraft, created_at: NaiveDateTime) -> Self {
        Appointment {
            id: Uuid::new_v4(),
            group_id: draft.group_id,
            date: draft.date,
            time: draft.time,
            duration: draft.duration,
            client_id: draft.client_id,
            employee_id: draft.employee_id,
            doctor_id: draft.doctor_id,
            status: draft.status,
            service_id: draft.service_id,
            service_name: draft.service_name,
            price_cents: draft.price_cents,
            created_at,
        }
    }

    pub fn start_minute(&self) -> i64 {
        minutes_of(self.time)
    }

    pub fn end_minute(&self) -> i64 {
        self.start_minute() + self.duration
    }

    pub fn occupies_slot(&self) -> bool {
        self.status.occupies_slot()
    }

    /// Whether this booking is assigned to `provider`.
    pub fn is_with(&self, provider: ProviderRef) -> bool {
        let assigned = match provider.kind {
            ProviderKind::Employee => self.employee_id,
            ProviderKind::Doctor => self.doctor_id,
        };
        assigned == Some(provider.id)
    }

    pub fn providers(&self) -> Vec<ProviderRef> {
        self.employee_id
            .map(ProviderRef::employee)
            .into_iter()
            .chain(self.doctor_id.map(ProviderRef::doctor))
            .collect()
    }

    pub fn overlaps(&self, start: i64, end: i64) -> bool {
        time_grid::intervals_overlap(self.start_minute(), self.end_minute(), start, end)
    }
}

/// Everything needed to create an appointment, before it has an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentDraft {
    pub group_id: Option<Uuid>,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub time: NaiveTime,
    pub duration: i64,
    pub client_id: Option<Uuid>,
    pub employee_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub status: AppointmentStatus,
    pub service_id: Uuid,
    pub service_name: String,
    pub price_cents: i64,
}

impl AppointmentDraft {
    /// Draft a booking of `service`, copying its duration and price.
    pub fn for_service(service: &Service, date: NaiveDate, time: NaiveTime) -> Self {
        AppointmentDraft {
            group_id: None,
            date,
            time,
            duration: service.duration,
            client_id: None,
            employee_id: None,
            doctor_id: None,
            status: AppointmentStatus::Pending,
            service_id: service.id,
            service_name: service.name.clone(),
            price_cents: service.price_cents,
        }
    }

    pub fn with_employee(mut self, employee_id: Uuid) -> Self {
        self.employee_id = Some(employee_id);
        self
    }

    pub fn with_doctor(mut self, doctor_id: Uuid) -> Self {
        self.doctor_id = Some(doctor_id);
        self
    }

    pub fn with_client(mut self, client_id: Uuid) -> Self {
        self.client_id = Some(client_id);
        self
    }

    pub fn with_status(mut self, status: AppointmentStatus) -> Self {
        self.status = status;
        self
    }

    pub fn candidate(&self) -> Result<Candidate, ValidationError> {
        Candidate::new(self.date, self.time, self.duration).map(|c| Candidate {
            employee_id: self.employee_id,
            doctor_id: self.doctor_id,
            client_id: self.client_id,
            ..c
        })
    }
}

/// Partial update applied by `UpdateAppointment`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentPatch {
    pub date: Option<NaiveDate>,
    #[serde(default, with = "hhmm::option")]
    pub time: Option<NaiveTime>,
    pub duration: Option<i64>,
    pub client_id: Option<Uuid>,
    pub employee_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
}

impl AppointmentPatch {
    /// Whether the patch changes when or with whom the appointment happens.
    pub fn touches_schedule(&self) -> bool {
        self.date.is_some()
            || self.time.is_some()
            || self.duration.is_some()
            || self.employee_id.is_some()
            || self.doctor_id.is_some()
            || self.client_id.is_some()
    }

    pub fn apply_to(&self, appointment: &mut Appointment) {
        if let Some(date) = self.date {
            appointment.date = date;
        }
        if let Some(time) = self.time {
            appointment.time = time;
        }
        if let Some(duration) = self.duration {
            appointment.duration = duration;
        }
        if let Some(client_id) = self.client_id {
            appointment.client_id = Some(client_id);
        }
        if let Some(employee_id) = self.employee_id {
            appointment.employee_id = Some(employee_id);
        }
        if let Some(doctor_id) = self.doctor_id {
            appointment.doctor_id = Some(doctor_id);
        }
        if let Some(status) = self.status {
            appointment.status = status;
        }
    }
}

/// A proposed booking to check for conflicts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub employee_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub client_id: Option<Uuid>,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub time: NaiveTime,
    pub duration: i64,
    pub exclude_appointment_id: Option<Uuid>,
}

impl Candidate {
    /// Create a candidate with validation.
    pub fn new(date: NaiveDate, time: NaiveTime, duration: i64) -> Result<Self, ValidationError> {
        if duration <= 0 {
            return Err(ValidationError::NonPositiveDuration(duration));
        }

        Ok(Candidate {
            employee_id: None,
            doctor_id: None,
            client_id: None,
            date,
            time,
            duration,
            exclude_appointment_id: None,
        })
    }

    /// Candidate describing an existing appointment at its current slot,
    /// excluding itself from overlap checks.
    pub fn for_appointment(appointment: &Appointment) -> Self {
        Candidate {
            employee_id: appointment.employee_id,
            doctor_id: appointment.doctor_id,
            client_id: appointment.client_id,
            date: appointment.date,
            time: appointment.time,
            duration: appointment.duration,
            exclude_appointment_id: Some(appointment.id),
        }
    }

    pub fn with_employee(mut self, employee_id: Uuid) -> Self {
        self.employee_id = Some(employee_id);
        self
    }

    pub fn with_doctor(mut self, doctor_id: Uuid) -> Self {
        self.doctor_id = Some(doctor_id);
        self
    }

    pub fn with_client(mut self, client_id: Uuid) -> Self {
        self.client_id = Some(client_id);
        self
    }

    pub fn excluding(mut self, appointment_id: Uuid) -> Self {
        self.exclude_appointment_id = Some(appointment_id);
        self
    }

    pub fn start_minute(&self) -> i64 {
        minutes_of(self.time)
    }

    pub fn end_minute(&self) -> i64 {
        self.start_minute() + self.duration
    }

    pub fn providers(&self) -> Vec<ProviderRef> {
        self.employee_id
            .map(ProviderRef::employee)
            .into_iter()
            .chain(self.doctor_id.map(ProviderRef::doctor))
            .collect()
    }
}

/// Raw booking form input. Converted to a [`Candidate`] before any check runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    pub employee_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub client_id: Option<Uuid>,
    pub date: String,
    pub time: String,
    pub duration: i64,
    pub exclude_appointment_id: Option<Uuid>,
}

impl BookingRequest {
    pub fn to_candidate(&self) -> Result<Candidate, ValidationError> {
        if self.date.trim().is_empty() {
            return Err(ValidationError::MissingField("date"));
        }
        if self.time.trim().is_empty() {
            return Err(ValidationError::MissingField("time"));
        }
        let date = time_grid::parse_date("date", &self.date)?;
        let time = time_grid::parse_time("time", &self.time)?;

        let mut candidate = Candidate::new(date, time, self.duration)?;
        candidate.employee_id = self.employee_id;
        candidate.doctor_id = self.doctor_id;
        candidate.client_id = self.client_id;
        candidate.exclude_appointment_id = self.exclude_appointment_id;
        Ok(candidate)
    }
}

/// Serde adapter keeping times at minute precision as `HH:MM`.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::time_grid::parse_time;

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_time("time", &raw).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            time: &Option<NaiveTime>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match time {
                Some(time) => super::serialize(time, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<NaiveTime>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|raw| parse_time("time", &raw).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}
