/// Today's provider status board: who is free, busy or off right now.

use chrono::{NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::availability::{AvailabilityCalculator, DayAvailability, NextSlot};
use crate::error::Result;
use crate::models::{hhmm, hours_for_date, Appointment, Provider, WorkingHours};
use crate::service::BookingService;
use crate::store::{AppointmentStore, ProviderDirectory};
use crate::time_grid::{minutes_of, time_from_minutes};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderStatus {
    Free,
    Busy,
    Off,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSnapshot {
    pub provider: Provider,
    pub status: ProviderStatus,
    pub current_appointment: Option<Appointment>,
    #[serde(default, with = "hhmm::option")]
    pub next_free_at: Option<NaiveTime>,
    /// Every appointment today, any status, by start time.
    pub appointments: Vec<Appointment>,
}

/// Status of one provider at `now`.
pub fn snapshot_at(
    calculator: &AvailabilityCalculator,
    provider: Provider,
    hours: Option<&WorkingHours>,
    mut appointments: Vec<Appointment>,
    now: NaiveDateTime,
) -> ProviderSnapshot {
    appointments.sort_by_key(|a| (a.time, a.id));
    let minute = minutes_of(now.time());
    let availability = calculator.compute(hours, &appointments, None);

    let current = appointments
        .iter()
        .find(|a| {
            a.occupies_slot()
                && a.date == now.date()
                && a.start_minute() <= minute
                && minute < a.end_minute()
        })
        .cloned();

    let in_hours = availability
        .window()
        .is_some_and(|(start, end)| start <= minute && minute < end);

    let status = match (&availability, in_hours, &current) {
        (DayAvailability::NotWorking, _, _) | (_, false, None) => ProviderStatus::Off,
        (_, _, Some(_)) => ProviderStatus::Busy,
        _ => ProviderStatus::Free,
    };

    let next_free_at = if status == ProviderStatus::Free {
        Some(now.time())
    } else {
        match availability.next_free_slot(minute) {
            NextSlot::Available(interval) => time_from_minutes(interval.start_min),
            NextSlot::NotWorking | NextSlot::FullyBooked => None,
        }
    };

    ProviderSnapshot {
        provider,
        status,
        current_appointment: current,
        next_free_at,
        appointments,
    }
}

impl<S> BookingService<S>
where
    S: AppointmentStore + ProviderDirectory,
{
    /// `GetTodayAvailabilitySnapshot`.
    pub fn today_snapshot(&self) -> Result<Vec<ProviderSnapshot>> {
        let now = self.now();
        let today = now.date();
        let providers = ProviderDirectory::providers(self.store())?;

        let mut snapshots = Vec::with_capacity(providers.len());
        for provider in providers {
            let week = self.provider_working_hours(provider.reference)?;
            let appointments = self.provider_appointments(provider.reference, today)?;
            snapshots.push(snapshot_at(
                self.calculator(),
                provider,
                hours_for_date(&week, today),
                appointments,
                now,
            ));
        }

        debug!(providers = snapshots.len(), %now, "Snapshot computed");
        Ok(snapshots)
    }
}
