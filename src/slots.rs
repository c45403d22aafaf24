/// Bookable dates and start times for a new booking.
///
/// `SlotFinder` combines per-provider availability with the service
/// duration, the slot grid and business-wide closures (holidays, minimum
/// notice). It reads schedules through [`ScheduleSource`], which every store
/// implementing both storage traits provides.

use chrono::{Days, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::availability::{AvailabilityCalculator, DayAvailability};
use crate::config::SlotConfig;
use crate::conflict::{CheckScope, ConflictContext, ConflictDetector, ProviderDay};
use crate::error::SchedulingError;
use crate::models::{
    hhmm, hours_for_date, Appointment, Candidate, Provider, ProviderKind, ProviderRef, WorkingHours,
};
use crate::store::{AppointmentStore, ProviderDirectory};
use crate::time_grid::{minutes_of, snap_up, time_from_minutes};

/// Read access to provider schedules.
pub trait ScheduleSource {
    fn providers(&self) -> Result<Vec<Provider>, SchedulingError>;

    fn weekly_hours(&self, provider: ProviderRef) -> Result<Vec<WorkingHours>, SchedulingError>;

    fn day_appointments(
        &self,
        provider: ProviderRef,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, SchedulingError>;
}

impl<T> ScheduleSource for T
where
    T: AppointmentStore + ProviderDirectory + ?Sized,
{
    fn providers(&self) -> Result<Vec<Provider>, SchedulingError> {
        Ok(ProviderDirectory::providers(self)?)
    }

    fn weekly_hours(&self, provider: ProviderRef) -> Result<Vec<WorkingHours>, SchedulingError> {
        Ok(self.working_hours(provider)?)
    }

    fn day_appointments(
        &self,
        provider: ProviderRef,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        Ok(self.provider_appointments(provider, date)?)
    }
}

/// What is being booked and with whom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotQuery {
    pub duration: i64,
    pub employee_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub exclude_appointment_id: Option<Uuid>,
}

impl SlotQuery {
    pub fn new(duration: i64) -> Self {
        SlotQuery {
            duration,
            employee_id: None,
            doctor_id: None,
            exclude_appointment_id: None,
        }
    }

    fn providers(&self) -> Vec<ProviderRef> {
        self.employee_id
            .map(ProviderRef::employee)
            .into_iter()
            .chain(self.doctor_id.map(ProviderRef::doctor))
            .collect()
    }
}

/// A bookable start time. One entry per qualifying provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    #[serde(with = "hhmm")]
    pub time: NaiveTime,
    pub employee_id: Option<Uuid>,
    pub employee_name: Option<String>,
    pub doctor_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct SlotFinder {
    calculator: AvailabilityCalculator,
    detector: ConflictDetector,
    config: SlotConfig,
}

impl SlotFinder {
    pub fn new(calculator: AvailabilityCalculator, config: SlotConfig) -> Self {
        SlotFinder {
            calculator,
            detector: ConflictDetector::new(calculator),
            config,
        }
    }

    /// Dates within the horizon, starting `now`'s date, on which the booking
    /// could happen.
    ///
    /// With providers given, each of them needs a gap long enough for the
    /// service (after `now` plus notice on the first day). Without, the date
    /// only needs to be a day some provider works.
    pub fn available_dates<S: ScheduleSource + ?Sized>(
        &self,
        source: &S,
        query: &SlotQuery,
        now: NaiveDateTime,
    ) -> Result<Vec<NaiveDate>, SchedulingError> {
        let today = now.date();
        let required = query.providers();

        let consulted: Vec<ProviderRef> = if required.is_empty() {
            source.providers()?.into_iter().map(|p| p.reference).collect()
        } else {
            required.clone()
        };
        let mut weeks: Vec<(ProviderRef, Vec<WorkingHours>)> = Vec::with_capacity(consulted.len());
        for provider in consulted {
            weeks.push((provider, source.weekly_hours(provider)?));
        }

        let mut dates = Vec::new();
        for offset in 0..self.config.horizon_days {
            let Some(date) = today.checked_add_days(Days::new(u64::from(offset))) else {
                break;
            };
            if self.config.is_holiday(date) {
                continue;
            }

            let open = if required.is_empty() {
                weeks.iter().any(|(_, week)| {
                    hours_for_date(week, date).is_some_and(|h| h.is_available)
                })
            } else {
                let from = self.earliest_start(date, now);
                let mut all_free = true;
                for (provider, week) in &weeks {
                    let day = provider_day(source, *provider, week, date)?;
                    if self.free_busy(&day, query).earliest_fit(from, query.duration).is_none() {
                        all_free = false;
                        break;
                    }
                }
                all_free
            };

            if open {
                dates.push(date);
            }
        }

        debug!(count = dates.len(), duration = query.duration, "Available dates computed");
        Ok(dates)
    }

    /// Start times on `date` at which the booking fits.
    ///
    /// Without providers in the query, every employee is tried and each one
    /// that qualifies yields its own entries.
    pub fn available_slots<S: ScheduleSource + ?Sized>(
        &self,
        source: &S,
        date: NaiveDate,
        query: &SlotQuery,
        now: NaiveDateTime,
    ) -> Result<Vec<Slot>, SchedulingError> {
        if self.config.is_holiday(date) || date < now.date() {
            return Ok(Vec::new());
        }

        let mut slots = Vec::new();
        if query.employee_id.is_some() || query.doctor_id.is_some() {
            let names = source.providers()?;
            let employee_name = query.employee_id.and_then(|id| {
                names
                    .iter()
                    .find(|p| p.reference == ProviderRef::employee(id))
                    .map(|p| p.name.clone())
            });
            for time in self.slot_times(source, date, query, now)? {
                slots.push(Slot {
                    time,
                    employee_id: query.employee_id,
                    employee_name: employee_name.clone(),
                    doctor_id: query.doctor_id,
                });
            }
        } else {
            for provider in source.providers()? {
                if provider.reference.kind != ProviderKind::Employee {
                    continue;
                }
                let scoped = SlotQuery {
                    employee_id: Some(provider.reference.id),
                    ..*query
                };
                for time in self.slot_times(source, date, &scoped, now)? {
                    slots.push(Slot {
                        time,
                        employee_id: Some(provider.reference.id),
                        employee_name: Some(provider.name.clone()),
                        doctor_id: None,
                    });
                }
            }
            slots.sort_by(|a, b| a.time.cmp(&b.time).then(a.employee_name.cmp(&b.employee_name)));
        }

        Ok(slots)
    }

    /// Grid-aligned start times where every provider in `query` is free.
    fn slot_times<S: ScheduleSource + ?Sized>(
        &self,
        source: &S,
        date: NaiveDate,
        query: &SlotQuery,
        now: NaiveDateTime,
    ) -> Result<Vec<NaiveTime>, SchedulingError> {
        let mut days = Vec::new();
        for provider in query.providers() {
            let week = source.weekly_hours(provider)?;
            let day = provider_day(source, provider, &week, date)?;
            let availability = self.free_busy(&day, query);
            let Some(window) = availability.window() else {
                return Ok(Vec::new());
            };
            days.push((day, availability, window));
        }

        let Some(window_start) = days.iter().map(|(_, _, w)| w.0).max() else {
            return Ok(Vec::new());
        };
        let window_end = days.iter().map(|(_, _, w)| w.1).min().unwrap_or(window_start);

        let mut context = ConflictContext::default();
        for (day, _, _) in &days {
            match day.provider.kind {
                ProviderKind::Employee => context.employee = Some(day.clone()),
                ProviderKind::Doctor => context.doctor = Some(day.clone()),
            }
        }

        let step = self.config.granularity_minutes;
        let earliest = self.earliest_start(date, now);
        let mut start = snap_up(window_start.max(earliest), step);
        let mut times = Vec::new();

        while start + query.duration <= window_end {
            let end = start + query.duration;
            let fits = days.iter().all(|(_, availability, _)| availability.fits(start, end));
            if fits {
                if let Some(time) = time_from_minutes(start) {
                    let candidate = Candidate {
                        employee_id: query.employee_id,
                        doctor_id: query.doctor_id,
                        client_id: None,
                        date,
                        time,
                        duration: query.duration,
                        exclude_appointment_id: query.exclude_appointment_id,
                    };
                    if self
                        .detector
                        .check(&candidate, &context, CheckScope::OverlapOnly)
                        .is_clear()
                    {
                        times.push(time);
                    }
                }
            }
            start += step;
        }

        Ok(times)
    }

    fn free_busy(&self, day: &ProviderDay, query: &SlotQuery) -> DayAvailability {
        self.calculator.compute(
            day.hours.as_ref(),
            &day.appointments,
            query.exclude_appointment_id,
        )
    }

    /// First minute a booking may start on `date`.
    fn earliest_start(&self, date: NaiveDate, now: NaiveDateTime) -> i64 {
        if date == now.date() {
            minutes_of(now.time()) + self.config.min_notice_minutes
        } else {
            0
        }
    }
}

/// One read of the provider's bookings on `date`, shared by the free/busy
/// sweep and the conflict check.
fn provider_day<S: ScheduleSource + ?Sized>(
    source: &S,
    provider: ProviderRef,
    week: &[WorkingHours],
    date: NaiveDate,
) -> Result<ProviderDay, SchedulingError> {
    Ok(ProviderDay {
        provider,
        hours: hours_for_date(week, date).cloned(),
        appointments: source.day_appointments(provider, date)?,
    })
}
