/// Conflict detection for candidate bookings.
///
/// The detector is pure: callers hand it a snapshot of the relevant ledger
/// slice (see [`ConflictContext`]) and get back a [`ConflictReport`]. A taken
/// slot is a normal answer, never an error. Whether a report blocks a write
/// is decided by the caller against its [`EnforcementPolicy`].

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::availability::{AvailabilityCalculator, DayAvailability};
use crate::config::{Enforcement, EnforcementPolicy};
use crate::models::{hhmm, Appointment, Candidate, ProviderKind, ProviderRef, WorkingHours};
use crate::time_grid::{time_from_minutes, within};

/// One provider's schedule for the candidate's date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderDay {
    pub provider: ProviderRef,
    pub hours: Option<WorkingHours>,
    pub appointments: Vec<Appointment>,
}

/// The ledger slice a check runs against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConflictContext {
    pub employee: Option<ProviderDay>,
    pub doctor: Option<ProviderDay>,
    pub client_appointments: Vec<Appointment>,
}

/// Which rules to evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckScope {
    /// Provider overlap, working hours and client overlap.
    Full,
    /// Provider overlap only. Used while dragging inside one column.
    OverlapOnly,
}

/// The booking a candidate collides with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlapDetail {
    pub appointment_id: Uuid,
    #[serde(with = "hhmm")]
    pub time: NaiveTime,
    pub duration: i64,
    pub service_name: String,
    pub client_id: Option<Uuid>,
    #[serde(default, with = "hhmm::option")]
    pub next_available_slot: Option<NaiveTime>,
}

/// Working window the candidate falls outside of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoursDetail {
    pub provider_id: Uuid,
    /// `None` when the provider does not work that day at all.
    pub working_window: Option<WorkingWindow>,
    #[serde(default, with = "hhmm::option")]
    pub next_available_slot: Option<NaiveTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingWindow {
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Conflict {
    EmployeeOverlap(OverlapDetail),
    DoctorOverlap(OverlapDetail),
    ClientOverlap(OverlapDetail),
    OutsideEmployeeHours(HoursDetail),
    OutsideDoctorHours(HoursDetail),
}

impl Conflict {
    pub fn is_provider_overlap(&self) -> bool {
        matches!(self, Conflict::EmployeeOverlap(_) | Conflict::DoctorOverlap(_))
    }

    pub fn is_hours_violation(&self) -> bool {
        matches!(
            self,
            Conflict::OutsideEmployeeHours(_) | Conflict::OutsideDoctorHours(_)
        )
    }

    /// Provider overlap always blocks; the other kinds follow the policy.
    pub fn enforcement(&self, policy: &EnforcementPolicy) -> Enforcement {
        match self {
            Conflict::EmployeeOverlap(_) | Conflict::DoctorOverlap(_) => Enforcement::Block,
            Conflict::ClientOverlap(_) => policy.client_overlap,
            Conflict::OutsideEmployeeHours(_) | Conflict::OutsideDoctorHours(_) => {
                policy.outside_hours
            }
        }
    }

    pub fn next_available_slot(&self) -> Option<NaiveTime> {
        match self {
            Conflict::EmployeeOverlap(d)
            | Conflict::DoctorOverlap(d)
            | Conflict::ClientOverlap(d) => d.next_available_slot,
            Conflict::OutsideEmployeeHours(d) | Conflict::OutsideDoctorHours(d) => {
                d.next_available_slot
            }
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Conflict::EmployeeOverlap(_) => "employee_overlap",
            Conflict::DoctorOverlap(_) => "doctor_overlap",
            Conflict::ClientOverlap(_) => "client_overlap",
            Conflict::OutsideEmployeeHours(_) => "outside_employee_hours",
            Conflict::OutsideDoctorHours(_) => "outside_doctor_hours",
        }
    }
}

/// Every rule a candidate violates. Empty means the slot is clear.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictReport {
    pub conflicts: Vec<Conflict>,
}

impl ConflictReport {
    pub fn is_clear(&self) -> bool {
        self.conflicts.is_empty()
    }

    pub fn has_provider_overlap(&self) -> bool {
        self.conflicts.iter().any(Conflict::is_provider_overlap)
    }

    pub fn is_blocking(&self, policy: &EnforcementPolicy) -> bool {
        self.conflicts
            .iter()
            .any(|c| c.enforcement(policy) == Enforcement::Block)
    }

    /// Conflicts that only warrant a warning under `policy`.
    pub fn warnings<'a>(
        &'a self,
        policy: &'a EnforcementPolicy,
    ) -> impl Iterator<Item = &'a Conflict> {
        self.conflicts
            .iter()
            .filter(move |c| c.enforcement(policy) == Enforcement::Warn)
    }

    /// Latest of the per-conflict suggestions. No earlier suggestion satisfies
    /// every rule that reported one.
    pub fn next_available_slot(&self) -> Option<NaiveTime> {
        self.conflicts.iter().filter_map(Conflict::next_available_slot).max()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictDetector {
    calculator: AvailabilityCalculator,
}

impl ConflictDetector {
    pub fn new(calculator: AvailabilityCalculator) -> Self {
        ConflictDetector { calculator }
    }

    /// Evaluate every rule in `scope` independently and collect the results.
    pub fn check(
        &self,
        candidate: &Candidate,
        context: &ConflictContext,
        scope: CheckScope,
    ) -> ConflictReport {
        let mut conflicts = Vec::new();

        let days = [
            (candidate.employee_id, context.employee.as_ref()),
            (candidate.doctor_id, context.doctor.as_ref()),
        ];
        for (provider_id, day) in days {
            let Some(day) = day.filter(|d| Some(d.provider.id) == provider_id) else {
                continue;
            };
            let availability = self.calculator.compute(
                day.hours.as_ref(),
                &day.appointments,
                candidate.exclude_appointment_id,
            );

            if let Some(overlap) = self.provider_overlap(candidate, day, &availability) {
                conflicts.push(match day.provider.kind {
                    ProviderKind::Employee => Conflict::EmployeeOverlap(overlap),
                    ProviderKind::Doctor => Conflict::DoctorOverlap(overlap),
                });
            }

            if scope == CheckScope::Full {
                if let Some(hours) = self.hours_violation(candidate, day, &availability) {
                    conflicts.push(match day.provider.kind {
                        ProviderKind::Employee => Conflict::OutsideEmployeeHours(hours),
                        ProviderKind::Doctor => Conflict::OutsideDoctorHours(hours),
                    });
                }
            }
        }

        if scope == CheckScope::Full {
            if let Some(overlap) = self.client_overlap(candidate, &context.client_appointments) {
                conflicts.push(Conflict::ClientOverlap(overlap));
            }
        }

        if !conflicts.is_empty() {
            debug!(
                date = %candidate.date,
                time = %candidate.time.format("%H:%M"),
                duration = candidate.duration,
                conflicts = ?conflicts.iter().map(Conflict::type_name).collect::<Vec<_>>(),
                "Candidate has conflicts"
            );
        }

        ConflictReport { conflicts }
    }

    fn provider_overlap(
        &self,
        candidate: &Candidate,
        day: &ProviderDay,
        availability: &DayAvailability,
    ) -> Option<OverlapDetail> {
        let hit = first_overlapping(candidate, day.appointments.iter())?;
        let next = availability
            .earliest_fit(candidate.start_minute(), candidate.duration)
            .and_then(time_from_minutes);
        Some(overlap_detail(hit, next))
    }

    fn hours_violation(
        &self,
        candidate: &Candidate,
        day: &ProviderDay,
        availability: &DayAvailability,
    ) -> Option<HoursDetail> {
        let window = day.hours.as_ref().and_then(WorkingHours::window);
        if let Some((start, end)) = window {
            if within(candidate.start_minute(), candidate.end_minute(), start, end) {
                return None;
            }
        }

        Some(HoursDetail {
            provider_id: day.provider.id,
            working_window: day
                .hours
                .as_ref()
                .filter(|h| h.is_available)
                .map(|h| WorkingWindow {
                    start: h.start_time,
                    end: h.end_time,
                }),
            next_available_slot: availability
                .earliest_fit(candidate.start_minute(), candidate.duration)
                .and_then(time_from_minutes),
        })
    }

    /// Same client booked elsewhere at the same time. Bookings sharing the
    /// candidate's employee or doctor are left to the provider rules.
    fn client_overlap(
        &self,
        candidate: &Candidate,
        client_appointments: &[Appointment],
    ) -> Option<OverlapDetail> {
        let client_id = candidate.client_id?;
        let others = client_appointments.iter().filter(|a| {
            a.client_id == Some(client_id)
                && !shares_provider(candidate, a)
        });
        first_overlapping(candidate, others).map(|hit| overlap_detail(hit, None))
    }
}

fn shares_provider(candidate: &Candidate, appointment: &Appointment) -> bool {
    (candidate.employee_id.is_some() && candidate.employee_id == appointment.employee_id)
        || (candidate.doctor_id.is_some() && candidate.doctor_id == appointment.doctor_id)
}

/// Earliest occupying booking on the candidate's date overlapping it.
fn first_overlapping<'a>(
    candidate: &Candidate,
    appointments: impl Iterator<Item = &'a Appointment>,
) -> Option<&'a Appointment> {
    appointments
        .filter(|a| {
            a.occupies_slot()
                && a.date == candidate.date
                && Some(a.id) != candidate.exclude_appointment_id
                && a.overlaps(candidate.start_minute(), candidate.end_minute())
        })
        .min_by_key(|a| (a.start_minute(), a.id))
}

fn overlap_detail(hit: &Appointment, next_available_slot: Option<NaiveTime>) -> OverlapDetail {
    OverlapDetail {
        appointment_id: hit.id,
        time: hit.time,
        duration: hit.duration,
        service_name: hit.service_name.clone(),
        client_id: hit.client_id,
        next_available_slot,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AppointmentDraft, AppointmentStatus, Service};
    use chrono::NaiveDate;

    fn date() -> NaiveDate {
        // Monday
        NaiveDate::from_ymd_opt(2024, 1, 8).unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn service(duration: i64) -> Service {
        Service {
            id: Uuid::new_v4(),
            name: "Haircut".to_string(),
            duration,
            price_cents: 3000,
        }
    }

    fn booking(
        employee: Uuid,
        client: Option<Uuid>,
        time: NaiveTime,
        duration: i64,
    ) -> Appointment {
        let mut draft = AppointmentDraft::for_service(&service(duration), date(), time)
            .with_employee(employee)
            .with_status(AppointmentStatus::Confirmed);
        draft.client_id = client;
        Appointment::from_draft(draft, date().and_hms_opt(7, 0, 0).unwrap())
    }

    fn monday_hours() -> WorkingHours {
        WorkingHours::new(1, t(9, 0), t(17, 0), true).unwrap()
    }

    fn employee_context(employee: Uuid, appointments: Vec<Appointment>) -> ConflictContext {
        ConflictContext {
            employee: Some(ProviderDay {
                provider: ProviderRef::employee(employee),
                hours: Some(monday_hours()),
                appointments,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn identical_candidate_overlaps_existing_booking() {
        let employee = Uuid::new_v4();
        let existing = booking(employee, None, t(10, 0), 60);
        let context = employee_context(employee, vec![existing.clone()]);
        let candidate = Candidate::for_appointment(&existing);
        let candidate = Candidate {
            exclude_appointment_id: None,
            ..candidate
        };

        let report = ConflictDetector::default().check(&candidate, &context, CheckScope::Full);
        assert_eq!(report.conflicts.len(), 1);
        match &report.conflicts[0] {
            Conflict::EmployeeOverlap(detail) => {
                assert_eq!(detail.appointment_id, existing.id);
                assert_eq!(detail.service_name, "Haircut");
                assert_eq!(detail.next_available_slot, Some(t(11, 0)));
            }
            other => panic!("unexpected conflict {other:?}"),
        }
    }

    #[test]
    fn excluding_self_clears_the_overlap() {
        let employee = Uuid::new_v4();
        let existing = booking(employee, None, t(10, 0), 60);
        let context = employee_context(employee, vec![existing.clone()]);
        let candidate = Candidate::for_appointment(&existing);

        let report = ConflictDetector::default().check(&candidate, &context, CheckScope::Full);
        assert!(report.is_clear(), "{report:?}");
    }

    #[test]
    fn back_to_back_and_cancelled_bookings_do_not_conflict() {
        let employee = Uuid::new_v4();
        let before = booking(employee, None, t(9, 0), 60);
        let mut cancelled = booking(employee, None, t(10, 0), 60);
        cancelled.status = AppointmentStatus::Cancelled;
        let mut no_show = booking(employee, None, t(10, 30), 30);
        no_show.status = AppointmentStatus::NoShow;
        let context = employee_context(employee, vec![before, cancelled, no_show]);

        let candidate = Candidate::new(date(), t(10, 0), 60).unwrap().with_employee(employee);
        let report = ConflictDetector::default().check(&candidate, &context, CheckScope::Full);
        assert!(report.is_clear(), "{report:?}");
    }

    #[test]
    fn reports_first_overlap_by_time() {
        let employee = Uuid::new_v4();
        let late = booking(employee, None, t(11, 0), 30);
        let early = booking(employee, None, t(10, 0), 30);
        let context = employee_context(employee, vec![late, early.clone()]);

        let candidate = Candidate::new(date(), t(9, 45), 90).unwrap().with_employee(employee);
        let report = ConflictDetector::default().check(&candidate, &context, CheckScope::Full);
        let Conflict::EmployeeOverlap(detail) = &report.conflicts[0] else {
            panic!("expected employee overlap");
        };
        assert_eq!(detail.appointment_id, early.id);
        assert_eq!(detail.next_available_slot, Some(t(11, 30)));
    }

    #[test]
    fn outside_hours_carries_the_real_window() {
        let employee = Uuid::new_v4();
        let context = employee_context(employee, vec![]);
        let candidate = Candidate::new(date(), t(16, 30), 60).unwrap().with_employee(employee);

        let report = ConflictDetector::default().check(&candidate, &context, CheckScope::Full);
        assert_eq!(report.conflicts.len(), 1);
        let Conflict::OutsideEmployeeHours(detail) = &report.conflicts[0] else {
            panic!("expected hours violation");
        };
        assert_eq!(
            detail.working_window,
            Some(WorkingWindow {
                start: t(9, 0),
                end: t(17, 0)
            })
        );
        assert_eq!(detail.next_available_slot, None);

        let overlap_only =
            ConflictDetector::default().check(&candidate, &context, CheckScope::OverlapOnly);
        assert!(overlap_only.is_clear());
    }

    #[test]
    fn day_off_is_always_an_hours_violation() {
        let doctor = Uuid::new_v4();
        let context = ConflictContext {
            doctor: Some(ProviderDay {
                provider: ProviderRef::doctor(doctor),
                hours: Some(WorkingHours::new(1, t(9, 0), t(17, 0), false).unwrap()),
                appointments: vec![],
            }),
            ..Default::default()
        };
        let candidate = Candidate::new(date(), t(10, 0), 30).unwrap().with_doctor(doctor);

        let report = ConflictDetector::default().check(&candidate, &context, CheckScope::Full);
        assert!(matches!(
            &report.conflicts[..],
            [Conflict::OutsideDoctorHours(HoursDetail {
                working_window: None,
                ..
            })]
        ));
    }

    #[test]
    fn violations_accumulate_across_rules() {
        let employee = Uuid::new_v4();
        let doctor = Uuid::new_v4();
        let client = Uuid::new_v4();

        let doctor_booking = {
            let draft = AppointmentDraft::for_service(&service(60), date(), t(17, 0))
                .with_doctor(doctor)
                .with_status(AppointmentStatus::Confirmed);
            Appointment::from_draft(draft, date().and_hms_opt(7, 0, 0).unwrap())
        };
        let client_elsewhere = booking(Uuid::new_v4(), Some(client), t(17, 0), 30);

        let context = ConflictContext {
            employee: Some(ProviderDay {
                provider: ProviderRef::employee(employee),
                hours: Some(monday_hours()),
                appointments: vec![],
            }),
            doctor: Some(ProviderDay {
                provider: ProviderRef::doctor(doctor),
                hours: Some(WorkingHours::new(1, t(12, 0), t(20, 0), true).unwrap()),
                appointments: vec![doctor_booking],
            }),
            client_appointments: vec![client_elsewhere],
        };
        let candidate = Candidate::new(date(), t(16, 30), 60)
            .unwrap()
            .with_employee(employee)
            .with_doctor(doctor)
            .with_client(client);

        let report = ConflictDetector::default().check(&candidate, &context, CheckScope::Full);
        let kinds: Vec<_> = report.conflicts.iter().map(Conflict::type_name).collect();
        assert_eq!(
            kinds,
            vec!["outside_employee_hours", "doctor_overlap", "client_overlap"]
        );
    }

    #[test]
    fn client_overlap_fires_when_provider_is_free() {
        let employee = Uuid::new_v4();
        let client = Uuid::new_v4();
        let elsewhere = booking(Uuid::new_v4(), Some(client), t(10, 0), 60);
        let mut context = employee_context(employee, vec![]);
        context.client_appointments = vec![elsewhere.clone()];

        let candidate = Candidate::new(date(), t(10, 30), 30)
            .unwrap()
            .with_employee(employee)
            .with_client(client);
        let report = ConflictDetector::default().check(&candidate, &context, CheckScope::Full);
        assert!(matches!(
            &report.conflicts[..],
            [Conflict::ClientOverlap(detail)] if detail.appointment_id == elsewhere.id
        ));

        let policy = EnforcementPolicy {
            client_overlap: Enforcement::Warn,
            ..Default::default()
        };
        assert!(!report.is_blocking(&policy));
        assert_eq!(report.warnings(&policy).count(), 1);
        assert!(report.is_blocking(&EnforcementPolicy::default()));
    }

    #[test]
    fn conflict_serialises_with_type_tag() {
        let report = ConflictReport {
            conflicts: vec![Conflict::OutsideDoctorHours(HoursDetail {
                provider_id: Uuid::nil(),
                working_window: None,
                next_available_slot: Some(t(9, 30)),
            })],
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["conflicts"][0]["type"], "outside_doctor_hours");
        assert_eq!(json["conflicts"][0]["nextAvailableSlot"], "09:30");
    }
}
