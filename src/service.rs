/// Boundary operations of the scheduling core.
///
/// `BookingService` is the one place every booking flow goes through. Reads
/// (conflict checks, available dates and slots) recompute from the current
/// ledger. Writes run the full conflict check again inside a critical
/// section keyed by provider, client and date, so two requests for the same
/// slot cannot both pass the check and both commit.

use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex, PoisonError};

use chrono::{Local, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::availability::{AvailabilityCalculator, DayAvailability};
use crate::config::SchedulingConfig;
use crate::conflict::{
    CheckScope, Conflict, ConflictContext, ConflictDetector, ConflictReport, ProviderDay,
};
use crate::error::{Result, SchedulingError, TransitionError, ValidationError};
use crate::models::{
    hours_for_date, Appointment, AppointmentDraft, AppointmentPatch, AppointmentStatus,
    BookingRequest, Candidate, ProviderKind, ProviderRef, Service, WorkingHours,
};
use crate::recurrence::{
    OccurrenceStatus, RecurrenceGenerator, RecurrenceOutcome, RecurrenceRule,
};
use crate::reschedule::{GestureGeometry, RescheduleCommit, RescheduleEngine};
use crate::slots::{Slot, SlotFinder, SlotQuery};
use crate::status::{StatusChange, StatusMachine, TransitionSource};
use crate::store::{AppointmentStore, ProviderDirectory};

/// Source of "now" in the business's local time.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A clock stuck at one instant, for tests and demos.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

/// Result of an authoritative write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BookingOutcome {
    /// Written. `warnings` holds conflicts the policy lets through.
    Booked {
        appointment: Appointment,
        warnings: Vec<Conflict>,
    },
    /// Nothing written.
    Rejected(ConflictReport),
}

impl BookingOutcome {
    pub fn is_booked(&self) -> bool {
        matches!(self, BookingOutcome::Booked { .. })
    }

    pub fn appointment(&self) -> Option<&Appointment> {
        match self {
            BookingOutcome::Booked { appointment, .. } => Some(appointment),
            BookingOutcome::Rejected(_) => None,
        }
    }

    pub fn report(&self) -> Option<&ConflictReport> {
        match self {
            BookingOutcome::Booked { .. } => None,
            BookingOutcome::Rejected(report) => Some(report),
        }
    }
}

/// Result of `change_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub change: StatusChange,
    pub outcome: BookingOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum LockKey {
    Provider(ProviderRef, NaiveDate),
    Client(Uuid, NaiveDate),
}

fn lock_keys(candidate: &Candidate) -> Vec<LockKey> {
    let mut keys: Vec<LockKey> = candidate
        .providers()
        .into_iter()
        .map(|p| LockKey::Provider(p, candidate.date))
        .collect();
    if let Some(client_id) = candidate.client_id {
        keys.push(LockKey::Client(client_id, candidate.date));
    }
    keys
}

/// Per-key write sections. A writer takes all of its keys at once or waits.
#[derive(Debug, Default)]
struct WriteLocks {
    held: Mutex<HashSet<LockKey>>,
    released: Condvar,
}

impl WriteLocks {
    fn acquire(&self, mut keys: Vec<LockKey>) -> WriteGuard<'_> {
        keys.sort_unstable();
        keys.dedup();

        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        while keys.iter().any(|k| held.contains(k)) {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        held.extend(keys.iter().copied());

        WriteGuard { locks: self, keys }
    }
}

struct WriteGuard<'a> {
    locks: &'a WriteLocks,
    keys: Vec<LockKey>,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        let mut held = self
            .locks
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for key in &self.keys {
            held.remove(key);
        }
        self.locks.released.notify_all();
    }
}

pub struct BookingService<S> {
    store: Arc<S>,
    config: SchedulingConfig,
    calculator: AvailabilityCalculator,
    detector: ConflictDetector,
    status: StatusMachine,
    recurrence: RecurrenceGenerator,
    slots: SlotFinder,
    clock: Arc<dyn Clock>,
    locks: WriteLocks,
}

impl<S> BookingService<S>
where
    S: AppointmentStore + ProviderDirectory,
{
    pub fn new(store: Arc<S>, config: SchedulingConfig) -> Self {
        let calculator = AvailabilityCalculator::new(config.availability.min_gap_minutes);
        BookingService {
            store,
            calculator,
            detector: ConflictDetector::new(calculator),
            status: StatusMachine::new(),
            recurrence: RecurrenceGenerator::new(config.recurrence.max_occurrences),
            slots: SlotFinder::new(calculator, config.slots.clone()),
            clock: Arc::new(SystemClock),
            locks: WriteLocks::default(),
            config,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &SchedulingConfig {
        &self.config
    }

    pub fn calculator(&self) -> &AvailabilityCalculator {
        &self.calculator
    }

    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    /// A gesture engine using this service's grid and detector.
    pub fn gesture_engine(&self) -> RescheduleEngine {
        RescheduleEngine::new(GestureGeometry::from_config(&self.config), self.detector)
    }

    pub fn provider_appointments(
        &self,
        provider: ProviderRef,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>> {
        Ok(self.store.provider_appointments(provider, date)?)
    }

    pub fn provider_working_hours(&self, provider: ProviderRef) -> Result<Vec<WorkingHours>> {
        Ok(self.store.working_hours(provider)?)
    }

    /// Hours and bookings of one provider on one date.
    pub fn provider_day(&self, provider: ProviderRef, date: NaiveDate) -> Result<ProviderDay> {
        let week = self.provider_working_hours(provider)?;
        Ok(ProviderDay {
            provider,
            hours: hours_for_date(&week, date).cloned(),
            appointments: self.provider_appointments(provider, date)?,
        })
    }

    pub fn provider_availability(
        &self,
        provider: ProviderRef,
        date: NaiveDate,
        exclude: Option<Uuid>,
    ) -> Result<DayAvailability> {
        let day = self.provider_day(provider, date)?;
        Ok(self
            .calculator
            .compute(day.hours.as_ref(), &day.appointments, exclude))
    }

    /// The same-column context a drag of `appointment` is checked against.
    pub fn gesture_column(&self, appointment: &Appointment) -> Result<ProviderDay> {
        let provider = appointment
            .providers()
            .into_iter()
            .next()
            .ok_or(SchedulingError::Validation(ValidationError::MissingField("employeeId")))?;
        self.provider_day(provider, appointment.date)
    }

    /// Everything the detector needs for `candidate`, read fresh.
    pub fn conflict_context(&self, candidate: &Candidate) -> Result<ConflictContext> {
        let mut context = ConflictContext::default();
        for provider in candidate.providers() {
            let day = self.provider_day(provider, candidate.date)?;
            match provider.kind {
                ProviderKind::Employee => context.employee = Some(day),
                ProviderKind::Doctor => context.doctor = Some(day),
            }
        }
        if let Some(client_id) = candidate.client_id {
            context.client_appointments =
                self.store.client_appointments(client_id, candidate.date)?;
        }
        Ok(context)
    }

    /// `CheckConflict`: validate the raw request, then run every rule.
    pub fn check_conflict(&self, request: &BookingRequest) -> Result<ConflictReport> {
        let candidate = request.to_candidate()?;
        self.check_candidate(&candidate)
    }

    pub fn check_candidate(&self, candidate: &Candidate) -> Result<ConflictReport> {
        let context = self.conflict_context(candidate)?;
        Ok(self.detector.check(candidate, &context, CheckScope::Full))
    }

    /// `GetAvailableDates`.
    pub fn available_dates(
        &self,
        service_id: Uuid,
        employee_id: Option<Uuid>,
        doctor_id: Option<Uuid>,
        exclude_appointment_id: Option<Uuid>,
    ) -> Result<Vec<NaiveDate>> {
        let query = self.slot_query(service_id, employee_id, doctor_id, exclude_appointment_id)?;
        self.slots.available_dates(&*self.store, &query, self.now())
    }

    /// `GetAvailableSlots`.
    pub fn available_slots(
        &self,
        date: NaiveDate,
        service_id: Uuid,
        employee_id: Option<Uuid>,
        doctor_id: Option<Uuid>,
        exclude_appointment_id: Option<Uuid>,
    ) -> Result<Vec<Slot>> {
        let query = self.slot_query(service_id, employee_id, doctor_id, exclude_appointment_id)?;
        self.slots.available_slots(&*self.store, date, &query, self.now())
    }

    fn service(&self, service_id: Uuid) -> Result<Service> {
        self.store
            .service(service_id)?
            .ok_or(SchedulingError::UnknownService(service_id))
    }

    fn slot_query(
        &self,
        service_id: Uuid,
        employee_id: Option<Uuid>,
        doctor_id: Option<Uuid>,
        exclude_appointment_id: Option<Uuid>,
    ) -> Result<SlotQuery> {
        let service = self.service(service_id)?;
        Ok(SlotQuery {
            duration: service.duration,
            employee_id,
            doctor_id,
            exclude_appointment_id,
        })
    }

    /// `CreateAppointment`, with the authoritative conflict check.
    pub fn create_appointment(&self, draft: AppointmentDraft) -> Result<BookingOutcome> {
        let candidate = draft.candidate()?;
        let _guard = self.locks.acquire(lock_keys(&candidate));

        let mut warnings = Vec::new();
        if draft.status.occupies_slot() {
            let report = self.check_candidate(&candidate)?;
            if report.is_blocking(&self.config.enforcement) {
                info!(
                    date = %candidate.date,
                    time = %candidate.time.format("%H:%M"),
                    conflicts = report.conflicts.len(),
                    "Booking rejected"
                );
                return Ok(BookingOutcome::Rejected(report));
            }
            warnings = report.warnings(&self.config.enforcement).cloned().collect();
        }

        let appointment = Appointment::from_draft(draft, self.now());
        let appointment = self.store.insert(appointment).map_err(|err| {
            warn!(error = %err, date = %candidate.date, "Insert failed after conflict check");
            SchedulingError::from(err)
        })?;

        info!(
            appointment_id = %appointment.id,
            date = %appointment.date,
            time = %appointment.time.format("%H:%M"),
            duration = appointment.duration,
            warnings = warnings.len(),
            "Appointment booked"
        );
        Ok(BookingOutcome::Booked { appointment, warnings })
    }

    /// `UpdateAppointment`. Schedule changes and reactivations are checked
    /// again, excluding the appointment itself. A status in the patch follows
    /// the menu policy; patching to the current status is a no-op.
    pub fn update_appointment(&self, id: Uuid, patch: AppointmentPatch) -> Result<BookingOutcome> {
        let (_, outcome) = self.write_patch(id, patch, None)?;
        Ok(outcome)
    }

    /// Status change from the board or the status menu. The transition is
    /// validated against the status read inside the write section.
    pub fn change_status(
        &self,
        id: Uuid,
        to: AppointmentStatus,
        source: TransitionSource,
    ) -> Result<StatusUpdate> {
        let patch = AppointmentPatch {
            status: Some(to),
            ..AppointmentPatch::default()
        };
        let (change, outcome) = self.write_patch(id, patch, Some(source))?;
        let change = change.ok_or(TransitionError::Unchanged(to))?;
        if change.triggers_checkout && outcome.is_booked() {
            info!(appointment_id = %id, "Appointment completed, checkout due");
        }
        Ok(StatusUpdate { change, outcome })
    }

    /// `source` is `None` for plain patches and names the policy for
    /// explicit status changes.
    fn write_patch(
        &self,
        id: Uuid,
        patch: AppointmentPatch,
        source: Option<TransitionSource>,
    ) -> Result<(Option<StatusChange>, BookingOutcome)> {
        if let Some(duration) = patch.duration {
            if duration <= 0 {
                return Err(ValidationError::NonPositiveDuration(duration).into());
            }
        }

        let before = self.fetch(id)?;
        let mut keys = lock_keys(&Candidate::for_appointment(&before));
        let mut preview = before.clone();
        patch.apply_to(&mut preview);
        keys.extend(lock_keys(&Candidate::for_appointment(&preview)));
        let _guard = self.locks.acquire(keys);

        // Re-read inside the section; the pre-read only picked the keys.
        let current = self.fetch(id)?;
        if patch.touches_schedule() && current.status == AppointmentStatus::Completed {
            return Err(SchedulingError::Immutable(current.status));
        }
        let change = match (patch.status, source) {
            (Some(to), Some(source)) => Some(self.status.transition(current.status, to, source)?),
            (Some(to), None) if to != current.status => {
                Some(self.status.transition(current.status, to, TransitionSource::Menu)?)
            }
            _ => None,
        };

        let mut updated = current.clone();
        patch.apply_to(&mut updated);

        let reactivated = updated.occupies_slot() && !current.occupies_slot();
        let mut warnings = Vec::new();
        if updated.occupies_slot() && (patch.touches_schedule() || reactivated) {
            let candidate = Candidate::for_appointment(&updated);
            let report = self.check_candidate(&candidate)?;
            if report.is_blocking(&self.config.enforcement) {
                info!(
                    appointment_id = %id,
                    conflicts = report.conflicts.len(),
                    "Update rejected"
                );
                return Ok((change, BookingOutcome::Rejected(report)));
            }
            warnings = report.warnings(&self.config.enforcement).cloned().collect();
        }

        let appointment = self.store.update(updated).map_err(|err| {
            warn!(error = %err, appointment_id = %id, "Update failed after conflict check");
            SchedulingError::from(err)
        })?;

        info!(
            appointment_id = %id,
            date = %appointment.date,
            time = %appointment.time.format("%H:%M"),
            status = %appointment.status,
            "Appointment updated"
        );
        Ok((change, BookingOutcome::Booked { appointment, warnings }))
    }

    /// Apply a committed drag through `update_appointment`.
    pub fn commit_reschedule(&self, commit: &RescheduleCommit) -> Result<BookingOutcome> {
        debug!(
            appointment_id = %commit.appointment_id,
            change = ?commit.change,
            "Committing reschedule"
        );
        self.update_appointment(commit.appointment_id, commit.to_patch())
    }

    /// `CreateRecurringAppointments`. Conflicting occurrences, including ones
    /// lost to a concurrent writer, are skipped. Any other error stops the
    /// series; once something was created the outcome is still returned,
    /// marked `aborted`.
    pub fn create_recurring_appointments(
        &self,
        template: &AppointmentDraft,
        rule: &RecurrenceRule,
    ) -> Result<RecurrenceOutcome> {
        let outcome = self.recurrence.generate(template, rule, |draft| {
            match self.create_appointment(draft) {
                Ok(BookingOutcome::Booked { appointment, .. }) => Ok(OccurrenceStatus::Created {
                    appointment_id: appointment.id,
                }),
                Ok(BookingOutcome::Rejected(report)) => Ok(OccurrenceStatus::Skipped { report }),
                Err(SchedulingError::SlotJustTaken) => Ok(OccurrenceStatus::Skipped {
                    report: ConflictReport::default(),
                }),
                Err(err) => Err(err),
            }
        })?;

        info!(
            group_id = %outcome.group_id,
            created = outcome.created_count,
            skipped = outcome.skipped_count,
            aborted = outcome.aborted,
            "Recurring series processed"
        );
        Ok(outcome)
    }

    fn fetch(&self, id: Uuid) -> Result<Appointment> {
        self.store.get(id)?.ok_or(SchedulingError::NotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Enforcement, EnforcementPolicy};
    use crate::models::Provider;
    use crate::store::InMemoryStore;
    use chrono::NaiveTime;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 8).unwrap()
    }

    struct Fixture {
        service: BookingService<InMemoryStore>,
        employee: Uuid,
        cut: Service,
    }

    fn fixture(config: SchedulingConfig) -> Fixture {
        let store = InMemoryStore::new();
        let employee = Uuid::new_v4();
        let week = (0..7)
            .map(|day| WorkingHours::new(day, t(9, 0), t(17, 0), day != 0).unwrap())
            .collect();
        store.add_provider(
            Provider {
                reference: ProviderRef::employee(employee),
                name: "Ana".to_string(),
            },
            week,
        );
        let cut = Service {
            id: Uuid::new_v4(),
            name: "Cut".to_string(),
            duration: 60,
            price_cents: 2500,
        };
        store.add_service(cut.clone());

        let now = NaiveDate::from_ymd_opt(2024, 1, 7).unwrap().and_hms_opt(8, 0, 0).unwrap();
        let clock = FixedClock(now);
        Fixture {
            service: BookingService::new(Arc::new(store), config).with_clock(Arc::new(clock)),
            employee,
            cut,
        }
    }

    fn draft(f: &Fixture, time: NaiveTime) -> AppointmentDraft {
        AppointmentDraft::for_service(&f.cut, monday(), time)
            .with_employee(f.employee)
            .with_status(AppointmentStatus::Confirmed)
    }

    #[test]
    fn create_rejects_overlap_with_a_report() {
        let f = fixture(SchedulingConfig::default());
        let first = f.service.create_appointment(draft(&f, t(10, 0))).unwrap();
        assert!(first.is_booked());

        let second = f.service.create_appointment(draft(&f, t(10, 30))).unwrap();
        let report = second.report().unwrap();
        assert!(report.has_provider_overlap());
        assert_eq!(report.next_available_slot(), Some(t(11, 0)));
        assert_eq!(f.service.store().all().len(), 1);
    }

    #[test]
    fn outside_hours_can_be_downgraded_to_a_warning() {
        let config = SchedulingConfig {
            enforcement: EnforcementPolicy {
                outside_hours: Enforcement::Warn,
                ..EnforcementPolicy::default()
            },
            ..SchedulingConfig::default()
        };
        let f = fixture(config);
        let outcome = f.service.create_appointment(draft(&f, t(16, 30))).unwrap();
        match outcome {
            BookingOutcome::Booked { warnings, .. } => {
                assert_eq!(warnings.len(), 1);
                assert!(warnings[0].is_hours_violation());
            }
            other => panic!("expected booking, got {other:?}"),
        }
    }

    #[test]
    fn outside_hours_blocks_by_default() {
        let f = fixture(SchedulingConfig::default());
        let outcome = f.service.create_appointment(draft(&f, t(16, 30))).unwrap();
        assert!(!outcome.is_booked());
    }

    #[test]
    fn update_checks_against_others_but_not_itself() {
        let f = fixture(SchedulingConfig::default());
        let moved = f
            .service
            .create_appointment(draft(&f, t(10, 0)))
            .unwrap()
            .appointment()
            .cloned()
            .unwrap();
        f.service.create_appointment(draft(&f, t(12, 0))).unwrap();

        let stretch = AppointmentPatch {
            duration: Some(90),
            ..AppointmentPatch::default()
        };
        assert!(f.service.update_appointment(moved.id, stretch).unwrap().is_booked());

        let collide = AppointmentPatch {
            time: Some(t(11, 30)),
            ..AppointmentPatch::default()
        };
        assert!(!f.service.update_appointment(moved.id, collide).unwrap().is_booked());
    }

    #[test]
    fn completed_appointments_cannot_be_rescheduled() {
        let f = fixture(SchedulingConfig::default());
        let done = f
            .service
            .create_appointment(draft(&f, t(10, 0)).with_status(AppointmentStatus::Completed))
            .unwrap()
            .appointment()
            .cloned()
            .unwrap();
        let patch = AppointmentPatch {
            time: Some(t(11, 0)),
            ..AppointmentPatch::default()
        };
        assert_eq!(
            f.service.update_appointment(done.id, patch),
            Err(SchedulingError::Immutable(AppointmentStatus::Completed))
        );
    }

    #[test]
    fn reactivating_a_cancelled_booking_is_rechecked() {
        let f = fixture(SchedulingConfig::default());
        let cancelled = f
            .service
            .create_appointment(draft(&f, t(10, 0)).with_status(AppointmentStatus::Cancelled))
            .unwrap()
            .appointment()
            .cloned()
            .unwrap();
        f.service.create_appointment(draft(&f, t(10, 0))).unwrap();

        let update = f
            .service
            .change_status(cancelled.id, AppointmentStatus::Confirmed, TransitionSource::Menu)
            .unwrap();
        assert!(!update.outcome.is_booked());
    }

    #[test]
    fn board_transition_reports_checkout() {
        let f = fixture(SchedulingConfig::default());
        let id = f
            .service
            .create_appointment(draft(&f, t(9, 0)).with_status(AppointmentStatus::InProgress))
            .unwrap()
            .appointment()
            .map(|a| a.id)
            .unwrap();
        let update = f
            .service
            .change_status(id, AppointmentStatus::Completed, TransitionSource::Board)
            .unwrap();
        assert!(update.change.triggers_checkout);
        assert_eq!(
            f.service.store().get(id).unwrap().unwrap().status,
            AppointmentStatus::Completed
        );
    }

    #[test]
    fn unknown_service_and_missing_appointment() {
        let f = fixture(SchedulingConfig::default());
        let ghost = Uuid::new_v4();
        assert_eq!(
            f.service.available_dates(ghost, Some(f.employee), None, None),
            Err(SchedulingError::UnknownService(ghost))
        );
        assert_eq!(
            f.service.update_appointment(ghost, AppointmentPatch::default()),
            Err(SchedulingError::NotFound(ghost))
        );
    }

    #[test]
    fn check_conflict_validates_before_checking() {
        let f = fixture(SchedulingConfig::default());
        let request = BookingRequest {
            employee_id: Some(f.employee),
            date: "2024-01-08".to_string(),
            time: "9:75".to_string(),
            duration: 30,
            ..BookingRequest::default()
        };
        assert!(matches!(
            f.service.check_conflict(&request),
            Err(SchedulingError::Validation(ValidationError::InvalidTime { .. }))
        ));
    }

    #[test]
    fn write_locks_are_released_on_drop() {
        let locks = WriteLocks::default();
        let key = LockKey::Client(Uuid::new_v4(), monday());
        {
            let _guard = locks.acquire(vec![key, key]);
            assert!(locks.held.lock().unwrap().contains(&key));
        }
        assert!(locks.held.lock().unwrap().is_empty());
    }
}
