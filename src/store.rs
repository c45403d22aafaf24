/// Storage boundary of the scheduling core.
///
/// The core never owns persistence. It reads the appointment ledger and
/// provider profiles through these traits and writes through
/// `AppointmentStore::insert` / `update`. A store must refuse a write that
/// would overlap an occupying booking of the same provider, reporting
/// [`StoreError::SlotTaken`], the way a database exclusion constraint would.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use chrono::NaiveDate;
use tracing::warn;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{Appointment, Provider, ProviderRef, Service, WorkingHours};

/// `GetProviderAppointments` and the write calls of the appointment store.
pub trait AppointmentStore: Send + Sync {
    /// All of a provider's appointments on `date`, any status.
    fn provider_appointments(
        &self,
        provider: ProviderRef,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, StoreError>;

    /// All of a client's appointments on `date`, any status and provider.
    fn client_appointments(
        &self,
        client_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, StoreError>;

    fn get(&self, id: Uuid) -> Result<Option<Appointment>, StoreError>;

    fn insert(&self, appointment: Appointment) -> Result<Appointment, StoreError>;

    fn update(&self, appointment: Appointment) -> Result<Appointment, StoreError>;
}

/// `GetProviderWorkingHours` plus the provider and service catalogues.
pub trait ProviderDirectory: Send + Sync {
    /// The provider's weekly schedule, one entry per day of week. A missing
    /// day, or an unknown provider, means not working.
    fn working_hours(&self, provider: ProviderRef) -> Result<Vec<WorkingHours>, StoreError>;

    fn providers(&self) -> Result<Vec<Provider>, StoreError>;

    fn service(&self, id: Uuid) -> Result<Option<Service>, StoreError>;
}

/// In-process store backing the CLI and the tests.
#[derive(Default)]
pub struct InMemoryStore {
    appointments: RwLock<HashMap<Uuid, Appointment>>,
    hours: RwLock<HashMap<ProviderRef, Vec<WorkingHours>>>,
    providers: RwLock<Vec<Provider>>,
    services: RwLock<HashMap<Uuid, Service>>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_provider(&self, provider: Provider, week: Vec<WorkingHours>) {
        self.hours
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(provider.reference, week);
        self.providers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(provider);
    }

    pub fn add_service(&self, service: Service) {
        self.services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(service.id, service);
    }

    /// Simulate an outage: every call fails with `Unavailable` until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Every appointment, sorted by date and time.
    pub fn all(&self) -> Vec<Appointment> {
        let mut all: Vec<Appointment> = self
            .appointments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        all.sort_by_key(|a| (a.date, a.time, a.id));
        all
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store offline".to_string()));
        }
        Ok(())
    }

    fn query(&self, filter: impl Fn(&Appointment) -> bool) -> Result<Vec<Appointment>, StoreError> {
        self.ensure_available()?;
        let mut found: Vec<Appointment> = self
            .appointments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|a| filter(a))
            .cloned()
            .collect();
        found.sort_by_key(|a| (a.time, a.id));
        Ok(found)
    }
}

/// Occupying booking that shares a provider with `candidate` and overlaps it.
fn clashing<'a>(
    ledger: &'a HashMap<Uuid, Appointment>,
    candidate: &Appointment,
) -> Option<&'a Appointment> {
    if !candidate.occupies_slot() {
        return None;
    }
    let providers = candidate.providers();
    ledger.values().find(|existing| {
        existing.id != candidate.id
            && existing.occupies_slot()
            && existing.date == candidate.date
            && providers.iter().any(|p| existing.is_with(*p))
            && existing.overlaps(candidate.start_minute(), candidate.end_minute())
    })
}

impl AppointmentStore for InMemoryStore {
    fn provider_appointments(
        &self,
        provider: ProviderRef,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, StoreError> {
        self.query(|a| a.date == date && a.is_with(provider))
    }

    fn client_appointments(
        &self,
        client_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, StoreError> {
        self.query(|a| a.date == date && a.client_id == Some(client_id))
    }

    fn get(&self, id: Uuid) -> Result<Option<Appointment>, StoreError> {
        self.ensure_available()?;
        Ok(self
            .appointments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned())
    }

    fn insert(&self, appointment: Appointment) -> Result<Appointment, StoreError> {
        self.ensure_available()?;
        let mut ledger = self
            .appointments
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = clashing(&ledger, &appointment) {
            warn!(
                appointment_id = %appointment.id,
                existing_id = %existing.id,
                "Insert refused: overlapping booking"
            );
            return Err(StoreError::SlotTaken(existing.id));
        }

        ledger.insert(appointment.id, appointment.clone());
        Ok(appointment)
    }

    fn update(&self, appointment: Appointment) -> Result<Appointment, StoreError> {
        self.ensure_available()?;
        let mut ledger = self
            .appointments
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if !ledger.contains_key(&appointment.id) {
            return Err(StoreError::NotFound(appointment.id));
        }
        if let Some(existing) = clashing(&ledger, &appointment) {
            warn!(
                appointment_id = %appointment.id,
                existing_id = %existing.id,
                "Update refused: overlapping booking"
            );
            return Err(StoreError::SlotTaken(existing.id));
        }

        ledger.insert(appointment.id, appointment.clone());
        Ok(appointment)
    }
}

impl ProviderDirectory for InMemoryStore {
    fn working_hours(&self, provider: ProviderRef) -> Result<Vec<WorkingHours>, StoreError> {
        self.ensure_available()?;
        Ok(self
            .hours
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&provider)
            .cloned()
            .unwrap_or_default())
    }

    fn providers(&self) -> Result<Vec<Provider>, StoreError> {
        self.ensure_available()?;
        Ok(self
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn service(&self, id: Uuid) -> Result<Option<Service>, StoreError> {
        self.ensure_available()?;
        Ok(self
            .services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AppointmentDraft, AppointmentStatus};
    use chrono::NaiveTime;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 8).unwrap()
    }

    fn appointment(employee: Uuid, h: u32, status: AppointmentStatus) -> Appointment {
        let service = Service {
            id: Uuid::new_v4(),
            name: "Cut".to_string(),
            duration: 60,
            price_cents: 2500,
        };
        let time = NaiveTime::from_hms_opt(h, 0, 0).unwrap();
        let draft = AppointmentDraft::for_service(&service, date(), time)
            .with_employee(employee)
            .with_status(status);
        Appointment::from_draft(draft, date().and_hms_opt(7, 0, 0).unwrap())
    }

    #[test]
    fn insert_refuses_overlap_for_same_provider() {
        let store = InMemoryStore::new();
        let employee = Uuid::new_v4();
        let first = store
            .insert(appointment(employee, 10, AppointmentStatus::Confirmed))
            .unwrap();

        let clash = store.insert(appointment(employee, 10, AppointmentStatus::Pending));
        assert_eq!(clash, Err(StoreError::SlotTaken(first.id)));

        // Other providers and cancelled bookings are unaffected.
        assert!(store
            .insert(appointment(Uuid::new_v4(), 10, AppointmentStatus::Pending))
            .is_ok());
        assert!(store
            .insert(appointment(employee, 10, AppointmentStatus::Cancelled))
            .is_ok());
        assert!(store
            .insert(appointment(employee, 11, AppointmentStatus::Pending))
            .is_ok());
    }

    #[test]
    fn update_excludes_itself_and_requires_existence() {
        let store = InMemoryStore::new();
        let employee = Uuid::new_v4();
        let mut appt = store
            .insert(appointment(employee, 10, AppointmentStatus::Confirmed))
            .unwrap();
        appt.duration = 90;
        assert!(store.update(appt.clone()).is_ok());

        let ghost = appointment(employee, 14, AppointmentStatus::Confirmed);
        assert_eq!(store.update(ghost.clone()), Err(StoreError::NotFound(ghost.id)));
    }

    #[test]
    fn queries_filter_by_provider_client_and_date() {
        let store = InMemoryStore::new();
        let employee = Uuid::new_v4();
        let client = Uuid::new_v4();
        let mut appt = appointment(employee, 9, AppointmentStatus::Confirmed);
        appt.client_id = Some(client);
        store.insert(appt).unwrap();
        store
            .insert(appointment(Uuid::new_v4(), 9, AppointmentStatus::Confirmed))
            .unwrap();

        let ours = store
            .provider_appointments(ProviderRef::employee(employee), date())
            .unwrap();
        assert_eq!(ours.len(), 1);
        assert_eq!(store.client_appointments(client, date()).unwrap().len(), 1);
        assert!(store
            .provider_appointments(ProviderRef::employee(employee), date().succ_opt().unwrap())
            .unwrap()
            .is_empty());
        assert_eq!(store.all().len(), 2);
    }

    #[test]
    fn outage_is_reported_not_hidden() {
        let store = InMemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.provider_appointments(ProviderRef::employee(Uuid::new_v4()), date()),
            Err(StoreError::Unavailable(_))
        ));
        store.set_unavailable(false);
        assert!(store
            .provider_appointments(ProviderRef::employee(Uuid::new_v4()), date())
            .unwrap()
            .is_empty());
    }
}
