/// Command-line interface for the booking core.
///
/// This module provides an interactive CLI over an in-memory store: browse
/// open slots, book and reschedule appointments, run recurring series and
/// move cards through the day-of-service board.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Days, Local, NaiveDate, NaiveTime, Weekday};
use tracing::error;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use easybook::debounce::Debouncer;
use easybook::recurrence::OccurrenceStatus;
use easybook::reschedule::GestureKind;
use easybook::time_grid::parse_time;
use easybook::{
    Appointment, AppointmentDraft, AppointmentStatus, BookingOutcome, BookingRequest,
    BookingService, ConflictReport, EndCondition, Frequency, GestureOutcome, InMemoryStore,
    Provider, ProviderDirectory, ProviderRef, ProviderStatus, RecurrenceRule, SchedulingConfig,
    SchedulingError, Service, TransitionSource, WorkingHours,
};

struct BookingCLI {
    service: Arc<BookingService<InMemoryStore>>,
    running: bool,
}

impl BookingCLI {
    fn new(config: SchedulingConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        seed(&store);
        BookingCLI {
            service: Arc::new(BookingService::new(store, config)),
            running: true,
        }
    }

    fn print_header(&self) {
        println!("\n{}", "=".repeat(60));
        println!("       EASYBOOK APPOINTMENT SCHEDULING");
        println!("{}", "=".repeat(60));
    }

    fn print_menu(&self) {
        println!("\n--- Main Menu ---");
        println!("1. View staff and services");
        println!("2. View available slots");
        println!("3. Book appointment");
        println!("4. View appointments");
        println!("5. Change appointment status");
        println!("6. Book recurring series");
        println!("7. Drag an appointment on the board");
        println!("8. Today's staff snapshot");
        println!("9. Run demo");
        println!("0. Exit");
        println!("{}", "-".repeat(20));
    }

    fn get_input(&mut self, prompt: &str, default: Option<&str>) -> String {
        if let Some(def) = default {
            print!("{} [{}]: ", prompt, def);
        } else {
            print!("{}: ", prompt);
        }
        let _ = io::stdout().flush();

        let mut input = String::new();
        match io::stdin().read_line(&mut input) {
            Ok(0) | Err(_) => {
                self.running = false;
                return default.unwrap_or("").to_string();
            }
            Ok(_) => {}
        }

        let input = input.trim();
        if input.is_empty() {
            default.unwrap_or("").to_string()
        } else {
            input.to_string()
        }
    }

    fn get_int_input(&mut self, prompt: &str, default: Option<i64>) -> i64 {
        loop {
            let default_str = default.map(|d| d.to_string());
            let input = self.get_input(prompt, default_str.as_deref());

            if let Ok(value) = input.parse::<i64>() {
                return value;
            }
            if !self.running {
                return default.unwrap_or(0);
            }
            println!("Please enter a valid number");
        }
    }

    fn pick<T: Clone>(
        &mut self,
        title: &str,
        items: &[T],
        label: impl Fn(&T) -> String,
    ) -> Option<T> {
        if items.is_empty() {
            println!("\nNothing to choose from");
            return None;
        }
        println!("\n{}:", title);
        for (i, item) in items.iter().enumerate() {
            println!("  {}. {}", i + 1, label(item));
        }
        let choice = self.get_int_input("Select (0 to go back)", Some(1));
        if choice <= 0 {
            return None;
        }
        items.get(choice as usize - 1).cloned()
    }

    fn get_date(&mut self, prompt: &str) -> Option<NaiveDate> {
        let default = next_weekday(Local::now().date_naive()).format("%Y-%m-%d").to_string();
        let input = self.get_input(prompt, Some(&default));
        match NaiveDate::parse_from_str(&input, "%Y-%m-%d") {
            Ok(date) => Some(date),
            Err(_) => {
                println!("Invalid date '{}', expected YYYY-MM-DD", input);
                None
            }
        }
    }

    fn providers(&self) -> Vec<Provider> {
        match ProviderDirectory::providers(self.service.store()) {
            Ok(providers) => providers,
            Err(e) => {
                println!("Error loading staff: {}", e);
                Vec::new()
            }
        }
    }

    fn services(&self) -> Vec<Service> {
        catalogue()
    }

    fn view_staff(&self) {
        println!("\n--- Staff ---");
        for provider in self.providers() {
            println!("  {:20} {}", provider.name, provider.reference.kind.name());
            if let Ok(week) = self.service.provider_working_hours(provider.reference) {
                for day in week.iter().filter(|d| d.is_available) {
                    println!(
                        "      {} {} - {}",
                        weekday_name(day.day_of_week),
                        day.start_time.format("%H:%M"),
                        day.end_time.format("%H:%M")
                    );
                }
            }
        }

        println!("\n--- Services ---");
        for service in self.services() {
            println!(
                "  {:20} {:3} min  ${}.{:02}",
                service.name,
                service.duration,
                service.price_cents / 100,
                service.price_cents % 100
            );
        }
    }

    fn view_available_slots(&mut self) {
        println!("\n--- Available Slots ---");
        let services = self.services();
        let Some(service) = self.pick("Services", &services, |s| {
            format!("{} ({} min)", s.name, s.duration)
        }) else {
            return;
        };
        let Some(date) = self.get_date("Date (YYYY-MM-DD)") else {
            return;
        };

        match self.service.available_slots(date, service.id, None, None, None) {
            Ok(slots) if slots.is_empty() => println!("\nNo open slots on {}", date),
            Ok(slots) => {
                println!("\n{}:", date.format("%A, %Y-%m-%d"));
                for slot in slots {
                    println!(
                        "  {}  {}",
                        slot.time.format("%H:%M"),
                        slot.employee_name.as_deref().unwrap_or("-")
                    );
                }
            }
            Err(e) => println!("Error: {}", e),
        }
    }

    fn book_appointment(&mut self) {
        println!("\n--- Book Appointment ---");
        let services = self.services();
        let Some(service) = self.pick("Services", &services, |s| s.name.clone()) else {
            return;
        };
        let providers = self.providers();
        let Some(provider) = self.pick("Staff", &providers, |p| p.name.clone()) else {
            return;
        };
        let Some(date) = self.get_date("Date (YYYY-MM-DD)") else {
            return;
        };
        let time_input = self.get_input("Time (HH:MM)", Some("10:00"));
        let time = match parse_time("time", &time_input) {
            Ok(time) => time,
            Err(e) => {
                println!("{}", e);
                return;
            }
        };

        // Advisory check first, the way a booking form warns before submit.
        let request = BookingRequest {
            employee_id: employee_of(&provider),
            doctor_id: doctor_of(&provider),
            date: date.format("%Y-%m-%d").to_string(),
            time: time_input,
            duration: service.duration,
            ..BookingRequest::default()
        };
        match self.service.check_conflict(&request) {
            Ok(report) if !report.is_clear() => {
                println!("\nWarning, this booking has conflicts:");
                print_report(&report);
            }
            Ok(_) => println!("\nSlot looks free"),
            Err(e) => {
                println!("Error: {}", e);
                return;
            }
        }

        let draft = with_provider(AppointmentDraft::for_service(&service, date, time), &provider)
            .with_client(Uuid::new_v4())
            .with_status(AppointmentStatus::Confirmed);
        print_outcome(&self.service.create_appointment(draft));
    }

    fn view_appointments(&self) {
        let appointments = self.service.store().all();
        if appointments.is_empty() {
            println!("\nNo appointments");
            return;
        }

        println!("\n--- Appointments ({}) ---", appointments.len());
        let names = self.providers();
        let mut current_date = None;
        for apt in appointments {
            if Some(apt.date) != current_date {
                current_date = Some(apt.date);
                println!("\n{}:", apt.date.format("%A, %Y-%m-%d"));
            }
            let staff = names
                .iter()
                .find(|p| apt.is_with(p.reference))
                .map_or("-", |p| p.name.as_str());
            println!(
                "  {} - {} {:15} {:12} [{}]",
                apt.time.format("%H:%M"),
                minutes_label(apt.end_minute()),
                apt.service_name,
                staff,
                apt.status
            );
        }
    }

    fn change_status(&mut self) {
        let appointments = self.service.store().all();
        let Some(apt) = self.pick("Appointments", &appointments, |a| {
            format!("{} {} {} [{}]", a.date, a.time.format("%H:%M"), a.service_name, a.status)
        }) else {
            return;
        };
        let statuses = AppointmentStatus::ALL.to_vec();
        let Some(status) = self.pick("New status", &statuses, |s| s.name().to_string()) else {
            return;
        };
        let source = match self.get_input("Source: board or menu", Some("menu")).as_str() {
            "board" => TransitionSource::Board,
            _ => TransitionSource::Menu,
        };

        match self.service.change_status(apt.id, status, source) {
            Ok(update) => {
                print_outcome(&Ok(update.outcome));
                if update.change.triggers_checkout {
                    println!("Checkout is due for this appointment");
                }
            }
            Err(e) => println!("Error: {}", e),
        }
    }

    fn book_recurring(&mut self) {
        println!("\n--- Recurring Series ---");
        let services = self.services();
        let Some(service) = self.pick("Services", &services, |s| s.name.clone()) else {
            return;
        };
        let providers = self.providers();
        let Some(provider) = self.pick("Staff", &providers, |p| p.name.clone()) else {
            return;
        };
        let Some(date) = self.get_date("First date (YYYY-MM-DD)") else {
            return;
        };
        let Ok(time) = parse_time("time", &self.get_input("Time (HH:MM)", Some("10:00"))) else {
            println!("Invalid time");
            return;
        };
        let frequency =
            self.get_input("Frequency: daily, weekly, biweekly, monthly", Some("weekly"));
        let frequency = match frequency.as_str() {
            "daily" => Frequency::Daily,
            "biweekly" => Frequency::Biweekly,
            "monthly" => Frequency::Monthly,
            _ => Frequency::Weekly,
        };
        let count = self.get_int_input("Number of occurrences", Some(4));

        let template = with_provider(AppointmentDraft::for_service(&service, date, time), &provider)
            .with_status(AppointmentStatus::Confirmed);
        let end = EndCondition::Occurrences(count.max(0) as u32);
        let rule = RecurrenceRule::new(frequency, 1, end);
        self.report_series(&template, &rule);
    }

    fn report_series(&self, template: &AppointmentDraft, rule: &RecurrenceRule) {
        match self.service.create_recurring_appointments(template, rule) {
            Ok(outcome) => {
                for occurrence in &outcome.occurrences {
                    match &occurrence.status {
                        OccurrenceStatus::Created { .. } => {
                            println!("  {}  created", occurrence.date)
                        }
                        OccurrenceStatus::Skipped { report } => println!(
                            "  {}  skipped ({})",
                            occurrence.date,
                            report
                                .conflicts
                                .iter()
                                .map(|c| c.type_name())
                                .collect::<Vec<_>>()
                                .join(", ")
                        ),
                        OccurrenceStatus::Failed { reason } => {
                            println!("  {}  failed ({})", occurrence.date, reason)
                        }
                    }
                }
                println!(
                    "Created {}, skipped {}",
                    outcome.created_count, outcome.skipped_count
                );
                if outcome.aborted {
                    println!("Series stopped early; later dates were not attempted.");
                }
            }
            Err(e) => println!("Error: {}", e),
        }
    }

    fn drag_appointment(&mut self) {
        let appointments = self.service.store().all();
        let Some(apt) = self.pick("Appointments", &appointments, |a| {
            format!("{} {} {} [{}]", a.date, a.time.format("%H:%M"), a.service_name, a.status)
        }) else {
            return;
        };
        let kind = match self.get_input("Gesture: move or resize", Some("move")).as_str() {
            "resize" => GestureKind::Resize,
            _ => GestureKind::Move,
        };
        let pixels = self.get_int_input("Pointer travel in pixels (+down / -up)", Some(90));
        self.drag(&apt, kind, pixels as f64);
    }

    fn drag(&self, apt: &Appointment, kind: GestureKind, pixels: f64) {
        let column = match self.service.gesture_column(apt) {
            Ok(column) => column,
            Err(e) => {
                println!("Error: {}", e);
                return;
            }
        };

        let mut engine = self.service.gesture_engine();
        if let Err(e) = engine.begin(apt, kind, 1, 0.0, column) {
            println!("{}", e);
            return;
        }
        if let Some(preview) = engine.update(1, pixels) {
            println!(
                "  preview {} for {} min: {}",
                minutes_label(preview.start_minute),
                preview.duration,
                if preview.accepted() { "ok" } else { "conflict" }
            );
        }

        match engine.end(1, pixels) {
            GestureOutcome::Commit(commit) => {
                print_outcome(&self.service.commit_reschedule(&commit));
            }
            GestureOutcome::Reverted(reason) => println!("  snapped back ({:?})", reason),
            GestureOutcome::Ignored => {}
        }
    }

    fn view_snapshot(&self) {
        match self.service.today_snapshot() {
            Ok(snapshots) => {
                println!("\n--- Staff right now ---");
                for snap in snapshots {
                    let status = match snap.status {
                        ProviderStatus::Free => "free",
                        ProviderStatus::Busy => "busy",
                        ProviderStatus::Off => "off",
                    };
                    let next = snap
                        .next_free_at
                        .map(|t| format!(", next free {}", t.format("%H:%M")))
                        .unwrap_or_default();
                    println!(
                        "  {:20} {:4}{}  ({} today)",
                        snap.provider.name,
                        status,
                        next,
                        snap.appointments.len()
                    );
                }
            }
            Err(e) => println!("Error: {}", e),
        }
    }

    fn run_demo(&mut self) {
        println!("\n--- Running Demo ---");

        let providers = self.providers();
        let (Some(sara), Some(dr_lee)) = (
            providers.iter().find(|p| p.name == "Sara").cloned(),
            providers.iter().find(|p| p.name == "Dr. Lee").cloned(),
        ) else {
            println!("Demo staff missing");
            return;
        };
        let services = self.services();
        let (haircut, consultation) = (services[0].clone(), services[2].clone());

        let day = next_weekday(Local::now().date_naive());
        let at = |h: u32, m: u32| NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN);
        let client = Uuid::new_v4();
        println!("Booking on {}", day.format("%A, %Y-%m-%d"));

        println!("\n1. Haircut with Sara at 10:00");
        let first = self.service.create_appointment(
            AppointmentDraft::for_service(&haircut, day, at(10, 0))
                .with_employee(sara.reference.id)
                .with_client(client)
                .with_status(AppointmentStatus::Confirmed),
        );
        print_outcome(&first);

        println!("\n2. Another haircut with Sara at 10:15 (overlaps)");
        print_outcome(&self.service.create_appointment(
            AppointmentDraft::for_service(&haircut, day, at(10, 15))
                .with_employee(sara.reference.id)
                .with_status(AppointmentStatus::Pending),
        ));

        println!("\n3. Same client with Dr. Lee at 10:00 (client double-booking)");
        print_outcome(&self.service.create_appointment(
            AppointmentDraft::for_service(&consultation, day, at(10, 0))
                .with_doctor(dr_lee.reference.id)
                .with_client(client)
                .with_status(AppointmentStatus::Confirmed),
        ));

        println!("\n4. Dr. Lee at 12:30 (runs past 13:00)");
        print_outcome(&self.service.create_appointment(
            AppointmentDraft::for_service(&consultation, day, at(12, 30))
                .with_doctor(dr_lee.reference.id)
                .with_status(AppointmentStatus::Confirmed),
        ));

        println!("\n5. Weekly haircut with Sara at 14:00, four times");
        let two_weeks_on = day.checked_add_days(Days::new(14)).unwrap_or(day);
        println!("   First, someone else takes {} 14:00:", two_weeks_on);
        print_outcome(&self.service.create_appointment(
            AppointmentDraft::for_service(&haircut, two_weeks_on, at(14, 0))
                .with_employee(sara.reference.id)
                .with_status(AppointmentStatus::Confirmed),
        ));
        let template = AppointmentDraft::for_service(&haircut, day, at(14, 0))
            .with_employee(sara.reference.id)
            .with_status(AppointmentStatus::Confirmed);
        self.report_series(
            &template,
            &RecurrenceRule::new(Frequency::Weekly, 1, EndCondition::Occurrences(4)),
        );

        if let Ok(BookingOutcome::Booked { appointment, .. }) = &first {
            println!("\n6. Drag the 10:00 haircut down by 45 minutes");
            self.drag(appointment, GestureKind::Move, 90.0);

            println!("\n7. Board: waiting -> completed is refused, menu allows it");
            let id = appointment.id;
            for (status, source) in [
                (AppointmentStatus::Waiting, TransitionSource::Board),
                (AppointmentStatus::Completed, TransitionSource::Board),
                (AppointmentStatus::InProgress, TransitionSource::Board),
                (AppointmentStatus::Completed, TransitionSource::Board),
            ] {
                match self.service.change_status(id, status, source) {
                    Ok(update) => println!(
                        "  {} -> {}{}",
                        update.change.from,
                        update.change.to,
                        if update.change.triggers_checkout { " (checkout due)" } else { "" }
                    ),
                    Err(e) => println!("  {}", e),
                }
            }
        }

        println!("\n8. Live conflict check while typing (debounced)");
        self.debounced_demo(&sara, &haircut, day);
    }

    fn debounced_demo(&self, sara: &Provider, haircut: &Service, day: NaiveDate) {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_time().build() {
            Ok(runtime) => runtime,
            Err(e) => {
                println!("  runtime unavailable: {}", e);
                return;
            }
        };

        runtime.block_on(async {
            let debouncer = Debouncer::from_config(self.service.config());
            let mut checks = Vec::new();
            for typed in ["1", "11", "11:", "11:3", "11:30"] {
                let service = Arc::clone(&self.service);
                let request = BookingRequest {
                    employee_id: Some(sara.reference.id),
                    date: day.format("%Y-%m-%d").to_string(),
                    time: typed.to_string(),
                    duration: haircut.duration,
                    ..BookingRequest::default()
                };
                let check =
                    debouncer.trigger(move || async move { service.check_conflict(&request) });
                checks.push((typed, check));
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            for (typed, check) in checks {
                match check.outcome().await {
                    Some(Ok(report)) => {
                        println!("  '{}' -> {} conflict(s)", typed, report.conflicts.len())
                    }
                    Some(Err(e)) => println!("  '{}' -> {}", typed, e),
                    None => println!("  '{}' -> superseded", typed),
                }
            }
        });
    }

    fn run(&mut self) {
        self.print_header();

        while self.running {
            self.print_menu();

            let choice = self.get_int_input("Enter choice", Some(9));
            if !self.running {
                break;
            }

            match choice {
                1 => self.view_staff(),
                2 => self.view_available_slots(),
                3 => self.book_appointment(),
                4 => self.view_appointments(),
                5 => self.change_status(),
                6 => self.book_recurring(),
                7 => self.drag_appointment(),
                8 => self.view_snapshot(),
                9 => self.run_demo(),
                0 => {
                    self.running = false;
                    println!("\nGoodbye!");
                }
                _ => println!("Invalid choice"),
            }
        }
    }
}

fn catalogue() -> Vec<Service> {
    // Fixed ids keep the catalogue stable across calls.
    vec![
        Service {
            id: Uuid::from_u128(1),
            name: "Haircut".to_string(),
            duration: 30,
            price_cents: 2500,
        },
        Service {
            id: Uuid::from_u128(2),
            name: "Facial".to_string(),
            duration: 60,
            price_cents: 6000,
        },
        Service {
            id: Uuid::from_u128(3),
            name: "Consultation".to_string(),
            duration: 45,
            price_cents: 8000,
        },
    ]
}

fn seed(store: &InMemoryStore) {
    let week = |start: u32, end: u32, days: &[u8]| -> Vec<WorkingHours> {
        (0..7)
            .filter_map(|day| {
                WorkingHours::new(
                    day,
                    NaiveTime::from_hms_opt(start, 0, 0)?,
                    NaiveTime::from_hms_opt(end, 0, 0)?,
                    days.contains(&day),
                )
                .ok()
            })
            .collect()
    };

    store.add_provider(
        Provider {
            reference: ProviderRef::employee(Uuid::new_v4()),
            name: "Sara".to_string(),
        },
        week(9, 17, &[1, 2, 3, 4, 5, 6]),
    );
    store.add_provider(
        Provider {
            reference: ProviderRef::employee(Uuid::new_v4()),
            name: "Omar".to_string(),
        },
        week(10, 18, &[1, 2, 3, 4, 5]),
    );
    store.add_provider(
        Provider {
            reference: ProviderRef::doctor(Uuid::new_v4()),
            name: "Dr. Lee".to_string(),
        },
        week(9, 13, &[1, 2, 3, 4, 5]),
    );
    for service in catalogue() {
        store.add_service(service);
    }
}

fn employee_of(provider: &Provider) -> Option<Uuid> {
    (provider.reference.kind == easybook::ProviderKind::Employee).then_some(provider.reference.id)
}

fn doctor_of(provider: &Provider) -> Option<Uuid> {
    (provider.reference.kind == easybook::ProviderKind::Doctor).then_some(provider.reference.id)
}

fn with_provider(draft: AppointmentDraft, provider: &Provider) -> AppointmentDraft {
    match provider.reference.kind {
        easybook::ProviderKind::Employee => draft.with_employee(provider.reference.id),
        easybook::ProviderKind::Doctor => draft.with_doctor(provider.reference.id),
    }
}

/// First Monday-to-Friday date after `from`.
fn next_weekday(from: NaiveDate) -> NaiveDate {
    let mut day = from.succ_opt().unwrap_or(from);
    while matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
        day = day.succ_opt().unwrap_or(day);
    }
    day
}

fn weekday_name(day_of_week: u8) -> &'static str {
    ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"]
        .get(usize::from(day_of_week))
        .copied()
        .unwrap_or("?")
}

fn minutes_label(minutes: i64) -> String {
    easybook::time_grid::minutes_to_time(minutes)
}

fn print_report(report: &ConflictReport) {
    for conflict in &report.conflicts {
        println!("  - {}", conflict.type_name());
    }
    if let Some(next) = report.next_available_slot() {
        println!("  Next available: {}", next.format("%H:%M"));
    }
}

fn print_outcome(outcome: &Result<BookingOutcome, SchedulingError>) {
    match outcome {
        Ok(BookingOutcome::Booked { appointment, warnings }) => {
            println!(
                "  Booked {} {} at {} ({} min)",
                appointment.service_name,
                appointment.date,
                appointment.time.format("%H:%M"),
                appointment.duration
            );
            for warning in warnings {
                println!("  warning: {}", warning.type_name());
            }
        }
        Ok(BookingOutcome::Rejected(report)) => {
            println!("  Rejected:");
            print_report(report);
        }
        Err(SchedulingError::SlotJustTaken) => {
            println!("  Slot was just taken by someone else, refresh and retry");
        }
        Err(e) => println!("  Error: {}", e),
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let path = std::env::args().nth(1).map(PathBuf::from);
    let config = match SchedulingConfig::load(path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    let mut cli = BookingCLI::new(config);
    cli.run();
}
