/// Drag-to-move and drag-to-resize on the day board.
///
/// `RescheduleEngine` is a small state machine over one pointer gesture:
///
/// `Idle -> Dragging(move | resize) -> Committed | Reverted`
///
/// It knows nothing about rendering or input events. Callers feed it pointer
/// positions in pixels and receive either a commit to apply through
/// `UpdateAppointment` or a silent revert. A failed drag is never an error.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::SchedulingConfig;
use crate::conflict::{
    CheckScope, ConflictContext, ConflictDetector, ConflictReport, ProviderDay,
};
use crate::models::{
    Appointment, AppointmentPatch, AppointmentStatus, Candidate, ProviderKind, ProviderRef,
};
use crate::time_grid::{minutes_of, snap_down, snap_nearest, snap_up, time_from_minutes};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GestureKind {
    Move,
    Resize,
}

/// Why a gesture could not start.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GestureRejected {
    #[error("A {0} appointment cannot be dragged")]
    Locked(AppointmentStatus),

    #[error("Another gesture is already in progress")]
    AlreadyDragging,
}

/// Pixel-to-minute mapping and grid rules for gestures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GestureGeometry {
    pub pixels_per_minute: f64,
    pub drag_threshold_px: f64,
    pub move_snap: i64,
    pub resize_snap: i64,
    pub min_duration: i64,
    pub day_start: i64,
    pub day_end: i64,
}

impl Default for GestureGeometry {
    fn default() -> Self {
        GestureGeometry::from_config(&SchedulingConfig::default())
    }
}

impl GestureGeometry {
    pub fn from_config(config: &SchedulingConfig) -> Self {
        GestureGeometry {
            pixels_per_minute: config.gesture.pixels_per_minute,
            drag_threshold_px: config.gesture.drag_threshold_px,
            move_snap: config.grid.move_snap_minutes,
            resize_snap: config.grid.resize_snap_minutes,
            min_duration: config.grid.min_duration_minutes,
            day_start: minutes_of(config.gesture.board_start),
            day_end: minutes_of(config.gesture.board_end),
        }
    }

    /// Vertical pointer displacement in minutes, rounded to the nearest minute.
    pub fn delta_minutes(&self, delta_px: f64) -> i64 {
        (delta_px / self.pixels_per_minute).round() as i64
    }

    /// Start minute for a move by `delta` minutes: the first move-grid line
    /// at or after the raw target, kept inside the board.
    pub fn move_target(&self, origin_start: i64, duration: i64, delta: i64) -> i64 {
        let latest = (self.day_end - duration).max(self.day_start);
        snap_up(origin_start + delta, self.move_snap).clamp(self.day_start, latest)
    }

    /// Duration for a resize by `delta` minutes, snapped to the resize grid.
    ///
    /// The room left before the board closes is snapped down first, so the
    /// result stays on the grid even when `start` is not.
    pub fn resize_target(&self, start: i64, origin_duration: i64, delta: i64) -> i64 {
        let snapped = snap_nearest(origin_duration + delta, self.resize_snap);
        let room = snap_down(self.day_end - start, self.resize_snap);
        snapped.min(room).max(self.min_duration)
    }
}

/// Where the dragged appointment started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GestureOrigin {
    pub appointment_id: Uuid,
    pub provider: ProviderRef,
    pub start_minute: i64,
    pub duration: i64,
}

/// Candidate position shown while dragging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DragPreview {
    pub start_minute: i64,
    pub duration: i64,
    pub report: ConflictReport,
}

impl DragPreview {
    /// Drives the accept/reject indicator.
    pub fn accepted(&self) -> bool {
        self.report.is_clear()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActiveGesture {
    pub kind: GestureKind,
    pub pointer_id: u64,
    pub origin: GestureOrigin,
    origin_y: f64,
    max_travel_px: f64,
    column: ProviderDay,
    date: chrono::NaiveDate,
    pub preview: DragPreview,
}

/// A reschedule to persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RescheduleCommit {
    pub appointment_id: Uuid,
    pub change: RescheduleChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RescheduleChange {
    Time(#[serde(with = "crate::models::hhmm")] NaiveTime),
    Duration(i64),
}

impl RescheduleCommit {
    pub fn to_patch(&self) -> AppointmentPatch {
        match self.change {
            RescheduleChange::Time(time) => AppointmentPatch {
                time: Some(time),
                ..Default::default()
            },
            RescheduleChange::Duration(duration) => AppointmentPatch {
                duration: Some(duration),
                ..Default::default()
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevertReason {
    /// Pointer never travelled past the drag threshold.
    Click,
    Conflict,
    Unchanged,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GestureState {
    Idle,
    Dragging(Box<ActiveGesture>),
    Committed(RescheduleCommit),
    Reverted(RevertReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureOutcome {
    Commit(RescheduleCommit),
    Reverted(RevertReason),
    /// The event did not belong to an active gesture.
    Ignored,
}

#[derive(Debug, Clone)]
pub struct RescheduleEngine {
    geometry: GestureGeometry,
    detector: ConflictDetector,
    state: GestureState,
}

impl RescheduleEngine {
    pub fn new(geometry: GestureGeometry, detector: ConflictDetector) -> Self {
        RescheduleEngine {
            geometry,
            detector,
            state: GestureState::Idle,
        }
    }

    pub fn state(&self) -> &GestureState {
        &self.state
    }

    pub fn geometry(&self) -> &GestureGeometry {
        &self.geometry
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.state, GestureState::Dragging(_))
    }

    pub fn preview(&self) -> Option<&DragPreview> {
        match &self.state {
            GestureState::Dragging(gesture) => Some(&gesture.preview),
            _ => None,
        }
    }

    /// Capture `pointer_id` and start dragging `appointment` within `column`.
    ///
    /// `column` is the provider the card is shown under, with that provider's
    /// bookings for the appointment's date. Completed and cancelled
    /// appointments are rejected before anything is captured.
    pub fn begin(
        &mut self,
        appointment: &Appointment,
        kind: GestureKind,
        pointer_id: u64,
        pointer_y: f64,
        column: ProviderDay,
    ) -> Result<(), GestureRejected> {
        if appointment.status.is_schedule_locked() {
            return Err(GestureRejected::Locked(appointment.status));
        }
        if self.is_dragging() {
            return Err(GestureRejected::AlreadyDragging);
        }

        let origin = GestureOrigin {
            appointment_id: appointment.id,
            provider: column.provider,
            start_minute: appointment.start_minute(),
            duration: appointment.duration,
        };
        debug!(appointment_id = %appointment.id, ?kind, "Gesture started");

        self.state = GestureState::Dragging(Box::new(ActiveGesture {
            kind,
            pointer_id,
            origin,
            origin_y: pointer_y,
            max_travel_px: 0.0,
            column,
            date: appointment.date,
            preview: DragPreview {
                start_minute: origin.start_minute,
                duration: origin.duration,
                report: ConflictReport::default(),
            },
        }));
        Ok(())
    }

    /// Move the pointer. Re-checks the candidate and returns the new preview.
    /// Events from other pointers are ignored.
    pub fn update(&mut self, pointer_id: u64, pointer_y: f64) -> Option<&DragPreview> {
        let geometry = self.geometry;
        let detector = self.detector;
        let GestureState::Dragging(gesture) = &mut self.state else {
            return None;
        };
        if gesture.pointer_id != pointer_id {
            return None;
        }

        let delta_px = pointer_y - gesture.origin_y;
        gesture.max_travel_px = gesture.max_travel_px.max(delta_px.abs());
        let delta = geometry.delta_minutes(delta_px);

        let origin = gesture.origin;
        let (start, duration) = match gesture.kind {
            GestureKind::Move => (
                geometry.move_target(origin.start_minute, origin.duration, delta),
                origin.duration,
            ),
            GestureKind::Resize => (
                origin.start_minute,
                geometry.resize_target(origin.start_minute, origin.duration, delta),
            ),
        };

        if start != gesture.preview.start_minute || duration != gesture.preview.duration {
            let report = check_column(&detector, gesture, start, duration);
            gesture.preview = DragPreview {
                start_minute: start,
                duration,
                report,
            };
        }
        Some(&gesture.preview)
    }

    /// Release the pointer and decide the gesture.
    pub fn end(&mut self, pointer_id: u64, pointer_y: f64) -> GestureOutcome {
        if self.update(pointer_id, pointer_y).is_none() {
            return GestureOutcome::Ignored;
        }
        let GestureState::Dragging(gesture) =
            std::mem::replace(&mut self.state, GestureState::Idle)
        else {
            return GestureOutcome::Ignored;
        };

        let outcome = self.decide(&gesture);
        self.state = match outcome {
            GestureOutcome::Commit(commit) => {
                info!(
                    appointment_id = %commit.appointment_id,
                    change = ?commit.change,
                    "Reschedule gesture committed"
                );
                GestureState::Committed(commit)
            }
            GestureOutcome::Reverted(reason) => {
                debug!(
                    appointment_id = %gesture.origin.appointment_id,
                    ?reason,
                    "Gesture reverted"
                );
                GestureState::Reverted(reason)
            }
            GestureOutcome::Ignored => GestureState::Idle,
        };
        outcome
    }

    /// Abort the gesture from outside. Identical to losing a conflict: the
    /// card snaps back and nothing is written.
    pub fn cancel(&mut self) -> GestureOutcome {
        if !self.is_dragging() {
            return GestureOutcome::Ignored;
        }
        self.state = GestureState::Reverted(RevertReason::Cancelled);
        GestureOutcome::Reverted(RevertReason::Cancelled)
    }

    /// Return to `Idle` after the caller has consumed the outcome.
    pub fn reset(&mut self) {
        if !self.is_dragging() {
            self.state = GestureState::Idle;
        }
    }

    fn decide(&self, gesture: &ActiveGesture) -> GestureOutcome {
        if gesture.max_travel_px < self.geometry.drag_threshold_px {
            return GestureOutcome::Reverted(RevertReason::Click);
        }
        if !gesture.preview.accepted() {
            return GestureOutcome::Reverted(RevertReason::Conflict);
        }

        let origin = gesture.origin;
        let preview = &gesture.preview;
        let change = match gesture.kind {
            GestureKind::Move if preview.start_minute != origin.start_minute => {
                time_from_minutes(preview.start_minute).map(RescheduleChange::Time)
            }
            GestureKind::Resize if preview.duration != origin.duration => {
                Some(RescheduleChange::Duration(preview.duration))
            }
            _ => return GestureOutcome::Reverted(RevertReason::Unchanged),
        };

        match change {
            Some(change) => GestureOutcome::Commit(RescheduleCommit {
                appointment_id: origin.appointment_id,
                change,
            }),
            None => GestureOutcome::Reverted(RevertReason::Conflict),
        }
    }
}

/// Overlap-only check of the candidate against the gesture's column.
fn check_column(
    detector: &ConflictDetector,
    gesture: &ActiveGesture,
    start: i64,
    duration: i64,
) -> ConflictReport {
    // Out-of-day positions are refused when the gesture is decided.
    let Some(time) = time_from_minutes(start) else {
        return ConflictReport::default();
    };
    let Ok(candidate) = Candidate::new(gesture.date, time, duration) else {
        return ConflictReport::default();
    };
    let candidate = candidate.excluding(gesture.origin.appointment_id);

    let mut context = ConflictContext::default();
    let candidate = match gesture.column.provider.kind {
        ProviderKind::Employee => {
            context.employee = Some(gesture.column.clone());
            candidate.with_employee(gesture.column.provider.id)
        }
        ProviderKind::Doctor => {
            context.doctor = Some(gesture.column.clone());
            candidate.with_doctor(gesture.column.provider.id)
        }
    };

    detector.check(&candidate, &context, CheckScope::OverlapOnly)
}
