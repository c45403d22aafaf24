/// Free/busy computation for one provider on one day.
///
/// The calculator sweeps the provider's bookings across the working window
/// and reports the gaps. A provider who is not working that day is a
/// distinct outcome from a provider who is fully booked.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Appointment, WorkingHours};
use crate::time_grid::within;

pub const DEFAULT_MIN_GAP_MINUTES: i64 = 5;

/// A bookable gap, in minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreeInterval {
    pub start_min: i64,
    pub end_min: i64,
    pub duration_min: i64,
}

impl FreeInterval {
    pub fn new(start_min: i64, end_min: i64) -> Self {
        FreeInterval {
            start_min,
            end_min,
            duration_min: end_min - start_min,
        }
    }

    pub fn contains(&self, minute: i64) -> bool {
        self.start_min <= minute && minute < self.end_min
    }
}

/// Availability of a provider for a single day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DayAvailability {
    NotWorking,
    Working {
        window: (i64, i64),
        free: Vec<FreeInterval>,
    },
}

/// Answer to "when is this provider next free?".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NextSlot {
    NotWorking,
    FullyBooked,
    Available(FreeInterval),
}

impl DayAvailability {
    pub fn is_working(&self) -> bool {
        matches!(self, DayAvailability::Working { .. })
    }

    pub fn window(&self) -> Option<(i64, i64)> {
        match self {
            DayAvailability::NotWorking => None,
            DayAvailability::Working { window, .. } => Some(*window),
        }
    }

    pub fn free(&self) -> &[FreeInterval] {
        match self {
            DayAvailability::NotWorking => &[],
            DayAvailability::Working { free, .. } => free,
        }
    }

    /// First free interval starting at or after `from_minute`.
    pub fn next_free_slot(&self, from_minute: i64) -> NextSlot {
        match self {
            DayAvailability::NotWorking => NextSlot::NotWorking,
            DayAvailability::Working { free, .. } => free
                .iter()
                .find(|interval| interval.start_min >= from_minute)
                .copied()
                .map_or(NextSlot::FullyBooked, NextSlot::Available),
        }
    }

    /// Earliest start `>= from_minute` where `duration` minutes fit in one gap.
    pub fn earliest_fit(&self, from_minute: i64, duration: i64) -> Option<i64> {
        self.free().iter().find_map(|interval| {
            let start = interval.start_min.max(from_minute);
            (start + duration <= interval.end_min).then_some(start)
        })
    }

    /// Whether `[start, end)` lies inside a single free interval.
    pub fn fits(&self, start: i64, end: i64) -> bool {
        self.free()
            .iter()
            .any(|interval| within(start, end, interval.start_min, interval.end_min))
    }

    /// Whether any gap is long enough for `duration`.
    pub fn has_room_for(&self, duration: i64) -> bool {
        self.free().iter().any(|interval| interval.duration_min >= duration)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AvailabilityCalculator {
    min_gap: i64,
}

impl Default for AvailabilityCalculator {
    fn default() -> Self {
        AvailabilityCalculator::new(DEFAULT_MIN_GAP_MINUTES)
    }
}

impl AvailabilityCalculator {
    /// Gaps shorter than `min_gap` minutes are dropped as noise.
    pub fn new(min_gap: i64) -> Self {
        AvailabilityCalculator {
            min_gap: min_gap.max(1),
        }
    }

    /// Compute the day's availability from the provider's hours for that day
    /// and its bookings on that date.
    ///
    /// Cancelled and no-show bookings are ignored, as is `exclude` so a
    /// reschedule sees its own slot as free.
    pub fn compute(
        &self,
        hours: Option<&WorkingHours>,
        appointments: &[Appointment],
        exclude: Option<Uuid>,
    ) -> DayAvailability {
        let Some((work_start, work_end)) = hours.and_then(WorkingHours::window) else {
            return DayAvailability::NotWorking;
        };

        let busy = appointments
            .iter()
            .filter(|a| a.occupies_slot() && Some(a.id) != exclude)
            .map(|a| (a.start_minute(), a.end_minute()));

        DayAvailability::Working {
            window: (work_start, work_end),
            free: self.free_intervals(work_start, work_end, busy),
        }
    }

    /// Sweep `busy` intervals across `[work_start, work_end)` and return the gaps.
    pub fn free_intervals(
        &self,
        work_start: i64,
        work_end: i64,
        busy: impl IntoIterator<Item = (i64, i64)>,
    ) -> Vec<FreeInterval> {
        let mut busy: Vec<(i64, i64)> = busy.into_iter().collect();
        busy.sort_unstable();

        let mut free = Vec::new();
        let mut cursor = work_start;

        for (start, end) in busy {
            if cursor >= work_end {
                break;
            }
            if start > cursor {
                let gap_end = start.min(work_end);
                if gap_end - cursor >= self.min_gap {
                    free.push(FreeInterval::new(cursor, gap_end));
                }
            }
            cursor = cursor.max(end);
        }

        if work_end - cursor >= self.min_gap {
            free.push(FreeInterval::new(cursor, work_end));
        }

        free
    }
}
