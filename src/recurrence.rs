/// Recurring appointment series.
///
/// A rule expands into candidate dates counted from the template's date.
/// Each occurrence is offered to the caller's booking step independently; a
/// conflicting occurrence is skipped and the batch carries on. A failed
/// booking step stops the series, but occurrences already created are still
/// reported.

use chrono::{Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::conflict::ConflictReport;
use crate::error::ValidationError;
use crate::models::AppointmentDraft;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Biweekly,
    Monthly,
}

/// When a series stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EndCondition {
    /// Total number of occurrences, the first included.
    Occurrences(u32),
    /// Last allowed date, inclusive.
    EndDate(NaiveDate),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    pub interval: u32,
    pub end: EndCondition,
}

impl RecurrenceRule {
    pub fn new(frequency: Frequency, interval: u32, end: EndCondition) -> Self {
        RecurrenceRule {
            frequency,
            interval,
            end,
        }
    }

    pub fn validate(&self, start: NaiveDate) -> Result<(), ValidationError> {
        if self.interval == 0 {
            return Err(ValidationError::InvalidRecurrence(
                "interval must be at least 1".to_string(),
            ));
        }
        match self.end {
            EndCondition::Occurrences(0) => Err(ValidationError::InvalidRecurrence(
                "occurrences must be positive".to_string(),
            )),
            EndCondition::EndDate(end) if end < start => Err(ValidationError::InvalidRecurrence(
                format!("end date {end} is before start date {start}"),
            )),
            _ => Ok(()),
        }
    }

    /// The `index`-th date of the series, `start` being index 0.
    ///
    /// Monthly steps are taken from `start` rather than from the previous
    /// occurrence, so a series on the 31st lands on the last day of short
    /// months and returns to the 31st afterwards.
    pub fn nth_date(&self, start: NaiveDate, index: u32) -> Option<NaiveDate> {
        let steps = index.checked_mul(self.interval)?;
        match self.frequency {
            Frequency::Daily => start.checked_add_days(Days::new(u64::from(steps))),
            Frequency::Weekly => start.checked_add_days(Days::new(u64::from(steps) * 7)),
            Frequency::Biweekly => start.checked_add_days(Days::new(u64::from(steps) * 14)),
            Frequency::Monthly => start.checked_add_months(Months::new(steps)),
        }
    }
}

/// What happened to one occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OccurrenceStatus {
    Created {
        #[serde(rename = "appointmentId")]
        appointment_id: Uuid,
    },
    Skipped {
        report: ConflictReport,
    },
    /// The booking step failed here and the series stopped.
    Failed {
        reason: String,
    },
}

impl OccurrenceStatus {
    pub fn is_created(&self) -> bool {
        matches!(self, OccurrenceStatus::Created { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub status: OccurrenceStatus,
}

/// Partial-success result of a series. Every attempted date is listed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurrenceOutcome {
    pub group_id: Uuid,
    pub occurrences: Vec<Occurrence>,
    pub created_count: usize,
    pub skipped_count: usize,
    /// Set when a failed booking step cut the series short.
    #[serde(default)]
    pub aborted: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct RecurrenceGenerator {
    max_occurrences: u32,
}

impl Default for RecurrenceGenerator {
    fn default() -> Self {
        RecurrenceGenerator::new(104)
    }
}

impl RecurrenceGenerator {
    pub fn new(max_occurrences: u32) -> Self {
        RecurrenceGenerator {
            max_occurrences: max_occurrences.max(1),
        }
    }

    /// Expand `rule` into the ordered list of candidate dates.
    pub fn dates(
        &self,
        start: NaiveDate,
        rule: &RecurrenceRule,
    ) -> Result<Vec<NaiveDate>, ValidationError> {
        rule.validate(start)?;

        let limit = match rule.end {
            EndCondition::Occurrences(count) if count > self.max_occurrences => {
                return Err(ValidationError::InvalidRecurrence(format!(
                    "at most {} occurrences allowed, got {count}",
                    self.max_occurrences
                )));
            }
            EndCondition::Occurrences(count) => count,
            EndCondition::EndDate(_) => self.max_occurrences,
        };

        let mut dates = Vec::new();
        for index in 0..limit {
            let Some(date) = rule.nth_date(start, index) else {
                break;
            };
            if let EndCondition::EndDate(end) = rule.end {
                if date > end {
                    break;
                }
            }
            dates.push(date);
        }

        if let EndCondition::EndDate(end) = rule.end {
            let truncated = rule
                .nth_date(start, limit)
                .is_some_and(|next| next <= end);
            if truncated {
                warn!(%start, %end, limit, "Recurrence truncated at the occurrence cap");
            }
        }

        Ok(dates)
    }

    /// Expand the series and hand each occurrence to `book`.
    ///
    /// `book` returns the status of one occurrence; a skipped occurrence does
    /// not stop the batch. An error from `book` stops the series. If nothing
    /// was created yet the error is returned as is; otherwise the failing date
    /// is recorded as `Failed` and the outcome is marked `aborted`, so the
    /// caller still learns which occurrences were committed. Every occurrence
    /// shares one group id, taken from the template or freshly generated.
    pub fn generate<F, E>(
        &self,
        template: &AppointmentDraft,
        rule: &RecurrenceRule,
        mut book: F,
    ) -> Result<RecurrenceOutcome, E>
    where
        F: FnMut(AppointmentDraft) -> Result<OccurrenceStatus, E>,
        E: From<ValidationError> + std::fmt::Display,
    {
        let dates = self.dates(template.date, rule)?;
        let group_id = template.group_id.unwrap_or_else(Uuid::new_v4);

        let mut occurrences: Vec<Occurrence> = Vec::with_capacity(dates.len());
        let mut aborted = false;
        for date in dates {
            let draft = AppointmentDraft {
                group_id: Some(group_id),
                date,
                ..template.clone()
            };
            let status = match book(draft) {
                Ok(status) => status,
                Err(err) if occurrences.iter().any(|o| o.status.is_created()) => {
                    warn!(%group_id, %date, error = %err, "Series stopped after a failed booking");
                    occurrences.push(Occurrence {
                        date,
                        status: OccurrenceStatus::Failed {
                            reason: err.to_string(),
                        },
                    });
                    aborted = true;
                    break;
                }
                Err(err) => return Err(err),
            };
            if let OccurrenceStatus::Skipped { report } = &status {
                debug!(
                    %date,
                    conflicts = report.conflicts.len(),
                    "Skipping conflicting occurrence"
                );
            }
            occurrences.push(Occurrence { date, status });
        }

        let created_count = occurrences.iter().filter(|o| o.status.is_created()).count();
        let skipped_count = occurrences
            .iter()
            .filter(|o| matches!(o.status, OccurrenceStatus::Skipped { .. }))
            .count();

        info!(%group_id, created_count, skipped_count, aborted, "Recurring series generated");
        Ok(RecurrenceOutcome {
            group_id,
            occurrences,
            created_count,
            skipped_count,
            aborted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Service;
    use chrono::NaiveTime;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn template(date: NaiveDate) -> AppointmentDraft {
        let service = Service {
            id: Uuid::new_v4(),
            name: "Physio".to_string(),
            duration: 45,
            price_cents: 6000,
        };
        AppointmentDraft::for_service(&service, date, NaiveTime::from_hms_opt(10, 0, 0).unwrap())
            .with_employee(Uuid::new_v4())
    }

    #[test]
    fn weekly_by_count() {
        let rule = RecurrenceRule::new(Frequency::Weekly, 1, EndCondition::Occurrences(4));
        let dates = RecurrenceGenerator::default().dates(d(2024, 1, 6), &rule).unwrap();
        assert_eq!(
            dates,
            vec![d(2024, 1, 6), d(2024, 1, 13), d(2024, 1, 20), d(2024, 1, 27)]
        );
    }

    #[test]
    fn interval_multiplies_the_period() {
        let gen = RecurrenceGenerator::default();
        let daily = RecurrenceRule::new(Frequency::Daily, 3, EndCondition::Occurrences(3));
        assert_eq!(
            gen.dates(d(2024, 1, 30), &daily).unwrap(),
            vec![d(2024, 1, 30), d(2024, 2, 2), d(2024, 2, 5)]
        );

        let biweekly = RecurrenceRule::new(Frequency::Biweekly, 2, EndCondition::Occurrences(2));
        assert_eq!(
            gen.dates(d(2024, 1, 1), &biweekly).unwrap(),
            vec![d(2024, 1, 1), d(2024, 1, 29)]
        );
    }

    #[test]
    fn end_date_is_inclusive() {
        let rule = RecurrenceRule::new(Frequency::Weekly, 1, EndCondition::EndDate(d(2024, 1, 20)));
        let dates = RecurrenceGenerator::default().dates(d(2024, 1, 6), &rule).unwrap();
        assert_eq!(dates, vec![d(2024, 1, 6), d(2024, 1, 13), d(2024, 1, 20)]);
    }

    #[test]
    fn monthly_clamps_to_month_end() {
        let gen = RecurrenceGenerator::default();
        let rule = RecurrenceRule::new(Frequency::Monthly, 1, EndCondition::Occurrences(4));
        assert_eq!(
            gen.dates(d(2024, 1, 31), &rule).unwrap(),
            vec![d(2024, 1, 31), d(2024, 2, 29), d(2024, 3, 31), d(2024, 4, 30)]
        );
        assert_eq!(
            gen.dates(d(2023, 1, 31), &rule).unwrap()[1],
            d(2023, 2, 28)
        );
    }

    #[test]
    fn end_date_expansion_is_capped() {
        let gen = RecurrenceGenerator::new(10);
        let rule = RecurrenceRule::new(Frequency::Daily, 1, EndCondition::EndDate(d(2025, 1, 1)));
        assert_eq!(gen.dates(d(2024, 1, 1), &rule).unwrap().len(), 10);

        let too_many = RecurrenceRule::new(Frequency::Daily, 1, EndCondition::Occurrences(11));
        assert!(gen.dates(d(2024, 1, 1), &too_many).is_err());
    }

    #[test]
    fn invalid_rules_are_rejected() {
        let gen = RecurrenceGenerator::default();
        let start = d(2024, 1, 6);
        for rule in [
            RecurrenceRule::new(Frequency::Weekly, 0, EndCondition::Occurrences(2)),
            RecurrenceRule::new(Frequency::Weekly, 1, EndCondition::Occurrences(0)),
            RecurrenceRule::new(Frequency::Weekly, 1, EndCondition::EndDate(d(2024, 1, 5))),
        ] {
            assert!(matches!(
                gen.dates(start, &rule),
                Err(ValidationError::InvalidRecurrence(_))
            ));
        }
    }

    #[test]
    fn conflicting_occurrences_are_skipped_not_fatal() {
        let gen = RecurrenceGenerator::default();
        let rule = RecurrenceRule::new(Frequency::Weekly, 1, EndCondition::Occurrences(4));
        let template = template(d(2024, 1, 6));

        let mut seen_groups = Vec::new();
        let outcome = gen
            .generate::<_, ValidationError>(&template, &rule, |draft| {
                seen_groups.push(draft.group_id);
                if draft.date == d(2024, 1, 20) {
                    Ok(OccurrenceStatus::Skipped {
                        report: ConflictReport::default(),
                    })
                } else {
                    Ok(OccurrenceStatus::Created {
                        appointment_id: Uuid::new_v4(),
                    })
                }
            })
            .unwrap();

        assert_eq!(outcome.created_count, 3);
        assert_eq!(outcome.skipped_count, 1);
        assert_eq!(outcome.occurrences.len(), 4);
        assert!(matches!(
            outcome.occurrences[2],
            Occurrence {
                status: OccurrenceStatus::Skipped { .. },
                ..
            }
        ));
        assert!(seen_groups.iter().all(|g| *g == Some(outcome.group_id)));
    }

    #[test]
    fn booking_errors_abort_the_series() {
        let gen = RecurrenceGenerator::default();
        let rule = RecurrenceRule::new(Frequency::Daily, 1, EndCondition::Occurrences(3));
        let mut calls = 0;
        let result = gen.generate(&template(d(2024, 1, 6)), &rule, |_| {
            calls += 1;
            Err::<OccurrenceStatus, _>(ValidationError::NonPositiveDuration(0))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn failure_after_a_commit_reports_what_was_created() {
        let gen = RecurrenceGenerator::default();
        let rule = RecurrenceRule::new(Frequency::Daily, 1, EndCondition::Occurrences(3));
        let mut calls = 0;
        let outcome = gen
            .generate(&template(d(2024, 1, 6)), &rule, |_| {
                calls += 1;
                if calls == 1 {
                    Ok(OccurrenceStatus::Created {
                        appointment_id: Uuid::new_v4(),
                    })
                } else {
                    Err(ValidationError::NonPositiveDuration(0))
                }
            })
            .unwrap();

        assert_eq!(calls, 2);
        assert!(outcome.aborted);
        assert_eq!(outcome.created_count, 1);
        assert_eq!(outcome.skipped_count, 0);
        assert_eq!(outcome.occurrences.len(), 2);
        assert_eq!(outcome.occurrences[1].date, d(2024, 1, 7));
        assert!(matches!(
            outcome.occurrences[1].status,
            OccurrenceStatus::Failed { .. }
        ));
    }

    #[test]
    fn rule_wire_shape() {
        let rule: RecurrenceRule = serde_json::from_str(
            r#"{"frequency":"biweekly","interval":1,"end":{"endDate":"2024-03-01"}}"#,
        )
        .unwrap();
        assert_eq!(rule.end, EndCondition::EndDate(d(2024, 3, 1)));
    }
}
