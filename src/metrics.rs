//! Deterministic attendance metrics over committed records.
//!
//! A pure read: no locking, no mutation, safe to run in parallel across
//! employees given a consistent snapshot of the period. Sparse data never
//! errors — an empty period scores 100.00 across the board instead of
//! dividing by zero.
//!
//! The punctuality score is `100 - lateDays/totalDays * 100`: the fraction
//! of days *not late*. Absent days lower no score, so an employee absent
//! all month scores 100 — preserved deliberately as the primary metric the
//! rest of the system reports. [`AttendanceSummary::true_on_time_rate`]
//! carries the stricter ratio alongside it for product review; it
//! supplements the primary metric, never replaces it.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;

use crate::error::Result;
use crate::storage::Store;
use crate::types::{AttendanceStatus, EmployeeId, RecordKind};

/// Day-level rollup of one employee's attendance over a period.
#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceSummary {
    /// Distinct dates with any record.
    pub total_days: u32,
    /// Dates whose check-in status is present or late.
    pub present_days: u32,
    /// Dates whose check-in status is late.
    pub late_days: u32,
    /// Dates whose check-in status is absent (administrative backfill).
    pub absent_days: u32,
    /// `present / total * 100`, 2 decimals; 100 when the period is empty.
    pub attendance_rate: f64,
    /// `100 - late / total * 100`, 2 decimals; 100 when the period is
    /// empty.
    pub punctuality_score: f64,
    /// `(present - late) / total * 100`, 2 decimals; the strict on-time
    /// ratio, supplementary only.
    pub true_on_time_rate: f64,
    pub total_work_hours: f64,
    pub total_overtime_hours: f64,
    pub total_late_minutes: i64,
}

/// Computes attendance metrics from the record store.
pub struct MetricsEngine<S>
where
    S: Store,
{
    store: Arc<S>,
}

impl<S> MetricsEngine<S>
where
    S: Store,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Roll up one employee's records over an inclusive date range.
    pub async fn compute(
        &self,
        employee_id: EmployeeId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<AttendanceSummary> {
        let records = self
            .store
            .attendance_in_range(employee_id, start, end)
            .await?;

        // One status slot per date, driven by the check-in record.
        let mut check_in_status: BTreeMap<NaiveDate, AttendanceStatus> = BTreeMap::new();
        let mut dates: std::collections::BTreeSet<NaiveDate> = std::collections::BTreeSet::new();
        let mut total_work_hours = 0.0;
        let mut total_overtime_hours = 0.0;
        let mut total_late_minutes = 0;

        for record in &records {
            dates.insert(record.date);
            total_work_hours += record.work_hours;
            total_overtime_hours += record.overtime_hours;
            total_late_minutes += record.late_minutes;
            if record.kind == RecordKind::CheckIn {
                check_in_status.insert(record.date, record.status);
            }
        }

        let total_days = dates.len() as u32;
        let mut present_days = 0;
        let mut late_days = 0;
        let mut absent_days = 0;
        for status in check_in_status.values() {
            match status {
                AttendanceStatus::Present => present_days += 1,
                AttendanceStatus::Late => {
                    present_days += 1;
                    late_days += 1;
                }
                AttendanceStatus::Absent => absent_days += 1,
            }
        }

        let (attendance_rate, punctuality_score, true_on_time_rate) = if total_days == 0 {
            (100.0, 100.0, 100.0)
        } else {
            let total = total_days as f64;
            (
                round2(present_days as f64 / total * 100.0),
                round2(100.0 - late_days as f64 / total * 100.0),
                round2((present_days as f64 - late_days as f64) / total * 100.0),
            )
        };

        Ok(AttendanceSummary {
            total_days,
            present_days,
            late_days,
            absent_days,
            attendance_rate,
            punctuality_score,
            true_on_time_rate,
            total_work_hours: round2(total_work_hours),
            total_overtime_hours: round2(total_overtime_hours),
            total_late_minutes,
        })
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
